use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{after, bounded, select};
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, CombinedLogger, TermLogger, TerminalMode, WriteLogger};
use std::{
    fs::File,
    io::{stdin, stdout, Write},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};
use tcspc_daq::*;
use time::OffsetDateTime;

/// Histogram-mode acquisition on the first available HydraHarp device.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    /// Use the simulated instrument instead of the vendor library
    #[arg(long)]
    simulate: bool,
    /// Number of runs to take without prompting (overrides the config file)
    #[arg(short = 'n', long)]
    runs: Option<usize>,
    /// List device slots and exit
    #[arg(long)]
    list: bool,
    /// Terminal log level
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let conf = Conf::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    let output_dir = PathBuf::from(&conf.run_settings.output_dir);
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    init_logging(args.log_level, &output_dir)?;

    if args.simulate {
        run_with(Arc::new(SimLink::new(4)), &args, &conf)
    } else {
        run_hardware(&args, &conf)
    }
}

#[cfg(feature = "hhlib")]
fn run_hardware(args: &Args, conf: &Conf) -> Result<()> {
    run_with(Arc::new(HHLib), args, conf)
}

#[cfg(not(feature = "hhlib"))]
fn run_hardware(_args: &Args, _conf: &Conf) -> Result<()> {
    anyhow::bail!("built without the hhlib feature; use --simulate or rebuild with --features hhlib")
}

fn init_logging(level: LevelFilter, dir: &Path) -> Result<()> {
    let log_path = dir.join("tcspc_daq.log");
    let log_file =
        File::create(&log_path).with_context(|| format!("creating {}", log_path.display()))?;
    CombinedLogger::init(vec![
        TermLogger::new(
            level,
            simplelog::Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Debug, simplelog::Config::default(), log_file),
    ])?;
    Ok(())
}

fn run_with<L>(link: Arc<L>, args: &Args, conf: &Conf) -> Result<()>
where
    L: HardwareLink + Send + Sync + 'static,
{
    let registry = DeviceRegistry::new(link);
    registry.library_version()?;
    info!("Searching for HydraHarp devices...");
    if args.list {
        registry.discover();
        return Ok(());
    }

    let session = registry.open_first()?;
    let mut controller = AcquisitionController::with_timing(session, Timing::from(&conf.device));
    let result = acquire(&mut controller, args, conf);
    controller.shutdown();
    result
}

fn prompt(message: &str) -> Result<String> {
    println!("{message}");
    stdout().flush()?;
    let mut line = String::new();
    stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn acquire<L: HardwareLink>(
    controller: &mut AcquisitionController<L>,
    args: &Args,
    conf: &Conf,
) -> Result<()> {
    controller.initialize(conf.device.clock_source)?;
    controller.configure(&conf.acquisition)?;
    let warnings = controller.check_warnings()?;
    if !warnings.is_empty() {
        warn!("\n{}", warnings.text);
    }

    let abort = controller.abort_handle();
    let handler_abort = abort.clone();
    ctrlc::set_handler(move || handler_abort.abort()).context("installing Ctrl-C handler")?;

    let request = AcquisitionRequest::new(conf.run_settings.acquisition_time_ms)?;
    let runs = args.runs.or(conf.run_settings.runs);
    let timeout = conf.run_settings.timeout_ms.map(Duration::from_millis);
    let output_dir = PathBuf::from(&conf.run_settings.output_dir);

    let mut run = 0;
    loop {
        if runs.is_none() {
            prompt("press RETURN to start measurement")?;
        }
        if abort.is_aborted() {
            info!("Interrupted, stopping");
            break;
        }
        controller.rates()?;

        match supervised(controller, request, timeout) {
            Ok(result) => {
                let path = run_file_name(&output_dir, OffsetDateTime::now_utc(), run);
                let mut writer = HistogramWriter::create(&path)?;
                writer.write_run(&conf.acquisition, &result)?;
                writer.finish()?;
                info!("Run {} written to {}", run, path.display());
                run += 1;
            }
            Err(Error::Aborted) => {
                warn!("Run {} aborted, no data written", run);
                if runs.is_some() {
                    break;
                }
            }
            Err(e) => return Err(e.into()),
        }

        match runs {
            Some(n) if run >= n => break,
            Some(_) => {}
            None => {
                if prompt("Enter c to continue or q to quit.")? == "q" || abort.is_aborted() {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Runs one acquisition, aborting it if it outlives `timeout`.
fn supervised<L: HardwareLink>(
    controller: &mut AcquisitionController<L>,
    request: AcquisitionRequest,
    timeout: Option<Duration>,
) -> tcspc_daq::Result<HistogramResult> {
    let Some(timeout) = timeout else {
        return controller.run(request);
    };

    let abort = controller.abort_handle();
    let (done_tx, done_rx) = bounded::<()>(1);
    let watchdog = thread::spawn(move || {
        select! {
            recv(done_rx) -> _ => false,
            recv(after(timeout)) -> _ => {
                abort.abort();
                true
            }
        }
    });

    let result = controller.run(request);
    drop(done_tx);
    if watchdog.join().unwrap_or(false) {
        warn!("Acquisition exceeded {:?}", timeout);
    }
    result
}
