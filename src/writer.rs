use crate::{AcquisitionConfig, HistogramResult};
use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use time::OffsetDateTime;

/// Writes one run as a settings header followed by a bin × channel count table.
pub struct HistogramWriter<W: Write> {
    out: W,
}

impl HistogramWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("creating output file {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> HistogramWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write_header(
        &mut self,
        config: &AcquisitionConfig,
        result: &HistogramResult,
    ) -> Result<()> {
        let fields: [(&str, String); 9] = [
            ("Binning", config.binning.to_string()),
            ("Offset", config.offset.to_string()),
            ("AcquisitionTime", result.acquisition_time_ms().to_string()),
            ("SyncDivider", config.sync_divider.to_string()),
            ("SyncCFDZeroCross", config.sync_cfd_zero_cross.to_string()),
            ("SyncCFDLevel", config.sync_cfd_level.to_string()),
            ("InputCFDZeroCross", config.input_cfd_zero_cross.to_string()),
            ("InputCFDLevel", config.input_cfd_level.to_string()),
            ("Resolution", format!("{:.1}", result.resolution_ps())),
        ];
        for (name, value) in fields {
            writeln!(self.out, "{:<18}: {}", name, value)?;
        }
        Ok(())
    }

    /// One line per bin, one `%5d `-style column per channel.
    pub fn write_counts(&mut self, result: &HistogramResult) -> Result<()> {
        for row in result.rows() {
            for count in row.iter() {
                write!(self.out, "{:5} ", count)?;
            }
            writeln!(self.out)?;
        }
        Ok(())
    }

    pub fn write_run(&mut self, config: &AcquisitionConfig, result: &HistogramResult) -> Result<()> {
        self.write_header(config, result)?;
        self.write_counts(result)
    }

    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// `histomode_<UTC date>_<time>_run<N>.out` inside `dir`.
pub fn run_file_name(dir: &Path, when: OffsetDateTime, run: usize) -> PathBuf {
    dir.join(format!(
        "histomode_{:04}-{:02}-{:02}_{:02}-{:02}-{:02}_run{}.out",
        when.year(),
        u8::from(when.month()),
        when.day(),
        when.hour(),
        when.minute(),
        when.second(),
        run
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use ndarray::array;
    use std::time::Duration;

    fn result() -> HistogramResult {
        HistogramResult::new(
            array![[1, 20, 300], [4000, 50000, 6]],
            false,
            10000,
            Duration::from_millis(10001),
            1.0,
        )
    }

    #[test]
    fn table_has_one_row_per_bin() {
        let mut writer = HistogramWriter::new(Vec::new());
        writer.write_counts(&result()).unwrap();
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert_eq!(text, "    1  4000 \n   20 50000 \n  300     6 \n");
    }

    #[test]
    fn header_lists_settings() {
        let mut writer = HistogramWriter::new(Vec::new());
        writer.write_header(&test_config(), &result()).unwrap();
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 9);
        assert_eq!(lines[0], "Binning           : 0");
        assert_eq!(lines[2], "AcquisitionTime   : 10000");
        assert_eq!(lines[5], "SyncCFDLevel      : 50");
        assert_eq!(lines[8], "Resolution        : 1.0");
    }

    #[test]
    fn run_file_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let when = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let path = run_file_name(dir.path(), when, 3);
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n == "histomode_2023-11-14_22-13-20_run3.out"));

        let mut writer = HistogramWriter::create(&path).unwrap();
        writer.write_run(&test_config(), &result()).unwrap();
        writer.finish().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 9 + 3);
        assert!(text.ends_with("  300     6 \n"));
    }
}
