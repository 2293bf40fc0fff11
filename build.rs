use std::{env, path::PathBuf};

fn main() {
    println!("cargo:rerun-if-env-changed=HHLIB_DIR");
    if env::var_os("CARGO_FEATURE_HHLIB").is_none() {
        return;
    }

    // The vendor installs hhlib.so without the usual lib prefix, so link it by path.
    let dir = env::var_os("HHLIB_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/usr/local/lib64/hh400"));
    println!("cargo:rustc-link-search=native={}", dir.display());
    println!("cargo:rustc-link-arg={}", dir.join("hhlib.so").display());
}
