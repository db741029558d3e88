#![allow(dead_code)]
use std::io;
use std::path;
use ubspatch_test_utils::{get_samples_in, Sample};

pub fn samples_dir() -> path::PathBuf {
    path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("samples")
}

pub fn list_samples() -> io::Result<Vec<Sample>> {
    get_samples_in(samples_dir())
}

pub fn ubspatch(s: &[u8], p: &[u8]) -> ubspatch::Result<Vec<u8>> {
    ubspatch::apply(s, p)
}
