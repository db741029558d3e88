#![forbid(unsafe_code)]
use std::fs;
use std::io;
use std::io::prelude::*;
use std::process;

use clap::{ArgAction, Parser};
use ubspatch::{Bspatch, Error};

#[derive(Parser, Debug)]
#[clap(
name = "ubspatch",
version,
about = "patcher for uncompressed bsdiff 4.x patches",
long_about = None,
)]
struct BspatchArgs {
    /// source file
    #[clap(value_name = "SOURCE")]
    source_path: String,

    /// target file
    #[clap(value_name = "TARGET")]
    target_path: String,

    /// patch file
    #[clap(value_name = "PATCH")]
    patch_path: String,

    /// refuse patches declaring a larger target
    #[clap(short = 'l', long = "limit", value_name = "BYTES")]
    size_limit: Option<u64>,

    /// more verbose logging, repeatable
    #[clap(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = BspatchArgs::parse();

    // RUST_LOG, when set, overrides the verbosity flags.
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(args.verbose)),
    )
    .init();

    if let Err(e) = execute(args) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

/// Default log filter for the given number of `-v` flags.
fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn execute(args: BspatchArgs) -> Result<(), Error> {
    if args.source_path == "-" && args.patch_path == "-" {
        return Err(Error::Argument("SOURCE and PATCH cannot both be stdin"));
    }

    // setup input/output
    let source = read_input(&args.source_path)?;
    let patch = read_input(&args.patch_path)?;
    log::info!(
        "read {} source bytes and {} patch bytes",
        source.len(),
        patch.len()
    );

    let mut bspatch = Bspatch::new(&patch[..])?;
    if let Some(limit) = args.size_limit {
        bspatch = bspatch.size_limit(limit);
    }

    // the target is only created once the patch applies
    let target = bspatch.apply(&source[..])?;
    if args.target_path == "-" {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        out.write_all(&target[..])?;
        out.flush()?;
    } else {
        fs::write(&args.target_path, &target[..])?;
    }
    log::info!("wrote {} target bytes", target.len());
    Ok(())
}

fn read_input(path: &str) -> io::Result<Vec<u8>> {
    let mut data;
    if path == "-" {
        data = Vec::new();
        io::stdin().read_to_end(&mut data)?;
    } else {
        data = fs::read(path)?;
    }
    data.shrink_to_fit();
    Ok(data)
}
