//! `basl`: the driver stub (spec §4.13/§6). Combining/linking is a
//! separately-specified concern; this binary's job is only to prove the
//! external interface named in §6 is a compiling surface — it builds one
//! [`Options`] per input file and hands each off to the same library
//! entry point `bas` uses, with no combining or resolution of its own.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use bas86::asm::assembler::{assemble, Options};

/// Orchestrates `bas` (and, eventually, `blink`) over a batch of sources.
#[derive(Debug, Clone, Parser)]
#[command(name = "basl")]
struct Args {
    /// Source files to assemble.
    files: Vec<PathBuf>,

    /// Assemble only; skip the link step.
    #[arg(short = 's')]
    assemble_only: bool,

    /// Output file name for the linked image.
    #[arg(short = 'o', value_name = "name")]
    output: Option<PathBuf>,

    /// Output format (placeholder; consumed by the linker, not this binary).
    #[arg(short = 'f', value_name = "FMT")]
    format: Option<String>,

    /// Map file path.
    #[arg(short = 'p', value_name = "map")]
    map: Option<PathBuf>,

    /// Maximum number of recoverable errors per file before aborting.
    #[arg(long = "me", value_name = "N", default_value_t = 200)]
    max_errors: usize,

    /// Verbose progress output.
    #[arg(short = 'v')]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.files.is_empty() {
        eprintln!("basl: no input files");
        return ExitCode::FAILURE;
    }

    let mut failed = false;
    for input in &args.files {
        let mut options = Options::new(input.clone());
        options.max_errors = args.max_errors;

        let text = match fs::read_to_string(input) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("basl: cannot read {}: {e}", input.display());
                failed = true;
                continue;
            }
        };

        let source_name = input.to_string_lossy().into_owned();
        match assemble(&options, &source_name, &text) {
            Ok(report) => {
                if args.verbose {
                    println!("{}: {} object record(s)", source_name, report.obj.records.len());
                }
                if report.diagnostics.count() > 0 {
                    failed = true;
                }
            }
            Err(e) => {
                eprintln!("basl: {source_name}: {e}");
                failed = true;
            }
        }
    }

    if args.assemble_only || args.output.is_none() {
        // The combining/resolution step belongs to the linker this
        // binary would otherwise invoke; it is out of scope here.
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
