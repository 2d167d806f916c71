//! `bas`: the assembler CLI (spec §6). Parses one source file, runs the
//! four-pass pipeline, and writes the resulting object stream to disk.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bas86::asm::assembler::{assemble, Options};

/// 16-bit x86 assembler.
#[derive(Debug, Clone, Parser)]
#[command(name = "bas", disable_help_flag = false)]
struct Args {
    /// Source file to assemble.
    input: PathBuf,

    /// Print the intermediate record list after pass 1.
    #[arg(short = 'I')]
    intermediate: bool,

    /// Print the source alongside the listing.
    #[arg(short = 'S')]
    source: bool,

    /// Print a memory/segment-usage report.
    #[arg(short = 'm')]
    memory: bool,

    /// Maximum number of recoverable errors before aborting.
    #[arg(long = "me", value_name = "N", default_value_t = 200)]
    max_errors: usize,

    /// Output object file. Defaults to the input's stem with a `.obj` extension.
    #[arg(short = 'o', value_name = "name")]
    output: Option<PathBuf>,

    /// Suppress non-error console output.
    #[arg(short = 'q')]
    quiet: bool,

    /// Treat identifiers as case-sensitive.
    #[arg(long = "case-sensitive")]
    case_sensitive: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).without_time().init();

    let args = Args::parse();
    let mut options = Options::new(args.input.clone());
    options.output = args.output.clone();
    options.print_intermediate = args.intermediate;
    options.print_source = args.source;
    options.memory_report = args.memory;
    options.max_errors = args.max_errors;
    options.quiet = args.quiet;
    options.case_sensitive = args.case_sensitive;

    let text = match fs::read_to_string(&args.input) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("bas: cannot read {}: {e}", args.input.display());
            return ExitCode::FAILURE;
        }
    };

    let source_name = args.input.to_string_lossy().into_owned();
    match assemble(&options, &source_name, &text) {
        Ok(report) => {
            if let Some(listing) = &report.listing {
                print_listing(listing, options.print_source);
            }
            if options.memory_report && !options.quiet {
                println!("{} object record(s) emitted", report.obj.records.len());
            }
            let out_path = options.output_path();
            match write_object(&out_path, &report.obj) {
                Ok(()) => {
                    if !options.quiet {
                        println!("{}", out_path.display());
                    }
                    if report.diagnostics.count() > 0 {
                        print_diagnostics(&report.diagnostics, &text);
                        ExitCode::FAILURE
                    } else {
                        ExitCode::SUCCESS
                    }
                }
                Err(e) => {
                    eprintln!("bas: cannot write {}: {e}", out_path.display());
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            eprintln!("bas: {e}");
            ExitCode::FAILURE
        }
    }
}

fn write_object(path: &PathBuf, obj: &bas86::asm::ofile::ObjFile) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    obj.write_to(&mut file)
}

fn print_listing(listing: &[bas86::asm::assembler::ListingLine], with_source: bool) {
    for row in listing {
        let seg = row.segment.as_deref().unwrap_or("-");
        print!("{:>6}  {seg:<8} {:04X}  {:>3}  {:<7}", row.line_no, row.offset, row.size, row.kind);
        if with_source {
            if let Some(src) = &row.source {
                print!("  {src}");
            }
        }
        println!();
    }
}

fn print_diagnostics(diagnostics: &bas86::asm::diagnostics::Diagnostics, text: &str) {
    let lines: Vec<&str> = text.lines().collect();
    for d in diagnostics.entries() {
        let source_line = lines.get(d.line.saturating_sub(1)).copied().unwrap_or("");
        eprintln!("{}", d.render_caret(source_line));
    }
}
