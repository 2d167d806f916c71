//! Driver orchestration (spec §4.13/§6): wires the four passes into one
//! entry point and carries the `bas` CLI's option set as a typed struct.
//!
//! This module owns no pass logic of its own — `pass0`/`pass1`/`resize`/
//! `encoding` already fully specify the pipeline. What lives here is the
//! glue a binary needs: an `Options` struct mirroring `bas`'s switches,
//! and `assemble`, which runs the pipeline end to end and reports
//! progress the way the teacher's readers log their own phases.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::asm::error::AssemblerError;
use crate::asm::ifile::{Ifile, IrecKind};
use crate::asm::ofile::ObjFile;
use crate::asm::source::{MainSource, Source};
use crate::asm::state::State;
use crate::asm::{encoding, pass0, pass1, resize};

/// `bas`'s option set (spec §6). `basl` builds one of these per input
/// file before calling [`assemble`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Source file to assemble.
    pub input: PathBuf,
    /// `-o name`: output object file. Defaults to the input's stem with
    /// a `.obj` extension, case preserved.
    pub output: Option<PathBuf>,
    /// `-I`: print the intermediate record list after pass 1.
    pub print_intermediate: bool,
    /// `-S`: print the source alongside the listing.
    pub print_source: bool,
    /// `-m`: print a memory/segment-usage report.
    pub memory_report: bool,
    /// `-me=N`: error budget before the assembler aborts.
    pub max_errors: usize,
    /// `-q`: suppress non-error console output.
    pub quiet: bool,
    /// Case-sensitive identifiers (off by default per spec §6).
    pub case_sensitive: bool,
}

impl Options {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Options {
            input: input.into(),
            output: None,
            print_intermediate: false,
            print_source: false,
            memory_report: false,
            max_errors: 200,
            quiet: false,
            case_sensitive: false,
        }
    }

    /// The `.obj` path this run will write to, honouring `-o` and
    /// otherwise swapping the input's extension.
    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(p) => p.clone(),
            None => self.input.with_extension("obj"),
        }
    }
}

/// A finished assembly: the object stream plus whatever got printed
/// along the way, for callers (tests, `basl`) that want it without
/// re-deriving it from `Options` flags.
pub struct AssemblyReport {
    pub obj: ObjFile,
    pub diagnostics: crate::asm::diagnostics::Diagnostics,
    /// Present when `-I`/`-S` asked for a listing; one entry per
    /// non-empty source line in assembly order.
    pub listing: Option<Vec<ListingLine>>,
}

/// One listing row: the record's final address/size plus, if `-S` was
/// given, the source text it came from.
#[derive(Debug, Clone)]
pub struct ListingLine {
    pub line_no: usize,
    pub source: Option<String>,
    pub segment: Option<String>,
    pub offset: u32,
    pub size: u32,
    pub kind: &'static str,
}

impl fmt::Debug for AssemblyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssemblyReport")
            .field("records", &self.obj.records.len())
            .field("diagnostics", &self.diagnostics.count())
            .finish()
    }
}

/// Thin owner of one assembly run; exists so `basl` (or a test harness)
/// has something to hold between constructing `Options` and calling
/// [`assemble`], rather than threading loose arguments around.
pub struct Assembler {
    pub options: Options,
}

impl Assembler {
    pub fn new(options: Options) -> Self {
        Assembler { options }
    }

    pub fn run(&self, source_name: &str, text: &str) -> Result<AssemblyReport, AssemblerError> {
        assemble(&self.options, source_name, text)
    }
}

/// Run the four-pass pipeline over `text` (already read from
/// `options.input`, or supplied directly by a test) and return the
/// finished object stream.
pub fn assemble(options: &Options, source_name: &str, text: &str) -> Result<AssemblyReport, AssemblerError> {
    let mut state = State::new(source_name.to_owned(), options.max_errors);
    state.case_sensitive = options.case_sensitive;
    let mut ifile = Ifile::new(options.case_sensitive);
    let main = MainSource::new(source_name, text);

    debug!(file = source_name, "pass 0: scanning source");
    if pass0::run(&mut state, &mut ifile, &main).is_err() {
        return Err(AssemblerError::TooManyErrors(state.diagnostics.count()));
    }

    debug!("pass 1: defining labels and provisional sizes");
    pass1::run(&mut state, &mut ifile)?;

    debug!("resize: converging jump and displacement widths");
    resize::run(&mut state, &mut ifile)?;

    debug!("encoding: emitting opcodes and the object directive stream");
    let module_name = module_name_of(&options.input);

    let listing = if options.print_intermediate || options.print_source {
        Some(build_listing(&ifile, &main, options.print_source))
    } else {
        None
    };

    let obj = encoding::run(&mut state, &mut ifile, &module_name)?;

    Ok(AssemblyReport { obj, diagnostics: state.diagnostics, listing })
}

/// One row per record that actually occupies space in a segment — labels-
/// only/blank lines (`IrecKind::Empty`) don't clutter the listing.
fn build_listing(ifile: &Ifile, main: &MainSource, with_source: bool) -> Vec<ListingLine> {
    ifile
        .records
        .iter()
        .filter(|rec| !matches!(rec.kind, IrecKind::Empty))
        .map(|rec| ListingLine {
            line_no: rec.loc.line,
            source: with_source.then(|| main.line(rec.loc.line.saturating_sub(1)).to_owned()),
            segment: rec.seg.map(|s| ifile.segtab.segment(s).name.clone()),
            offset: rec.offset,
            size: rec.size,
            kind: kind_label(&rec.kind),
        })
        .collect()
}

fn kind_label(kind: &IrecKind) -> &'static str {
    match kind {
        IrecKind::Instruction { .. } => "instr",
        IrecKind::Data { .. } => "data",
        IrecKind::Equ { .. } => "equ",
        IrecKind::Align { .. } => "align",
        IrecKind::Org { .. } => "org",
        IrecKind::Assume { .. } => "assume",
        IrecKind::Empty => "",
    }
}

fn module_name_of(path: &Path) -> String {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("MODULE").to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_a_minimal_module_to_an_object_stream() {
        let options = Options::new("t.asm");
        let report = assemble(&options, "t.asm", "CODE SEGMENT\nMOV AX, 1234h\nCODE ENDS\nEND\n").expect("assemble");
        assert_eq!(report.diagnostics.count(), 0);
        assert!(matches!(report.obj.records.first(), Some(crate::asm::ofile::ObjRecord::Module { .. })));
        assert!(matches!(report.obj.records.last(), Some(crate::asm::ofile::ObjRecord::ModEnd { .. })));
    }

    #[test]
    fn output_path_defaults_to_the_input_stem_with_obj_extension() {
        let options = Options::new("demo.asm");
        assert_eq!(options.output_path(), PathBuf::from("demo.obj"));
    }

    #[test]
    fn reports_undefined_symbols_as_a_fatal_error() {
        let options = Options::new("t.asm");
        let err = assemble(&options, "t.asm", "CODE SEGMENT\nJMP NOWHERE\nCODE ENDS\nEND\n").unwrap_err();
        assert!(matches!(err, AssemblerError::UndefinedSymbols(_)));
    }
}
