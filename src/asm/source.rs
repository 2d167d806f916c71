//! Line-indexed source providers.
//!
//! The main source buffer and the resize pass's injected-line buffer are
//! both `Source` implementors; an `IREC`'s source reference is a signed
//! handle whose sign discriminates which one it points into (see
//! `ifile.rs`).

/// A provider of source lines, addressed by zero-based index.
pub trait Source {
    fn line(&self, index: usize) -> &str;
    fn len(&self) -> usize;
}

/// The file (or in-memory string) the user handed the assembler.
#[derive(Debug, Clone)]
pub struct MainSource {
    name: String,
    lines: Vec<String>,
}

impl MainSource {
    pub fn new(name: impl Into<String>, text: &str) -> Self {
        MainSource {
            name: name.into(),
            lines: text.lines().map(str::to_owned).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Source for MainSource {
    fn line(&self, index: usize) -> &str {
        self.lines.get(index).map(String::as_str).unwrap_or("")
    }

    fn len(&self) -> usize {
        self.lines.len()
    }
}

/// Lines synthesised by the resize pass (short-jump expansion). Appended
/// to, never removed from, for the lifetime of one assembly.
#[derive(Debug, Clone, Default)]
pub struct InjectedSource {
    lines: Vec<String>,
}

impl InjectedSource {
    pub fn new() -> Self {
        InjectedSource::default()
    }

    /// Append a synthetic line, returning its 0-based index in this buffer.
    pub fn push(&mut self, line: String) -> usize {
        self.lines.push(line);
        self.lines.len() - 1
    }
}

impl Source for InjectedSource {
    fn line(&self, index: usize) -> &str {
        self.lines.get(index).map(String::as_str).unwrap_or("")
    }

    fn len(&self) -> usize {
        self.lines.len()
    }
}

/// A signed source reference: non-negative indexes the main buffer,
/// negative (`-(i+1)`) indexes the injection buffer at index `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceRef(pub i32);

impl SourceRef {
    pub fn main(index: usize) -> Self {
        SourceRef(index as i32)
    }

    pub fn injected(index: usize) -> Self {
        SourceRef(-(index as i32) - 1)
    }

    pub fn is_injected(self) -> bool {
        self.0 < 0
    }

    pub fn resolve<'a>(self, main: &'a MainSource, injected: &'a InjectedSource) -> &'a str {
        if self.is_injected() {
            injected.line((-self.0 - 1) as usize)
        } else {
            main.line(self.0 as usize)
        }
    }

    /// 1-based line number for diagnostics. Injected lines report the
    /// line number of the IREC they were generated from; callers that
    /// need that behaviour pass it in separately (`SourceLoc::line`).
    pub fn display_index(self) -> i64 {
        if self.is_injected() {
            -(self.0 as i64) - 1
        } else {
            self.0 as i64
        }
    }
}

/// File + line (+ optional column) anchor for a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: String,
    pub line: usize,
    pub col: Option<usize>,
}

impl SourceLoc {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        SourceLoc {
            file: file.into(),
            line,
            col: None,
        }
    }

    pub fn with_col(mut self, col: usize) -> Self {
        self.col = Some(col);
        self
    }
}
