//! Recoverable-error collection and caret-style rendering.
//!
//! Mirrors the reference's `error` (IREC-anchored) / `error2`
//! (lexer-anchored) split as two constructors funnelling into one `Vec`,
//! per the Design Note calling for a single `emit_error` funnel.

use std::fmt;

use crate::asm::source::SourceLoc;

const TAB_WIDTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostic {
    pub file: String,
    pub line: usize,
    pub col: Option<usize>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}: {}: {}", self.file, self.line, self.message)
    }
}

impl Diagnostic {
    /// Render the offending source line and a `^` caret beneath it,
    /// expanding tabs to a fixed width of 4 the way the lexer's own
    /// error path does.
    pub fn render_caret(&self, source_line: &str) -> String {
        let mut out = format!("{self}\n{source_line}\n");
        if let Some(col) = self.col {
            let mut caret_col = 0;
            for ch in source_line.chars().take(col) {
                caret_col += if ch == '\t' { TAB_WIDTH } else { 1 };
            }
            out.push_str(&" ".repeat(caret_col));
            out.push('^');
        }
        out
    }
}

/// Collector owned by `STATE`. A `Diagnostics` never aborts by itself;
/// the caller checks `count() >= max_errors` after each emission.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    /// IREC-anchored diagnostic (the reference's `error`).
    pub fn error(&mut self, loc: &SourceLoc, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            file: loc.file.clone(),
            line: loc.line,
            col: loc.col,
            message: message.into(),
        });
        tracing::debug!(file = %loc.file, line = loc.line, "recoverable error recorded");
    }

    /// Lexer-anchored diagnostic (the reference's `error2`), always
    /// carrying a column so the caret can be rendered.
    pub fn error_at(&mut self, loc: &SourceLoc, col: usize, message: impl Into<String>) {
        self.error(&loc.clone().with_col(col), message);
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }
}
