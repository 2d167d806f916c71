//! Fatal, non-recoverable conditions.
//!
//! Recoverable diagnostics (malformed operand, undefined symbol, ...) are
//! data, collected by `diagnostics::Diagnostics`, not represented here —
//! this enum is strictly the "abort the pass" surface from spec §7.

use thiserror::Error;

use crate::asm::source::SourceLoc;

#[derive(Debug, Error)]
pub enum AssemblerError {
    #[error("{0}: lexeme too long (over {1} characters)")]
    LexemeOverflow(SourceLoc, usize),

    #[error("{0}: unterminated string")]
    UnterminatedString(SourceLoc),

    #[error("{where_}: phase error: {what} sized {pass1} in pass 1 but emitted {encoded} bytes")]
    PhaseSizeMismatch {
        where_: SourceLoc,
        what: &'static str,
        pass1: usize,
        encoded: usize,
    },

    #[error("{0}: symbol '{1}' undefined at encoding time")]
    UndefinedAtEncoding(SourceLoc, String),

    #[error("internal error: invalid ModR/M category {0:?}")]
    InvalidModrmCategory(crate::asm::instable::ModrmCategory),

    #[error("internal error: invalid WAIT category {0:?}")]
    InvalidWaitCategory(crate::asm::instable::WaitCategory),

    #[error("internal error: relocation length mismatch: expected {expected}, wrote {wrote}")]
    RelocationLengthMismatch { expected: usize, wrote: usize },

    #[error("resize pass failed to converge after {0} iterations")]
    ResizeDidNotConverge(usize),

    #[error("too many errors ({0}); aborting")]
    TooManyErrors(usize),

    #[error("undefined symbols remain after pass 1: {0}")]
    UndefinedSymbols(String),
}

pub type AssemblerResult<T> = Result<T, AssemblerError>;
