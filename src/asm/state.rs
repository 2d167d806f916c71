//! Pass-local state: the reference's `STATE`, cleanly separated from
//! `IFILE` (symbol/segment/group/records) per the Design Note on keeping
//! pass-local state distinct from pass-invariant state.

use bitflags::bitflags;

use crate::asm::diagnostics::Diagnostics;
use crate::asm::segment::{GroupNo, SegNo};
use crate::asm::source::SourceLoc;
use crate::asm::token::Sreg;

bitflags! {
    /// Enabled-CPU bitmask. `P86`/`P87`/`P286N`/`P286P`/`P287` gate
    /// instruction table rows (spec §3, §4.4).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpuMask: u8 {
        const P86    = 1 << 0;
        const P87    = 1 << 1;
        const P286N  = 1 << 2;
        const P286P  = 1 << 3;
        const P287   = 1 << 4;
    }
}

impl Default for CpuMask {
    fn default() -> Self {
        CpuMask::P86
    }
}

/// What a segment register is currently assumed to address, per the
/// `ASSUME` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assumed {
    Nothing,
    Segment(SegNo),
    Group(GroupNo),
}

#[derive(Debug, Clone)]
pub struct State {
    pub diagnostics: Diagnostics,
    pub max_errors: usize,
    pub curseg: Option<SegNo>,
    pub cpu: CpuMask,
    pub assume: [Assumed; Sreg::COUNT],
    pub jumps: bool,
    pub case_sensitive: bool,
    /// File name and line currently being processed; every `Diagnostics`
    /// call during a pass uses this as its anchor unless a more specific
    /// `SourceLoc` is built by the caller.
    pub current_file: String,
    pub current_line: usize,
}

impl State {
    pub fn new(file: impl Into<String>, max_errors: usize) -> Self {
        State {
            diagnostics: Diagnostics::new(),
            max_errors,
            curseg: None,
            cpu: CpuMask::default(),
            assume: [Assumed::Nothing; Sreg::COUNT],
            jumps: false,
            case_sensitive: false,
            current_file: file.into(),
            current_line: 0,
        }
    }

    /// Reset at the entry of each pass, per spec §3 STATE and §9 Design
    /// Notes ("Re-initialise STATE at each pass entry"). Diagnostics
    /// accumulate across passes (callers want the full list at the end),
    /// so they are not reset here.
    pub fn reset_for_pass(&mut self) {
        self.curseg = None;
        self.assume = [Assumed::Nothing; Sreg::COUNT];
    }

    pub fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.current_file.clone(), self.current_line)
    }

    pub fn at_line(&mut self, line: usize) {
        self.current_line = line;
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.diagnostics.error(&self.loc(), message);
    }

    pub fn has_too_many_errors(&self) -> bool {
        self.diagnostics.count() >= self.max_errors
    }
}
