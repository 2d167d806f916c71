//! Fixup records produced by the encoding pass wherever a byte or word
//! in the output stream depends on a value only the linker (or a later
//! assembler pass) can supply.
//!
//! A fixup always carries the *site* (segment-relative byte offset +
//! width) plus what it resolves against; `ofile.rs` serialises it as an
//! `OBJ_FIXUP` directive, `encoding.rs` is the only producer.

use crate::asm::segment::{GroupNo, SegNo};
use crate::asm::symbol::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    /// 16-bit intra-segment/group offset, patched once every label in
    /// the segment has a final address (end of the encoding pass).
    Offset,
    /// Reference to a symbol declared `EXTRN`; left for the linker.
    External,
    /// Target of a far `CALL`/`JMP` normalised against the `ASSUME`d
    /// group rather than the defining segment.
    GroupAbsJump,
    /// Paragraph (segment-base) value of a segment.
    Segment,
    /// Paragraph (segment-base) value of a group.
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupTarget {
    Symbol(SymbolId),
    Segment(SegNo),
    Group(GroupNo),
    External(u32),
}

/// `width` is 1 for a lone high/low byte of a 16-bit value (rare —
/// segment/group byte fixups on 8086 are always full words, but the
/// field exists so `ofile.rs` never has to guess) and 2 for the
/// ordinary 16-bit case.
#[derive(Debug, Clone, Copy)]
pub struct Fixup {
    pub kind: FixupKind,
    pub seg: SegNo,
    pub at: u32,
    pub width: u8,
    pub target: FixupTarget,
}

impl Fixup {
    pub fn offset(seg: SegNo, at: u32, target: SymbolId) -> Self {
        Fixup { kind: FixupKind::Offset, seg, at, width: 2, target: FixupTarget::Symbol(target) }
    }

    pub fn external(seg: SegNo, at: u32, external_id: u32) -> Self {
        Fixup { kind: FixupKind::External, seg, at, width: 2, target: FixupTarget::External(external_id) }
    }

    pub fn group_abs_jump(seg: SegNo, at: u32, target: SymbolId) -> Self {
        Fixup { kind: FixupKind::GroupAbsJump, seg, at, width: 2, target: FixupTarget::Symbol(target) }
    }

    pub fn segment_base(seg: SegNo, at: u32, target: SegNo) -> Self {
        Fixup { kind: FixupKind::Segment, seg, at, width: 2, target: FixupTarget::Segment(target) }
    }

    pub fn group_base(seg: SegNo, at: u32, target: GroupNo) -> Self {
        Fixup { kind: FixupKind::Group, seg, at, width: 2, target: FixupTarget::Group(target) }
    }
}
