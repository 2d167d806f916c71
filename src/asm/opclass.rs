//! Operand types and flags used to match operands against instruction
//! table rows.
//!
//! The reference stores the flag multiset as a fixed 6-slot array with a
//! length; here it is a `bitflags` set, per the Design Note that
//! recommends a bitset keyed by `OF_*` as the idiomatic alternative.

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    None,
    Reg,
    Sreg,
    Mem,
    Imm,
    Jump,
    St,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OperandFlags: u64 {
        const RM      = 1 << 0;
        const RM8     = 1 << 1;
        const RM16    = 1 << 2;
        const RM32    = 1 << 3;
        const RM48    = 1 << 4;
        const RM64    = 1 << 5;
        const RM80    = 1 << 6;
        const AL      = 1 << 7;
        const CL      = 1 << 8;
        const AX      = 1 << 9;
        const DX      = 1 << 10;
        const REG8    = 1 << 11;
        const REG16   = 1 << 12;
        const SREG    = 1 << 13;
        const CS      = 1 << 14;
        const SS      = 1 << 15;
        const DS      = 1 << 16;
        const ES      = 1 << 17;
        const MEM     = 1 << 18;
        const MEM8    = 1 << 19;
        const MEM16   = 1 << 20;
        const MEM32   = 1 << 21;
        const MEM48   = 1 << 22;
        const MEM64   = 1 << 23;
        const MEM80   = 1 << 24;
        const INDIR   = 1 << 25;
        const SI      = 1 << 26;
        const SI8     = 1 << 27;
        const SI16    = 1 << 28;
        const DI      = 1 << 29;
        const DI8     = 1 << 30;
        const DI16    = 1 << 31;
        const IMM     = 1 << 32;
        const IMM8    = 1 << 33;
        const IMM8U   = 1 << 34;
        const ONE     = 1 << 35;
        const THREE   = 1 << 36;
        const JUMP    = 1 << 37;
        const FAR     = 1 << 38;
        const STI     = 1 << 39;
        const STT     = 1 << 40;
    }
}

/// `(type, flag multiset)`. The reference caps the multiset at 6
/// simultaneous flags; a bitset has no such cap, but callers still only
/// ever add a handful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandClass {
    pub ty: OperandType,
    pub flags: OperandFlags,
}

impl OperandClass {
    pub fn new(ty: OperandType) -> Self {
        OperandClass {
            ty,
            flags: OperandFlags::empty(),
        }
    }

    pub fn with(ty: OperandType, flags: OperandFlags) -> Self {
        OperandClass { ty, flags }
    }

    pub fn add(&mut self, flag: OperandFlags) {
        self.flags.insert(flag);
    }

    pub fn has(&self, flag: OperandFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Does this operand satisfy an instruction-table row that requires
    /// `required`? `OperandFlags::empty()` matches iff the operand type
    /// is `OperandType::None`, mirroring `OF_NONE` in the reference.
    ///
    /// A row's r/m slot is written `OperandType::Mem` regardless of
    /// whether the final ModR/M byte ends up register-direct or
    /// memory-indirect — that split is a detail of encoding, not of
    /// matching. `classify` marks both kinds with `OperandFlags::RM` for
    /// exactly this reason, so a `Mem`-typed requirement accepts either
    /// an actual memory operand or a register offering itself as r/m.
    pub fn matches(&self, required_ty: OperandType, required: OperandFlags) -> bool {
        if required.is_empty() {
            return self.ty == OperandType::None && required_ty == OperandType::None;
        }
        if required_ty == OperandType::Mem {
            return matches!(self.ty, OperandType::Mem | OperandType::Reg) && self.flags.contains(required);
        }
        self.ty == required_ty && self.flags.contains(required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_satisfies_an_rm_slot_requirement() {
        let cx = OperandClass::with(OperandType::Reg, OperandFlags::RM | OperandFlags::RM16 | OperandFlags::REG16);
        assert!(cx.matches(OperandType::Mem, OperandFlags::RM16));
    }

    #[test]
    fn memory_still_satisfies_an_rm_slot_requirement() {
        let mem = OperandClass::with(OperandType::Mem, OperandFlags::RM | OperandFlags::RM16 | OperandFlags::MEM);
        assert!(mem.matches(OperandType::Mem, OperandFlags::RM16));
    }

    #[test]
    fn immediate_does_not_satisfy_an_rm_slot_requirement() {
        let imm = OperandClass::with(OperandType::Imm, OperandFlags::IMM | OperandFlags::IMM8U);
        assert!(!imm.matches(OperandType::Mem, OperandFlags::RM16));
    }
}
