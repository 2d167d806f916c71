//! Shared byte-size computation for instruction records.
//!
//! Pass 1 (provisional sizing) and `resize` (fixed-point re-sizing) must
//! never disagree about what a given operand shape costs, so both call
//! through here rather than each growing their own copy of the rules.

use crate::asm::expr::{self, Ast, ExprType};
use crate::asm::instable::{ImmSize, Insdef, ModrmCategory, WaitCategory};
use crate::asm::opclass::OperandType;
use crate::asm::operand::{MemRef, Operand};
use crate::asm::segment::{SegNo, SegmentAttrs, SegmentTable};
use crate::asm::state::{Assumed, State};
use crate::asm::symbol::{Symbol, SymbolTable};
use crate::asm::token::{Reg16, Sreg, Token};

pub fn wait_bytes(w: WaitCategory) -> u32 {
    match w {
        WaitCategory::Nopr | WaitCategory::W286 => 0,
        WaitCategory::Wait => 1,
        WaitCategory::Wai2 => 2,
    }
}

fn modrm_bytes(m: ModrmCategory) -> u32 {
    match m {
        ModrmCategory::None => 0,
        _ => 1,
    }
}

fn imm_bytes(imm: [ImmSize; 3]) -> u32 {
    imm.iter()
        .map(|i| match i {
            ImmSize::None => 0,
            ImmSize::Imm8 => 1,
            ImmSize::Imm16 => 2,
        })
        .sum()
}

/// Displacement bytes a memory operand contributes. Mirrors the
/// addressing-mode rules the encoding pass's `compute_rm` applies:
/// `[BP]` with no index needs a forced zero `disp8` because `mod=00,
/// rm=110` is the direct-address escape, not "no displacement"; a bare
/// direct address (`[1234]`, no base or index at all) always takes a
/// 16-bit displacement.
pub fn mem_displacement_size(mem: &MemRef, state: &mut State, symtab: &mut SymbolTable, segtab: &SegmentTable) -> u32 {
    if mem.base.is_none() && mem.index.is_none() {
        return 2;
    }
    let forced_disp8 = mem.base == Some(Reg16::Bp) && mem.index.is_none();
    match &mem.disp {
        None => {
            if forced_disp8 {
                1
            } else {
                0
            }
        }
        Some(ast) => displacement_value_size(ast, state, symtab, segtab),
    }
}

/// Byte width (1 or 2) an already-present displacement value needs: a
/// constant sign-extends from a byte when it fits; an external or
/// relocatable (segment `PUBLIC` or grouped) label always takes the full
/// word so a linker has room to patch it; an internal, non-relocatable
/// label's own offset sizes the same way a constant would; an
/// undefined label sizes to the 1-byte provisional minimum until it is
/// resolved.
pub(crate) fn displacement_value_size(ast: &Ast, state: &mut State, symtab: &mut SymbolTable, segtab: &SegmentTable) -> u32 {
    match expr::expr_type(state, symtab, ast) {
        ExprType::Abs => match expr::eval(state, symtab, ast) {
            Ok((t, v)) => match expr::make_absolute(t, &v) {
                Some(n) if (-128..=127).contains(&n) => 1,
                _ => 2,
            },
            Err(()) => 2,
        },
        ExprType::Rel => rel_disp_size(ast, symtab, segtab),
        _ => 2,
    }
}

fn rel_disp_size(ast: &Ast, symtab: &SymbolTable, segtab: &SegmentTable) -> u32 {
    let Ast::Label(id) = ast else { return 2 };
    match symtab.get(*id) {
        Symbol::Relative { external_id: Some(_), .. } => 2,
        Symbol::Relative { seg: None, .. } => 1,
        Symbol::Relative { seg: Some(seg), offset, .. } => {
            if is_relocatable(*seg, segtab) {
                2
            } else if (-128..=127).contains(&(*offset as i64)) {
                1
            } else {
                2
            }
        }
        _ => 2,
    }
}

fn is_relocatable(seg: SegNo, segtab: &SegmentTable) -> bool {
    let s = segtab.segment(seg);
    s.attrs.contains(SegmentAttrs::PUBLIC) || s.group.is_some()
}

fn operands_mem_size(operands: &[Operand], state: &mut State, symtab: &mut SymbolTable, segtab: &SegmentTable) -> u32 {
    operands
        .iter()
        .filter_map(|op| match op {
            Operand::Mem(m) => Some(mem_displacement_size(m, state, symtab, segtab)),
            _ => None,
        })
        .sum()
}

/// Default segment register a memory operand addresses through absent an
/// explicit override: `SS` if the base is `BP`, `DS` otherwise.
fn default_sreg(mem: &MemRef) -> Sreg {
    if mem.base == Some(Reg16::Bp) { Sreg::Ss } else { Sreg::Ds }
}

/// Whether `sr`, as currently `ASSUME`d, addresses `target`: bound
/// directly to that segment, or bound to a group `target` belongs to.
fn addresses(state: &State, sr: Sreg, target: SegNo, segtab: &SegmentTable) -> bool {
    match state.assume[sr.index()] {
        Assumed::Segment(s) => s == target,
        Assumed::Group(g) => segtab.segment(target).group == Some(g),
        Assumed::Nothing => false,
    }
}

/// The segment-override prefix a memory operand needs, per the `ASSUME`-
/// driven addressability rule: an explicit override only emits a byte
/// when it differs from the default SR; an implicit `REL_DISP` reference
/// emits nothing if the default SR already addresses its segment,
/// otherwise the first of `{DS,ES,SS,CS}` that does, or a diagnostic if
/// none can.
pub fn mem_segment_override(
    mem: &MemRef,
    state: &mut State,
    symtab: &mut SymbolTable,
    segtab: &SegmentTable,
) -> Result<Option<Sreg>, ()> {
    let default = default_sreg(mem);

    if let Some(explicit) = mem.seg_override {
        return Ok(if explicit == default { None } else { Some(explicit) });
    }

    let Some(ast) = &mem.disp else { return Ok(None) };
    if expr::expr_type(state, symtab, ast) != ExprType::Rel {
        return Ok(None);
    }
    let Ast::Label(id) = ast else { return Ok(None) };
    let target = match symtab.get(*id) {
        Symbol::Relative { seg: Some(s), .. } => *s,
        _ => return Ok(None),
    };

    if addresses(state, default, target, segtab) {
        return Ok(None);
    }
    for sr in [Sreg::Ds, Sreg::Es, Sreg::Ss, Sreg::Cs] {
        if addresses(state, sr, target, segtab) {
            return Ok(Some(sr));
        }
    }
    state.error("memory operand is not addressable under the active ASSUME");
    Err(())
}

/// Segment-override byte count a memory operand among `operands`
/// contributes. `LEA` never emits an override prefix regardless of
/// addressability (it loads the offset only, not a far pointer).
fn sreg_override_bytes(row: &Insdef, operands: &[Operand], state: &mut State, symtab: &mut SymbolTable, segtab: &SegmentTable) -> u32 {
    if row.token == Token::Lea {
        return 0;
    }
    operands
        .iter()
        .find_map(|op| match op {
            Operand::Mem(m) => Some(m),
            _ => None,
        })
        .map(|m| match mem_segment_override(m, state, symtab, segtab) {
            Ok(Some(_)) => 1,
            _ => 0,
        })
        .unwrap_or(0)
}

/// Provisional jump-displacement width: short (1 byte) unless the row
/// already declares an explicit immediate slot for the jump operand
/// (`CALL`, the widened near-`JMP` form), in which case that width is
/// authoritative. `resize` is the only place this ever grows past 1.
fn jump_bytes(row: &Insdef) -> u32 {
    (0..3)
        .filter(|&i| row.oper[i].0 == OperandType::Jump && row.imm[i] == ImmSize::None)
        .count() as u32
}

/// Size in bytes of one instruction, given the already-matched table row.
/// `prefix` is `Some` when a `REP`-family prefix was present and valid
/// for this opcode.
pub fn instruction_size(
    row: &Insdef,
    operands: &[Operand],
    prefix: Option<Token>,
    state: &mut State,
    symtab: &mut SymbolTable,
    segtab: &SegmentTable,
) -> u32 {
    let prefix_byte = if prefix.is_some() { 1 } else { 0 };
    prefix_byte
        + wait_bytes(row.wait)
        + sreg_override_bytes(row, operands, state, symtab, segtab)
        + 1
        + modrm_bytes(row.modrm)
        + operands_mem_size(operands, state, symtab, segtab)
        + imm_bytes(row.imm)
        + jump_bytes(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::expr::Ast;
    use crate::asm::operand::PtrSize;

    fn fresh() -> (State, SymbolTable, SegmentTable) {
        (State::new("t.asm", 200), SymbolTable::new(false), SegmentTable::new())
    }

    #[test]
    fn bp_with_no_displacement_forces_a_zero_disp8() {
        let (mut state, mut symtab, segtab) = fresh();
        let mem = MemRef { base: Some(Reg16::Bp), index: None, disp: None, seg_override: None, ptr_size: Some(PtrSize::Word) };
        assert_eq!(mem_displacement_size(&mem, &mut state, &mut symtab, &segtab), 1);
    }

    #[test]
    fn bare_direct_address_always_takes_a_full_word() {
        let (mut state, mut symtab, segtab) = fresh();
        let mem = MemRef { base: None, index: None, disp: Some(Ast::Num(0x1234)), seg_override: None, ptr_size: Some(PtrSize::Word) };
        assert_eq!(mem_displacement_size(&mem, &mut state, &mut symtab, &segtab), 2);
    }

    #[test]
    fn small_constant_displacement_fits_in_one_byte() {
        let (mut state, mut symtab, segtab) = fresh();
        let mem = MemRef { base: Some(Reg16::Bx), index: Some(Reg16::Si), disp: Some(Ast::Num(5)), seg_override: None, ptr_size: None };
        assert_eq!(mem_displacement_size(&mem, &mut state, &mut symtab, &segtab), 1);
    }

    #[test]
    fn relocatable_internal_label_displacement_forces_a_full_word() {
        let (mut state, mut symtab, mut segtab) = fresh();
        let seg = segtab.define_segment(crate::asm::segment::Segment::new("CODE", SegmentAttrs::PUBLIC)).unwrap();
        let id = symtab.insert_unknown("TABLE");
        symtab.init_relative(id);
        symtab.define_relative(id, seg, 5).unwrap();
        let mem = MemRef { base: Some(Reg16::Bx), index: None, disp: Some(Ast::Label(id)), seg_override: None, ptr_size: None };
        assert_eq!(mem_displacement_size(&mem, &mut state, &mut symtab, &segtab), 2);
    }

    #[test]
    fn non_relocatable_internal_label_displacement_sizes_to_its_own_offset() {
        let (mut state, mut symtab, mut segtab) = fresh();
        let seg = segtab.define_segment(crate::asm::segment::Segment::new("CODE", SegmentAttrs::PRIVATE)).unwrap();
        let id = symtab.insert_unknown("TABLE");
        symtab.init_relative(id);
        symtab.define_relative(id, seg, 5).unwrap();
        let mem = MemRef { base: Some(Reg16::Bx), index: None, disp: Some(Ast::Label(id)), seg_override: None, ptr_size: None };
        assert_eq!(mem_displacement_size(&mem, &mut state, &mut symtab, &segtab), 1);
    }
}
