//! Pass 3: encoding (spec §4.8). Walks the now-stable `ifile.records` one
//! final time, turning each into its machine bytes and handing the whole
//! module off as an `OFILE` directive stream (`SEGDEF`/`GRPDEF`/`PUBDEF`/
//! `EXTDEF`/`LEDATA`/`FIXUP`/`MODEND`).
//!
//! Jump/branch displacements are resolved here as plain computed
//! constants — by this point every label in the module has its final
//! address, so there is nothing left for a linker to patch. Everything
//! else that isn't a compile-time constant (an absolute/external/segment
//! reference) still goes out as a `Fixup`, the same split `datanode.rs`
//! already draws for data items.

use crate::asm::error::AssemblerError;
use crate::asm::expr::{self, Ast, ExprType};
use crate::asm::ifile::{Ifile, IrecKind};
use crate::asm::instable::{self, ImmSize, ModrmCategory, OpcodeInc};
use crate::asm::ofile::{ObjFile, ObjRecord};
use crate::asm::opclass::OperandFlags;
use crate::asm::operand::{self, MemRef, Operand};
use crate::asm::pass1;
use crate::asm::reloc::Fixup;
use crate::asm::resize;
use crate::asm::segment::{GroupNo, SegNo};
use crate::asm::sizing;
use crate::asm::state::State;
use crate::asm::symbol::{SectionKind, Symbol, SymbolTable};
use crate::asm::token::{Reg16, Sreg, Token};

pub fn run(state: &mut State, ifile: &mut Ifile, module_name: &str) -> Result<ObjFile, AssemblerError> {
    state.reset_for_pass();

    let mut buffers: Vec<Vec<u8>> = ifile.segtab.segments().map(|(_, s)| vec![0u8; s.pc as usize]).collect();
    let mut fixups: Vec<Fixup> = Vec::new();

    for idx in 0..ifile.records.len() {
        let rec = ifile.records[idx].clone();
        let Some(seg) = rec.seg else { continue };
        state.curseg = Some(seg);
        pass1::pin_dollar(ifile, seg, rec.offset);

        let what = match &rec.kind {
            IrecKind::Instruction { .. } => "instruction",
            IrecKind::Data { .. } => "data item",
            IrecKind::Align { .. } => "ALIGN padding",
            IrecKind::Org { .. } => "ORG gap",
            IrecKind::Assume { .. } => "ASSUME directive",
            IrecKind::Empty | IrecKind::Equ { .. } => "record",
        };

        let bytes = match &rec.kind {
            IrecKind::Empty | IrecKind::Equ { .. } => Vec::new(),
            IrecKind::Assume { clauses } => {
                pass1::apply_assume(state, ifile, clauses);
                Vec::new()
            }
            IrecKind::Align { .. } | IrecKind::Org { .. } => vec![0u8; rec.size as usize],
            IrecKind::Data { nodes } => {
                let mut out = Vec::new();
                for node in nodes {
                    if let Err(e) = node.emit(seg, rec.offset, state, &mut ifile.symtab, &mut out, &mut fixups) {
                        state.error(e.0);
                    }
                }
                out
            }
            IrecKind::Instruction { token, prefix, operands } => {
                encode_instruction(state, ifile, seg, rec.offset, rec.size, *token, *prefix, operands, &mut fixups)
            }
        };

        if bytes.len() as u32 != rec.size {
            return Err(AssemblerError::PhaseSizeMismatch {
                where_: rec.loc.clone(),
                what,
                pass1: rec.size as usize,
                encoded: bytes.len(),
            });
        }

        let start = rec.offset as usize;
        buffers[seg.0 as usize][start..start + bytes.len()].copy_from_slice(&bytes);
    }

    let mut obj = ObjFile::new();
    obj.push(ObjRecord::Module { name: module_name.to_owned() });

    for (seg, segment) in ifile.segtab.segments() {
        obj.push(ObjRecord::SegDef { seg, name: segment.name.clone(), attrs: segment.attrs, length: segment.pc });
    }
    for (group, g) in ifile.segtab.groups() {
        obj.push(ObjRecord::GrpDef { group, name: g.name.clone(), members: g.members.clone() });
    }
    for (i, id) in ifile.symtab.externals().iter().enumerate() {
        obj.push(ObjRecord::ExtDef { name: ifile.symtab.get(*id).name().to_owned(), external_id: i as u32 });
    }
    for sym in ifile.symtab.iter() {
        if let Symbol::Relative { name, seg: Some(s), offset, public: true, .. } = sym {
            obj.push(ObjRecord::PubDef { seg: *s, name: name.clone(), offset: *offset });
        }
    }
    for (seg, _) in ifile.segtab.segments() {
        let bytes = std::mem::take(&mut buffers[seg.0 as usize]);
        if !bytes.is_empty() {
            obj.push(ObjRecord::LeData { seg, offset: 0, bytes });
        }
    }
    for f in fixups {
        obj.push(ObjRecord::Fixup(f));
    }

    let start = ifile.start.and_then(|id| match ifile.symtab.get(id) {
        Symbol::Relative { seg: Some(s), offset, .. } => Some((*s, *offset)),
        _ => None,
    });
    obj.push(ObjRecord::ModEnd { start });

    if state.diagnostics.count() > 0 {
        return Err(AssemblerError::TooManyErrors(state.diagnostics.count()));
    }

    Ok(obj)
}

fn sreg_prefix_byte(s: Sreg) -> u8 {
    match s {
        Sreg::Es => 0x26,
        Sreg::Cs => 0x2E,
        Sreg::Ss => 0x36,
        Sreg::Ds => 0x3E,
    }
}

fn register_number(op: &Operand) -> u8 {
    match op {
        Operand::Reg16(r) => r.number(),
        Operand::Reg8(r) => r.number(),
        Operand::Sreg(s) => s.index() as u8,
        Operand::St(i) => i.unwrap_or(0),
        _ => 0,
    }
}

fn sti_index_of(operands: &[Operand]) -> u8 {
    operands
        .iter()
        .find_map(|op| match op {
            Operand::St(i) => Some(i.unwrap_or(0)),
            _ => None,
        })
        .unwrap_or(0)
}

/// Which operand slot supplies the register folded into `opcode1` for
/// `OpcodeInc::Op1Reg`. Usually the first slot (`MOV r16, imm16`,
/// `PUSH r16`), but `XCHG AX, r16`'s first slot is the fixed `AX` operand
/// (register number 0) — the variable register is the *second* slot, so
/// this scans for whichever slot the row actually marks `REG8`/`REG16`.
fn opcode_inc_register(row: &instable::Insdef, operands: &[Operand]) -> u8 {
    for (i, req) in row.oper.iter().enumerate() {
        if req.1.contains(OperandFlags::REG8) || req.1.contains(OperandFlags::REG16) {
            return register_number(&operands[i]);
        }
    }
    0
}

fn emit_value_bytes(
    ast: &Ast,
    width: usize,
    seg: SegNo,
    base_offset: u32,
    state: &mut State,
    symtab: &mut SymbolTable,
    out: &mut Vec<u8>,
    fixups: &mut Vec<Fixup>,
) {
    match expr::eval(state, symtab, ast) {
        Ok((ty, val)) => {
            if let Some(n) = expr::make_absolute(ty, &val) {
                out.extend_from_slice(&n.to_le_bytes()[..width]);
                return;
            }
            let at = base_offset + out.len() as u32;
            if emit_relocatable(seg, at, ty, symtab, val.as_label(), width as u8, out, fixups).is_err() {
                state.error("operand is not a constant or relocatable value");
                out.extend(std::iter::repeat(0u8).take(width));
            }
        }
        Err(()) => {
            state.error("could not evaluate operand expression");
            out.extend(std::iter::repeat(0u8).take(width));
        }
    }
}

fn emit_relocatable(
    seg: SegNo,
    at: u32,
    ty: ExprType,
    symtab: &SymbolTable,
    id: crate::asm::symbol::SymbolId,
    width: u8,
    out: &mut Vec<u8>,
    fixups: &mut Vec<Fixup>,
) -> Result<(), ()> {
    match ty {
        ExprType::Rel | ExprType::Offset => {
            match symtab.get(id) {
                Symbol::Relative { external_id: Some(ext), .. } => fixups.push(Fixup::external(seg, at, *ext)),
                Symbol::Relative { .. } => fixups.push(Fixup::offset(seg, at, id)),
                _ => return Err(()),
            }
            out.extend(std::iter::repeat(0u8).take(width as usize));
            Ok(())
        }
        ExprType::Seg | ExprType::Sec => {
            match symtab.get(id) {
                Symbol::Relative { seg: Some(s), .. } => fixups.push(Fixup::segment_base(seg, at, *s)),
                Symbol::Section { kind: SectionKind::Segment, ordinal, .. } => {
                    fixups.push(Fixup::segment_base(seg, at, SegNo(*ordinal as u8)))
                }
                Symbol::Section { kind: SectionKind::Group, ordinal, .. } => {
                    fixups.push(Fixup::group_base(seg, at, GroupNo(*ordinal as u8)))
                }
                _ => return Err(()),
            }
            out.extend(std::iter::repeat(0u8).take(width as usize));
            Ok(())
        }
        _ => Err(()),
    }
}

fn rm_bits_for(mem: &MemRef) -> u8 {
    use Reg16::*;
    match (mem.base, mem.index) {
        (Some(Bx), Some(Si)) => 0b000,
        (Some(Bx), Some(Di)) => 0b001,
        (Some(Bp), Some(Si)) => 0b010,
        (Some(Bp), Some(Di)) => 0b011,
        (None, Some(Si)) => 0b100,
        (None, Some(Di)) => 0b101,
        (Some(Bp), None) => 0b110,
        (Some(Bx), None) => 0b111,
        (None, None) => 0b110,
        _ => 0b111,
    }
}

fn encode_mem(
    out: &mut Vec<u8>,
    reg_field: u8,
    mem: &MemRef,
    seg: SegNo,
    base_offset: u32,
    state: &mut State,
    symtab: &mut SymbolTable,
    segtab: &crate::asm::segment::SegmentTable,
    fixups: &mut Vec<Fixup>,
) {
    let rm_bits = rm_bits_for(mem);
    let direct = mem.base.is_none() && mem.index.is_none();
    let forced_disp8 = mem.base == Some(Reg16::Bp) && mem.index.is_none();

    if direct {
        out.push((reg_field << 3) | rm_bits);
        let ast = mem.disp.clone().unwrap_or(Ast::Num(0));
        emit_value_bytes(&ast, 2, seg, base_offset, state, symtab, out, fixups);
        return;
    }

    match &mem.disp {
        None if forced_disp8 => {
            out.push((0b01 << 6) | (reg_field << 3) | rm_bits);
            out.push(0);
        }
        None => {
            out.push((reg_field << 3) | rm_bits);
        }
        Some(ast) => {
            let width = sizing::displacement_value_size(ast, state, symtab, segtab);
            if width == 1 {
                out.push((0b01 << 6) | (reg_field << 3) | rm_bits);
                emit_value_bytes(ast, 1, seg, base_offset, state, symtab, out, fixups);
            } else {
                out.push((0b10 << 6) | (reg_field << 3) | rm_bits);
                emit_value_bytes(ast, 2, seg, base_offset, state, symtab, out, fixups);
            }
        }
    }
}

fn encode_rm_byte(
    out: &mut Vec<u8>,
    reg_field: u8,
    operand: &Operand,
    seg: SegNo,
    base_offset: u32,
    state: &mut State,
    symtab: &mut SymbolTable,
    segtab: &crate::asm::segment::SegmentTable,
    fixups: &mut Vec<Fixup>,
) {
    match operand {
        Operand::Reg16(r) => out.push(0xC0 | (reg_field << 3) | r.number()),
        Operand::Reg8(r) => out.push(0xC0 | (reg_field << 3) | r.number()),
        Operand::Sreg(s) => out.push(0xC0 | (reg_field << 3) | s.index() as u8),
        Operand::St(i) => out.push(0xC0 | (reg_field << 3) | i.unwrap_or(0)),
        Operand::Mem(mem) => encode_mem(out, reg_field, mem, seg, base_offset, state, symtab, segtab, fixups),
        Operand::Expr(_) => state.error("expected a register or memory operand here"),
    }
}

/// Resolve a direct branch target to the signed displacement from the
/// instruction following it, and push that many bytes (1 or 2) onto
/// `out`. `total_size` is the record's final, already-converged size. A
/// target in a different segment of the same group has no displacement
/// the assembler can compute at all; it goes out as a `GROUP_ABSOLUTE_JUMP`
/// fixup instead, the same way an external reference would.
fn encode_rel(
    state: &mut State,
    ifile: &mut Ifile,
    seg: SegNo,
    base_offset: u32,
    total_size: u32,
    out: &mut Vec<u8>,
    operands: &[Operand],
    width: usize,
    fixups: &mut Vec<Fixup>,
) {
    let ast = match operands.first() {
        Some(Operand::Expr(a)) => a.clone(),
        _ => {
            state.error("branch operand must be a label");
            out.extend(std::iter::repeat(0u8).take(width));
            return;
        }
    };
    match resize::jump_target_offset(state, ifile, seg, &ast) {
        Some(resize::JumpTarget::Local(target)) => {
            let next_ip = base_offset + total_size;
            let delta = target as i64 - next_ip as i64;
            if width == 1 {
                if !(-128..=127).contains(&delta) {
                    state.error("branch target no longer fits a short jump after resize");
                }
                out.push(delta as i8 as u8);
            } else {
                out.extend_from_slice(&(delta as i16).to_le_bytes());
            }
        }
        Some(resize::JumpTarget::CrossSegment(id)) => {
            let at = base_offset + out.len() as u32;
            fixups.push(Fixup::group_abs_jump(seg, at, id));
            out.extend(std::iter::repeat(0u8).take(width));
        }
        None => out.extend(std::iter::repeat(0u8).take(width)),
    }
}

fn encode_branch(
    state: &mut State,
    ifile: &mut Ifile,
    seg: SegNo,
    base_offset: u32,
    size: u32,
    token: Token,
    operands: &[Operand],
    out: &mut Vec<u8>,
    fixups: &mut Vec<Fixup>,
) {
    if token == Token::Jmp && size == 3 {
        out.push(0xE9);
        encode_rel(state, ifile, seg, base_offset, size, out, operands, 2, fixups);
        return;
    }
    if token == Token::Jmp {
        out.push(0xEB);
        encode_rel(state, ifile, seg, base_offset, size, out, operands, 1, fixups);
        return;
    }
    if token == Token::Call {
        out.push(0xE8);
        encode_rel(state, ifile, seg, base_offset, size, out, operands, 2, fixups);
        return;
    }

    let classes: Vec<_> = operands
        .iter()
        .enumerate()
        .map(|(i, op)| operand::classify(op, state, &mut ifile.symtab, i == 0))
        .collect();
    match instable::find_instruc(token, &classes, state.cpu) {
        Some(row) => out.push(row.opcode1),
        None => {
            state.error(format!("no branch encoding for {token:?}"));
            out.push(0x90);
        }
    }
    encode_rel(state, ifile, seg, base_offset, size, out, operands, 1, fixups);
}

fn encode_instruction(
    state: &mut State,
    ifile: &mut Ifile,
    seg: SegNo,
    base_offset: u32,
    size: u32,
    token: Token,
    prefix: Option<Token>,
    operands: &[Operand],
    fixups: &mut Vec<Fixup>,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(size as usize);

    if let Some(p) = prefix {
        if let Some(byte) = instable::repeat_prefix_byte(p) {
            out.push(byte);
        }
    }
    if token != Token::Lea {
        if let Some(mem) = operands.iter().find_map(|op| match op {
            Operand::Mem(m) => Some(m),
            _ => None,
        }) {
            if let Ok(Some(sreg)) = sizing::mem_segment_override(mem, state, &mut ifile.symtab, &ifile.segtab) {
                out.push(sreg_prefix_byte(sreg));
            }
        }
    }

    if pass1::is_jump_token(token) && matches!(operands.first(), Some(Operand::Expr(_))) {
        encode_branch(state, ifile, seg, base_offset, size, token, operands, &mut out, fixups);
        return out;
    }

    let classes: Vec<_> = operands.iter().map(|op| operand::classify(op, state, &mut ifile.symtab, false)).collect();
    let row = match instable::find_instruc(token, &classes, state.cpu) {
        Some(r) => r,
        None => {
            state.error(format!("no encoding of {token:?} matches these operands at encoding time"));
            return vec![0u8; size as usize];
        }
    };

    for _ in 0..sizing::wait_bytes(row.wait) {
        out.push(0x9B);
    }

    let opcode1 = row.opcode1.wrapping_add(match row.opcode_inc {
        OpcodeInc::None => 0,
        OpcodeInc::Op1Reg => opcode_inc_register(row, operands),
    });
    out.push(opcode1);

    match row.modrm {
        ModrmCategory::None => {}
        ModrmCategory::Rmn | ModrmCategory::Rmc => {
            encode_rm_byte(&mut out, row.reg, &operands[0], seg, base_offset, state, &mut ifile.symtab, &ifile.segtab, fixups);
        }
        ModrmCategory::Rrm | ModrmCategory::Mmc => {
            let reg_field = register_number(&operands[0]);
            encode_rm_byte(&mut out, reg_field, &operands[1], seg, base_offset, state, &mut ifile.symtab, &ifile.segtab, fixups);
        }
        ModrmCategory::Rmr => {
            let reg_field = register_number(&operands[1]);
            encode_rm_byte(&mut out, reg_field, &operands[0], seg, base_offset, state, &mut ifile.symtab, &ifile.segtab, fixups);
        }
        ModrmCategory::Reg => {
            let n = register_number(&operands[0]);
            out.push(0xC0 | (n << 3) | n);
        }
        ModrmCategory::Ssi | ModrmCategory::Sis | ModrmCategory::Ssc | ModrmCategory::Sic | ModrmCategory::Stc | ModrmCategory::Stk | ModrmCategory::Ccc => {
            out.push(row.opcode2.wrapping_add(sti_index_of(operands)));
        }
    }

    // `row.imm` lists immediate widths in emission order, independent of
    // which operand slot the table row put the `Imm`-typed requirement in
    // (e.g. `MOV rm16, imm16`'s immediate is `oper[1]` but `imm[0]`). Every
    // row in this table carries at most one immediate, so the first
    // non-`None` entry pairs with the row's sole `Imm`-typed slot.
    if let Some(width) = row.imm.iter().find_map(|i| match i {
        ImmSize::None => None,
        ImmSize::Imm8 => Some(1usize),
        ImmSize::Imm16 => Some(2usize),
    }) {
        match row.oper.iter().position(|o| o.0 == crate::asm::opclass::OperandType::Imm) {
            Some(slot) => match &operands[slot] {
                Operand::Expr(ast) => emit_value_bytes(ast, width, seg, base_offset, state, &mut ifile.symtab, &mut out, fixups),
                _ => state.error("immediate operand slot did not receive an expression"),
            },
            None => state.error("instruction row declares an immediate width but no Imm-typed operand slot"),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::pass0;
    use crate::asm::source::MainSource;
    use crate::asm::{resize as resize_pass, pass1 as pass1_pass};

    fn assemble(src: &str) -> ObjFile {
        let mut state = State::new("t.asm", 200);
        let mut ifile = Ifile::new(false);
        let main = MainSource::new("t.asm", src);
        pass0::run(&mut state, &mut ifile, &main).expect("pass0");
        pass1_pass::run(&mut state, &mut ifile).expect("pass1");
        resize_pass::run(&mut state, &mut ifile).expect("resize");
        run(&mut state, &mut ifile, "T").expect("encode")
    }

    fn only_ledata(obj: &ObjFile) -> &[u8] {
        obj.records
            .iter()
            .find_map(|r| match r {
                ObjRecord::LeData { bytes, .. } => Some(bytes.as_slice()),
                _ => None,
            })
            .expect("expected exactly one LEDATA record")
    }

    #[test]
    fn mov_ax_immediate_encodes_b8() {
        let obj = assemble("CODE SEGMENT\nMOV AX, 1234h\nCODE ENDS\nEND\n");
        assert_eq!(only_ledata(&obj), &[0xB8, 0x34, 0x12]);
    }

    #[test]
    fn xor_register_register_encodes_33c9() {
        let obj = assemble("CODE SEGMENT\nXOR CX, CX\nCODE ENDS\nEND\n");
        assert_eq!(only_ledata(&obj), &[0x33, 0xC9]);
    }

    #[test]
    fn mov_byte_indexed_memory_immediate() {
        let obj = assemble("CODE SEGMENT\nMOV BYTE PTR [BX+SI+5], 7\nCODE ENDS\nEND\n");
        assert_eq!(only_ledata(&obj), &[0xC6, 0x40, 0x05, 0x07]);
    }

    #[test]
    fn self_referential_jmp_encodes_eb_fe() {
        let obj = assemble("CODE SEGMENT\nHERE: JMP HERE\nCODE ENDS\nEND\n");
        assert_eq!(only_ledata(&obj), &[0xEB, 0xFE]);
    }

    #[test]
    fn dup_of_string_and_byte_emits_nine_bytes() {
        let obj = assemble("CODE SEGMENT\nDB 3 DUP ('AB', 0)\nCODE ENDS\nEND\n");
        let bytes = only_ledata(&obj);
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes, b"AB\0AB\0AB\0");
    }

    #[test]
    fn public_label_produces_a_pubdef_record() {
        let obj = assemble("CODE SEGMENT\nPUBLIC ENTRY\nENTRY: MOV AX, 1\nCODE ENDS\nEND ENTRY\n");
        assert!(obj.records.iter().any(|r| matches!(r, ObjRecord::PubDef { name, .. } if name == "ENTRY")));
        assert!(matches!(obj.records.last(), Some(ObjRecord::ModEnd { start: Some(_) })));
    }
}
