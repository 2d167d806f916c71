//! Pass 1: label definition and provisional sizing (spec §4.5).
//!
//! Walks `ifile.records` in source order, assigning every label its
//! segment-relative offset and every record a first-guess size. Jump
//! operands are sized optimistically short (1-byte `rel8`); `resize`
//! grows them — and, for the Jcc/LOOP family that have no near
//! encoding, injects a jump-around — once an actual distance is known.

use crate::asm::error::AssemblerError;
use crate::asm::expr::{self, ExprType};
use crate::asm::ifile::{AssumeTarget, Ifile, IrecKind};
use crate::asm::instable;
use crate::asm::operand::{self, Operand};
use crate::asm::segment::SegNo;
use crate::asm::sizing;
use crate::asm::state::{Assumed, State};
use crate::asm::token::Token;

/// True for opcodes whose first operand is a branch target rather than
/// an ordinary immediate/register/memory value.
pub(crate) fn is_jump_token(token: Token) -> bool {
    token.is_conditional_jump()
        || matches!(
            token,
            Token::Jmp | Token::Call | Token::Loop | Token::Loope | Token::Loopz | Token::Loopne | Token::Loopnz | Token::Jcxz
        )
}

/// Point the well-known `$` symbol at the current location so any
/// expression in this record that references it sees this record's own
/// start address, the way the reference's `$` resolves against whichever
/// IREC is currently being sized.
pub(crate) fn pin_dollar(ifile: &mut Ifile, seg: SegNo, pc: u32) {
    let id = ifile.symtab.insert_unknown("$");
    ifile.symtab.init_relative(id);
    let _ = ifile.symtab.define_relative(id, seg, pc);
}

/// Size (and, for instructions, validate) one record against the current
/// program counter. Returns the record's byte size; `None` means a
/// diagnostic was recorded and the record contributes zero bytes.
pub(crate) fn size_record(state: &mut State, ifile: &mut Ifile, idx: usize, seg: SegNo, pc: u32) -> u32 {
    pin_dollar(ifile, seg, pc);

    match &ifile.records[idx].kind.clone() {
        IrecKind::Empty | IrecKind::Equ { .. } => 0,

        IrecKind::Align { p2 } => {
            let boundary = 1u32 << p2;
            (boundary - (pc % boundary)) % boundary
        }

        IrecKind::Org { ast } => {
            let ty = expr::expr_type(state, &mut ifile.symtab, ast);
            if ty != ExprType::Abs {
                state.error("ORG target must be a constant expression");
                return 0;
            }
            match expr::eval(state, &mut ifile.symtab, ast) {
                Ok((t, v)) => match expr::make_absolute(t, &v) {
                    Some(target) if target >= 0 && target as u32 >= pc => target as u32 - pc,
                    Some(_) => {
                        state.error("ORG cannot move the location counter backward");
                        0
                    }
                    None => {
                        state.error("ORG target did not evaluate to a constant");
                        0
                    }
                },
                Err(()) => 0,
            }
        }

        IrecKind::Data { nodes } => nodes
            .iter()
            .map(|n| match n.size(state, &mut ifile.symtab) {
                Ok(n) => n,
                Err(e) => {
                    state.error(e.0);
                    0
                }
            })
            .sum(),

        IrecKind::Instruction { token, prefix, operands } => size_instruction(state, ifile, *token, *prefix, operands),

        IrecKind::Assume { clauses } => {
            apply_assume(state, ifile, clauses);
            0
        }
    }
}

/// Bind each clause's segment register in `state.assume`, the table
/// `sizing::mem_segment_override` and the encoder's own copy both consult
/// to decide whether a memory operand needs an override prefix.
pub(crate) fn apply_assume(state: &mut State, ifile: &mut Ifile, clauses: &[(crate::asm::token::Sreg, AssumeTarget)]) {
    for (sreg, target) in clauses {
        let assumed = match target {
            AssumeTarget::Nothing => Assumed::Nothing,
            AssumeTarget::Name(name) => {
                if let Some(seg) = ifile.segtab.find_segment(name) {
                    Assumed::Segment(seg)
                } else if let Some(group) = ifile.segtab.find_group(name) {
                    Assumed::Group(group)
                } else {
                    state.error(format!("ASSUME: unknown segment or group '{name}'"));
                    continue;
                }
            }
        };
        state.assume[sreg.index()] = assumed;
    }
}

fn size_instruction(state: &mut State, ifile: &mut Ifile, token: Token, prefix: Option<Token>, operands: &[Operand]) -> u32 {
    if let Some(p) = prefix {
        if !instable::repeat_prefix_valid_for(p, token) {
            state.error("repeat prefix not valid for this opcode");
            return 0;
        }
    }

    let jump_ctx = is_jump_token(token);
    let classes: Vec<_> = operands
        .iter()
        .enumerate()
        .map(|(i, op)| operand::classify(op, state, &mut ifile.symtab, jump_ctx && i == 0))
        .collect();

    match instable::find_instruc(token, &classes, state.cpu) {
        Some(row) => sizing::instruction_size(row, operands, prefix, state, &mut ifile.symtab, &ifile.segtab),
        None => {
            state.error(format!("no encoding of {token:?} matches these operands"));
            0
        }
    }
}

pub fn run(state: &mut State, ifile: &mut Ifile) -> Result<(), AssemblerError> {
    state.reset_for_pass();
    ifile.segtab.reset_pcs();

    for idx in 0..ifile.records.len() {
        let seg = match ifile.records[idx].seg {
            Some(s) => s,
            None => {
                // A record outside any SEGMENT/ENDS block (stray EQU,
                // mode directive, or a malformed line pass 0 already
                // flagged) carries no address; it is not re-sized here.
                if let Some(label) = ifile.records[idx].label {
                    if let IrecKind::Equ { ast } = ifile.records[idx].kind.clone() {
                        define_equ(state, ifile, Some(label), &ast);
                    }
                }
                continue;
            }
        };
        state.curseg = Some(seg);

        let pc = ifile.segtab.segment(seg).pc;
        if let Some(label) = ifile.records[idx].label {
            if let Err(msg) = ifile.symtab.define_relative(label, seg, pc) {
                state.error(msg);
            }
        }
        if let IrecKind::Equ { ast } = ifile.records[idx].kind.clone() {
            define_equ(state, ifile, ifile.records[idx].label, &ast);
        }

        let size = size_record(state, ifile, idx, seg, pc);
        ifile.records[idx].offset = pc;
        ifile.records[idx].size = size;
        ifile.segtab.segment_mut(seg).pc = pc + size;
    }

    ifile.provisional_sizes = true;

    let undefined = ifile.symtab.undefined();
    if !undefined.is_empty() {
        return Err(AssemblerError::UndefinedSymbols(undefined.join(", ")));
    }
    if state.diagnostics.count() > 0 {
        return Err(AssemblerError::TooManyErrors(state.diagnostics.count()));
    }
    Ok(())
}

fn define_equ(state: &mut State, ifile: &mut Ifile, label: Option<crate::asm::symbol::SymbolId>, ast: &crate::asm::expr::Ast) {
    let Some(label) = label else {
        state.error("EQU requires a name");
        return;
    };
    let ty = expr::expr_type(state, &mut ifile.symtab, ast);
    if ty != ExprType::Abs {
        state.error("EQU value must be a constant expression");
        return;
    }
    match expr::eval(state, &mut ifile.symtab, ast) {
        Ok((t, v)) => match expr::make_absolute(t, &v) {
            Some(n) => {
                let name = ifile.symtab.get(label).name().to_owned();
                ifile.symtab.insert_absolute(&name, n);
            }
            None => state.error("EQU value did not evaluate to a constant"),
        },
        Err(()) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::source::MainSource;

    fn assemble_pass1(src: &str) -> (State, Ifile) {
        let mut state = State::new("t.asm", 200);
        let mut ifile = Ifile::new(false);
        let main = MainSource::new("t.asm", src);
        crate::asm::pass0::run(&mut state, &mut ifile, &main).ok();
        let _ = run(&mut state, &mut ifile);
        (state, ifile)
    }

    #[test]
    fn mov_ax_immediate_sizes_to_three_bytes() {
        let (state, ifile) = assemble_pass1("CODE SEGMENT\nMOV AX, 1234h\nCODE ENDS\nEND\n");
        assert_eq!(state.diagnostics.count(), 0);
        let rec = ifile.records.iter().find(|r| matches!(r.kind, IrecKind::Instruction { .. })).unwrap();
        assert_eq!(rec.size, 3);
    }

    #[test]
    fn label_offset_follows_preceding_instruction_sizes() {
        let (state, ifile) = assemble_pass1("CODE SEGMENT\nMOV AX, 1234h\nHERE: MOV BX, 1\nCODE ENDS\nEND\n");
        assert_eq!(state.diagnostics.count(), 0);
        let id = ifile.symtab.lookup("HERE").unwrap();
        match ifile.symtab.get(id) {
            crate::asm::symbol::Symbol::Relative { offset, .. } => assert_eq!(*offset, 3),
            other => panic!("expected a relative symbol, got {other:?}"),
        }
    }

    #[test]
    fn align_pads_to_the_next_boundary() {
        let (state, ifile) = assemble_pass1("CODE SEGMENT\nDB 1\nALIGN 4\nMOV AX, 1\nCODE ENDS\nEND\n");
        assert_eq!(state.diagnostics.count(), 0);
        let align_rec = ifile.records.iter().find(|r| matches!(r.kind, IrecKind::Align { .. })).unwrap();
        assert_eq!(align_rec.size, 3);
    }

    #[test]
    fn equ_defines_an_absolute_symbol() {
        let (state, ifile) = assemble_pass1("FIVE EQU 5\nCODE SEGMENT\nMOV AX, FIVE\nCODE ENDS\nEND\n");
        assert_eq!(state.diagnostics.count(), 0);
        let id = ifile.symtab.lookup("FIVE").unwrap();
        match ifile.symtab.get(id) {
            crate::asm::symbol::Symbol::Absolute { value, .. } => assert_eq!(*value, 5),
            other => panic!("expected an absolute symbol, got {other:?}"),
        }
    }
}
