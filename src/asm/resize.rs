//! Resize: the fixed-point re-sizing loop (spec §4.7).
//!
//! Jump-family instructions were sized optimistically short by pass 1.
//! Each iteration re-measures every record against the offsets the
//! *previous* iteration produced; `JMP` widens to its near encoding in
//! place when a target falls out of `rel8` range, while the Jcc/LOOP
//! family — which have no near encoding on the 8086 — get rewritten into
//! a reverse-condition short jump over an injected near `JMP`. The loop
//! repeats until one full pass makes no further change, or the iteration
//! cap (bounded by the record count) is hit, at which point convergence
//! has genuinely failed rather than just being slow.

use crate::asm::error::AssemblerError;
use crate::asm::expr::{self, Ast, ExprType, Value};
use crate::asm::ifile::{Ifile, Irec, IrecKind};
use crate::asm::operand::Operand;
use crate::asm::pass1;
use crate::asm::segment::SegNo;
use crate::asm::state::State;
use crate::asm::symbol::Symbol;
use crate::asm::token::Token;

enum SizeOutcome {
    Size(u32),
    Expand { reversed: Token, target: Ast },
}

/// A branch target resolved to either a same-segment offset (sized as an
/// ordinary `rel8`/`rel16` displacement) or a label living in a different
/// segment of the same group, which only the linker can place — those
/// encode as a `GROUP_ABSOLUTE_JUMP` fixup instead of a computed delta.
pub(crate) enum JumpTarget {
    Local(u32),
    CrossSegment(crate::asm::symbol::SymbolId),
}

fn same_group(segtab: &crate::asm::segment::SegmentTable, a: SegNo, b: SegNo) -> bool {
    let ga = segtab.segment(a).group;
    ga.is_some() && ga == segtab.segment(b).group
}

/// Resolve a branch operand to its target. Shared with the encoding pass,
/// which re-resolves the same targets once sizes have stabilised rather
/// than threading them through as side data.
pub(crate) fn jump_target_offset(state: &mut State, ifile: &mut Ifile, seg: SegNo, ast: &Ast) -> Option<JumpTarget> {
    let ty = expr::expr_type(state, &mut ifile.symtab, ast);
    if ty != ExprType::Rel {
        state.error("branch target must be a relocatable label");
        return None;
    }
    match expr::eval(state, &mut ifile.symtab, ast) {
        Ok((_, Value::Label(id))) => match ifile.symtab.get(id).clone() {
            Symbol::Relative { seg: Some(s), offset, .. } if s == seg => Some(JumpTarget::Local(offset)),
            Symbol::Relative { seg: Some(s), .. } => {
                if same_group(&ifile.segtab, seg, s) {
                    Some(JumpTarget::CrossSegment(id))
                } else {
                    state.error("branch target is in a different segment; use a far jump");
                    None
                }
            }
            _ => {
                state.error("branch target label is undefined");
                None
            }
        },
        _ => None,
    }
}

/// Size a jump-family instruction at `pc`, or request it be expanded.
/// `CALL` is always near (fixed 3 bytes, no range to overflow); `JMP`
/// widens in place; everything else is short-only.
fn size_jump(state: &mut State, ifile: &mut Ifile, seg: SegNo, pc: u32, token: Token, operands: &[Operand]) -> SizeOutcome {
    if token == Token::Call {
        return SizeOutcome::Size(3);
    }

    let ast = match operands.first() {
        Some(Operand::Expr(a)) => a.clone(),
        _ => {
            state.error("branch operand must be a label expression");
            return SizeOutcome::Size(2);
        }
    };

    let target = match jump_target_offset(state, ifile, seg, &ast) {
        Some(JumpTarget::Local(t)) => t,
        Some(JumpTarget::CrossSegment(_)) if token == Token::Jmp => return SizeOutcome::Size(3),
        Some(JumpTarget::CrossSegment(_)) => {
            state.error("conditional branch cannot cross segments; use JMP through the group");
            return SizeOutcome::Size(2);
        }
        None => return SizeOutcome::Size(2),
    };

    if token == Token::Jmp {
        let delta = target as i64 - (pc as i64 + 2);
        return SizeOutcome::Size(if (-128..=127).contains(&delta) { 2 } else { 3 });
    }

    let delta = target as i64 - (pc as i64 + 2);
    if (-128..=127).contains(&delta) {
        return SizeOutcome::Size(2);
    }
    match token.reverse_jcc() {
        Some(reversed) => SizeOutcome::Expand { reversed, target: ast },
        None => {
            // LOOP/LOOPE/LOOPZ/LOOPNE/LOOPNZ/JCXZ have no table-defined
            // reverse form; expanding them needs a different idiom this
            // assembler does not implement, so the out-of-range branch is
            // reported instead of silently mis-sized.
            state.error("branch target out of short-jump range for an instruction with no wide form");
            SizeOutcome::Size(2)
        }
    }
}

/// Replace the record at `idx` with the reverse-condition short jump,
/// followed by an injected near `JMP` to the real target, followed by a
/// label marking the landing point the short jump actually branches to.
fn apply_expansion(ifile: &mut Ifile, idx: usize, seg: SegNo, reversed: Token, target: Ast) {
    let local_name = ifile.gensym_local();
    let local_id = ifile.symtab.insert_unknown(&local_name);
    ifile.symtab.init_relative(local_id);

    let loc = ifile.records[idx].loc.clone();
    let original_label = ifile.records[idx].label;

    let mut reversed_rec = Irec::new(loc.clone(), IrecKind::Instruction {
        token: reversed,
        prefix: None,
        operands: vec![Operand::Expr(Ast::Label(local_id))],
    });
    reversed_rec.seg = Some(seg);
    reversed_rec.label = original_label;
    ifile.records[idx] = reversed_rec;

    let mut jmp_rec = Irec::new(loc.clone(), IrecKind::Instruction {
        token: Token::Jmp,
        prefix: None,
        operands: vec![Operand::Expr(target)],
    });
    jmp_rec.seg = Some(seg);

    let mut label_rec = Irec::new(loc, IrecKind::Empty).with_label(local_id);
    label_rec.seg = Some(seg);

    ifile.records.insert(idx + 1, jmp_rec);
    ifile.records.insert(idx + 2, label_rec);
}

pub fn run(state: &mut State, ifile: &mut Ifile) -> Result<(), AssemblerError> {
    debug_assert!(ifile.provisional_sizes, "resize must run after pass 1");

    let cap = ifile.records.len() * 2 + 16;
    for _iteration in 0..cap {
        state.reset_for_pass();
        ifile.segtab.reset_pcs();
        let mut changed = false;
        let mut idx = 0;
        let mut expanded = false;

        while idx < ifile.records.len() {
            let seg = match ifile.records[idx].seg {
                Some(s) => s,
                None => {
                    idx += 1;
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

            pass1::pin_dollar(ifile, seg, pc);

            let kind = ifile.records[idx].kind.clone();
            let outcome = match &kind {
                IrecKind::Instruction { token, operands, .. } if pass1::is_jump_token(*token) => size_jump(state, ifile, seg, pc, *token, operands),
                _ => SizeOutcome::Size(pass1::size_record(state, ifile, idx, seg, pc)),
            };

            match outcome {
                SizeOutcome::Expand { reversed, target } => {
                    apply_expansion(ifile, idx, seg, reversed, target);
                    changed = true;
                    expanded = true;
                    break;
                }
                SizeOutcome::Size(size) => {
                    if ifile.records[idx].size != size {
                        changed = true;
                    }
                    ifile.records[idx].offset = pc;
                    ifile.records[idx].size = size;
                    ifile.segtab.segment_mut(seg).pc = pc + size;
                    idx += 1;
                }
            }
        }

        if expanded {
            continue;
        }
        if !changed {
            let undefined = ifile.symtab.undefined();
            if !undefined.is_empty() {
                return Err(AssemblerError::UndefinedSymbols(undefined.join(", ")));
            }
            if state.diagnostics.count() > 0 {
                return Err(AssemblerError::TooManyErrors(state.diagnostics.count()));
            }
            return Ok(());
        }
    }

    Err(AssemblerError::ResizeDidNotConverge(cap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::source::MainSource;

    fn assemble(src: &str) -> (State, Ifile) {
        let mut state = State::new("t.asm", 200);
        let mut ifile = Ifile::new(false);
        let main = MainSource::new("t.asm", src);
        crate::asm::pass0::run(&mut state, &mut ifile, &main).ok();
        pass1::run(&mut state, &mut ifile).ok();
        let _ = run(&mut state, &mut ifile);
        (state, ifile)
    }

    #[test]
    fn self_referential_jmp_stabilises_to_two_bytes() {
        let (state, ifile) = assemble("CODE SEGMENT\nHERE: JMP HERE\nCODE ENDS\nEND\n");
        assert_eq!(state.diagnostics.count(), 0);
        let rec = ifile.records.iter().find(|r| matches!(r.kind, IrecKind::Instruction { token: Token::Jmp, .. })).unwrap();
        assert_eq!(rec.size, 2);
    }

    #[test]
    fn short_jcc_within_range_does_not_expand() {
        let (state, ifile) = assemble("CODE SEGMENT\nJE NEARBY\nMOV AX, 1\nNEARBY: MOV BX, 2\nCODE ENDS\nEND\n");
        assert_eq!(state.diagnostics.count(), 0);
        let jcc_count = ifile.records.iter().filter(|r| matches!(r.kind, IrecKind::Instruction { token: Token::Je, .. })).count();
        assert_eq!(jcc_count, 1);
    }

    #[test]
    fn jmp_into_a_different_segment_of_the_same_group_sizes_as_a_near_jump() {
        let src = "SEG_A SEGMENT\nJMP TARGET\nSEG_A ENDS\nSEG_B SEGMENT\nTARGET: MOV AX, 1\nSEG_B ENDS\nGROUP1 GROUP SEG_A, SEG_B\nEND\n";
        let (state, ifile) = assemble(src);
        assert_eq!(state.diagnostics.count(), 0);
        let rec = ifile.records.iter().find(|r| matches!(r.kind, IrecKind::Instruction { token: Token::Jmp, .. })).unwrap();
        assert_eq!(rec.size, 3);
    }

    #[test]
    fn out_of_range_jcc_expands_into_reverse_branch_and_jmp() {
        let mut src = String::from("CODE SEGMENT\nJE FAR_TARGET\n");
        for _ in 0..100 {
            src.push_str("MOV AX, 1\n");
        }
        src.push_str("FAR_TARGET: MOV BX, 2\nCODE ENDS\nEND\n");
        let (state, ifile) = assemble(&src);
        assert_eq!(state.diagnostics.count(), 0);
        assert!(ifile.records.iter().any(|r| matches!(&r.kind, IrecKind::Instruction { token: Token::Jne, .. })));
        assert!(ifile.records.iter().any(|r| matches!(&r.kind, IrecKind::Instruction { token: Token::Jmp, .. })));
    }
}
