//! Expression AST, typing, and evaluation.
//!
//! Typing and evaluation are deliberately two separate walks over the
//! same tree (spec §4.2): `expr_type` never touches a `Value`, and
//! `eval` never decides a type on its own — it trusts the shape the
//! typing pass already proved, asserting rather than re-deriving it,
//! the same division of labour the reference keeps between
//! `expr_type`/`eval`.

use crate::asm::segment::{GroupNo, SegNo};
use crate::asm::state::State;
use crate::asm::symbol::{SectionKind, SymbolId, SymbolTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentOp {
    Seg,
    Offset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    Num(i64),
    Str(String),
    Undef,
    Label(SymbolId),
    Binary(BinOp, Box<Ast>, Box<Ast>),
    Unary(Box<Ast>),
    Component(ComponentOp, SymbolId),
}

/// Expression type tags, `ET_*` in the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprType {
    Err,
    Undef,
    Abs,
    Rel,
    RelDiff,
    Str,
    Sec,
    Seg,
    Offset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(i64),
    Label(SymbolId),
    Str(String),
}

impl Value {
    pub fn as_num(&self) -> i64 {
        match self {
            Value::Num(n) => *n,
            _ => panic!("expression evaluation produced a non-numeric value where one was typed as numeric"),
        }
    }

    pub fn as_label(&self) -> SymbolId {
        match self {
            Value::Label(id) => *id,
            _ => panic!("expression evaluation produced a non-label value where one was typed as a label"),
        }
    }
}

/// Resolve `sym`'s defined position, required for `REL_DIFF` arithmetic.
fn relative_offset(symtab: &SymbolTable, id: SymbolId) -> Option<i64> {
    match symtab.get(id) {
        crate::asm::symbol::Symbol::Relative { seg: Some(_), offset, .. } => Some(*offset as i64),
        _ => None,
    }
}

pub fn expr_type(state: &mut State, symtab: &mut SymbolTable, ast: &Ast) -> ExprType {
    match ast {
        Ast::Num(_) => ExprType::Abs,
        Ast::Str(_) => ExprType::Str,
        Ast::Undef => ExprType::Undef,
        Ast::Label(id) => label_type(state, symtab, *id),
        Ast::Component(op, id) => component_type(state, symtab, *op, *id),
        Ast::Unary(inner) => {
            let t = expr_type(state, symtab, inner);
            if t == ExprType::Err {
                return ExprType::Err;
            }
            if t != ExprType::Abs {
                state.diagnostics.error(&state.loc(), "invalid unary minus");
                return ExprType::Err;
            }
            ExprType::Abs
        }
        Ast::Binary(op, lhs, rhs) => binary_type(state, symtab, *op, lhs, rhs),
    }
}

fn label_type(state: &mut State, symtab: &mut SymbolTable, id: SymbolId) -> ExprType {
    if matches!(symtab.get(id), crate::asm::symbol::Symbol::Unknown { .. }) {
        symtab.init_relative(id);
    }
    match symtab.get(id) {
        crate::asm::symbol::Symbol::Absolute { .. } => ExprType::Abs,
        crate::asm::symbol::Symbol::Relative { .. } => ExprType::Rel,
        crate::asm::symbol::Symbol::Section { .. } => ExprType::Sec,
        crate::asm::symbol::Symbol::Unknown { .. } => unreachable!("init_relative always promotes"),
    }
}

/// `SEG`/`OFFSET` only make sense against a relocatable label; referencing
/// an unknown symbol here implicitly initialises it to relative, same as
/// a bare label reference does in `label_type`.
fn component_type(state: &mut State, symtab: &mut SymbolTable, op: ComponentOp, id: SymbolId) -> ExprType {
    if matches!(symtab.get(id), crate::asm::symbol::Symbol::Unknown { .. }) {
        symtab.init_relative(id);
    }
    if !matches!(symtab.get(id), crate::asm::symbol::Symbol::Relative { .. }) {
        state.diagnostics.error(&state.loc(), "SEG/OFFSET operand must reference a relocatable label");
        return ExprType::Err;
    }
    match op {
        ComponentOp::Seg => ExprType::Seg,
        ComponentOp::Offset => ExprType::Offset,
    }
}

fn binary_type(state: &mut State, symtab: &mut SymbolTable, op: BinOp, lhs: &Ast, rhs: &Ast) -> ExprType {
    let t1 = expr_type(state, symtab, lhs);
    if t1 == ExprType::Err {
        return ExprType::Err;
    }
    let t2 = expr_type(state, symtab, rhs);
    if t2 == ExprType::Err {
        return ExprType::Err;
    }
    if t1 == ExprType::Abs && t2 == ExprType::Abs {
        return ExprType::Abs;
    }
    if t1 == ExprType::Rel && t2 == ExprType::Rel && op == BinOp::Sub {
        return ExprType::RelDiff;
    }
    if t1 == ExprType::Abs && t2 == ExprType::RelDiff && op == BinOp::Sub {
        return ExprType::RelDiff;
    }
    state.diagnostics.error(&state.loc(), "invalid expression");
    ExprType::Err
}

pub fn eval(state: &mut State, symtab: &mut SymbolTable, ast: &Ast) -> Result<(ExprType, Value), ()> {
    match ast {
        Ast::Num(n) => Ok((ExprType::Abs, Value::Num(*n))),
        Ast::Str(s) => {
            if s.len() > 128 {
                state.diagnostics.error(&state.loc(), "string too long");
                return Err(());
            }
            Ok((ExprType::Str, Value::Str(s.clone())))
        }
        Ast::Undef => Ok((ExprType::Undef, Value::Num(0))),
        Ast::Label(id) => eval_label(state, symtab, *id),
        Ast::Component(op, id) => {
            if matches!(symtab.get(*id), crate::asm::symbol::Symbol::Unknown { .. }) {
                symtab.init_relative(*id);
            }
            if !matches!(symtab.get(*id), crate::asm::symbol::Symbol::Relative { .. }) {
                state.diagnostics.error(&state.loc(), "SEG/OFFSET operand must reference a relocatable label");
                return Err(());
            }
            let ty = match op {
                ComponentOp::Seg => ExprType::Seg,
                ComponentOp::Offset => ExprType::Offset,
            };
            Ok((ty, Value::Label(*id)))
        }
        Ast::Unary(inner) => {
            let (t, v) = eval(state, symtab, inner)?;
            debug_assert_eq!(t, ExprType::Abs);
            Ok((ExprType::Abs, Value::Num(-v.as_num())))
        }
        Ast::Binary(op, lhs, rhs) => eval_binary(state, symtab, *op, lhs, rhs),
    }
}

fn eval_label(state: &mut State, symtab: &mut SymbolTable, id: SymbolId) -> Result<(ExprType, Value), ()> {
    if matches!(symtab.get(id), crate::asm::symbol::Symbol::Unknown { .. }) {
        symtab.init_relative(id);
    }
    match symtab.get(id).clone() {
        crate::asm::symbol::Symbol::Absolute { value, .. } => Ok((ExprType::Abs, Value::Num(value))),
        crate::asm::symbol::Symbol::Relative { .. } => Ok((ExprType::Rel, Value::Label(id))),
        crate::asm::symbol::Symbol::Section { .. } => Ok((ExprType::Sec, Value::Label(id))),
        crate::asm::symbol::Symbol::Unknown { .. } => unreachable!(),
    }
}

fn eval_binary(
    state: &mut State,
    symtab: &mut SymbolTable,
    op: BinOp,
    lhs: &Ast,
    rhs: &Ast,
) -> Result<(ExprType, Value), ()> {
    let (t1, v1) = eval(state, symtab, lhs)?;
    let (t2, v2) = eval(state, symtab, rhs)?;

    if t1 == ExprType::Rel && t2 == ExprType::Rel && op == BinOp::Sub {
        let a = relative_offset(symtab, v1.as_label());
        let b = relative_offset(symtab, v2.as_label());
        return match (a, b) {
            (Some(a), Some(b)) => Ok((ExprType::RelDiff, Value::Num(a - b))),
            _ => {
                state.diagnostics.error(&state.loc(), "undefined labels in difference expression");
                Err(())
            }
        };
    }
    if t1 == ExprType::Abs && t2 == ExprType::RelDiff && op == BinOp::Sub {
        return Ok((ExprType::RelDiff, Value::Num(v1.as_num() - v2.as_num())));
    }

    debug_assert_eq!(t1, ExprType::Abs);
    debug_assert_eq!(t2, ExprType::Abs);
    let n = match op {
        BinOp::Add => v1.as_num().wrapping_add(v2.as_num()),
        BinOp::Sub => v1.as_num().wrapping_sub(v2.as_num()),
        BinOp::Mul => v1.as_num().wrapping_mul(v2.as_num()),
    };
    Ok((ExprType::Abs, Value::Num(n)))
}

/// A one-byte `STR` collapses to its ordinal; otherwise only `ABS` is
/// absolute. Used wherever a size field needs a numeric literal (e.g.
/// `ALIGN`, `DUP` counts).
pub fn make_absolute(ty: ExprType, val: &Value) -> Option<i64> {
    match (ty, val) {
        (ExprType::Str, Value::Str(s)) if s.len() == 1 => Some(s.as_bytes()[0] as i64),
        (ExprType::Abs, Value::Num(n)) => Some(*n),
        _ => None,
    }
}

/// Which section kind a `Symbol::Section` carries, for `SEG`/`SECTION`
/// operand classification.
pub fn section_kind(symtab: &SymbolTable, id: SymbolId) -> Option<(SectionKind, SegNo, GroupNo)> {
    // Sections are addressed either by SegNo or GroupNo depending on
    // `SectionKind`; callers match on `SectionKind` before using the
    // irrelevant half of the returned pair. This helper exists mainly to
    // keep `operand.rs` from matching on `Symbol` directly.
    match symtab.get(id) {
        crate::asm::symbol::Symbol::Section { kind, ordinal, .. } => Some((
            *kind,
            SegNo(*ordinal as u8),
            GroupNo(*ordinal as u8),
        )),
        _ => None,
    }
}
