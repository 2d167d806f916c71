//! `DB`/`DW`/`DD`/`DQ`/`DT` data trees, including nested `DUP`.
//!
//! A `DataNode` tree is built once during the scanning pass (spec §4.1)
//! and re-measured every resize iteration; only the encoding pass
//! actually walks it to produce bytes, at which point every label it
//! references must be defined.

use crate::asm::expr::{self, Ast, ExprType};
use crate::asm::reloc::Fixup;
use crate::asm::segment::{GroupNo, SegNo};
use crate::asm::state::State;
use crate::asm::symbol::{SectionKind, Symbol, SymbolId, SymbolTable};

#[derive(Debug, Clone)]
pub enum DataNode {
    /// Raw bytes straight from a string literal (`DB 'hello'`).
    Str(Vec<u8>),
    /// A single scalar item of the directive's declared width
    /// (1/2/4/8/10 bytes for `DB`/`DW`/`DD`/`DQ`/`DT`).
    Item { width: u8, ast: Ast },
    /// `DB ?` / `DW ?` / ... — reserves space, never carries a fixup.
    Uninit { width: u8 },
    /// `count DUP (body)`, `count` itself a constant expression.
    Dup { count: Ast, body: Vec<DataNode> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataError(pub String);

/// Evaluate a `DUP` count: must type as `ABS`.
fn eval_constant_count(state: &mut State, symtab: &mut SymbolTable, ast: &Ast) -> Result<u32, DataError> {
    let ty = expr::expr_type(state, symtab, ast);
    if ty != ExprType::Abs {
        return Err(DataError("DUP count must be a constant expression".to_owned()));
    }
    let (ty, val) = expr::eval(state, symtab, ast).map_err(|_| DataError("could not evaluate DUP count".to_owned()))?;
    let n = expr::make_absolute(ty, &val).ok_or_else(|| DataError("DUP count is not constant".to_owned()))?;
    if n < 0 {
        return Err(DataError("DUP count cannot be negative".to_owned()));
    }
    Ok(n as u32)
}

impl DataNode {
    /// Total byte length, recursing through nested `DUP`. Needs
    /// mutable access to `state`/`symtab` only because resolving a
    /// `DUP` count may promote a forward-referenced symbol.
    pub fn size(&self, state: &mut State, symtab: &mut SymbolTable) -> Result<u32, DataError> {
        match self {
            DataNode::Str(bytes) => Ok(bytes.len() as u32),
            DataNode::Item { width, .. } => Ok(*width as u32),
            DataNode::Uninit { width } => Ok(*width as u32),
            DataNode::Dup { count, body } => {
                let n = eval_constant_count(state, symtab, count)?;
                let mut body_size = 0u32;
                for node in body {
                    body_size += node.size(state, symtab)?;
                }
                Ok(n * body_size)
            }
        }
    }

    /// Emit bytes, recording a `Fixup` at `base + <running offset>` for
    /// every item whose value is not a plain constant. `seg` is the
    /// segment the emitted bytes land in, needed to stamp each fixup.
    pub fn emit(
        &self,
        seg: SegNo,
        base: u32,
        state: &mut State,
        symtab: &mut SymbolTable,
        out: &mut Vec<u8>,
        fixups: &mut Vec<Fixup>,
    ) -> Result<(), DataError> {
        match self {
            DataNode::Str(bytes) => {
                out.extend_from_slice(bytes);
                Ok(())
            }
            DataNode::Uninit { width } => {
                out.extend(std::iter::repeat(0u8).take(*width as usize));
                Ok(())
            }
            DataNode::Item { width, ast } => emit_item(seg, base + out.len() as u32, *width, ast, state, symtab, out, fixups),
            DataNode::Dup { count, body } => {
                let n = eval_constant_count(state, symtab, count)?;
                for _ in 0..n {
                    for node in body {
                        node.emit(seg, base, state, symtab, out, fixups)?;
                    }
                }
                Ok(())
            }
        }
    }
}

fn emit_item(
    seg: SegNo,
    at: u32,
    width: u8,
    ast: &Ast,
    state: &mut State,
    symtab: &mut SymbolTable,
    out: &mut Vec<u8>,
    fixups: &mut Vec<Fixup>,
) -> Result<(), DataError> {
    let (ty, val) = expr::eval(state, symtab, ast).map_err(|_| DataError("undefined symbol in data item".to_owned()))?;

    if let Some(n) = expr::make_absolute(ty, &val) {
        out.extend_from_slice(&n.to_le_bytes()[..width as usize]);
        return Ok(());
    }

    match ty {
        ExprType::Rel => {
            if width != 2 {
                return Err(DataError("a relocatable label needs a 2-byte data item".to_owned()));
            }
            fixups.push(Fixup::offset(seg, at, val.as_label()));
            out.extend_from_slice(&0u16.to_le_bytes());
            Ok(())
        }
        ExprType::Seg => {
            if width != 2 {
                return Err(DataError("a SEG reference needs a 2-byte data item".to_owned()));
            }
            match seg_fixup(seg, at, val.as_label(), symtab) {
                Some(fx) => fixups.push(fx),
                None => return Err(DataError("SEG operand does not reference a segment or group".to_owned())),
            }
            out.extend_from_slice(&0u16.to_le_bytes());
            Ok(())
        }
        _ => Err(DataError("data item is not a constant or relocatable value".to_owned())),
    }
}

/// The segment-base fixup a `SEG label` data item needs, resolved against
/// whichever segment/group the label actually belongs to — mirrors the
/// `ExprType::Seg | ExprType::Sec` case `encoding.rs::emit_relocatable`
/// handles for instruction operands.
fn seg_fixup(seg: SegNo, at: u32, id: SymbolId, symtab: &SymbolTable) -> Option<Fixup> {
    match symtab.get(id) {
        Symbol::Relative { seg: Some(s), .. } => Some(Fixup::segment_base(seg, at, *s)),
        Symbol::Section { kind: SectionKind::Segment, ordinal, .. } => Some(Fixup::segment_base(seg, at, SegNo(*ordinal as u8))),
        Symbol::Section { kind: SectionKind::Group, ordinal, .. } => Some(Fixup::group_base(seg, at, GroupNo(*ordinal as u8))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::segment::SegNo;
    use crate::asm::symbol::SymbolTable;

    fn fresh() -> (State, SymbolTable) {
        (State::new("t.asm", 200), SymbolTable::new(false))
    }

    #[test]
    fn string_literal_size_is_byte_length() {
        let (mut state, mut symtab) = fresh();
        let node = DataNode::Str(b"AB".to_vec());
        assert_eq!(node.size(&mut state, &mut symtab).unwrap(), 2);
    }

    #[test]
    fn dup_multiplies_body_size() {
        let (mut state, mut symtab) = fresh();
        let node = DataNode::Dup {
            count: Ast::Num(3),
            body: vec![DataNode::Str(b"AB".to_vec()), DataNode::Item { width: 1, ast: Ast::Num(0) }],
        };
        assert_eq!(node.size(&mut state, &mut symtab).unwrap(), 9);
    }

    #[test]
    fn dup_emits_repeated_bytes() {
        let (mut state, mut symtab) = fresh();
        let node = DataNode::Dup {
            count: Ast::Num(3),
            body: vec![DataNode::Str(b"AB".to_vec()), DataNode::Item { width: 1, ast: Ast::Num(0) }],
        };
        let mut out = Vec::new();
        let mut fixups = Vec::new();
        node.emit(SegNo(0), 0, &mut state, &mut symtab, &mut out, &mut fixups).unwrap();
        assert_eq!(out, b"AB\0AB\0AB\0".to_vec());
        assert!(fixups.is_empty());
    }

    #[test]
    fn relative_label_item_records_a_fixup() {
        let (mut state, mut symtab) = fresh();
        let id = symtab.insert_unknown("TABLE");
        symtab.init_relative(id);
        symtab.define_relative(id, SegNo(0), 10).unwrap();
        let node = DataNode::Item { width: 2, ast: Ast::Label(id) };
        let mut out = Vec::new();
        let mut fixups = Vec::new();
        node.emit(SegNo(0), 100, &mut state, &mut symtab, &mut out, &mut fixups).unwrap();
        assert_eq!(out, vec![0, 0]);
        assert_eq!(fixups.len(), 1);
        assert_eq!(fixups[0].at, 100);
    }
}
