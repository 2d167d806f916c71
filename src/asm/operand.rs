//! Operand parsing: turns one comma-separated slice of lexemes into an
//! `Operand`, and classifies the result into the `OperandClass` the
//! instruction table matches against (spec §4.3).
//!
//! The expression grammar is recursive-descent over the same four
//! levels the typing/eval split in `expr.rs` expects: `expr` → `add` →
//! `mult` → `unary` → `component` → `primitive`.

use crate::asm::expr::{Ast, BinOp, ComponentOp};
use crate::asm::opclass::{OperandClass, OperandFlags, OperandType};
use crate::asm::state::State;
use crate::asm::symbol::{Symbol, SymbolId, SymbolTable};
use crate::asm::token::{Lexeme, Punct, Reg16, Reg8, Sreg, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrSize {
    Byte,
    Word,
    Dword,
    Fword,
    Qword,
    Tbyte,
}

impl PtrSize {
    pub fn bytes(self) -> u32 {
        match self {
            PtrSize::Byte => 1,
            PtrSize::Word => 2,
            PtrSize::Dword => 4,
            PtrSize::Fword => 6,
            PtrSize::Qword => 8,
            PtrSize::Tbyte => 10,
        }
    }

    fn mem_flag(self) -> OperandFlags {
        match self {
            PtrSize::Byte => OperandFlags::MEM8,
            PtrSize::Word => OperandFlags::MEM16,
            PtrSize::Dword => OperandFlags::MEM32,
            PtrSize::Fword => OperandFlags::MEM48,
            PtrSize::Qword => OperandFlags::MEM64,
            PtrSize::Tbyte => OperandFlags::MEM80,
        }
    }

    fn rm_flag(self) -> OperandFlags {
        match self {
            PtrSize::Byte => OperandFlags::RM8,
            PtrSize::Word => OperandFlags::RM16,
            PtrSize::Dword => OperandFlags::RM32,
            PtrSize::Fword => OperandFlags::RM48,
            PtrSize::Qword => OperandFlags::RM64,
            PtrSize::Tbyte => OperandFlags::RM80,
        }
    }

    fn from_token(t: Token) -> Option<PtrSize> {
        Some(match t {
            Token::Byte => PtrSize::Byte,
            Token::Word => PtrSize::Word,
            Token::Dword => PtrSize::Dword,
            Token::Fword => PtrSize::Fword,
            Token::Qword => PtrSize::Qword,
            Token::Tbyte => PtrSize::Tbyte,
            _ => return None,
        })
    }
}

/// `[base + index + disp]`, base restricted to `BX`/`BP`, index to
/// `SI`/`DI` (the eight addressing-mode combinations the encoder's
/// `compute_rm` recognises).
#[derive(Debug, Clone)]
pub struct MemRef {
    pub base: Option<Reg16>,
    pub index: Option<Reg16>,
    pub disp: Option<Ast>,
    pub seg_override: Option<Sreg>,
    pub ptr_size: Option<PtrSize>,
}

#[derive(Debug, Clone)]
pub enum Operand {
    Reg16(Reg16),
    Reg8(Reg8),
    Sreg(Sreg),
    /// `ST` (`None`) or `ST(i)` (`Some(i)`).
    St(Option<u8>),
    Mem(MemRef),
    /// Immediate, jump target, or far-pointer component — which one
    /// depends on the expression's typed result, decided by the caller
    /// against the instruction-table row it is trying to match.
    Expr(Ast),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

struct Cursor<'a> {
    toks: &'a [Lexeme],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(toks: &'a [Lexeme]) -> Self {
        Cursor { toks, pos: 0 }
    }

    fn peek(&self) -> Option<&'a Lexeme> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'a Lexeme> {
        let t = self.toks.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_punct(&mut self, p: Punct) -> bool {
        if matches!(self.peek(), Some(Lexeme::Punct(q)) if *q == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_token(&mut self, t: Token) -> bool {
        if matches!(self.peek(), Some(Lexeme::Plain(q)) if *q == t) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }
}

/// Split a statement's operand-list lexemes on top-level commas. There is
/// no bracket nesting that itself contains a comma in this grammar, so a
/// flat split is exact.
pub fn split_operands(toks: &[Lexeme]) -> Vec<&[Lexeme]> {
    if toks.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut start = 0;
    for (i, t) in toks.iter().enumerate() {
        if matches!(t, Lexeme::Punct(Punct::Comma)) {
            out.push(&toks[start..i]);
            start = i + 1;
        }
    }
    out.push(&toks[start..]);
    out
}

pub fn parse_operand(toks: &[Lexeme], symtab: &mut SymbolTable) -> Result<Operand, ParseError> {
    let mut cur = Cursor::new(toks);
    let op = parse_operand_inner(&mut cur, symtab)?;
    if !cur.at_end() {
        return Err(ParseError("trailing tokens after operand".to_owned()));
    }
    Ok(op)
}

fn parse_operand_inner(cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<Operand, ParseError> {
    // PTR-size prefix: `BYTE PTR`, `WORD PTR`, ...
    let ptr_size = if let Some(Lexeme::Plain(t)) = cur.peek() {
        PtrSize::from_token(*t)
    } else {
        None
    };
    if ptr_size.is_some() {
        cur.bump();
        if !cur.eat_token(Token::Ptr) {
            return Err(ParseError("expected PTR after size keyword".to_owned()));
        }
    }

    // Segment override: `ES:` / `CS:` / `SS:` / `DS:` ahead of a memory
    // operand (the only place a bare segment register is followed by a
    // colon rather than being the whole operand).
    let mut seg_override = None;
    if let Some(Lexeme::Sreg(s)) = cur.peek() {
        let s = *s;
        if matches!(cur.toks.get(cur.pos + 1), Some(Lexeme::Punct(Punct::Colon))) {
            cur.bump();
            cur.bump();
            seg_override = Some(s);
        }
    }

    if seg_override.is_none() && ptr_size.is_none() {
        match cur.peek() {
            Some(Lexeme::Reg16(r)) if cur.toks.len() == cur.pos + 1 => {
                let r = *r;
                cur.bump();
                return Ok(Operand::Reg16(r));
            }
            Some(Lexeme::Reg8(r)) if cur.toks.len() == cur.pos + 1 => {
                let r = *r;
                cur.bump();
                return Ok(Operand::Reg8(r));
            }
            Some(Lexeme::Sreg(s)) if cur.toks.len() == cur.pos + 1 => {
                let s = *s;
                cur.bump();
                return Ok(Operand::Sreg(s));
            }
            Some(Lexeme::Plain(Token::St)) => {
                cur.bump();
                if cur.eat_punct(Punct::LParen) {
                    let n = parse_st_index(cur)?;
                    if !cur.eat_punct(Punct::RParen) {
                        return Err(ParseError("expected ) after ST(i".to_owned()));
                    }
                    return Ok(Operand::St(Some(n)));
                }
                return Ok(Operand::St(None));
            }
            _ => {}
        }
    }

    if matches!(cur.peek(), Some(Lexeme::Punct(Punct::LBracket))) {
        return parse_mem(cur, symtab, seg_override, ptr_size);
    }

    // `[...]` may also follow a register that acts as the base in
    // `register + bracket` free-standing syntax is not supported here;
    // anything else is a scalar expression (immediate or jump target).
    let ast = parse_expr(cur, symtab)?;
    if seg_override.is_some() || ptr_size.is_some() {
        return Err(ParseError("PTR/segment-override prefix only valid on a memory operand".to_owned()));
    }
    Ok(Operand::Expr(ast))
}

fn parse_st_index(cur: &mut Cursor) -> Result<u8, ParseError> {
    match cur.bump() {
        Some(Lexeme::Num(n)) if (0..=7).contains(n) => Ok(*n as u8),
        _ => Err(ParseError("expected ST index 0-7".to_owned())),
    }
}

fn parse_mem(
    cur: &mut Cursor,
    symtab: &mut SymbolTable,
    seg_override: Option<Sreg>,
    ptr_size: Option<PtrSize>,
) -> Result<Operand, ParseError> {
    if !cur.eat_punct(Punct::LBracket) {
        return Err(ParseError("expected [".to_owned()));
    }

    let mut base = None;
    let mut index = None;
    let mut disp_terms: Vec<Ast> = Vec::new();

    loop {
        match cur.peek() {
            Some(Lexeme::Reg16(r)) if matches!(r, Reg16::Bx | Reg16::Bp) => {
                if base.is_some() {
                    return Err(ParseError("memory operand has two base registers".to_owned()));
                }
                base = Some(*r);
                cur.bump();
            }
            Some(Lexeme::Reg16(r)) if matches!(r, Reg16::Si | Reg16::Di) => {
                if index.is_some() {
                    return Err(ParseError("memory operand has two index registers".to_owned()));
                }
                index = Some(*r);
                cur.bump();
            }
            Some(Lexeme::Punct(Punct::RBracket)) => break,
            _ => {
                disp_terms.push(parse_mem_add(cur, symtab)?);
                continue;
            }
        }
        if cur.eat_punct(Punct::Plus) {
            continue;
        }
        if cur.eat_punct(Punct::Minus) {
            let term = parse_mem_add(cur, symtab)?;
            disp_terms.push(Ast::Unary(Box::new(term)));
            continue;
        }
        break;
    }

    if !cur.eat_punct(Punct::RBracket) {
        return Err(ParseError("expected ] to close memory operand".to_owned()));
    }

    let disp = disp_terms.into_iter().reduce(|a, b| Ast::Binary(BinOp::Add, Box::new(a), Box::new(b)));

    Ok(Operand::Mem(MemRef {
        base,
        index,
        disp,
        seg_override,
        ptr_size,
    }))
}

/// A displacement term inside `[...]` is itself an additive expression
/// (e.g. `[BX+SI+TABLE+2]`), so this recurses into the full `add` level
/// rather than just a primitive.
fn parse_mem_add(cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<Ast, ParseError> {
    parse_mult(cur, symtab)
}

fn parse_expr(cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<Ast, ParseError> {
    parse_add(cur, symtab)
}

fn parse_add(cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<Ast, ParseError> {
    let mut lhs = parse_mult(cur, symtab)?;
    loop {
        if cur.eat_punct(Punct::Plus) {
            let rhs = parse_mult(cur, symtab)?;
            lhs = Ast::Binary(BinOp::Add, Box::new(lhs), Box::new(rhs));
        } else if cur.eat_punct(Punct::Minus) {
            let rhs = parse_mult(cur, symtab)?;
            lhs = Ast::Binary(BinOp::Sub, Box::new(lhs), Box::new(rhs));
        } else {
            break;
        }
    }
    Ok(lhs)
}

fn parse_mult(cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<Ast, ParseError> {
    let mut lhs = parse_unary(cur, symtab)?;
    loop {
        if cur.eat_punct(Punct::Star) {
            let rhs = parse_unary(cur, symtab)?;
            lhs = Ast::Binary(BinOp::Mul, Box::new(lhs), Box::new(rhs));
        } else {
            break;
        }
    }
    Ok(lhs)
}

fn parse_unary(cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<Ast, ParseError> {
    if cur.eat_punct(Punct::Minus) {
        let inner = parse_unary(cur, symtab)?;
        return Ok(Ast::Unary(Box::new(inner)));
    }
    parse_component(cur, symtab)
}

fn parse_component(cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<Ast, ParseError> {
    if cur.eat_token(Token::Seg) {
        let id = parse_relative_label(cur, symtab)?;
        return Ok(Ast::Component(ComponentOp::Seg, id));
    }
    if cur.eat_token(Token::Offset) {
        let id = parse_relative_label(cur, symtab)?;
        return Ok(Ast::Component(ComponentOp::Offset, id));
    }
    parse_primitive(cur, symtab)
}

/// `SEG`/`OFFSET` only make sense against a relocatable label. Referencing
/// one implicitly initialises an unknown symbol to relative, same as a
/// bare label reference does elsewhere in the expression grammar.
fn parse_relative_label(cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<SymbolId, ParseError> {
    let name = expect_label(cur)?;
    let id = symtab.insert_unknown(&name);
    symtab.init_relative(id);
    match symtab.get(id) {
        Symbol::Relative { .. } => Ok(id),
        _ => Err(ParseError(format!("'{name}' is not a relocatable label"))),
    }
}

fn expect_label(cur: &mut Cursor) -> Result<String, ParseError> {
    match cur.bump() {
        Some(Lexeme::Label(name)) => Ok(name.clone()),
        _ => Err(ParseError("expected a label after SEG/OFFSET".to_owned())),
    }
}

fn parse_primitive(cur: &mut Cursor, symtab: &mut SymbolTable) -> Result<Ast, ParseError> {
    match cur.bump() {
        Some(Lexeme::Num(n)) => Ok(Ast::Num(*n)),
        Some(Lexeme::Str(s)) => Ok(Ast::Str(s.clone())),
        Some(Lexeme::Label(name)) => {
            if name == "$" {
                // Current-location counter: represented as an anonymous
                // relative label the caller (pass1/resize) resolves to
                // curseg/pc each time it is evaluated, so it is kept as
                // a distinct symbol name per occurrence is unnecessary —
                // one well-known name suffices since STATE always knows
                // the segment and offset this line started at.
                let id = symtab.insert_unknown("$");
                return Ok(Ast::Label(id));
            }
            let id = symtab.insert_unknown(name);
            Ok(Ast::Label(id))
        }
        Some(Lexeme::Punct(Punct::LParen)) => {
            let inner = parse_expr(cur, symtab)?;
            if !cur.eat_punct(Punct::RParen) {
                return Err(ParseError("expected )".to_owned()));
            }
            Ok(inner)
        }
        other => Err(ParseError(format!("unexpected token in expression: {other:?}"))),
    }
}

/// Classify a parsed operand into the `OperandClass` the instruction
/// table matches against (spec §4.3). Immediates and jump targets need
/// `expr_type` (hence `symtab`/`state`) to tell an absolute immediate
/// from a relative jump target from a segment/group reference.
pub fn classify(
    op: &Operand,
    state: &mut State,
    symtab: &mut SymbolTable,
    is_jump_context: bool,
) -> OperandClass {
    match op {
        Operand::Reg16(r) => {
            let mut flags = OperandFlags::RM | OperandFlags::RM16 | OperandFlags::REG16;
            match r {
                Reg16::Ax => flags |= OperandFlags::AX,
                Reg16::Dx => flags |= OperandFlags::DX,
                Reg16::Si => flags |= OperandFlags::SI,
                Reg16::Di => flags |= OperandFlags::DI,
                _ => {}
            }
            OperandClass::with(OperandType::Reg, flags)
        }
        Operand::Reg8(r) => {
            let mut flags = OperandFlags::RM | OperandFlags::RM8 | OperandFlags::REG8;
            match r {
                Reg8::Al => flags |= OperandFlags::AL,
                Reg8::Cl => flags |= OperandFlags::CL,
                _ => {}
            }
            OperandClass::with(OperandType::Reg, flags)
        }
        Operand::Sreg(s) => {
            let mut flags = OperandFlags::SREG;
            flags |= match s {
                Sreg::Cs => OperandFlags::CS,
                Sreg::Ss => OperandFlags::SS,
                Sreg::Ds => OperandFlags::DS,
                Sreg::Es => OperandFlags::ES,
            };
            OperandClass::with(OperandType::Sreg, flags)
        }
        Operand::St(i) => {
            let flags = if i.is_some() { OperandFlags::STI } else { OperandFlags::STT };
            OperandClass::with(OperandType::St, flags)
        }
        Operand::Mem(m) => {
            let mut flags = OperandFlags::RM | OperandFlags::MEM | OperandFlags::INDIR;
            if let Some(ps) = m.ptr_size {
                flags |= ps.rm_flag();
                flags |= ps.mem_flag();
            }
            match (m.base, m.index) {
                (Some(Reg16::Bx), Some(Reg16::Si)) | (Some(Reg16::Bp), Some(Reg16::Di)) => {}
                (Some(_), None) => {}
                (None, Some(Reg16::Si)) => flags |= OperandFlags::SI,
                (None, Some(Reg16::Di)) => flags |= OperandFlags::DI,
                _ => {}
            }
            OperandClass::with(OperandType::Mem, flags)
        }
        Operand::Expr(ast) => {
            let ty = crate::asm::expr::expr_type(state, symtab, ast);
            if is_jump_context {
                return OperandClass::with(OperandType::Jump, OperandFlags::JUMP);
            }
            match ty {
                crate::asm::expr::ExprType::Seg | crate::asm::expr::ExprType::Sec => {
                    OperandClass::with(OperandType::Imm, OperandFlags::IMM)
                }
                _ => {
                    let mut flags = OperandFlags::IMM;
                    if let Ast::Num(n) = ast {
                        if (0..=255).contains(n) {
                            flags |= OperandFlags::IMM8U;
                        }
                        if (-128..=127).contains(n) {
                            flags |= OperandFlags::IMM8;
                        }
                        if *n == 1 {
                            flags |= OperandFlags::ONE;
                        }
                        if *n == 3 {
                            flags |= OperandFlags::THREE;
                        }
                    }
                    OperandClass::with(OperandType::Imm, flags)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::Lexer;

    fn lex_all(src: &str) -> Vec<Lexeme> {
        let mut lx = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let step = lx.next();
            if step.lexeme == Lexeme::Eol {
                break;
            }
            out.push(step.lexeme);
        }
        out
    }

    #[test]
    fn parses_plain_register() {
        let toks = lex_all("AX");
        let mut symtab = SymbolTable::new(false);
        let op = parse_operand(&toks, &mut symtab).unwrap();
        assert!(matches!(op, Operand::Reg16(Reg16::Ax)));
    }

    #[test]
    fn parses_indexed_memory_with_displacement() {
        let toks = lex_all("[BX+SI+5]");
        let mut symtab = SymbolTable::new(false);
        let op = parse_operand(&toks, &mut symtab).unwrap();
        match op {
            Operand::Mem(m) => {
                assert_eq!(m.base, Some(Reg16::Bx));
                assert_eq!(m.index, Some(Reg16::Si));
                assert!(matches!(m.disp, Some(Ast::Num(5))));
            }
            _ => panic!("expected memory operand"),
        }
    }

    #[test]
    fn parses_byte_ptr_prefixed_memory() {
        let toks = lex_all("BYTE PTR [BX+SI+5]");
        let mut symtab = SymbolTable::new(false);
        let op = parse_operand(&toks, &mut symtab).unwrap();
        match op {
            Operand::Mem(m) => assert_eq!(m.ptr_size, Some(PtrSize::Byte)),
            _ => panic!("expected memory operand"),
        }
    }

    #[test]
    fn parses_segment_override() {
        let toks = lex_all("ES:[BX]");
        let mut symtab = SymbolTable::new(false);
        let op = parse_operand(&toks, &mut symtab).unwrap();
        match op {
            Operand::Mem(m) => assert_eq!(m.seg_override, Some(Sreg::Es)),
            _ => panic!("expected memory operand"),
        }
    }

    #[test]
    fn splits_operand_list_on_top_level_commas() {
        let toks = lex_all("AX, [BX+5]");
        let parts = split_operands(&toks);
        assert_eq!(parts.len(), 2);
    }
}
