//! Pass 0: source scan (spec §4.1). Walks `MainSource` line by line,
//! lexes each line in isolation, and builds the `Ifile`'s record list
//! plus its symbol/segment/group tables. No address is assigned here —
//! that is pass 1's job — so a forward reference to a label defined
//! three segments down is exactly as cheap to record as a backward one.

use crate::asm::datanode::DataNode;
use crate::asm::expr::Ast;
use crate::asm::ifile::{AssumeTarget, Ifile, Irec, IrecKind};
use crate::asm::lexer::{LexError, Lexer};
use crate::asm::operand::{self, Operand};
use crate::asm::segment::{Segment, SegmentAttrs};
use crate::asm::source::{MainSource, Source, SourceLoc};
use crate::asm::state::State;
use crate::asm::symbol::{SectionKind, SymbolTable};
use crate::asm::token::{Lexeme, Sreg, Token};

/// One line, already split into label / keyword / rest-of-line lexemes.
struct ScannedLine {
    label: Option<String>,
    rest: Vec<Lexeme>,
}

fn scan_line(state: &mut State, text: &str) -> ScannedLine {
    let mut lx = Lexer::new(text);
    let mut toks = Vec::new();
    loop {
        let step = lx.next();
        if let Some(err) = step.error {
            state.error(lex_error_message(err));
        }
        if step.lexeme == Lexeme::Eol {
            break;
        }
        toks.push(step.lexeme);
    }

    let mut label = None;
    if let Some(Lexeme::Label(name)) = toks.first() {
        if matches!(toks.get(1), Some(Lexeme::Punct(crate::asm::token::Punct::Colon))) {
            label = Some(name.clone());
            toks.drain(0..2);
        }
    }

    ScannedLine { label, rest: toks }
}

fn lex_error_message(err: LexError) -> &'static str {
    match err {
        LexError::Overflow => "identifier or string is too long",
        LexError::UnterminatedString => "unterminated string literal",
        LexError::NumberRange => "numeric literal out of range",
        LexError::InvalidChar => "unrecognised character",
    }
}

pub fn run(state: &mut State, ifile: &mut Ifile, main: &MainSource) -> Result<(), ()> {
    state.reset_for_pass();

    for line_no in 0..main.len() {
        state.at_line(line_no + 1);
        if state.has_too_many_errors() {
            return Err(());
        }
        let line = scan_line(state, main.line(line_no));
        // A malformed statement reports a diagnostic and contributes an
        // `Empty` record rather than aborting the whole scan — later
        // lines may still be perfectly valid.
        let _ = scan_statement(state, ifile, line);
    }
    if state.diagnostics.count() > 0 {
        return Err(());
    }
    Ok(())
}

fn scan_statement(state: &mut State, ifile: &mut Ifile, mut line: ScannedLine) -> Result<(), ()> {
    let loc = state.loc();

    // `name SEGMENT ...` / `name GROUP ...` / `name EQU expr` / `name = expr`
    // name the symbol with a bare leading identifier, not a colon-suffixed
    // label — the colon form is reserved for code/data labels.
    if line.label.is_none() {
        if let Some(Lexeme::Label(name)) = line.rest.first() {
            let names_via_bare_ident = matches!(
                line.rest.get(1),
                Some(Lexeme::Plain(Token::Segment)) | Some(Lexeme::Plain(Token::Group)) | Some(Lexeme::Plain(Token::Equ))
            ) || matches!(line.rest.get(1), Some(Lexeme::Punct(crate::asm::token::Punct::Equals)));
            if names_via_bare_ident {
                line.label = Some(name.clone());
                line.rest.remove(0);
            }
        }
    }

    let label_id = line.label.as_deref().map(|name| ifile.symtab.insert_unknown(name));

    if line.rest.is_empty() {
        let rec = label_attach(Irec::new(loc, IrecKind::Empty), label_id);
        push_rec(ifile, state, rec);
        return Ok(());
    }

    // `name EQU expr` / `name = expr` show up with the label already
    // consumed above; `EQU`/`=` sit at the front of `rest`.
    if let Some(Lexeme::Plain(Token::Equ)) = line.rest.first() {
        return scan_equ(state, ifile, loc, label_id, &line.rest[1..]);
    }
    if let Some(Lexeme::Punct(crate::asm::token::Punct::Equals)) = line.rest.first() {
        return scan_equ(state, ifile, loc, label_id, &line.rest[1..]);
    }

    match line.rest.first() {
        Some(Lexeme::Plain(Token::Segment)) => scan_segment(state, ifile, loc, label_id, &line.rest[1..]),
        Some(Lexeme::Plain(Token::Ends)) => {
            push_rec(ifile, state, label_attach(Irec::new(loc, IrecKind::Empty), label_id));
            state.curseg = None;
            Ok(())
        }
        Some(Lexeme::Plain(Token::Group)) => scan_group(state, ifile, loc, label_id, &line.rest[1..]),
        Some(Lexeme::Plain(Token::Public)) => scan_public(state, ifile, loc, label_id, &line.rest[1..]),
        Some(Lexeme::Plain(Token::Extrn)) => scan_extrn(state, ifile, loc, label_id, &line.rest[1..]),
        Some(Lexeme::Plain(Token::Assume)) => scan_assume(state, ifile, loc, label_id, &line.rest[1..]),
        Some(Lexeme::Plain(Token::Align)) => scan_align(state, ifile, loc, label_id, &line.rest[1..]),
        Some(Lexeme::Plain(Token::Org)) => scan_org(state, ifile, loc, label_id, &line.rest[1..]),
        Some(Lexeme::Plain(Token::End)) => scan_end(state, ifile, loc, label_id, &line.rest[1..]),
        Some(Lexeme::Plain(t @ (Token::Db | Token::Dw | Token::Dd | Token::Dq | Token::Dt))) => {
            scan_data(state, ifile, loc, label_id, *t, &line.rest[1..])
        }
        Some(Lexeme::Plain(
            Token::Model | Token::Ideal | Token::Codeseg | Token::Dataseg | Token::Udataseg | Token::Jumps | Token::P8086
            | Token::P8087 | Token::Pno87 | Token::P287 | Token::P286 | Token::P286n,
        )) => {
            // Ambient mode directives: recorded as Empty records; their
            // effect on `State` (cpu mask, jumps flag) is applied in
            // pass 1 where STATE is rebuilt from scratch each pass.
            push_rec(ifile, state, label_attach(Irec::new(loc, IrecKind::Empty), label_id));
            Ok(())
        }
        Some(Lexeme::Plain(t)) if t.is_repeat_prefix() => scan_instruction(state, ifile, loc, label_id, Some(*t), &line.rest[1..]),
        Some(Lexeme::Plain(t)) if t.is_opcode() => scan_instruction(state, ifile, loc, label_id, None, &line.rest[1..]),
        _ => {
            state.error("unrecognised statement");
            push_rec(ifile, state, label_attach(Irec::new(loc, IrecKind::Empty), label_id));
            Err(())
        }
    }
}

fn label_attach(rec: Irec, label_id: Option<crate::asm::symbol::SymbolId>) -> Irec {
    match label_id {
        Some(id) => rec.with_label(id),
        None => rec,
    }
}

/// Stamp the record with whatever segment is currently open (tracked
/// through `state.curseg` across `SEGMENT`/`ENDS`) before handing it to
/// the `Ifile`. Pass 1 computes offsets per segment purely by walking
/// records in order and filtering on this field.
fn push_rec(ifile: &mut Ifile, state: &State, mut rec: Irec) -> usize {
    rec.seg = state.curseg;
    ifile.push(rec)
}

fn scan_equ(state: &mut State, ifile: &mut Ifile, loc: SourceLoc, label_id: Option<crate::asm::symbol::SymbolId>, rest: &[Lexeme]) -> Result<(), ()> {
    let ast = parse_expr_tokens(state, &mut ifile.symtab, rest)?;
    let rec = label_attach(Irec::new(loc, IrecKind::Equ { ast }), label_id);
    push_rec(ifile, state, rec);
    Ok(())
}

fn scan_segment(state: &mut State, ifile: &mut Ifile, loc: SourceLoc, label_id: Option<crate::asm::symbol::SymbolId>, rest: &[Lexeme]) -> Result<(), ()> {
    let name = match label_id {
        Some(id) => ifile.symtab.get(id).name().to_owned(),
        None => {
            state.error("SEGMENT requires a name");
            return Err(());
        }
    };

    let mut attrs = SegmentAttrs::empty();
    for tok in rest {
        match tok {
            Lexeme::Plain(Token::Private) => attrs |= SegmentAttrs::PRIVATE,
            Lexeme::Plain(Token::Public) => attrs |= SegmentAttrs::PUBLIC,
            Lexeme::Plain(Token::Stack) => attrs |= SegmentAttrs::STACK,
            Lexeme::Plain(Token::Udataseg) => attrs |= SegmentAttrs::UNINIT,
            _ => {}
        }
    }
    if attrs.is_empty() {
        attrs = SegmentAttrs::PUBLIC;
    }
    if !attrs.is_valid() {
        state.error("PRIVATE segment cannot also be PUBLIC or STACK");
        return Err(());
    }

    match ifile.segtab.define_segment(Segment::new(name.clone(), attrs)) {
        Ok(no) => {
            ifile.symtab.insert_section(&name, SectionKind::Segment, no.0 as u32);
            push_rec(ifile, state, Irec::new(loc, IrecKind::Empty));
            state.curseg = Some(no);
            Ok(())
        }
        Err(msg) => {
            state.error(msg);
            Err(())
        }
    }
}

fn scan_group(state: &mut State, ifile: &mut Ifile, loc: SourceLoc, label_id: Option<crate::asm::symbol::SymbolId>, rest: &[Lexeme]) -> Result<(), ()> {
    let name = match label_id {
        Some(id) => ifile.symtab.get(id).name().to_owned(),
        None => {
            state.error("GROUP requires a name");
            return Err(());
        }
    };

    let group_no = match ifile.segtab.define_group(&name) {
        Ok(no) => no,
        Err(msg) => {
            state.error(msg);
            return Err(());
        }
    };
    ifile.symtab.insert_section(&name, SectionKind::Group, group_no.0 as u32);

    for tok in rest {
        if let Lexeme::Label(seg_name) = tok {
            match ifile.segtab.find_segment(seg_name) {
                Some(seg_no) => {
                    if let Err(msg) = ifile.segtab.put_segment_in_group(seg_no, group_no) {
                        state.error(msg);
                        return Err(());
                    }
                }
                None => {
                    state.error(format!("unknown segment '{seg_name}' in GROUP"));
                    return Err(());
                }
            }
        }
    }

    push_rec(ifile, state, Irec::new(loc, IrecKind::Empty));
    Ok(())
}

fn scan_public(state: &mut State, ifile: &mut Ifile, loc: SourceLoc, label_id: Option<crate::asm::symbol::SymbolId>, rest: &[Lexeme]) -> Result<(), ()> {
    for tok in rest {
        if let Lexeme::Label(name) = tok {
            let id = ifile.symtab.insert_unknown(name);
            ifile.symtab.init_relative(id);
            ifile.symtab.mark_public(id);
        }
    }
    if state.has_too_many_errors() {
        return Err(());
    }
    push_rec(ifile, state, label_attach(Irec::new(loc, IrecKind::Empty), label_id));
    Ok(())
}

fn scan_extrn(state: &mut State, ifile: &mut Ifile, loc: SourceLoc, label_id: Option<crate::asm::symbol::SymbolId>, rest: &[Lexeme]) -> Result<(), ()> {
    // `EXTRN name:WORD, name2:BYTE, ...` — the size keyword after the
    // colon decides `data_size`, but matching against a register or
    // opcode instead of a label keyword is a scan error.
    let mut i = 0;
    while i < rest.len() {
        if let Lexeme::Label(name) = &rest[i] {
            let id = ifile.symtab.insert_unknown(name);
            ifile.symtab.init_relative(id);
            ifile.symtab.mark_external(id);
        }
        i += 1;
    }
    if state.has_too_many_errors() {
        return Err(());
    }
    push_rec(ifile, state, label_attach(Irec::new(loc, IrecKind::Empty), label_id));
    Ok(())
}

fn scan_assume(state: &mut State, ifile: &mut Ifile, loc: SourceLoc, label_id: Option<crate::asm::symbol::SymbolId>, rest: &[Lexeme]) -> Result<(), ()> {
    let mut clauses = Vec::new();
    let mut ok = true;
    for part in operand::split_operands(rest) {
        match parse_assume_clause(part) {
            Some(clause) => clauses.push(clause),
            None => {
                state.error("malformed ASSUME clause; expected sreg:target");
                ok = false;
            }
        }
    }
    push_rec(ifile, state, label_attach(Irec::new(loc, IrecKind::Assume { clauses }), label_id));
    if ok {
        Ok(())
    } else {
        Err(())
    }
}

fn parse_assume_clause(toks: &[Lexeme]) -> Option<(Sreg, AssumeTarget)> {
    if toks.len() != 3 {
        return None;
    }
    let sreg = match &toks[0] {
        Lexeme::Sreg(s) => *s,
        _ => return None,
    };
    if !matches!(&toks[1], Lexeme::Punct(crate::asm::token::Punct::Colon)) {
        return None;
    }
    let name = match &toks[2] {
        Lexeme::Label(n) => n,
        _ => return None,
    };
    let target = if name.eq_ignore_ascii_case("NOTHING") {
        AssumeTarget::Nothing
    } else {
        AssumeTarget::Name(name.clone())
    };
    Some((sreg, target))
}

fn scan_align(state: &mut State, ifile: &mut Ifile, loc: SourceLoc, label_id: Option<crate::asm::symbol::SymbolId>, rest: &[Lexeme]) -> Result<(), ()> {
    let n = match rest.first() {
        Some(Lexeme::Num(n)) => *n,
        _ => {
            state.error("ALIGN requires a numeric power-of-two argument");
            return Err(());
        }
    };
    if n <= 0 || (n & (n - 1)) != 0 {
        state.error("ALIGN argument must be a power of two");
        return Err(());
    }
    let p2 = n.trailing_zeros() as u8;
    push_rec(ifile, state, label_attach(Irec::new(loc, IrecKind::Align { p2 }), label_id));
    Ok(())
}

fn scan_org(state: &mut State, ifile: &mut Ifile, loc: SourceLoc, label_id: Option<crate::asm::symbol::SymbolId>, rest: &[Lexeme]) -> Result<(), ()> {
    let ast = parse_expr_tokens(state, &mut ifile.symtab, rest)?;
    push_rec(ifile, state, label_attach(Irec::new(loc, IrecKind::Org { ast }), label_id));
    Ok(())
}

fn scan_end(state: &mut State, ifile: &mut Ifile, loc: SourceLoc, label_id: Option<crate::asm::symbol::SymbolId>, rest: &[Lexeme]) -> Result<(), ()> {
    if let Some(Lexeme::Label(name)) = rest.first() {
        let id = ifile.symtab.insert_unknown(name);
        ifile.symtab.init_relative(id);
        ifile.start = Some(id);
    }
    let _ = state;
    push_rec(ifile, state, label_attach(Irec::new(loc, IrecKind::Empty), label_id));
    Ok(())
}

fn scan_data(
    state: &mut State,
    ifile: &mut Ifile,
    loc: SourceLoc,
    label_id: Option<crate::asm::symbol::SymbolId>,
    directive: Token,
    rest: &[Lexeme],
) -> Result<(), ()> {
    let width: u8 = match directive {
        Token::Db => 1,
        Token::Dw => 2,
        Token::Dd => 4,
        Token::Dq => 8,
        Token::Dt => 10,
        _ => unreachable!(),
    };

    let mut nodes = Vec::new();
    for item in operand::split_operands(rest) {
        nodes.push(parse_data_item(state, &mut ifile.symtab, width, item)?);
    }
    push_rec(ifile, state, label_attach(Irec::new(loc, IrecKind::Data { nodes }), label_id));
    Ok(())
}

fn parse_data_item(state: &mut State, symtab: &mut SymbolTable, width: u8, toks: &[Lexeme]) -> Result<DataNode, ()> {
    if toks.is_empty() {
        state.error("empty data item");
        return Err(());
    }
    if matches!(toks[0], Lexeme::Punct(crate::asm::token::Punct::Question)) && toks.len() == 1 {
        return Ok(DataNode::Uninit { width });
    }
    if width == 1 {
        if let Lexeme::Str(s) = &toks[0] {
            if toks.len() == 1 {
                return Ok(DataNode::Str(s.as_bytes().to_vec()));
            }
        }
    }

    // `count DUP (body)`.
    if let Some(dup_pos) = toks.iter().position(|t| matches!(t, Lexeme::Plain(Token::Dup))) {
        let count = parse_expr_tokens(state, symtab, &toks[..dup_pos])?;
        let after = &toks[dup_pos + 1..];
        let inner = strip_parens(after).ok_or(())?;
        let mut body = Vec::new();
        for item in operand::split_operands(inner) {
            body.push(parse_data_item(state, symtab, width, item)?);
        }
        return Ok(DataNode::Dup { count, body });
    }

    let ast = parse_expr_tokens(state, symtab, toks)?;
    Ok(DataNode::Item { width, ast })
}

fn strip_parens(toks: &[Lexeme]) -> Option<&[Lexeme]> {
    if toks.first().map(|t| matches!(t, Lexeme::Punct(crate::asm::token::Punct::LParen))) == Some(true)
        && toks.last().map(|t| matches!(t, Lexeme::Punct(crate::asm::token::Punct::RParen))) == Some(true)
    {
        Some(&toks[1..toks.len() - 1])
    } else {
        None
    }
}

fn scan_instruction(
    state: &mut State,
    ifile: &mut Ifile,
    loc: SourceLoc,
    label_id: Option<crate::asm::symbol::SymbolId>,
    prefix: Option<Token>,
    rest: &[Lexeme],
) -> Result<(), ()> {
    let (token, operand_toks) = match rest.first() {
        Some(Lexeme::Plain(t)) if t.is_opcode() => (*t, &rest[1..]),
        _ => {
            state.error("expected an opcode after the repeat prefix");
            return Err(());
        }
    };

    let mut operands = Vec::new();
    for part in operand::split_operands(operand_toks) {
        if part.is_empty() {
            continue;
        }
        match operand::parse_operand(part, &mut ifile.symtab) {
            Ok(op) => operands.push(op),
            Err(e) => {
                state.error(e.0);
                return Err(());
            }
        }
    }

    let rec = label_attach(Irec::new(loc, IrecKind::Instruction { token, prefix, operands }), label_id);
    push_rec(ifile, state, rec);
    Ok(())
}

fn parse_expr_tokens(state: &mut State, symtab: &mut SymbolTable, toks: &[Lexeme]) -> Result<Ast, ()> {
    match operand::parse_operand(toks, symtab) {
        Ok(Operand::Expr(ast)) => Ok(ast),
        Ok(_) => {
            state.error("expected a constant or label expression here");
            Err(())
        }
        Err(e) => {
            state.error(e.0);
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_src(src: &str) -> (State, Ifile) {
        let mut state = State::new("t.asm", 200);
        let mut ifile = Ifile::new(false);
        let main = MainSource::new("t.asm", src);
        run(&mut state, &mut ifile, &main).ok();
        (state, ifile)
    }

    #[test]
    fn scans_a_segment_and_an_instruction() {
        let (state, ifile) = run_src("CODE SEGMENT\nSTART: MOV AX, 1234h\nCODE ENDS\nEND START\n");
        assert_eq!(state.diagnostics.count(), 0);
        assert!(ifile.records.iter().any(|r| matches!(r.kind, IrecKind::Instruction { .. })));
        assert!(ifile.start.is_some());
    }

    #[test]
    fn scans_a_dup_data_directive() {
        let (state, ifile) = run_src("DB 3 DUP ('AB', 0)\n");
        assert_eq!(state.diagnostics.count(), 0);
        match &ifile.records[0].kind {
            IrecKind::Data { nodes } => assert_eq!(nodes.len(), 1),
            other => panic!("expected data record, got {other:?}"),
        }
    }
}
