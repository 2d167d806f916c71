//! Token kinds for the assembler source language.
//!
//! The lexer (`lexer.rs`) never hands out bare strings for keywords: an
//! identifier is looked up against the register table, then the keyword
//! table, and only falls back to `Token::Label` when neither matches.

use strum::{Display, EnumString};

/// A general-purpose register name, 16-bit form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Reg16 {
    Ax,
    Cx,
    Dx,
    Bx,
    Sp,
    Bp,
    Si,
    Di,
}

impl Reg16 {
    pub fn number(self) -> u8 {
        self as u8
    }
}

/// A general-purpose register name, 8-bit form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Reg8 {
    Al,
    Cl,
    Dl,
    Bl,
    Ah,
    Ch,
    Dh,
    Bh,
}

impl Reg8 {
    pub fn number(self) -> u8 {
        self as u8
    }
}

/// A segment register, also used as the index into the ASSUME table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Sreg {
    Es,
    Cs,
    Ss,
    Ds,
}

impl Sreg {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Every token the lexer can produce, plus the opcode/directive tokens
/// recognised by the keyword table.
///
/// The mnemonic set here is a representative catalogue, not the full
/// instruction list of the original language: every `ModrmCategory`,
/// `WaitCategory` and `Cpu` gate named by the instruction table is
/// exercised by at least one token below (see `instable.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Token {
    // structural
    Eol,
    Label,
    Num,
    Str,
    Sreg,
    Reg8,
    Reg16,

    // directives
    Assume,
    Codeseg,
    Dataseg,
    Udataseg,
    Db,
    Dd,
    Dq,
    Dt,
    Dw,
    End,
    Ends,
    Equ,
    Extrn,
    Group,
    Ideal,
    Model,
    Org,
    Align,
    Private,
    Public,
    Segment,
    Stack,
    Jumps,
    P8086,
    P8087,
    Pno87,
    P287,
    P286,
    P286n,

    // operand keywords
    Byte,
    Word,
    Dword,
    Fword,
    Qword,
    Tbyte,
    Dup,
    Far,
    Near,
    Offset,
    Ptr,
    Seg,
    Short,
    St,

    // repeat prefixes
    Rep,
    Repe,
    Repz,
    Repne,
    Repnz,

    // data movement
    Mov,
    Lea,
    Lds,
    Les,
    Xchg,
    Push,
    Pop,
    Pushf,
    Popf,
    Lahf,
    Sahf,
    Xlat,
    Arpl,

    // ALU
    Add,
    Adc,
    Sub,
    Sbb,
    And,
    Or,
    Xor,
    Cmp,
    Test,
    Inc,
    Dec,
    Neg,
    Not,
    Mul,
    Imul,
    Div,
    Idiv,

    // shift/rotate
    Shl,
    Sal,
    Shr,
    Sar,
    Rol,
    Ror,
    Rcl,
    Rcr,

    // string ops
    Movs,
    Movsb,
    Movsw,
    Cmps,
    Cmpsb,
    Cmpsw,
    Scas,
    Scasb,
    Scasw,
    Lods,
    Lodsb,
    Lodsw,
    Stos,
    Stosb,
    Stosw,

    // control flow
    Call,
    Ret,
    Retn,
    Retf,
    Jmp,
    Loop,
    Loope,
    Loopz,
    Loopne,
    Loopnz,
    Jcxz,

    // conditional jumps (complete set, required by resize's reversal table)
    Ja,
    Jae,
    Jb,
    Jbe,
    Jc,
    Je,
    Jz,
    Jg,
    Jge,
    Jl,
    Jle,
    Jna,
    Jnae,
    Jnb,
    Jnbe,
    Jnc,
    Jne,
    Jng,
    Jnge,
    Jnl,
    Jnle,
    Jno,
    Jnp,
    Jns,
    Jnz,
    Jo,
    Jp,
    Jpe,
    Jpo,
    Js,

    // flags / misc
    Clc,
    Cld,
    Cli,
    Stc,
    Std,
    Sti,
    Cmc,
    Nop,
    Hlt,
    Wait,
    Int,
    Int3,
    Into,
    Iret,
    In,
    Out,
    Cbw,
    Cwd,

    // 8087
    Fld,
    Fstp,
    Fadd,
    Faddp,
    Fsub,
    Fsubp,
    Fmul,
    Fmulp,
    Fdiv,
    Fdivp,
    Fchs,
    Fabs,
    Fcom,
    Fcomp,
    Fninit,
    Fnop,
}

impl Token {
    /// True for every token handled by the segment/group/directive layer
    /// rather than by the instruction-matching layer.
    pub fn is_directive(self) -> bool {
        matches!(
            self,
            Token::Assume
                | Token::Codeseg
                | Token::Dataseg
                | Token::Udataseg
                | Token::Db
                | Token::Dd
                | Token::Dq
                | Token::Dt
                | Token::Dw
                | Token::End
                | Token::Ends
                | Token::Equ
                | Token::Extrn
                | Token::Group
                | Token::Ideal
                | Token::Model
                | Token::Org
                | Token::Align
                | Token::Public
                | Token::Segment
                | Token::Jumps
                | Token::P8086
                | Token::P8087
                | Token::Pno87
                | Token::P287
                | Token::P286
                | Token::P286n
        )
    }

    pub fn is_repeat_prefix(self) -> bool {
        matches!(
            self,
            Token::Rep | Token::Repe | Token::Repz | Token::Repne | Token::Repnz
        )
    }

    pub fn is_conditional_jump(self) -> bool {
        matches!(
            self,
            Token::Ja
                | Token::Jae
                | Token::Jb
                | Token::Jbe
                | Token::Jc
                | Token::Je
                | Token::Jz
                | Token::Jg
                | Token::Jge
                | Token::Jl
                | Token::Jle
                | Token::Jna
                | Token::Jnae
                | Token::Jnb
                | Token::Jnbe
                | Token::Jnc
                | Token::Jne
                | Token::Jng
                | Token::Jnge
                | Token::Jnl
                | Token::Jnle
                | Token::Jno
                | Token::Jnp
                | Token::Jns
                | Token::Jnz
                | Token::Jo
                | Token::Jp
                | Token::Jpe
                | Token::Jpo
                | Token::Js
                | Token::Jcxz
        )
    }

    /// Data movement is an opcode token for every token not already
    /// classified as structural, directive or repeat-prefix.
    pub fn is_opcode(self) -> bool {
        !self.is_directive() && !self.is_repeat_prefix() && !matches!(self, Token::Eol | Token::Label | Token::Num | Token::Str | Token::Sreg | Token::Reg8 | Token::Reg16)
    }

    /// The reverse-condition mapping used by the short-jump expansion in
    /// the resize pass. Total over the 30 Jcc tokens.
    pub fn reverse_jcc(self) -> Option<Token> {
        use Token::*;
        Some(match self {
            Ja => Jbe,
            Jae => Jb,
            Jb => Jae,
            Jbe => Ja,
            Jc => Jnc,
            Je => Jne,
            Jz => Jnz,
            Jg => Jle,
            Jge => Jl,
            Jl => Jge,
            Jle => Jg,
            Jna => Ja,
            Jnae => Jae,
            Jnb => Jb,
            Jnbe => Jbe,
            Jnc => Jc,
            Jne => Je,
            Jng => Jg,
            Jnge => Jge,
            Jnl => Jl,
            Jnle => Jle,
            Jno => Jo,
            Jnp => Jp,
            Jns => Js,
            Jnz => Jz,
            Jo => Jno,
            Jp => Jnp,
            Jpe => Jpo,
            Jpo => Jpe,
            Js => Jns,
            Jcxz => return None,
            _ => return None,
        })
    }
}

/// One lexer output: a token kind plus whatever payload the kind implies.
#[derive(Debug, Clone, PartialEq)]
pub enum Lexeme {
    Eol,
    Label(String),
    Num(i64),
    Str(String),
    Sreg(Sreg),
    Reg8(Reg8),
    Reg16(Reg16),
    Plain(Token),
    Punct(Punct),
}

/// Single-character punctuation tokens; these never go through the
/// keyword table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Question,
    Equals,
}

impl Punct {
    pub fn from_char(c: char) -> Option<Punct> {
        Some(match c {
            ':' => Punct::Colon,
            '+' => Punct::Plus,
            '-' => Punct::Minus,
            '*' => Punct::Star,
            '/' => Punct::Slash,
            ',' => Punct::Comma,
            '(' => Punct::LParen,
            ')' => Punct::RParen,
            '[' => Punct::LBracket,
            ']' => Punct::RBracket,
            '?' => Punct::Question,
            '=' => Punct::Equals,
            _ => return None,
        })
    }
}
