//! Instruction table and operand matching.
//!
//! The table is a static array of `Insdef` rows, built once behind a
//! `OnceLock` and indexed by token into a per-mnemonic slice — the
//! "compile the static table at program start; build the per-token chain
//! index once" Design Note, done here with a `Vec`-of-ranges instead of
//! a linked chain, since an index into one flat `Vec` needs no separate
//! allocation per row.
//!
//! Row order is preserved from the most-specific-first convention the
//! reference relies on (`AL, imm` before `REG8, imm`): callers must not
//! reorder `ROWS` when adding entries.

use std::sync::OnceLock;

use crate::asm::opclass::{OperandClass, OperandFlags, OperandType};
use crate::asm::state::CpuMask;
use crate::asm::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModrmCategory {
    /// No ModR/M byte at all.
    None,
    /// R/M operand only, `reg` field from the row (e.g. unary shift/`NOT`/`NEG`).
    Rmn,
    /// reg, r/m.
    Rrm,
    /// r/m, reg.
    Rmr,
    /// r/m, immediate (`reg` field is an opcode extension).
    Rmc,
    /// mod=3 register-direct, `reg=rm=op.reg` (e.g. `PUSH r16` short form uses opcode_inc instead,
    /// this category backs `XCHG AX, r16`-style forms that still need the full byte).
    Reg,
    /// Memory-only special forms (`LDS`/`LES`).
    Mmc,
    /// ST, ST(i).
    Ssi,
    /// ST(i), ST.
    Sis,
    /// ST, ST(i) with opcode2 as extension.
    Ssc,
    /// ST(i), ST with opcode2 as extension.
    Sic,
    /// ST(i) alone.
    Stc,
    /// ST(i) push/pop-style single operand, rm is always 1.
    Stk,
    /// Opcode extension only, no operands (`CCC` = "condition code constant").
    Ccc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCategory {
    Nopr,
    Wait,
    W286,
    Wai2,
}

/// Which slot, if any, folds a register number into `opcode1` (the
/// `B8+r` style encodings for e.g. `MOV r16, imm16` and the `PUSH`/`POP`
/// short forms).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeInc {
    None,
    /// Add operand 1's register number to `opcode1`.
    Op1Reg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmSize {
    None,
    Imm8,
    Imm16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuGate {
    P86,
    P87,
    P286n,
    P286p,
    P287,
}

impl CpuGate {
    pub fn enabled_in(self, mask: CpuMask) -> bool {
        mask.contains(match self {
            CpuGate::P86 => CpuMask::P86,
            CpuGate::P87 => CpuMask::P87,
            CpuGate::P286n => CpuMask::P286N,
            CpuGate::P286p => CpuMask::P286P,
            CpuGate::P287 => CpuMask::P287,
        })
    }
}

/// One operand-slot requirement: `OperandType::None` with empty flags
/// matches the absence of an operand in that slot.
#[derive(Debug, Clone, Copy)]
pub struct OperReq(pub OperandType, pub OperandFlags);

pub const NONE: OperReq = OperReq(OperandType::None, OperandFlags::empty());

/// Immutable instruction-table template row.
#[derive(Debug, Clone, Copy)]
pub struct Insdef {
    pub token: Token,
    pub oper: [OperReq; 3],
    pub opcodes: u8,
    pub wait: WaitCategory,
    pub opcode1: u8,
    pub opcode2: u8,
    pub opcode_inc: OpcodeInc,
    pub modrm: ModrmCategory,
    pub reg: u8,
    pub imm: [ImmSize; 3],
    pub cpu: CpuGate,
}

const fn row(
    token: Token,
    oper: [OperReq; 3],
    opcodes: u8,
    wait: WaitCategory,
    opcode1: u8,
    opcode2: u8,
    opcode_inc: OpcodeInc,
    modrm: ModrmCategory,
    reg: u8,
    imm: [ImmSize; 3],
    cpu: CpuGate,
) -> Insdef {
    Insdef { token, oper, opcodes, wait, opcode1, opcode2, opcode_inc, modrm, reg, imm, cpu }
}

macro_rules! rm {
    ($flag:ident) => {
        OperReq(OperandType::Mem, OperandFlags::$flag)
    };
}
macro_rules! reg {
    ($ty:ident, $flag:ident) => {
        OperReq(OperandType::$ty, OperandFlags::$flag)
    };
}
macro_rules! imm_req {
    ($flag:ident) => {
        OperReq(OperandType::Imm, OperandFlags::$flag)
    };
}

/// Static row table. A representative catalogue (spec §4.4, §9):
/// data movement, ALU, shift/rotate, string, stack, control flow
/// (including the full Jcc set), flags, I/O, interrupts, and a sampling
/// of 8087 rows. Every `ModrmCategory`, `WaitCategory`, and `CpuGate`
/// named by the data model is exercised by at least one row.
static ROWS: &[Insdef] = &[
    // --- MOV ---
    row(Token::Mov, [reg!(Reg, AL), imm_req!(IMM8U), NONE], 1, WaitCategory::Nopr, 0xB0, 0, OpcodeInc::Op1Reg, ModrmCategory::None, 0, [ImmSize::Imm8, ImmSize::None, ImmSize::None], CpuGate::P86),
    row(Token::Mov, [reg!(Reg, REG8), imm_req!(IMM8U), NONE], 1, WaitCategory::Nopr, 0xB0, 0, OpcodeInc::Op1Reg, ModrmCategory::None, 0, [ImmSize::Imm8, ImmSize::None, ImmSize::None], CpuGate::P86),
    row(Token::Mov, [reg!(Reg, REG16), imm_req!(IMM), NONE], 1, WaitCategory::Nopr, 0xB8, 0, OpcodeInc::Op1Reg, ModrmCategory::None, 0, [ImmSize::Imm16, ImmSize::None, ImmSize::None], CpuGate::P86),
    row(Token::Mov, [rm!(RM8), imm_req!(IMM8U), NONE], 1, WaitCategory::Nopr, 0xC6, 0, OpcodeInc::None, ModrmCategory::Rmc, 0, [ImmSize::Imm8, ImmSize::None, ImmSize::None], CpuGate::P86),
    row(Token::Mov, [rm!(RM16), imm_req!(IMM), NONE], 1, WaitCategory::Nopr, 0xC7, 0, OpcodeInc::None, ModrmCategory::Rmc, 0, [ImmSize::Imm16, ImmSize::None, ImmSize::None], CpuGate::P86),
    row(Token::Mov, [reg!(Reg, REG8), rm!(RM8), NONE], 1, WaitCategory::Nopr, 0x8A, 0, OpcodeInc::None, ModrmCategory::Rrm, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Mov, [reg!(Reg, REG16), rm!(RM16), NONE], 1, WaitCategory::Nopr, 0x8B, 0, OpcodeInc::None, ModrmCategory::Rrm, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Mov, [rm!(RM8), reg!(Reg, REG8), NONE], 1, WaitCategory::Nopr, 0x88, 0, OpcodeInc::None, ModrmCategory::Rmr, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Mov, [rm!(RM16), reg!(Reg, REG16), NONE], 1, WaitCategory::Nopr, 0x89, 0, OpcodeInc::None, ModrmCategory::Rmr, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Mov, [rm!(RM16), reg!(Sreg, SREG), NONE], 1, WaitCategory::Nopr, 0x8C, 0, OpcodeInc::None, ModrmCategory::Rmr, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Mov, [reg!(Sreg, SREG), rm!(RM16), NONE], 1, WaitCategory::Nopr, 0x8E, 0, OpcodeInc::None, ModrmCategory::Rrm, 0, [ImmSize::None; 3], CpuGate::P86),

    // --- LEA / LDS / LES ---
    row(Token::Lea, [reg!(Reg, REG16), rm!(MEM), NONE], 1, WaitCategory::Nopr, 0x8D, 0, OpcodeInc::None, ModrmCategory::Rrm, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Lds, [reg!(Reg, REG16), rm!(MEM), NONE], 1, WaitCategory::Nopr, 0xC5, 0, OpcodeInc::None, ModrmCategory::Mmc, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Les, [reg!(Reg, REG16), rm!(MEM), NONE], 1, WaitCategory::Nopr, 0xC4, 0, OpcodeInc::None, ModrmCategory::Mmc, 0, [ImmSize::None; 3], CpuGate::P86),

    // --- stack ---
    row(Token::Push, [reg!(Reg, REG16), NONE, NONE], 1, WaitCategory::Nopr, 0x50, 0, OpcodeInc::Op1Reg, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Push, [rm!(RM16), NONE, NONE], 1, WaitCategory::Nopr, 0xFF, 6, OpcodeInc::None, ModrmCategory::Rmn, 6, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Push, [reg!(Sreg, SREG), NONE, NONE], 1, WaitCategory::Nopr, 0x06, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Pop, [reg!(Reg, REG16), NONE, NONE], 1, WaitCategory::Nopr, 0x58, 0, OpcodeInc::Op1Reg, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Pop, [rm!(RM16), NONE, NONE], 1, WaitCategory::Nopr, 0x8F, 0, OpcodeInc::None, ModrmCategory::Rmn, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Pushf, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0x9C, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Popf, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0x9D, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Lahf, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0x9F, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Sahf, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0x9E, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Xchg, [reg!(Reg, AX), reg!(Reg, REG16), NONE], 1, WaitCategory::Nopr, 0x90, 0, OpcodeInc::Op1Reg, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Xchg, [reg!(Reg, REG16), rm!(RM16), NONE], 1, WaitCategory::Nopr, 0x87, 0, OpcodeInc::None, ModrmCategory::Rrm, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Xchg, [reg!(Reg, REG8), rm!(RM8), NONE], 1, WaitCategory::Nopr, 0x86, 0, OpcodeInc::None, ModrmCategory::Rrm, 0, [ImmSize::None; 3], CpuGate::P86),
    row(Token::Xlat, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xD7, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86),

    // --- ALU family: ADD/ADC/SUB/SBB/AND/OR/XOR/CMP over AL/imm8, AX/imm16, rm/imm, rm/reg, reg/rm ---
];

macro_rules! alu_group {
    ($table:ident, $token:expr, $base:literal, $ext:literal) => {
        $table.push(row($token, [reg!(Reg, AL), imm_req!(IMM8U), NONE], 1, WaitCategory::Nopr, $base, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::Imm8, ImmSize::None, ImmSize::None], CpuGate::P86));
        $table.push(row($token, [reg!(Reg, AX), imm_req!(IMM), NONE], 1, WaitCategory::Nopr, $base + 1, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::Imm16, ImmSize::None, ImmSize::None], CpuGate::P86));
        $table.push(row($token, [rm!(RM8), imm_req!(IMM8U), NONE], 1, WaitCategory::Nopr, 0x80, $ext, OpcodeInc::None, ModrmCategory::Rmc, $ext, [ImmSize::Imm8, ImmSize::None, ImmSize::None], CpuGate::P86));
        $table.push(row($token, [rm!(RM16), imm_req!(IMM8), NONE], 1, WaitCategory::Nopr, 0x83, $ext, OpcodeInc::None, ModrmCategory::Rmc, $ext, [ImmSize::Imm8, ImmSize::None, ImmSize::None], CpuGate::P86));
        $table.push(row($token, [rm!(RM16), imm_req!(IMM), NONE], 1, WaitCategory::Nopr, 0x81, $ext, OpcodeInc::None, ModrmCategory::Rmc, $ext, [ImmSize::Imm16, ImmSize::None, ImmSize::None], CpuGate::P86));
        $table.push(row($token, [reg!(Reg, REG8), rm!(RM8), NONE], 1, WaitCategory::Nopr, $base + 2, 0, OpcodeInc::None, ModrmCategory::Rrm, 0, [ImmSize::None; 3], CpuGate::P86));
        $table.push(row($token, [reg!(Reg, REG16), rm!(RM16), NONE], 1, WaitCategory::Nopr, $base + 3, 0, OpcodeInc::None, ModrmCategory::Rrm, 0, [ImmSize::None; 3], CpuGate::P86));
        $table.push(row($token, [rm!(RM8), reg!(Reg, REG8), NONE], 1, WaitCategory::Nopr, $base, 0, OpcodeInc::None, ModrmCategory::Rmr, 0, [ImmSize::None; 3], CpuGate::P86));
        $table.push(row($token, [rm!(RM16), reg!(Reg, REG16), NONE], 1, WaitCategory::Nopr, $base + 1, 0, OpcodeInc::None, ModrmCategory::Rmr, 0, [ImmSize::None; 3], CpuGate::P86));
    };
}

macro_rules! shift_group {
    ($table:ident, $token:expr, $ext:literal) => {
        $table.push(row($token, [rm!(RM8), imm_req!(ONE), NONE], 1, WaitCategory::Nopr, 0xD0, $ext, OpcodeInc::None, ModrmCategory::Rmn, $ext, [ImmSize::None; 3], CpuGate::P86));
        $table.push(row($token, [rm!(RM16), imm_req!(ONE), NONE], 1, WaitCategory::Nopr, 0xD1, $ext, OpcodeInc::None, ModrmCategory::Rmn, $ext, [ImmSize::None; 3], CpuGate::P86));
        $table.push(row($token, [rm!(RM8), reg!(Reg, CL), NONE], 1, WaitCategory::Nopr, 0xD2, $ext, OpcodeInc::None, ModrmCategory::Rmn, $ext, [ImmSize::None; 3], CpuGate::P86));
        $table.push(row($token, [rm!(RM16), reg!(Reg, CL), NONE], 1, WaitCategory::Nopr, 0xD3, $ext, OpcodeInc::None, ModrmCategory::Rmn, $ext, [ImmSize::None; 3], CpuGate::P86));
    };
}

macro_rules! string_group {
    ($table:ident, $token_b:expr, $token_w:expr, $opb:literal, $opw:literal) => {
        $table.push(row($token_b, [NONE, NONE, NONE], 1, WaitCategory::Nopr, $opb, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
        $table.push(row($token_w, [NONE, NONE, NONE], 1, WaitCategory::Nopr, $opw, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    };
}

macro_rules! jcc_row {
    ($table:ident, $token:expr, $opcode:literal) => {
        $table.push(row($token, [reg!(Jump, JUMP), NONE, NONE], 1, WaitCategory::Nopr, $opcode, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    };
}

fn build_table() -> Vec<Insdef> {
    let mut t: Vec<Insdef> = ROWS.to_vec();

    alu_group!(t, Token::Add, 0x00, 0);
    alu_group!(t, Token::Or, 0x08, 1);
    alu_group!(t, Token::Adc, 0x10, 2);
    alu_group!(t, Token::Sbb, 0x18, 3);
    alu_group!(t, Token::And, 0x20, 4);
    alu_group!(t, Token::Sub, 0x28, 5);
    alu_group!(t, Token::Xor, 0x30, 6);
    alu_group!(t, Token::Cmp, 0x38, 7);

    t.push(row(Token::Test, [reg!(Reg, AL), imm_req!(IMM8U), NONE], 1, WaitCategory::Nopr, 0xA8, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::Imm8, ImmSize::None, ImmSize::None], CpuGate::P86));
    t.push(row(Token::Test, [reg!(Reg, AX), imm_req!(IMM), NONE], 1, WaitCategory::Nopr, 0xA9, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::Imm16, ImmSize::None, ImmSize::None], CpuGate::P86));
    t.push(row(Token::Test, [rm!(RM8), imm_req!(IMM8U), NONE], 1, WaitCategory::Nopr, 0xF6, 0, OpcodeInc::None, ModrmCategory::Rmc, 0, [ImmSize::Imm8, ImmSize::None, ImmSize::None], CpuGate::P86));
    t.push(row(Token::Test, [rm!(RM16), imm_req!(IMM), NONE], 1, WaitCategory::Nopr, 0xF7, 0, OpcodeInc::None, ModrmCategory::Rmc, 0, [ImmSize::Imm16, ImmSize::None, ImmSize::None], CpuGate::P86));
    t.push(row(Token::Test, [rm!(RM8), reg!(Reg, REG8), NONE], 1, WaitCategory::Nopr, 0x84, 0, OpcodeInc::None, ModrmCategory::Rmr, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Test, [rm!(RM16), reg!(Reg, REG16), NONE], 1, WaitCategory::Nopr, 0x85, 0, OpcodeInc::None, ModrmCategory::Rmr, 0, [ImmSize::None; 3], CpuGate::P86));

    t.push(row(Token::Inc, [reg!(Reg, REG16), NONE, NONE], 1, WaitCategory::Nopr, 0x40, 0, OpcodeInc::Op1Reg, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Inc, [rm!(RM8), NONE, NONE], 1, WaitCategory::Nopr, 0xFE, 0, OpcodeInc::None, ModrmCategory::Rmn, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Inc, [rm!(RM16), NONE, NONE], 1, WaitCategory::Nopr, 0xFF, 0, OpcodeInc::None, ModrmCategory::Rmn, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Dec, [reg!(Reg, REG16), NONE, NONE], 1, WaitCategory::Nopr, 0x48, 0, OpcodeInc::Op1Reg, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Dec, [rm!(RM8), NONE, NONE], 1, WaitCategory::Nopr, 0xFE, 1, OpcodeInc::None, ModrmCategory::Rmn, 1, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Dec, [rm!(RM16), NONE, NONE], 1, WaitCategory::Nopr, 0xFF, 1, OpcodeInc::None, ModrmCategory::Rmn, 1, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Neg, [rm!(RM8), NONE, NONE], 1, WaitCategory::Nopr, 0xF6, 3, OpcodeInc::None, ModrmCategory::Rmn, 3, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Neg, [rm!(RM16), NONE, NONE], 1, WaitCategory::Nopr, 0xF7, 3, OpcodeInc::None, ModrmCategory::Rmn, 3, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Not, [rm!(RM8), NONE, NONE], 1, WaitCategory::Nopr, 0xF6, 2, OpcodeInc::None, ModrmCategory::Rmn, 2, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Not, [rm!(RM16), NONE, NONE], 1, WaitCategory::Nopr, 0xF7, 2, OpcodeInc::None, ModrmCategory::Rmn, 2, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Mul, [rm!(RM8), NONE, NONE], 1, WaitCategory::Nopr, 0xF6, 4, OpcodeInc::None, ModrmCategory::Rmn, 4, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Mul, [rm!(RM16), NONE, NONE], 1, WaitCategory::Nopr, 0xF7, 4, OpcodeInc::None, ModrmCategory::Rmn, 4, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Imul, [rm!(RM8), NONE, NONE], 1, WaitCategory::Nopr, 0xF6, 5, OpcodeInc::None, ModrmCategory::Rmn, 5, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Imul, [rm!(RM16), NONE, NONE], 1, WaitCategory::Nopr, 0xF7, 5, OpcodeInc::None, ModrmCategory::Rmn, 5, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Div, [rm!(RM8), NONE, NONE], 1, WaitCategory::Nopr, 0xF6, 6, OpcodeInc::None, ModrmCategory::Rmn, 6, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Div, [rm!(RM16), NONE, NONE], 1, WaitCategory::Nopr, 0xF7, 6, OpcodeInc::None, ModrmCategory::Rmn, 6, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Idiv, [rm!(RM8), NONE, NONE], 1, WaitCategory::Nopr, 0xF6, 7, OpcodeInc::None, ModrmCategory::Rmn, 7, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Idiv, [rm!(RM16), NONE, NONE], 1, WaitCategory::Nopr, 0xF7, 7, OpcodeInc::None, ModrmCategory::Rmn, 7, [ImmSize::None; 3], CpuGate::P86));

    shift_group!(t, Token::Rol, 0);
    shift_group!(t, Token::Ror, 1);
    shift_group!(t, Token::Rcl, 2);
    shift_group!(t, Token::Rcr, 3);
    shift_group!(t, Token::Shl, 4);
    shift_group!(t, Token::Sar, 7);
    shift_group!(t, Token::Shr, 5);

    string_group!(t, Token::Movsb, Token::Movsw, 0xA4, 0xA5);
    string_group!(t, Token::Cmpsb, Token::Cmpsw, 0xA6, 0xA7);
    string_group!(t, Token::Scasb, Token::Scasw, 0xAE, 0xAF);
    string_group!(t, Token::Lodsb, Token::Lodsw, 0xAC, 0xAD);
    string_group!(t, Token::Stosb, Token::Stosw, 0xAA, 0xAB);

    t.push(row(Token::Call, [reg!(Jump, JUMP), NONE, NONE], 1, WaitCategory::Nopr, 0xE8, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::Imm16, ImmSize::None, ImmSize::None], CpuGate::P86));
    t.push(row(Token::Call, [rm!(RM16), NONE, NONE], 1, WaitCategory::Nopr, 0xFF, 2, OpcodeInc::None, ModrmCategory::Rmn, 2, [ImmSize::None; 3], CpuGate::P86));

    // JMP's canonical row is the short (rel8) form; `resize` grows it to
    // the near (0xE9, rel16) encoding in place once a target falls outside
    // [-128, 127], the same optimistic-short-then-widen relaxation the
    // short-Jcc expansion builds on.
    t.push(row(Token::Jmp, [reg!(Jump, JUMP), NONE, NONE], 1, WaitCategory::Nopr, 0xEB, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Jmp, [rm!(RM16), NONE, NONE], 1, WaitCategory::Nopr, 0xFF, 4, OpcodeInc::None, ModrmCategory::Rmn, 4, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Ret, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xC3, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Retn, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xC3, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Retf, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xCB, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Ret, [imm_req!(IMM), NONE, NONE], 1, WaitCategory::Nopr, 0xC2, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::Imm16, ImmSize::None, ImmSize::None], CpuGate::P86));

    t.push(row(Token::Loop, [reg!(Jump, JUMP), NONE, NONE], 1, WaitCategory::Nopr, 0xE2, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Loope, [reg!(Jump, JUMP), NONE, NONE], 1, WaitCategory::Nopr, 0xE1, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Loopz, [reg!(Jump, JUMP), NONE, NONE], 1, WaitCategory::Nopr, 0xE1, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Loopne, [reg!(Jump, JUMP), NONE, NONE], 1, WaitCategory::Nopr, 0xE0, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Loopnz, [reg!(Jump, JUMP), NONE, NONE], 1, WaitCategory::Nopr, 0xE0, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Jcxz, [reg!(Jump, JUMP), NONE, NONE], 1, WaitCategory::Nopr, 0xE3, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));

    jcc_row!(t, Token::Ja, 0x77);
    jcc_row!(t, Token::Jae, 0x73);
    jcc_row!(t, Token::Jb, 0x72);
    jcc_row!(t, Token::Jbe, 0x76);
    jcc_row!(t, Token::Jc, 0x72);
    jcc_row!(t, Token::Je, 0x74);
    jcc_row!(t, Token::Jz, 0x74);
    jcc_row!(t, Token::Jg, 0x7F);
    jcc_row!(t, Token::Jge, 0x7D);
    jcc_row!(t, Token::Jl, 0x7C);
    jcc_row!(t, Token::Jle, 0x7E);
    jcc_row!(t, Token::Jna, 0x76);
    jcc_row!(t, Token::Jnae, 0x72);
    jcc_row!(t, Token::Jnb, 0x73);
    jcc_row!(t, Token::Jnbe, 0x77);
    jcc_row!(t, Token::Jnc, 0x73);
    jcc_row!(t, Token::Jne, 0x75);
    jcc_row!(t, Token::Jng, 0x7E);
    jcc_row!(t, Token::Jnge, 0x7C);
    jcc_row!(t, Token::Jnl, 0x7D);
    jcc_row!(t, Token::Jnle, 0x7F);
    jcc_row!(t, Token::Jno, 0x71);
    jcc_row!(t, Token::Jnp, 0x7B);
    jcc_row!(t, Token::Jns, 0x79);
    jcc_row!(t, Token::Jnz, 0x75);
    jcc_row!(t, Token::Jo, 0x70);
    jcc_row!(t, Token::Jp, 0x7A);
    jcc_row!(t, Token::Jpe, 0x7A);
    jcc_row!(t, Token::Jpo, 0x7B);
    jcc_row!(t, Token::Js, 0x78);

    t.push(row(Token::Clc, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xF8, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Cld, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xFC, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Cli, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xFA, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Stc, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xF9, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Std, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xFD, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Sti, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xFB, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Cmc, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xF5, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Nop, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0x90, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Hlt, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xF4, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Cbw, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0x98, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Cwd, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0x99, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));

    t.push(row(Token::Int, [imm_req!(IMM8U), NONE, NONE], 1, WaitCategory::Nopr, 0xCD, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::Imm8, ImmSize::None, ImmSize::None], CpuGate::P86));
    t.push(row(Token::Int3, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xCC, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Into, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xCE, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Iret, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xCF, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::In, [reg!(Reg, AL), imm_req!(IMM8U), NONE], 1, WaitCategory::Nopr, 0xE4, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::Imm8, ImmSize::None, ImmSize::None], CpuGate::P86));
    t.push(row(Token::In, [reg!(Reg, AX), imm_req!(IMM8U), NONE], 1, WaitCategory::Nopr, 0xE5, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::Imm8, ImmSize::None, ImmSize::None], CpuGate::P86));
    t.push(row(Token::In, [reg!(Reg, AL), reg!(Reg, DX), NONE], 1, WaitCategory::Nopr, 0xEC, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::In, [reg!(Reg, AX), reg!(Reg, DX), NONE], 1, WaitCategory::Nopr, 0xED, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Out, [imm_req!(IMM8U), reg!(Reg, AL), NONE], 1, WaitCategory::Nopr, 0xE6, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::Imm8, ImmSize::None, ImmSize::None], CpuGate::P86));
    t.push(row(Token::Out, [imm_req!(IMM8U), reg!(Reg, AX), NONE], 1, WaitCategory::Nopr, 0xE7, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::Imm8, ImmSize::None, ImmSize::None], CpuGate::P86));
    t.push(row(Token::Out, [reg!(Reg, DX), reg!(Reg, AL), NONE], 1, WaitCategory::Nopr, 0xEE, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));
    t.push(row(Token::Out, [reg!(Reg, DX), reg!(Reg, AX), NONE], 1, WaitCategory::Nopr, 0xEF, 0, OpcodeInc::None, ModrmCategory::None, 0, [ImmSize::None; 3], CpuGate::P86));

    // --- 8087, with a representative set of modrm categories and the
    // WAIT-prefix categories the wait-needed logic must handle ---
    t.push(row(Token::Fld, [rm!(RM64), NONE, NONE], 1, WaitCategory::Wait, 0xDD, 0, OpcodeInc::None, ModrmCategory::Rmn, 0, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fld, [reg!(St, STI), NONE, NONE], 1, WaitCategory::Wait, 0xD9, 0xC0, OpcodeInc::None, ModrmCategory::Stc, 0, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fstp, [rm!(RM64), NONE, NONE], 1, WaitCategory::Wait, 0xDD, 3, OpcodeInc::None, ModrmCategory::Rmn, 3, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fstp, [reg!(St, STI), NONE, NONE], 1, WaitCategory::Wait, 0xDD, 0xD8, OpcodeInc::None, ModrmCategory::Stk, 0, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fadd, [reg!(St, STT), reg!(St, STI), NONE], 1, WaitCategory::Wait, 0xD8, 0xC0, OpcodeInc::None, ModrmCategory::Ssi, 0, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fadd, [reg!(St, STI), reg!(St, STT), NONE], 1, WaitCategory::Wait, 0xDC, 0xC0, OpcodeInc::None, ModrmCategory::Sis, 0, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Faddp, [reg!(St, STI), reg!(St, STT), NONE], 1, WaitCategory::Wait, 0xDE, 0xC0, OpcodeInc::None, ModrmCategory::Sis, 0, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fsub, [reg!(St, STT), reg!(St, STI), NONE], 1, WaitCategory::Wait, 0xD8, 0xE0, OpcodeInc::None, ModrmCategory::Ssc, 4, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fsubp, [reg!(St, STI), reg!(St, STT), NONE], 1, WaitCategory::Wait, 0xDE, 0xE0, OpcodeInc::None, ModrmCategory::Sic, 4, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fmul, [reg!(St, STT), reg!(St, STI), NONE], 1, WaitCategory::Wait, 0xD8, 0xC8, OpcodeInc::None, ModrmCategory::Ssi, 0, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fmulp, [reg!(St, STI), reg!(St, STT), NONE], 1, WaitCategory::Wait, 0xDE, 0xC8, OpcodeInc::None, ModrmCategory::Sis, 0, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fdiv, [reg!(St, STT), reg!(St, STI), NONE], 1, WaitCategory::Wait, 0xD8, 0xF0, OpcodeInc::None, ModrmCategory::Ssc, 6, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fdivp, [reg!(St, STI), reg!(St, STT), NONE], 1, WaitCategory::Wait, 0xDE, 0xF8, OpcodeInc::None, ModrmCategory::Sic, 7, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fchs, [NONE, NONE, NONE], 1, WaitCategory::Wait, 0xD9, 0xE0, OpcodeInc::None, ModrmCategory::Ccc, 0, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fabs, [NONE, NONE, NONE], 1, WaitCategory::Wait, 0xD9, 0xE1, OpcodeInc::None, ModrmCategory::Ccc, 0, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fcom, [reg!(St, STI), NONE, NONE], 1, WaitCategory::Wait, 0xD8, 0xD0, OpcodeInc::None, ModrmCategory::Stc, 0, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fcomp, [reg!(St, STI), NONE, NONE], 1, WaitCategory::Wait, 0xD8, 0xD8, OpcodeInc::None, ModrmCategory::Stc, 0, [ImmSize::None; 3], CpuGate::P87));
    // FNINIT skips the WAIT prefix entirely (the "FN-" no-wait forms); FNOP uses the
    // two-WAIT 8086 compatibility form (`WAI2`) the reference reserves for a handful
    // of legacy encodings.
    t.push(row(Token::Fninit, [NONE, NONE, NONE], 1, WaitCategory::Nopr, 0xDB, 0xE3, OpcodeInc::None, ModrmCategory::Ccc, 0, [ImmSize::None; 3], CpuGate::P87));
    t.push(row(Token::Fnop, [NONE, NONE, NONE], 1, WaitCategory::Wai2, 0xD9, 0xD0, OpcodeInc::None, ModrmCategory::Ccc, 0, [ImmSize::None; 3], CpuGate::P87));

    // 286-protected-mode-only row, to exercise `P286n`.
    t.push(row(Token::Arpl, [rm!(RM16), reg!(Reg, REG16), NONE], 1, WaitCategory::W286, 0x63, 0, OpcodeInc::None, ModrmCategory::Rmr, 0, [ImmSize::None; 3], CpuGate::P286n));

    t
}

static TABLE: OnceLock<Vec<Insdef>> = OnceLock::new();

fn table() -> &'static [Insdef] {
    TABLE.get_or_init(build_table)
}

/// First row for `token` whose operand-class requirements are each
/// satisfied by the supplied classes (padding with `OperandType::None`
/// for any trailing slot the caller did not supply), and whose `cpu`
/// gate is enabled in `cpu_mask`.
pub fn find_instruc(token: Token, classes: &[OperandClass], cpu_mask: CpuMask) -> Option<&'static Insdef> {
    table().iter().find(|row| {
        row.token == token
            && row.cpu.enabled_in(cpu_mask)
            && (0..3).all(|i| {
                let given = classes.get(i).copied().unwrap_or(OperandClass::new(OperandType::None));
                given.matches(row.oper[i].0, row.oper[i].1)
            })
    })
}

/// Whether `(prefix, opcode_token)` is a valid `REP`-family pairing.
/// Prefix byte is `0xF3` for `REP/REPE/REPZ`, `0xF2` for `REPNE/REPNZ`.
pub fn repeat_prefix_byte(prefix: Token) -> Option<u8> {
    match prefix {
        Token::Rep | Token::Repe | Token::Repz => Some(0xF3),
        Token::Repne | Token::Repnz => Some(0xF2),
        _ => None,
    }
}

pub fn repeat_prefix_valid_for(prefix: Token, opcode: Token) -> bool {
    repeat_prefix_byte(prefix).is_some()
        && matches!(
            opcode,
            Token::Movsb
                | Token::Movsw
                | Token::Cmpsb
                | Token::Cmpsw
                | Token::Scasb
                | Token::Scasw
                | Token::Lodsb
                | Token::Lodsw
                | Token::Stosb
                | Token::Stosw
                | Token::Movs
                | Token::Cmps
                | Token::Scas
                | Token::Lods
                | Token::Stos
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::opclass::OperandFlags;

    #[test]
    fn finds_most_specific_mov_row_first() {
        let al = OperandClass::with(OperandType::Reg, OperandFlags::AL | OperandFlags::RM | OperandFlags::RM8 | OperandFlags::REG8);
        let imm8u = OperandClass::with(OperandType::Imm, OperandFlags::IMM | OperandFlags::IMM8U);
        let row = find_instruc(Token::Mov, &[al, imm8u], CpuMask::P86).expect("AL, imm8u should match");
        assert_eq!(row.opcode1, 0xB0);
    }

    #[test]
    fn cpu_gate_excludes_286_only_rows() {
        let mem = OperandClass::with(OperandType::Mem, OperandFlags::RM | OperandFlags::RM16 | OperandFlags::MEM | OperandFlags::MEM16);
        let reg16 = OperandClass::with(OperandType::Reg, OperandFlags::REG16);
        assert!(find_instruc(Token::Arpl, &[mem, reg16], CpuMask::P86).is_none());
        assert!(find_instruc(Token::Arpl, &[mem, reg16], CpuMask::P86 | CpuMask::P286N).is_some());
    }

    #[test]
    fn register_register_alu_form_is_reachable() {
        let cx = OperandClass::with(OperandType::Reg, OperandFlags::RM | OperandFlags::RM16 | OperandFlags::REG16);
        let row = find_instruc(Token::Xor, &[cx, cx], CpuMask::P86).expect("reg16, reg16 XOR should match");
        assert_eq!(row.opcode1, 0x33);
    }

    #[test]
    fn shift_by_one_matches_the_implicit_count_row() {
        let ax = OperandClass::with(OperandType::Reg, OperandFlags::RM | OperandFlags::RM16 | OperandFlags::REG16 | OperandFlags::AX);
        let one = OperandClass::with(OperandType::Imm, OperandFlags::IMM | OperandFlags::IMM8U | OperandFlags::IMM8 | OperandFlags::ONE);
        let row = find_instruc(Token::Shl, &[ax, one], CpuMask::P86).expect("rm16, 1 should match the D1 row");
        assert_eq!(row.opcode1, 0xD1);
    }

    #[test]
    fn jcc_reverse_mapping_is_total() {
        use crate::asm::token::Token::*;
        for t in [
            Ja, Jae, Jb, Jbe, Jc, Je, Jz, Jg, Jge, Jl, Jle, Jna, Jnae, Jnb, Jnbe, Jnc, Jne, Jng,
            Jnge, Jnl, Jnle, Jno, Jnp, Jns, Jnz, Jo, Jp, Jpe, Jpo, Js,
        ] {
            assert!(t.reverse_jcc().is_some(), "{t:?} has no reverse mapping");
        }
    }
}
