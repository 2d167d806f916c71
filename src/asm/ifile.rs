//! IFILE: the pass-invariant intermediate representation. One `Ifile`
//! holds every `Irec` produced by the scanning pass (§4.1) plus the
//! symbol/segment/group registries every later pass reads and mutates
//! in place — the reference's single global `IFILE`, restructured here
//! as an owned struct instead of file-scope statics.

use crate::asm::datanode::DataNode;
use crate::asm::expr::Ast;
use crate::asm::operand::Operand;
use crate::asm::segment::{SegNo, SegmentTable};
use crate::asm::source::{InjectedSource, SourceLoc};
use crate::asm::symbol::{SymbolId, SymbolTable};
use crate::asm::token::{Sreg, Token};

#[derive(Debug, Clone)]
pub enum IrecKind {
    /// A machine instruction: opcode token, optional `REP`-family
    /// prefix, and its parsed operand list.
    Instruction {
        token: Token,
        prefix: Option<Token>,
        operands: Vec<Operand>,
    },
    /// `DB`/`DW`/`DD`/`DQ`/`DT` data items, already parsed into a node
    /// tree (§4.1's DATA model).
    Data { nodes: Vec<DataNode> },
    /// `EQU` / `name = expr`.
    Equ { ast: Ast },
    /// `ALIGN n`.
    Align { p2: u8 },
    /// `ORG expr`.
    Org { ast: Ast },
    /// `ASSUME sreg:target, ...`.
    Assume { clauses: Vec<(Sreg, AssumeTarget)> },
    /// A line that only declares a label, or is blank/comment-only —
    /// carries no encoding of its own.
    Empty,
}

/// What an `ASSUME` clause binds a segment register to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssumeTarget {
    Nothing,
    Name(String),
}

/// One intermediate record: a label (if the line had one) plus a body.
/// `seg`/`offset`/`size` are filled in by pass 1 and refined by every
/// resize iteration; they are meaningless before pass 1 runs.
#[derive(Debug, Clone)]
pub struct Irec {
    pub loc: SourceLoc,
    pub label: Option<SymbolId>,
    pub kind: IrecKind,
    pub seg: Option<SegNo>,
    pub offset: u32,
    pub size: u32,
}

impl Irec {
    pub fn new(loc: SourceLoc, kind: IrecKind) -> Self {
        Irec {
            loc,
            label: None,
            kind,
            seg: None,
            offset: 0,
            size: 0,
        }
    }

    pub fn with_label(mut self, label: SymbolId) -> Self {
        self.label = Some(label);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Ifile {
    pub symtab: SymbolTable,
    pub segtab: SegmentTable,
    pub records: Vec<Irec>,
    pub injected: InjectedSource,
    /// The label named by `END`, if any — the program's entry point.
    pub start: Option<SymbolId>,
    /// Set once pass 1 has produced a first size for every record;
    /// `resize` refuses to run before this is true (§4.7).
    pub provisional_sizes: bool,
    /// Counter behind `SymbolTable::gensym_local`, shared across the
    /// whole module so generated names never collide.
    pub local_counter: u32,
}

impl Ifile {
    pub fn new(case_sensitive: bool) -> Self {
        Ifile {
            symtab: SymbolTable::new(case_sensitive),
            segtab: SegmentTable::new(),
            records: Vec::new(),
            injected: InjectedSource::default(),
            start: None,
            provisional_sizes: false,
            local_counter: 0,
        }
    }

    pub fn push(&mut self, rec: Irec) -> usize {
        self.records.push(rec);
        self.records.len() - 1
    }

    pub fn gensym_local(&mut self) -> String {
        self.symtab.gensym_local(&mut self.local_counter)
    }

    /// Total size across every record currently assigned to `seg`,
    /// used by the resize loop's termination check (sum over segments
    /// must stabilise, spec §4.7/§9).
    pub fn segment_total(&self, seg: SegNo) -> u32 {
        self.records.iter().filter(|r| r.seg == Some(seg)).map(|r| r.size).sum()
    }
}
