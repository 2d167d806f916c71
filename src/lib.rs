//! A four-pass 16-bit x86 assembler core targeting a real-mode/early
//! protected-mode 8086/80286/80287 machine.
//!
//! The pipeline turns a segmented assembly source into a relocatable
//! object directive stream carrying code, data, symbols, segments,
//! groups, and fixup records:
//!
//! `source → pass 0 (scan) → pass 1 (sizing) → resize (fixed point) → encoding → object stream`
//!
//! ### Scope
//!
//! This crate is the assembler core only. The object-file byte format
//! beyond its logical directive stream, and the linker's own
//! combining/resolution step, are separate concerns.
//!
//! ### Known gaps
//!
//! - No floating-point constant parsing beyond integer/byte-string
//!   literals for `DT`/`DQ`.
//! - No macro expansion or `INCLUDE` directives.
//! - No 32-bit or protected-mode 386+ encodings.
//! - `FAR` pointers are not implemented (see `DESIGN.md`).

pub mod asm;
