//! OFILE: the object-record stream the encoding pass produces (spec
//! §6). Each record is one directive; `write_to` serialises the whole
//! stream as `tag byte, fixed-width header, payload` the way the
//! reference's object writer lays out its records, with the header
//! struct borrowed through `bytemuck` the way the teacher's executable
//! headers are.

use std::io::{self, Write};

use bytemuck::{Pod, Zeroable};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::asm::reloc::{Fixup, FixupKind, FixupTarget};
use crate::asm::segment::{GroupNo, SegNo, SegmentAttrs};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjTag {
    Module = 1,
    SegDef = 2,
    GrpDef = 3,
    PubDef = 4,
    ExtDef = 5,
    LeData = 6,
    Fixup = 7,
    ModEnd = 8,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ObjRecord {
    Module { name: String },
    SegDef { seg: SegNo, name: String, attrs: SegmentAttrs, length: u32 },
    GrpDef { group: GroupNo, name: String, members: Vec<SegNo> },
    PubDef { seg: SegNo, name: String, offset: u32 },
    ExtDef { name: String, external_id: u32 },
    LeData { seg: SegNo, offset: u32, bytes: Vec<u8> },
    Fixup(Fixup),
    ModEnd { start: Option<(SegNo, u32)> },
}

#[cfg(feature = "serde")]
impl serde::Serialize for SegNo {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.0)
    }
}
#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for SegNo {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(SegNo(u8::deserialize(d)?))
    }
}
#[cfg(feature = "serde")]
impl serde::Serialize for GroupNo {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.0)
    }
}
#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for GroupNo {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(GroupNo(u8::deserialize(d)?))
    }
}
#[cfg(feature = "serde")]
impl serde::Serialize for SegmentAttrs {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.bits())
    }
}
#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for SegmentAttrs {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(SegmentAttrs::from_bits_truncate(u8::deserialize(d)?))
    }
}
#[cfg(feature = "serde")]
impl serde::Serialize for Fixup {
    fn serialize<S: serde::Serializer>(&self, _s: S) -> Result<S::Ok, S::Error> {
        unimplemented!("Fixup serialisation is only needed for the binary OFILE writer, not round-tripping")
    }
}
#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Fixup {
    fn deserialize<D: serde::Deserializer<'de>>(_d: D) -> Result<Self, D::Error> {
        unimplemented!("Fixup deserialisation is only needed for the binary OFILE writer, not round-tripping")
    }
}

/// Fixed-width `LEDATA`/`FIXUP` header, `bytemuck`-backed like the
/// teacher's executable headers so it can be written with a single
/// `bytes_of` call instead of field-by-field `write_all`s.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LeDataHeader {
    seg: u8,
    _pad: [u8; 3],
    offset: u32,
    len: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FixupHeader {
    kind: u8,
    seg: u8,
    width: u8,
    _pad: u8,
    at: u32,
    target_kind: u8,
    _pad2: [u8; 3],
    target: u32,
}

fn fixup_kind_byte(k: FixupKind) -> u8 {
    match k {
        FixupKind::Offset => 0,
        FixupKind::External => 1,
        FixupKind::GroupAbsJump => 2,
        FixupKind::Segment => 3,
        FixupKind::Group => 4,
    }
}

fn target_encoding(t: FixupTarget) -> (u8, u32) {
    match t {
        FixupTarget::Symbol(id) => (0, id.0),
        FixupTarget::Segment(s) => (1, s.0 as u32),
        FixupTarget::Group(g) => (2, g.0 as u32),
        FixupTarget::External(id) => (3, id),
    }
}

/// The full output stream for one module. Records are appended in the
/// order the encoding pass finishes each segment; `ModEnd` is always
/// last.
#[derive(Debug, Clone, Default)]
pub struct ObjFile {
    pub records: Vec<ObjRecord>,
}

impl ObjFile {
    pub fn new() -> Self {
        ObjFile::default()
    }

    pub fn push(&mut self, rec: ObjRecord) {
        self.records.push(rec);
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for rec in &self.records {
            match rec {
                ObjRecord::Module { name } => {
                    w.write_all(&[ObjTag::Module as u8])?;
                    write_str(w, name)?;
                }
                ObjRecord::SegDef { seg, name, attrs, length } => {
                    w.write_all(&[ObjTag::SegDef as u8, seg.0, attrs.bits()])?;
                    w.write_all(&length.to_le_bytes())?;
                    write_str(w, name)?;
                }
                ObjRecord::GrpDef { group, name, members } => {
                    w.write_all(&[ObjTag::GrpDef as u8, group.0, members.len() as u8])?;
                    for m in members {
                        w.write_all(&[m.0])?;
                    }
                    write_str(w, name)?;
                }
                ObjRecord::PubDef { seg, name, offset } => {
                    w.write_all(&[ObjTag::PubDef as u8, seg.0])?;
                    w.write_all(&offset.to_le_bytes())?;
                    write_str(w, name)?;
                }
                ObjRecord::ExtDef { name, external_id } => {
                    w.write_all(&[ObjTag::ExtDef as u8])?;
                    w.write_all(&external_id.to_le_bytes())?;
                    write_str(w, name)?;
                }
                ObjRecord::LeData { seg, offset, bytes } => {
                    let header = LeDataHeader { seg: seg.0, _pad: [0; 3], offset: *offset, len: bytes.len() as u32 };
                    w.write_all(&[ObjTag::LeData as u8])?;
                    w.write_all(bytemuck::bytes_of(&header))?;
                    w.write_all(bytes)?;
                }
                ObjRecord::Fixup(f) => {
                    let (target_kind, target) = target_encoding(f.target);
                    let header = FixupHeader {
                        kind: fixup_kind_byte(f.kind),
                        seg: f.seg.0,
                        width: f.width,
                        _pad: 0,
                        at: f.at,
                        target_kind,
                        _pad2: [0; 3],
                        target,
                    };
                    w.write_all(&[ObjTag::Fixup as u8])?;
                    w.write_all(bytemuck::bytes_of(&header))?;
                }
                ObjRecord::ModEnd { start } => {
                    w.write_all(&[ObjTag::ModEnd as u8])?;
                    match start {
                        Some((seg, offset)) => {
                            w.write_all(&[1, seg.0])?;
                            w.write_all(&offset.to_le_bytes())?;
                        }
                        None => w.write_all(&[0])?,
                    }
                }
            }
        }
        Ok(())
    }
}

fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    w.write_all(&(bytes.len() as u16).to_le_bytes())?;
    w.write_all(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_module_and_modend() {
        let mut obj = ObjFile::new();
        obj.push(ObjRecord::Module { name: "TEST".to_owned() });
        obj.push(ObjRecord::ModEnd { start: None });
        let mut buf = Vec::new();
        obj.write_to(&mut buf).unwrap();
        assert_eq!(buf[0], ObjTag::Module as u8);
        assert_eq!(*buf.last().unwrap(), 0);
    }

    #[test]
    fn ledata_header_round_trips_length() {
        let mut obj = ObjFile::new();
        obj.push(ObjRecord::LeData { seg: SegNo(1), offset: 16, bytes: vec![0xB8, 0x34, 0x12] });
        let mut buf = Vec::new();
        obj.write_to(&mut buf).unwrap();
        assert_eq!(buf[0], ObjTag::LeData as u8);
        let header: &LeDataHeader = bytemuck::from_bytes(&buf[1..1 + std::mem::size_of::<LeDataHeader>()]);
        assert_eq!(header.len, 3);
        assert_eq!(header.offset, 16);
    }
}
