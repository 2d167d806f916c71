//! Segment and group registries.
//!
//! Bounded the way the reference bounds them (`MAX_SEGMENT`/`MAX_GROUP` =
//! 8): callers get a recoverable error, not a panic, past the cap.

use bitflags::bitflags;

pub const MAX_SEGMENT: usize = 8;
pub const MAX_GROUP: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegNo(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupNo(pub u8);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentAttrs: u8 {
        const PRIVATE = 1 << 0;
        const PUBLIC  = 1 << 1;
        const STACK   = 1 << 2;
        const UNINIT  = 1 << 3;
    }
}

impl SegmentAttrs {
    /// PRIVATE is exclusive with PUBLIC and STACK.
    pub fn is_valid(self) -> bool {
        !(self.contains(SegmentAttrs::PRIVATE)
            && (self.contains(SegmentAttrs::PUBLIC) || self.contains(SegmentAttrs::STACK)))
    }
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub name: String,
    pub attrs: SegmentAttrs,
    pub group: Option<GroupNo>,
    pub p2align: u8,
    pub pc: u32,
}

impl Segment {
    pub fn new(name: impl Into<String>, attrs: SegmentAttrs) -> Self {
        Segment {
            name: name.into(),
            attrs,
            group: None,
            p2align: 4,
            pc: 0,
        }
    }

    pub fn is_uninit(&self) -> bool {
        self.attrs.contains(SegmentAttrs::UNINIT)
    }
}

#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub ordinal: u32,
    pub members: Vec<SegNo>,
}

/// Ordered segment and group tables, owned by the `IFILE`.
#[derive(Debug, Clone, Default)]
pub struct SegmentTable {
    segments: Vec<Segment>,
    groups: Vec<Group>,
}

impl SegmentTable {
    pub fn new() -> Self {
        SegmentTable::default()
    }

    pub fn define_segment(&mut self, seg: Segment) -> Result<SegNo, &'static str> {
        if self.segments.len() >= MAX_SEGMENT {
            return Err("too many segments");
        }
        if !seg.attrs.is_valid() {
            return Err("PRIVATE segment cannot also be PUBLIC or STACK");
        }
        let no = SegNo(self.segments.len() as u8);
        self.segments.push(seg);
        Ok(no)
    }

    pub fn define_group(&mut self, name: impl Into<String>) -> Result<GroupNo, &'static str> {
        if self.groups.len() >= MAX_GROUP {
            return Err("too many groups");
        }
        let ordinal = self.groups.len() as u32;
        let no = GroupNo(ordinal as u8);
        self.groups.push(Group {
            name: name.into(),
            ordinal,
            members: Vec::new(),
        });
        Ok(no)
    }

    pub fn segment(&self, no: SegNo) -> &Segment {
        &self.segments[no.0 as usize]
    }

    pub fn segment_mut(&mut self, no: SegNo) -> &mut Segment {
        &mut self.segments[no.0 as usize]
    }

    pub fn group(&self, no: GroupNo) -> &Group {
        &self.groups[no.0 as usize]
    }

    pub fn segments(&self) -> impl Iterator<Item = (SegNo, &Segment)> {
        self.segments
            .iter()
            .enumerate()
            .map(|(i, s)| (SegNo(i as u8), s))
    }

    pub fn groups(&self) -> impl Iterator<Item = (GroupNo, &Group)> {
        self.groups
            .iter()
            .enumerate()
            .map(|(i, g)| (GroupNo(i as u8), g))
    }

    pub fn find_segment(&self, name: &str) -> Option<SegNo> {
        self.segments
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
            .map(|i| SegNo(i as u8))
    }

    pub fn find_group(&self, name: &str) -> Option<GroupNo> {
        self.groups
            .iter()
            .position(|g| g.name.eq_ignore_ascii_case(name))
            .map(|i| GroupNo(i as u8))
    }

    pub fn put_segment_in_group(&mut self, seg: SegNo, group: GroupNo) -> Result<(), &'static str> {
        if self.segments[seg.0 as usize].group.is_some() {
            return Err("segment already belongs to a group");
        }
        self.segments[seg.0 as usize].group = Some(group);
        self.groups[group.0 as usize].members.push(seg);
        Ok(())
    }

    /// Reset every segment's program counter to zero, run at the start of
    /// pass 1, each resize iteration, and the encoding pass.
    pub fn reset_pcs(&mut self) {
        for seg in &mut self.segments {
            seg.pc = 0;
        }
    }

    pub fn sum_pcs(&self) -> u64 {
        self.segments.iter().map(|s| s.pc as u64).sum()
    }
}
