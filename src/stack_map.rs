// This module records safepoint metadata while code is emitted. Every native
// PC at which the runtime may inspect the frame (runtime calls, implicit null
// check faults, catch handlers, OSR entries) gets a stack map entry tying the
// native offset to the interpreter PC, the register mask of live
// callee-relevant registers, the spill-slot stack mask, and the environment
// locations needed to rebuild interpreter state. Entries are collected in
// emission order and serialised into a dense little-endian byte stream by
// `encode`; the runtime-side decoder is out of scope here.

//! Safepoint stack maps.

use crate::locations::Location;

/// Why a stack map entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackMapKind {
    Default,
    /// Entry for a catch block landing pad.
    Catch,
    /// On-stack-replacement entry point.
    Osr,
    /// Forced entry for debuggable methods.
    Debug,
}

/// One safepoint record.
#[derive(Debug, Clone)]
pub struct StackMapEntry {
    pub native_pc: u32,
    pub dex_pc: u32,
    /// Bitmap of core registers holding live values.
    pub register_mask: u32,
    /// Bitmap over spill slots holding live references.
    pub stack_mask: Vec<u8>,
    pub kind: StackMapKind,
    /// Environment locations, one per live interpreter register.
    pub environment: Vec<Location>,
}

/// Collects stack map entries during emission.
#[derive(Default)]
pub struct StackMapStream {
    entries: Vec<StackMapEntry>,
    in_entry: bool,
}

impl StackMapStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_stack_map_entry(
        &mut self,
        dex_pc: u32,
        native_pc: u32,
        register_mask: u32,
        stack_mask: Vec<u8>,
        kind: StackMapKind,
    ) {
        debug_assert!(!self.in_entry, "previous stack map entry not ended");
        self.in_entry = true;
        self.entries.push(StackMapEntry {
            native_pc,
            dex_pc,
            register_mask,
            stack_mask,
            kind,
            environment: Vec::new(),
        });
    }

    /// Append one environment location to the open entry.
    pub fn add_environment_location(&mut self, location: Location) {
        debug_assert!(self.in_entry, "no open stack map entry");
        if let Some(entry) = self.entries.last_mut() {
            entry.environment.push(location);
        }
    }

    pub fn end_stack_map_entry(&mut self) {
        debug_assert!(self.in_entry, "no open stack map entry");
        self.in_entry = false;
    }

    pub fn entries(&self) -> &[StackMapEntry] {
        &self.entries
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Whether some entry covers the given native PC.
    pub fn has_stack_map_for(&self, native_pc: u32) -> bool {
        self.entries.iter().any(|e| e.native_pc == native_pc)
    }

    /// Serialise to the dense byte format.
    ///
    /// Layout: entry count, then per entry the fixed fields followed by the
    /// length-prefixed stack mask and environment. All fields little-endian
    /// u32 except mask bytes.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(!self.in_entry, "encode with an open entry");
        let mut out = Vec::new();
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.native_pc.to_le_bytes());
            out.extend_from_slice(&entry.dex_pc.to_le_bytes());
            out.extend_from_slice(&entry.register_mask.to_le_bytes());
            out.push(match entry.kind {
                StackMapKind::Default => 0,
                StackMapKind::Catch => 1,
                StackMapKind::Osr => 2,
                StackMapKind::Debug => 3,
            });
            out.extend_from_slice(&(entry.stack_mask.len() as u32).to_le_bytes());
            out.extend_from_slice(&entry.stack_mask);
            out.extend_from_slice(&(entry.environment.len() as u32).to_le_bytes());
            for location in &entry.environment {
                encode_location(&mut out, *location);
            }
        }
        out
    }
}

/// Location tag bytes understood by the runtime-side decoder.
fn encode_location(out: &mut Vec<u8>, location: Location) {
    match location {
        Location::Invalid | Location::NoLocation => {
            out.push(0);
            out.extend_from_slice(&0i32.to_le_bytes());
        }
        Location::Register(r) => {
            out.push(1);
            out.extend_from_slice(&(r.encoding() as i32).to_le_bytes());
        }
        Location::RegisterPair(lo, hi) => {
            out.push(2);
            let packed = (lo.encoding() as i32) | ((hi.encoding() as i32) << 8);
            out.extend_from_slice(&packed.to_le_bytes());
        }
        Location::FpuRegister(r) => {
            out.push(3);
            out.extend_from_slice(&(r.encoding() as i32).to_le_bytes());
        }
        Location::FpuRegisterPair(lo, hi) => {
            out.push(4);
            let packed = (lo.encoding() as i32) | ((hi.encoding() as i32) << 8);
            out.extend_from_slice(&packed.to_le_bytes());
        }
        Location::StackSlot(off) => {
            out.push(5);
            out.extend_from_slice(&off.to_le_bytes());
        }
        Location::DoubleStackSlot(off) => {
            out.push(6);
            out.extend_from_slice(&off.to_le_bytes());
        }
        Location::SimdStackSlot(off) => {
            out.push(7);
            out.extend_from_slice(&off.to_le_bytes());
        }
        Location::Constant(id) => {
            out.push(8);
            out.extend_from_slice(&(id.0 as i32).to_le_bytes());
        }
        Location::Unallocated(_) => {
            // Unallocated locations must not survive register allocation.
            unreachable!("unallocated location in a stack map")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x86::Register;

    #[test]
    fn test_entry_collection() {
        let mut stream = StackMapStream::new();
        stream.begin_stack_map_entry(3, 0x20, 0b0100, vec![0b1], StackMapKind::Default);
        stream.add_environment_location(Location::Register(Register::EAX));
        stream.add_environment_location(Location::StackSlot(8));
        stream.end_stack_map_entry();

        assert_eq!(stream.num_entries(), 1);
        assert!(stream.has_stack_map_for(0x20));
        assert!(!stream.has_stack_map_for(0x24));
        assert_eq!(stream.entries()[0].environment.len(), 2);
    }

    #[test]
    fn test_encode_round_trip_header() {
        let mut stream = StackMapStream::new();
        stream.begin_stack_map_entry(0, 0x10, 0, vec![], StackMapKind::Osr);
        stream.end_stack_map_entry();
        stream.begin_stack_map_entry(5, 0x40, 1, vec![], StackMapKind::Default);
        stream.end_stack_map_entry();

        let bytes = stream.encode();
        assert_eq!(&bytes[0..4], &2u32.to_le_bytes());
        // First entry native pc.
        assert_eq!(&bytes[4..8], &0x10u32.to_le_bytes());
    }
}
