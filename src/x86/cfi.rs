// This module writes the DWARF call-frame information stream handed to the
// unwinder next to the generated code. The writer mirrors the assembler: the
// code generator records a directive beside every push, pop and ESP adjustment
// it emits, and the stream interleaves DW_CFA_advance_loc opcodes so each
// directive applies at the exact code offset of the instruction it describes.
// The CFA offset is tracked as bookkeeping so frame entry and exit can be
// checked to cancel out; remember/restore state brackets the epilogue of each
// return so fall-through code after a `ret` keeps the full-frame description.

//! DWARF call-frame information stream.

/// CFA is defined in units of minus one word on x86-32.
const DATA_ALIGNMENT: i32 = -4;

const DW_CFA_ADVANCE_LOC: u8 = 0x40;
const DW_CFA_OFFSET: u8 = 0x80;
const DW_CFA_RESTORE: u8 = 0xC0;
const DW_CFA_ADVANCE_LOC1: u8 = 0x02;
const DW_CFA_ADVANCE_LOC2: u8 = 0x03;
const DW_CFA_ADVANCE_LOC4: u8 = 0x04;
const DW_CFA_REMEMBER_STATE: u8 = 0x0A;
const DW_CFA_RESTORE_STATE: u8 = 0x0B;
const DW_CFA_DEF_CFA_REGISTER: u8 = 0x0D;
const DW_CFA_DEF_CFA_OFFSET: u8 = 0x0E;

/// Streaming writer for the unwinder directives of one method.
#[derive(Default)]
pub struct CfiStream {
    data: Vec<u8>,
    /// Distance from the current stack pointer to the call frame address.
    cfa_offset: i32,
    /// Code offset the last emitted directive applies at.
    last_pc: u32,
    /// CFA offsets saved by remember-state, restored in LIFO order.
    saved_offsets: Vec<i32>,
}

impl CfiStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the tracked CFA offset without emitting anything. The consumer's
    /// initial rule (CFA = ESP + 4 at entry) comes from its CIE.
    pub fn set_cfa_offset(&mut self, offset: i32) {
        self.cfa_offset = offset;
    }

    pub fn cfa_offset(&self) -> i32 {
        self.cfa_offset
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Move the CFA by `delta` bytes at code offset `pc`.
    pub fn adjust_cfa_offset(&mut self, pc: u32, delta: i32) {
        self.cfa_offset += delta;
        self.advance(pc);
        self.data.push(DW_CFA_DEF_CFA_OFFSET);
        self.uleb128(self.cfa_offset as u32);
    }

    /// Record that `reg` was saved `offset` bytes above the stack pointer.
    pub fn rel_offset(&mut self, pc: u32, reg: u8, offset: i32) {
        let factored = (offset - self.cfa_offset) / DATA_ALIGNMENT;
        debug_assert!(factored >= 0, "register saved above the CFA");
        self.advance(pc);
        self.data.push(DW_CFA_OFFSET | reg);
        self.uleb128(factored as u32);
    }

    /// The register's rule reverts to the one from the CIE.
    pub fn restore(&mut self, pc: u32, reg: u8) {
        debug_assert!(reg < 0x40);
        self.advance(pc);
        self.data.push(DW_CFA_RESTORE | reg);
    }

    pub fn def_cfa_register(&mut self, pc: u32, reg: u8) {
        self.advance(pc);
        self.data.push(DW_CFA_DEF_CFA_REGISTER);
        self.uleb128(reg as u32);
    }

    pub fn remember_state(&mut self, pc: u32) {
        self.advance(pc);
        self.saved_offsets.push(self.cfa_offset);
        self.data.push(DW_CFA_REMEMBER_STATE);
    }

    pub fn restore_state(&mut self, pc: u32) {
        self.advance(pc);
        if let Some(offset) = self.saved_offsets.pop() {
            self.cfa_offset = offset;
        }
        self.data.push(DW_CFA_RESTORE_STATE);
    }

    fn advance(&mut self, pc: u32) {
        let delta = pc - self.last_pc;
        self.last_pc = pc;
        if delta == 0 {
            return;
        }
        if delta < 0x40 {
            self.data.push(DW_CFA_ADVANCE_LOC | delta as u8);
        } else if delta < 0x100 {
            self.data.push(DW_CFA_ADVANCE_LOC1);
            self.data.push(delta as u8);
        } else if delta < 0x10000 {
            self.data.push(DW_CFA_ADVANCE_LOC2);
            self.data.extend_from_slice(&(delta as u16).to_le_bytes());
        } else {
            self.data.push(DW_CFA_ADVANCE_LOC4);
            self.data.extend_from_slice(&delta.to_le_bytes());
        }
    }

    fn uleb128(&mut self, mut value: u32) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.data.push(byte);
            if value == 0 {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_emits_def_cfa_offset() {
        let mut cfi = CfiStream::new();
        cfi.set_cfa_offset(4);
        cfi.adjust_cfa_offset(0, 12);
        assert_eq!(cfi.cfa_offset(), 16);
        assert_eq!(cfi.data(), &[DW_CFA_DEF_CFA_OFFSET, 16]);
    }

    #[test]
    fn test_advance_encodings() {
        let mut cfi = CfiStream::new();
        cfi.adjust_cfa_offset(5, 4);
        // advance_loc packs small deltas into the opcode byte.
        assert_eq!(cfi.data()[0], DW_CFA_ADVANCE_LOC | 5);
        cfi.adjust_cfa_offset(305, 4);
        // 300-byte delta needs the two-byte form.
        let tail = &cfi.data()[3..];
        assert_eq!(&tail[..3], &[DW_CFA_ADVANCE_LOC2, 44, 1]);
    }

    #[test]
    fn test_rel_offset_is_factored() {
        let mut cfi = CfiStream::new();
        cfi.set_cfa_offset(8);
        // EBP (register 5) saved at [esp], 8 bytes below the CFA.
        cfi.rel_offset(0, 5, 0);
        assert_eq!(cfi.data(), &[DW_CFA_OFFSET | 5, 2]);
    }

    #[test]
    fn test_remember_restore_round_trip() {
        let mut cfi = CfiStream::new();
        cfi.set_cfa_offset(32);
        cfi.remember_state(0);
        cfi.adjust_cfa_offset(4, -28);
        assert_eq!(cfi.cfa_offset(), 4);
        cfi.restore_state(8);
        assert_eq!(cfi.cfa_offset(), 32);
        assert_eq!(cfi.data().last(), Some(&DW_CFA_RESTORE_STATE));
    }

    #[test]
    fn test_uleb128_multi_byte() {
        let mut cfi = CfiStream::new();
        cfi.adjust_cfa_offset(0, 200);
        assert_eq!(cfi.data(), &[DW_CFA_DEF_CFA_OFFSET, 0xC8, 0x01]);
    }
}
