// This module provides byte-level x86-32 instruction encoding, serving as the
// machine code emission backend for the kestrel code generator. X86Assembler
// appends the exact bytes for each mnemonic the back end needs into an
// append-only buffer, manages labels for basic blocks and slow paths (forward
// references are recorded and back-patched on bind; near labels assert their
// 8-bit span), and owns the constant area: a region appended after the code
// holding deduplicated float/double/int32/int64 literals, referenced from the
// code via deferred fix-ups that rewrite the last 4 bytes of a previously
// emitted instruction once the area's final offset is known. Address supports
// base+displacement, base+index*scale+displacement, and absolute forms, and
// may carry a constant-area fix-up. Heap-reference poisoning helpers are
// conditional no-ops driven by a construction-time policy.

//! x86-32 instruction encoding and the constant area.

use crate::core::{CompileError, CompileResult};
use crate::x86::cfi::CfiStream;
use crate::x86::{Condition, Register, XmmRegister};
use hashbrown::HashMap;

/// Label handle. Created and bound through the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u32);

/// Label restricted to 8-bit branch displacements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NearLabel(u32);

#[derive(Debug, Default)]
struct LabelState {
    position: Option<u32>,
    /// Positions of 4-byte rel32 slots awaiting this label.
    fixups: Vec<u32>,
}

#[derive(Debug, Default)]
struct NearLabelState {
    position: Option<u32>,
    /// Positions of 1-byte rel8 slots awaiting this label.
    fixups: Vec<u32>,
}

/// Index scale of an addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleFactor {
    Times1 = 0,
    Times2 = 1,
    Times4 = 2,
    Times8 = 3,
}

impl ScaleFactor {
    /// Scale for an element of the given size.
    pub fn for_size(size: usize) -> ScaleFactor {
        match size {
            1 => ScaleFactor::Times1,
            2 => ScaleFactor::Times2,
            4 => ScaleFactor::Times4,
            8 => ScaleFactor::Times8,
            _ => unreachable!("invalid element size {size}"),
        }
    }
}

/// A memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    base: Option<Register>,
    index: Option<(Register, ScaleFactor)>,
    disp: i32,
    /// Set when `disp` is a constant-area offset to be rebased at
    /// finalisation time.
    constant_area_fixup: bool,
}

impl Address {
    pub fn displace(base: Register, disp: i32) -> Address {
        Address { base: Some(base), index: None, disp, constant_area_fixup: false }
    }

    pub fn indexed(base: Register, index: Register, scale: ScaleFactor, disp: i32) -> Address {
        debug_assert!(index != Register::ESP, "ESP cannot be an index register");
        Address { base: Some(base), index: Some((index, scale)), disp, constant_area_fixup: false }
    }

    pub fn absolute(disp: i32) -> Address {
        Address { base: None, index: None, disp, constant_area_fixup: false }
    }

    fn constant_area(base: Register, offset: i32) -> Address {
        Address { base: Some(base), index: None, disp: offset, constant_area_fixup: true }
    }
}

/// Deduplicated literal storage appended after the code.
#[derive(Default)]
struct ConstantArea {
    buffer: Vec<i32>,
    floats: HashMap<u32, usize>,
    doubles: HashMap<u64, usize>,
    int32s: HashMap<i32, usize>,
    int64s: HashMap<i64, usize>,
}

impl ConstantArea {
    fn size(&self) -> usize {
        self.buffer.len() * 4
    }

    fn add_float(&mut self, value: f32) -> i32 {
        let bits = value.to_bits();
        if let Some(&off) = self.floats.get(&bits) {
            return off as i32;
        }
        let off = self.size();
        self.buffer.push(bits as i32);
        self.floats.insert(bits, off);
        off as i32
    }

    fn add_double(&mut self, value: f64) -> i32 {
        let bits = value.to_bits();
        if let Some(&off) = self.doubles.get(&bits) {
            return off as i32;
        }
        // Doubles are kept 8-byte aligned within the area.
        if self.size() % 8 != 0 {
            self.buffer.push(0);
        }
        let off = self.size();
        self.buffer.push(bits as i32);
        self.buffer.push((bits >> 32) as i32);
        self.doubles.insert(bits, off);
        off as i32
    }

    fn add_int32(&mut self, value: i32) -> i32 {
        if let Some(&off) = self.int32s.get(&value) {
            return off as i32;
        }
        let off = self.size();
        self.buffer.push(value);
        self.int32s.insert(value, off);
        off as i32
    }

    fn add_int64(&mut self, value: i64) -> i32 {
        if let Some(&off) = self.int64s.get(&value) {
            return off as i32;
        }
        if self.size() % 8 != 0 {
            self.buffer.push(0);
        }
        let off = self.size();
        self.buffer.push(value as i32);
        self.buffer.push((value >> 32) as i32);
        self.int64s.insert(value, off);
        off as i32
    }

    /// Reserve zeroed 4-byte entries (jump tables), returning their offset.
    fn reserve(&mut self, entries: usize) -> i32 {
        let off = self.size();
        self.buffer.extend(std::iter::repeat(0).take(entries));
        off as i32
    }
}

/// The x86-32 assembler.
pub struct X86Assembler {
    buffer: Vec<u8>,
    labels: Vec<LabelState>,
    near_labels: Vec<NearLabelState>,
    constant_area: ConstantArea,
    /// Positions of disp32 slots that must be rebased by the constant-area
    /// start offset at finalisation.
    constant_fixups: Vec<u32>,
    /// Whether references are stored poisoned (bitwise negated) in the heap.
    poison_references: bool,
    /// Unwinder directives tracking every stack-pointer change.
    cfi: CfiStream,
}

impl X86Assembler {
    pub fn new(poison_references: bool) -> Self {
        Self {
            buffer: Vec::new(),
            labels: Vec::new(),
            near_labels: Vec::new(),
            constant_area: ConstantArea::default(),
            constant_fixups: Vec::new(),
            poison_references,
            cfi: CfiStream::new(),
        }
    }

    pub fn code_size(&self) -> usize {
        self.buffer.len()
    }

    /// Hand back the finished byte buffer.
    pub fn finalize(self) -> Vec<u8> {
        self.buffer
    }

    pub fn code(&self) -> &[u8] {
        &self.buffer
    }

    // === Call-frame information ===========================================
    //
    // Directives apply at the current code offset; callers record them right
    // after the push/pop/ESP instruction they describe. DWARF register
    // numbers on x86-32 equal the hardware encodings.

    /// Reset the tracked CFA offset without emitting a directive.
    pub fn cfi_set_cfa_offset(&mut self, offset: i32) {
        self.cfi.set_cfa_offset(offset);
    }

    pub fn cfi_adjust_cfa_offset(&mut self, delta: i32) {
        let pc = self.buffer.len() as u32;
        self.cfi.adjust_cfa_offset(pc, delta);
    }

    /// Register saved `offset` bytes above the current stack pointer.
    pub fn cfi_rel_offset(&mut self, reg: Register, offset: i32) {
        let pc = self.buffer.len() as u32;
        self.cfi.rel_offset(pc, reg.encoding(), offset);
    }

    pub fn cfi_restore(&mut self, reg: Register) {
        let pc = self.buffer.len() as u32;
        self.cfi.restore(pc, reg.encoding());
    }

    pub fn cfi_remember_state(&mut self) {
        let pc = self.buffer.len() as u32;
        self.cfi.remember_state(pc);
    }

    pub fn cfi_restore_state(&mut self) {
        let pc = self.buffer.len() as u32;
        self.cfi.restore_state(pc);
    }

    pub fn cfi_cfa_offset(&self) -> i32 {
        self.cfi.cfa_offset()
    }

    pub fn cfi_data(&self) -> &[u8] {
        self.cfi.data()
    }

    // === Raw emission =====================================================

    fn emit_u8(&mut self, byte: u8) {
        self.buffer.push(byte);
    }

    fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Patch a 32-bit little-endian slot in already emitted code.
    pub fn patch_i32_at(&mut self, position: usize, value: i32) {
        self.buffer[position..position + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn read_i32_at(&self, position: usize) -> i32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.buffer[position..position + 4]);
        i32::from_le_bytes(bytes)
    }

    fn modrm(&mut self, mode: u8, reg: u8, rm: u8) {
        self.emit_u8((mode << 6) | (reg << 3) | rm);
    }

    fn sib(&mut self, scale: u8, index: u8, base: u8) {
        self.emit_u8((scale << 6) | (index << 3) | base);
    }

    /// Emit a register operand (mod = 3).
    fn emit_register_operand(&mut self, reg: u8, rm: u8) {
        self.modrm(3, reg, rm);
    }

    /// Emit a ModRM byte plus SIB/displacement for a memory operand.
    fn emit_memory_operand(&mut self, reg: u8, addr: Address) {
        let force_disp32 = addr.constant_area_fixup;
        match (addr.base, addr.index) {
            (None, None) => {
                // Absolute: mod=00, rm=101, disp32.
                self.modrm(0, reg, 5);
                self.emit_disp32(addr);
            }
            (None, Some((index, scale))) => {
                // Index without base: mod=00, rm=100, SIB base=101, disp32.
                self.modrm(0, reg, 4);
                self.sib(scale as u8, index.encoding(), 5);
                self.emit_disp32(addr);
            }
            (Some(base), index) => {
                let needs_sib = index.is_some() || base == Register::ESP;
                let (mode, short) = if force_disp32 {
                    (2, false)
                } else if addr.disp == 0 && base != Register::EBP {
                    (0, true)
                } else if addr.disp >= -128 && addr.disp <= 127 {
                    (1, true)
                } else {
                    (2, false)
                };
                if needs_sib {
                    self.modrm(mode, reg, 4);
                    let (index_enc, scale) = match index {
                        Some((idx, sc)) => (idx.encoding(), sc as u8),
                        None => (4, 0),
                    };
                    self.sib(scale, index_enc, base.encoding());
                } else {
                    self.modrm(mode, reg, base.encoding());
                }
                match mode {
                    0 => {}
                    1 if short => self.emit_u8(addr.disp as u8),
                    _ => self.emit_disp32(addr),
                }
            }
        }
    }

    fn emit_disp32(&mut self, addr: Address) {
        if addr.constant_area_fixup {
            self.constant_fixups.push(self.buffer.len() as u32);
        }
        self.emit_i32(addr.disp);
    }

    // === Labels ===========================================================

    pub fn create_label(&mut self) -> Label {
        let id = self.labels.len() as u32;
        self.labels.push(LabelState::default());
        Label(id)
    }

    pub fn create_near_label(&mut self) -> NearLabel {
        let id = self.near_labels.len() as u32;
        self.near_labels.push(NearLabelState::default());
        NearLabel(id)
    }

    /// Resolve a label to the current offset and back-patch forward branches.
    pub fn bind(&mut self, label: Label) {
        let position = self.buffer.len() as u32;
        let fixups = {
            let state = &mut self.labels[label.0 as usize];
            debug_assert!(state.position.is_none(), "label bound twice");
            state.position = Some(position);
            std::mem::take(&mut state.fixups)
        };
        for slot in fixups {
            let rel = position as i32 - (slot as i32 + 4);
            self.patch_i32_at(slot as usize, rel);
        }
    }

    /// Bind a near label, asserting every recorded span fits 8 bits.
    pub fn bind_near(&mut self, label: NearLabel) -> CompileResult<()> {
        let position = self.buffer.len() as u32;
        let fixups = {
            let state = &mut self.near_labels[label.0 as usize];
            debug_assert!(state.position.is_none(), "near label bound twice");
            state.position = Some(position);
            std::mem::take(&mut state.fixups)
        };
        for slot in fixups {
            let rel = position as i32 - (slot as i32 + 1);
            if rel < -128 || rel > 127 {
                return Err(CompileError::NearBranchOutOfRange { displacement: rel });
            }
            self.buffer[slot as usize] = rel as u8;
        }
        Ok(())
    }

    pub fn is_bound(&self, label: Label) -> bool {
        self.labels[label.0 as usize].position.is_some()
    }

    /// Code offset of a bound label.
    pub fn label_position(&self, label: Label) -> u32 {
        self.labels[label.0 as usize]
            .position
            .expect("label queried before binding")
    }

    fn emit_label_rel32(&mut self, label: Label) {
        match self.labels[label.0 as usize].position {
            Some(target) => {
                let rel = target as i32 - (self.buffer.len() as i32 + 4);
                self.emit_i32(rel);
            }
            None => {
                let slot = self.buffer.len() as u32;
                self.labels[label.0 as usize].fixups.push(slot);
                self.emit_i32(0);
            }
        }
    }

    fn emit_near_label_rel8(&mut self, label: NearLabel) -> CompileResult<()> {
        match self.near_labels[label.0 as usize].position {
            Some(target) => {
                let rel = target as i32 - (self.buffer.len() as i32 + 1);
                if rel < -128 || rel > 127 {
                    return Err(CompileError::NearBranchOutOfRange { displacement: rel });
                }
                self.emit_u8(rel as u8);
            }
            None => {
                let slot = self.buffer.len() as u32;
                self.near_labels[label.0 as usize].fixups.push(slot);
                self.emit_u8(0);
            }
        }
        Ok(())
    }

    // === Constant area ====================================================

    /// Address of a float literal relative to the method base register.
    pub fn literal_float_address(&mut self, value: f32, base: Register) -> Address {
        let off = self.constant_area.add_float(value);
        Address::constant_area(base, off)
    }

    pub fn literal_double_address(&mut self, value: f64, base: Register) -> Address {
        let off = self.constant_area.add_double(value);
        Address::constant_area(base, off)
    }

    pub fn literal_int32_address(&mut self, value: i32, base: Register) -> Address {
        let off = self.constant_area.add_int32(value);
        Address::constant_area(base, off)
    }

    /// Address of the low word of an int64 literal. The high word follows.
    pub fn literal_int64_address(&mut self, value: i64, base: Register) -> Address {
        let off = self.constant_area.add_int64(value);
        Address::constant_area(base, off)
    }

    /// Address of the high word of an int64 literal.
    pub fn literal_int64_high_address(&mut self, value: i64, base: Register) -> Address {
        let off = self.constant_area.add_int64(value);
        Address::constant_area(base, off + 4)
    }

    /// Reserve a zeroed jump table in the constant area; returns its offset.
    pub fn reserve_jump_table(&mut self, entries: usize) -> i32 {
        self.constant_area.reserve(entries)
    }

    /// Address of a previously reserved constant-area region.
    pub fn constant_area_address(&self, offset: i32, base: Register) -> Address {
        Address::constant_area(base, offset)
    }

    /// Indexed address into a reserved constant-area region (jump tables).
    pub fn constant_area_indexed_address(
        &self,
        offset: i32,
        base: Register,
        index: Register,
        scale: ScaleFactor,
    ) -> Address {
        debug_assert!(index != Register::ESP, "ESP cannot be an index register");
        Address {
            base: Some(base),
            index: Some((index, scale)),
            disp: offset,
            constant_area_fixup: true,
        }
    }

    pub fn constant_area_size(&self) -> usize {
        self.constant_area.size()
    }

    pub fn is_constant_area_empty(&self) -> bool {
        self.constant_area.size() == 0
    }

    /// Append the constant area and run the deferred fix-ups. Returns the
    /// code offset where the area begins.
    pub fn add_constant_area(&mut self) -> usize {
        self.align(4, 0x90);
        let start = self.buffer.len();
        let words = std::mem::take(&mut self.constant_area.buffer);
        for word in words {
            self.emit_i32(word);
        }
        let fixups = std::mem::take(&mut self.constant_fixups);
        for slot in fixups {
            let literal_offset = self.read_i32_at(slot as usize);
            self.patch_i32_at(slot as usize, start as i32 + literal_offset);
        }
        start
    }

    /// Pad with `fill` until the buffer size is a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize, fill: u8) {
        while self.buffer.len() % alignment != 0 {
            self.emit_u8(fill);
        }
    }

    // === Heap-reference poisoning =========================================

    pub fn poison_heap_reference(&mut self, reg: Register) {
        self.negl(reg);
    }

    pub fn unpoison_heap_reference(&mut self, reg: Register) {
        self.negl(reg);
    }

    pub fn maybe_poison_heap_reference(&mut self, reg: Register) {
        if self.poison_references {
            self.poison_heap_reference(reg);
        }
    }

    pub fn maybe_unpoison_heap_reference(&mut self, reg: Register) {
        if self.poison_references {
            self.unpoison_heap_reference(reg);
        }
    }

    pub fn poisons_references(&self) -> bool {
        self.poison_references
    }

    // === Moves ============================================================

    pub fn movl_reg_reg(&mut self, dst: Register, src: Register) {
        self.emit_u8(0x89);
        self.emit_register_operand(src.encoding(), dst.encoding());
    }

    pub fn movl_reg_imm(&mut self, dst: Register, imm: i32) {
        self.emit_u8(0xB8 + dst.encoding());
        self.emit_i32(imm);
    }

    pub fn movl_reg_mem(&mut self, dst: Register, src: Address) {
        self.emit_u8(0x8B);
        self.emit_memory_operand(dst.encoding(), src);
    }

    pub fn movl_mem_reg(&mut self, dst: Address, src: Register) {
        self.emit_u8(0x89);
        self.emit_memory_operand(src.encoding(), dst);
    }

    pub fn movl_mem_imm(&mut self, dst: Address, imm: i32) {
        self.emit_u8(0xC7);
        self.emit_memory_operand(0, dst);
        self.emit_i32(imm);
    }

    pub fn movb_mem_reg(&mut self, dst: Address, src: Register) {
        debug_assert!(src.is_byte_register(), "byte store needs AL/BL/CL/DL");
        self.emit_u8(0x88);
        self.emit_memory_operand(src.encoding(), dst);
    }

    pub fn movb_mem_imm(&mut self, dst: Address, imm: i8) {
        self.emit_u8(0xC6);
        self.emit_memory_operand(0, dst);
        self.emit_u8(imm as u8);
    }

    pub fn movw_mem_reg(&mut self, dst: Address, src: Register) {
        self.emit_u8(0x66);
        self.emit_u8(0x89);
        self.emit_memory_operand(src.encoding(), dst);
    }

    pub fn movw_mem_imm(&mut self, dst: Address, imm: i16) {
        self.emit_u8(0x66);
        self.emit_u8(0xC7);
        self.emit_memory_operand(0, dst);
        self.emit_u16(imm as u16);
    }

    pub fn movsxb_reg_mem(&mut self, dst: Register, src: Address) {
        self.emit_u8(0x0F);
        self.emit_u8(0xBE);
        self.emit_memory_operand(dst.encoding(), src);
    }

    pub fn movsxb_reg_reg(&mut self, dst: Register, src: Register) {
        debug_assert!(src.is_byte_register());
        self.emit_u8(0x0F);
        self.emit_u8(0xBE);
        self.emit_register_operand(dst.encoding(), src.encoding());
    }

    pub fn movzxb_reg_mem(&mut self, dst: Register, src: Address) {
        self.emit_u8(0x0F);
        self.emit_u8(0xB6);
        self.emit_memory_operand(dst.encoding(), src);
    }

    pub fn movzxb_reg_reg(&mut self, dst: Register, src: Register) {
        debug_assert!(src.is_byte_register());
        self.emit_u8(0x0F);
        self.emit_u8(0xB6);
        self.emit_register_operand(dst.encoding(), src.encoding());
    }

    pub fn movsxw_reg_mem(&mut self, dst: Register, src: Address) {
        self.emit_u8(0x0F);
        self.emit_u8(0xBF);
        self.emit_memory_operand(dst.encoding(), src);
    }

    pub fn movsxw_reg_reg(&mut self, dst: Register, src: Register) {
        self.emit_u8(0x0F);
        self.emit_u8(0xBF);
        self.emit_register_operand(dst.encoding(), src.encoding());
    }

    pub fn movzxw_reg_mem(&mut self, dst: Register, src: Address) {
        self.emit_u8(0x0F);
        self.emit_u8(0xB7);
        self.emit_memory_operand(dst.encoding(), src);
    }

    pub fn movzxw_reg_reg(&mut self, dst: Register, src: Register) {
        self.emit_u8(0x0F);
        self.emit_u8(0xB7);
        self.emit_register_operand(dst.encoding(), src.encoding());
    }

    pub fn leal(&mut self, dst: Register, src: Address) {
        self.emit_u8(0x8D);
        self.emit_memory_operand(dst.encoding(), src);
    }

    pub fn xchgl_reg_reg(&mut self, a: Register, b: Register) {
        self.emit_u8(0x87);
        self.emit_register_operand(a.encoding(), b.encoding());
    }

    pub fn xchgl_reg_mem(&mut self, reg: Register, mem: Address) {
        self.emit_u8(0x87);
        self.emit_memory_operand(reg.encoding(), mem);
    }

    // === Stack ============================================================

    pub fn pushl_reg(&mut self, reg: Register) {
        self.emit_u8(0x50 + reg.encoding());
    }

    pub fn pushl_imm(&mut self, imm: i32) {
        if imm >= -128 && imm <= 127 {
            self.emit_u8(0x6A);
            self.emit_u8(imm as u8);
        } else {
            self.emit_u8(0x68);
            self.emit_i32(imm);
        }
    }

    pub fn pushl_mem(&mut self, mem: Address) {
        self.emit_u8(0xFF);
        self.emit_memory_operand(6, mem);
    }

    pub fn popl_reg(&mut self, reg: Register) {
        self.emit_u8(0x58 + reg.encoding());
    }

    pub fn popl_mem(&mut self, mem: Address) {
        self.emit_u8(0x8F);
        self.emit_memory_operand(0, mem);
    }

    // === ALU ==============================================================

    fn alu_reg_reg(&mut self, opcode: u8, dst: Register, src: Register) {
        self.emit_u8(opcode);
        self.emit_register_operand(src.encoding(), dst.encoding());
    }

    fn alu_reg_imm(&mut self, modrm_opcode: u8, dst: Register, imm: i32) {
        if imm >= -128 && imm <= 127 {
            self.emit_u8(0x83);
            self.emit_register_operand(modrm_opcode, dst.encoding());
            self.emit_u8(imm as u8);
        } else {
            self.emit_u8(0x81);
            self.emit_register_operand(modrm_opcode, dst.encoding());
            self.emit_i32(imm);
        }
    }

    fn alu_reg_mem(&mut self, opcode: u8, dst: Register, src: Address) {
        self.emit_u8(opcode);
        self.emit_memory_operand(dst.encoding(), src);
    }

    fn alu_mem_reg(&mut self, opcode: u8, dst: Address, src: Register) {
        self.emit_u8(opcode);
        self.emit_memory_operand(src.encoding(), dst);
    }

    pub fn addl_reg_reg(&mut self, dst: Register, src: Register) {
        self.alu_reg_reg(0x01, dst, src);
    }

    pub fn addl_reg_imm(&mut self, dst: Register, imm: i32) {
        self.alu_reg_imm(0, dst, imm);
    }

    pub fn addl_reg_mem(&mut self, dst: Register, src: Address) {
        self.alu_reg_mem(0x03, dst, src);
    }

    pub fn addl_mem_reg(&mut self, dst: Address, src: Register) {
        self.alu_mem_reg(0x01, dst, src);
    }

    pub fn adcl_reg_reg(&mut self, dst: Register, src: Register) {
        self.alu_reg_reg(0x11, dst, src);
    }

    pub fn adcl_reg_imm(&mut self, dst: Register, imm: i32) {
        self.alu_reg_imm(2, dst, imm);
    }

    pub fn adcl_reg_mem(&mut self, dst: Register, src: Address) {
        self.alu_reg_mem(0x13, dst, src);
    }

    pub fn subl_reg_reg(&mut self, dst: Register, src: Register) {
        self.alu_reg_reg(0x29, dst, src);
    }

    pub fn subl_reg_imm(&mut self, dst: Register, imm: i32) {
        self.alu_reg_imm(5, dst, imm);
    }

    pub fn subl_reg_mem(&mut self, dst: Register, src: Address) {
        self.alu_reg_mem(0x2B, dst, src);
    }

    pub fn sbbl_reg_reg(&mut self, dst: Register, src: Register) {
        self.alu_reg_reg(0x19, dst, src);
    }

    pub fn sbbl_reg_imm(&mut self, dst: Register, imm: i32) {
        self.alu_reg_imm(3, dst, imm);
    }

    pub fn sbbl_reg_mem(&mut self, dst: Register, src: Address) {
        self.alu_reg_mem(0x1B, dst, src);
    }

    pub fn andl_reg_reg(&mut self, dst: Register, src: Register) {
        self.alu_reg_reg(0x21, dst, src);
    }

    pub fn andl_reg_imm(&mut self, dst: Register, imm: i32) {
        self.alu_reg_imm(4, dst, imm);
    }

    pub fn andl_reg_mem(&mut self, dst: Register, src: Address) {
        self.alu_reg_mem(0x23, dst, src);
    }

    pub fn orl_reg_reg(&mut self, dst: Register, src: Register) {
        self.alu_reg_reg(0x09, dst, src);
    }

    pub fn orl_reg_imm(&mut self, dst: Register, imm: i32) {
        self.alu_reg_imm(1, dst, imm);
    }

    pub fn orl_reg_mem(&mut self, dst: Register, src: Address) {
        self.alu_reg_mem(0x0B, dst, src);
    }

    pub fn xorl_reg_reg(&mut self, dst: Register, src: Register) {
        self.alu_reg_reg(0x31, dst, src);
    }

    pub fn xorl_reg_imm(&mut self, dst: Register, imm: i32) {
        self.alu_reg_imm(6, dst, imm);
    }

    pub fn xorl_reg_mem(&mut self, dst: Register, src: Address) {
        self.alu_reg_mem(0x33, dst, src);
    }

    pub fn cmpl_reg_reg(&mut self, lhs: Register, rhs: Register) {
        self.alu_reg_reg(0x39, lhs, rhs);
    }

    pub fn cmpl_reg_imm(&mut self, lhs: Register, imm: i32) {
        self.alu_reg_imm(7, lhs, imm);
    }

    pub fn cmpl_reg_mem(&mut self, lhs: Register, rhs: Address) {
        self.alu_reg_mem(0x3B, lhs, rhs);
    }

    pub fn cmpl_mem_reg(&mut self, lhs: Address, rhs: Register) {
        self.alu_mem_reg(0x39, lhs, rhs);
    }

    pub fn cmpl_mem_imm(&mut self, lhs: Address, imm: i32) {
        if imm >= -128 && imm <= 127 {
            self.emit_u8(0x83);
            self.emit_memory_operand(7, lhs);
            self.emit_u8(imm as u8);
        } else {
            self.emit_u8(0x81);
            self.emit_memory_operand(7, lhs);
            self.emit_i32(imm);
        }
    }

    pub fn cmpb_mem_imm(&mut self, lhs: Address, imm: i8) {
        self.emit_u8(0x80);
        self.emit_memory_operand(7, lhs);
        self.emit_u8(imm as u8);
    }

    pub fn cmpw_mem_imm(&mut self, lhs: Address, imm: i16) {
        self.emit_u8(0x66);
        self.emit_u8(0x81);
        self.emit_memory_operand(7, lhs);
        self.emit_u16(imm as u16);
    }

    pub fn testl_reg_reg(&mut self, a: Register, b: Register) {
        self.emit_u8(0x85);
        self.emit_register_operand(b.encoding(), a.encoding());
    }

    pub fn testl_reg_imm(&mut self, reg: Register, imm: i32) {
        self.emit_u8(0xF7);
        self.emit_register_operand(0, reg.encoding());
        self.emit_i32(imm);
    }

    pub fn testl_reg_mem(&mut self, reg: Register, mem: Address) {
        self.emit_u8(0x85);
        self.emit_memory_operand(reg.encoding(), mem);
    }

    pub fn testl_mem_imm(&mut self, mem: Address, imm: i32) {
        self.emit_u8(0xF7);
        self.emit_memory_operand(0, mem);
        self.emit_i32(imm);
    }

    pub fn testb_mem_imm(&mut self, mem: Address, imm: i8) {
        self.emit_u8(0xF6);
        self.emit_memory_operand(0, mem);
        self.emit_u8(imm as u8);
    }

    pub fn addw_mem_imm(&mut self, mem: Address, imm: i16) {
        self.emit_u8(0x66);
        self.emit_u8(0x81);
        self.emit_memory_operand(0, mem);
        self.emit_u16(imm as u16);
    }

    // === Multiply / divide / unary ========================================

    pub fn imull_reg_reg(&mut self, dst: Register, src: Register) {
        self.emit_u8(0x0F);
        self.emit_u8(0xAF);
        self.emit_register_operand(dst.encoding(), src.encoding());
    }

    pub fn imull_reg_mem(&mut self, dst: Register, src: Address) {
        self.emit_u8(0x0F);
        self.emit_u8(0xAF);
        self.emit_memory_operand(dst.encoding(), src);
    }

    pub fn imull_reg_reg_imm(&mut self, dst: Register, src: Register, imm: i32) {
        if imm >= -128 && imm <= 127 {
            self.emit_u8(0x6B);
            self.emit_register_operand(dst.encoding(), src.encoding());
            self.emit_u8(imm as u8);
        } else {
            self.emit_u8(0x69);
            self.emit_register_operand(dst.encoding(), src.encoding());
            self.emit_i32(imm);
        }
    }

    /// EDX:EAX = EAX * reg (signed widening).
    pub fn imull_reg(&mut self, reg: Register) {
        self.emit_u8(0xF7);
        self.emit_register_operand(5, reg.encoding());
    }

    /// EDX:EAX = EAX * reg (unsigned widening).
    pub fn mull_reg(&mut self, reg: Register) {
        self.emit_u8(0xF7);
        self.emit_register_operand(4, reg.encoding());
    }

    /// EAX = EDX:EAX / reg, EDX = remainder (signed).
    pub fn idivl_reg(&mut self, reg: Register) {
        self.emit_u8(0xF7);
        self.emit_register_operand(7, reg.encoding());
    }

    /// Unsigned division of EDX:EAX.
    pub fn divl_reg(&mut self, reg: Register) {
        self.emit_u8(0xF7);
        self.emit_register_operand(6, reg.encoding());
    }

    pub fn negl(&mut self, reg: Register) {
        self.emit_u8(0xF7);
        self.emit_register_operand(3, reg.encoding());
    }

    pub fn notl(&mut self, reg: Register) {
        self.emit_u8(0xF7);
        self.emit_register_operand(2, reg.encoding());
    }

    /// Sign-extend EAX into EDX.
    pub fn cdq(&mut self) {
        self.emit_u8(0x99);
    }

    // === Shifts ===========================================================

    fn shift_reg_imm(&mut self, modrm_opcode: u8, reg: Register, imm: u8) {
        if imm == 1 {
            self.emit_u8(0xD1);
            self.emit_register_operand(modrm_opcode, reg.encoding());
        } else {
            self.emit_u8(0xC1);
            self.emit_register_operand(modrm_opcode, reg.encoding());
            self.emit_u8(imm);
        }
    }

    fn shift_reg_cl(&mut self, modrm_opcode: u8, reg: Register) {
        self.emit_u8(0xD3);
        self.emit_register_operand(modrm_opcode, reg.encoding());
    }

    pub fn shll_reg_imm(&mut self, reg: Register, imm: u8) {
        self.shift_reg_imm(4, reg, imm);
    }

    pub fn shll_reg_cl(&mut self, reg: Register) {
        self.shift_reg_cl(4, reg);
    }

    pub fn shrl_reg_imm(&mut self, reg: Register, imm: u8) {
        self.shift_reg_imm(5, reg, imm);
    }

    pub fn shrl_reg_cl(&mut self, reg: Register) {
        self.shift_reg_cl(5, reg);
    }

    pub fn sarl_reg_imm(&mut self, reg: Register, imm: u8) {
        self.shift_reg_imm(7, reg, imm);
    }

    pub fn sarl_reg_cl(&mut self, reg: Register) {
        self.shift_reg_cl(7, reg);
    }

    pub fn roll_reg_imm(&mut self, reg: Register, imm: u8) {
        self.shift_reg_imm(0, reg, imm);
    }

    pub fn roll_reg_cl(&mut self, reg: Register) {
        self.shift_reg_cl(0, reg);
    }

    pub fn rorl_reg_imm(&mut self, reg: Register, imm: u8) {
        self.shift_reg_imm(1, reg, imm);
    }

    pub fn rorl_reg_cl(&mut self, reg: Register) {
        self.shift_reg_cl(1, reg);
    }

    /// Shift dst left, filling from src; count in CL.
    pub fn shld_reg_reg_cl(&mut self, dst: Register, src: Register) {
        self.emit_u8(0x0F);
        self.emit_u8(0xA5);
        self.emit_register_operand(src.encoding(), dst.encoding());
    }

    /// Shift dst right, filling from src; count in CL.
    pub fn shrd_reg_reg_cl(&mut self, dst: Register, src: Register) {
        self.emit_u8(0x0F);
        self.emit_u8(0xAD);
        self.emit_register_operand(src.encoding(), dst.encoding());
    }

    pub fn shld_reg_reg_imm(&mut self, dst: Register, src: Register, imm: u8) {
        self.emit_u8(0x0F);
        self.emit_u8(0xA4);
        self.emit_register_operand(src.encoding(), dst.encoding());
        self.emit_u8(imm);
    }

    pub fn shrd_reg_reg_imm(&mut self, dst: Register, src: Register, imm: u8) {
        self.emit_u8(0x0F);
        self.emit_u8(0xAC);
        self.emit_register_operand(src.encoding(), dst.encoding());
        self.emit_u8(imm);
    }

    // === Conditionals =====================================================

    pub fn setb(&mut self, cond: Condition, dst: Register) {
        debug_assert!(dst.is_byte_register(), "setcc needs AL/BL/CL/DL");
        self.emit_u8(0x0F);
        self.emit_u8(0x90 + cond.encoding());
        self.emit_register_operand(0, dst.encoding());
    }

    pub fn cmovl_reg_reg(&mut self, cond: Condition, dst: Register, src: Register) {
        self.emit_u8(0x0F);
        self.emit_u8(0x40 + cond.encoding());
        self.emit_register_operand(dst.encoding(), src.encoding());
    }

    pub fn cmovl_reg_mem(&mut self, cond: Condition, dst: Register, src: Address) {
        self.emit_u8(0x0F);
        self.emit_u8(0x40 + cond.encoding());
        self.emit_memory_operand(dst.encoding(), src);
    }

    // === Control flow =====================================================

    pub fn jmp_label(&mut self, label: Label) {
        self.emit_u8(0xE9);
        self.emit_label_rel32(label);
    }

    pub fn jmp_near(&mut self, label: NearLabel) -> CompileResult<()> {
        self.emit_u8(0xEB);
        self.emit_near_label_rel8(label)
    }

    pub fn jmp_reg(&mut self, reg: Register) {
        self.emit_u8(0xFF);
        self.emit_register_operand(4, reg.encoding());
    }

    pub fn j(&mut self, cond: Condition, label: Label) {
        self.emit_u8(0x0F);
        self.emit_u8(0x80 + cond.encoding());
        self.emit_label_rel32(label);
    }

    pub fn j_near(&mut self, cond: Condition, label: NearLabel) -> CompileResult<()> {
        self.emit_u8(0x70 + cond.encoding());
        self.emit_near_label_rel8(label)
    }

    pub fn call_label(&mut self, label: Label) {
        self.emit_u8(0xE8);
        self.emit_label_rel32(label);
    }

    pub fn call_reg(&mut self, reg: Register) {
        self.emit_u8(0xFF);
        self.emit_register_operand(2, reg.encoding());
    }

    pub fn call_mem(&mut self, mem: Address) {
        self.emit_u8(0xFF);
        self.emit_memory_operand(2, mem);
    }

    /// `call rel32` with a zero displacement: the landmark that materializes
    /// the method base address together with the following pop.
    pub fn call_next_instruction(&mut self) {
        self.emit_u8(0xE8);
        self.emit_i32(0);
    }

    /// fs segment override, used for thread-local runtime accesses.
    pub fn fs_prefix(&mut self) {
        self.emit_u8(0x64);
    }

    pub fn ret(&mut self) {
        self.emit_u8(0xC3);
    }

    pub fn ret_imm16(&mut self, imm: u16) {
        self.emit_u8(0xC2);
        self.emit_u16(imm);
    }

    pub fn nop(&mut self) {
        self.emit_u8(0x90);
    }

    pub fn int3(&mut self) {
        self.emit_u8(0xCC);
    }

    pub fn mfence(&mut self) {
        self.emit_u8(0x0F);
        self.emit_u8(0xAE);
        self.emit_u8(0xF0);
    }

    pub fn rdtsc(&mut self) {
        self.emit_u8(0x0F);
        self.emit_u8(0x31);
    }

    pub fn lock_cmpxchgl(&mut self, mem: Address, src: Register) {
        self.emit_u8(0xF0);
        self.emit_u8(0x0F);
        self.emit_u8(0xB1);
        self.emit_memory_operand(src.encoding(), mem);
    }

    // === SSE ==============================================================

    fn sse_prefix_op(&mut self, prefix: Option<u8>, opcode: u8, reg: u8, operand: SseOperand) {
        if let Some(p) = prefix {
            self.emit_u8(p);
        }
        self.emit_u8(0x0F);
        self.emit_u8(opcode);
        match operand {
            SseOperand::Reg(rm) => self.emit_register_operand(reg, rm),
            SseOperand::Mem(addr) => self.emit_memory_operand(reg, addr),
        }
    }

    pub fn movss_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(Some(0xF3), 0x10, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn movss_mem_reg(&mut self, dst: Address, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF3), 0x11, src.encoding(), SseOperand::Mem(dst));
    }

    pub fn movss_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF3), 0x10, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn movsd_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(Some(0xF2), 0x10, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn movsd_mem_reg(&mut self, dst: Address, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF2), 0x11, src.encoding(), SseOperand::Mem(dst));
    }

    pub fn movsd_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF2), 0x10, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn movaps_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(None, 0x28, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn movups_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(None, 0x10, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn movups_mem_reg(&mut self, dst: Address, src: XmmRegister) {
        self.sse_prefix_op(None, 0x11, src.encoding(), SseOperand::Mem(dst));
    }

    pub fn movd_xmm_reg(&mut self, dst: XmmRegister, src: Register) {
        self.sse_prefix_op(Some(0x66), 0x6E, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn movd_reg_xmm(&mut self, dst: Register, src: XmmRegister) {
        self.sse_prefix_op(Some(0x66), 0x7E, src.encoding(), SseOperand::Reg(dst.encoding()));
    }

    pub fn punpckldq_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0x66), 0x62, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn psrlq_reg_imm(&mut self, reg: XmmRegister, shift: u8) {
        self.emit_u8(0x66);
        self.emit_u8(0x0F);
        self.emit_u8(0x73);
        self.emit_register_operand(2, reg.encoding());
        self.emit_u8(shift);
    }

    pub fn psrldq_reg_imm(&mut self, reg: XmmRegister, shift: u8) {
        self.emit_u8(0x66);
        self.emit_u8(0x0F);
        self.emit_u8(0x73);
        self.emit_register_operand(3, reg.encoding());
        self.emit_u8(shift);
    }

    pub fn addss_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF3), 0x58, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn addss_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(Some(0xF3), 0x58, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn addsd_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF2), 0x58, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn addsd_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(Some(0xF2), 0x58, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn subss_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF3), 0x5C, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn subss_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(Some(0xF3), 0x5C, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn subsd_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF2), 0x5C, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn subsd_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(Some(0xF2), 0x5C, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn mulss_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF3), 0x59, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn mulss_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(Some(0xF3), 0x59, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn mulsd_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF2), 0x59, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn mulsd_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(Some(0xF2), 0x59, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn divss_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF3), 0x5E, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn divss_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(Some(0xF3), 0x5E, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn divsd_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF2), 0x5E, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn divsd_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(Some(0xF2), 0x5E, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn xorps_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(None, 0x57, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn xorps_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(None, 0x57, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn xorpd_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0x66), 0x57, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn xorpd_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(Some(0x66), 0x57, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn andps_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(None, 0x54, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn andps_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(None, 0x54, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn andpd_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0x66), 0x54, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn andpd_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(Some(0x66), 0x54, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn orpd_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0x66), 0x56, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn orps_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(None, 0x56, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn ucomiss_reg_reg(&mut self, a: XmmRegister, b: XmmRegister) {
        self.sse_prefix_op(None, 0x2E, a.encoding(), SseOperand::Reg(b.encoding()));
    }

    pub fn ucomiss_reg_mem(&mut self, a: XmmRegister, b: Address) {
        self.sse_prefix_op(None, 0x2E, a.encoding(), SseOperand::Mem(b));
    }

    pub fn ucomisd_reg_reg(&mut self, a: XmmRegister, b: XmmRegister) {
        self.sse_prefix_op(Some(0x66), 0x2E, a.encoding(), SseOperand::Reg(b.encoding()));
    }

    pub fn ucomisd_reg_mem(&mut self, a: XmmRegister, b: Address) {
        self.sse_prefix_op(Some(0x66), 0x2E, a.encoding(), SseOperand::Mem(b));
    }

    pub fn cvtsi2ss_reg_reg(&mut self, dst: XmmRegister, src: Register) {
        self.sse_prefix_op(Some(0xF3), 0x2A, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn cvtsi2sd_reg_reg(&mut self, dst: XmmRegister, src: Register) {
        self.sse_prefix_op(Some(0xF2), 0x2A, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn cvtss2sd_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF3), 0x5A, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn cvtsd2ss_reg_reg(&mut self, dst: XmmRegister, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF2), 0x5A, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn cvttss2si_reg_reg(&mut self, dst: Register, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF3), 0x2C, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn cvttsd2si_reg_reg(&mut self, dst: Register, src: XmmRegister) {
        self.sse_prefix_op(Some(0xF2), 0x2C, dst.encoding(), SseOperand::Reg(src.encoding()));
    }

    pub fn movhpd_reg_mem(&mut self, dst: XmmRegister, src: Address) {
        self.sse_prefix_op(Some(0x66), 0x16, dst.encoding(), SseOperand::Mem(src));
    }

    pub fn movhpd_mem_reg(&mut self, dst: Address, src: XmmRegister) {
        self.sse_prefix_op(Some(0x66), 0x17, src.encoding(), SseOperand::Mem(dst));
    }

    // === x87 (long <-> floating point round trips) ========================

    pub fn flds(&mut self, src: Address) {
        self.emit_u8(0xD9);
        self.emit_memory_operand(0, src);
    }

    pub fn fldl(&mut self, src: Address) {
        self.emit_u8(0xDD);
        self.emit_memory_operand(0, src);
    }

    pub fn fstps(&mut self, dst: Address) {
        self.emit_u8(0xD9);
        self.emit_memory_operand(3, dst);
    }

    pub fn fstpl(&mut self, dst: Address) {
        self.emit_u8(0xDD);
        self.emit_memory_operand(3, dst);
    }

    pub fn filds(&mut self, src: Address) {
        self.emit_u8(0xDB);
        self.emit_memory_operand(0, src);
    }

    pub fn fildll(&mut self, src: Address) {
        self.emit_u8(0xDF);
        self.emit_memory_operand(5, src);
    }

    pub fn fisttpll(&mut self, dst: Address) {
        self.emit_u8(0xDD);
        self.emit_memory_operand(1, dst);
    }

    /// Partial remainder of st(0) / st(1); C2 set while incomplete.
    pub fn fprem(&mut self) {
        self.emit_u8(0xD9);
        self.emit_u8(0xF8);
    }

    /// Store the x87 status word into AX.
    pub fn fnstsw(&mut self) {
        self.emit_u8(0xDF);
        self.emit_u8(0xE0);
    }
}

#[derive(Clone, Copy)]
enum SseOperand {
    Reg(u8),
    Mem(Address),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asm() -> X86Assembler {
        X86Assembler::new(false)
    }

    #[test]
    fn test_mov_encodings() {
        let mut a = asm();
        a.movl_reg_reg(Register::EAX, Register::EBX);
        assert_eq!(a.code(), &[0x89, 0xD8]);

        let mut a = asm();
        a.movl_reg_imm(Register::ECX, 0x1234);
        assert_eq!(a.code(), &[0xB9, 0x34, 0x12, 0x00, 0x00]);

        let mut a = asm();
        a.movl_reg_mem(Register::EAX, Address::displace(Register::EBX, 8));
        assert_eq!(a.code(), &[0x8B, 0x43, 0x08]);
    }

    #[test]
    fn test_esp_base_needs_sib() {
        let mut a = asm();
        a.movl_reg_mem(Register::EAX, Address::displace(Register::ESP, 4));
        assert_eq!(a.code(), &[0x8B, 0x44, 0x24, 0x04]);
    }

    #[test]
    fn test_ebp_base_needs_disp() {
        // [ebp] must be encoded as [ebp + 0] with mod=01.
        let mut a = asm();
        a.movl_reg_mem(Register::EAX, Address::displace(Register::EBP, 0));
        assert_eq!(a.code(), &[0x8B, 0x45, 0x00]);
    }

    #[test]
    fn test_indexed_address() {
        // movl eax, [ebx + ecx*4 + 12]
        let mut a = asm();
        a.movl_reg_mem(
            Register::EAX,
            Address::indexed(Register::EBX, Register::ECX, ScaleFactor::Times4, 12),
        );
        assert_eq!(a.code(), &[0x8B, 0x44, 0x8B, 0x0C]);
    }

    #[test]
    fn test_alu_short_immediate() {
        let mut a = asm();
        a.addl_reg_imm(Register::EAX, 5);
        assert_eq!(a.code(), &[0x83, 0xC0, 0x05]);

        let mut a = asm();
        a.addl_reg_imm(Register::EAX, 0x1000);
        assert_eq!(a.code(), &[0x81, 0xC0, 0x00, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn test_test_and_cmp() {
        let mut a = asm();
        a.testl_reg_reg(Register::EAX, Register::EAX);
        assert_eq!(a.code(), &[0x85, 0xC0]);

        let mut a = asm();
        a.cmpl_reg_reg(Register::EAX, Register::ECX);
        assert_eq!(a.code(), &[0x39, 0xC8]);
    }

    #[test]
    fn test_label_backward_branch() {
        let mut a = asm();
        let target = a.create_label();
        a.bind(target);
        a.nop();
        a.jmp_label(target);
        // jmp rel32 back over 1 nop + 5-byte jmp.
        assert_eq!(a.code()[1], 0xE9);
        assert_eq!(a.read_i32_at(2), -6);
    }

    #[test]
    fn test_label_forward_branch_backpatched() {
        let mut a = asm();
        let target = a.create_label();
        a.jmp_label(target);
        a.nop();
        a.nop();
        a.bind(target);
        assert_eq!(a.read_i32_at(1), 2);
    }

    #[test]
    fn test_near_label_in_range() {
        let mut a = asm();
        let target = a.create_near_label();
        a.j_near(Condition::Equal, target).unwrap();
        a.nop();
        a.bind_near(target).unwrap();
        assert_eq!(a.code(), &[0x74, 0x01, 0x90]);
    }

    #[test]
    fn test_near_label_out_of_range_is_error() {
        let mut a = asm();
        let target = a.create_near_label();
        a.jmp_near(target).unwrap();
        for _ in 0..200 {
            a.nop();
        }
        assert!(matches!(
            a.bind_near(target),
            Err(CompileError::NearBranchOutOfRange { .. })
        ));
    }

    #[test]
    fn test_literal_interning() {
        let mut a = asm();
        let addr1 = a.literal_double_address(1.5, Register::EBX);
        let addr2 = a.literal_double_address(1.5, Register::EBX);
        assert_eq!(addr1, addr2);
        assert_eq!(a.constant_area_size(), 8);

        a.literal_float_address(2.0, Register::EBX);
        assert_eq!(a.constant_area_size(), 12);
    }

    #[test]
    fn test_constant_area_fixup() {
        let mut a = asm();
        // Pad so the fixup arithmetic is visible.
        a.nop();
        a.nop();
        let lit = a.literal_int32_address(42, Register::EBX);
        a.movl_reg_mem(Register::EAX, lit);
        let slot = a.code_size() - 4;
        // Placeholder holds the in-area offset before finalisation.
        assert_eq!(a.read_i32_at(slot), 0);
        let start = a.add_constant_area();
        assert_eq!(start % 4, 0);
        assert_eq!(a.read_i32_at(slot), start as i32);
        // The literal itself landed at the patched offset.
        assert_eq!(a.read_i32_at(start), 42);
    }

    #[test]
    fn test_sse_encodings() {
        let mut a = asm();
        a.movsd_reg_reg(XmmRegister::XMM1, XmmRegister::XMM2);
        assert_eq!(a.code(), &[0xF2, 0x0F, 0x10, 0xCA]);

        let mut a = asm();
        a.ucomiss_reg_reg(XmmRegister::XMM0, XmmRegister::XMM1);
        assert_eq!(a.code(), &[0x0F, 0x2E, 0xC1]);

        let mut a = asm();
        a.movd_xmm_reg(XmmRegister::XMM0, Register::EAX);
        assert_eq!(a.code(), &[0x66, 0x0F, 0x6E, 0xC0]);

        let mut a = asm();
        a.psrlq_reg_imm(XmmRegister::XMM0, 32);
        assert_eq!(a.code(), &[0x66, 0x0F, 0x73, 0xD0, 0x20]);
    }

    #[test]
    fn test_mfence_and_rdtsc() {
        let mut a = asm();
        a.mfence();
        a.rdtsc();
        assert_eq!(a.code(), &[0x0F, 0xAE, 0xF0, 0x0F, 0x31]);
    }

    #[test]
    fn test_poisoning_is_conditional() {
        let mut a = X86Assembler::new(false);
        a.maybe_poison_heap_reference(Register::EAX);
        assert!(a.code().is_empty());

        let mut a = X86Assembler::new(true);
        a.maybe_poison_heap_reference(Register::EAX);
        assert_eq!(a.code(), &[0xF7, 0xD8]);
    }

    #[test]
    fn test_push_pop_call() {
        let mut a = asm();
        a.pushl_reg(Register::EBP);
        a.popl_reg(Register::EBP);
        a.ret();
        assert_eq!(a.code(), &[0x55, 0x5D, 0xC3]);

        let mut a = asm();
        a.call_next_instruction();
        a.popl_reg(Register::EBX);
        assert_eq!(a.code(), &[0xE8, 0x00, 0x00, 0x00, 0x00, 0x5B]);
    }

    #[test]
    fn test_fs_prefixed_call() {
        let mut a = asm();
        a.fs_prefix();
        a.call_mem(Address::absolute(0x200));
        assert_eq!(a.code(), &[0x64, 0xFF, 0x15, 0x00, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn test_align() {
        let mut a = asm();
        a.nop();
        a.align(4, 0x90);
        assert_eq!(a.code_size(), 4);
    }
}
