// Byte-level checks of the encoder: fixed opcode patterns, ModRM/SIB operand
// forms, label back-patching, near-branch range enforcement, and constant-area
// placement with deferred fix-ups.

use kestrel::core::CompileError;
use kestrel::x86::assembler::{Address, ScaleFactor, X86Assembler};
use kestrel::x86::{Condition, Register, XmmRegister};

fn asm() -> X86Assembler {
    X86Assembler::new(false)
}

#[test]
fn test_mov_imm_encoding() {
    let mut a = asm();
    a.movl_reg_imm(Register::EAX, 0x12345678);
    a.movl_reg_imm(Register::EDI, -1);
    assert_eq!(
        a.finalize(),
        vec![0xB8, 0x78, 0x56, 0x34, 0x12, 0xBF, 0xFF, 0xFF, 0xFF, 0xFF]
    );
}

#[test]
fn test_push_pop_ret() {
    let mut a = asm();
    a.pushl_reg(Register::EBP);
    a.pushl_reg(Register::ESI);
    a.popl_reg(Register::ESI);
    a.popl_reg(Register::EBP);
    a.ret();
    assert_eq!(a.finalize(), vec![0x55, 0x56, 0x5E, 0x5D, 0xC3]);
}

#[test]
fn test_alu_imm_width_selection() {
    let mut a = asm();
    a.addl_reg_imm(Register::EAX, 16);
    a.addl_reg_imm(Register::EAX, 0x1000);
    assert_eq!(
        a.finalize(),
        vec![0x83, 0xC0, 0x10, 0x81, 0xC0, 0x00, 0x10, 0x00, 0x00]
    );
}

#[test]
fn test_memory_operand_forms() {
    // EBP as base always needs a displacement byte; ESP always needs a SIB.
    let mut a = asm();
    a.movl_reg_mem(Register::EAX, Address::displace(Register::EBP, 0));
    a.movl_reg_mem(Register::ECX, Address::displace(Register::ESP, 4));
    a.movl_reg_mem(
        Register::EDX,
        Address::indexed(Register::EBX, Register::ESI, ScaleFactor::Times4, 8),
    );
    assert_eq!(
        a.finalize(),
        vec![
            0x8B, 0x45, 0x00, // mov eax, [ebp+0]
            0x8B, 0x4C, 0x24, 0x04, // mov ecx, [esp+4]
            0x8B, 0x54, 0xB3, 0x08, // mov edx, [ebx+esi*4+8]
        ]
    );
}

#[test]
fn test_forward_label_is_back_patched() {
    let mut a = asm();
    let target = a.create_label();
    a.jmp_label(target);
    a.nop();
    a.bind(target);
    // jmp rel32 of +1 skips the nop.
    assert_eq!(a.finalize(), vec![0xE9, 0x01, 0x00, 0x00, 0x00, 0x90]);
}

#[test]
fn test_backward_branch() {
    let mut a = asm();
    let top = a.create_label();
    a.bind(top);
    a.jmp_label(top);
    assert_eq!(a.finalize(), vec![0xE9, 0xFB, 0xFF, 0xFF, 0xFF]);
}

#[test]
fn test_conditional_branch_encoding() {
    let mut a = asm();
    let target = a.create_label();
    a.j(Condition::Equal, target);
    a.bind(target);
    let code = a.finalize();
    assert_eq!(&code[..2], &[0x0F, 0x84]);
    assert_eq!(&code[2..6], &[0, 0, 0, 0]);
}

#[test]
fn test_near_branch_out_of_range() {
    let mut a = asm();
    let target = a.create_near_label();
    a.jmp_near(target).unwrap();
    for _ in 0..200 {
        a.nop();
    }
    let result = a.bind_near(target);
    assert!(matches!(result, Err(CompileError::NearBranchOutOfRange { .. })));
}

#[test]
fn test_near_branch_in_range() {
    let mut a = asm();
    let target = a.create_near_label();
    a.jmp_near(target).unwrap();
    a.nop();
    a.bind_near(target).unwrap();
    assert_eq!(a.finalize(), vec![0xEB, 0x01, 0x90]);
}

#[test]
fn test_constant_area_dedup_and_fixup() {
    let mut a = asm();
    let first = a.literal_float_address(1.5, Register::EBX);
    let second = a.literal_float_address(1.5, Register::EBX);
    assert_eq!(first, second);
    assert_eq!(a.constant_area_size(), 4);

    a.movss_reg_mem(XmmRegister::XMM0, first);
    let disp_slot = a.code_size() - 4;
    let start = a.add_constant_area();
    // The deferred fix-up rewrote the displacement to the absolute offset of
    // the literal inside the finished buffer.
    assert_eq!(a.read_i32_at(disp_slot), start as i32);
    assert_eq!(&a.finalize()[start..start + 4], &1.5f32.to_le_bytes());
}

#[test]
fn test_jump_table_reservation() {
    let mut a = asm();
    let _ = a.literal_float_address(2.0, Register::EBX);
    let table_off = a.reserve_jump_table(3);
    assert_eq!(table_off, 4);
    assert_eq!(a.constant_area_size(), 4 + 12);
}

#[test]
fn test_align_pads_with_fill() {
    let mut a = asm();
    a.ret();
    a.align(4, 0x90);
    assert_eq!(a.finalize(), vec![0xC3, 0x90, 0x90, 0x90]);
}

#[test]
fn test_poisoning_is_conditional() {
    let mut plain = X86Assembler::new(false);
    plain.maybe_poison_heap_reference(Register::EAX);
    assert_eq!(plain.code_size(), 0);

    let mut poisoning = X86Assembler::new(true);
    poisoning.maybe_poison_heap_reference(Register::EAX);
    assert!(poisoning.code_size() > 0);
    assert!(poisoning.poisons_references());
}

#[test]
fn test_byte_ops_use_byte_registers() {
    let mut a = asm();
    a.setb(Condition::Less, Register::ECX);
    let code = a.finalize();
    // setl cl
    assert_eq!(code, vec![0x0F, 0x9C, 0xC1]);
}
