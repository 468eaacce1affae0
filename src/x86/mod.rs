// This module gathers the x86-32 target definitions: general-purpose and XMM
// register enums with their hardware encodings, condition codes with the
// mapping used when fusing IR conditions into branches, the calling-convention
// register sets of the managed runtime (EAX/ECX/EDX/EBX arguments, EAX/EDX
// return pair, XMM0 FP return, EBP/ESI/EDI callee-saved, ESP permanently
// blocked), and the CpuFeatures record the location builder consults before
// choosing AVX/SSE4.1-dependent lowerings.

//! x86-32 back end.

pub mod assembler;
pub mod cfi;
pub mod codegen;
pub mod locations_builder;
pub mod parallel_move;
pub mod patch;
pub mod slow_path;

use crate::graph::instruction::IfCondition;

/// General-purpose 32-bit registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Register {
    EAX = 0,
    ECX = 1,
    EDX = 2,
    EBX = 3,
    ESP = 4,
    EBP = 5,
    ESI = 6,
    EDI = 7,
}

impl Register {
    pub fn encoding(self) -> u8 {
        self as u8
    }

    /// Only EAX/EBX/ECX/EDX have byte-addressable low halves.
    pub fn is_byte_register(self) -> bool {
        matches!(self, Register::EAX | Register::EBX | Register::ECX | Register::EDX)
    }

    pub fn from_encoding(enc: u8) -> Register {
        match enc {
            0 => Register::EAX,
            1 => Register::ECX,
            2 => Register::EDX,
            3 => Register::EBX,
            4 => Register::ESP,
            5 => Register::EBP,
            6 => Register::ESI,
            7 => Register::EDI,
            _ => unreachable!("invalid register encoding {enc}"),
        }
    }
}

/// 128-bit SSE registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum XmmRegister {
    XMM0 = 0,
    XMM1 = 1,
    XMM2 = 2,
    XMM3 = 3,
    XMM4 = 4,
    XMM5 = 5,
    XMM6 = 6,
    XMM7 = 7,
}

impl XmmRegister {
    pub fn encoding(self) -> u8 {
        self as u8
    }

    pub fn from_encoding(enc: u8) -> XmmRegister {
        match enc {
            0 => XmmRegister::XMM0,
            1 => XmmRegister::XMM1,
            2 => XmmRegister::XMM2,
            3 => XmmRegister::XMM3,
            4 => XmmRegister::XMM4,
            5 => XmmRegister::XMM5,
            6 => XmmRegister::XMM6,
            7 => XmmRegister::XMM7,
            _ => unreachable!("invalid xmm encoding {enc}"),
        }
    }
}

/// Condition codes, in hardware encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Overflow = 0x0,
    NoOverflow = 0x1,
    Below = 0x2,
    AboveEqual = 0x3,
    Equal = 0x4,
    NotEqual = 0x5,
    BelowEqual = 0x6,
    Above = 0x7,
    Sign = 0x8,
    NotSign = 0x9,
    ParityEven = 0xA,
    ParityOdd = 0xB,
    Less = 0xC,
    GreaterEqual = 0xD,
    LessEqual = 0xE,
    Greater = 0xF,
}

impl Condition {
    pub fn encoding(self) -> u8 {
        self as u8
    }
}

/// Signed-comparison condition for an IR condition kind.
pub fn condition_code(cond: IfCondition) -> Condition {
    match cond {
        IfCondition::Equal => Condition::Equal,
        IfCondition::NotEqual => Condition::NotEqual,
        IfCondition::LessThan => Condition::Less,
        IfCondition::LessThanOrEqual => Condition::LessEqual,
        IfCondition::GreaterThan => Condition::Greater,
        IfCondition::GreaterThanOrEqual => Condition::GreaterEqual,
        IfCondition::Below => Condition::Below,
        IfCondition::BelowOrEqual => Condition::BelowEqual,
        IfCondition::Above => Condition::Above,
        IfCondition::AboveOrEqual => Condition::AboveEqual,
    }
}

/// Unsigned-comparison condition, used for FP comparisons (ucomiss sets
/// CF/ZF like an unsigned compare) and for the low half of long compares.
pub fn unsigned_condition_code(cond: IfCondition) -> Condition {
    match cond {
        IfCondition::Equal => Condition::Equal,
        IfCondition::NotEqual => Condition::NotEqual,
        IfCondition::LessThan | IfCondition::Below => Condition::Below,
        IfCondition::LessThanOrEqual | IfCondition::BelowOrEqual => Condition::BelowEqual,
        IfCondition::GreaterThan | IfCondition::Above => Condition::Above,
        IfCondition::GreaterThanOrEqual | IfCondition::AboveOrEqual => Condition::AboveEqual,
    }
}

/// Registers holding runtime-call arguments, in order.
pub const RUNTIME_ARGUMENT_REGISTERS: [Register; 4] =
    [Register::EAX, Register::ECX, Register::EDX, Register::EBX];

/// Register holding the current ArtMethod pointer at call sites.
pub const METHOD_REGISTER: Register = Register::EAX;

/// Callee-saved registers of the managed calling convention.
pub const CALLEE_SAVED_REGISTERS: [Register; 3] = [Register::EBP, Register::ESI, Register::EDI];

/// Caller-saved (core) registers.
pub const CALLER_SAVED_REGISTERS: [Register; 4] =
    [Register::EAX, Register::ECX, Register::EDX, Register::EBX];

/// Hidden argument register for interface-call conflict resolution.
pub const HIDDEN_INTERFACE_ARGUMENT: XmmRegister = XmmRegister::XMM7;

/// CPU features the location builder may rely on.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuFeatures {
    pub has_sse4_1: bool,
    pub has_avx: bool,
    pub has_avx2: bool,
    pub has_popcnt: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_registers() {
        assert!(Register::EAX.is_byte_register());
        assert!(Register::EDX.is_byte_register());
        assert!(!Register::ESI.is_byte_register());
        assert!(!Register::EBP.is_byte_register());
    }

    #[test]
    fn test_condition_encodings() {
        assert_eq!(Condition::Equal.encoding(), 0x4);
        assert_eq!(Condition::Less.encoding(), 0xC);
        assert_eq!(condition_code(IfCondition::LessThan), Condition::Less);
        assert_eq!(
            unsigned_condition_code(IfCondition::LessThan),
            Condition::Below
        );
    }
}
