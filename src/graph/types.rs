//! Result types of IR instructions.

use std::fmt;

/// The type of a value produced by an IR instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    Reference,
    Void,
}

impl DataType {
    /// Size of a value of this type in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => 1,
            DataType::Int16 | DataType::Uint16 => 2,
            DataType::Int32 | DataType::Uint32 | DataType::Reference | DataType::Float32 => 4,
            DataType::Int64 | DataType::Uint64 | DataType::Float64 => 8,
            DataType::Void => 0,
        }
    }

    /// Whether a value of this type occupies a register pair on 32-bit x86.
    pub fn is_64bit(self) -> bool {
        matches!(self, DataType::Int64 | DataType::Uint64 | DataType::Float64)
    }

    pub fn is_floating_point(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            DataType::Bool
                | DataType::Int8
                | DataType::Uint8
                | DataType::Int16
                | DataType::Uint16
                | DataType::Int32
                | DataType::Uint32
                | DataType::Int64
                | DataType::Uint64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            DataType::Bool | DataType::Uint8 | DataType::Uint16 | DataType::Uint32 | DataType::Uint64
        )
    }

    /// One-letter tag used by the graph visualizer for input references.
    pub fn visualizer_tag(self) -> char {
        match self {
            DataType::Bool => 'z',
            DataType::Int8 => 'b',
            DataType::Uint8 => 'a',
            DataType::Int16 => 's',
            DataType::Uint16 => 'c',
            DataType::Int32 => 'i',
            DataType::Uint32 => 'u',
            DataType::Int64 => 'j',
            DataType::Uint64 => 'w',
            DataType::Float32 => 'f',
            DataType::Float64 => 'd',
            DataType::Reference => 'l',
            DataType::Void => 'v',
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "Bool",
            DataType::Int8 => "Int8",
            DataType::Uint8 => "Uint8",
            DataType::Int16 => "Int16",
            DataType::Uint16 => "Uint16",
            DataType::Int32 => "Int32",
            DataType::Uint32 => "Uint32",
            DataType::Int64 => "Int64",
            DataType::Uint64 => "Uint64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
            DataType::Reference => "Reference",
            DataType::Void => "Void",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(DataType::Bool.size_in_bytes(), 1);
        assert_eq!(DataType::Int32.size_in_bytes(), 4);
        assert_eq!(DataType::Reference.size_in_bytes(), 4);
        assert_eq!(DataType::Int64.size_in_bytes(), 8);
        assert_eq!(DataType::Float64.size_in_bytes(), 8);
    }

    #[test]
    fn test_pair_types() {
        assert!(DataType::Int64.is_64bit());
        assert!(DataType::Float64.is_64bit());
        assert!(!DataType::Reference.is_64bit());
    }
}
