// Copyright 2026 the Stack Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The in-memory module model: procedures, operations, and data blocks.

use core::fmt;

use crate::types::Type;

/// System calls an operation may invoke through the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Syscall {
    /// Terminates execution; pops one pointer-sized exit code.
    Exit = 0,
    /// Writes to a descriptor; pops descriptor, buffer address, and length.
    Write = 1,
    /// Reads from a descriptor; pops descriptor, buffer address, and length.
    Read = 2,
}

impl Syscall {
    /// Decodes a syscall from its wire value.
    #[must_use]
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Exit,
            1 => Self::Write,
            2 => Self::Read,
            _ => return None,
        })
    }

    /// Number of pointer-sized stack arguments the syscall consumes.
    #[must_use]
    pub fn arg_count(self) -> u32 {
        match self {
            Self::Exit => 1,
            Self::Write | Self::Read => 3,
        }
    }

    /// Lowercase name, as used in diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Exit => "exit",
            Self::Write => "write",
            Self::Read => "read",
        }
    }
}

/// Built-in pointer-sized constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Builtin {
    /// The null pointer.
    Null = 0,
    /// Descriptor 0.
    Stdin = 1,
    /// Descriptor 1.
    Stdout = 2,
    /// Descriptor 2.
    Stderr = 3,
}

impl Builtin {
    /// Decodes a builtin from its wire value.
    #[must_use]
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Null,
            1 => Self::Stdin,
            2 => Self::Stdout,
            3 => Self::Stderr,
            _ => return None,
        })
    }

    /// The constant's runtime value.
    #[must_use]
    pub fn value(self) -> u64 {
        match self {
            Self::Null | Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
        }
    }

    /// Lowercase name, as used in diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

macro_rules! op_kinds {
    ($($variant:ident = $value:literal, $name:literal;)*) => {
        /// Opcode of an operation, as stored on the wire.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum OpKind {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant = $value,
            )*
        }

        impl OpKind {
            /// Decodes an opcode byte.
            #[must_use]
            pub fn from_u8(raw: u8) -> Option<Self> {
                Some(match raw {
                    $($value => Self::$variant,)*
                    _ => return None,
                })
            }

            /// Mnemonic for diagnostics and disassembly.
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }
        }
    };
}

op_kinds! {
    Nop = 0, "nop";
    End = 1, "end";
    PushInt8 = 2, "push-i8";
    PushInt16 = 3, "push-i16";
    PushInt32 = 4, "push-i32";
    PushIntPtr = 5, "push-ptr";
    PushInt64 = 6, "push-i64";
    Addr = 7, "addr";
    DbAddr = 8, "dbaddr";
    Load = 9, "load";
    Store = 10, "store";
    Sys = 11, "sys";
    Builtin = 12, "builtin";
    Add = 13, "add";
    AddImm = 14, "add-i";
    Sub = 15, "sub";
    SubImm = 16, "sub-i";
    Mul = 17, "mul";
    MulImm = 18, "mul-i";
    Div = 19, "div";
    DivImm = 20, "div-i";
    DivS = 21, "divs";
    DivSImm = 22, "divs-i";
    Mod = 23, "mod";
    ModImm = 24, "mod-i";
    ModS = 25, "mods";
    ModSImm = 26, "mods-i";
    And = 27, "and";
    AndImm = 28, "and-i";
    Or = 29, "or";
    OrImm = 30, "or-i";
    Xor = 31, "xor";
    XorImm = 32, "xor-i";
    Shl = 33, "shl";
    ShlImm = 34, "shl-i";
    Shr = 35, "shr";
    ShrImm = 36, "shr-i";
    ShrS = 37, "shrs";
    ShrSImm = 38, "shrs-i";
    Not = 39, "not";
    Drop = 40, "drop";
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single operation of a procedure body.
///
/// Immediates are stored as raw 64-bit values; signed operations
/// reinterpret them as two's complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Does nothing.
    Nop,
    /// Halts the run and clears the stack.
    End,
    /// Pushes a 1-byte integer.
    PushInt8(u64),
    /// Pushes a 2-byte integer.
    PushInt16(u64),
    /// Pushes a 4-byte integer.
    PushInt32(u64),
    /// Pushes a pointer-sized integer.
    PushIntPtr(u64),
    /// Pushes an 8-byte integer.
    PushInt64(u64),
    /// Pushes the address of stack item `n` (counted from the top before
    /// this operation executes).
    Addr(u32),
    /// Pushes the base address of a data block.
    DbAddr(u32),
    /// Pops an address and pushes the value of the given type read from it.
    Load(Type),
    /// Pops an address and a value, storing the value at the address.
    Store,
    /// Invokes a system call through the host.
    Sys(Syscall),
    /// Pushes a built-in pointer-sized constant.
    Builtin(Builtin),
    /// Pops two operands, pushes their sum.
    Add,
    /// Adds an immediate to the top operand in place.
    AddImm(u64),
    /// Pops two operands, pushes the second minus the first.
    Sub,
    /// Subtracts an immediate from the top operand in place.
    SubImm(u64),
    /// Pops two operands, pushes their product.
    Mul,
    /// Multiplies the top operand by an immediate in place.
    MulImm(u64),
    /// Unsigned division of the second operand by the first.
    Div,
    /// Unsigned division of the top operand by an immediate, in place.
    DivImm(u64),
    /// Signed division of the second operand by the first.
    DivS,
    /// Signed division of the top operand by an immediate, in place.
    DivSImm(u64),
    /// Unsigned remainder of the second operand by the first.
    Mod,
    /// Unsigned remainder of the top operand by an immediate, in place.
    ModImm(u64),
    /// Signed remainder of the second operand by the first.
    ModS,
    /// Signed remainder of the top operand by an immediate, in place.
    ModSImm(u64),
    /// Bitwise AND of the two top operands.
    And,
    /// Bitwise AND of the top operand with an immediate, in place.
    AndImm(u64),
    /// Bitwise OR of the two top operands.
    Or,
    /// Bitwise OR of the top operand with an immediate, in place.
    OrImm(u64),
    /// Bitwise XOR of the two top operands.
    Xor,
    /// Bitwise XOR of the top operand with an immediate, in place.
    XorImm(u64),
    /// Shifts the second operand left by the first.
    Shl,
    /// Shifts the top operand left by an immediate, in place.
    ShlImm(u64),
    /// Logically shifts the second operand right by the first.
    Shr,
    /// Logically shifts the top operand right by an immediate, in place.
    ShrImm(u64),
    /// Arithmetically shifts the second operand right by the first.
    ShrS,
    /// Arithmetically shifts the top operand right by an immediate, in place.
    ShrSImm(u64),
    /// Bitwise complement of the top operand, in place.
    Not,
    /// Discards the top stack item.
    Drop,
}

impl Op {
    /// The opcode of this operation.
    #[must_use]
    pub fn kind(&self) -> OpKind {
        match self {
            Self::Nop => OpKind::Nop,
            Self::End => OpKind::End,
            Self::PushInt8(_) => OpKind::PushInt8,
            Self::PushInt16(_) => OpKind::PushInt16,
            Self::PushInt32(_) => OpKind::PushInt32,
            Self::PushIntPtr(_) => OpKind::PushIntPtr,
            Self::PushInt64(_) => OpKind::PushInt64,
            Self::Addr(_) => OpKind::Addr,
            Self::DbAddr(_) => OpKind::DbAddr,
            Self::Load(_) => OpKind::Load,
            Self::Store => OpKind::Store,
            Self::Sys(_) => OpKind::Sys,
            Self::Builtin(_) => OpKind::Builtin,
            Self::Add => OpKind::Add,
            Self::AddImm(_) => OpKind::AddImm,
            Self::Sub => OpKind::Sub,
            Self::SubImm(_) => OpKind::SubImm,
            Self::Mul => OpKind::Mul,
            Self::MulImm(_) => OpKind::MulImm,
            Self::Div => OpKind::Div,
            Self::DivImm(_) => OpKind::DivImm,
            Self::DivS => OpKind::DivS,
            Self::DivSImm(_) => OpKind::DivSImm,
            Self::Mod => OpKind::Mod,
            Self::ModImm(_) => OpKind::ModImm,
            Self::ModS => OpKind::ModS,
            Self::ModSImm(_) => OpKind::ModSImm,
            Self::And => OpKind::And,
            Self::AndImm(_) => OpKind::AndImm,
            Self::Or => OpKind::Or,
            Self::OrImm(_) => OpKind::OrImm,
            Self::Xor => OpKind::Xor,
            Self::XorImm(_) => OpKind::XorImm,
            Self::Shl => OpKind::Shl,
            Self::ShlImm(_) => OpKind::ShlImm,
            Self::Shr => OpKind::Shr,
            Self::ShrImm(_) => OpKind::ShrImm,
            Self::ShrS => OpKind::ShrS,
            Self::ShrSImm(_) => OpKind::ShrSImm,
            Self::Not => OpKind::Not,
            Self::Drop => OpKind::Drop,
        }
    }
}

/// One piece of a data block's initializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataPiece {
    /// Literal bytes, copied verbatim.
    Bytes(Vec<u8>),
    /// A two-byte integer in native order.
    Int16(u16),
    /// A four-byte integer in native order.
    Int32(u32),
    /// A pointer-sized integer in native order.
    IntPtr(u64),
    /// An eight-byte integer in native order.
    Int64(u64),
    /// The base address of a data block, materialized at load time.
    DbAddr(u32),
    /// Zeroed space the size of the given type.
    Zero(Type),
    /// A built-in constant, pointer-sized.
    Builtin(Builtin),
}

impl DataPiece {
    /// Size in bytes this piece occupies once materialized.
    #[must_use]
    pub fn runtime_size(&self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes.len(),
            Self::Int16(_) => 2,
            Self::Int32(_) => 4,
            Self::IntPtr(_) | Self::DbAddr(_) | Self::Builtin(_) => crate::types::WORD_SIZE,
            Self::Int64(_) => 8,
            Self::Zero(ty) => ty.runtime_size(),
        }
    }
}

/// A named data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    /// The block's name.
    pub name: String,
    /// Whether the block may be written to at run time. Advisory only; the
    /// runtime does not enforce protection.
    pub is_mutable: bool,
    /// Initializer pieces, materialized in order.
    pub pieces: Vec<DataPiece>,
}

impl DataBlock {
    /// Total materialized size of the block in bytes.
    #[must_use]
    pub fn runtime_size(&self) -> usize {
        self.pieces.iter().map(DataPiece::runtime_size).sum()
    }
}

/// A procedure: a straight-line body with a typed signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proc {
    /// The procedure's name.
    pub name: String,
    /// Argument types; the first argument sits on top of the initial stack.
    pub args: Vec<Type>,
    /// Return type.
    pub ret: Type,
    /// The operation sequence.
    pub body: Vec<Op>,
}

/// A verified module, as produced by the builder or the decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    /// Data blocks, in declaration order.
    pub blocks: Vec<DataBlock>,
    /// Procedures, in declaration order.
    pub procs: Vec<Proc>,
    /// Index of the entry procedure, if one was set.
    pub entry: Option<u32>,
}

impl Module {
    /// Finds a procedure by name.
    #[must_use]
    pub fn proc_id_by_name(&self, name: &str) -> Option<u32> {
        self.procs.iter().position(|p| p.name == name).map(|i| i as u32)
    }

    /// Finds a data block by name.
    #[must_use]
    pub fn block_id_by_name(&self, name: &str) -> Option<u32> {
        self.blocks.iter().position(|b| b.name == name).map(|i| i as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WORD_SIZE;

    #[test]
    fn opcode_roundtrip() {
        for raw in 0..=40u8 {
            let kind = OpKind::from_u8(raw).unwrap();
            assert_eq!(kind as u8, raw);
        }
        assert_eq!(OpKind::from_u8(41), None);
        assert_eq!(OpKind::from_u8(255), None);
    }

    #[test]
    fn syscall_arg_counts() {
        assert_eq!(Syscall::Exit.arg_count(), 1);
        assert_eq!(Syscall::Write.arg_count(), 3);
        assert_eq!(Syscall::Read.arg_count(), 3);
    }

    #[test]
    fn builtin_values() {
        assert_eq!(Builtin::Null.value(), 0);
        assert_eq!(Builtin::Stdin.value(), 0);
        assert_eq!(Builtin::Stdout.value(), 1);
        assert_eq!(Builtin::Stderr.value(), 2);
    }

    #[test]
    fn piece_sizes() {
        assert_eq!(DataPiece::Bytes(b"hello".to_vec()).runtime_size(), 5);
        assert_eq!(DataPiece::Int16(0).runtime_size(), 2);
        assert_eq!(DataPiece::DbAddr(0).runtime_size(), WORD_SIZE);
        assert_eq!(DataPiece::Zero(Type::array(crate::types::TypeKind::I8, 16)).runtime_size(), 16);
    }

    #[test]
    fn block_size_sums_pieces() {
        let block = DataBlock {
            name: "b".into(),
            is_mutable: true,
            pieces: vec![
                DataPiece::Zero(Type::array(crate::types::TypeKind::I8, 16)),
                DataPiece::Bytes(b"AB".to_vec()),
            ],
        };
        assert_eq!(block.runtime_size(), 18);
    }
}
