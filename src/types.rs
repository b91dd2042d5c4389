// Copyright 2026 the Stack Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Value types and their runtime layout.
//!
//! Every stack item and data piece has a [`Type`]: a scalar kind plus an
//! item count, so `i32[4]` describes sixteen contiguous bytes. Pointers are
//! sized to the host word; a module verified on one word size is not
//! portable to another.

use core::fmt;

/// Size in bytes of a pointer-sized stack slot on this host.
pub const WORD_SIZE: usize = core::mem::size_of::<usize>();

/// Scalar type kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeKind {
    /// One byte integer.
    I8 = 0,
    /// Two byte integer.
    I16 = 1,
    /// Four byte integer.
    I32 = 2,
    /// Host-word-sized integer, also used for addresses.
    Ptr = 3,
    /// Eight byte integer.
    I64 = 4,
    /// The empty type; occupies no bytes.
    Void = 5,
}

impl TypeKind {
    /// Decodes a kind from its wire value.
    #[must_use]
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::I8,
            1 => Self::I16,
            2 => Self::I32,
            3 => Self::Ptr,
            4 => Self::I64,
            5 => Self::Void,
            _ => return None,
        })
    }

    /// Size in bytes of one item of this kind.
    #[must_use]
    pub fn item_size(self) -> usize {
        match self {
            Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 => 4,
            Self::Ptr => WORD_SIZE,
            Self::I64 => 8,
            Self::Void => 0,
        }
    }

    /// Lowercase name, as used in diagnostics and the assembler.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::Ptr => "ptr",
            Self::I64 => "i64",
            Self::Void => "void",
        }
    }
}

/// A value type: a scalar kind repeated `n_items` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Type {
    /// The scalar kind of each item.
    pub kind: TypeKind,
    /// Number of contiguous items.
    pub n_items: u32,
}

impl Type {
    /// The empty type.
    pub const VOID: Self = Self { kind: TypeKind::Void, n_items: 1 };
    /// A single pointer-sized slot.
    pub const PTR: Self = Self { kind: TypeKind::Ptr, n_items: 1 };
    /// A single byte.
    pub const I8: Self = Self { kind: TypeKind::I8, n_items: 1 };
    /// A single two-byte integer.
    pub const I16: Self = Self { kind: TypeKind::I16, n_items: 1 };
    /// A single four-byte integer.
    pub const I32: Self = Self { kind: TypeKind::I32, n_items: 1 };
    /// A single eight-byte integer.
    pub const I64: Self = Self { kind: TypeKind::I64, n_items: 1 };

    /// An array of `n_items` items of `kind`.
    #[must_use]
    pub const fn array(kind: TypeKind, n_items: u32) -> Self {
        Self { kind, n_items }
    }

    /// Total size in bytes occupied by a value of this type.
    #[must_use]
    pub fn runtime_size(&self) -> usize {
        self.kind.item_size() * self.n_items as usize
    }

    /// Packs the type into its wire representation.
    ///
    /// The low three bits carry the kind, the rest carry the item count.
    #[must_use]
    pub fn to_raw(&self) -> u64 {
        (u64::from(self.n_items) << 3) | self.kind as u64
    }

    /// Unpacks a wire representation produced by [`Type::to_raw`].
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        let kind = TypeKind::from_u8((raw & 7) as u8)?;
        let n_items = u32::try_from(raw >> 3).ok()?;
        Some(Self { kind, n_items })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.n_items == 1 {
            f.write_str(self.kind.name())
        } else {
            write!(f, "{}[{}]", self.kind.name(), self.n_items)
        }
    }
}
