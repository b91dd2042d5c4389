// Copyright 2026 the Stack Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Binary module encoding and decoding.
//!
//! A module serializes as a fixed header, the structural declarations
//! (data blocks, procedure signatures, the entry point), the bulk contents
//! (data pieces, operation streams), and finally a NUL-terminated name
//! table. Declarations refer to names by table index, assigned in order of
//! first use, so decoding runs in two passes: structure first with raw
//! name indices, then a patch-up once the table at the end of the input
//! has been read. Name references are never resolved before the table is
//! complete, which makes forward references legal by construction.
//!
//! Decoding checks structure only. Stack contracts are re-verified when an
//! execution environment is created, or explicitly via
//! [`verify_module`](crate::builder::verify_module).

use thiserror::Error;
use tracing::trace;

use crate::format::{ReadError, Reader, Writer};
use crate::module::{Builtin, DataBlock, DataPiece, Module, Op, OpKind, Proc, Syscall};
use crate::types::Type;

/// File header: magic, a format tag, and a version byte.
pub const MAGIC: [u8; 8] = *b"STTAPE\0\x01";

/// Entry-point field value for a module with no entry point.
const NO_ENTRY: u64 = u64::MAX;

/// Errors produced while decoding a module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A low-level read failed.
    #[error(transparent)]
    Read(#[from] ReadError),
    /// The input does not start with [`MAGIC`].
    #[error("bad magic: not a module, or an unsupported version")]
    BadMagic,
    /// An opcode byte that is not assigned.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    /// A data piece tag that is not assigned.
    #[error("unknown data piece tag {0:#04x}")]
    UnknownDataPiece(u8),
    /// A syscall id that is not assigned.
    #[error("unknown syscall {0}")]
    UnknownSyscall(u64),
    /// A builtin id that is not assigned.
    #[error("unknown builtin {0}")]
    UnknownBuiltin(u64),
    /// A type field that does not decode to a valid type.
    #[error("invalid type encoding {0:#x}")]
    InvalidType(u64),
    /// A numeric field too large for its role.
    #[error("{field} {value} is out of range")]
    FieldOutOfRange {
        /// Name of the field.
        field: &'static str,
        /// The decoded value.
        value: u64,
    },
    /// A name index past the end of the name table.
    #[error("unresolved name index {index}: the name table holds {table_len} names")]
    UnresolvedName {
        /// The dangling index.
        index: u32,
        /// Number of names actually present.
        table_len: u32,
    },
    /// Name table entries past the last index the module refers to.
    #[error("{count} trailing names in the name table are never referenced")]
    UnreferencedNames {
        /// Number of names beyond the highest referenced index.
        count: u32,
    },
    /// A name that is not valid UTF-8.
    #[error("name {index} in the name table is not valid UTF-8")]
    InvalidUtf8 {
        /// Index of the offending name.
        index: u32,
    },
    /// An entry point field that does not name a procedure.
    #[error("entry point {0} does not name a procedure")]
    InvalidEntryPoint(u64),
}

#[derive(Debug, Default)]
struct NameTable {
    names: Vec<String>,
}

impl NameTable {
    // Index of `name`, interning it on first use.
    fn intern(&mut self, name: &str) -> u64 {
        if let Some(i) = self.names.iter().position(|n| n == name) {
            return i as u64;
        }
        self.names.push(name.to_owned());
        (self.names.len() - 1) as u64
    }
}

fn write_piece(w: &mut Writer, piece: &DataPiece) {
    match piece {
        DataPiece::Bytes(bytes) => {
            w.write_u8(0);
            w.write_varint(bytes.len() as u64);
            w.write_bytes(bytes);
        }
        DataPiece::Int16(v) => {
            w.write_u8(1);
            w.write_varint(u64::from(*v));
        }
        DataPiece::Int32(v) => {
            w.write_u8(2);
            w.write_varint(u64::from(*v));
        }
        DataPiece::IntPtr(v) => {
            w.write_u8(3);
            w.write_varint(*v);
        }
        DataPiece::Int64(v) => {
            w.write_u8(4);
            w.write_varint(*v);
        }
        DataPiece::DbAddr(block) => {
            w.write_u8(5);
            w.write_varint(u64::from(*block));
        }
        DataPiece::Zero(ty) => {
            w.write_u8(6);
            w.write_varint(ty.to_raw());
        }
        DataPiece::Builtin(b) => {
            w.write_u8(7);
            w.write_varint(u64::from(*b as u8));
        }
    }
}

fn write_op(w: &mut Writer, op: &Op) {
    w.write_u8(op.kind() as u8);
    match op {
        Op::Nop
        | Op::End
        | Op::Store
        | Op::Add
        | Op::Sub
        | Op::Mul
        | Op::Div
        | Op::DivS
        | Op::Mod
        | Op::ModS
        | Op::And
        | Op::Or
        | Op::Xor
        | Op::Shl
        | Op::Shr
        | Op::ShrS
        | Op::Not
        | Op::Drop => {}
        Op::PushInt8(v)
        | Op::PushInt16(v)
        | Op::PushInt32(v)
        | Op::PushIntPtr(v)
        | Op::PushInt64(v)
        | Op::AddImm(v)
        | Op::SubImm(v)
        | Op::MulImm(v)
        | Op::DivImm(v)
        | Op::DivSImm(v)
        | Op::ModImm(v)
        | Op::ModSImm(v)
        | Op::AndImm(v)
        | Op::OrImm(v)
        | Op::XorImm(v)
        | Op::ShlImm(v)
        | Op::ShrImm(v)
        | Op::ShrSImm(v) => w.write_varint(*v),
        Op::Addr(n) => w.write_varint(u64::from(*n)),
        Op::DbAddr(block) => w.write_varint(u64::from(*block)),
        Op::Load(ty) => w.write_varint(ty.to_raw()),
        Op::Sys(s) => w.write_varint(u64::from(*s as u8)),
        Op::Builtin(b) => w.write_varint(u64::from(*b as u8)),
    }
}

/// Serializes a module to its binary form.
///
/// Encoding is deterministic: equal modules produce identical bytes.
#[must_use]
pub fn encode_module(module: &Module) -> Vec<u8> {
    let mut names = NameTable::default();
    let mut w = Writer::new();
    w.write_bytes(&MAGIC);

    w.write_varint(module.blocks.len() as u64);
    for block in &module.blocks {
        let name_id = names.intern(&block.name);
        w.write_varint_pair(name_id, u64::from(block.is_mutable));
        w.write_varint(block.pieces.len() as u64);
    }

    w.write_varint(module.procs.len() as u64);
    for proc in &module.procs {
        w.write_varint(proc.ret.to_raw());
        let name_id = names.intern(&proc.name);
        w.write_varint_pair(name_id, proc.args.len() as u64);
        for arg in &proc.args {
            w.write_varint(arg.to_raw());
        }
        w.write_varint(proc.body.len() as u64);
    }

    w.write_varint(module.entry.map_or(NO_ENTRY, u64::from));

    for block in &module.blocks {
        for piece in &block.pieces {
            write_piece(&mut w, piece);
        }
    }
    for proc in &module.procs {
        for op in &proc.body {
            write_op(&mut w, op);
        }
    }

    for name in &names.names {
        w.write_bytes(name.as_bytes());
        w.write_u8(0);
    }
    w.into_bytes()
}

fn small(field: &'static str, value: u64) -> Result<u32, DecodeError> {
    u32::try_from(value).map_err(|_| DecodeError::FieldOutOfRange { field, value })
}

fn read_type(r: &mut Reader<'_>) -> Result<Type, DecodeError> {
    let raw = r.read_varint()?;
    Type::from_raw(raw).ok_or(DecodeError::InvalidType(raw))
}

fn read_piece(r: &mut Reader<'_>) -> Result<DataPiece, DecodeError> {
    let tag = r.read_u8()?;
    Ok(match tag {
        0 => {
            let len = small("byte piece length", r.read_varint()?)?;
            DataPiece::Bytes(r.take(len as usize)?.to_vec())
        }
        1 => DataPiece::Int16(r.read_varint()? as u16),
        2 => DataPiece::Int32(r.read_varint()? as u32),
        3 => DataPiece::IntPtr(r.read_varint()?),
        4 => DataPiece::Int64(r.read_varint()?),
        5 => DataPiece::DbAddr(small("data block id", r.read_varint()?)?),
        6 => DataPiece::Zero(read_type(r)?),
        7 => {
            let raw = r.read_varint()?;
            let b = u8::try_from(raw)
                .ok()
                .and_then(Builtin::from_u8)
                .ok_or(DecodeError::UnknownBuiltin(raw))?;
            DataPiece::Builtin(b)
        }
        _ => return Err(DecodeError::UnknownDataPiece(tag)),
    })
}

fn read_op(r: &mut Reader<'_>) -> Result<Op, DecodeError> {
    let opcode = r.read_u8()?;
    let kind = OpKind::from_u8(opcode).ok_or(DecodeError::UnknownOpcode(opcode))?;
    Ok(match kind {
        OpKind::Nop => Op::Nop,
        OpKind::End => Op::End,
        OpKind::PushInt8 => Op::PushInt8(r.read_varint()?),
        OpKind::PushInt16 => Op::PushInt16(r.read_varint()?),
        OpKind::PushInt32 => Op::PushInt32(r.read_varint()?),
        OpKind::PushIntPtr => Op::PushIntPtr(r.read_varint()?),
        OpKind::PushInt64 => Op::PushInt64(r.read_varint()?),
        OpKind::Addr => Op::Addr(small("stack item index", r.read_varint()?)?),
        OpKind::DbAddr => Op::DbAddr(small("data block id", r.read_varint()?)?),
        OpKind::Load => Op::Load(read_type(r)?),
        OpKind::Store => Op::Store,
        OpKind::Sys => {
            let raw = r.read_varint()?;
            let s = u8::try_from(raw)
                .ok()
                .and_then(Syscall::from_u8)
                .ok_or(DecodeError::UnknownSyscall(raw))?;
            Op::Sys(s)
        }
        OpKind::Builtin => {
            let raw = r.read_varint()?;
            let b = u8::try_from(raw)
                .ok()
                .and_then(Builtin::from_u8)
                .ok_or(DecodeError::UnknownBuiltin(raw))?;
            Op::Builtin(b)
        }
        OpKind::Add => Op::Add,
        OpKind::AddImm => Op::AddImm(r.read_varint()?),
        OpKind::Sub => Op::Sub,
        OpKind::SubImm => Op::SubImm(r.read_varint()?),
        OpKind::Mul => Op::Mul,
        OpKind::MulImm => Op::MulImm(r.read_varint()?),
        OpKind::Div => Op::Div,
        OpKind::DivImm => Op::DivImm(r.read_varint()?),
        OpKind::DivS => Op::DivS,
        OpKind::DivSImm => Op::DivSImm(r.read_varint()?),
        OpKind::Mod => Op::Mod,
        OpKind::ModImm => Op::ModImm(r.read_varint()?),
        OpKind::ModS => Op::ModS,
        OpKind::ModSImm => Op::ModSImm(r.read_varint()?),
        OpKind::And => Op::And,
        OpKind::AndImm => Op::AndImm(r.read_varint()?),
        OpKind::Or => Op::Or,
        OpKind::OrImm => Op::OrImm(r.read_varint()?),
        OpKind::Xor => Op::Xor,
        OpKind::XorImm => Op::XorImm(r.read_varint()?),
        OpKind::Shl => Op::Shl,
        OpKind::ShlImm => Op::ShlImm(r.read_varint()?),
        OpKind::Shr => Op::Shr,
        OpKind::ShrImm => Op::ShrImm(r.read_varint()?),
        OpKind::ShrS => Op::ShrS,
        OpKind::ShrSImm => Op::ShrSImm(r.read_varint()?),
        OpKind::Not => Op::Not,
        OpKind::Drop => Op::Drop,
    })
}

fn resolve_name(names: &[String], index: u32) -> Result<String, DecodeError> {
    names.get(index as usize).cloned().ok_or(DecodeError::UnresolvedName {
        index,
        table_len: names.len() as u32,
    })
}

/// Decodes a module from its binary form.
///
/// Only structure is validated here; run [`verify_module`] or create an
/// execution environment to check stack contracts.
///
/// [`verify_module`]: crate::builder::verify_module
pub fn decode_module(bytes: &[u8]) -> Result<Module, DecodeError> {
    let mut r = Reader::new(bytes);
    if r.take(MAGIC.len())? != MAGIC {
        return Err(DecodeError::BadMagic);
    }

    // Pass one: structure, with names held as raw table indices.
    let block_count = small("data block count", r.read_varint()?)?;
    let mut block_names = Vec::with_capacity(block_count as usize);
    let mut blocks = Vec::with_capacity(block_count as usize);
    let mut piece_counts = Vec::with_capacity(block_count as usize);
    for _ in 0..block_count {
        let (name_id, mutable) = r.read_varint_pair()?;
        block_names.push(small("name index", name_id)?);
        piece_counts.push(small("data piece count", r.read_varint()?)?);
        blocks.push(DataBlock {
            name: String::new(),
            is_mutable: mutable != 0,
            pieces: Vec::new(),
        });
    }

    let proc_count = small("procedure count", r.read_varint()?)?;
    let mut proc_names = Vec::with_capacity(proc_count as usize);
    let mut procs = Vec::with_capacity(proc_count as usize);
    let mut body_lens = Vec::with_capacity(proc_count as usize);
    for _ in 0..proc_count {
        let ret = read_type(&mut r)?;
        let (name_id, n_args) = r.read_varint_pair()?;
        proc_names.push(small("name index", name_id)?);
        let n_args = small("argument count", n_args)?;
        let mut args = Vec::with_capacity(n_args as usize);
        for _ in 0..n_args {
            args.push(read_type(&mut r)?);
        }
        body_lens.push(small("body length", r.read_varint()?)?);
        procs.push(Proc { name: String::new(), args, ret, body: Vec::new() });
    }

    let entry_raw = r.read_varint()?;
    let entry = if entry_raw == NO_ENTRY {
        None
    } else {
        if entry_raw >= u64::from(proc_count) {
            return Err(DecodeError::InvalidEntryPoint(entry_raw));
        }
        Some(entry_raw as u32)
    };

    for (block, &count) in blocks.iter_mut().zip(&piece_counts) {
        for _ in 0..count {
            block.pieces.push(read_piece(&mut r)?);
        }
    }
    for (proc, &len) in procs.iter_mut().zip(&body_lens) {
        for _ in 0..len {
            proc.body.push(read_op(&mut r)?);
        }
    }

    let mut names = Vec::new();
    while !r.is_empty() {
        let raw = r.take_until_nul()?;
        let name = String::from_utf8(raw.to_vec())
            .map_err(|_| DecodeError::InvalidUtf8 { index: names.len() as u32 })?;
        names.push(name);
    }

    // Interning assigns ids densely in first-use order, so a table longer
    // than the highest referenced index carries bytes no encoder produces.
    let referenced = block_names
        .iter()
        .chain(proc_names.iter())
        .map(|&id| u64::from(id) + 1)
        .max()
        .unwrap_or(0);
    if names.len() as u64 > referenced {
        let count = (names.len() as u64 - referenced) as u32;
        return Err(DecodeError::UnreferencedNames { count });
    }

    // Pass two: patch names in, now that the table is known.
    for (block, name_id) in blocks.iter_mut().zip(block_names) {
        block.name = resolve_name(&names, name_id)?;
    }
    for (proc, name_id) in procs.iter_mut().zip(proc_names) {
        proc.name = resolve_name(&names, name_id)?;
    }

    trace!(blocks = blocks.len(), procs = procs.len(), "module decoded");
    Ok(Module { blocks, procs, entry })
}
