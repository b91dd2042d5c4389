// Copyright 2026 the Stack Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The execution engine.
//!
//! [`ExecEnv::new`] re-verifies the module, materializes its data blocks,
//! and lowers the entry procedure to a prepared form in which every stack
//! reference is a concrete byte offset and every data block reference a
//! concrete address. [`ExecEnv::run`] then interprets the prepared stream
//! against one contiguous byte stack that grows downward.
//!
//! The engine trusts the module's pointer arithmetic: `load`, `store`, and
//! the I/O syscalls dereference raw host addresses, so a module that
//! fabricates a pointer can corrupt or crash the process, exactly as a
//! native program could. Run only modules you trust.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::builder::{reverify, BuildError, ProcId};
use crate::host::Host;
use crate::module::{DataPiece, Module, Op, Syscall};
use crate::types::WORD_SIZE;

/// Default execution stack size: 512 KiB.
pub const DEFAULT_STACK_SIZE: usize = 512 * 1024;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltStatus {
    /// The entry procedure ran to completion.
    End,
    /// An `exit` syscall fired, carrying the popped exit code.
    Exit(u8),
    /// The interrupt flag was raised between two operations.
    Interrupt,
    /// A push would have grown the stack past its bounds.
    StackOverflow,
    /// A division or remainder by zero.
    DivByZero,
    /// An operation the engine cannot dispatch. Unreachable for modules
    /// produced by this crate's builder or decoder.
    UnknownOp,
}

/// Binary arithmetic and bitwise operators, shared by the two-operand and
/// immediate operation forms.
#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    DivS,
    Mod,
    ModS,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrS,
}

/// An operation lowered for dispatch: symbolic references resolved to
/// byte offsets, widths, and absolute addresses.
#[derive(Debug, Clone, Copy)]
enum PreparedOp {
    Nop,
    End,
    Push { width: u8, value: u64 },
    Addr { offset: usize },
    Load { size: usize },
    Store { size: usize },
    Sys(Syscall),
    Bin { op: BinOp, w1: u8, w2: u8 },
    BinImm { op: BinOp, width: u8, imm: u64 },
    Not { width: u8 },
    Drop { size: usize },
}

// `lhs <op> rhs` over 64-bit widened operands; `None` is division by zero.
fn apply_bin(op: BinOp, lhs: u64, rhs: u64, lhs_s: i64, rhs_s: i64) -> Option<u64> {
    Some(match op {
        BinOp::Add => lhs.wrapping_add(rhs),
        BinOp::Sub => lhs.wrapping_sub(rhs),
        BinOp::Mul => lhs.wrapping_mul(rhs),
        BinOp::Div => {
            if rhs == 0 {
                return None;
            }
            lhs / rhs
        }
        BinOp::Mod => {
            if rhs == 0 {
                return None;
            }
            lhs % rhs
        }
        BinOp::DivS => {
            if rhs_s == 0 {
                return None;
            }
            lhs_s.wrapping_div(rhs_s) as u64
        }
        BinOp::ModS => {
            if rhs_s == 0 {
                return None;
            }
            lhs_s.wrapping_rem(rhs_s) as u64
        }
        BinOp::And => lhs & rhs,
        BinOp::Or => lhs | rhs,
        BinOp::Xor => lhs ^ rhs,
        BinOp::Shl => lhs.wrapping_shl(rhs as u32),
        BinOp::Shr => lhs.wrapping_shr(rhs as u32),
        BinOp::ShrS => lhs_s.wrapping_shr(rhs as u32) as u64,
    })
}

fn bin_op_of(op: Op) -> Option<(BinOp, Option<u64>)> {
    Some(match op {
        Op::Add => (BinOp::Add, None),
        Op::Sub => (BinOp::Sub, None),
        Op::Mul => (BinOp::Mul, None),
        Op::Div => (BinOp::Div, None),
        Op::DivS => (BinOp::DivS, None),
        Op::Mod => (BinOp::Mod, None),
        Op::ModS => (BinOp::ModS, None),
        Op::And => (BinOp::And, None),
        Op::Or => (BinOp::Or, None),
        Op::Xor => (BinOp::Xor, None),
        Op::Shl => (BinOp::Shl, None),
        Op::Shr => (BinOp::Shr, None),
        Op::ShrS => (BinOp::ShrS, None),
        Op::AddImm(v) => (BinOp::Add, Some(v)),
        Op::SubImm(v) => (BinOp::Sub, Some(v)),
        Op::MulImm(v) => (BinOp::Mul, Some(v)),
        Op::DivImm(v) => (BinOp::Div, Some(v)),
        Op::DivSImm(v) => (BinOp::DivS, Some(v)),
        Op::ModImm(v) => (BinOp::Mod, Some(v)),
        Op::ModSImm(v) => (BinOp::ModS, Some(v)),
        Op::AndImm(v) => (BinOp::And, Some(v)),
        Op::OrImm(v) => (BinOp::Or, Some(v)),
        Op::XorImm(v) => (BinOp::Xor, Some(v)),
        Op::ShlImm(v) => (BinOp::Shl, Some(v)),
        Op::ShrImm(v) => (BinOp::Shr, Some(v)),
        Op::ShrSImm(v) => (BinOp::ShrS, Some(v)),
        _ => return None,
    })
}

/// An execution environment: a verified, prepared module plus its runtime
/// state, ready to run any number of times.
pub struct ExecEnv<H: Host> {
    host: H,
    stack: Box<[u8]>,
    // Index of the stack top; `stack.len()` when the stack is empty. The
    // stack grows toward index 0.
    head: usize,
    seg_data: Vec<Box<[u8]>>,
    code: Vec<PreparedOp>,
}

impl<H: Host> ExecEnv<H> {
    /// Prepares `module` for execution with the default stack size.
    ///
    /// Fails if the module has no entry point or any operation violates
    /// its stack contract.
    pub fn new(module: &Module, host: H) -> Result<Self, BuildError> {
        Self::with_stack_size(module, host, DEFAULT_STACK_SIZE)
    }

    /// Prepares `module` for execution with an explicit stack size in
    /// bytes.
    pub fn with_stack_size(
        module: &Module,
        host: H,
        stack_size: usize,
    ) -> Result<Self, BuildError> {
        let entry = module.entry.ok_or(BuildError::MissingEntryPoint)?;
        let builder = reverify(module)?;

        // Materialize data blocks in two phases so address pieces may
        // refer to any block, including their own.
        let mut seg_data: Vec<Box<[u8]>> = module
            .blocks
            .iter()
            .map(|b| vec![0u8; b.runtime_size()].into_boxed_slice())
            .collect();
        let bases: Vec<usize> = seg_data.iter().map(|b| b.as_ptr() as usize).collect();
        for (block, buf) in module.blocks.iter().zip(seg_data.iter_mut()) {
            let mut offset = 0;
            for piece in &block.pieces {
                let size = piece.runtime_size();
                let out = &mut buf[offset..offset + size];
                match piece {
                    DataPiece::Bytes(bytes) => out.copy_from_slice(bytes),
                    DataPiece::Int16(v) => out.copy_from_slice(&v.to_ne_bytes()),
                    DataPiece::Int32(v) => out.copy_from_slice(&v.to_ne_bytes()),
                    DataPiece::IntPtr(v) => out.copy_from_slice(&(*v as usize).to_ne_bytes()),
                    DataPiece::Int64(v) => out.copy_from_slice(&v.to_ne_bytes()),
                    DataPiece::DbAddr(target) => {
                        out.copy_from_slice(&bases[*target as usize].to_ne_bytes());
                    }
                    DataPiece::Zero(_) => {}
                    DataPiece::Builtin(b) => {
                        out.copy_from_slice(&(b.value() as usize).to_ne_bytes());
                    }
                }
                offset += size;
            }
        }

        let pid = ProcId(entry);
        let body = &module.procs[entry as usize].body;
        let mut code = Vec::with_capacity(body.len() + 1);
        for (i, &op) in body.iter().enumerate() {
            let at = i as u32;
            let lowered = match op {
                Op::Nop => PreparedOp::Nop,
                Op::End => PreparedOp::End,
                Op::PushInt8(v) => PreparedOp::Push { width: 1, value: v },
                Op::PushInt16(v) => PreparedOp::Push { width: 2, value: v },
                Op::PushInt32(v) => PreparedOp::Push { width: 4, value: v },
                Op::PushIntPtr(v) => PreparedOp::Push { width: WORD_SIZE as u8, value: v },
                Op::PushInt64(v) => PreparedOp::Push { width: 8, value: v },
                // In the state after the push, the referenced item sits
                // one position deeper.
                Op::Addr(n) => PreparedOp::Addr {
                    offset: builder.stack_item_offset(pid, at + 1, n + 1)?,
                },
                Op::DbAddr(block) => PreparedOp::Push {
                    width: WORD_SIZE as u8,
                    value: bases[block as usize] as u64,
                },
                Op::Load(ty) => PreparedOp::Load { size: ty.runtime_size() },
                Op::Store => PreparedOp::Store {
                    size: builder.stack_item_size(pid, at, 1)?,
                },
                Op::Sys(s) => PreparedOp::Sys(s),
                Op::Builtin(b) => PreparedOp::Push {
                    width: WORD_SIZE as u8,
                    value: b.value(),
                },
                Op::Not => PreparedOp::Not {
                    width: builder.stack_item_size(pid, at, 0)? as u8,
                },
                Op::Drop => PreparedOp::Drop {
                    size: builder.stack_item_size(pid, at, 0)?,
                },
                other => {
                    // Remaining kinds are exactly the binary and immediate
                    // arithmetic forms.
                    let Some((bin, imm)) = bin_op_of(other) else {
                        unreachable!("non-arithmetic operation {:?}", other.kind())
                    };
                    let w1 = builder.stack_item_size(pid, at, 0)? as u8;
                    match imm {
                        Some(imm) => PreparedOp::BinImm { op: bin, width: w1, imm },
                        None => PreparedOp::Bin {
                            op: bin,
                            w1,
                            w2: builder.stack_item_size(pid, at, 1)? as u8,
                        },
                    }
                }
            };
            code.push(lowered);
        }
        // Falling off the end of the entry body halts cleanly.
        code.push(PreparedOp::End);

        debug!(ops = code.len(), blocks = seg_data.len(), stack_size, "execution environment ready");
        Ok(Self {
            host,
            stack: vec![0u8; stack_size].into_boxed_slice(),
            head: stack_size,
            seg_data,
            code,
        })
    }

    /// The materialized contents of a data block, or `None` for an id the
    /// module does not declare.
    #[must_use]
    pub fn data_block(&self, id: u32) -> Option<&[u8]> {
        self.seg_data.get(id as usize).map(|block| &block[..])
    }

    /// A reference to the host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// A mutable reference to the host.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Consumes the environment, returning the host.
    pub fn into_host(self) -> H {
        self.host
    }

    fn read_slot(&self, index: usize, width: u8) -> u64 {
        let s = &self.stack;
        match width {
            1 => u64::from(s[index]),
            2 => u64::from(u16::from_ne_bytes([s[index], s[index + 1]])),
            4 => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&s[index..index + 4]);
                u64::from(u32::from_ne_bytes(buf))
            }
            _ => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&s[index..index + 8]);
                u64::from_ne_bytes(buf)
            }
        }
    }

    fn read_slot_signed(&self, index: usize, width: u8) -> i64 {
        let s = &self.stack;
        match width {
            1 => i64::from(s[index] as i8),
            2 => i64::from(i16::from_ne_bytes([s[index], s[index + 1]])),
            4 => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&s[index..index + 4]);
                i64::from(i32::from_ne_bytes(buf))
            }
            _ => self.read_slot(index, 8) as i64,
        }
    }

    fn write_slot(&mut self, index: usize, width: u8, value: u64) {
        let s = &mut self.stack;
        match width {
            1 => s[index] = value as u8,
            2 => s[index..index + 2].copy_from_slice(&(value as u16).to_ne_bytes()),
            4 => s[index..index + 4].copy_from_slice(&(value as u32).to_ne_bytes()),
            _ => s[index..index + 8].copy_from_slice(&value.to_ne_bytes()),
        }
    }

    fn read_word(&self, index: usize) -> usize {
        self.read_slot(index, WORD_SIZE as u8) as usize
    }

    // Returns false when the stack is full.
    fn push(&mut self, width: u8, value: u64) -> bool {
        let w = usize::from(width);
        if self.head < w {
            return false;
        }
        self.head -= w;
        self.write_slot(self.head, width, value);
        true
    }

    /// Runs the entry procedure from the beginning with an empty stack.
    ///
    /// When `interrupt` is given, the flag is polled between operations
    /// with relaxed ordering; raising it from another thread stops the run
    /// at the next operation boundary.
    pub fn run(&mut self, interrupt: Option<&AtomicBool>) -> HaltStatus {
        self.head = self.stack.len();
        let mut pc = 0usize;
        debug!(ops = self.code.len(), "run started");
        let status = loop {
            if let Some(flag) = interrupt {
                if flag.load(Ordering::Relaxed) {
                    break HaltStatus::Interrupt;
                }
            }
            let Some(&op) = self.code.get(pc) else {
                break HaltStatus::End;
            };
            trace!(pc, ?op, head = self.head);
            pc += 1;
            match op {
                PreparedOp::Nop => {}
                PreparedOp::End => break HaltStatus::End,
                PreparedOp::Push { width, value } => {
                    if !self.push(width, value) {
                        break HaltStatus::StackOverflow;
                    }
                }
                PreparedOp::Addr { offset } => {
                    if self.head < WORD_SIZE {
                        break HaltStatus::StackOverflow;
                    }
                    self.head -= WORD_SIZE;
                    let addr = self.stack.as_ptr() as usize + self.head + offset;
                    self.write_slot(self.head, WORD_SIZE as u8, addr as u64);
                }
                PreparedOp::Load { size } => {
                    let src = self.read_word(self.head);
                    let Some(new_head) = (self.head + WORD_SIZE).checked_sub(size) else {
                        break HaltStatus::StackOverflow;
                    };
                    // The source may overlap the destination when the
                    // pointer targets the stack itself.
                    unsafe {
                        core::ptr::copy(
                            src as *const u8,
                            self.stack.as_mut_ptr().add(new_head),
                            size,
                        );
                    }
                    self.head = new_head;
                }
                PreparedOp::Store { size } => {
                    let dst = self.read_word(self.head);
                    let src = self.head + WORD_SIZE;
                    unsafe {
                        core::ptr::copy(self.stack.as_ptr().add(src), dst as *mut u8, size);
                    }
                    self.head = src + size;
                }
                PreparedOp::Sys(Syscall::Exit) => {
                    let code = self.read_word(self.head);
                    self.head += WORD_SIZE;
                    break HaltStatus::Exit(code as u8);
                }
                PreparedOp::Sys(Syscall::Write) => {
                    let len = self.read_word(self.head);
                    let addr = self.read_word(self.head + WORD_SIZE);
                    let fd = self.read_word(self.head + 2 * WORD_SIZE) as i64;
                    let result = if len == 0 {
                        self.host.write(fd, &[])
                    } else {
                        let buf = unsafe { core::slice::from_raw_parts(addr as *const u8, len) };
                        self.host.write(fd, buf)
                    };
                    self.head += 2 * WORD_SIZE;
                    self.write_slot(self.head, WORD_SIZE as u8, result as u64);
                }
                PreparedOp::Sys(Syscall::Read) => {
                    let len = self.read_word(self.head);
                    let addr = self.read_word(self.head + WORD_SIZE);
                    let fd = self.read_word(self.head + 2 * WORD_SIZE) as i64;
                    let result = if len == 0 {
                        self.host.read(fd, &mut [])
                    } else {
                        let buf =
                            unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, len) };
                        self.host.read(fd, buf)
                    };
                    self.head += 2 * WORD_SIZE;
                    self.write_slot(self.head, WORD_SIZE as u8, result as u64);
                }
                PreparedOp::Bin { op, w1, w2 } => {
                    let rhs = self.read_slot(self.head, w1);
                    let rhs_s = self.read_slot_signed(self.head, w1);
                    let lhs = self.read_slot(self.head + usize::from(w1), w2);
                    let lhs_s = self.read_slot_signed(self.head + usize::from(w1), w2);
                    let Some(value) = apply_bin(op, lhs, rhs, lhs_s, rhs_s) else {
                        break HaltStatus::DivByZero;
                    };
                    // The result takes the top operand's width and lands
                    // where it leaves the stack shrunk by the second
                    // operand's width.
                    self.head += usize::from(w2);
                    self.write_slot(self.head, w1, value);
                }
                PreparedOp::BinImm { op, width, imm } => {
                    let lhs = self.read_slot(self.head, width);
                    let lhs_s = self.read_slot_signed(self.head, width);
                    let Some(value) = apply_bin(op, lhs, imm, lhs_s, imm as i64) else {
                        break HaltStatus::DivByZero;
                    };
                    self.write_slot(self.head, width, value);
                }
                PreparedOp::Not { width } => {
                    let value = !self.read_slot(self.head, width);
                    self.write_slot(self.head, width, value);
                }
                PreparedOp::Drop { size } => self.head += size,
            }
        };
        debug!(?status, "run halted");
        status
    }
}
