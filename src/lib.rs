// Copyright 2026 the Stack Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A compact, verifiable stack-IR bytecode format and VM runtime.
//!
//! Modules hold straight-line procedures over one byte-addressed stack,
//! plus named data blocks materialized at load time. The
//! [`builder`] verifies every operation's stack contract as it is
//! appended and records the abstract stack after each one, the [`codec`]
//! gives modules a deterministic binary form, and the [`vm`] lowers a
//! verified module to concrete offsets and addresses and interprets it
//! against a host.
//!
//! ```
//! use stack_tape::builder::ModuleBuilder;
//! use stack_tape::host::Host;
//! use stack_tape::module::{Builtin, DataPiece, Op, Syscall};
//! use stack_tape::types::Type;
//! use stack_tape::vm::{ExecEnv, HaltStatus};
//!
//! // A host that collects everything written to it.
//! struct Sink(Vec<u8>);
//!
//! impl Host for Sink {
//!     fn write(&mut self, _fd: i64, buf: &[u8]) -> i64 {
//!         self.0.extend_from_slice(buf);
//!         buf.len() as i64
//!     }
//!     fn read(&mut self, _fd: i64, _buf: &mut [u8]) -> i64 {
//!         -1
//!     }
//! }
//!
//! let mut b = ModuleBuilder::new();
//! let text = b.add_data_block("text", false)?;
//! b.add_data_piece(text, DataPiece::Bytes(b"Hello, World!".to_vec()))?;
//! let main = b.add_proc("main", &[], Type::VOID)?;
//! b.add_op(main, Op::Builtin(Builtin::Stdout))?;
//! b.add_op(main, Op::DbAddr(0))?;
//! b.add_op(main, Op::PushIntPtr(13))?;
//! b.add_op(main, Op::Sys(Syscall::Write))?;
//! b.add_op(main, Op::PushIntPtr(0))?;
//! b.add_op(main, Op::Sys(Syscall::Exit))?;
//! b.set_entry_point(main)?;
//! let module = b.extract()?;
//!
//! let mut env = ExecEnv::new(&module, Sink(Vec::new()))?;
//! assert_eq!(env.run(None), HaltStatus::Exit(0));
//! assert_eq!(env.host().0, b"Hello, World!");
//! # Ok::<(), stack_tape::builder::BuildError>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod builder;
pub mod codec;
pub mod format;
pub mod host;
pub mod module;
mod stack;
pub mod types;
pub mod vm;
