// Copyright 2026 the Stack Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end tests over the public API: build, encode, decode, verify,
//! and execute.

use std::sync::atomic::AtomicBool;

use stack_tape::builder::{verify_module, BuildError, ModuleBuilder};
use stack_tape::codec::{decode_module, encode_module};
use stack_tape::host::Host;
use stack_tape::module::{Builtin, DataPiece, Module, Op, OpKind, Syscall};
use stack_tape::types::{Type, TypeKind, WORD_SIZE};
use stack_tape::vm::{ExecEnv, HaltStatus};

/// Records writes and serves reads from a canned input.
#[derive(Debug, Default)]
struct RecordingHost {
    writes: Vec<(i64, Vec<u8>)>,
    input: Vec<u8>,
}

impl Host for RecordingHost {
    fn write(&mut self, fd: i64, buf: &[u8]) -> i64 {
        self.writes.push((fd, buf.to_vec()));
        buf.len() as i64
    }

    fn read(&mut self, fd: i64, buf: &mut [u8]) -> i64 {
        if fd != 0 {
            return -1;
        }
        let n = self.input.len().min(buf.len());
        buf[..n].copy_from_slice(&self.input[..n]);
        self.input.drain(..n);
        n as i64
    }
}

fn hello_module() -> Module {
    let mut b = ModuleBuilder::new();
    let msg = b.add_data_block("msg", false).unwrap();
    b.add_data_piece(msg, DataPiece::Bytes(b"Hello, World!".to_vec())).unwrap();
    let main = b.add_proc("main", &[], Type::VOID).unwrap();
    b.add_op(main, Op::Builtin(Builtin::Stdout)).unwrap();
    b.add_op(main, Op::DbAddr(0)).unwrap();
    b.add_op(main, Op::PushIntPtr(13)).unwrap();
    b.add_op(main, Op::Sys(Syscall::Write)).unwrap();
    b.add_op(main, Op::PushIntPtr(0)).unwrap();
    b.add_op(main, Op::Sys(Syscall::Exit)).unwrap();
    b.set_entry_point(main).unwrap();
    b.extract().unwrap()
}

#[test]
fn hello_world_executes_through_the_full_pipeline() {
    let module = hello_module();
    let bytes = encode_module(&module);
    let decoded = decode_module(&bytes).unwrap();
    assert_eq!(decoded, module);
    verify_module(&decoded).unwrap();

    let mut env = ExecEnv::new(&decoded, RecordingHost::default()).unwrap();
    assert_eq!(env.run(None), HaltStatus::Exit(0));
    assert_eq!(env.host().writes, vec![(1, b"Hello, World!".to_vec())]);
}

#[test]
fn golden_hello_world_bytes() {
    let expected: Vec<u8> = [
        &[
            0x53, 0x54, 0x54, 0x41, 0x50, 0x45, 0x00, 0x01, // magic
            0x01, // one data block
            0x00, 0x01, // name 0, immutable, one piece
            0x01, // one procedure
            0x08, 0x0d, // return type void
            0x10, // name 1, no arguments
            0x06, // six operations
            0x00, // entry point
            0x00, 0x08, 0x0d, // byte piece, 13 bytes
        ][..],
        b"Hello, World!",
        &[
            0x0c, 0x02, // builtin stdout
            0x08, 0x00, // dbaddr 0
            0x05, 0x08, 0x0d, // push-ptr 13
            0x0b, 0x01, // sys write
            0x05, 0x00, // push-ptr 0
            0x0b, 0x00, // sys exit
        ][..],
        b"msg\0main\0",
    ]
    .concat();
    assert_eq!(encode_module(&hello_module()), expected);
}

#[test]
fn encoding_is_deterministic_across_builds() {
    assert_eq!(encode_module(&hello_module()), encode_module(&hello_module()));
}

#[test]
fn non_word_sized_syscall_argument_is_rejected() {
    let mut b = ModuleBuilder::new();
    let main = b.add_proc("main", &[], Type::VOID).unwrap();
    b.add_op(main, Op::PushInt8(0)).unwrap();
    let err = b.add_op(main, Op::Sys(Syscall::Exit)).unwrap_err();
    assert_eq!(
        err,
        BuildError::WordSizedOperandRequired { op: OpKind::Sys, index: 0, found: Type::I8 }
    );
    // The builder stays poisoned through extraction.
    assert_eq!(b.extract(), Err(err));
}

#[test]
fn non_word_sized_load_address_is_rejected() {
    let mut b = ModuleBuilder::new();
    let main = b.add_proc("main", &[], Type::VOID).unwrap();
    b.add_op(main, Op::PushInt8(0)).unwrap();
    let err = b.add_op(main, Op::Load(Type::I8)).unwrap_err();
    assert_eq!(
        err,
        BuildError::WordSizedOperandRequired { op: OpKind::Load, index: 0, found: Type::I8 }
    );
    // A module with the bad address never reaches execution.
    assert_eq!(b.extract(), Err(err));
}

#[test]
fn non_word_sized_store_address_is_rejected() {
    let mut b = ModuleBuilder::new();
    let main = b.add_proc("main", &[], Type::VOID).unwrap();
    b.add_op(main, Op::PushInt64(7)).unwrap();
    b.add_op(main, Op::PushInt8(0)).unwrap();
    let err = b.add_op(main, Op::Store).unwrap_err();
    assert_eq!(
        err,
        BuildError::WordSizedOperandRequired { op: OpKind::Store, index: 0, found: Type::I8 }
    );
}

#[test]
fn store_underflow_reports_exact_counts() {
    let mut b = ModuleBuilder::new();
    let main = b.add_proc("main", &[], Type::VOID).unwrap();
    b.add_op(main, Op::PushIntPtr(0)).unwrap();
    let err = b.add_op(main, Op::Store).unwrap_err();
    assert_eq!(err, BuildError::StackUnderflow { op: OpKind::Store, expected: 2, actual: 1 });
}

#[test]
fn zero_then_bytes_block_materializes_to_eighteen_bytes() {
    let mut b = ModuleBuilder::new();
    let scratch = b.add_data_block("scratch", true).unwrap();
    b.add_data_piece(scratch, DataPiece::Zero(Type::array(TypeKind::I32, 4))).unwrap();
    b.add_data_piece(scratch, DataPiece::Bytes(b"AB".to_vec())).unwrap();
    let main = b.add_proc("main", &[], Type::VOID).unwrap();
    b.add_op(main, Op::End).unwrap();
    b.set_entry_point(main).unwrap();
    let module = b.extract().unwrap();

    // Through the wire and back before materializing.
    let decoded = decode_module(&encode_module(&module)).unwrap();
    let env = ExecEnv::new(&decoded, RecordingHost::default()).unwrap();
    let block = env.data_block(0).unwrap();
    assert_eq!(block.len(), 18);
    assert_eq!(&block[..16], &[0u8; 16]);
    assert_eq!(&block[16..], b"AB");
}

#[test]
fn read_syscall_fills_a_mutable_block() {
    let mut b = ModuleBuilder::new();
    let buf = b.add_data_block("buf", true).unwrap();
    b.add_data_piece(buf, DataPiece::Zero(Type::array(TypeKind::I8, 8))).unwrap();
    let out = b.add_data_block("out", true).unwrap();
    b.add_data_piece(out, DataPiece::Zero(Type::PTR)).unwrap();
    let main = b.add_proc("main", &[], Type::VOID).unwrap();
    b.add_op(main, Op::Builtin(Builtin::Stdin)).unwrap();
    b.add_op(main, Op::DbAddr(0)).unwrap();
    b.add_op(main, Op::PushIntPtr(5)).unwrap();
    b.add_op(main, Op::Sys(Syscall::Read)).unwrap();
    // Store the read result so it can be inspected afterwards.
    b.add_op(main, Op::DbAddr(1)).unwrap();
    b.add_op(main, Op::Store).unwrap();
    b.set_entry_point(main).unwrap();
    let module = b.extract().unwrap();

    let host = RecordingHost { input: b"abcdefgh".to_vec(), ..Default::default() };
    let mut env = ExecEnv::new(&module, host).unwrap();
    assert_eq!(env.run(None), HaltStatus::End);
    let buf = env.data_block(0).unwrap();
    assert_eq!(&buf[..5], b"abcde");
    assert_eq!(&buf[5..], &[0u8; 3]);
    let result = usize::from_ne_bytes(env.data_block(1).unwrap().try_into().unwrap());
    assert_eq!(result, 5);
}

#[test]
fn recorded_states_survive_later_operations() {
    let mut b = ModuleBuilder::new();
    let main = b.add_proc("main", &[], Type::VOID).unwrap();
    b.add_op(main, Op::PushInt32(1)).unwrap();
    b.label_stack_item(main, 1, 0, "base").unwrap();
    b.add_op(main, Op::PushInt8(2)).unwrap();
    b.add_op(main, Op::Drop).unwrap();
    b.add_op(main, Op::PushInt64(3)).unwrap();

    // Every intermediate state is still addressable after the fact.
    assert_eq!(b.stack_depth(main, 0), Ok(0));
    assert_eq!(b.stack_depth(main, 1), Ok(1));
    assert_eq!(b.stack_depth(main, 2), Ok(2));
    assert_eq!(b.stack_depth(main, 3), Ok(1));
    assert_eq!(b.stack_depth(main, 4), Ok(2));
    assert_eq!(b.stack_item_type(main, 2, 0), Ok(Type::I8));
    assert_eq!(b.stack_item_type(main, 4, 0), Ok(Type::I64));
    // The label attached before the push-and-drop detour still resolves.
    assert_eq!(b.stack_item_by_name(main, 4, "base"), Some(1));
    assert_eq!(b.stack_item_offset(main, 4, 1), Ok(8));
}

#[test]
fn equal_push_sequences_are_indistinguishable_by_queries() {
    let mut b = ModuleBuilder::new();
    let base = &[Type::I32, Type::PTR];
    let direct = b.add_proc("direct", base, Type::VOID).unwrap();
    let detour = b.add_proc("detour", base, Type::VOID).unwrap();
    // Take a push-and-drop detour before converging on the same shape.
    b.add_op(detour, Op::PushInt16(0)).unwrap();
    b.add_op(detour, Op::Drop).unwrap();
    for p in [direct, detour] {
        b.add_op(p, Op::PushInt8(1)).unwrap();
        b.add_op(p, Op::PushInt64(2)).unwrap();
    }
    let direct_at = 2;
    let detour_at = 4;
    assert_eq!(
        b.stack_depth(direct, direct_at).unwrap(),
        b.stack_depth(detour, detour_at).unwrap()
    );
    for item in 0..4 {
        assert_eq!(
            b.stack_item_type(direct, direct_at, item).unwrap(),
            b.stack_item_type(detour, detour_at, item).unwrap()
        );
        assert_eq!(
            b.stack_item_offset(direct, direct_at, item).unwrap(),
            b.stack_item_offset(detour, detour_at, item).unwrap()
        );
    }
}

#[test]
fn interrupt_flag_halts_execution() {
    let mut env = ExecEnv::new(&hello_module(), RecordingHost::default()).unwrap();
    let flag = AtomicBool::new(true);
    assert_eq!(env.run(Some(&flag)), HaltStatus::Interrupt);
    assert!(env.host().writes.is_empty());
}

#[test]
fn stack_overflow_halts_execution() {
    let mut b = ModuleBuilder::new();
    let main = b.add_proc("main", &[], Type::VOID).unwrap();
    for _ in 0..4 {
        b.add_op(main, Op::PushInt64(0)).unwrap();
    }
    b.set_entry_point(main).unwrap();
    let module = b.extract().unwrap();
    let mut env =
        ExecEnv::with_stack_size(&module, RecordingHost::default(), 3 * 8).unwrap();
    assert_eq!(env.run(None), HaltStatus::StackOverflow);
}

#[test]
fn arithmetic_results_use_word_width_for_syscalls() {
    // Compute an exit code with immediate arithmetic and hand it to exit.
    let mut b = ModuleBuilder::new();
    let main = b.add_proc("main", &[], Type::VOID).unwrap();
    b.add_op(main, Op::PushIntPtr(6)).unwrap();
    b.add_op(main, Op::MulImm(7)).unwrap();
    b.add_op(main, Op::Sys(Syscall::Exit)).unwrap();
    b.set_entry_point(main).unwrap();
    let module = b.extract().unwrap();
    let mut env = ExecEnv::new(&module, RecordingHost::default()).unwrap();
    assert_eq!(env.run(None), HaltStatus::Exit(42));
}

#[test]
fn mixed_width_binary_ops_roundtrip_the_wire() {
    let mut b = ModuleBuilder::new();
    let main = b.add_proc("main", &[], Type::VOID).unwrap();
    b.add_op(main, Op::PushInt64(1000)).unwrap();
    b.add_op(main, Op::PushInt16(24)).unwrap();
    b.add_op(main, Op::Add).unwrap();
    b.add_op(main, Op::Drop).unwrap();
    b.set_entry_point(main).unwrap();
    let module = b.extract().unwrap();

    let decoded = decode_module(&encode_module(&module)).unwrap();
    assert_eq!(decoded, module);
    let mut env = ExecEnv::new(&decoded, RecordingHost::default()).unwrap();
    assert_eq!(env.run(None), HaltStatus::End);
}

#[test]
fn offsets_track_word_size() {
    let mut b = ModuleBuilder::new();
    let main = b.add_proc("main", &[], Type::VOID).unwrap();
    b.add_op(main, Op::PushInt8(0)).unwrap();
    b.add_op(main, Op::Builtin(Builtin::Null)).unwrap();
    assert_eq!(b.stack_item_offset(main, 2, 0), Ok(0));
    assert_eq!(b.stack_item_offset(main, 2, 1), Ok(WORD_SIZE));
}
