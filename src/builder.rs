// Copyright 2026 the Stack Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Incremental module construction with per-operation verification.
//!
//! A [`ModuleBuilder`] checks the stack contract of every operation as it
//! is appended and records the abstract stack state after each one. The
//! recorded history backs the post-hoc queries (item type, size, offset,
//! name lookup) that code generators need for addressing locals.
//!
//! Errors are sticky: once any mutating call fails, every later mutating
//! call and the final [`extract`](ModuleBuilder::extract) return the same
//! first error, so a caller may assemble a whole procedure and check once
//! at the end.

use thiserror::Error;
use tracing::debug;

use crate::module::{DataBlock, DataPiece, Module, Op, OpKind, Proc, Syscall};
use crate::stack::{NodeArena, StackState};
use crate::types::{Type, WORD_SIZE};

/// Handle to a procedure added to a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcId(
    /// Index of the procedure in declaration order.
    pub u32,
);

/// Handle to a data block added to a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockId(
    /// Index of the block in declaration order.
    pub u32,
);

/// Errors raised while building or verifying a module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// An operation required more stack items than were present.
    #[error("stack underflow for `{op}`: expected {expected} items, found {actual}")]
    StackUnderflow {
        /// The offending operation.
        op: OpKind,
        /// Items the operation consumes.
        expected: u32,
        /// Items actually on the abstract stack.
        actual: u32,
    },
    /// An operand referred to a stack item or data block that does not
    /// exist.
    #[error("operand {operand} is out of range for `{op}`")]
    OperandOutOfRange {
        /// The offending operation.
        op: OpKind,
        /// The raw operand value.
        operand: u64,
    },
    /// A syscall argument was not exactly one pointer-sized slot.
    #[error("`{op}` requires a pointer-sized argument, but item {index} is {found}")]
    WordSizedOperandRequired {
        /// The offending operation.
        op: OpKind,
        /// Index of the argument from the top of the stack.
        index: u32,
        /// The argument's actual type.
        found: Type,
    },
    /// An arithmetic operand's width is not 1, 2, 4, or 8 bytes.
    #[error("unsupported operand width {size} for `{op}`")]
    UnsupportedOperandWidth {
        /// The offending operation.
        op: OpKind,
        /// Width of the operand in bytes.
        size: usize,
    },
    /// A procedure handle did not name an existing procedure.
    #[error("procedure #{0} does not exist")]
    InvalidProcId(u32),
    /// A data block handle did not name an existing block.
    #[error("data block #{0} does not exist")]
    InvalidBlockId(u32),
    /// An operation index was past the end of a procedure's history.
    #[error("procedure #{proc} has no state after {op_index} operations")]
    InvalidOpIndex {
        /// The procedure queried.
        proc: u32,
        /// The out-of-range operation count.
        op_index: u32,
    },
    /// A queried or labeled stack item does not exist in that state.
    #[error("no stack item #{item} in a stack of {depth} items")]
    NoSuchStackItem {
        /// The requested item index from the top.
        item: u32,
        /// Depth of the stack at that point.
        depth: u32,
    },
    /// The entry point does not name an existing procedure.
    #[error("invalid entry point: procedure #{0} does not exist")]
    InvalidEntryPoint(u32),
    /// The entry procedure takes arguments or returns a value.
    #[error("the entry procedure must take no arguments and return void")]
    InvalidEntrySignature,
    /// The module was extracted or executed without an entry point.
    #[error("no entry point was set")]
    MissingEntryPoint,
}

/// Incrementally builds a [`Module`], verifying each operation.
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
    arena: NodeArena,
    // One history per procedure. Slot 0 is the argument state; slot i + 1
    // is the state after operation i.
    states: Vec<Vec<StackState>>,
    error: Option<BuildError>,
}

impl ModuleBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> Result<(), BuildError> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn fail<T>(&mut self, err: BuildError) -> Result<T, BuildError> {
        debug!(error = %err, "module builder entered the error state");
        self.error = Some(err.clone());
        Err(err)
    }

    /// Adds a procedure with the given signature and returns its handle.
    ///
    /// The arguments seed the initial abstract stack with the first
    /// argument on top.
    pub fn add_proc(&mut self, name: &str, args: &[Type], ret: Type) -> Result<ProcId, BuildError> {
        self.guard()?;
        let mut state: StackState = None;
        for &arg in args.iter().rev() {
            state = self.arena.push(state, arg);
        }
        let id = ProcId(self.module.procs.len() as u32);
        self.module.procs.push(Proc {
            name: name.to_owned(),
            args: args.to_vec(),
            ret,
            body: Vec::new(),
        });
        self.states.push(vec![state]);
        Ok(id)
    }

    /// Adds a data block and returns its handle.
    pub fn add_data_block(&mut self, name: &str, is_mutable: bool) -> Result<BlockId, BuildError> {
        self.guard()?;
        let id = BlockId(self.module.blocks.len() as u32);
        self.module.blocks.push(DataBlock {
            name: name.to_owned(),
            is_mutable,
            pieces: Vec::new(),
        });
        Ok(id)
    }

    /// Appends an initializer piece to a data block.
    ///
    /// A [`DataPiece::DbAddr`] piece may only refer to an already declared
    /// block.
    pub fn add_data_piece(&mut self, block: BlockId, piece: DataPiece) -> Result<(), BuildError> {
        self.guard()?;
        if block.0 as usize >= self.module.blocks.len() {
            return self.fail(BuildError::InvalidBlockId(block.0));
        }
        if let DataPiece::DbAddr(target) = piece {
            if target as usize >= self.module.blocks.len() {
                return self.fail(BuildError::InvalidBlockId(target));
            }
        }
        self.module.blocks[block.0 as usize].pieces.push(piece);
        Ok(())
    }

    fn state(&self, proc: ProcId) -> StackState {
        *self.states[proc.0 as usize]
            .last()
            .unwrap_or(&None)
    }

    fn check_depth(&self, op: OpKind, state: StackState, expected: u32) -> Result<(), BuildError> {
        let actual = self.arena.depth(state);
        if actual < expected {
            Err(BuildError::StackUnderflow { op, expected, actual })
        } else {
            Ok(())
        }
    }

    fn check_arith_width(&self, op: OpKind, state: StackState, item: u32) -> Result<(), BuildError> {
        let node = self
            .arena
            .nth(state, item)
            .ok_or(BuildError::NoSuchStackItem { item, depth: self.arena.depth(state) })?;
        let size = self.arena.item_type(node).runtime_size();
        if matches!(size, 1 | 2 | 4 | 8) {
            Ok(())
        } else {
            Err(BuildError::UnsupportedOperandWidth { op, size })
        }
    }

    fn check_word_sized(&self, op: OpKind, state: StackState, index: u32) -> Result<(), BuildError> {
        let node = self
            .arena
            .nth(state, index)
            .ok_or(BuildError::NoSuchStackItem { item: index, depth: self.arena.depth(state) })?;
        let found = self.arena.item_type(node);
        if found.runtime_size() == WORD_SIZE {
            Ok(())
        } else {
            Err(BuildError::WordSizedOperandRequired { op, index, found })
        }
    }

    // Computes the successor state of `state` under `op`, or the reason the
    // operation is invalid there.
    fn op_effect(&mut self, op: Op, state: StackState) -> Result<StackState, BuildError> {
        let kind = op.kind();
        match op {
            Op::Nop => Ok(state),
            Op::End => Ok(None),
            Op::PushInt8(_) => Ok(self.arena.push(state, Type::I8)),
            Op::PushInt16(_) => Ok(self.arena.push(state, Type::I16)),
            Op::PushInt32(_) => Ok(self.arena.push(state, Type::I32)),
            Op::PushIntPtr(_) => Ok(self.arena.push(state, Type::PTR)),
            Op::PushInt64(_) => Ok(self.arena.push(state, Type::I64)),
            Op::Addr(item) => {
                if self.arena.nth(state, item).is_none() {
                    return Err(BuildError::OperandOutOfRange {
                        op: kind,
                        operand: u64::from(item),
                    });
                }
                Ok(self.arena.push(state, Type::PTR))
            }
            Op::DbAddr(block) => {
                if block as usize >= self.module.blocks.len() {
                    return Err(BuildError::OperandOutOfRange {
                        op: kind,
                        operand: u64::from(block),
                    });
                }
                Ok(self.arena.push(state, Type::PTR))
            }
            Op::Load(ty) => {
                self.check_depth(kind, state, 1)?;
                self.check_word_sized(kind, state, 0)?;
                if ty.runtime_size() == 0 {
                    return Err(BuildError::UnsupportedOperandWidth { op: kind, size: 0 });
                }
                self.arena
                    .exchange(state, 1, ty)
                    .ok_or(BuildError::StackUnderflow { op: kind, expected: 1, actual: 0 })
            }
            Op::Store => {
                self.check_depth(kind, state, 2)?;
                self.check_word_sized(kind, state, 0)?;
                self.arena.drop_n(state, 2).ok_or(BuildError::StackUnderflow {
                    op: kind,
                    expected: 2,
                    actual: self.arena.depth(state),
                })
            }
            Op::Sys(syscall) => {
                let n_args = syscall.arg_count();
                self.check_depth(kind, state, n_args)?;
                for index in 0..n_args {
                    self.check_word_sized(kind, state, index)?;
                }
                match syscall {
                    Syscall::Exit => Ok(None),
                    Syscall::Write | Syscall::Read => self
                        .arena
                        .exchange(state, n_args, Type::PTR)
                        .ok_or(BuildError::StackUnderflow {
                            op: kind,
                            expected: n_args,
                            actual: self.arena.depth(state),
                        }),
                }
            }
            Op::Builtin(_) => Ok(self.arena.push(state, Type::PTR)),
            Op::Add
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
            | Op::ShrS => {
                self.check_depth(kind, state, 2)?;
                self.check_arith_width(kind, state, 0)?;
                self.check_arith_width(kind, state, 1)?;
                let top = self
                    .arena
                    .nth(state, 0)
                    .ok_or(BuildError::StackUnderflow { op: kind, expected: 2, actual: 0 })?;
                let out = self.arena.item_type(top);
                self.arena.exchange(state, 2, out).ok_or(BuildError::StackUnderflow {
                    op: kind,
                    expected: 2,
                    actual: self.arena.depth(state),
                })
            }
            Op::AddImm(_)
            | Op::SubImm(_)
            | Op::MulImm(_)
            | Op::DivImm(_)
            | Op::DivSImm(_)
            | Op::ModImm(_)
            | Op::ModSImm(_)
            | Op::AndImm(_)
            | Op::OrImm(_)
            | Op::XorImm(_)
            | Op::ShlImm(_)
            | Op::ShrImm(_)
            | Op::ShrSImm(_)
            | Op::Not => {
                self.check_depth(kind, state, 1)?;
                self.check_arith_width(kind, state, 0)?;
                Ok(state)
            }
            Op::Drop => {
                self.check_depth(kind, state, 1)?;
                self.arena.drop_n(state, 1).ok_or(BuildError::StackUnderflow {
                    op: kind,
                    expected: 1,
                    actual: 0,
                })
            }
        }
    }

    /// Appends an operation to a procedure's body, verifying its stack
    /// contract against the current abstract state.
    pub fn add_op(&mut self, proc: ProcId, op: Op) -> Result<(), BuildError> {
        self.guard()?;
        if proc.0 as usize >= self.module.procs.len() {
            return self.fail(BuildError::InvalidProcId(proc.0));
        }
        let state = self.state(proc);
        match self.op_effect(op, state) {
            Ok(next) => {
                self.module.procs[proc.0 as usize].body.push(op);
                self.states[proc.0 as usize].push(next);
                Ok(())
            }
            Err(err) => self.fail(err),
        }
    }

    /// Marks a procedure as the module's entry point.
    ///
    /// The entry procedure must take no arguments and return void.
    pub fn set_entry_point(&mut self, proc: ProcId) -> Result<(), BuildError> {
        self.guard()?;
        let Some(p) = self.module.procs.get(proc.0 as usize) else {
            return self.fail(BuildError::InvalidEntryPoint(proc.0));
        };
        if !p.args.is_empty() || p.ret != Type::VOID {
            return self.fail(BuildError::InvalidEntrySignature);
        }
        self.module.entry = Some(proc.0);
        Ok(())
    }

    fn state_at(&self, proc: ProcId, op_index: u32) -> Result<StackState, BuildError> {
        let history = self
            .states
            .get(proc.0 as usize)
            .ok_or(BuildError::InvalidProcId(proc.0))?;
        history
            .get(op_index as usize)
            .copied()
            .ok_or(BuildError::InvalidOpIndex { proc: proc.0, op_index })
    }

    /// Attaches a name to stack item `item` in the state after the first
    /// `op_index` operations of `proc` (0 names an argument).
    ///
    /// The name is visible in every later state that still contains the
    /// item; a newer item with the same name shadows it.
    pub fn label_stack_item(
        &mut self,
        proc: ProcId,
        op_index: u32,
        item: u32,
        name: &str,
    ) -> Result<(), BuildError> {
        self.guard()?;
        let state = match self.state_at(proc, op_index) {
            Ok(state) => state,
            Err(err) => return self.fail(err),
        };
        match self.arena.nth(state, item) {
            Some(node) => {
                self.arena.set_name(node, name);
                Ok(())
            }
            None => self.fail(BuildError::NoSuchStackItem {
                item,
                depth: self.arena.depth(state),
            }),
        }
    }

    /// Type of stack item `item` after the first `op_index` operations.
    pub fn stack_item_type(
        &self,
        proc: ProcId,
        op_index: u32,
        item: u32,
    ) -> Result<Type, BuildError> {
        let state = self.state_at(proc, op_index)?;
        let node = self.arena.nth(state, item).ok_or(BuildError::NoSuchStackItem {
            item,
            depth: self.arena.depth(state),
        })?;
        Ok(self.arena.item_type(node))
    }

    /// Size in bytes of stack item `item` after the first `op_index`
    /// operations.
    pub fn stack_item_size(
        &self,
        proc: ProcId,
        op_index: u32,
        item: u32,
    ) -> Result<usize, BuildError> {
        Ok(self.stack_item_type(proc, op_index, item)?.runtime_size())
    }

    /// Byte offset of stack item `item` from the live stack head after the
    /// first `op_index` operations: the summed sizes of every item above
    /// it.
    pub fn stack_item_offset(
        &self,
        proc: ProcId,
        op_index: u32,
        item: u32,
    ) -> Result<usize, BuildError> {
        let state = self.state_at(proc, op_index)?;
        let depth = self.arena.depth(state);
        if item >= depth {
            return Err(BuildError::NoSuchStackItem { item, depth });
        }
        self.arena
            .offset_of(state, item)
            .ok_or(BuildError::NoSuchStackItem { item, depth })
    }

    /// Number of items on the abstract stack after the first `op_index`
    /// operations.
    pub fn stack_depth(&self, proc: ProcId, op_index: u32) -> Result<u32, BuildError> {
        Ok(self.arena.depth(self.state_at(proc, op_index)?))
    }

    /// Index from the top of the nearest item named `name` after the first
    /// `op_index` operations, if any.
    #[must_use]
    pub fn stack_item_by_name(&self, proc: ProcId, op_index: u32, name: &str) -> Option<u32> {
        let state = self.state_at(proc, op_index).ok()?;
        self.arena.find_name(state, name)
    }

    /// Finishes building, returning the verified module.
    ///
    /// Fails with the first recorded error if any mutating call failed, or
    /// if an entry point was set that no longer satisfies the entry
    /// contract.
    pub fn extract(self) -> Result<Module, BuildError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if let Some(entry) = self.module.entry {
            let p = self
                .module
                .procs
                .get(entry as usize)
                .ok_or(BuildError::InvalidEntryPoint(entry))?;
            if !p.args.is_empty() || p.ret != Type::VOID {
                return Err(BuildError::InvalidEntrySignature);
            }
        }
        debug!(
            procs = self.module.procs.len(),
            blocks = self.module.blocks.len(),
            "module extracted"
        );
        Ok(self.module)
    }
}

/// Checks every stack contract of `module`, as if it had been built
/// operation by operation through a [`ModuleBuilder`].
///
/// Decoded modules are only structurally validated; run this (or create an
/// execution environment, which does the same work) before trusting one.
pub fn verify_module(module: &Module) -> Result<(), BuildError> {
    reverify(module).map(|_| ())
}

/// Rebuilds `module` through a fresh [`ModuleBuilder`], verifying every
/// operation and data piece. Used to validate decoded modules.
pub(crate) fn reverify(module: &Module) -> Result<ModuleBuilder, BuildError> {
    let mut builder = ModuleBuilder::new();
    for block in &module.blocks {
        builder.add_data_block(&block.name, block.is_mutable)?;
    }
    for (id, block) in module.blocks.iter().enumerate() {
        for piece in &block.pieces {
            builder.add_data_piece(BlockId(id as u32), piece.clone())?;
        }
    }
    for proc in &module.procs {
        builder.add_proc(&proc.name, &proc.args, proc.ret)?;
    }
    for (id, proc) in module.procs.iter().enumerate() {
        for &op in &proc.body {
            builder.add_op(ProcId(id as u32), op)?;
        }
    }
    if let Some(entry) = module.entry {
        builder.set_entry_point(ProcId(entry))?;
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Builtin;
    use crate::types::TypeKind;

    fn entry_proc(builder: &mut ModuleBuilder) -> ProcId {
        builder.add_proc("main", &[], Type::VOID).unwrap()
    }

    #[test]
    fn push_then_drop_balances() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        b.add_op(p, Op::PushInt32(7)).unwrap();
        b.add_op(p, Op::Drop).unwrap();
        assert_eq!(b.stack_depth(p, 2), Ok(0));
        b.set_entry_point(p).unwrap();
        let module = b.extract().unwrap();
        assert_eq!(module.procs[0].body.len(), 2);
        assert_eq!(module.entry, Some(0));
    }

    #[test]
    fn underflow_reports_expected_and_actual() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        b.add_op(p, Op::PushInt8(1)).unwrap();
        let err = b.add_op(p, Op::Add).unwrap_err();
        assert_eq!(
            err,
            BuildError::StackUnderflow { op: OpKind::Add, expected: 2, actual: 1 }
        );
    }

    #[test]
    fn errors_are_sticky() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        let first = b.add_op(p, Op::Drop).unwrap_err();
        // A perfectly valid operation still reports the first error.
        assert_eq!(b.add_op(p, Op::PushInt8(0)), Err(first.clone()));
        assert_eq!(b.extract(), Err(first));
    }

    #[test]
    fn queries_do_not_poison() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        assert!(b.stack_item_type(p, 5, 0).is_err());
        // The failed query leaves the builder usable.
        b.add_op(p, Op::PushInt8(1)).unwrap();
    }

    #[test]
    fn syscall_requires_word_sized_args() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        b.add_op(p, Op::PushInt8(0)).unwrap();
        let err = b.add_op(p, Op::Sys(Syscall::Exit)).unwrap_err();
        assert_eq!(
            err,
            BuildError::WordSizedOperandRequired { op: OpKind::Sys, index: 0, found: Type::I8 }
        );
    }

    #[test]
    fn load_requires_word_sized_address() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        b.add_op(p, Op::PushInt8(0)).unwrap();
        let err = b.add_op(p, Op::Load(Type::I8)).unwrap_err();
        assert_eq!(
            err,
            BuildError::WordSizedOperandRequired { op: OpKind::Load, index: 0, found: Type::I8 }
        );
    }

    #[test]
    fn store_requires_word_sized_address() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        b.add_op(p, Op::PushInt64(5)).unwrap();
        b.add_op(p, Op::PushInt16(0)).unwrap();
        let err = b.add_op(p, Op::Store).unwrap_err();
        assert_eq!(
            err,
            BuildError::WordSizedOperandRequired { op: OpKind::Store, index: 0, found: Type::I16 }
        );
    }

    #[test]
    fn exit_clears_the_stack() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        b.add_op(p, Op::PushIntPtr(1)).unwrap();
        b.add_op(p, Op::PushIntPtr(0)).unwrap();
        b.add_op(p, Op::Sys(Syscall::Exit)).unwrap();
        assert_eq!(b.stack_depth(p, 3), Ok(0));
    }

    #[test]
    fn write_replaces_args_with_result() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        b.add_op(p, Op::Builtin(Builtin::Stdout)).unwrap();
        b.add_op(p, Op::PushIntPtr(0)).unwrap();
        b.add_op(p, Op::PushIntPtr(0)).unwrap();
        b.add_op(p, Op::Sys(Syscall::Write)).unwrap();
        assert_eq!(b.stack_depth(p, 4), Ok(1));
        assert_eq!(b.stack_item_type(p, 4, 0), Ok(Type::PTR));
    }

    #[test]
    fn addr_pushes_pointer_to_existing_item() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        b.add_op(p, Op::PushInt64(5)).unwrap();
        b.add_op(p, Op::Addr(0)).unwrap();
        assert_eq!(b.stack_item_type(p, 2, 0), Ok(Type::PTR));
        assert_eq!(b.stack_item_type(p, 2, 1), Ok(Type::I64));
        let err = b.add_op(p, Op::Addr(5)).unwrap_err();
        assert_eq!(err, BuildError::OperandOutOfRange { op: OpKind::Addr, operand: 5 });
    }

    #[test]
    fn dbaddr_checks_block_range() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        let err = b.add_op(p, Op::DbAddr(0)).unwrap_err();
        assert_eq!(err, BuildError::OperandOutOfRange { op: OpKind::DbAddr, operand: 0 });
    }

    #[test]
    fn forward_piece_references_rejected() {
        let mut b = ModuleBuilder::new();
        let block = b.add_data_block("a", false).unwrap();
        let err = b.add_data_piece(block, DataPiece::DbAddr(1)).unwrap_err();
        assert_eq!(err, BuildError::InvalidBlockId(1));
    }

    #[test]
    fn binary_op_takes_top_operand_type() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        b.add_op(p, Op::PushInt64(1)).unwrap();
        b.add_op(p, Op::PushInt8(2)).unwrap();
        b.add_op(p, Op::Add).unwrap();
        assert_eq!(b.stack_depth(p, 3), Ok(1));
        assert_eq!(b.stack_item_type(p, 3, 0), Ok(Type::I8));
    }

    #[test]
    fn arith_rejects_wide_operands() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        b.add_op(p, Op::PushIntPtr(0)).unwrap();
        b.add_op(p, Op::Addr(0)).unwrap();
        b.add_op(p, Op::Load(Type::array(TypeKind::I8, 3))).unwrap();
        let err = b.add_op(p, Op::Not).unwrap_err();
        assert_eq!(err, BuildError::UnsupportedOperandWidth { op: OpKind::Not, size: 3 });
    }

    #[test]
    fn arguments_seed_the_stack() {
        let mut b = ModuleBuilder::new();
        let p = b
            .add_proc("f", &[Type::I32, Type::I64], Type::VOID)
            .unwrap();
        assert_eq!(b.stack_depth(p, 0), Ok(2));
        // The first argument is on top.
        assert_eq!(b.stack_item_type(p, 0, 0), Ok(Type::I32));
        assert_eq!(b.stack_item_type(p, 0, 1), Ok(Type::I64));
        assert_eq!(b.stack_item_offset(p, 0, 1), Ok(4));
    }

    #[test]
    fn labels_resolve_nearest_first() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        b.add_op(p, Op::PushInt32(0)).unwrap();
        b.label_stack_item(p, 1, 0, "counter").unwrap();
        b.add_op(p, Op::PushInt8(0)).unwrap();
        assert_eq!(b.stack_item_by_name(p, 2, "counter"), Some(1));
        b.label_stack_item(p, 2, 0, "counter").unwrap();
        assert_eq!(b.stack_item_by_name(p, 2, "counter"), Some(0));
    }

    #[test]
    fn label_out_of_range() {
        let mut b = ModuleBuilder::new();
        let p = entry_proc(&mut b);
        let err = b.label_stack_item(p, 0, 0, "x").unwrap_err();
        assert_eq!(err, BuildError::NoSuchStackItem { item: 0, depth: 0 });
    }

    #[test]
    fn entry_signature_enforced() {
        let mut b = ModuleBuilder::new();
        let p = b.add_proc("f", &[Type::I32], Type::VOID).unwrap();
        assert_eq!(b.set_entry_point(p), Err(BuildError::InvalidEntrySignature));
    }

    #[test]
    fn extract_without_entry_is_allowed() {
        let mut b = ModuleBuilder::new();
        entry_proc(&mut b);
        let module = b.extract().unwrap();
        assert_eq!(module.entry, None);
    }

    #[test]
    fn identical_builds_extract_identical_modules() {
        let build = || {
            let mut b = ModuleBuilder::new();
            let block = b.add_data_block("greeting", false).unwrap();
            b.add_data_piece(block, DataPiece::Bytes(b"hi".to_vec())).unwrap();
            let p = b.add_proc("main", &[], Type::VOID).unwrap();
            b.add_op(p, Op::DbAddr(0)).unwrap();
            b.add_op(p, Op::Drop).unwrap();
            b.set_entry_point(p).unwrap();
            b.extract().unwrap()
        };
        assert_eq!(build(), build());
    }
}
