// Copyright 2026 the Stack Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Persistent abstract stack states.
//!
//! Each state is an immutable singly-linked list of typed items, newest
//! first. Nodes live in one arena and are shared structurally: pushing onto
//! a state allocates a single node whose tail is the old state, so keeping
//! one state per executed operation costs one node per push rather than a
//! copy of the whole stack.

use crate::types::Type;

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NodeId(u32);

/// An abstract stack state; `None` is the empty stack.
pub(crate) type StackState = Option<NodeId>;

#[derive(Debug)]
struct StackNode {
    prev: StackState,
    ty: Type,
    name: Option<String>,
}

/// Arena holding every node of every recorded state.
#[derive(Debug, Default)]
pub(crate) struct NodeArena {
    nodes: Vec<StackNode>,
}

impl NodeArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn node(&self, id: NodeId) -> &StackNode {
        &self.nodes[id.0 as usize]
    }

    fn alloc(&mut self, prev: StackState, ty: Type) -> StackState {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(StackNode { prev, ty, name: None });
        Some(id)
    }

    /// A state with `ty` on top of `state`.
    pub(crate) fn push(&mut self, state: StackState, ty: Type) -> StackState {
        self.alloc(state, ty)
    }

    /// A state with the top `n` items of `state` removed.
    ///
    /// Returns `None` when `state` holds fewer than `n` items.
    pub(crate) fn drop_n(&self, state: StackState, n: u32) -> Option<StackState> {
        let mut cur = state;
        for _ in 0..n {
            cur = self.node(cur?).prev;
        }
        Some(cur)
    }

    /// A state with the top `n_in` items of `state` replaced by one `out`
    /// item. Returns `None` on underflow.
    pub(crate) fn exchange(
        &mut self,
        state: StackState,
        n_in: u32,
        out: Type,
    ) -> Option<StackState> {
        let rest = self.drop_n(state, n_in)?;
        Some(self.alloc(rest, out))
    }

    /// Number of items in `state`.
    pub(crate) fn depth(&self, state: StackState) -> u32 {
        let mut depth = 0;
        let mut cur = state;
        while let Some(id) = cur {
            depth += 1;
            cur = self.node(id).prev;
        }
        depth
    }

    /// The `n`-th item from the top, 0 being the top itself.
    pub(crate) fn nth(&self, state: StackState, n: u32) -> Option<NodeId> {
        self.drop_n(state, n)?
    }

    /// Type of a node.
    pub(crate) fn item_type(&self, id: NodeId) -> Type {
        self.node(id).ty
    }

    /// Byte offset of item `n` from the top of the live stack: the summed
    /// sizes of every item above it. `n` equal to the depth yields the
    /// total stack size.
    pub(crate) fn offset_of(&self, state: StackState, n: u32) -> Option<usize> {
        let mut offset = 0;
        let mut cur = state;
        for _ in 0..n {
            let node = self.node(cur?);
            offset += node.ty.runtime_size();
            cur = node.prev;
        }
        Some(offset)
    }

    /// Attaches a name to a node. Later pushes that reuse this node as a
    /// tail see the name too; lookup resolves the nearest match.
    pub(crate) fn set_name(&mut self, id: NodeId, name: &str) {
        self.nodes[id.0 as usize].name = Some(name.to_owned());
    }

    /// Index from the top of the nearest item named `name`.
    pub(crate) fn find_name(&self, state: StackState, name: &str) -> Option<u32> {
        let mut cur = state;
        let mut index = 0;
        while let Some(id) = cur {
            let node = self.node(id);
            if node.name.as_deref() == Some(name) {
                return Some(index);
            }
            index += 1;
            cur = node.prev;
        }
        None
    }
}
