//! A single map-or-filter record.

use crate::host::{Host, HostError};

/// Step discriminant. `Map` is 0 and `Filter` is 1; dispatch uses the tag as
/// a dense index, so the ordering is part of the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StepKind {
    Map = 0,
    Filter = 1,
}

impl StepKind {
    /// The literal step name exposed through `Stream::steps`.
    pub fn name(self) -> &'static str {
        match self {
            StepKind::Map => "map",
            StepKind::Filter => "filter",
        }
    }
}

/// One step of a pipeline: a kind tag plus an owned callable handle.
///
/// The callable reference is held for the whole life of the node. Nodes have
/// no host pointer of their own, so the owning pipeline is responsible for
/// the matching release (see `Pipeline::release_all`).
#[derive(Debug)]
pub struct StepNode<H: Host> {
    kind: StepKind,
    callable: H::Handle,
}

impl<H: Host> StepNode<H> {
    /// Build a node, acquiring its own reference to `callable`.
    pub fn new(host: &H, callable: H::Handle, kind: StepKind) -> Self {
        host.acquire(callable);
        Self { kind, callable }
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    pub fn callable(&self) -> H::Handle {
        self.callable
    }

    /// `callable(element)`. The result is newly owned by the caller; the
    /// element is untouched.
    pub fn apply(&self, host: &H, element: H::Handle) -> Result<H::Handle, HostError> {
        host.call_one(self.callable, element)
    }

    /// Swap in a fused callable, releasing the one it replaces. Ownership of
    /// `fused` transfers into the node. Only pipeline construction calls
    /// this; steps are immutable afterwards.
    pub(crate) fn replace_callable(&mut self, host: &H, fused: H::Handle) {
        host.release(self.callable);
        self.callable = fused;
    }

    /// Copy for a snapshot. The copy owns its own reference, keeping the
    /// one-net-acquisition-per-live-copy accounting intact.
    pub(crate) fn duplicate(&self, host: &H) -> Self {
        Self::new(host, self.callable, self.kind)
    }

    /// Give back the callable reference. Must be called exactly once by the
    /// owner before the node is discarded.
    pub(crate) fn release(&self, host: &H) {
        host.release(self.callable);
    }
}
