// src/pipeline.rs
use crate::{
    host::Host,
    step::{StepKind, StepNode},
    stream::FuseError,
};
use smallvec::SmallVec;

pub(crate) type StepVec<H> = SmallVec<[StepNode<H>; 8]>;

/// An ordered step sequence plus an owned upstream iterator handle.
///
/// `steps[0]` is applied first to each element drawn from `source`, the last
/// step last. Invariants after construction:
///
/// 1. at least one step;
/// 2. `source` is a valid, owned iterator handle;
/// 3. no two adjacent `Map` steps, unless composing that pair failed –
///    adjacency of filters, and map/filter in either order, is preserved
///    verbatim;
/// 4. the step sequence is never mutated again.
pub struct Pipeline<H: Host> {
    steps: StepVec<H>,
    source: H::Handle,
}

impl<H: Host> Pipeline<H> {
    /// Fresh single-step pipeline over anything iterable. Failure to obtain
    /// an iterator is propagated; nothing is retained in that case.
    pub fn over(
        host: &H,
        callable: H::Handle,
        kind: StepKind,
        iterable: H::Handle,
    ) -> Result<Self, FuseError> {
        let source = host.get_iterator(iterable).map_err(FuseError::Source)?;
        let mut steps = StepVec::new();
        steps.push(StepNode::new(host, callable, kind));
        Ok(Self { steps, source })
    }

    /// One step longer than `self`: copies the steps, retains the source,
    /// and fuses map-over-map where the host's compose helper cooperates.
    ///
    /// When the new step and the last copied step are both `Map`, the fused
    /// callable replaces the last one in place and the step count does not
    /// grow. A compose failure is absorbed – the step is appended unfused,
    /// so construction makes progress regardless of which callable forms
    /// the host can merge. Filters never fuse, and nothing fuses across a
    /// filter boundary.
    pub fn extended(&self, host: &H, callable: H::Handle, kind: StepKind) -> Self {
        host.acquire(self.source);
        let mut steps: StepVec<H> = self.steps.iter().map(|s| s.duplicate(host)).collect();

        if kind == StepKind::Map {
            // invariant 1: the copied step vector is nonempty
            if let Some(last) = steps.last_mut() {
                if last.kind() == StepKind::Map {
                    match host.compose(callable, last.callable()) {
                        Ok(fused) => {
                            log::trace!("fused adjacent map steps");
                            last.replace_callable(host, fused);
                            return Self {
                                steps,
                                source: self.source,
                            };
                        }
                        Err(err) => {
                            log::debug!("compose declined, keeping steps separate: {err}");
                        }
                    }
                }
            }
        }

        steps.push(StepNode::new(host, callable, kind));
        Self {
            steps,
            source: self.source,
        }
    }

    pub fn steps(&self) -> &[StepNode<H>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn source(&self) -> H::Handle {
        self.source
    }

    /// Release the source and every step callable. Called exactly once, by
    /// the owning stream's drop.
    pub(crate) fn release_all(&self, host: &H) {
        for step in &self.steps {
            step.release(host);
        }
        host.release(self.source);
    }
}
