//! The lowered pull path.
//!
//! The interpreter pays one kind-tag dispatch per step per element. Lowering
//! spends that dispatch once, at build time: the step vector is folded,
//! innermost-out, into a chain of closures in which every `Map`/`Filter`
//! decision is already resolved and every callable is captured directly.
//! Driving an element through the chain is then a straight run of direct
//! calls, with a single backward edge to the source draw when a filter
//! rejects.
//!
//! Lowering snapshots the pipeline and pins each callable with an extra
//! reference so the chain may keep invoking them without re-checking; the
//! pins live as long as the lowered code and are released with the owning
//! stream. A `CompiledNext` is move-only.

use crate::{
    host::Host,
    pipeline::Pipeline,
    step::StepKind,
    stream::FuseError,
};

/// Default minimum surviving step count before lowering pays for itself.
pub const COMPILE_MIN_STEPS: usize = 10;

/// Default minimum source length hint before lowering pays for itself.
pub const COMPILE_MIN_LEN_HINT: usize = 50_000_000;

/// Upper bound on lowerable step counts. Chains beyond this are refused
/// (`FuseError::Compile`) rather than built.
pub const MAX_LOWERED_STEPS: usize = 256;

/// Dispatch heuristics: lowering setup is amortized only over long, complex
/// streams, so short or simple ones stay on the interpreter.
///
/// Override per stream with `Stream::modify_thresholds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Pipelines with fewer surviving steps are interpreted.
    pub min_steps: usize,
    /// Sources hinting fewer elements are interpreted.
    pub min_len_hint: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_steps: COMPILE_MIN_STEPS,
            min_len_hint: COMPILE_MIN_LEN_HINT,
        }
    }
}

impl Thresholds {
    /// True when a pipeline of `steps` steps over a source hinting `hint`
    /// elements should be lowered rather than interpreted.
    pub fn should_lower(&self, steps: usize, hint: usize) -> bool {
        steps >= self.min_steps && hint >= self.min_len_hint
    }
}

type Spine<H> =
    Box<dyn Fn(&H, <H as Host>::Handle) -> Result<Option<<H as Host>::Handle>, FuseError>>;

/// A pipeline lowered to a chain of direct calls, plus the pinned callable
/// handles the chain reads from.
pub struct CompiledNext<H: Host> {
    spine: Spine<H>,
    pins: Vec<H::Handle>,
}

impl<H: Host> CompiledNext<H> {
    /// Lower a snapshot of the pipeline's step vector.
    ///
    /// The chain for one element mirrors the interpreter exactly: a map call
    /// releases the pre-map element once the result exists; a filter tests
    /// the applied value, releases it, and either lets the original element
    /// continue, drops it (`Ok(None)` bubbles the backward edge up to
    /// [`CompiledNext::pull`]), or propagates the truth-test error.
    pub fn lower(host: &H, pipeline: &Pipeline<H>) -> Result<Self, FuseError> {
        if pipeline.len() > MAX_LOWERED_STEPS {
            return Err(FuseError::Compile(format!(
                "cannot lower a pipeline of {} steps (limit {MAX_LOWERED_STEPS})",
                pipeline.len()
            )));
        }

        let pins: Vec<H::Handle> = pipeline
            .steps()
            .iter()
            .map(|step| {
                host.acquire(step.callable());
                step.callable()
            })
            .collect();

        // innermost frame: the element survived every step
        let mut spine: Spine<H> = Box::new(|_host, element| Ok(Some(element)));

        for step in pipeline.steps().iter().rev() {
            let callable = step.callable();
            let rest = spine;
            spine = match step.kind() {
                StepKind::Map => Box::new(move |host: &H, element| {
                    match host.call_one(callable, element) {
                        Ok(applied) => {
                            host.release(element);
                            rest(host, applied)
                        }
                        Err(err) => {
                            host.release(element);
                            Err(FuseError::Callable(err))
                        }
                    }
                }),
                StepKind::Filter => Box::new(move |host: &H, element| {
                    let applied = match host.call_one(callable, element) {
                        Ok(value) => value,
                        Err(err) => {
                            host.release(element);
                            return Err(FuseError::Callable(err));
                        }
                    };
                    let falsy = host.logical_not(applied);
                    host.release(applied);
                    match falsy {
                        Ok(false) => rest(host, element),
                        Ok(true) => {
                            host.release(element);
                            Ok(None)
                        }
                        Err(err) => {
                            host.release(element);
                            Err(FuseError::Truthiness(err))
                        }
                    }
                }),
            };
        }

        log::debug!("lowered pipeline of {} steps", pipeline.len());
        Ok(Self { spine, pins })
    }

    /// Number of pinned callables (equals the step count at lowering time).
    pub fn pinned(&self) -> usize {
        self.pins.len()
    }

    /// Draw from `source` until an element survives the chain.
    pub fn pull(&self, host: &H, source: H::Handle) -> Result<Option<H::Handle>, FuseError> {
        loop {
            let element = match host.iterator_next(source) {
                Ok(Some(value)) => value,
                Ok(None) => return Ok(None),
                Err(err) => return Err(FuseError::Source(err)),
            };
            match (self.spine)(host, element)? {
                Some(survivor) => return Ok(Some(survivor)),
                None => continue, // a filter dropped it; draw again
            }
        }
    }

    /// Bulk form of [`CompiledNext::pull`]; mirrors `interp::pull_all`.
    pub fn pull_all(&self, host: &H, source: H::Handle) -> Result<H::Handle, FuseError> {
        let list = host.list_new().map_err(FuseError::Collect)?;
        loop {
            match self.pull(host, source) {
                Ok(Some(value)) => {
                    let appended = host.list_append(list, value);
                    host.release(value);
                    if let Err(err) = appended {
                        host.release(list);
                        return Err(FuseError::Collect(err));
                    }
                }
                Ok(None) => return Ok(list),
                Err(err) => {
                    host.release(list);
                    return Err(err);
                }
            }
        }
    }

    /// Release the pinned references. Called exactly once, by the owning
    /// stream's drop, after the last pull.
    pub(crate) fn release_pins(&self, host: &H) {
        for &pin in &self.pins {
            host.release(pin);
        }
    }
}
