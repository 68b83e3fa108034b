// src/stream.rs
//
// The public iterator object and the builder entry points. A `Stream` owns a
// host clone, a fused pipeline, and the dispatcher state that picks between
// the interpreted and the lowered pull path on the first draw.

#[cfg(feature = "compiled")]
use crate::compiled::{CompiledNext, Thresholds};
use crate::{
    host::{Host, HostError},
    interp,
    pipeline::Pipeline,
    step::StepKind,
};
use thiserror::Error;

/// Public error type for the engine.
#[derive(Debug, Error)]
pub enum FuseError {
    /// Upstream iterator advance failed.
    #[error("source iterator failed: {0}")]
    Source(HostError),

    /// A step's callable raised.
    #[error("callable raised: {0}")]
    Callable(HostError),

    /// The truth-test primitive failed on a filter's result.
    #[error("truth test failed: {0}")]
    Truthiness(HostError),

    /// The materialization container could not be built or grown.
    #[error("list construction failed: {0}")]
    Collect(HostError),

    /// Wrong argument count at a builder entry point.
    #[error("{entry}() takes exactly 2 arguments ({got} given)")]
    Arity { entry: &'static str, got: usize },

    /// Lowering was selected but failed.
    #[error("pipeline lowering failed: {0}")]
    Compile(String),
}

/// Stream lifecycle. Terminal states are sticky: once `Exhausted` or
/// `Errored`, pulls do no further work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Fresh,
    Streaming,
    Exhausted,
    Errored,
}

/// Which pull path the dispatcher settled on. `Undecided` only before the
/// first pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Undecided,
    Interpreted,
    Compiled,
}

enum Engine<H: Host> {
    Undecided,
    Interpreted,
    #[cfg(feature = "compiled")]
    Compiled(CompiledNext<H>),
    #[cfg(not(feature = "compiled"))]
    #[allow(dead_code)]
    Never(std::marker::PhantomData<H>),
}

/// A fused map/filter stream over host values.
///
/// Build one with [`map`]/[`filter`] and chain with [`Stream::map`] /
/// [`Stream::filter`]; each pull draws exactly one element from the source
/// per surviving output element and invokes each retained step at most once
/// per element that reaches it.
pub struct Stream<H: Host> {
    host: H,
    pipeline: Pipeline<H>,
    state: StreamState,
    pulls: u64,
    engine: Engine<H>,
    #[cfg(feature = "compiled")]
    thresholds: Thresholds,
}

/// Build a stream applying `callable` to every element of `iterable`.
pub fn map<H: Host>(
    host: H,
    callable: H::Handle,
    iterable: H::Handle,
) -> Result<Stream<H>, FuseError> {
    Stream::over(host, callable, StepKind::Map, iterable)
}

/// Build a stream keeping the elements of `iterable` for which
/// `callable(element)` is truthy.
pub fn filter<H: Host>(
    host: H,
    callable: H::Handle,
    iterable: H::Handle,
) -> Result<Stream<H>, FuseError> {
    Stream::over(host, callable, StepKind::Filter, iterable)
}

/// Entry point for host bindings that deliver arguments as a slice. Exactly
/// two are required: the callable, then the iterable.
pub fn from_args<H: Host>(
    host: H,
    kind: StepKind,
    args: &[H::Handle],
) -> Result<Stream<H>, FuseError> {
    match args {
        [callable, iterable] => Stream::over(host, *callable, kind, *iterable),
        _ => Err(FuseError::Arity {
            entry: kind.name(),
            got: args.len(),
        }),
    }
}

impl<H: Host> Stream<H> {
    /// Fresh single-step stream over anything the host can iterate.
    pub fn over(
        host: H,
        callable: H::Handle,
        kind: StepKind,
        iterable: H::Handle,
    ) -> Result<Self, FuseError> {
        let pipeline = Pipeline::over(&host, callable, kind, iterable)?;
        Ok(Self::with_pipeline(host, pipeline))
    }

    fn with_pipeline(host: H, pipeline: Pipeline<H>) -> Self {
        Self {
            host,
            pipeline,
            state: StreamState::Fresh,
            pulls: 0,
            engine: Engine::Undecided,
            #[cfg(feature = "compiled")]
            thresholds: Thresholds::default(),
        }
    }

    /// Chain a map step, fusing it with a trailing map where the host's
    /// compose helper cooperates. `self` stays valid; the two streams share
    /// the source iterator.
    pub fn map(&self, callable: H::Handle) -> Stream<H> {
        self.extend_with(callable, StepKind::Map)
    }

    /// Chain a filter step. Filters never fuse.
    pub fn filter(&self, callable: H::Handle) -> Stream<H> {
        self.extend_with(callable, StepKind::Filter)
    }

    fn extend_with(&self, callable: H::Handle, kind: StepKind) -> Stream<H> {
        let pipeline = self.pipeline.extended(&self.host, callable, kind);
        let next = Self::with_pipeline(self.host.clone(), pipeline);
        #[cfg(feature = "compiled")]
        let next = {
            let mut next = next;
            next.thresholds = self.thresholds;
            next
        };
        next
    }

    /// Adjust the lowering heuristics. Only meaningful before the first
    /// pull; once the dispatcher has decided, the choice is permanent.
    #[cfg(feature = "compiled")]
    pub fn modify_thresholds(mut self, f: impl FnOnce(&mut Thresholds)) -> Self {
        f(&mut self.thresholds);
        self
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Pulls attempted so far (streaming-state entries into the engine).
    pub fn pulls(&self) -> u64 {
        self.pulls
    }

    pub fn engine(&self) -> EngineKind {
        match self.engine {
            Engine::Undecided => EngineKind::Undecided,
            Engine::Interpreted => EngineKind::Interpreted,
            #[cfg(feature = "compiled")]
            Engine::Compiled(_) => EngineKind::Compiled,
            #[cfg(not(feature = "compiled"))]
            Engine::Never(_) => EngineKind::Undecided,
        }
    }

    /// Snapshot of the surviving steps in application order, as
    /// `("map" | "filter", callable)` pairs. Later chaining (and any fusion
    /// it performs) is not reflected in an earlier snapshot. The returned
    /// handles are borrowed: they stay valid while this stream lives.
    pub fn steps(&self) -> Vec<(&'static str, H::Handle)> {
        self.pipeline
            .steps()
            .iter()
            .map(|step| (step.kind().name(), step.callable()))
            .collect()
    }

    /// Decide interpreter vs lowered, once, on the first pull.
    fn choose_engine(&mut self) -> Result<(), FuseError> {
        #[cfg(feature = "compiled")]
        {
            let hint = self.host.length_hint(self.pipeline.source());
            if self.thresholds.should_lower(self.pipeline.len(), hint) {
                let compiled = CompiledNext::lower(&self.host, &self.pipeline)?;
                self.engine = Engine::Compiled(compiled);
                return Ok(());
            }
            log::trace!(
                "interpreting: {} steps, length hint {hint}",
                self.pipeline.len()
            );
        }
        self.engine = Engine::Interpreted;
        Ok(())
    }

    /// On entry to a pull or a materialization: run the state machine up to
    /// `Streaming`, or report that the stream is terminal.
    fn enter_streaming(&mut self) -> Result<bool, FuseError> {
        match self.state {
            StreamState::Exhausted | StreamState::Errored => Ok(false),
            StreamState::Fresh => {
                if let Err(err) = self.choose_engine() {
                    self.state = StreamState::Errored;
                    return Err(err);
                }
                self.state = StreamState::Streaming;
                Ok(true)
            }
            StreamState::Streaming => Ok(true),
        }
    }

    /// Pull one element. `Ok(None)` is end-of-stream; after an error the
    /// stream is terminal and further pulls yield end-of-stream without
    /// touching the source.
    pub fn next_value(&mut self) -> Result<Option<H::Handle>, FuseError> {
        if !self.enter_streaming()? {
            return Ok(None);
        }
        self.pulls += 1;

        let result = match &self.engine {
            Engine::Undecided | Engine::Interpreted => interp::pull_one(&self.host, &self.pipeline),
            #[cfg(feature = "compiled")]
            Engine::Compiled(compiled) => compiled.pull(&self.host, self.pipeline.source()),
            #[cfg(not(feature = "compiled"))]
            Engine::Never(_) => interp::pull_one(&self.host, &self.pipeline),
        };

        match &result {
            Ok(Some(_)) => {}
            Ok(None) => self.state = StreamState::Exhausted,
            Err(_) => self.state = StreamState::Errored,
        }
        result
    }

    /// Consume the rest of the stream into a host list, through whichever
    /// engine the dispatcher chose. A terminal stream yields an empty list.
    /// On a mid-stream error the partial list is released and the error
    /// propagated.
    pub fn to_list(&mut self) -> Result<H::Handle, FuseError> {
        if !self.enter_streaming()? {
            return self.host.list_new().map_err(FuseError::Collect);
        }

        let result = match &self.engine {
            Engine::Undecided | Engine::Interpreted => interp::pull_all(&self.host, &self.pipeline),
            #[cfg(feature = "compiled")]
            Engine::Compiled(compiled) => compiled.pull_all(&self.host, self.pipeline.source()),
            #[cfg(not(feature = "compiled"))]
            Engine::Never(_) => interp::pull_all(&self.host, &self.pipeline),
        };

        match &result {
            Ok(_) => self.state = StreamState::Exhausted,
            Err(_) => self.state = StreamState::Errored,
        }
        result
    }

    pub fn host(&self) -> &H {
        &self.host
    }
}

impl<H: Host> Iterator for Stream<H> {
    type Item = Result<H::Handle, FuseError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_value().transpose()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.state {
            StreamState::Exhausted | StreamState::Errored => (0, Some(0)),
            _ => match self.host.length_hint(self.pipeline.source()) {
                0 => (0, None),
                hint => (0, Some(hint)), // filters may drop anything up to all
            },
        }
    }
}

impl<H: Host> Drop for Stream<H> {
    fn drop(&mut self) {
        #[cfg(feature = "compiled")]
        if let Engine::Compiled(compiled) = &self.engine {
            compiled.release_pins(&self.host);
        }
        self.pipeline.release_all(&self.host);
    }
}
