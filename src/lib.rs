#![forbid(unsafe_code)]

pub mod host;
pub mod interp;
pub mod pipeline;
pub mod step;
pub mod stream;
pub mod testing;

#[cfg(feature = "compiled")]
pub mod compiled;

pub use host::{Host, HostError, OwnedVal};
pub use pipeline::Pipeline;
pub use step::{StepKind, StepNode};
pub use stream::{EngineKind, FuseError, Stream, StreamState, filter, from_args, map};

#[cfg(feature = "compiled")]
pub use compiled::{COMPILE_MIN_LEN_HINT, COMPILE_MIN_STEPS, CompiledNext, Thresholds};
