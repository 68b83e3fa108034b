//! The interpreted pull drivers.
//!
//! `pull_one` is the element-pull state machine: draw from the source, run
//! the element through the steps in application order, loop back to the
//! source whenever a filter rejects. `pull_all` is the bulk form that lands
//! everything in a host list without going back through the host's own
//! per-element protocol.
//!
//! Ownership discipline: every handle drawn or produced mid-pull lives in an
//! [`OwnedVal`] guard, so each early return releases exactly the handles the
//! driver still held and nothing else. The one surviving element per pull is
//! handed out with `into_raw`.

use crate::{
    host::{Host, OwnedVal},
    pipeline::Pipeline,
    step::StepKind,
    stream::FuseError,
};

/// Draw elements from the source until one survives every step, and return
/// it. `Ok(None)` is source exhaustion.
///
/// Each step is invoked at most once per element that reaches it; a
/// rejecting filter stops the walk and the element is dropped before the
/// next draw. A map hit releases the pre-map element as soon as the mapped
/// result replaces it.
pub fn pull_one<H: Host>(host: &H, pipeline: &Pipeline<H>) -> Result<Option<H::Handle>, FuseError> {
    'draw: loop {
        let raw = match host.iterator_next(pipeline.source()) {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(None),
            Err(err) => return Err(FuseError::Source(err)),
        };
        let mut element = OwnedVal::adopt(host, raw);

        for step in pipeline.steps() {
            let applied = match step.apply(host, element.raw()) {
                Ok(value) => OwnedVal::adopt(host, value),
                Err(err) => return Err(FuseError::Callable(err)),
            };

            match step.kind() {
                StepKind::Map => {
                    // replaces the element; the old guard releases it here
                    element = applied;
                }
                StepKind::Filter => {
                    let falsy = host
                        .logical_not(applied.raw())
                        .map_err(FuseError::Truthiness)?;
                    drop(applied);
                    if falsy {
                        continue 'draw;
                    }
                    // kept: the pre-filter element continues down the steps
                }
            }
        }

        return Ok(Some(element.into_raw()));
    }
}

/// Materialize the whole stream into a host list.
///
/// Same observable semantics as repeated [`pull_one`]; on a mid-stream error
/// the partial list and every intermediate handle are released before the
/// error is returned.
pub fn pull_all<H: Host>(host: &H, pipeline: &Pipeline<H>) -> Result<H::Handle, FuseError> {
    let list = OwnedVal::adopt(host, host.list_new().map_err(FuseError::Collect)?);
    loop {
        match pull_one(host, pipeline)? {
            Some(raw) => {
                let value = OwnedVal::adopt(host, raw);
                host.list_append(list.raw(), value.raw())
                    .map_err(FuseError::Collect)?;
                // the list now holds its own reference; ours drops here
            }
            None => return Ok(list.into_raw()),
        }
    }
}
