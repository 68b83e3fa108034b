#[cfg(test)]
mod unit_tests {
    use crate::{
        EngineKind, FuseError, StepKind, Stream, StreamState, from_args,
        host::{Host, OwnedVal},
        map,
        pipeline::Pipeline,
        testing::host::{Fun, ScriptHost},
    };

    #[test]
    fn step_kind_is_a_dense_tag() {
        assert_eq!(StepKind::Map as u8, 0);
        assert_eq!(StepKind::Filter as u8, 1);
        assert_eq!(StepKind::Map.name(), "map");
        assert_eq!(StepKind::Filter.name(), "filter");
    }

    #[test]
    fn owned_val_releases_on_drop_and_transfers_on_into_raw() {
        let host = ScriptHost::new();
        let n = host.int(7);
        assert_eq!(host.refs(n), 1);

        {
            let guard = OwnedVal::acquired(&host, n);
            assert_eq!(host.refs(n), 2);
            drop(guard);
        }
        assert_eq!(host.refs(n), 1);

        let guard = OwnedVal::acquired(&host, n);
        let raw = guard.into_raw();
        assert_eq!(host.refs(n), 2); // transferred, not released
        host.release(raw);
        host.release(n);
        assert_eq!(host.live_count(), 0);
    }

    #[test]
    fn pipeline_over_acquires_callable_and_source() {
        let host = ScriptHost::new();
        let xs = host.list_of(&[1, 2, 3]);
        let f = host.fun(Fun::Add(1));

        let pipeline = Pipeline::over(&host, f, StepKind::Map, xs).unwrap();
        assert_eq!(pipeline.len(), 1);
        assert!(!pipeline.is_empty());
        assert_eq!(host.refs(f), 2);

        pipeline.release_all(&host);
        assert_eq!(host.refs(f), 1);

        host.release(f);
        host.release(xs);
        assert_eq!(host.live_count(), 0);
    }

    #[test]
    fn over_a_non_iterable_is_a_source_error() {
        let host = ScriptHost::new();
        let n = host.int(42);
        let f = host.fun(Fun::Identity);

        let err = map(host.clone(), f, n).err().unwrap();
        assert!(matches!(err, FuseError::Source(_)));

        host.release(f);
        host.release(n);
        assert_eq!(host.live_count(), 0);
    }

    #[test]
    fn map_over_map_fuses_in_place() {
        let host = ScriptHost::new();
        let xs = host.list_of(&[1, 2, 3, 4]);
        let double = host.fun(Fun::Mul(2));
        let inc = host.fun(Fun::Add(1));

        let tail = map(host.clone(), double, xs).unwrap();
        let fused = Stream::map(&tail, inc);

        let steps = fused.steps();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].0, "map");
        assert!(host.is_composed(steps[0].1));

        // the tail's snapshot is unaffected by the later fusion
        let tail_steps = tail.steps();
        assert_eq!(tail_steps.len(), 1);
        assert_eq!(tail_steps[0].1, double);

        drop(fused);
        drop(tail);
        host.release(inc);
        host.release(double);
        host.release(xs);
        assert_eq!(host.live_count(), 0);
    }

    #[test]
    fn compose_failure_appends_instead() {
        let host = ScriptHost::new();
        host.set_compose_enabled(false);
        let xs = host.list_of(&[1, 2, 3, 4]);
        let double = host.fun(Fun::Mul(2));
        let inc = host.fun(Fun::Add(1));

        let stream = Stream::map(&map(host.clone(), double, xs).unwrap(), inc);
        let steps = stream.steps();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].1, double);
        assert_eq!(steps[1].1, inc);
        assert_eq!(host.composes(), 0);

        drop(stream);
        host.release(inc);
        host.release(double);
        host.release(xs);
        assert_eq!(host.live_count(), 0);
    }

    #[test]
    fn nothing_fuses_across_a_filter_boundary() {
        let host = ScriptHost::new();
        let xs = host.list_of(&[1, 2, 3, 4]);
        let p = host.fun(Fun::Gt(2));
        let f = host.fun(Fun::Add(1));
        let g = host.fun(Fun::Mul(2));

        // map / filter / map: the trailing map must not reach past the filter
        let stream = Stream::map(
            &Stream::filter(&map(host.clone(), f, xs).unwrap(), p),
            g,
        );
        let kinds: Vec<&str> = stream.steps().iter().map(|s| s.0).collect();
        assert_eq!(kinds, ["map", "filter", "map"]);
        assert_eq!(host.composes(), 0);

        drop(stream);
        for h in [g, f, p, xs] {
            host.release(h);
        }
        assert_eq!(host.live_count(), 0);
    }

    #[test]
    fn adjacent_filters_are_preserved_verbatim() {
        let host = ScriptHost::new();
        let xs = host.list_of(&[1, 2, 3, 4]);
        let p = host.fun(Fun::Gt(1));
        let q = host.fun(Fun::Lt(4));

        let stream = Stream::filter(&crate::filter(host.clone(), p, xs).unwrap(), q);
        let kinds: Vec<&str> = stream.steps().iter().map(|s| s.0).collect();
        assert_eq!(kinds, ["filter", "filter"]);

        drop(stream);
        for h in [q, p, xs] {
            host.release(h);
        }
        assert_eq!(host.live_count(), 0);
    }

    #[test]
    fn fusion_keeps_the_refcounts_balanced() {
        let host = ScriptHost::new();
        let xs = host.list_of(&[1]);
        let f = host.fun(Fun::Add(1));
        let g = host.fun(Fun::Add(2));

        let tail = map(host.clone(), f, xs).unwrap();
        assert_eq!(host.refs(f), 2); // test + tail's step

        let fused = Stream::map(&tail, g);
        // the composed callable pins f and g; the copied step's own
        // reference to f was released when the fused callable replaced it
        assert_eq!(host.refs(f), 3);
        assert_eq!(host.refs(g), 2);

        drop(fused);
        assert_eq!(host.refs(f), 2);
        assert_eq!(host.refs(g), 1);

        drop(tail);
        host.release(g);
        host.release(f);
        host.release(xs);
        assert_eq!(host.live_count(), 0);
    }

    #[test]
    fn builder_entry_requires_exactly_two_arguments() {
        let host = ScriptHost::new();
        let xs = host.list_of(&[1, 2]);
        let f = host.fun(Fun::Identity);

        let err = from_args(host.clone(), StepKind::Map, &[f]).err().unwrap();
        assert!(matches!(err, FuseError::Arity { entry: "map", got: 1 }));
        assert_eq!(err.to_string(), "map() takes exactly 2 arguments (1 given)");

        let err = from_args(host.clone(), StepKind::Filter, &[f, xs, f])
            .err()
            .unwrap();
        assert!(matches!(
            err,
            FuseError::Arity {
                entry: "filter",
                got: 3
            }
        ));

        let mut stream = from_args(host.clone(), StepKind::Map, &[f, xs]).unwrap();
        let out = stream.to_list().unwrap();
        assert_eq!(host.list_ints(out), vec![1, 2]);

        host.release(out);
        drop(stream);
        host.release(f);
        host.release(xs);
        assert_eq!(host.live_count(), 0);
    }

    #[test]
    fn state_machine_runs_fresh_streaming_exhausted() {
        let host = ScriptHost::new();
        let xs = host.list_of(&[1]);
        let f = host.fun(Fun::Identity);

        let mut stream = map(host.clone(), f, xs).unwrap();
        assert_eq!(stream.state(), StreamState::Fresh);
        assert_eq!(stream.engine(), EngineKind::Undecided);

        let v = stream.next_value().unwrap().unwrap();
        assert_eq!(stream.state(), StreamState::Streaming);
        assert_eq!(stream.engine(), EngineKind::Interpreted);
        host.release(v);

        assert!(stream.next_value().unwrap().is_none());
        assert_eq!(stream.state(), StreamState::Exhausted);

        // sticky: further pulls do no work and keep reporting end-of-stream
        assert!(stream.next_value().unwrap().is_none());
        assert_eq!(stream.state(), StreamState::Exhausted);
        assert_eq!(stream.pulls(), 2);

        drop(stream);
        host.release(f);
        host.release(xs);
        assert_eq!(host.live_count(), 0);
    }

    #[test]
    fn errored_is_sticky() {
        let host = ScriptHost::new();
        let xs = host.list_of(&[1, 2, 3]);
        let f = host.fun(Fun::RaiseOn(1));

        let mut stream = map(host.clone(), f, xs).unwrap();
        assert!(matches!(
            stream.next_value(),
            Err(FuseError::Callable(_))
        ));
        assert_eq!(stream.state(), StreamState::Errored);

        assert!(stream.next_value().unwrap().is_none());
        assert_eq!(stream.state(), StreamState::Errored);

        // materializing a terminal stream yields an empty list
        let out = stream.to_list().unwrap();
        assert_eq!(host.list_ints(out), Vec::<i64>::new());

        host.release(out);
        drop(stream);
        host.release(f);
        host.release(xs);
        assert_eq!(host.live_count(), 0);
    }

    #[test]
    fn size_hint_follows_the_source_length_hint() {
        let host = ScriptHost::new();
        let xs = host.list_of(&[1, 2, 3, 4]);
        let p = host.fun(Fun::Gt(2));

        let mut stream = crate::filter(host.clone(), p, xs).unwrap();
        assert_eq!(stream.size_hint(), (0, Some(4)));

        let out = stream.to_list().unwrap();
        assert_eq!(stream.size_hint(), (0, Some(0)));

        host.release(out);
        drop(stream);
        host.release(p);
        host.release(xs);
        assert_eq!(host.live_count(), 0);
    }

    #[cfg(feature = "compiled")]
    #[test]
    fn lowering_pins_every_callable() {
        use crate::compiled::CompiledNext;

        let host = ScriptHost::new();
        let xs = host.list_of(&[1, 2, 3]);
        let f = host.fun(Fun::Add(1));
        let p = host.fun(Fun::Even);

        let one = Pipeline::over(&host, f, StepKind::Map, xs).unwrap();
        let two = one.extended(&host, p, StepKind::Filter);
        one.release_all(&host);

        let compiled = CompiledNext::lower(&host, &two).unwrap();
        assert_eq!(compiled.pinned(), two.len());
        // test handle + step vector copy + pin
        assert_eq!(host.refs(f), 3);
        assert_eq!(host.refs(p), 3);

        compiled.release_pins(&host);
        assert_eq!(host.refs(f), 2);
        assert_eq!(host.refs(p), 2);

        two.release_all(&host);
        for h in [p, f, xs] {
            host.release(h);
        }
        assert_eq!(host.live_count(), 0);
    }

    #[test]
    fn script_host_iterators_are_their_own_iterators() {
        let host = ScriptHost::new();
        let it = host.hinted_iterable(&[5, 6], 999);
        let again = host.get_iterator(it).unwrap();
        assert_eq!(again, it);
        assert_eq!(host.length_hint(it), 999);
        host.release(again);
        host.release(it);
        assert_eq!(host.live_count(), 0);
    }
}
