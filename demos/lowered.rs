//! Force the lowered pull path and compare it with the interpreter.
//!
//! Real deployments leave the default thresholds alone: lowering only pays
//! for itself on long, complex streams. Here the hinted source claims 10⁸
//! elements so the dispatcher picks the lowered path on the first pull.

use fusy::testing::host::{Fun, ScriptHost};
use fusy::{EngineKind, Host, Stream, map};

fn pipeline(host: &ScriptHost, source: usize, funs: &[usize]) -> Stream<ScriptHost> {
    let mut stream = map(host.clone(), funs[0], source).expect("source is iterable");
    for &f in &funs[1..] {
        stream = Stream::map(&stream, f);
    }
    stream
}

fn main() {
    let host = ScriptHost::new();
    host.set_compose_enabled(false); // keep every step so the chain is "complex"
    let funs: Vec<usize> = (1..=11).map(|n| host.fun(Fun::Add(n))).collect();
    let items = [3, 1, 4, 1, 5, 9, 2, 6];

    let hinted = host.hinted_iterable(&items, 100_000_000);
    let mut lowered = pipeline(&host, hinted, &funs);

    let plain = host.hinted_iterable(&items, 100_000_000);
    let mut interpreted =
        pipeline(&host, plain, &funs).modify_thresholds(|t| t.min_len_hint = usize::MAX);

    let a = lowered.to_list().expect("no failing callables here");
    let b = interpreted.to_list().expect("no failing callables here");
    println!("lowered     ({:?}): {:?}", lowered.engine(), host.list_ints(a));
    println!("interpreted ({:?}): {:?}", interpreted.engine(), host.list_ints(b));
    assert_eq!(lowered.engine(), EngineKind::Compiled);
    assert_eq!(interpreted.engine(), EngineKind::Interpreted);
    assert_eq!(host.list_ints(a), host.list_ints(b));

    host.release(a);
    host.release(b);
    drop(lowered);
    drop(interpreted);
    for f in funs {
        host.release(f);
    }
    host.release(hinted);
    host.release(plain);
    assert_eq!(host.live_count(), 0, "every handle accounted for");
}
