//! Build a small fused pipeline against the reference host and walk it.

use fusy::testing::host::{Fun, ScriptHost};
use fusy::{Host, Stream, map};

fn main() {
    let host = ScriptHost::new();
    let xs = host.list_of(&[1, 2, 3, 4, 5, 6]);
    let inc = host.fun(Fun::Add(1));
    let even = host.fun(Fun::Even);
    let triple = host.fun(Fun::Mul(3));

    // map / filter / map – the two maps cannot fuse across the filter
    let mut stream = Stream::map(
        &Stream::filter(&map(host.clone(), inc, xs).expect("lists are iterable"), even),
        triple,
    );

    let kinds: Vec<&str> = stream.steps().iter().map(|s| s.0).collect();
    println!("steps:  {kinds:?}");

    let out = stream.to_list().expect("no failing callables here");
    println!("result: {:?}", host.list_ints(out));

    host.release(out);
    drop(stream);
    for h in [triple, even, inc, xs] {
        host.release(h);
    }
    assert_eq!(host.live_count(), 0, "every handle accounted for");
}
