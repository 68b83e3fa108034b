//! Test-support machinery: a self-contained reference host with a refcount
//! ledger, used by the test suite, the benches and the demos.

pub mod host;
