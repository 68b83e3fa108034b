//! A self-contained reference host.
//!
//! `ScriptHost` keeps every value in a slab of refcounted slots and exposes
//! the whole ledger, so the suite can assert reference conservation to the
//! handle. Callables are data ([`Fun`]), which lets proptest generate
//! arbitrary pipeline behaviors and lets the oracles share the exact same
//! evaluation ([`Fun::eval`]) the host uses.
//!
//! Failure injection built in:
//!
//! * [`Fun::RaiseOn`] – a callable that raises on one specific input;
//! * [`ScriptHost::failing_iterable`] – an iterator that fails at a given
//!   position;
//! * [`Fun::ToOpaque`] – produces a value with no truth value, tripping the
//!   truthiness primitive under a filter;
//! * [`ScriptHost::set_compose_enabled`] – turn the compose helper off to
//!   force the unfused representation;
//! * [`ScriptHost::hinted_iterable`] – lie about the length hint, so the
//!   dispatch heuristics can be exercised without real 10⁸-element sources.
//!
//! This is test machinery: it panics on use-after-free and double-release
//! instead of limping on, because those are engine bugs the suite exists to
//! catch.

use crate::host::{Host, HostError};
use std::{cell::RefCell, rc::Rc};

/// Callable behaviors as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fun {
    Identity,
    Add(i64),
    Mul(i64),
    Gt(i64),
    Lt(i64),
    Even,
    /// Raises when the argument equals the payload, otherwise identity.
    RaiseOn(i64),
    /// Produces a value with no truth value.
    ToOpaque,
}

/// What a callable produces, in model form. Shared by the host and the
/// naive oracles in the test suite so the two cannot drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    Int(i64),
    Bool(bool),
    Opaque,
}

impl Fun {
    pub fn eval(self, arg: i64) -> Result<Scalar, HostError> {
        Ok(match self {
            Fun::Identity => Scalar::Int(arg),
            Fun::Add(n) => Scalar::Int(arg.wrapping_add(n)),
            Fun::Mul(n) => Scalar::Int(arg.wrapping_mul(n)),
            Fun::Gt(n) => Scalar::Bool(arg > n),
            Fun::Lt(n) => Scalar::Bool(arg < n),
            Fun::Even => Scalar::Bool(arg % 2 == 0),
            Fun::RaiseOn(n) if arg == n => {
                return Err(HostError::new(format!("callable raised on {arg}")));
            }
            Fun::RaiseOn(_) => Scalar::Int(arg),
            Fun::ToOpaque => Scalar::Opaque,
        })
    }
}

impl Scalar {
    pub fn as_int(self) -> Result<i64, HostError> {
        match self {
            Scalar::Int(i) => Ok(i),
            Scalar::Bool(b) => Ok(b as i64),
            Scalar::Opaque => Err(HostError::new("cannot interpret value as an integer")),
        }
    }

    pub fn truthy(self) -> Result<bool, HostError> {
        match self {
            Scalar::Int(i) => Ok(i != 0),
            Scalar::Bool(b) => Ok(b),
            Scalar::Opaque => Err(HostError::new("value has no truth value")),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Scalar::Int(i) => Value::Int(i),
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Opaque => Value::Opaque,
        }
    }
}

#[derive(Debug)]
enum Value {
    Int(i64),
    Bool(bool),
    List(Vec<usize>),
    Fun(Fun),
    Composed { outer: usize, inner: usize },
    Iter {
        items: Vec<usize>,
        pos: usize,
        fail_at: Option<usize>,
        hint: Option<usize>,
    },
    Opaque,
    Freed,
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Fun(_) => "function",
            Value::Composed { .. } => "composed function",
            Value::Iter { .. } => "iterator",
            Value::Opaque => "opaque",
            Value::Freed => "freed",
        }
    }

    fn as_int(&self) -> Result<i64, HostError> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(*b as i64),
            other => Err(HostError::new(format!(
                "cannot interpret {} as an integer",
                other.type_name()
            ))),
        }
    }
}

#[derive(Debug)]
struct Slot {
    value: Value,
    refs: usize,
}

#[derive(Debug)]
struct Table {
    slots: Vec<Slot>,
    compose_enabled: bool,
    composes: u64,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            compose_enabled: true,
            composes: 0,
        }
    }
}

impl Table {
    fn value(&self, handle: usize) -> &Value {
        let slot = &self.slots[handle];
        assert!(
            slot.refs > 0 && !matches!(slot.value, Value::Freed),
            "use of dead handle {handle}"
        );
        &slot.value
    }
}

/// The reference host. Clones share one slab.
#[derive(Clone, Default)]
pub struct ScriptHost {
    inner: Rc<RefCell<Table>>,
}

impl ScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&self, value: Value) -> usize {
        let mut table = self.inner.borrow_mut();
        table.slots.push(Slot { value, refs: 1 });
        table.slots.len() - 1
    }

    /// A fresh owned integer.
    pub fn int(&self, value: i64) -> usize {
        self.alloc(Value::Int(value))
    }

    /// A fresh owned callable.
    pub fn fun(&self, fun: Fun) -> usize {
        self.alloc(Value::Fun(fun))
    }

    /// A fresh owned list of integers; the list owns its elements.
    pub fn list_of(&self, items: &[i64]) -> usize {
        let handles: Vec<usize> = items.iter().map(|&i| self.int(i)).collect();
        self.alloc(Value::List(handles))
    }

    /// An iterator that fails when asked for the element at `fail_at`
    /// (0-based). Elements before that are yielded normally.
    pub fn failing_iterable(&self, items: &[i64], fail_at: usize) -> usize {
        let handles: Vec<usize> = items.iter().map(|&i| self.int(i)).collect();
        self.alloc(Value::Iter {
            items: handles,
            pos: 0,
            fail_at: Some(fail_at),
            hint: None,
        })
    }

    /// An iterator whose length hint reports `hint` regardless of the real
    /// element count. Lets dispatch-heuristic tests claim 10⁸ elements
    /// without materializing them.
    pub fn hinted_iterable(&self, items: &[i64], hint: usize) -> usize {
        let handles: Vec<usize> = items.iter().map(|&i| self.int(i)).collect();
        self.alloc(Value::Iter {
            items: handles,
            pos: 0,
            fail_at: None,
            hint: Some(hint),
        })
    }

    pub fn set_compose_enabled(&self, enabled: bool) {
        self.inner.borrow_mut().compose_enabled = enabled;
    }

    /// How many compose calls succeeded so far.
    pub fn composes(&self) -> u64 {
        self.inner.borrow().composes
    }

    /// Current reference count of a handle.
    pub fn refs(&self, handle: usize) -> usize {
        self.inner.borrow().slots[handle].refs
    }

    /// Number of slots still holding a live reference. Zero after every
    /// owner has let go – the reference-conservation assertion.
    pub fn live_count(&self) -> usize {
        self.inner
            .borrow()
            .slots
            .iter()
            .filter(|slot| slot.refs > 0)
            .count()
    }

    pub fn is_composed(&self, handle: usize) -> bool {
        matches!(self.inner.borrow().value(handle), Value::Composed { .. })
    }

    /// Read back an integer (bools read as 0/1). Panics on anything else;
    /// this is a test helper.
    pub fn int_value(&self, handle: usize) -> i64 {
        let table = self.inner.borrow();
        match table.value(handle) {
            Value::Int(i) => *i,
            Value::Bool(b) => *b as i64,
            other => panic!("handle {handle} is a {}, not an int", other.type_name()),
        }
    }

    /// Read back any scalar result a pipeline can produce. Panics on
    /// containers and callables; this is a test helper.
    pub fn scalar_value(&self, handle: usize) -> Scalar {
        let table = self.inner.borrow();
        match table.value(handle) {
            Value::Int(i) => Scalar::Int(*i),
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Opaque => Scalar::Opaque,
            other => panic!("handle {handle} is a {}, not a scalar", other.type_name()),
        }
    }

    /// Read back a list of scalars. Panics on anything else.
    pub fn list_scalars(&self, handle: usize) -> Vec<Scalar> {
        let items: Vec<usize> = {
            let table = self.inner.borrow();
            match table.value(handle) {
                Value::List(items) => items.clone(),
                other => panic!("handle {handle} is a {}, not a list", other.type_name()),
            }
        };
        items.into_iter().map(|h| self.scalar_value(h)).collect()
    }

    /// Read back a list of integers. Panics on anything else.
    pub fn list_ints(&self, handle: usize) -> Vec<i64> {
        let items: Vec<usize> = {
            let table = self.inner.borrow();
            match table.value(handle) {
                Value::List(items) => items.clone(),
                other => panic!("handle {handle} is a {}, not a list", other.type_name()),
            }
        };
        items.into_iter().map(|h| self.int_value(h)).collect()
    }
}

impl Host for ScriptHost {
    type Handle = usize;

    fn get_iterator(&self, iterable: usize) -> Result<usize, HostError> {
        enum Src {
            List(Vec<usize>),
            AlreadyIter,
        }
        let src = {
            let table = self.inner.borrow();
            match table.value(iterable) {
                Value::List(items) => Src::List(items.clone()),
                Value::Iter { .. } => Src::AlreadyIter,
                other => {
                    return Err(HostError::new(format!(
                        "{} is not iterable",
                        other.type_name()
                    )));
                }
            }
        };
        match src {
            // iterators are their own iterators
            Src::AlreadyIter => {
                self.acquire(iterable);
                Ok(iterable)
            }
            Src::List(items) => {
                for &item in &items {
                    self.acquire(item);
                }
                Ok(self.alloc(Value::Iter {
                    items,
                    pos: 0,
                    fail_at: None,
                    hint: None,
                }))
            }
        }
    }

    fn iterator_next(&self, it: usize) -> Result<Option<usize>, HostError> {
        let mut table = self.inner.borrow_mut();
        let slot = &mut table.slots[it];
        assert!(slot.refs > 0, "use of dead handle {it}");
        match &mut slot.value {
            Value::Iter {
                items,
                pos,
                fail_at,
                ..
            } => {
                if Some(*pos) == *fail_at {
                    return Err(HostError::new(format!("iterator failed at element {pos}")));
                }
                if *pos >= items.len() {
                    Ok(None)
                } else {
                    // the construction-time reference transfers to the caller
                    let value = items[*pos];
                    *pos += 1;
                    Ok(Some(value))
                }
            }
            other => Err(HostError::new(format!(
                "{} is not an iterator",
                other.type_name()
            ))),
        }
    }

    fn call_one(&self, callable: usize, arg: usize) -> Result<usize, HostError> {
        enum Plan {
            Direct(Fun),
            Pair { outer: usize, inner: usize },
        }
        let plan = {
            let table = self.inner.borrow();
            match table.value(callable) {
                Value::Fun(f) => Plan::Direct(*f),
                Value::Composed { outer, inner } => Plan::Pair {
                    outer: *outer,
                    inner: *inner,
                },
                other => {
                    return Err(HostError::new(format!(
                        "{} is not callable",
                        other.type_name()
                    )));
                }
            }
        };
        match plan {
            Plan::Direct(fun) => {
                let x = self.inner.borrow().value(arg).as_int()?;
                let out = fun.eval(x)?;
                Ok(self.alloc(out.into_value()))
            }
            Plan::Pair { outer, inner } => {
                let mid = self.call_one(inner, arg)?;
                let result = self.call_one(outer, mid);
                self.release(mid);
                result
            }
        }
    }

    fn logical_not(&self, value: usize) -> Result<bool, HostError> {
        let table = self.inner.borrow();
        match table.value(value) {
            Value::Int(i) => Ok(*i == 0),
            Value::Bool(b) => Ok(!*b),
            Value::List(items) => Ok(items.is_empty()),
            Value::Fun(_) | Value::Composed { .. } | Value::Iter { .. } => Ok(false),
            Value::Opaque => Err(HostError::new("value has no truth value")),
            Value::Freed => unreachable!("Table::value rejects freed slots"),
        }
    }

    fn acquire(&self, handle: usize) {
        let mut table = self.inner.borrow_mut();
        let slot = &mut table.slots[handle];
        assert!(
            slot.refs > 0 && !matches!(slot.value, Value::Freed),
            "acquire of dead handle {handle}"
        );
        slot.refs += 1;
    }

    fn release(&self, handle: usize) {
        let mut table = self.inner.borrow_mut();
        let mut work = vec![handle];
        while let Some(h) = work.pop() {
            let slot = &mut table.slots[h];
            assert!(slot.refs > 0, "release of dead handle {h}");
            slot.refs -= 1;
            if slot.refs == 0 {
                match std::mem::replace(&mut slot.value, Value::Freed) {
                    Value::List(items) => work.extend(items),
                    Value::Composed { outer, inner } => {
                        work.push(outer);
                        work.push(inner);
                    }
                    Value::Iter { items, pos, .. } => work.extend(items.into_iter().skip(pos)),
                    _ => {}
                }
            }
        }
    }

    fn length_hint(&self, handle: usize) -> usize {
        let table = self.inner.borrow();
        match table.value(handle) {
            Value::Iter {
                items, pos, hint, ..
            } => hint.unwrap_or(items.len() - *pos),
            Value::List(items) => items.len(),
            _ => 0,
        }
    }

    fn list_new(&self) -> Result<usize, HostError> {
        Ok(self.alloc(Value::List(Vec::new())))
    }

    fn list_append(&self, list: usize, value: usize) -> Result<(), HostError> {
        {
            let table = self.inner.borrow();
            if !matches!(table.value(list), Value::List(_)) {
                return Err(HostError::new(format!(
                    "cannot append to {}",
                    table.value(list).type_name()
                )));
            }
        }
        self.acquire(value);
        let mut table = self.inner.borrow_mut();
        match &mut table.slots[list].value {
            Value::List(items) => items.push(value),
            _ => unreachable!("checked above"),
        }
        Ok(())
    }

    fn compose(&self, outer: usize, inner: usize) -> Result<usize, HostError> {
        {
            let table = self.inner.borrow();
            if !table.compose_enabled {
                return Err(HostError::new("compose unsupported for these callables"));
            }
            for h in [outer, inner] {
                match table.value(h) {
                    Value::Fun(_) | Value::Composed { .. } => {}
                    other => {
                        return Err(HostError::new(format!(
                            "{} is not callable",
                            other.type_name()
                        )));
                    }
                }
            }
        }
        self.acquire(outer);
        self.acquire(inner);
        self.inner.borrow_mut().composes += 1;
        Ok(self.alloc(Value::Composed { outer, inner }))
    }
}
