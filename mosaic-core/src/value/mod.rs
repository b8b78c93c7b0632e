//! Module State Values
//!
//! Modules are unstructured: a module is a [`Map`] from field name to
//! [`Value`]. A field may hold plain data, a nested [`Map`] or [`List`], an
//! action ([`Func`]), or a derived reference ([`Computed`]).
//!
//! # Identity
//!
//! [`Map`] and [`List`] are shared reference types. Cloning one yields a
//! second handle to the same storage, and `ptr_eq` tells two handles apart
//! from two equal-looking copies. Every read of a map field or list goes
//! through a [`Dep`](crate::reactive::Dep), so writes made through any
//! handle are visible to watchers.
//!
//! # Equality
//!
//! `PartialEq` on values is structural: two maps are equal if they are the
//! same map or hold equal entries. Writes use the stricter
//! [`Value::is_same`], which compares maps, lists, functions and computed
//! references by identity, so replacing a map with an equal-looking copy
//! still counts as a change.

mod list;
mod map;
mod snapshot;

pub use list::List;
pub use map::Map;
pub use snapshot::{copy, Snapshot};

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::StoreError;
use crate::reactive::Memo;

/// A dynamically typed module field.
#[derive(Clone, Default)]
pub enum Value {
    /// No value at all (a missing field reads as `Absent`).
    #[default]
    Absent,
    /// An explicit empty value.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// An opaque token, compared by identity.
    Opaque(Opaque),
    /// A point in time.
    Instant(SystemTime),
    List(List),
    Map(Map),
    /// A module action.
    Func(Func),
    /// A derived reference. Map reads return its current value instead.
    Computed(Computed),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Absent => "absent",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Opaque(_) => "opaque",
            Value::Instant(_) => "instant",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Func(_) => "function",
            Value::Computed(_) => "computed",
        }
    }

    /// Identity comparison used to decide whether a write changes a field.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::Func(a), Value::Func(b)) => a.ptr_eq(b),
            (Value::Computed(a), Value::Computed(b)) => a.ptr_eq(b),
            (a, b) => a == b,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Floats, and ints widened to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_instant(&self) -> Option<SystemTime> {
        match self {
            Value::Instant(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&Func> {
        match self {
            Value::Func(f) => Some(f),
            _ => None,
        }
    }

    /// Resolve a computed reference to its current value.
    pub(crate) fn unwrap_computed(self) -> Value {
        match self {
            Value::Computed(c) => c.get(),
            other => other,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Absent, Value::Absent) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // NaN is the same as NaN here, otherwise a NaN field would
            // report a change on every evaluation.
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => a == b,
            (Value::Instant(a), Value::Instant(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => a.ptr_eq(b),
            (Value::Computed(a), Value::Computed(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => f.write_str("Absent"),
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Opaque(o) => o.fmt(f),
            Value::Instant(t) => write!(f, "Instant({t:?})"),
            Value::List(l) => l.fmt(f),
            Value::Map(m) => m.fmt(f),
            Value::Func(func) => func.fmt(f),
            Value::Computed(c) => c.fmt(f),
        }
    }
}

// ----------------------------------------------------------------------------
// Conversions
// ----------------------------------------------------------------------------

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int,
    u32 => Int,
    f64 => Float,
    f32 => Float,
    &str => Str,
    String => Str,
    Arc<str> => Str,
    SystemTime => Instant,
    Opaque => Opaque,
    List => List,
    Map => Map,
    Func => Func,
    Computed => Computed,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

fn mismatch(expected: &'static str, found: &Value) -> StoreError {
    StoreError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

impl TryFrom<Value> for i64 {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_int().ok_or_else(|| mismatch("int", &value))
    }
}

impl TryFrom<Value> for f64 {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_float().ok_or_else(|| mismatch("float", &value))
    }
}

impl TryFrom<Value> for bool {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }
}

impl TryFrom<Value> for String {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl TryFrom<Value> for Map {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Map(m) => Ok(m),
            other => Err(mismatch("map", &other)),
        }
    }
}

impl TryFrom<Value> for List {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::List(l) => Ok(l),
            other => Err(mismatch("list", &other)),
        }
    }
}

// ----------------------------------------------------------------------------
// Opaque tokens, actions, computed references
// ----------------------------------------------------------------------------

/// A unique token with a descriptive label.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opaque {
    id: u64,
    label: &'static str,
}

impl Opaque {
    /// Mint a token distinct from every other token.
    pub fn new(label: &'static str) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            label,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({}#{})", self.label, self.id)
    }
}

/// A module action, callable with positional arguments.
#[derive(Clone)]
pub struct Func(Arc<dyn Fn(&[Value]) -> Value + Send + Sync>);

impl Func {
    /// Wrap a function taking arguments and returning a value.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wrap a function that takes no arguments and returns nothing.
    pub fn action<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new(move |_| {
            f();
            Value::Absent
        })
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Func) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Func(..)")
    }
}

/// A derived reference stored inside a module.
///
/// Reading the owning field through [`Map::get`] yields the current derived
/// value and makes the reader depend on it.
#[derive(Clone)]
pub struct Computed(Memo<Value>);

impl Computed {
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self(Memo::new(compute))
    }

    /// Current value, tracked.
    pub fn get(&self) -> Value {
        self.0.get()
    }

    pub fn ptr_eq(&self, other: &Computed) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Computed").field(&self.0.state()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_round_trip_scalars() {
        assert_eq!(i64::try_from(Value::from(3)).unwrap(), 3);
        assert_eq!(bool::try_from(Value::from(true)).unwrap(), true);
        assert_eq!(String::try_from(Value::from("hi")).unwrap(), "hi");
        assert_eq!(f64::try_from(Value::from(2)).unwrap(), 2.0);
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn failed_conversion_names_both_kinds() {
        let err = i64::try_from(Value::from("seven")).unwrap_err();
        assert_eq!(
            err,
            StoreError::TypeMismatch {
                expected: "int",
                found: "string"
            }
        );
    }

    #[test]
    fn nan_equals_nan() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(1.0), Value::Int(1));
    }

    #[test]
    fn is_same_compares_maps_by_identity() {
        let a = Map::new();
        a.set("x", 1);
        let b = a.snapshot();

        assert_eq!(Value::from(a.clone()), Value::from(b.clone()));
        assert!(!Value::from(a.clone()).is_same(&Value::from(b)));
        assert!(Value::from(a.clone()).is_same(&Value::from(a)));
    }

    #[test]
    fn opaque_tokens_are_distinct() {
        let a = Opaque::new("token");
        let b = Opaque::new("token");

        assert_ne!(Value::Opaque(a), Value::Opaque(b));
        assert_eq!(Value::Opaque(a), Value::Opaque(a));
        assert_eq!(a.label(), "token");
    }

    #[test]
    fn func_calls_with_arguments() {
        let add = Func::new(|args| {
            let sum: i64 = args.iter().filter_map(Value::as_int).sum();
            Value::Int(sum)
        });

        assert_eq!(add.call(&[Value::Int(2), Value::Int(3)]), Value::Int(5));
        assert!(add.ptr_eq(&add.clone()));
    }
}
