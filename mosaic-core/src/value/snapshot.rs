//! Snapshot Copy
//!
//! Watchers compare the value their source produced last time with the one
//! it produces now. If the source returned a live [`Map`], both sides would
//! be the same map and an in-place field write would never look like a
//! change. The store therefore copies every projected value before keeping
//! it.
//!
//! # Copy Rules
//!
//! - Absent, null, opaque tokens and primitives are returned as-is.
//! - Instants are copied by value.
//! - Lists are copied element by element, each element copied by these rules.
//! - Maps are copied one level deep: the copy is a new map holding the same
//!   field values. Nested maps and lists are shared with the source map.
//!
//! Replacing a
//! top-level field of a map, or any element of a list, is detected. Writing
//! to a field of a map nested below the first level is **not** detected,
//! because both snapshots share the nested map. Watch with
//! [`WatchOptions::deep`](crate::reactive::WatchOptions::deep) when nested
//! writes matter.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use super::{Computed, Func, List, Map, Opaque, Value};

/// Values a watcher can snapshot and compare.
pub trait Snapshot: Sized {
    /// Copy `self` according to the rules in the module docs.
    fn snapshot(&self) -> Self;

    /// Read every nested location so a running watcher depends on all of
    /// them. Used by deep watchers; plain data has nothing to read.
    fn traverse(&self) {}
}

/// Snapshot `value`.
pub fn copy<T: Snapshot>(value: &T) -> T {
    value.snapshot()
}

impl Snapshot for Value {
    fn snapshot(&self) -> Self {
        match self {
            Value::Absent | Value::Null | Value::Opaque(_) => self.clone(),
            Value::Instant(instant) => Value::Instant(*instant),
            Value::List(list) => Value::List(list.snapshot()),
            Value::Map(map) => Value::Map(map.snapshot()),
            Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Func(_)
            | Value::Computed(_) => self.clone(),
        }
    }

    fn traverse(&self) {
        traverse_value(self, &mut HashSet::new());
    }
}

impl Snapshot for List {
    fn snapshot(&self) -> Self {
        self.to_vec().iter().map(Snapshot::snapshot).collect()
    }

    fn traverse(&self) {
        traverse_value(&Value::List(self.clone()), &mut HashSet::new());
    }
}

impl Snapshot for Map {
    fn snapshot(&self) -> Self {
        self.entries().into_iter().collect()
    }

    fn traverse(&self) {
        traverse_value(&Value::Map(self.clone()), &mut HashSet::new());
    }
}

fn traverse_value(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Map(map) => {
            if seen.insert(map.addr()) {
                for (_, field) in map.entries() {
                    traverse_value(&field, seen);
                }
            }
        }
        Value::List(list) => {
            if seen.insert(list.addr()) {
                for item in list.to_vec() {
                    traverse_value(&item, seen);
                }
            }
        }
        Value::Computed(computed) => traverse_value(&computed.get(), seen),
        _ => {}
    }
}

macro_rules! snapshot_by_clone {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Snapshot for $ty {
                fn snapshot(&self) -> Self {
                    self.clone()
                }
            }
        )*
    };
}

snapshot_by_clone!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    &'static str,
    Arc<str>,
    SystemTime,
    Opaque,
    Func,
    Computed,
);

impl<T: Snapshot> Snapshot for Vec<T> {
    fn snapshot(&self) -> Self {
        self.iter().map(Snapshot::snapshot).collect()
    }

    fn traverse(&self) {
        self.iter().for_each(Snapshot::traverse);
    }
}

impl<T: Snapshot> Snapshot for Option<T> {
    fn snapshot(&self) -> Self {
        self.as_ref().map(Snapshot::snapshot)
    }

    fn traverse(&self) {
        if let Some(value) = self {
            value.traverse();
        }
    }
}

macro_rules! snapshot_tuple {
    ($(($($name:ident),+)),* $(,)?) => {
        $(
            #[allow(non_snake_case)]
            impl<$($name: Snapshot),+> Snapshot for ($($name,)+) {
                fn snapshot(&self) -> Self {
                    let ($($name,)+) = self;
                    ($($name.snapshot(),)+)
                }

                fn traverse(&self) {
                    let ($($name,)+) = self;
                    $($name.traverse();)+
                }
            }
        )*
    };
}

snapshot_tuple!((A), (A, B), (A, B, C), (A, B, C, D));
