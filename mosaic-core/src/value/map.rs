//! Reactive maps.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::Value;
use crate::error::StoreError;
use crate::reactive::{Dep, ReactiveContext};

/// An ordered, observable mapping from field name to [`Value`].
///
/// Every field has its own dependency, so a watcher that reads `count`
/// does not re-run when `label` changes. Adding or removing a field also
/// notifies readers of the key set ([`keys`](Map::keys), [`len`](Map::len),
/// [`entries`](Map::entries)). Reading a field that does not exist tracks
/// the key set instead, so it is noticed once the field is added.
#[derive(Clone, Default)]
pub struct Map {
    inner: Arc<MapInner>,
}

#[derive(Default)]
struct MapInner {
    entries: RwLock<IndexMap<String, Value>>,
    fields: Mutex<HashMap<String, Dep>>,
    keys: Dep,
}

impl Map {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](Map::set) for constructing modules.
    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    fn track_field(&self, key: &str) {
        if !ReactiveContext::is_tracking() {
            return;
        }
        // A missing field can only appear through the key set.
        if !self.inner.entries.read().contains_key(key) {
            self.inner.keys.track();
            return;
        }
        let dep = self
            .inner
            .fields
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone();
        dep.track();
    }

    fn trigger_field(&self, key: &str) {
        let dep = self.inner.fields.lock().get(key).cloned();
        if let Some(dep) = dep {
            dep.trigger();
        }
    }

    /// Read a field, tracked. Missing fields read as [`Value::Absent`];
    /// computed references resolve to their current value.
    pub fn get(&self, key: &str) -> Value {
        self.track_field(key);
        let value = self.inner.entries.read().get(key).cloned();
        value.unwrap_or_default().unwrap_computed()
    }

    /// Read a field as stored, without tracking.
    pub fn peek(&self, key: &str) -> Value {
        self.inner
            .entries
            .read()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the field exists, tracked.
    pub fn contains_key(&self, key: &str) -> bool {
        self.track_field(key);
        self.inner.entries.read().contains_key(key)
    }

    /// Write a field. Readers are notified only if the value is not the
    /// same as the one already stored (see [`Value::is_same`]).
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();

        let (changed, added) = {
            let mut entries = self.inner.entries.write();
            match entries.get_mut(&key) {
                Some(slot) if slot.is_same(&value) => (false, false),
                Some(slot) => {
                    *slot = value;
                    (true, false)
                }
                None => {
                    entries.insert(key.clone(), value);
                    (true, true)
                }
            }
        };

        if changed {
            trace!(field = %key, "field changed");
            self.trigger_field(&key);
        }
        if added {
            self.inner.keys.trigger();
        }
    }

    /// Replace a field with `f(current)`. The read is not tracked.
    pub fn update(&self, key: &str, f: impl FnOnce(&Value) -> Value) {
        let next = f(&self.peek(key));
        self.set(key, next);
    }

    /// Remove a field, returning its value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.inner.entries.write().shift_remove(key);
        if removed.is_some() {
            let dep = self.inner.fields.lock().remove(key);
            if let Some(dep) = dep {
                dep.trigger();
            }
            self.inner.keys.trigger();
        }
        removed
    }

    /// Field names in insertion order, tracking the key set.
    pub fn keys(&self) -> Vec<String> {
        self.inner.keys.track();
        self.inner.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.keys.track();
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every field with its value, tracking the key set and each field.
    /// Computed references are resolved.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.inner.keys.track();
        let entries: Vec<(String, Value)> = self
            .inner
            .entries
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        entries
            .into_iter()
            .map(|(key, value)| {
                self.track_field(&key);
                let value = value.unwrap_computed();
                (key, value)
            })
            .collect()
    }

    /// Call the action stored in `key`.
    pub fn call(&self, key: &str, args: &[Value]) -> Result<Value, StoreError> {
        match self.peek(key) {
            Value::Func(func) => Ok(func.call(args)),
            Value::Absent => Err(StoreError::UnknownKey {
                key: key.to_string(),
            }),
            other => Err(StoreError::NotCallable {
                key: key.to_string(),
                found: other.kind(),
            }),
        }
    }

    /// Whether both handles refer to the same map.
    pub fn ptr_eq(&self, other: &Map) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable address of the shared storage.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn raw_entries(&self) -> IndexMap<String, Value> {
        self.inner.entries.read().clone()
    }
}

impl PartialEq for Map {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.raw_entries() == other.raw_entries()
    }
}

impl<K, V> FromIterator<(K, V)> for Map
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self {
            inner: Arc::new(MapInner {
                entries: RwLock::new(entries),
                ..MapInner::default()
            }),
        }
    }
}

impl Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.raw_entries()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{watch, CleanUp, Scheduler, WatchOptions};
    use crate::value::{Computed, Func};
    use std::sync::atomic::{AtomicI32, Ordering};

    fn count_changes<F>(scheduler: &Scheduler, source: F) -> (Arc<AtomicI32>, crate::reactive::Unsubscribe)
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        let hits = Arc::new(AtomicI32::new(0));
        let counter = hits.clone();
        let handle = watch(
            scheduler,
            source,
            move |_: &Value, _: Option<&Value>, _: &CleanUp| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            WatchOptions::new().sync(),
        );
        (hits, handle)
    }

    #[test]
    fn get_reads_missing_fields_as_absent() {
        let map = Map::new().with("a", 1);

        assert_eq!(map.get("a"), Value::Int(1));
        assert_eq!(map.get("b"), Value::Absent);
        assert!(map.contains_key("a"));
        assert!(!map.contains_key("b"));
    }

    #[test]
    fn field_writes_notify_only_their_readers() {
        let scheduler = Scheduler::new();
        let map = Map::new().with("count", 0).with("label", "x");

        let source = map.clone();
        let (hits, _handle) = count_changes(&scheduler, move || source.get("count"));

        map.set("label", "y");
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        map.set("count", 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn writing_the_same_value_is_silent() {
        let scheduler = Scheduler::new();
        let map = Map::new().with("count", 3);

        let source = map.clone();
        let (hits, _handle) = count_changes(&scheduler, move || source.get("count"));

        map.set("count", 3);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn adding_a_field_notifies_key_readers() {
        let scheduler = Scheduler::new();
        let map = Map::new();

        let source = map.clone();
        let (hits, _handle) = count_changes(&scheduler, move || Value::from(source.len() as i64));

        map.set("a", 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        map.remove("a");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(map.is_empty());
    }

    #[test]
    fn missing_fields_are_tracked_through_the_key_set() {
        let scheduler = Scheduler::new();
        let map = Map::new();

        let source = map.clone();
        let (hits, _handle) = count_changes(&scheduler, move || {
            for index in 0..50 {
                let _ = source.get(&format!("ghost{index}"));
            }
            source.get("ghost")
        });
        assert!(map.inner.fields.lock().is_empty());

        map.set("ghost", 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(map.inner.fields.lock().len(), 1);

        map.remove("ghost");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(map.inner.fields.lock().is_empty());

        map.set("ghost", 2);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn computed_fields_resolve_on_read() {
        let state = Map::new().with("value", 2);
        let source = state.clone();
        let doubled = Computed::new(move || Value::Int(source.get("value").as_int().unwrap_or_default() * 2));
        let module = Map::new().with("doubled", doubled);

        assert_eq!(module.get("doubled"), Value::Int(4));
        assert!(matches!(module.peek("doubled"), Value::Computed(_)));

        state.set("value", 5);
        assert_eq!(module.get("doubled"), Value::Int(10));
    }

    #[test]
    fn call_dispatches_to_actions() {
        let state = Map::new().with("value", 0);
        let target = state.clone();
        let module = Map::new()
            .with("value", 0)
            .with(
                "increment",
                Func::action(move || target.update("value", |v| Value::Int(v.as_int().unwrap_or_default() + 1))),
            );

        module.call("increment", &[]).unwrap();
        assert_eq!(state.get("value"), Value::Int(1));

        assert_eq!(
            module.call("missing", &[]),
            Err(StoreError::UnknownKey {
                key: "missing".to_string()
            })
        );
        assert_eq!(
            module.call("value", &[]),
            Err(StoreError::NotCallable {
                key: "value".to_string(),
                found: "int"
            })
        );
    }

    #[test]
    fn equality_is_structural_and_identity_is_separate() {
        let a = Map::new().with("x", 1);
        let b: Map = [("x", 1)].into_iter().collect();

        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));

        b.set("x", 2);
        assert_ne!(a, b);
    }

    #[test]
    fn keys_keep_insertion_order() {
        let map = Map::new().with("b", 1).with("a", 2).with("c", 3);
        assert_eq!(map.keys(), vec!["b", "a", "c"]);
    }
}
