//! Reactive lists.

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::RwLock;

use super::Value;
use crate::error::StoreError;
use crate::reactive::Dep;

/// An observable sequence of [`Value`]s.
///
/// The whole list shares one dependency: any read depends on the list as a
/// whole, and any changing write notifies every reader.
#[derive(Clone, Default)]
pub struct List {
    inner: Arc<ListInner>,
}

#[derive(Default)]
struct ListInner {
    items: RwLock<Vec<Value>>,
    dep: Dep,
}

impl List {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Element at `index`, tracked. Out-of-range reads yield
    /// [`Value::Absent`].
    pub fn get(&self, index: usize) -> Value {
        self.inner.dep.track();
        self.inner
            .items
            .read()
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.dep.track();
        self.inner.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the elements, tracked.
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.dep.track();
        self.inner.items.read().clone()
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.inner.items.write().push(value.into());
        self.inner.dep.trigger();
    }

    pub fn pop(&self) -> Option<Value> {
        let popped = self.inner.items.write().pop();
        if popped.is_some() {
            self.inner.dep.trigger();
        }
        popped
    }

    /// Replace the element at `index`.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<(), StoreError> {
        let value = value.into();
        let changed = {
            let mut items = self.inner.items.write();
            let slot = items.get_mut(index).ok_or_else(|| StoreError::UnknownKey {
                key: index.to_string(),
            })?;
            if slot.is_same(&value) {
                false
            } else {
                *slot = value;
                true
            }
        };
        if changed {
            self.inner.dep.trigger();
        }
        Ok(())
    }

    /// Remove and return the element at `index`, shifting later elements.
    pub fn remove(&self, index: usize) -> Option<Value> {
        let removed = {
            let mut items = self.inner.items.write();
            (index < items.len()).then(|| items.remove(index))
        };
        if removed.is_some() {
            self.inner.dep.trigger();
        }
        removed
    }

    pub fn clear(&self) {
        let had_items = {
            let mut items = self.inner.items.write();
            let had_items = !items.is_empty();
            items.clear();
            had_items
        };
        if had_items {
            self.inner.dep.trigger();
        }
    }

    /// Whether both handles refer to the same list.
    pub fn ptr_eq(&self, other: &List) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn raw_items(&self) -> Vec<Value> {
        self.inner.items.read().clone()
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.raw_items() == other.raw_items()
    }
}

impl<V: Into<Value>> FromIterator<V> for List {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self {
            inner: Arc::new(ListInner {
                items: RwLock::new(iter.into_iter().map(Into::into).collect()),
                dep: Dep::new(),
            }),
        }
    }
}

impl Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.raw_items()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_reads_and_writes() {
        let list: List = [1, 2, 3].into_iter().collect();

        assert_eq!(list.len(), 3);
        assert_eq!(list.get(1), Value::Int(2));
        assert_eq!(list.get(9), Value::Absent);

        list.set(1, 20).unwrap();
        list.push(4);
        assert_eq!(list.remove(0), Some(Value::Int(1)));
        assert_eq!(list.to_vec(), vec![Value::Int(20), Value::Int(3), Value::Int(4)]);

        assert_eq!(list.pop(), Some(Value::Int(4)));
        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    fn set_out_of_range_fails() {
        let list = List::new();
        assert_eq!(
            list.set(0, 1),
            Err(StoreError::UnknownKey {
                key: "0".to_string()
            })
        );
    }

    #[test]
    fn equality_is_structural() {
        let a: List = [1, 2].into_iter().collect();
        let b: List = [1, 2].into_iter().collect();

        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
    }
}
