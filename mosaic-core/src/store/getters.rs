//! Getters Layer
//!
//! A store may derive a value from its modules. The derivation is a
//! [`Memo`]: it runs again only after a field it read has changed, and a read
//! after such a change always sees the recomputed value.
//!
//! A store built without getters carries [`NoGetters`] instead. It has no
//! accessor at all, so code that tries to read getters from such a store
//! does not compile.

use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::Arc;

use super::modules::Modules;
use crate::reactive::Memo;
use crate::value::{copy, Snapshot};

mod sealed {
    pub trait Sealed {}
}

/// The getters slot of a [`Store`](super::Store): either [`NoGetters`] or
/// [`Getters<S>`].
pub trait GettersLayer: sealed::Sealed + Clone + Send + Sync + 'static {
    #[doc(hidden)]
    fn erased(&self) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// Marker for a store defined without getters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoGetters;

impl sealed::Sealed for NoGetters {}

impl GettersLayer for NoGetters {
    fn erased(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }
}

/// Memoized projection of a store's modules.
pub struct Getters<S>
where
    S: Clone + Send + Sync + 'static,
{
    memo: Memo<S>,
}

impl<S> Getters<S>
where
    S: Snapshot + Clone + Send + Sync + 'static,
{
    /// Build the memo and evaluate it once, so a failing projection fails
    /// here rather than at the first read.
    pub(crate) fn new<F>(modules: &Modules, project: F) -> Self
    where
        F: Fn(&Modules) -> S + Send + Sync + 'static,
    {
        let modules = modules.clone();
        let memo = Memo::new(move || copy(&project(&modules)));
        memo.get_untracked();
        Self { memo }
    }

    /// Current value, tracked.
    pub fn get(&self) -> S {
        self.memo.get()
    }

    /// Current value without establishing a dependency.
    pub fn get_untracked(&self) -> S {
        self.memo.get_untracked()
    }

    /// The memo backing this layer.
    pub fn memo(&self) -> &Memo<S> {
        &self.memo
    }
}

impl<S> Clone for Getters<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            memo: self.memo.clone(),
        }
    }
}

impl<S> Debug for Getters<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Getters").field("memo", &self.memo).finish()
    }
}

impl<S> sealed::Sealed for Getters<S> where S: Clone + Send + Sync + 'static {}

impl<S> GettersLayer for Getters<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn erased(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        Some(Arc::new(self.clone()))
    }
}
