//! Per-call plugin options.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Type-keyed option bag. Each plugin defines its own option types and
/// looks them up by type, so plugins never share a namespace.
///
/// ```rust
/// # use huginn::PluginOptions;
/// #[derive(Debug, PartialEq)]
/// struct PageSize(u32);
///
/// let options = PluginOptions::new().with(PageSize(20));
/// assert_eq!(options.get::<PageSize>(), Some(&PageSize(20)));
/// ```
#[derive(Clone, Default)]
pub struct PluginOptions {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl PluginOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Set the value for `T`, replacing any previous one.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) {
        self.values.remove(&TypeId::of::<T>());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `self` with every value from `overrides` layered on top.
    pub fn merge(&self, overrides: &PluginOptions) -> PluginOptions {
        let mut merged = self.clone();
        for (id, value) in &overrides.values {
            merged.values.insert(*id, value.clone());
        }
        merged
    }
}

impl std::fmt::Debug for PluginOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginOptions")
            .field("len", &self.values.len())
            .finish()
    }
}
