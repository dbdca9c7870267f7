//! Context-scoped resource bindings.
//!
//! A [`ResourceRegistry`] maps a [`ResourceKey`] to the resource currently held
//! for it by one logical call chain. It is owned by a
//! [`TransactionContext`](crate::transaction::TransactionContext) and never
//! shared between chains, so concurrent chains cannot observe each other's
//! bindings.

use std::collections::HashMap;

use tracing::trace;

use crate::resource::errors::{RegistryError, RegistryResult};
use crate::resource::types::ResourceKey;

/// Key to resource map with all-or-nothing suspension.
#[derive(Debug)]
pub struct ResourceRegistry<R> {
    bindings: HashMap<ResourceKey, R>,
}

/// Bindings detached by [`ResourceRegistry::suspend`].
///
/// Opaque to callers; the only thing to do with it is hand it back to
/// [`ResourceRegistry::resume`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "suspended bindings are lost unless resumed"]
pub struct SuspendedResources<R> {
    bindings: Vec<(ResourceKey, R)>,
}

impl<R> SuspendedResources<R> {
    /// Keys held by this token, in suspension order.
    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.bindings.iter().map(|(key, _)| key)
    }

    /// Suspended key and resource pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, &R)> {
        self.bindings.iter().map(|(key, resource)| (key, resource))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl<R> Default for ResourceRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ResourceRegistry<R> {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Bind `resource` to `key`. Fails if the key is already bound.
    pub fn bind(&mut self, key: ResourceKey, resource: R) -> RegistryResult<()> {
        if self.bindings.contains_key(&key) {
            return Err(RegistryError::AlreadyBound(key));
        }
        trace!(key = %key, "bound resource");
        self.bindings.insert(key, resource);
        Ok(())
    }

    /// Remove and return the binding for `key`.
    pub fn unbind(&mut self, key: &ResourceKey) -> RegistryResult<R> {
        let resource = self
            .bindings
            .remove(key)
            .ok_or_else(|| RegistryError::NotBound(key.clone()))?;
        trace!(key = %key, "unbound resource");
        Ok(resource)
    }

    pub fn lookup(&self, key: &ResourceKey) -> Option<&R> {
        self.bindings.get(key)
    }

    pub fn has(&self, key: &ResourceKey) -> bool {
        self.bindings.contains_key(key)
    }

    /// All currently bound keys.
    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.bindings.keys()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Detach the bindings for `keys` and return them as one token.
    ///
    /// If any key is absent (or listed twice) nothing is detached.
    pub fn suspend(&mut self, keys: &[ResourceKey]) -> RegistryResult<SuspendedResources<R>> {
        for (i, key) in keys.iter().enumerate() {
            if !self.bindings.contains_key(key) || keys[..i].contains(key) {
                return Err(RegistryError::NotBound(key.clone()));
            }
        }

        let mut bindings = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(resource) = self.bindings.remove(key) {
                bindings.push((key.clone(), resource));
            }
        }
        trace!(count = bindings.len(), "suspended resources");
        Ok(SuspendedResources { bindings })
    }

    /// Rebind a previously suspended token.
    ///
    /// If any of its keys got bound in the meantime nothing is rebound and the
    /// token is dropped.
    pub fn resume(&mut self, suspended: SuspendedResources<R>) -> RegistryResult<()> {
        if let Some(key) = suspended.keys().find(|key| self.bindings.contains_key(*key)) {
            return Err(RegistryError::AlreadyBound(key.clone()));
        }
        trace!(count = suspended.len(), "resumed resources");
        self.bindings.extend(suspended.bindings);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new(name)
    }

    #[test]
    fn test_bind_lookup_unbind() {
        let mut registry = ResourceRegistry::new();
        registry.bind(key("db"), 1u32).unwrap();

        assert_eq!(registry.lookup(&key("db")), Some(&1));
        assert!(registry.has(&key("db")));
        assert_eq!(registry.unbind(&key("db")).unwrap(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_double_bind_fails() {
        let mut registry = ResourceRegistry::new();
        registry.bind(key("db"), 1u32).unwrap();

        let err = registry.bind(key("db"), 2).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyBound(key("db")));
        assert_eq!(registry.lookup(&key("db")), Some(&1));
    }

    #[test]
    fn test_unbind_missing_fails() {
        let mut registry: ResourceRegistry<u32> = ResourceRegistry::new();
        assert_eq!(
            registry.unbind(&key("db")).unwrap_err(),
            RegistryError::NotBound(key("db"))
        );
    }

    #[test]
    fn test_suspend_and_resume_restores_bindings() {
        let mut registry = ResourceRegistry::new();
        registry.bind(key("db"), 1u32).unwrap();
        registry.bind(key("mq"), 2u32).unwrap();

        let suspended = registry.suspend(&[key("db"), key("mq")]).unwrap();
        assert!(registry.is_empty());
        assert_eq!(suspended.len(), 2);

        registry.resume(suspended).unwrap();
        assert_eq!(registry.lookup(&key("db")), Some(&1));
        assert_eq!(registry.lookup(&key("mq")), Some(&2));
    }

    #[test]
    fn test_suspend_is_all_or_nothing() {
        let mut registry = ResourceRegistry::new();
        registry.bind(key("db"), 1u32).unwrap();

        let err = registry.suspend(&[key("db"), key("mq")]).unwrap_err();
        assert_eq!(err, RegistryError::NotBound(key("mq")));
        assert_eq!(registry.lookup(&key("db")), Some(&1));

        assert!(registry.suspend(&[key("db"), key("db")]).is_err());
        assert!(registry.has(&key("db")));
    }

    #[test]
    fn test_resume_into_bound_key_fails() {
        let mut registry = ResourceRegistry::new();
        registry.bind(key("db"), 1u32).unwrap();
        let suspended = registry.suspend(&[key("db")]).unwrap();

        registry.bind(key("db"), 9).unwrap();
        assert_eq!(
            registry.resume(suspended).unwrap_err(),
            RegistryError::AlreadyBound(key("db"))
        );
        assert_eq!(registry.lookup(&key("db")), Some(&9));
    }
}
