//! # Registry
//!
//! The process-wide directory mapping a name to `(kind, handle)`. Every entity
//! registers here when it is created and every cross-reference is resolved
//! through it.
//!
//! ## Invariants
//!
//! - Names are unique across all kinds, not just within one kind.
//! - Entries are never mutated; they are removed only by build rollback.
//! - The build registers sequentially; once it returns, lookups from any task
//!   see the complete directory.

use crate::error::RegistryError;
use krill_types::EntityKind;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Type-erased pointer to an entity.
pub type Handle = Arc<dyn Any + Send + Sync>;

/// A named, registry-tracked object.
pub trait Entity: Any + Send + Sync {
    /// Kind this type registers under.
    const KIND: EntityKind;

    fn name(&self) -> &str;
}

/// One directory entry.
#[derive(Clone)]
pub struct RegistryEntry {
    pub kind: EntityKind,
    pub name: String,
    pub handle: Handle,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The name directory.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; fails if the name is taken by any kind.
    pub fn register(&self, kind: EntityKind, name: &str, handle: Handle) -> Result<(), RegistryError> {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(name) {
            return Err(RegistryError::DuplicateName {
                name: name.to_string(),
                existing: existing.kind,
                attempted: kind,
            });
        }
        entries.insert(
            name.to_string(),
            RegistryEntry {
                kind,
                name: name.to_string(),
                handle,
            },
        );
        debug!(service = "registry", kind = %kind, name, "Entity registered");
        Ok(())
    }

    /// Register a typed entity under its own kind and name.
    pub fn register_entity<T: Entity>(&self, entity: &Arc<T>) -> Result<(), RegistryError> {
        let handle: Handle = Arc::clone(entity) as Handle;
        self.register(T::KIND, entity.name(), handle)
    }

    /// Look up a name, checking its kind.
    pub fn resolve(&self, kind: EntityKind, name: &str) -> Result<Handle, RegistryError> {
        let entries = self.entries.read();
        let entry = entries.get(name).ok_or_else(|| RegistryError::NotFound {
            name: name.to_string(),
        })?;
        if entry.kind != kind {
            return Err(RegistryError::KindMismatch {
                name: name.to_string(),
                expected: kind,
                found: entry.kind,
            });
        }
        Ok(Arc::clone(&entry.handle))
    }

    /// Look up a name of any kind.
    pub fn resolve_any(&self, name: &str) -> Result<(EntityKind, Handle), RegistryError> {
        self.entries
            .read()
            .get(name)
            .map(|entry| (entry.kind, Arc::clone(&entry.handle)))
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }

    /// Look up a name and downcast it to its concrete entity type.
    pub fn resolve_as<T: Entity>(&self, name: &str) -> Result<Arc<T>, RegistryError> {
        self.resolve(T::KIND, name)?
            .downcast::<T>()
            .map_err(|_| RegistryError::HandleType {
                name: name.to_string(),
                kind: T::KIND,
            })
    }

    /// Kind currently holding `name`, if any.
    #[must_use]
    pub fn kind_of(&self, name: &str) -> Option<EntityKind> {
        self.entries.read().get(name).map(|entry| entry.kind)
    }

    /// Remove an entry.
    pub fn deregister(&self, name: &str) -> Option<RegistryEntry> {
        let removed = self.entries.write().remove(name);
        if let Some(entry) = &removed {
            debug!(service = "registry", kind = %entry.kind, name, "Entity deregistered");
        }
        removed
    }

    /// Number of entries of one kind.
    #[must_use]
    pub fn count(&self, kind: EntityKind) -> usize {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.kind == kind)
            .count()
    }

    /// Entry counts for every kind, including kinds with none.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<EntityKind, usize> {
        let mut counts: BTreeMap<EntityKind, usize> =
            EntityKind::all().into_iter().map(|kind| (kind, 0)).collect();
        for entry in self.entries.read().values() {
            *counts.entry(entry.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Names registered under `kind`, sorted.
    #[must_use]
    pub fn entries(&self, kind: EntityKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Every entity of type `T`, sorted by name.
    #[must_use]
    pub fn all_of<T: Entity>(&self) -> Vec<Arc<T>> {
        let mut found: Vec<(String, Arc<T>)> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.kind == T::KIND)
            .filter_map(|entry| {
                Arc::clone(&entry.handle)
                    .downcast::<T>()
                    .ok()
                    .map(|typed| (entry.name.clone(), typed))
            })
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found.into_iter().map(|(_, typed)| typed).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("len", &self.len()).finish()
    }
}
