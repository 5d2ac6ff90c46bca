//! Namespace catalog
//!
//! Maps namespace names to the fixed-width [`NamespaceId`] prefix used in
//! physical keys. Entries live in the catalog region and are mirrored in
//! memory; the mirror is only updated after the transaction that created
//! an entry has committed, so it never holds an id the engine does not.
//!
//! ```text
//! 0x03 | name          -> ns_id (u32 BE)
//! 0x00 | "next_ns_id"  -> next id to hand out (u32 BE)
//! ```

use std::collections::HashMap;
use std::sync::RwLock;

use crate::codec::{
    catalog_range, decode_catalog_entry, decode_namespace_id, encode_catalog_key,
    encode_meta_key, encode_namespace_id, NamespaceId,
};
use crate::storage::{Storage, Transaction};

use super::errors::{KvError, KvResult};

const NEXT_ID_KEY: &str = "next_ns_id";

/// Namespaces created inside a transaction, published once it commits.
pub(crate) type CreatedNamespaces = Vec<(String, NamespaceId)>;

pub struct NamespaceCatalog {
    entries: RwLock<HashMap<String, NamespaceId>>,
}

impl NamespaceCatalog {
    /// Load every catalog entry from storage.
    pub fn load(storage: &Storage) -> KvResult<Self> {
        let range = catalog_range();
        let mut entries = HashMap::new();
        for entry in storage.iterate(&range.start, &range.end) {
            let (key, value) = entry?;
            let (name, id) = decode_catalog_entry(&key, &value)?;
            entries.insert(name, id);
        }
        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    /// Id of an existing namespace.
    pub fn lookup(&self, name: &str) -> Option<NamespaceId> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(name).copied())
    }

    /// Id of a namespace as seen by `tx`, including ones it created itself.
    pub(crate) fn lookup_in(
        &self,
        tx: &mut Transaction<'_>,
        name: &str,
    ) -> KvResult<Option<NamespaceId>> {
        if let Some(id) = self.lookup(name) {
            return Ok(Some(id));
        }
        match tx.get(&encode_catalog_key(name))? {
            Some(raw) => Ok(Some(decode_namespace_id(&raw)?)),
            None => Ok(None),
        }
    }

    /// Id of `name`, allocating one inside `tx` if it does not exist yet.
    ///
    /// Newly allocated entries are appended to `created` and must be passed
    /// to [`publish`](Self::publish) after the transaction commits.
    pub(crate) fn resolve_for_write(
        &self,
        tx: &mut Transaction<'_>,
        name: &str,
        created: &mut CreatedNamespaces,
    ) -> KvResult<NamespaceId> {
        if let Some(id) = self.lookup_in(tx, name)? {
            return Ok(id);
        }

        let next_key = encode_meta_key(NEXT_ID_KEY);
        let id = match tx.get(&next_key)? {
            Some(raw) => decode_namespace_id(&raw)?,
            None => NamespaceId::FIRST,
        };
        let following = id
            .next()
            .ok_or_else(|| KvError::invalid("namespace: id space exhausted"))?;

        tx.put(encode_catalog_key(name), encode_namespace_id(id));
        tx.put(next_key, encode_namespace_id(following));
        created.push((name.to_string(), id));
        Ok(id)
    }

    /// Make committed namespaces visible to [`lookup`](Self::lookup).
    pub(crate) fn publish(&self, created: CreatedNamespaces) {
        if created.is_empty() {
            return;
        }
        if let Ok(mut entries) = self.entries.write() {
            entries.extend(created);
        }
    }

    /// Known namespace names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Create `name` if needed, in its own transaction.
    pub fn ensure(&self, storage: &Storage, name: &str) -> KvResult<NamespaceId> {
        if let Some(id) = self.lookup(name) {
            return Ok(id);
        }
        let mut created = CreatedNamespaces::new();
        let id = storage.transaction(|tx| {
            created.clear();
            self.resolve_for_write(tx, name, &mut created)
        })?;
        self.publish(created);
        Ok(id)
    }
}
