//! The embedded in-memory backend.
//!
//! An ordered map under a lock, with snapshot transactions: `begin` and
//! `begin_read` capture the committed state, writes buffer in the
//! transaction and apply atomically at commit. The directory layer
//! allocates short opaque prefixes from a shared counter and lists
//! children lexicographically.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{path_str, strinc, Database, KvPair, RangeSpec, ReadTransaction, Subspace, Transaction};
use crate::errors::{KvqError, Result};
use crate::tuple::{self, Element};

#[derive(Debug, Clone, Default)]
struct DirNode {
    prefix: Vec<u8>,
    children: BTreeMap<String, DirNode>,
}

impl DirNode {
    fn node(&self, path: &[String]) -> Option<&DirNode> {
        match path.split_first() {
            None => Some(self),
            Some((head, rest)) => self.children.get(head)?.node(rest),
        }
    }

    fn prefixes(&self, out: &mut Vec<Vec<u8>>) {
        if !self.prefix.is_empty() {
            out.push(self.prefix.clone());
        }
        for child in self.children.values() {
            child.prefixes(out);
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Store {
    kv: BTreeMap<Vec<u8>, Vec<u8>>,
    root: DirNode,
    next_prefix: u64,
}

impl Store {
    fn dir_prefix(&self, path: &[String]) -> Option<Vec<u8>> {
        let node = self.root.node(path)?;
        if path.is_empty() || !node.prefix.is_empty() {
            Some(node.prefix.clone())
        } else {
            None
        }
    }

    fn range(&self, range: &RangeSpec) -> Vec<KvPair> {
        let mut out: Vec<KvPair> = self
            .kv
            .range::<[u8], _>((
                Bound::Included(range.begin.as_slice()),
                Bound::Excluded(range.end.as_slice()),
            ))
            .map(|(k, v)| KvPair {
                key: k.clone(),
                value: v.clone(),
            })
            .collect();
        if range.reverse {
            out.reverse();
        }
        if let Some(limit) = range.limit {
            out.truncate(limit);
        }
        out
    }
}

/// A thread-safe, ordered, transactional in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<RwLock<Store>>,
}

impl MemoryDatabase {
    pub fn new() -> MemoryDatabase {
        MemoryDatabase::default()
    }
}

impl Database for MemoryDatabase {
    type ReadTr = MemoryReadTransaction;
    type Tr = MemoryTransaction;

    fn begin_read(&self) -> Result<MemoryReadTransaction> {
        Ok(MemoryReadTransaction {
            snapshot: self.inner.read().clone(),
        })
    }

    fn begin(&self) -> Result<MemoryTransaction> {
        Ok(MemoryTransaction {
            db: self.inner.clone(),
            snapshot: self.inner.read().clone(),
            state: Mutex::new(TxnState::default()),
        })
    }
}

/// A read-only snapshot of the store.
pub struct MemoryReadTransaction {
    snapshot: Store,
}

impl ReadTransaction for MemoryReadTransaction {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.snapshot.kv.get(key).cloned())
    }

    fn get_range(&self, range: &RangeSpec) -> Result<Vec<KvPair>> {
        Ok(self.snapshot.range(range))
    }

    fn open_directory(&self, path: &[String]) -> Result<Option<Subspace>> {
        Ok(self
            .snapshot
            .dir_prefix(path)
            .map(|prefix| Subspace::new(path.to_vec(), prefix)))
    }

    fn list_directory(&self, path: &[String]) -> Result<Vec<String>> {
        match self.snapshot.root.node(path) {
            Some(node) => Ok(node.children.keys().cloned().collect()),
            None => Err(KvqError::Directory(format!(
                "directory {} does not exist",
                path_str(path)
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct TxnState {
    mutations: Vec<Mutation>,
    created: Vec<(Vec<String>, Vec<u8>)>,
    removed: Vec<Vec<String>>,
}

#[derive(Debug)]
enum Mutation {
    Set(Vec<u8>, Vec<u8>),
    Clear(Vec<u8>),
}

/// A read-write transaction: snapshot reads plus buffered writes, with
/// read-your-writes through the buffer.
pub struct MemoryTransaction {
    db: Arc<RwLock<Store>>,
    snapshot: Store,
    state: Mutex<TxnState>,
}

impl MemoryTransaction {
    fn created_prefix(&self, path: &[String]) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state
            .created
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, prefix)| prefix.clone())
    }

    fn allocate_prefix(&self) -> Vec<u8> {
        let mut store = self.db.write();
        store.next_prefix += 1;
        let mut prefix = vec![0xfe];
        prefix.extend_from_slice(&tuple::pack(&[Element::Uint(store.next_prefix)]));
        prefix
    }
}

impl ReadTransaction for MemoryTransaction {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock();
        for mutation in state.mutations.iter().rev() {
            match mutation {
                Mutation::Set(k, v) if k == key => return Ok(Some(v.clone())),
                Mutation::Clear(k) if k == key => return Ok(None),
                _ => {}
            }
        }
        Ok(self.snapshot.kv.get(key).cloned())
    }

    fn get_range(&self, range: &RangeSpec) -> Result<Vec<KvPair>> {
        let plain = RangeSpec {
            begin: range.begin.clone(),
            end: range.end.clone(),
            reverse: false,
            limit: None,
        };
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .snapshot
            .range(&plain)
            .into_iter()
            .map(|kv| (kv.key, kv.value))
            .collect();

        let state = self.state.lock();
        for mutation in &state.mutations {
            match mutation {
                Mutation::Set(k, v) if *k >= range.begin && *k < range.end => {
                    merged.insert(k.clone(), v.clone());
                }
                Mutation::Clear(k) => {
                    merged.remove(k);
                }
                _ => {}
            }
        }
        drop(state);

        let mut out: Vec<KvPair> = merged
            .into_iter()
            .map(|(key, value)| KvPair { key, value })
            .collect();
        if range.reverse {
            out.reverse();
        }
        if let Some(limit) = range.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn open_directory(&self, path: &[String]) -> Result<Option<Subspace>> {
        if let Some(prefix) = self.created_prefix(path) {
            return Ok(Some(Subspace::new(path.to_vec(), prefix)));
        }
        Ok(self
            .snapshot
            .dir_prefix(path)
            .map(|prefix| Subspace::new(path.to_vec(), prefix)))
    }

    fn list_directory(&self, path: &[String]) -> Result<Vec<String>> {
        let in_snapshot = self.snapshot.root.node(path).is_some();
        if !in_snapshot && !path.is_empty() && self.created_prefix(path).is_none() {
            return Err(KvqError::Directory(format!(
                "directory {} does not exist",
                path_str(path)
            )));
        }

        let mut names: Vec<String> = match self.snapshot.root.node(path) {
            Some(node) => node.children.keys().cloned().collect(),
            None => Vec::new(),
        };
        let state = self.state.lock();
        for (created, _) in &state.created {
            if created.len() == path.len() + 1 && created.starts_with(path) {
                names.push(created.last().unwrap().clone());
            }
        }
        drop(state);

        names.sort();
        names.dedup();
        Ok(names)
    }
}

impl Transaction for MemoryTransaction {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.state
            .lock()
            .mutations
            .push(Mutation::Set(key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn clear(&self, key: &[u8]) -> Result<()> {
        self.state.lock().mutations.push(Mutation::Clear(key.to_vec()));
        Ok(())
    }

    fn create_or_open_directory(&self, path: &[String]) -> Result<Subspace> {
        if path.is_empty() {
            return Err(KvqError::Directory("cannot create the root directory".into()));
        }
        // Create missing ancestors first, the way the directory layer's
        // create-or-open does.
        let mut prefix = Vec::new();
        for depth in 1..=path.len() {
            let sub = &path[..depth];
            prefix = match self.open_directory(sub)? {
                Some(existing) => existing.prefix().to_vec(),
                None => {
                    let fresh = self.allocate_prefix();
                    self.state
                        .lock()
                        .created
                        .push((sub.to_vec(), fresh.clone()));
                    fresh
                }
            };
        }
        Ok(Subspace::new(path.to_vec(), prefix))
    }

    fn remove_directory(&self, path: &[String]) -> Result<bool> {
        if path.is_empty() {
            return Err(KvqError::Directory("cannot remove the root directory".into()));
        }
        let existed = self.open_directory(path)?.is_some();
        if existed {
            let mut state = self.state.lock();
            state.created.retain(|(p, _)| !p.starts_with(path));
            state.removed.push(path.to_vec());
        }
        Ok(existed)
    }

    fn commit(self) -> Result<()> {
        let state = self.state.into_inner();
        let mut store = self.db.write();

        for (path, prefix) in &state.created {
            if let Some(existing) = store.dir_prefix(path) {
                if existing != *prefix {
                    return Err(KvqError::Store(format!(
                        "conflicting creation of directory {}",
                        path_str(path)
                    )));
                }
            }
        }

        for (path, prefix) in state.created {
            let mut node = &mut store.root;
            for part in &path {
                node = node.children.entry(part.clone()).or_default();
            }
            node.prefix = prefix;
        }

        for path in state.removed {
            let Some((last, parent)) = path.split_last() else {
                continue;
            };
            let Some(parent_node) = store.root.node(parent) else {
                continue;
            };
            let Some(removed) = parent_node.children.get(last) else {
                continue;
            };
            let mut prefixes = Vec::new();
            removed.prefixes(&mut prefixes);

            let mut doomed = Vec::new();
            for prefix in prefixes {
                let end = strinc(&prefix)?;
                doomed.extend(
                    store
                        .kv
                        .range::<[u8], _>((
                            Bound::Included(prefix.as_slice()),
                            Bound::Excluded(end.as_slice()),
                        ))
                        .map(|(k, _)| k.clone()),
                );
            }
            for key in doomed {
                store.kv.remove(&key);
            }

            let mut node = &mut store.root;
            for part in parent {
                node = node.children.get_mut(part).unwrap();
            }
            node.children.remove(last);
        }

        for mutation in state.mutations {
            match mutation {
                Mutation::Set(k, v) => {
                    store.kv.insert(k, v);
                }
                Mutation::Clear(k) => {
                    store.kv.remove(&k);
                }
            }
        }
        Ok(())
    }
}
