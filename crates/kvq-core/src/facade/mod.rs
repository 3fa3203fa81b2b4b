//! The store facade.
//!
//! The engine is written against these traits rather than a concrete
//! client: a transactional ordered key-value store with a directory
//! layer. [`memory`] provides the embedded implementation used by the
//! CLI and the tests; a FoundationDB-backed implementation would be a
//! drop-in replacement.

pub mod memory;

use crate::errors::{KvqError, Result};
use crate::tuple::{self, Element};

/// A directory-layer subspace: a short opaque key prefix standing in for
/// a human-readable path, plus tuple pack/unpack under that prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subspace {
    path: Vec<String>,
    prefix: Vec<u8>,
}

impl Subspace {
    pub fn new(path: Vec<String>, prefix: Vec<u8>) -> Subspace {
        Subspace { path, prefix }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn pack(&self, elements: &[Element]) -> Vec<u8> {
        let mut out = self.prefix.clone();
        out.extend_from_slice(&tuple::pack(elements));
        out
    }

    pub fn unpack(&self, key: &[u8]) -> Result<Vec<Element>> {
        let rest = key.strip_prefix(self.prefix.as_slice()).ok_or_else(|| {
            KvqError::Codec(format!(
                "key does not start with the subspace prefix of {}",
                path_str(&self.path)
            ))
        })?;
        tuple::unpack(rest)
    }
}

/// Renders a directory path for error messages and display.
pub fn path_str(path: &[String]) -> String {
    let mut out = String::new();
    for part in path {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// A raw key-value pair as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// A half-open key range `[begin, end)` with iteration options.
#[derive(Debug, Clone, Default)]
pub struct RangeSpec {
    pub begin: Vec<u8>,
    pub end: Vec<u8>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl RangeSpec {
    /// The range of every key starting with `prefix`.
    pub fn prefix(prefix: Vec<u8>) -> Result<RangeSpec> {
        let end = strinc(&prefix)?;
        Ok(RangeSpec {
            begin: prefix,
            end,
            reverse: false,
            limit: None,
        })
    }
}

/// The first key ordered after every key with the given prefix.
pub fn strinc(prefix: &[u8]) -> Result<Vec<u8>> {
    let trimmed = prefix
        .iter()
        .rposition(|&b| b != 0xff)
        .map(|i| &prefix[..=i])
        .ok_or_else(|| KvqError::Store("prefix has no strict upper bound".into()))?;
    let mut out = trimmed.to_vec();
    *out.last_mut().unwrap() += 1;
    Ok(out)
}

pub trait ReadTransaction: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn get_range(&self, range: &RangeSpec) -> Result<Vec<KvPair>>;

    /// Opens an existing directory, or returns `None` if the path has
    /// never been created.
    fn open_directory(&self, path: &[String]) -> Result<Option<Subspace>>;

    /// Lists the immediate children of a directory. Fails if the path
    /// itself does not exist.
    fn list_directory(&self, path: &[String]) -> Result<Vec<String>>;
}

pub trait Transaction: ReadTransaction {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn clear(&self, key: &[u8]) -> Result<()>;

    fn create_or_open_directory(&self, path: &[String]) -> Result<Subspace>;

    /// Removes a directory and everything under it. Returns whether the
    /// path existed.
    fn remove_directory(&self, path: &[String]) -> Result<bool>;

    /// Commits buffered writes atomically. Conflicts surface as `Store`
    /// errors, which the engine retries.
    fn commit(self) -> Result<()>;
}

/// A handle to the store, cheap to clone and shared across tasks.
pub trait Database: Clone + Send + Sync + 'static {
    type ReadTr: ReadTransaction + 'static;
    type Tr: Transaction + 'static;

    /// Starts a read-only snapshot transaction.
    fn begin_read(&self) -> Result<Self::ReadTr>;

    /// Starts a read-write transaction.
    fn begin(&self) -> Result<Self::Tr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strinc_skips_trailing_ff() {
        assert_eq!(strinc(&[0x01, 0x02]).unwrap(), vec![0x01, 0x03]);
        assert_eq!(strinc(&[0x01, 0xff, 0xff]).unwrap(), vec![0x02]);
        assert!(strinc(&[0xff, 0xff]).is_err());
        assert!(strinc(&[]).is_err());
    }

    #[test]
    fn subspace_pack_unpack() {
        let ss = Subspace::new(vec!["a".into()], vec![0xfe, 0x15, 0x01]);
        let key = ss.pack(&[Element::Int(5), Element::String("x".into())]);
        assert!(key.starts_with(ss.prefix()));
        assert_eq!(
            ss.unpack(&key).unwrap(),
            vec![Element::Int(5), Element::String("x".into())]
        );

        let other = Subspace::new(vec!["b".into()], vec![0xfe, 0x15, 0x02]);
        assert!(other.unpack(&key).is_err());
    }

    #[test]
    fn path_rendering() {
        assert_eq!(path_str(&[]), "/");
        assert_eq!(path_str(&["a".into(), "b".into()]), "/a/b");
    }
}
