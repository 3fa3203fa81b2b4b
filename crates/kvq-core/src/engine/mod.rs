//! The execution engine.
//!
//! Five entry points, one transaction each: `set`, `clear`,
//! `single_read`, `range_read`, and `directories`. Reads run on
//! snapshot transactions; writes run through a bounded retry loop, with
//! conflict detection delegated to the store facade.

pub mod stream;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{KvqError, Result};
use crate::facade::{Database, ReadTransaction, Transaction};
use crate::keyval::class::{classify, Class};
use crate::keyval::{convert, values, Directory, KeyValue, Query, Value, Variable};
use crate::options::{ByteOrder, RangeOpts, SingleOpts};
use stream::{DirMsg, KvMsg, Stream};

/// Attempts per write transaction before a conflict becomes the caller's
/// problem.
const MAX_TXN_ATTEMPTS: usize = 5;

pub struct Engine<D: Database> {
    db: D,
}

impl<D: Database> Engine<D> {
    pub fn new(db: D) -> Engine<D> {
        Engine { db }
    }

    /// Writes a concrete key-value. The query must classify as a set.
    pub fn set(&self, query: KeyValue, order: ByteOrder) -> Result<()> {
        let Class::Set(kv) = classify(Query::KeyValue(query))? else {
            return Err(KvqError::Classify(
                "set requires a concrete key and value".into(),
            ));
        };
        debug!("executing set query");

        let path = convert::dir_to_path(&kv.key.directory)?;
        let key_elements = convert::to_layer_elements(&kv.key.tuple.0)?;
        let value = values::pack(&kv.value, order)?;

        self.transact(|tr| {
            let dir = tr.create_or_open_directory(&path)?;
            tr.set(&dir.pack(&key_elements), &value)
        })
    }

    /// Deletes a concrete key. The query must classify as a clear.
    pub fn clear(&self, query: KeyValue) -> Result<()> {
        let Class::Clear(kv) = classify(Query::KeyValue(query))? else {
            return Err(KvqError::Classify(
                "clear requires a concrete key and the clear sentinel".into(),
            ));
        };
        debug!("executing clear query");

        let path = convert::dir_to_path(&kv.key.directory)?;
        let key_elements = convert::to_layer_elements(&kv.key.tuple.0)?;

        self.transact(|tr| {
            let dir = tr.open_directory(&path)?.ok_or_else(|| {
                KvqError::Directory(format!(
                    "directory {} does not exist",
                    crate::facade::path_str(&path)
                ))
            })?;
            tr.clear(&dir.pack(&key_elements))
        })
    }

    /// Reads a single key and validates the stored value against the
    /// query's value variable. A missing directory or key reads as
    /// `None`; a value that fits none of the allowed types reads as
    /// `None` when filtering and fails the read otherwise.
    pub fn single_read(&self, query: KeyValue, opts: SingleOpts) -> Result<Option<KeyValue>> {
        let Class::SingleRead(kv) = classify(Query::KeyValue(query))? else {
            return Err(KvqError::Classify(
                "single read requires a concrete key and a variable value".into(),
            ));
        };
        let Value::Variable(variable) = &kv.value else {
            unreachable!("single-read classification guarantees a variable value");
        };
        debug!("executing single-read query");

        let path = convert::dir_to_path(&kv.key.directory)?;
        let key_elements = convert::to_layer_elements(&kv.key.tuple.0)?;

        let tr = self.db.begin_read()?;
        let Some(dir) = tr.open_directory(&path)? else {
            return Ok(None);
        };
        let Some(raw) = tr.get(&dir.pack(&key_elements))? else {
            return Ok(None);
        };

        match resolve_value(variable, &raw, opts.byte_order) {
            Some(value) => Ok(Some(KeyValue { key: kv.key, value })),
            None if opts.filter => Ok(None),
            None => Err(KvqError::StrictViolation(
                "stored value decodes under none of the allowed types".into(),
            )),
        }
    }

    /// Runs the four-stage pipeline and returns its output channel. The
    /// caller drains the channel; cancelling the token or dropping the
    /// receiver tears the pipeline down.
    pub fn range_read(
        &self,
        cancel: CancellationToken,
        query: KeyValue,
        opts: RangeOpts,
    ) -> mpsc::Receiver<KvMsg> {
        let kv = match classify(Query::KeyValue(query)) {
            Ok(Class::RangeRead(kv)) => kv,
            Ok(_) => {
                return error_channel(KvqError::Classify(
                    "range read requires a variable in the key or value".into(),
                ))
            }
            Err(err) => return error_channel(err),
        };
        let tr = match self.db.begin_read() {
            Ok(tr) => Arc::new(tr),
            Err(err) => return error_channel(err),
        };
        debug!("executing range-read query");

        let stream = Stream::new(cancel);
        let dirs = stream.open_directories(tr.clone(), &kv.key.directory);
        let raws = stream.read_range(tr, &kv.key.tuple, &opts, dirs);
        let filtered = stream.filter_keys(&kv.key.tuple, opts.filter, raws);
        stream.unpack_values(&kv.value, &opts, filtered)
    }

    /// Expands a directory pattern into matching subspaces.
    pub fn directories(
        &self,
        cancel: CancellationToken,
        query: Directory,
    ) -> mpsc::Receiver<DirMsg> {
        let dir = match classify(Query::Directory(query)) {
            Ok(Class::Directories(dir)) => dir,
            Ok(_) => return error_channel(KvqError::Classify("expected a directory query".into())),
            Err(err) => return error_channel(err),
        };
        let tr = match self.db.begin_read() {
            Ok(tr) => Arc::new(tr),
            Err(err) => return error_channel(err),
        };
        debug!("executing directories query");

        Stream::new(cancel).open_directories(tr, &dir)
    }

    /// Runs `f` in a write transaction, retrying on store conflicts the
    /// way the client library's transact loop does.
    fn transact(&self, f: impl Fn(&D::Tr) -> Result<()>) -> Result<()> {
        let mut attempt = 0;
        loop {
            let tr = self.db.begin()?;
            f(&tr)?;
            match tr.commit() {
                Ok(()) => return Ok(()),
                Err(KvqError::Store(reason)) if attempt + 1 < MAX_TXN_ATTEMPTS => {
                    attempt += 1;
                    debug!(attempt, %reason, "retrying conflicted transaction");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Decodes a stored value against a variable's allowed types; `None`
/// means nothing matched. Shared by point reads and, in spirit, by the
/// pipeline's unpack stage.
fn resolve_value(variable: &Variable, raw: &[u8], order: ByteOrder) -> Option<Value> {
    if variable.0.is_empty() {
        return Some(Value::Bytes(raw.to_vec()));
    }
    variable
        .0
        .iter()
        .find_map(|typ| values::unpack(raw, *typ, order).ok())
}

fn error_channel<T: Send + 'static>(err: KvqError) -> mpsc::Receiver<Result<T>> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let _ = tx.send(Err(err)).await;
    });
    rx
}
