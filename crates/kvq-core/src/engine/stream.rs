//! The range-read pipeline.
//!
//! Four cooperative stages, each running in its own task and talking to
//! the next over a bounded channel: directory expansion, range reading,
//! key filtering, and value decoding. All stages share one cancellation
//! token; the first error anywhere cancels everything, and a dropped
//! receiver unwinds the pipeline through failed sends.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::{KvqError, Result};
use crate::facade::{path_str, KvPair, RangeSpec, ReadTransaction, Subspace};
use crate::keyval::compare::compare_tuples;
use crate::keyval::{convert, values, DirElement, Directory, Key, KeyValue, Tuple, Value};
use crate::options::RangeOpts;

/// Channel capacity between stages. The pipeline is a relay, not a
/// buffer; one slot keeps stages in lockstep.
const CHANNEL_CAPACITY: usize = 1;

pub type DirMsg = Result<Subspace>;
pub type DirKvMsg = Result<(Subspace, KvPair)>;
pub type KvMsg = Result<KeyValue>;

/// Shared per-pipeline state: the cancellation token and the send/receive
/// discipline every stage follows.
#[derive(Clone)]
pub struct Stream {
    token: CancellationToken,
}

impl Stream {
    pub fn new(token: CancellationToken) -> Stream {
        Stream { token }
    }

    /// Sends a message unless the pipeline is cancelled or the receiver
    /// is gone. Sending an error cancels the pipeline afterwards.
    /// Returns whether the stage should keep going.
    async fn send<T>(&self, tx: &mpsc::Sender<Result<T>>, msg: Result<T>) -> bool {
        let is_err = msg.is_err();
        let delivered = tokio::select! {
            _ = self.token.cancelled() => false,
            sent = tx.send(msg) => sent.is_ok(),
        };
        if is_err {
            self.token.cancel();
            return false;
        }
        delivered
    }

    async fn recv<T>(&self, rx: &mut mpsc::Receiver<Result<T>>) -> Option<Result<T>> {
        tokio::select! {
            _ = self.token.cancelled() => None,
            msg = rx.recv() => msg,
        }
    }

    /// Stage 1: expands a directory pattern into subspaces.
    ///
    /// The pattern splits at its first variable; each child listed under
    /// the prefix re-enters the expansion with the variable substituted.
    /// Children are visited in the order the directory layer lists them.
    pub fn open_directories<T>(&self, tr: Arc<T>, query: &Directory) -> mpsc::Receiver<DirMsg>
    where
        T: ReadTransaction + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let stream = self.clone();
        let query = query.clone();

        tokio::spawn(async move {
            let mut stack = vec![query.0];

            while let Some(pattern) = stack.pop() {
                let (prefix, variable, suffix) = convert::split_dir_at_first_variable(&pattern);
                let path = match convert::dir_to_path(&Directory(prefix.to_vec())) {
                    Ok(path) => path,
                    Err(err) => {
                        stream.send(&tx, Err(err)).await;
                        return;
                    }
                };

                if variable.is_some() {
                    let children = match tr.list_directory(&path) {
                        Ok(children) => children,
                        Err(err) => {
                            stream.send(&tx, Err(err)).await;
                            return;
                        }
                    };
                    if children.is_empty() {
                        let err = KvqError::Directory(format!(
                            "no subdirectories for {}",
                            path_str(&path)
                        ));
                        stream.send(&tx, Err(err)).await;
                        return;
                    }
                    trace!(path = %path_str(&path), count = children.len(), "found subdirectories");

                    // Last pushed is expanded first, so push in reverse
                    // to keep the listing order.
                    for child in children.into_iter().rev() {
                        let mut expanded = prefix.to_vec();
                        expanded.push(DirElement::String(child));
                        expanded.extend_from_slice(suffix);
                        stack.push(expanded);
                    }
                } else {
                    match tr.open_directory(&path) {
                        Ok(Some(dir)) => {
                            debug!(path = %path_str(dir.path()), "sending directory");
                            if !stream.send(&tx, Ok(dir)).await {
                                return;
                            }
                        }
                        Ok(None) => {
                            let err = KvqError::Directory(format!(
                                "directory {} does not exist",
                                path_str(&path)
                            ));
                            stream.send(&tx, Err(err)).await;
                            return;
                        }
                        Err(err) => {
                            stream.send(&tx, Err(err)).await;
                            return;
                        }
                    }
                }
            }
        });

        rx
    }

    /// Stage 2: reads the raw key range of each directory.
    ///
    /// The longest concrete prefix of the key tuple narrows the range.
    /// The limit caps rows across all directories; reaching it closes
    /// the output, which unwinds the upstream stage.
    pub fn read_range<T>(
        &self,
        tr: Arc<T>,
        query: &Tuple,
        opts: &RangeOpts,
        mut input: mpsc::Receiver<DirMsg>,
    ) -> mpsc::Receiver<DirKvMsg>
    where
        T: ReadTransaction + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let stream = self.clone();
        let prefix = convert::concrete_prefix(query).to_vec();
        let opts = *opts;

        tokio::spawn(async move {
            let prefix = match convert::to_layer_elements(&prefix) {
                Ok(prefix) => prefix,
                Err(err) => {
                    stream.send(&tx, Err(err)).await;
                    return;
                }
            };
            let mut remaining = (opts.limit > 0).then_some(opts.limit);

            while let Some(msg) = stream.recv(&mut input).await {
                let dir = match msg {
                    Ok(dir) => dir,
                    Err(err) => {
                        stream.send(&tx, Err(err)).await;
                        return;
                    }
                };
                debug!(path = %path_str(dir.path()), "received directory");

                let mut range = match RangeSpec::prefix(dir.pack(&prefix)) {
                    Ok(range) => range,
                    Err(err) => {
                        stream.send(&tx, Err(err)).await;
                        return;
                    }
                };
                range.reverse = opts.reverse;
                range.limit = remaining;

                let rows = match tr.get_range(&range) {
                    Ok(rows) => rows,
                    Err(err) => {
                        stream.send(&tx, Err(err)).await;
                        return;
                    }
                };

                for row in rows {
                    trace!(key = ?row.key, "sending raw key-value");
                    if !stream.send(&tx, Ok((dir.clone(), row))).await {
                        return;
                    }
                    if let Some(rem) = remaining.as_mut() {
                        *rem -= 1;
                        if *rem == 0 {
                            return;
                        }
                    }
                }
            }
        });

        rx
    }

    /// Stage 3: decodes each raw key and compares it against the query
    /// tuple. Mismatches are dropped when filtering, fatal otherwise.
    pub fn filter_keys(
        &self,
        query: &Tuple,
        filter: bool,
        mut input: mpsc::Receiver<DirKvMsg>,
    ) -> mpsc::Receiver<KvMsg> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let stream = self.clone();
        let query = query.clone();

        tokio::spawn(async move {
            while let Some(msg) = stream.recv(&mut input).await {
                let (dir, raw) = match msg {
                    Ok(pair) => pair,
                    Err(err) => {
                        stream.send(&tx, Err(err)).await;
                        return;
                    }
                };

                let elements = match dir.unpack(&raw.key) {
                    Ok(elements) => elements,
                    Err(err) => {
                        stream.send(&tx, Err(err)).await;
                        return;
                    }
                };
                let tuple = convert::from_layer_elements(elements);

                match compare_tuples(&query, &tuple) {
                    None => {
                        let kv = KeyValue {
                            key: Key {
                                directory: convert::dir_from_path(dir.path()),
                                tuple,
                            },
                            value: Value::Bytes(raw.value),
                        };
                        trace!("sending filtered key-value");
                        if !stream.send(&tx, Ok(kv)).await {
                            return;
                        }
                    }
                    Some(index) => {
                        if filter {
                            trace!(index, "dropping mismatched key");
                            continue;
                        }
                        let err = KvqError::StrictViolation(format!(
                            "key in {} does not match the schema at element {index}",
                            path_str(dir.path())
                        ));
                        stream.send(&tx, Err(err)).await;
                        return;
                    }
                }
            }
        });

        rx
    }

    /// Stage 4: resolves each row's raw value against the query value.
    ///
    /// A concrete query value packs once and selects rows whose bytes
    /// match. A variable tries its allowed types in order and replaces
    /// the raw bytes with the first successful decode; an empty type
    /// list passes the raw bytes through.
    pub fn unpack_values(
        &self,
        query: &Value,
        opts: &RangeOpts,
        mut input: mpsc::Receiver<KvMsg>,
    ) -> mpsc::Receiver<KvMsg> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let stream = self.clone();
        let query = query.clone();
        let opts = *opts;

        tokio::spawn(async move {
            match query {
                Value::Variable(variable) => {
                    while let Some(msg) = stream.recv(&mut input).await {
                        let mut kv = match msg {
                            Ok(kv) => kv,
                            Err(err) => {
                                stream.send(&tx, Err(err)).await;
                                return;
                            }
                        };
                        let raw = match &kv.value {
                            Value::Bytes(b) => b.clone(),
                            _ => {
                                let err = KvqError::Codec(
                                    "upstream stage produced a non-byte value".into(),
                                );
                                stream.send(&tx, Err(err)).await;
                                return;
                            }
                        };

                        if variable.0.is_empty() {
                            if !stream.send(&tx, Ok(kv)).await {
                                return;
                            }
                            continue;
                        }

                        let decoded = variable
                            .0
                            .iter()
                            .find_map(|typ| values::unpack(&raw, *typ, opts.byte_order).ok());
                        match decoded {
                            Some(value) => {
                                kv.value = value;
                                trace!("sending decoded key-value");
                                if !stream.send(&tx, Ok(kv)).await {
                                    return;
                                }
                            }
                            None if opts.filter => {
                                trace!("dropping value that decodes under no allowed type");
                            }
                            None => {
                                let err = KvqError::StrictViolation(
                                    "value decodes under none of the allowed types".into(),
                                );
                                stream.send(&tx, Err(err)).await;
                                return;
                            }
                        }
                    }
                }
                query => {
                    let packed = match values::pack(&query, opts.byte_order) {
                        Ok(packed) => packed,
                        Err(err) => {
                            stream.send(&tx, Err(err)).await;
                            return;
                        }
                    };

                    while let Some(msg) = stream.recv(&mut input).await {
                        let mut kv = match msg {
                            Ok(kv) => kv,
                            Err(err) => {
                                stream.send(&tx, Err(err)).await;
                                return;
                            }
                        };
                        if matches!(&kv.value, Value::Bytes(b) if *b == packed) {
                            kv.value = query.clone();
                            trace!("sending matched key-value");
                            if !stream.send(&tx, Ok(kv)).await {
                                return;
                            }
                        }
                    }
                }
            }
        });

        rx
    }
}
