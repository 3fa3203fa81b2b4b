//! Query classification.
//!
//! A parsed query maps to exactly one of five operations, decided by
//! where variables appear. Shapes that fit none of them are rejected
//! here, before any store access happens.

use crate::errors::{KvqError, Result};
use crate::keyval::{KeyValue, Query, TupElement, Tuple, Value, Variable};

/// The operation a query describes, carrying its normalized form.
#[derive(Debug, Clone, PartialEq)]
pub enum Class {
    /// Write a concrete value under a concrete key.
    Set(KeyValue),
    /// Delete a concrete key.
    Clear(KeyValue),
    /// Read one key; the value variable validates what comes back.
    SingleRead(KeyValue),
    /// Read a key range, filtering and decoding against the schema.
    RangeRead(KeyValue),
    /// Expand a directory pattern into matching subspaces.
    Directories(crate::keyval::Directory),
}

pub fn classify(query: Query) -> Result<Class> {
    match query {
        Query::Directory(dir) => {
            if dir.is_empty() {
                return Err(KvqError::Classify("empty directory".into()));
            }
            Ok(Class::Directories(dir))
        }
        // A bare key reads the whole key-value, so it gets an implicit
        // unconstrained value variable.
        Query::Key(key) => classify(Query::KeyValue(KeyValue {
            key,
            value: Value::Variable(Variable::default()),
        })),
        Query::KeyValue(kv) => classify_key_value(kv),
    }
}

fn classify_key_value(kv: KeyValue) -> Result<Class> {
    if kv.key.directory.is_empty() {
        return Err(KvqError::Classify("empty directory".into()));
    }
    check_maybe_more(&kv.key.tuple)?;

    let key_has_hole = kv.key.directory.has_variable() || kv.key.tuple.has_hole();

    match &kv.value {
        Value::Clear => {
            if key_has_hole {
                return Err(KvqError::Classify(
                    "clear queries cannot have variables in their key".into(),
                ));
            }
            Ok(Class::Clear(kv))
        }
        Value::Variable(_) => {
            if key_has_hole {
                Ok(Class::RangeRead(kv))
            } else {
                Ok(Class::SingleRead(kv))
            }
        }
        v if v.is_concrete() => {
            if key_has_hole {
                Ok(Class::RangeRead(kv))
            } else {
                Ok(Class::Set(kv))
            }
        }
        _ => Err(KvqError::Classify(
            "value must be a variable, the clear sentinel, or concrete data".into(),
        )),
    }
}

/// `MaybeMore` is only legal as the last element of the outermost key
/// tuple.
fn check_maybe_more(tuple: &Tuple) -> Result<()> {
    let last = tuple.0.len().saturating_sub(1);
    for (i, e) in tuple.0.iter().enumerate() {
        match e {
            TupElement::MaybeMore if i != last => {
                return Err(KvqError::Classify(
                    "the '...' wildcard must be the last element of the key tuple".into(),
                ))
            }
            TupElement::Tuple(t) => check_no_maybe_more(t)?,
            _ => {}
        }
    }
    Ok(())
}

fn check_no_maybe_more(tuple: &Tuple) -> Result<()> {
    for e in &tuple.0 {
        match e {
            TupElement::MaybeMore => {
                return Err(KvqError::Classify(
                    "the '...' wildcard cannot appear inside a nested tuple".into(),
                ))
            }
            TupElement::Tuple(t) => check_no_maybe_more(t)?,
            _ => {}
        }
    }
    Ok(())
}
