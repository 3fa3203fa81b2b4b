//! A typed cursor over a tuple's elements.
//!
//! `read_tuple` hands a caller-provided closure an iterator whose typed
//! readers each return a `Result`, so `?` threads the first failure out
//! of the closure. Numeric widening into `BigInt` is the only implicit
//! conversion.

use num_bigint::BigInt;
use uuid::Uuid;

use crate::errors::{KvqError, Result};
use crate::keyval::{TupElement, Tuple};

/// Modifies how [`read_tuple`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleErrorMode {
    /// Also fail with `LongTuple` when the closure leaves elements
    /// unconsumed.
    AllErrors,
    /// Allow trailing unconsumed elements.
    AllowLong,
}

/// Runs `f` with an iterator over `t`'s elements.
///
/// Errors from `f` are returned as-is. Reading past the end of the tuple
/// yields `ShortTuple`; under `AllErrors`, not consuming the whole tuple
/// yields `LongTuple`.
pub fn read_tuple<T>(
    t: &Tuple,
    mode: TupleErrorMode,
    f: impl FnOnce(&mut TupleIterator) -> Result<T>,
) -> Result<T> {
    let mut iter = TupleIterator { t, i: 0 };
    let out = f(&mut iter)?;
    if mode == TupleErrorMode::AllErrors && iter.i != t.len() {
        return Err(KvqError::LongTuple);
    }
    Ok(out)
}

pub struct TupleIterator<'a> {
    t: &'a Tuple,
    i: usize,
}

impl<'a> TupleIterator<'a> {
    fn next_index(&mut self) -> Result<usize> {
        if self.i >= self.t.len() {
            return Err(KvqError::ShortTuple);
        }
        self.i += 1;
        Ok(self.i - 1)
    }

    fn conversion(&self, index: usize, out_type: &'static str) -> KvqError {
        KvqError::Conversion {
            index,
            in_type: type_name(&self.t.0[index]),
            out_type,
        }
    }

    pub fn any(&mut self) -> Result<&'a TupElement> {
        let index = self.next_index()?;
        Ok(&self.t.0[index])
    }

    pub fn bool(&mut self) -> Result<bool> {
        let index = self.next_index()?;
        match &self.t.0[index] {
            TupElement::Bool(b) => Ok(*b),
            _ => Err(self.conversion(index, "bool")),
        }
    }

    pub fn int(&mut self) -> Result<i64> {
        let index = self.next_index()?;
        match &self.t.0[index] {
            TupElement::Int(i) => Ok(*i),
            _ => Err(self.conversion(index, "int")),
        }
    }

    pub fn uint(&mut self) -> Result<u64> {
        let index = self.next_index()?;
        match &self.t.0[index] {
            TupElement::Uint(u) => Ok(*u),
            TupElement::Int(i) if *i >= 0 => Ok(*i as u64),
            _ => Err(self.conversion(index, "uint")),
        }
    }

    pub fn big_int(&mut self) -> Result<BigInt> {
        let index = self.next_index()?;
        match &self.t.0[index] {
            TupElement::Int(i) => Ok(BigInt::from(*i)),
            TupElement::Uint(u) => Ok(BigInt::from(*u)),
            TupElement::BigInt(b) => Ok(b.clone()),
            _ => Err(self.conversion(index, "bigint")),
        }
    }

    pub fn float(&mut self) -> Result<f64> {
        let index = self.next_index()?;
        match &self.t.0[index] {
            TupElement::Float(f) => Ok(*f),
            _ => Err(self.conversion(index, "float")),
        }
    }

    pub fn string(&mut self) -> Result<&'a str> {
        let index = self.next_index()?;
        match &self.t.0[index] {
            TupElement::String(s) => Ok(s),
            _ => Err(self.conversion(index, "string")),
        }
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let index = self.next_index()?;
        match &self.t.0[index] {
            TupElement::Bytes(b) => Ok(b),
            _ => Err(self.conversion(index, "bytes")),
        }
    }

    pub fn uuid(&mut self) -> Result<Uuid> {
        let index = self.next_index()?;
        match &self.t.0[index] {
            TupElement::Uuid(u) => Ok(*u),
            _ => Err(self.conversion(index, "uuid")),
        }
    }

    pub fn tuple(&mut self) -> Result<&'a Tuple> {
        let index = self.next_index()?;
        match &self.t.0[index] {
            TupElement::Tuple(t) => Ok(t),
            _ => Err(self.conversion(index, "tuple")),
        }
    }
}

fn type_name(e: &TupElement) -> &'static str {
    match e {
        TupElement::Tuple(_) => "tuple",
        TupElement::Nil => "nil",
        TupElement::Int(_) => "int",
        TupElement::Uint(_) => "uint",
        TupElement::Bool(_) => "bool",
        TupElement::Float(_) => "float",
        TupElement::BigInt(_) => "bigint",
        TupElement::String(_) => "string",
        TupElement::Uuid(_) => "uuid",
        TupElement::Bytes(_) => "bytes",
        TupElement::Variable(_) => "variable",
        TupElement::MaybeMore => "maybe-more",
    }
}
