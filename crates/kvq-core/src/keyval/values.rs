//! The value codec: scalar values to and from raw bytes.
//!
//! Unlike keys, values are stored without type tags, so decoding is
//! driven by the query's allowed types. A decode succeeds only when it
//! consumes the entire input.

use num_bigint::BigInt;
use uuid::Uuid;

use crate::errors::{KvqError, Result};
use crate::keyval::{convert, Value, ValueType};
use crate::options::ByteOrder;
use crate::tuple;

/// Packs a concrete value into its stored byte form.
pub fn pack(value: &Value, order: ByteOrder) -> Result<Vec<u8>> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Bool(b) => Ok(vec![u8::from(*b)]),
        Value::Int(i) => Ok(order.u64_bytes(*i as u64).to_vec()),
        Value::Uint(u) => Ok(order.u64_bytes(*u).to_vec()),
        Value::Float(f) => Ok(order.u64_bytes(f.to_bits()).to_vec()),
        Value::BigInt(b) => Ok(match order {
            ByteOrder::Big => b.to_signed_bytes_be(),
            ByteOrder::Little => b.to_signed_bytes_le(),
        }),
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Bytes(b) => Ok(b.clone()),
        Value::Uuid(u) => Ok(u.as_bytes().to_vec()),
        Value::Tuple(t) => Ok(tuple::pack(&convert::to_layer_elements(&t.0)?)),
        Value::Variable(_) => Err(KvqError::Codec("cannot pack a variable".into())),
        Value::Clear => Err(KvqError::Codec("cannot pack the clear sentinel".into())),
    }
}

/// Unpacks raw bytes as the given type. `Any` passes the bytes through.
pub fn unpack(bytes: &[u8], typ: ValueType, order: ByteOrder) -> Result<Value> {
    match typ {
        ValueType::Any | ValueType::Bytes => Ok(Value::Bytes(bytes.to_vec())),
        ValueType::Int => Ok(Value::Int(order.u64_from(fixed(bytes, 8)?) as i64)),
        ValueType::Uint => Ok(Value::Uint(order.u64_from(fixed(bytes, 8)?))),
        ValueType::Float => Ok(Value::Float(f64::from_bits(
            order.u64_from(fixed(bytes, 8)?),
        ))),
        ValueType::Bool => match bytes {
            [0] => Ok(Value::Bool(false)),
            [1] => Ok(Value::Bool(true)),
            _ => Err(KvqError::Codec(format!(
                "expected a single 0/1 byte, got {} bytes",
                bytes.len()
            ))),
        },
        ValueType::BigInt => {
            if bytes.is_empty() {
                return Err(KvqError::Codec("empty bigint encoding".into()));
            }
            Ok(Value::BigInt(match order {
                ByteOrder::Big => BigInt::from_signed_bytes_be(bytes),
                ByteOrder::Little => BigInt::from_signed_bytes_le(bytes),
            }))
        }
        ValueType::String => String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|e| KvqError::Codec(format!("invalid UTF-8: {e}"))),
        ValueType::Uuid => {
            let raw: [u8; 16] = bytes
                .try_into()
                .map_err(|_| KvqError::Codec(format!("expected 16 bytes, got {}", bytes.len())))?;
            Ok(Value::Uuid(Uuid::from_bytes(raw)))
        }
        ValueType::Tuple => Ok(Value::Tuple(convert::from_layer_elements(tuple::unpack(
            bytes,
        )?))),
    }
}

fn fixed(bytes: &[u8], len: usize) -> Result<[u8; 8]> {
    if bytes.len() != len {
        return Err(KvqError::Codec(format!(
            "expected {len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes.try_into().unwrap())
}
