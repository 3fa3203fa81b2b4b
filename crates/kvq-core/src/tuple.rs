//! The order-preserving tuple encoding used for keys.
//!
//! Tuples pack to byte strings whose lexicographic order matches the
//! natural order of the tuple elements, so range reads over a packed
//! prefix walk keys in tuple order. The layout follows the FoundationDB
//! tuple layer: a one-byte type code per element, NUL-escaped byte runs,
//! offset-binary negative integers, and sign-transformed doubles.

use num_bigint::{BigInt, Sign};
use uuid::Uuid;

use crate::errors::{KvqError, Result};

/// A single element of an encoded tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Nil,
    Bytes(Vec<u8>),
    String(String),
    Tuple(Vec<Element>),
    Int(i64),
    Uint(u64),
    BigInt(BigInt),
    Double(f64),
    Bool(bool),
    Uuid(Uuid),
}

const NIL: u8 = 0x00;
const BYTES: u8 = 0x01;
const STRING: u8 = 0x02;
const NESTED: u8 = 0x05;
const NEG_INT_BIG: u8 = 0x0b;
const INT_ZERO: u8 = 0x14;
const POS_INT_BIG: u8 = 0x1d;
const DOUBLE: u8 = 0x21;
const FALSE: u8 = 0x26;
const TRUE: u8 = 0x27;
const UUID_CODE: u8 = 0x30;

/// Packs a sequence of elements into a single byte string.
pub fn pack(elements: &[Element]) -> Vec<u8> {
    let mut out = Vec::new();
    for e in elements {
        encode(e, &mut out, false);
    }
    out
}

/// Unpacks a byte string produced by [`pack`]. The entire input must be
/// consumed.
pub fn unpack(bytes: &[u8]) -> Result<Vec<Element>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let (element, next) = decode(bytes, i)?;
        out.push(element);
        i = next;
    }
    Ok(out)
}

fn encode(element: &Element, out: &mut Vec<u8>, nested: bool) {
    match element {
        Element::Nil => {
            out.push(NIL);
            // Inside a nested tuple NUL doubles as the terminator, so a
            // nil element carries an escape byte.
            if nested {
                out.push(0xff);
            }
        }
        Element::Bytes(b) => {
            out.push(BYTES);
            escape_nul(b, out);
            out.push(0x00);
        }
        Element::String(s) => {
            out.push(STRING);
            escape_nul(s.as_bytes(), out);
            out.push(0x00);
        }
        Element::Tuple(elements) => {
            out.push(NESTED);
            for e in elements {
                encode(e, out, true);
            }
            out.push(0x00);
        }
        Element::Int(i) => encode_i128(i128::from(*i), out),
        Element::Uint(u) => encode_i128(i128::from(*u), out),
        Element::BigInt(b) => encode_bigint(b, out),
        Element::Double(f) => {
            out.push(DOUBLE);
            let mut bits = f.to_bits().to_be_bytes();
            if bits[0] & 0x80 != 0 {
                for b in bits.iter_mut() {
                    *b = !*b;
                }
            } else {
                bits[0] ^= 0x80;
            }
            out.extend_from_slice(&bits);
        }
        Element::Bool(b) => out.push(if *b { TRUE } else { FALSE }),
        Element::Uuid(u) => {
            out.push(UUID_CODE);
            out.extend_from_slice(u.as_bytes());
        }
    }
}

fn escape_nul(data: &[u8], out: &mut Vec<u8>) {
    for &b in data {
        out.push(b);
        if b == 0x00 {
            out.push(0xff);
        }
    }
}

fn encode_i128(v: i128, out: &mut Vec<u8>) {
    if v == 0 {
        out.push(INT_ZERO);
        return;
    }
    if v > 0 {
        let m = minimal_be(v as u128);
        out.push(INT_ZERO + m.len() as u8);
        out.extend_from_slice(&m);
    } else {
        let mag = v.unsigned_abs();
        let n = minimal_be(mag).len();
        let bias = (1u128 << (8 * n)).wrapping_sub(1);
        let payload = bias - mag;
        out.push(INT_ZERO - n as u8);
        out.extend_from_slice(&payload.to_be_bytes()[16 - n..]);
    }
}

fn encode_bigint(v: &BigInt, out: &mut Vec<u8>) {
    let (sign, mag) = v.to_bytes_be();
    match sign {
        Sign::NoSign => out.push(INT_ZERO),
        Sign::Plus => {
            if mag.len() <= 8 {
                out.push(INT_ZERO + mag.len() as u8);
                out.extend_from_slice(&mag);
            } else {
                out.push(POS_INT_BIG);
                out.push(mag.len() as u8);
                out.extend_from_slice(&mag);
            }
        }
        Sign::Minus => {
            let n = mag.len();
            let bias = (BigInt::from(1) << (8 * n)) - 1;
            let payload: BigInt = bias - BigInt::from_bytes_be(Sign::Plus, &mag);
            let (_, mut payload_bytes) = payload.to_bytes_be();
            while payload_bytes.len() < n {
                payload_bytes.insert(0, 0);
            }
            if n <= 8 {
                out.push(INT_ZERO - n as u8);
            } else {
                out.push(NEG_INT_BIG);
                out.push(!(n as u8));
            }
            out.extend_from_slice(&payload_bytes);
        }
    }
}

fn minimal_be(v: u128) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(15);
    bytes[start..].to_vec()
}

fn decode(bytes: &[u8], i: usize) -> Result<(Element, usize)> {
    let code = bytes[i];
    match code {
        NIL => Ok((Element::Nil, i + 1)),
        BYTES => {
            let (data, next) = take_escaped(bytes, i + 1)?;
            Ok((Element::Bytes(data), next))
        }
        STRING => {
            let (data, next) = take_escaped(bytes, i + 1)?;
            let s = String::from_utf8(data)
                .map_err(|e| KvqError::Codec(format!("invalid UTF-8 in tuple string: {e}")))?;
            Ok((Element::String(s), next))
        }
        NESTED => {
            let mut elements = Vec::new();
            let mut j = i + 1;
            loop {
                match bytes.get(j) {
                    None => return Err(truncated()),
                    Some(0x00) => {
                        if bytes.get(j + 1) == Some(&0xff) {
                            elements.push(Element::Nil);
                            j += 2;
                        } else {
                            return Ok((Element::Tuple(elements), j + 1));
                        }
                    }
                    Some(_) => {
                        let (element, next) = decode(bytes, j)?;
                        elements.push(element);
                        j = next;
                    }
                }
            }
        }
        NEG_INT_BIG => {
            let n = !*bytes.get(i + 1).ok_or_else(truncated)? as usize;
            let payload = slice(bytes, i + 2, n)?;
            let bias = (BigInt::from(1) << (8 * n)) - 1;
            let v = BigInt::from_bytes_be(Sign::Plus, payload) - bias;
            Ok((Element::BigInt(v), i + 2 + n))
        }
        POS_INT_BIG => {
            let n = *bytes.get(i + 1).ok_or_else(truncated)? as usize;
            let payload = slice(bytes, i + 2, n)?;
            Ok((
                Element::BigInt(BigInt::from_bytes_be(Sign::Plus, payload)),
                i + 2 + n,
            ))
        }
        c if (0x0c..=0x1c).contains(&c) => {
            let n = i32::from(c) - i32::from(INT_ZERO);
            if n == 0 {
                return Ok((Element::Int(0), i + 1));
            }
            let len = n.unsigned_abs() as usize;
            let payload = slice(bytes, i + 1, len)?;
            let mut mag = 0u128;
            for &b in payload {
                mag = (mag << 8) | u128::from(b);
            }
            let element = if n > 0 {
                if mag <= i64::MAX as u128 {
                    Element::Int(mag as i64)
                } else {
                    Element::Uint(mag as u64)
                }
            } else {
                let bias = (1u128 << (8 * len)) - 1;
                let m = bias - mag;
                if m <= i64::MAX as u128 + 1 {
                    Element::Int((m as i128).wrapping_neg() as i64)
                } else {
                    Element::BigInt(-BigInt::from(m))
                }
            };
            Ok((element, i + 1 + len))
        }
        DOUBLE => {
            let payload = slice(bytes, i + 1, 8)?;
            let mut bits: [u8; 8] = payload.try_into().unwrap();
            if bits[0] & 0x80 != 0 {
                bits[0] ^= 0x80;
            } else {
                for b in bits.iter_mut() {
                    *b = !*b;
                }
            }
            Ok((Element::Double(f64::from_bits(u64::from_be_bytes(bits))), i + 9))
        }
        FALSE => Ok((Element::Bool(false), i + 1)),
        TRUE => Ok((Element::Bool(true), i + 1)),
        UUID_CODE => {
            let payload = slice(bytes, i + 1, 16)?;
            let id: [u8; 16] = payload.try_into().unwrap();
            Ok((Element::Uuid(Uuid::from_bytes(id)), i + 17))
        }
        c => Err(KvqError::Codec(format!("unknown tuple type code 0x{c:02x}"))),
    }
}

fn take_escaped(bytes: &[u8], start: usize) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut i = start;
    loop {
        match bytes.get(i) {
            None => return Err(truncated()),
            Some(0x00) => {
                if bytes.get(i + 1) == Some(&0xff) {
                    out.push(0x00);
                    i += 2;
                } else {
                    return Ok((out, i + 1));
                }
            }
            Some(&b) => {
                out.push(b);
                i += 1;
            }
        }
    }
}

fn slice(bytes: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    bytes.get(start..start + len).ok_or_else(truncated)
}

fn truncated() -> KvqError {
    KvqError::Codec("truncated tuple encoding".into())
}
