//! Conversions between the query model and the store's native shapes.

use crate::errors::{KvqError, Result};
use crate::keyval::{DirElement, Directory, TupElement, Tuple, Variable};
use crate::tuple::Element;

/// Converts a directory to a plain path. Fails if the directory still
/// contains variables.
pub fn dir_to_path(dir: &Directory) -> Result<Vec<String>> {
    dir.0
        .iter()
        .enumerate()
        .map(|(i, e)| match e {
            DirElement::String(s) => Ok(s.clone()),
            DirElement::Variable(_) => Err(KvqError::Directory(format!(
                "directory element {i} is an unresolved variable"
            ))),
        })
        .collect()
}

pub fn dir_from_path(path: &[String]) -> Directory {
    Directory(path.iter().cloned().map(DirElement::String).collect())
}

/// Splits a directory at its first variable, returning the elements
/// before it, the variable itself, and the elements after it.
pub fn split_dir_at_first_variable(
    dir: &[DirElement],
) -> (&[DirElement], Option<&Variable>, &[DirElement]) {
    for (i, e) in dir.iter().enumerate() {
        if let DirElement::Variable(v) = e {
            return (&dir[..i], Some(v), &dir[i + 1..]);
        }
    }
    (dir, None, &[])
}

/// The longest concrete prefix of a tuple: the elements before the first
/// variable or `MaybeMore`.
pub fn concrete_prefix(tuple: &Tuple) -> &[TupElement] {
    for (i, e) in tuple.0.iter().enumerate() {
        match e {
            TupElement::Variable(_) | TupElement::MaybeMore => return &tuple.0[..i],
            TupElement::Tuple(t) if t.has_hole() => return &tuple.0[..i],
            _ => {}
        }
    }
    &tuple.0
}

/// Converts tuple elements to the layer encoding. Fails on variables and
/// `MaybeMore`, which have no encoded form.
pub fn to_layer_elements(elements: &[TupElement]) -> Result<Vec<Element>> {
    elements
        .iter()
        .map(|e| {
            Ok(match e {
                TupElement::Tuple(t) => Element::Tuple(to_layer_elements(&t.0)?),
                TupElement::Nil => Element::Nil,
                TupElement::Int(i) => Element::Int(*i),
                TupElement::Uint(u) => Element::Uint(*u),
                TupElement::Bool(b) => Element::Bool(*b),
                TupElement::Float(f) => Element::Double(*f),
                TupElement::BigInt(b) => Element::BigInt(b.clone()),
                TupElement::String(s) => Element::String(s.clone()),
                TupElement::Uuid(u) => Element::Uuid(*u),
                TupElement::Bytes(b) => Element::Bytes(b.clone()),
                TupElement::Variable(_) | TupElement::MaybeMore => {
                    return Err(KvqError::Codec(
                        "tuple contains an unresolved variable".into(),
                    ))
                }
            })
        })
        .collect()
}

pub fn from_layer_elements(elements: Vec<Element>) -> Tuple {
    Tuple(
        elements
            .into_iter()
            .map(|e| match e {
                Element::Tuple(t) => TupElement::Tuple(from_layer_elements(t)),
                Element::Nil => TupElement::Nil,
                Element::Int(i) => TupElement::Int(i),
                Element::Uint(u) => TupElement::Uint(u),
                Element::BigInt(b) => TupElement::BigInt(b),
                Element::Double(f) => TupElement::Float(f),
                Element::Bool(b) => TupElement::Bool(b),
                Element::String(s) => TupElement::String(s),
                Element::Uuid(u) => TupElement::Uuid(u),
                Element::Bytes(b) => TupElement::Bytes(b),
            })
            .collect(),
    )
}
