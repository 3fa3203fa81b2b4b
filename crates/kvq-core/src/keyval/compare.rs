//! Schema matching of decoded key tuples against a query tuple.

use num_bigint::BigInt;

use crate::keyval::{TupElement, Tuple, ValueType, Variable};

/// Compares a decoded tuple against the query tuple, returning the index
/// of the first mismatching element, or `None` when the candidate fits
/// the schema.
///
/// A trailing `MaybeMore` in the query truncates the comparison: any
/// additional tail elements of the candidate are accepted.
pub fn compare_tuples(query: &Tuple, candidate: &Tuple) -> Option<usize> {
    let (pattern, open_tail) = match query.0.last() {
        Some(TupElement::MaybeMore) => (&query.0[..query.0.len() - 1], true),
        _ => (&query.0[..], false),
    };

    if open_tail {
        if candidate.0.len() < pattern.len() {
            return Some(candidate.0.len());
        }
    } else if candidate.0.len() != pattern.len() {
        return Some(pattern.len().min(candidate.0.len()));
    }

    for (i, q) in pattern.iter().enumerate() {
        if !element_matches(q, &candidate.0[i]) {
            return Some(i);
        }
    }
    None
}

fn element_matches(query: &TupElement, candidate: &TupElement) -> bool {
    match query {
        TupElement::Variable(v) => variable_matches(v, candidate),
        TupElement::Tuple(q) => match candidate {
            TupElement::Tuple(c) => compare_tuples(q, c).is_none(),
            _ => false,
        },
        _ => concrete_eq(query, candidate),
    }
}

fn variable_matches(var: &Variable, candidate: &TupElement) -> bool {
    if var.0.is_empty() {
        return true;
    }
    var.0.iter().any(|t| {
        *t == ValueType::Any || candidate.value_type() == Some(*t)
    })
}

/// Equality between concrete elements. The integer variants compare by
/// numeric value across Int/Uint/BigInt, matching the widening the tuple
/// iterator performs; everything else is structural.
fn concrete_eq(a: &TupElement, b: &TupElement) -> bool {
    if let (Some(x), Some(y)) = (as_bigint(a), as_bigint(b)) {
        return x == y;
    }
    a == b
}

fn as_bigint(e: &TupElement) -> Option<BigInt> {
    match e {
        TupElement::Int(i) => Some(BigInt::from(*i)),
        TupElement::Uint(u) => Some(BigInt::from(*u)),
        TupElement::BigInt(b) => Some(b.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tup(elements: Vec<TupElement>) -> Tuple {
        Tuple(elements)
    }

    #[test]
    fn exact_match() {
        let q = tup(vec![
            TupElement::Int(123),
            TupElement::String("hello".into()),
            TupElement::Float(-50.6),
        ]);
        assert_eq!(compare_tuples(&q, &q.clone()), None);
    }

    #[test]
    fn mismatch_reports_first_bad_index() {
        let q = tup(vec![TupElement::Int(123), TupElement::String("hello".into())]);
        let c = tup(vec![TupElement::Int(123), TupElement::String("goodbye".into())]);
        assert_eq!(compare_tuples(&q, &c), Some(1));
    }

    #[test]
    fn length_mismatch() {
        let q = tup(vec![TupElement::Int(1)]);
        let c = tup(vec![TupElement::Int(1), TupElement::Int(2)]);
        assert_eq!(compare_tuples(&q, &c), Some(1));
        assert_eq!(compare_tuples(&c, &q), Some(1));
    }

    #[test]
    fn empty_variable_matches_anything() {
        let q = tup(vec![
            TupElement::Int(123),
            TupElement::Variable(Variable::default()),
            TupElement::String("sing".into()),
        ]);
        let c = tup(vec![
            TupElement::Int(123),
            TupElement::Float(13.45),
            TupElement::String("sing".into()),
        ]);
        assert_eq!(compare_tuples(&q, &c), None);
    }

    #[test]
    fn typed_variable_constrains() {
        let q = tup(vec![TupElement::Variable(Variable(vec![ValueType::Int]))]);
        assert_eq!(compare_tuples(&q, &tup(vec![TupElement::Int(9)])), None);
        assert_eq!(
            compare_tuples(&q, &tup(vec![TupElement::String("x".into())])),
            Some(0)
        );

        let any = tup(vec![TupElement::Variable(Variable(vec![ValueType::Any]))]);
        assert_eq!(compare_tuples(&any, &tup(vec![TupElement::Nil])), None);
    }

    #[test]
    fn maybe_more_truncates() {
        let q = tup(vec![TupElement::Int(1), TupElement::MaybeMore]);
        assert_eq!(compare_tuples(&q, &tup(vec![TupElement::Int(1)])), None);
        assert_eq!(
            compare_tuples(
                &q,
                &tup(vec![TupElement::Int(1), TupElement::Int(2), TupElement::Int(3)])
            ),
            None
        );
        assert_eq!(compare_tuples(&q, &tup(vec![])), Some(0));
    }

    #[test]
    fn nested_tuples_recurse() {
        let q = tup(vec![TupElement::Tuple(tup(vec![TupElement::Variable(
            Variable::default(),
        )]))]);
        let c = tup(vec![TupElement::Tuple(tup(vec![TupElement::Int(4)]))]);
        assert_eq!(compare_tuples(&q, &c), None);

        let c = tup(vec![TupElement::Int(4)]);
        assert_eq!(compare_tuples(&q, &c), Some(0));
    }

    #[test]
    fn integers_compare_across_widths() {
        let q = tup(vec![TupElement::Uint(5)]);
        let c = tup(vec![TupElement::Int(5)]);
        assert_eq!(compare_tuples(&q, &c), None);

        let q = tup(vec![TupElement::BigInt(BigInt::from(-55))]);
        let c = tup(vec![TupElement::Int(-55)]);
        assert_eq!(compare_tuples(&q, &c), None);
    }
}
