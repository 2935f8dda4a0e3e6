//! Pattern matching and decimal-string ordering.

use std::cmp::Ordering;

use super::ast::{CompareOp, Pattern, Wildcard};

/// Sign, integer digits without leading zeros, fraction digits without
/// trailing zeros. Parsing stops at the first character that does not fit.
fn split_decimal(text: &str) -> (bool, &[u8], &[u8]) {
    let bytes = text.as_bytes();
    let (negative, rest) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };
    let int_len = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    let int_part = &rest[..int_len];
    let int_start = int_part.iter().take_while(|b| **b == b'0').count();
    let int_part = &int_part[int_start..];

    let frac = match rest.get(int_len) {
        Some(b'.') => {
            let after = &rest[int_len + 1..];
            let len = after.iter().take_while(|b| b.is_ascii_digit()).count();
            let digits = &after[..len];
            let trimmed = digits.iter().rposition(|b| *b != b'0').map_or(0, |p| p + 1);
            &digits[..trimmed]
        }
        _ => &rest[..0],
    };
    let zero = int_part.is_empty() && frac.is_empty();
    (negative && !zero, int_part, frac)
}

fn compare_magnitude(a: (&[u8], &[u8]), b: (&[u8], &[u8])) -> Ordering {
    a.0.len()
        .cmp(&b.0.len())
        .then_with(|| a.0.cmp(b.0))
        .then_with(|| a.1.cmp(b.1))
}

/// Orders two decimal strings by value without converting to floats.
pub fn compare_numeric(a: &str, b: &str) -> Ordering {
    let (a_neg, a_int, a_frac) = split_decimal(a);
    let (b_neg, b_int, b_frac) = split_decimal(b);
    match (a_neg, b_neg) {
        (false, false) => compare_magnitude((a_int, a_frac), (b_int, b_frac)),
        (true, true) => compare_magnitude((b_int, b_frac), (a_int, a_frac)),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
    }
}

impl Pattern {
    /// Does `actual` satisfy this pattern?
    pub fn matches(&self, actual: &str) -> bool {
        let hit = match self.wildcard {
            Wildcard::None => return self.compare(actual),
            Wildcard::Any => true,
            Wildcard::Prefix => actual.starts_with(self.text.as_str()),
            Wildcard::Suffix => actual.ends_with(self.text.as_str()),
            Wildcard::Contains => actual.contains(self.text.as_str()),
        };
        if self.op == CompareOp::Ne { !hit } else { hit }
    }

    fn compare(&self, actual: &str) -> bool {
        let ord = if self.numeric {
            compare_numeric(actual, &self.text)
        } else {
            actual.as_bytes().cmp(self.text.as_bytes())
        };
        match self.op {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }
}
