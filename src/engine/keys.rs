//! Fractional key computation.

use thiserror::Error;

use crate::domain::key::{digit_char, digit_value, BASE};
use crate::domain::OrderKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Neighbors are so close that a new key would exceed the length cap
    #[error("rebalance needed: next key would be {len} digits (max {max})")]
    RebalanceNeeded { len: usize, max: usize },

    #[error("neighbor keys out of order: {prev} >= {next}")]
    Misordered { prev: String, next: String },
}

/// Key strictly between `prev` and `next`.
///
/// `None` on either side means the open end of the cell. Deterministic for a
/// given pair of neighbors.
pub fn compute_key(
    prev: Option<&OrderKey>,
    next: Option<&OrderKey>,
    max_len: usize,
) -> Result<OrderKey, KeyError> {
    if let (Some(p), Some(n)) = (prev, next) {
        if p >= n {
            return Err(KeyError::Misordered {
                prev: p.to_string(),
                next: n.to_string(),
            });
        }
    }

    let lower = prev.map(values).unwrap_or_default();
    let upper = next.map(values);
    let digits = midpoint(&lower, upper.as_deref());

    if digits.len() > max_len {
        return Err(KeyError::RebalanceNeeded {
            len: digits.len(),
            max: max_len,
        });
    }

    Ok(OrderKey::from_digits(
        digits.into_iter().map(digit_char).collect(),
    ))
}

fn values(key: &OrderKey) -> Vec<u8> {
    // OrderKey only ever holds alphabet bytes.
    key.as_bytes()
        .iter()
        .filter_map(|b| digit_value(*b))
        .collect()
}

/// Digit values of a fraction strictly between `lower` and `upper`.
///
/// `lower` may be empty (zero); `upper` of `None` stands for one. Neither
/// input ends in a zero digit and `lower < upper`.
fn midpoint(lower: &[u8], upper: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(lower.len().max(1) + 1);
    let mut lower = lower;
    let mut upper = upper;

    loop {
        if let Some(hi) = upper {
            let shared = hi
                .iter()
                .enumerate()
                .take_while(|(i, d)| lower.get(*i).copied().unwrap_or(0) == **d)
                .count();
            if shared > 0 {
                out.extend_from_slice(&hi[..shared]);
                lower = lower.get(shared..).unwrap_or(&[]);
                upper = Some(&hi[shared..]);
                continue;
            }
        }

        let lo_digit = lower.first().copied().unwrap_or(0);
        let hi_digit = upper.and_then(|hi| hi.first().copied()).unwrap_or(BASE);

        if hi_digit - lo_digit > 1 {
            out.push((lo_digit + hi_digit) / 2);
            return out;
        }

        match upper {
            // The upper key's first digit alone already sits between the two.
            Some(hi) if hi.len() > 1 => {
                out.push(hi[0]);
                return out;
            }
            _ => {
                out.push(lo_digit);
                lower = lower.get(1..).unwrap_or(&[]);
                upper = None;
            }
        }
    }
}
