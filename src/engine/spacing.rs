//! Evenly spaced keys for rebalancing a cell.

use crate::domain::key::{digit_char, BASE};
use crate::domain::OrderKey;

/// `count` ascending keys spread evenly over `(0, 1)`.
///
/// The digit width is chosen so every gap can take at least one more
/// single-digit subdivision before keys grow.
pub fn spaced_keys(count: usize) -> Vec<OrderKey> {
    if count == 0 {
        return Vec::new();
    }

    let slots = count as u128 + 1;
    let mut width = 1u32;
    let mut span = BASE as u128;
    while span < slots * BASE as u128 {
        width += 1;
        span *= BASE as u128;
    }

    let step = span / slots;
    (1..=count as u128)
        .map(|i| encode(i * step, width))
        .collect()
}

fn encode(mut value: u128, width: u32) -> OrderKey {
    let mut digits = vec![b'0'; width as usize];
    for slot in digits.iter_mut().rev() {
        *slot = digit_char((value % BASE as u128) as u8);
        value /= BASE as u128;
    }
    while digits.last() == Some(&b'0') {
        digits.pop();
    }
    OrderKey::from_digits(digits)
}
