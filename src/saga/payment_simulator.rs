//! Deterministic stand-in for a real payment gateway. No
//! network call, no gateway SDK — the saga's interesting behavior lives
//! in how a success or failure propagates, not in the charge itself.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// An order succeeds iff `total_cents % success_denominator < success_numerator`,
/// so `success_numerator >= success_denominator` always succeeds and
/// `success_numerator <= 0` always declines. `success_denominator <= 0` is
/// treated as "no ratio configured" and always succeeds. The outcome is a
/// pure function of the order's (immutable, post-creation) total, so
/// redelivering the same `inventory.reserved` event always re-derives the
/// same verdict — there's no hidden RNG state for a duplicate delivery to
/// disagree with.
pub fn decide(total: Decimal, success_numerator: i64, success_denominator: i64) -> bool {
    if success_denominator <= 0 {
        return true;
    }
    let cents = (total * Decimal::from(100)).round().to_i64().unwrap_or(0);
    cents.rem_euclid(success_denominator) < success_numerator
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn declines_totals_whose_remainder_falls_outside_the_success_band() {
        // 0.12 -> 12 cents; 12 % 13 == 12, which is not < 12.
        assert!(!decide(dec!(0.12), 12, 13));
    }

    #[test]
    fn accepts_totals_whose_remainder_falls_inside_the_success_band() {
        // 19.99 -> 1999 cents; 1999 % 13 == 10, which is < 12.
        assert!(decide(dec!(19.99), 12, 13));
    }

    #[test]
    fn zero_or_negative_denominator_always_succeeds() {
        assert!(decide(dec!(130.00), 0, 0));
        assert!(decide(dec!(130.00), 0, -5));
    }

    #[test]
    fn zero_numerator_always_declines() {
        assert!(!decide(dec!(130.00), 0, 13));
    }

    #[test]
    fn numerator_at_or_above_denominator_always_succeeds() {
        assert!(decide(dec!(130.00), 13, 13));
        assert!(decide(dec!(130.00), 20, 13));
    }

    #[test]
    fn outcome_is_stable_across_repeated_calls() {
        let total = dec!(257.43);
        let first = decide(total, 12, 13);
        for _ in 0..10 {
            assert_eq!(decide(total, 12, 13), first);
        }
    }
}
