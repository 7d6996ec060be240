//! Decimal money helpers.
//!
//! Amounts, rates and quantities are `Decimal`; floats never touch money.

use rust_decimal::{Decimal, RoundingStrategy};

/// One hundred, the percentage denominator.
pub const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Round to two decimal places, midpoint away from zero (`round2`).
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Round to the nearest whole unit, midpoint away from zero.
pub fn round_whole(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// `base * rate / 100`, unrounded. `None` when the product leaves the `Decimal` range.
pub fn percent_of(base: Decimal, rate: Decimal) -> Option<Decimal> {
    base.checked_mul(rate)?.checked_div(HUNDRED)
}

/// Sum that stops at the first overflow instead of panicking.
pub fn checked_sum<I>(values: I) -> Option<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, value| acc.checked_add(value))
}

/// Whether `rate` lies in the closed interval `[0, 100]`.
pub fn is_percentage(rate: Decimal) -> bool {
    rate >= Decimal::ZERO && rate <= HUNDRED
}
