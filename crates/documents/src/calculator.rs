//! Line-item discount, tax and rounding.
//!
//! Per line:
//!
//! ```text
//! base_price     = quantity × unit_price
//! discount       = fixed ? value : round2(base_price × rate / 100)
//! taxable_base   = base_price − discount
//! tax            = round2(taxable_base × tax_rate / 100)
//! amount         = round2(taxable_base + tax)
//! ```
//!
//! Document totals are the sums of the per-line values. When the document is
//! rounded off, `total_amount` is the subtotal rounded to a whole unit and the
//! difference is kept as `rounding_adjustment`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tradebook_core::money::{self, round2, round_whole};
use tradebook_core::{DomainError, DomainResult};
use tradebook_products::{DiscountPolicy, ProductId};

/// Calculator input: a request line with its product's discount policy resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub discount: DiscountPolicy,
}

/// A computed document line. Monetary fields are outputs, never inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// 1-based position on the document.
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub amount: Decimal,
}

impl LineItem {
    pub fn base_price(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub total_discount: Decimal,
    pub total_tax: Decimal,
    /// Σ line amount, before rounding off.
    pub subtotal: Decimal,
    pub total_amount: Decimal,
    /// `total_amount − subtotal`; zero unless rounded off.
    pub rounding_adjustment: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Computation {
    pub lines: Vec<LineItem>,
    pub totals: DocumentTotals,
}

/// Pure line-item computation.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineItemCalculator;

impl LineItemCalculator {
    pub fn compute(&self, lines: &[PricedLine], is_rounded_off: bool) -> DomainResult<Computation> {
        if lines.is_empty() {
            return Err(DomainError::validation("a document needs at least one line"));
        }

        let items = lines
            .iter()
            .enumerate()
            .map(|(i, line)| Self::compute_line(i as u32 + 1, line))
            .collect::<DomainResult<Vec<_>>>()?;

        let total = |field: fn(&LineItem) -> Decimal| {
            money::checked_sum(items.iter().map(field))
                .ok_or_else(|| DomainError::validation("document total out of range"))
        };
        let total_discount = total(|l| l.discount_amount)?;
        let total_tax = total(|l| l.tax_amount)?;
        let subtotal = total(|l| l.amount)?;
        let total_amount = if is_rounded_off {
            round_whole(subtotal)
        } else {
            subtotal
        };

        Ok(Computation {
            lines: items,
            totals: DocumentTotals {
                total_discount,
                total_tax,
                subtotal,
                total_amount,
                rounding_adjustment: total_amount - subtotal,
            },
        })
    }

    fn compute_line(line_no: u32, line: &PricedLine) -> DomainResult<LineItem> {
        if line.quantity <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "line {line_no}: quantity must be positive"
            )));
        }
        if line.unit_price <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "line {line_no}: unit price must be positive"
            )));
        }
        if !money::is_percentage(line.tax_rate) {
            return Err(DomainError::validation(format!(
                "line {line_no}: tax rate {} must be within [0, 100]",
                line.tax_rate
            )));
        }

        let out_of_range = || DomainError::validation(format!("line {line_no}: amount out of range"));

        let base_price = line
            .quantity
            .checked_mul(line.unit_price)
            .ok_or_else(out_of_range)?;
        let discount_amount = line
            .discount
            .discount_for(base_price)
            .map_err(|e| match e {
                DomainError::Validation(msg) => {
                    DomainError::validation(format!("line {line_no}: {msg}"))
                }
                other => other,
            })?;
        let taxable_base = base_price - discount_amount;
        let tax_amount = money::percent_of(taxable_base, line.tax_rate)
            .map(round2)
            .ok_or_else(out_of_range)?;
        let amount = taxable_base
            .checked_add(tax_amount)
            .map(round2)
            .ok_or_else(out_of_range)?;

        Ok(LineItem {
            line_no,
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
            tax_rate: line.tax_rate,
            discount_amount,
            tax_amount,
            amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn line(quantity: Decimal, unit_price: Decimal, tax_rate: Decimal, discount: DiscountPolicy) -> PricedLine {
        PricedLine {
            product_id: ProductId::generate(),
            quantity,
            unit_price,
            tax_rate,
            discount,
        }
    }

    #[test]
    fn rate_discount_then_tax() {
        let calc = LineItemCalculator;
        let c = calc
            .compute(
                &[line(dec!(3), dec!(100), dec!(18), DiscountPolicy::Rate(dec!(10)))],
                false,
            )
            .unwrap();

        let l = &c.lines[0];
        assert_eq!(l.base_price(), dec!(300));
        assert_eq!(l.discount_amount, dec!(30));
        assert_eq!(l.base_price() - l.discount_amount, dec!(270));
        assert_eq!(l.tax_amount, dec!(48.60));
        assert_eq!(l.amount, dec!(318.60));
        assert_eq!(c.totals.total_amount, dec!(318.60));
        assert_eq!(c.totals.rounding_adjustment, dec!(0));
    }

    #[test]
    fn rounding_off_keeps_the_delta() {
        let c = LineItemCalculator
            .compute(
                &[line(dec!(3), dec!(100), dec!(18), DiscountPolicy::Rate(dec!(10)))],
                true,
            )
            .unwrap();
        assert_eq!(c.totals.subtotal, dec!(318.60));
        assert_eq!(c.totals.total_amount, dec!(319));
        assert_eq!(c.totals.rounding_adjustment, dec!(0.40));
    }

    #[test]
    fn totals_sum_lines() {
        let c = LineItemCalculator
            .compute(
                &[
                    line(dec!(2), dec!(50), dec!(5), DiscountPolicy::Fixed(dec!(10))),
                    line(dec!(1), dec!(19.99), dec!(0), DiscountPolicy::default()),
                ],
                false,
            )
            .unwrap();
        // (100 − 10) + 4.50 = 94.50; 19.99
        assert_eq!(c.lines[0].amount, dec!(94.50));
        assert_eq!(c.lines[1].line_no, 2);
        assert_eq!(c.totals.total_discount, dec!(10));
        assert_eq!(c.totals.total_tax, dec!(4.50));
        assert_eq!(c.totals.total_amount, dec!(114.49));
    }

    #[test]
    fn invalid_lines_are_rejected() {
        let calc = LineItemCalculator;
        let bad = [
            line(dec!(0), dec!(1), dec!(5), DiscountPolicy::default()),
            line(dec!(1), dec!(0), dec!(5), DiscountPolicy::default()),
            line(dec!(1), dec!(1), dec!(100.5), DiscountPolicy::default()),
            line(dec!(1), dec!(1), dec!(-1), DiscountPolicy::default()),
            line(dec!(1), dec!(10), dec!(5), DiscountPolicy::Fixed(dec!(11))),
        ];
        for l in bad {
            assert!(matches!(
                calc.compute(&[l], false),
                Err(DomainError::Validation(_))
            ));
        }
        assert!(calc.compute(&[], false).is_err());
    }

    #[test]
    fn error_names_the_offending_line() {
        let err = LineItemCalculator
            .compute(
                &[
                    line(dec!(1), dec!(1), dec!(5), DiscountPolicy::default()),
                    line(dec!(-2), dec!(1), dec!(5), DiscountPolicy::default()),
                ],
                false,
            )
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.starts_with("line 2")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn oversized_lines_fail_validation() {
        let half = Decimal::MAX / dec!(2);
        let err = LineItemCalculator
            .compute(&[line(half, dec!(3), dec!(0), DiscountPolicy::default())], false)
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => assert_eq!(msg, "line 1: amount out of range"),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = LineItemCalculator
            .compute(&[line(half, dec!(1), dec!(100), DiscountPolicy::default())], false)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let each = line(half, dec!(1), dec!(0), DiscountPolicy::default());
        let err = LineItemCalculator
            .compute(&[each.clone(), each.clone(), each], false)
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => assert_eq!(msg, "document total out of range"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    fn priced_line() -> impl Strategy<Value = PricedLine> {
        (1i64..1_000, 1i64..1_000_000, 0u32..=100, any::<bool>(), 0i64..=100)
            .prop_map(|(qty, cents, tax, use_rate, disc)| {
                let discount = if use_rate {
                    DiscountPolicy::Rate(Decimal::from(disc))
                } else {
                    // Never more than the base price: qty ≥ 1 and unit price ≥ 0.01.
                    DiscountPolicy::Fixed(Decimal::new(disc.min(1), 2))
                };
                PricedLine {
                    product_id: ProductId::generate(),
                    quantity: Decimal::from(qty),
                    unit_price: Decimal::new(cents, 2),
                    tax_rate: Decimal::from(tax),
                    discount,
                }
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: Σ line amount equals the pre-rounding total, and rounding
        /// off moves the total to the nearest whole unit.
        #[test]
        fn totals_are_consistent(
            lines in prop::collection::vec(priced_line(), 1..12),
            rounded in any::<bool>(),
        ) {
            let c = LineItemCalculator.compute(&lines, rounded).unwrap();
            let sum: Decimal = c.lines.iter().map(|l| l.amount).sum();

            prop_assert!((sum - c.totals.subtotal).abs() <= dec!(0.01));
            if rounded {
                prop_assert_eq!(c.totals.total_amount, round_whole(c.totals.subtotal));
                prop_assert!(c.totals.rounding_adjustment.abs() <= dec!(0.5));
            } else {
                prop_assert_eq!(c.totals.total_amount, c.totals.subtotal);
            }
            prop_assert_eq!(
                c.totals.total_amount,
                c.totals.subtotal + c.totals.rounding_adjustment
            );
        }
    }
}
