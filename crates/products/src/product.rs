use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tradebook_core::money::{self, round2};
use tradebook_core::{DomainError, DomainResult, typed_id};

typed_id!(
    /// Product identifier.
    ProductId
);

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
}

/// Per-product discount policy resolved by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum DiscountPolicy {
    /// A flat amount taken off the line base price.
    Fixed(Decimal),
    /// A percentage of the line base price, in `[0, 100]`.
    Rate(Decimal),
}

impl Default for DiscountPolicy {
    fn default() -> Self {
        DiscountPolicy::Fixed(Decimal::ZERO)
    }
}

impl DiscountPolicy {
    /// Discount amount for a line whose base price is `base_price`.
    ///
    /// Fixed discounts may not exceed the base price; rates must be percentages.
    pub fn discount_for(&self, base_price: Decimal) -> DomainResult<Decimal> {
        match *self {
            DiscountPolicy::Fixed(value) => {
                if value < Decimal::ZERO {
                    return Err(DomainError::validation("fixed discount cannot be negative"));
                }
                if value > base_price {
                    return Err(DomainError::validation(format!(
                        "fixed discount {value} exceeds line base price {base_price}"
                    )));
                }
                Ok(value)
            }
            DiscountPolicy::Rate(rate) => {
                if !money::is_percentage(rate) {
                    return Err(DomainError::validation(format!(
                        "discount rate {rate} must be within [0, 100]"
                    )));
                }
                money::percent_of(base_price, rate)
                    .map(round2)
                    .ok_or_else(|| DomainError::validation("discount out of range"))
            }
        }
    }
}

/// Catalog snapshot of a product, as seen at posting time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub status: ProductStatus,
    pub discount: DiscountPolicy,
}

impl Product {
    pub fn new(id: ProductId, sku: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            sku: sku.into(),
            name: name.into(),
            status: ProductStatus::Active,
            discount: DiscountPolicy::default(),
        }
    }

    pub fn with_discount(mut self, discount: DiscountPolicy) -> Self {
        self.discount = discount;
        self
    }

    pub fn with_status(mut self, status: ProductStatus) -> Self {
        self.status = status;
        self
    }

    /// Invariant helper: only active products can appear on invoices or purchases.
    pub fn can_transact(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rate_discount_is_rounded_to_cents() {
        let policy = DiscountPolicy::Rate(dec!(12.5));
        assert_eq!(policy.discount_for(dec!(99.99)).unwrap(), dec!(12.50));
        assert_eq!(policy.discount_for(dec!(300)).unwrap(), dec!(37.50));
    }

    #[test]
    fn fixed_discount_is_taken_as_is() {
        let policy = DiscountPolicy::Fixed(dec!(15));
        assert_eq!(policy.discount_for(dec!(300)).unwrap(), dec!(15));
    }

    #[test]
    fn fixed_discount_larger_than_base_is_rejected() {
        let policy = DiscountPolicy::Fixed(dec!(301));
        assert!(matches!(
            policy.discount_for(dec!(300)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn out_of_range_rate_is_rejected() {
        assert!(DiscountPolicy::Rate(dec!(101)).discount_for(dec!(10)).is_err());
        assert!(DiscountPolicy::Rate(dec!(-1)).discount_for(dec!(10)).is_err());
    }

    #[test]
    fn only_active_products_transact() {
        let p = Product::new(ProductId::generate(), "SKU-1", "Widget");
        assert!(p.can_transact());
        assert!(!p.clone().with_status(ProductStatus::Archived).can_transact());
        assert!(!p.with_status(ProductStatus::Draft).can_transact());
    }
}
