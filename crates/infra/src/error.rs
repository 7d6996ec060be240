//! The one typed error a posting unit surfaces.

use rust_decimal::Decimal;
use thiserror::Error;

use tradebook_core::DomainError;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostingError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient stock for product {product}: requested {requested}, available {available}")]
    InsufficientStock {
        product: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("over-payment for party {party}: balance {balance}, attempted {amount}")]
    OverPayment {
        party: String,
        balance: Decimal,
        amount: Decimal,
    },

    #[error("duplicate document number: {0}")]
    DuplicateNumber(String),

    /// A concurrent unit touched the same counter, balance or batch set.
    /// The unit was aborted; the caller may retry the whole operation.
    #[error("write conflict: {0}")]
    WriteConflict(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl PostingError {
    /// Stable kebab-case error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PostingError::Validation(_) => "validation-failed",
            PostingError::NotFound(_) => "not-found",
            PostingError::InsufficientStock { .. } => "insufficient-stock",
            PostingError::OverPayment { .. } => "over-payment",
            PostingError::DuplicateNumber(_) => "duplicate-number",
            PostingError::WriteConflict(_) => "write-conflict",
            PostingError::PersistenceFailure(_) => "persistence-failure",
        }
    }

    /// Only write conflicts are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PostingError::WriteConflict(_))
    }
}

impl From<DomainError> for PostingError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => PostingError::Validation(msg),
            DomainError::InvalidId(msg) => PostingError::Validation(msg),
            DomainError::InvariantViolation(msg) => PostingError::Validation(msg),
            DomainError::NotFound(what) => PostingError::NotFound(what),
            DomainError::InsufficientStock {
                product,
                requested,
                available,
            } => PostingError::InsufficientStock {
                product,
                requested,
                available,
            },
            DomainError::OverPayment {
                party,
                balance,
                amount,
            } => PostingError::OverPayment {
                party,
                balance,
                amount,
            },
            DomainError::Conflict(msg) => PostingError::WriteConflict(msg),
        }
    }
}

impl From<StoreError> for PostingError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => PostingError::WriteConflict(msg),
            StoreError::DuplicateNumber(number) => PostingError::DuplicateNumber(number),
            StoreError::NotFound(what) => PostingError::NotFound(what),
            StoreError::Backend(msg) => PostingError::PersistenceFailure(msg),
            StoreError::Serialization(msg) => PostingError::PersistenceFailure(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn kinds_are_kebab_case() {
        let cases = [
            (PostingError::Validation("x".into()), "validation-failed"),
            (PostingError::NotFound("x".into()), "not-found"),
            (
                PostingError::InsufficientStock {
                    product: "p".into(),
                    requested: dec!(2),
                    available: dec!(1),
                },
                "insufficient-stock",
            ),
            (
                PostingError::OverPayment {
                    party: "v".into(),
                    balance: dec!(100),
                    amount: dec!(150),
                },
                "over-payment",
            ),
            (PostingError::DuplicateNumber("INV-2025/1".into()), "duplicate-number"),
            (PostingError::WriteConflict("x".into()), "write-conflict"),
            (PostingError::PersistenceFailure("x".into()), "persistence-failure"),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
            assert_eq!(err.is_retryable(), kind == "write-conflict");
        }
    }

    #[test]
    fn store_failures_map_to_posting_kinds() {
        assert_eq!(
            PostingError::from(StoreError::Conflict("stale".into())).kind(),
            "write-conflict"
        );
        assert_eq!(
            PostingError::from(StoreError::Backend("timeout".into())).kind(),
            "persistence-failure"
        );
        assert_eq!(
            PostingError::from(DomainError::conflict("stale")).kind(),
            "write-conflict"
        );
    }
}
