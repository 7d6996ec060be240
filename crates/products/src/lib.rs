//! Product catalog view consumed by the posting engine.
//!
//! Product CRUD lives elsewhere; this crate only models what posting needs to
//! know about a product: whether it may transact and how it is discounted.

pub mod product;

pub use product::{DiscountPolicy, Product, ProductId, ProductStatus};
