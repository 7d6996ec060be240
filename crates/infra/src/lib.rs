//! Infrastructure layer: posting stores, collaborator lookups, config, and the
//! transaction coordinator that ties the domain crates into atomic units.

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod store;


pub use config::{ConfigError, Persistence, PostingConfig};
pub use coordinator::{
    LineInput, PaymentOutcome, PostDocumentRequest, PostPaymentRequest, PostingOutcome,
    TransactionCoordinator,
};
pub use directory::{
    InMemoryProductCatalog, InMemoryReferenceDirectory, ProductCatalog, Reference,
    ReferenceDirectory,
};
pub use error::PostingError;
pub use store::{InMemoryPostingStore, PostgresPostingStore, PostingStore, PostingTx, StoreError};
