//! Posting store boundary.
//!
//! A posting unit runs inside one [`PostingTx`]: every read it locks or
//! version-stamps, every write it stages, and nothing becomes visible until
//! `commit` succeeds. Dropping a transaction without committing discards it.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use tradebook_core::ExpectedVersion;
use tradebook_documents::{Document, DocumentId, DocumentKind, SequenceCounter};
use tradebook_inventory::InventoryRecord;
use tradebook_parties::{LedgerEntry, PartyAccount, PartyId};
use tradebook_products::ProductId;

pub use in_memory::InMemoryPostingStore;
pub use postgres::PostgresPostingStore;

/// Storage error.
///
/// Infrastructure failures only; business rule failures are `DomainError`s.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A concurrent unit changed a resource this unit read (stale version,
    /// serialization failure, deadlock).
    #[error("write conflict: {0}")]
    Conflict(String),

    /// The `(kind, year, number)` uniqueness index rejected a document.
    #[error("duplicate document number: {0}")]
    DuplicateNumber(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("serialization failure: {0}")]
    Serialization(String),
}

/// One atomic unit of work.
///
/// `load_*` calls lock (or version-stamp) what they return for the rest of the
/// unit. `save_*` / `append_*` calls carry the version the caller loaded, which
/// the store checks before anything is made visible.
#[async_trait]
pub trait PostingTx: Send {
    /// Lock and load a party account.
    async fn load_party(&mut self, id: PartyId) -> Result<Option<PartyAccount>, StoreError>;

    /// Lock and load a product's inventory (an empty record if never received).
    async fn load_inventory(&mut self, product_id: ProductId) -> Result<InventoryRecord, StoreError>;

    /// Increment the `(year, kind)` counter and return the new value.
    ///
    /// The increment belongs to this unit: it is discarded if the unit aborts.
    async fn next_number(&mut self, kind: DocumentKind, year: i32) -> Result<u64, StoreError>;

    async fn insert_document(&mut self, document: &Document) -> Result<(), StoreError>;

    async fn save_inventory(
        &mut self,
        record: &InventoryRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    /// Append ledger entries and store the party's new balance.
    async fn append_ledger(
        &mut self,
        party: &PartyAccount,
        entries: &[LedgerEntry],
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Store for posting units plus a non-locking read side.
#[async_trait]
pub trait PostingStore: Send + Sync {
    type Tx: PostingTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Register a counterparty account (party CRUD lives outside the engine).
    async fn register_party(&self, party: &PartyAccount) -> Result<(), StoreError>;

    async fn document(&self, id: DocumentId) -> Result<Option<Document>, StoreError>;

    /// Ledger entries of a party, oldest first.
    async fn ledger(&self, party_id: PartyId) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn party(&self, id: PartyId) -> Result<Option<PartyAccount>, StoreError>;

    async fn inventory(&self, product_id: ProductId) -> Result<InventoryRecord, StoreError>;

    async fn counter(&self, year: i32) -> Result<SequenceCounter, StoreError>;
}
