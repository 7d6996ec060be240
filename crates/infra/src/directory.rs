//! Collaborator lookups the coordinator consumes but does not own.
//!
//! Product, bank account and signature CRUD live outside the posting engine;
//! only the snapshot posting needs is read here.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use tradebook_documents::{BankAccountId, SignatureId};
use tradebook_products::{Product, ProductId};

use crate::store::StoreError;

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;
}

/// A bank account or signature printed on invoices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub label: String,
    pub active: bool,
}

#[async_trait]
pub trait ReferenceDirectory: Send + Sync {
    async fn bank_account(&self, id: BankAccountId) -> Result<Option<Reference>, StoreError>;

    async fn signature(&self, id: SignatureId) -> Result<Option<Reference>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product: Product) -> Result<(), StoreError> {
        let mut products = self
            .products
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        products.insert(product.id, product);
        Ok(())
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let products = self
            .products
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(products.get(&id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryReferenceDirectory {
    bank_accounts: RwLock<HashMap<BankAccountId, Reference>>,
    signatures: RwLock<HashMap<SignatureId, Reference>>,
}

impl InMemoryReferenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_bank_account(&self, id: BankAccountId, reference: Reference) -> Result<(), StoreError> {
        self.bank_accounts
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?
            .insert(id, reference);
        Ok(())
    }

    pub fn insert_signature(&self, id: SignatureId, reference: Reference) -> Result<(), StoreError> {
        self.signatures
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?
            .insert(id, reference);
        Ok(())
    }
}

#[async_trait]
impl ReferenceDirectory for InMemoryReferenceDirectory {
    async fn bank_account(&self, id: BankAccountId) -> Result<Option<Reference>, StoreError> {
        let accounts = self
            .bank_accounts
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(accounts.get(&id).cloned())
    }

    async fn signature(&self, id: SignatureId) -> Result<Option<Reference>, StoreError> {
        let signatures = self
            .signatures
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(signatures.get(&id).cloned())
    }
}

#[async_trait]
impl<T> ProductCatalog for std::sync::Arc<T>
where
    T: ProductCatalog + ?Sized,
{
    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).product(id).await
    }
}

#[async_trait]
impl<T> ReferenceDirectory for std::sync::Arc<T>
where
    T: ReferenceDirectory + ?Sized,
{
    async fn bank_account(&self, id: BankAccountId) -> Result<Option<Reference>, StoreError> {
        (**self).bank_account(id).await
    }

    async fn signature(&self, id: SignatureId) -> Result<Option<Reference>, StoreError> {
        (**self).signature(id).await
    }
}
