use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use tradebook_core::{AggregateRoot, ExpectedVersion};
use tradebook_documents::{Document, DocumentId, DocumentKind, SequenceCounter};
use tradebook_inventory::InventoryRecord;
use tradebook_parties::{LedgerEntry, PartyAccount, PartyId};
use tradebook_products::ProductId;

use super::{PostingStore, PostingTx, StoreError};

#[derive(Debug, Default)]
struct State {
    documents: HashMap<DocumentId, Document>,
    numbers: HashSet<(DocumentKind, i32, u64)>,
    counters: BTreeMap<i32, SequenceCounter>,
    parties: HashMap<PartyId, PartyAccount>,
    ledgers: HashMap<PartyId, Vec<LedgerEntry>>,
    inventory: HashMap<ProductId, InventoryRecord>,
}

impl State {
    fn party_version(&self, id: PartyId) -> Option<u64> {
        self.parties.get(&id).map(AggregateRoot::version)
    }

    fn inventory_version(&self, product_id: ProductId) -> u64 {
        self.inventory
            .get(&product_id)
            .map(AggregateRoot::version)
            .unwrap_or(0)
    }

    fn counter_value(&self, year: i32, kind: DocumentKind) -> u64 {
        self.counters
            .get(&year)
            .map(|row| row.current(kind))
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub fail_commit: std::sync::atomic::AtomicBool,
    pub commit_delay_ms: std::sync::atomic::AtomicU64,
    /// Applied to every party load, i.e. while a unit is staging.
    pub load_delay_ms: std::sync::atomic::AtomicU64,
}

/// In-memory posting store with optimistic units.
///
/// Intended for tests/dev. A transaction stages its writes and remembers the
/// version of everything it read; `commit` re-checks those versions under one
/// write lock and applies the whole stage, or nothing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPostingStore {
    state: Arc<RwLock<State>>,
    #[cfg(test)]
    pub(crate) faults: Arc<Faults>,
}

impl InMemoryPostingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

/// Staged unit of work against [`InMemoryPostingStore`].
#[derive(Debug)]
pub struct InMemoryTx {
    state: Arc<RwLock<State>>,
    #[cfg(test)]
    faults: Arc<Faults>,

    party_reads: HashMap<PartyId, u64>,
    inventory_reads: HashMap<ProductId, u64>,
    counter_reads: HashMap<(i32, DocumentKind), u64>,

    parties: HashMap<PartyId, PartyAccount>,
    entries: Vec<LedgerEntry>,
    inventory: HashMap<ProductId, InventoryRecord>,
    counters: BTreeMap<i32, SequenceCounter>,
    documents: Vec<Document>,
}

impl InMemoryTx {
    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    #[cfg(test)]
    async fn inject_faults(&self) -> Result<(), StoreError> {
        use std::sync::atomic::Ordering;

        let delay = self.faults.commit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.faults.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("injected commit failure".to_string()));
        }
        Ok(())
    }

    #[cfg(not(test))]
    async fn inject_faults(&self) -> Result<(), StoreError> {
        Ok(())
    }

    #[cfg(test)]
    async fn slow_load(&self) {
        let delay = self
            .faults
            .load_delay_ms
            .load(std::sync::atomic::Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
    }

    #[cfg(not(test))]
    async fn slow_load(&self) {}

    /// Every version this unit read must still be current.
    fn check_reads(&self, state: &State) -> Result<(), StoreError> {
        for (id, read) in &self.party_reads {
            let current = state
                .party_version(*id)
                .ok_or_else(|| StoreError::NotFound(format!("party {id}")))?;
            if current != *read {
                return Err(StoreError::Conflict(format!(
                    "party {id} changed (read version {read}, now {current})"
                )));
            }
        }
        for (product_id, read) in &self.inventory_reads {
            let current = state.inventory_version(*product_id);
            if current != *read {
                return Err(StoreError::Conflict(format!(
                    "inventory of {product_id} changed (read version {read}, now {current})"
                )));
            }
        }
        for ((year, kind), read) in &self.counter_reads {
            let current = state.counter_value(*year, *kind);
            if current != *read {
                return Err(StoreError::Conflict(format!(
                    "{} counter for {year} changed (read {read}, now {current})",
                    kind.as_str()
                )));
            }
        }
        Ok(())
    }

    fn check_numbers(&self, state: &State) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for doc in &self.documents {
            let n = doc.number();
            let key = (n.kind, n.year, n.sequence);
            if state.numbers.contains(&key) || !seen.insert(key) {
                return Err(StoreError::DuplicateNumber(n.display.clone()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PostingTx for InMemoryTx {
    async fn load_party(&mut self, id: PartyId) -> Result<Option<PartyAccount>, StoreError> {
        self.slow_load().await;
        if let Some(staged) = self.parties.get(&id) {
            return Ok(Some(staged.clone()));
        }
        let party = self.read_state()?.parties.get(&id).cloned();
        if let Some(p) = &party {
            self.party_reads.entry(id).or_insert(p.version());
        }
        Ok(party)
    }

    async fn load_inventory(&mut self, product_id: ProductId) -> Result<InventoryRecord, StoreError> {
        if let Some(staged) = self.inventory.get(&product_id) {
            return Ok(staged.clone());
        }
        let record = self
            .read_state()?
            .inventory
            .get(&product_id)
            .cloned()
            .unwrap_or_else(|| InventoryRecord::empty(product_id));
        self.inventory_reads
            .entry(product_id)
            .or_insert(record.version());
        Ok(record)
    }

    async fn next_number(&mut self, kind: DocumentKind, year: i32) -> Result<u64, StoreError> {
        if !self.counters.contains_key(&year) {
            let row = self
                .read_state()?
                .counters
                .get(&year)
                .cloned()
                .unwrap_or_else(|| SequenceCounter::new(year));
            self.counters.insert(year, row);
        }
        let Some(row) = self.counters.get_mut(&year) else {
            return Err(StoreError::Backend(format!("counter row {year} not staged")));
        };
        self.counter_reads
            .entry((year, kind))
            .or_insert(row.current(kind));
        Ok(row.increment(kind))
    }

    async fn insert_document(&mut self, document: &Document) -> Result<(), StoreError> {
        self.documents.push(document.clone());
        Ok(())
    }

    async fn save_inventory(
        &mut self,
        record: &InventoryRecord,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let product_id = record.product_id();
        let base = match self.inventory.get(&product_id) {
            Some(staged) => staged.version(),
            None => self
                .inventory_reads
                .get(&product_id)
                .copied()
                .ok_or_else(|| {
                    StoreError::Conflict(format!("inventory of {product_id} saved without a load"))
                })?,
        };
        if !expected.matches(base) {
            return Err(StoreError::Conflict(format!(
                "inventory of {product_id}: expected {expected:?}, found {base}"
            )));
        }
        self.inventory.insert(product_id, record.clone());
        Ok(())
    }

    async fn append_ledger(
        &mut self,
        party: &PartyAccount,
        entries: &[LedgerEntry],
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let id = party.id_typed();
        let base = match self.parties.get(&id) {
            Some(staged) => staged.version(),
            None => self.party_reads.get(&id).copied().ok_or_else(|| {
                StoreError::Conflict(format!("party {id} saved without a load"))
            })?,
        };
        if !expected.matches(base) {
            return Err(StoreError::Conflict(format!(
                "party {id}: expected {expected:?}, found {base}"
            )));
        }
        self.parties.insert(id, party.clone());
        self.entries.extend_from_slice(entries);
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.inject_faults().await?;

        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        self.check_reads(&state)?;
        self.check_numbers(&state)?;

        // Only the kinds this unit advanced; the row's other counters stay as committed.
        for (year, kind) in self.counter_reads.keys().copied() {
            let Some(staged) = self.counters.get(&year) else {
                continue;
            };
            let row = state
                .counters
                .remove(&year)
                .unwrap_or_else(|| SequenceCounter::new(year));
            state
                .counters
                .insert(year, row.with_value(kind, staged.current(kind)));
        }
        for doc in self.documents {
            let n = doc.number();
            state.numbers.insert((n.kind, n.year, n.sequence));
            state.documents.insert(doc.id_typed(), doc);
        }
        for (product_id, record) in self.inventory {
            state.inventory.insert(product_id, record);
        }
        for entry in self.entries {
            state.ledgers.entry(entry.party_id).or_default().push(entry);
        }
        for (id, party) in self.parties {
            state.parties.insert(id, party);
        }

        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl PostingStore for InMemoryPostingStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryTx {
            state: Arc::clone(&self.state),
            #[cfg(test)]
            faults: Arc::clone(&self.faults),
            party_reads: HashMap::new(),
            inventory_reads: HashMap::new(),
            counter_reads: HashMap::new(),
            parties: HashMap::new(),
            entries: Vec::new(),
            inventory: HashMap::new(),
            counters: BTreeMap::new(),
            documents: Vec::new(),
        })
    }

    async fn register_party(&self, party: &PartyAccount) -> Result<(), StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        let id = party.id_typed();
        if state.parties.contains_key(&id) {
            return Err(StoreError::Conflict(format!("party {id} already registered")));
        }
        state.parties.insert(id, party.clone());
        Ok(())
    }

    async fn document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        Ok(self.read_state()?.documents.get(&id).cloned())
    }

    async fn ledger(&self, party_id: PartyId) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .read_state()?
            .ledgers
            .get(&party_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn party(&self, id: PartyId) -> Result<Option<PartyAccount>, StoreError> {
        Ok(self.read_state()?.parties.get(&id).cloned())
    }

    async fn inventory(&self, product_id: ProductId) -> Result<InventoryRecord, StoreError> {
        Ok(self
            .read_state()?
            .inventory
            .get(&product_id)
            .cloned()
            .unwrap_or_else(|| InventoryRecord::empty(product_id)))
    }

    async fn counter(&self, year: i32) -> Result<SequenceCounter, StoreError> {
        Ok(self
            .read_state()?
            .counters
            .get(&year)
            .cloned()
            .unwrap_or_else(|| SequenceCounter::new(year)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradebook_parties::PartyKind;

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = InMemoryPostingStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            assert_eq!(tx.next_number(DocumentKind::Invoice, 2025).await.unwrap(), 1);
        }
        assert_eq!(store.counter(2025).await.unwrap().current(DocumentKind::Invoice), 0);
    }

    #[tokio::test]
    async fn stale_counter_read_is_a_conflict() {
        let store = InMemoryPostingStore::new();
        let mut a = store.begin().await.unwrap();
        let mut b = store.begin().await.unwrap();

        assert_eq!(a.next_number(DocumentKind::Invoice, 2025).await.unwrap(), 1);
        assert_eq!(b.next_number(DocumentKind::Invoice, 2025).await.unwrap(), 1);

        a.commit().await.unwrap();
        assert!(matches!(b.commit().await, Err(StoreError::Conflict(_))));
        assert_eq!(store.counter(2025).await.unwrap().current(DocumentKind::Invoice), 1);
    }

    #[tokio::test]
    async fn counters_for_other_kinds_do_not_conflict() {
        let store = InMemoryPostingStore::new();
        let mut a = store.begin().await.unwrap();
        let mut b = store.begin().await.unwrap();

        a.next_number(DocumentKind::Invoice, 2025).await.unwrap();
        b.next_number(DocumentKind::Purchase, 2025).await.unwrap();

        a.commit().await.unwrap();
        b.commit().await.unwrap();
        let row = store.counter(2025).await.unwrap();
        assert_eq!(row.current(DocumentKind::Invoice), 1);
        assert_eq!(row.current(DocumentKind::Purchase), 1);
    }

    #[tokio::test]
    async fn numbers_advance_within_one_unit() {
        let store = InMemoryPostingStore::new();
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_number(DocumentKind::Purchase, 2025).await.unwrap(), 1);
        assert_eq!(tx.next_number(DocumentKind::Purchase, 2025).await.unwrap(), 2);
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_number(DocumentKind::Purchase, 2025).await.unwrap(), 3);
        assert_eq!(tx.next_number(DocumentKind::Invoice, 2025).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn parties_register_once() {
        let store = InMemoryPostingStore::new();
        let party = PartyAccount::open(PartyId::generate(), PartyKind::Customer, "Acme");
        store.register_party(&party).await.unwrap();
        assert!(matches!(
            store.register_party(&party).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.party(party.id_typed()).await.unwrap(), Some(party));
    }
}
