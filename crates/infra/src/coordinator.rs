//! Posting orchestration: one document (or payment) per atomic unit.
//!
//! ```text
//! PostDocumentRequest
//!   ↓
//! 1. Validate shape + collaborators (products, bank account, signature)
//!   ↓
//! 2. Compute lines and totals (pure)
//!   ↓
//! 3. Check the initial payment against the total
//!   ↓  ── begin unit ──
//! 4. Lock the counterparty, allocate the (year, kind) number
//!   ↓
//! 5. Persist the document
//!   ↓
//! 6. Receive (purchase) / deduct (invoice) stock per line
//!   ↓
//! 7. Post the full amount, then the initial payment in the opposite direction
//!   ↓
//! 8. Commit  ── end unit ──
//!   ↓
//! Publish posting events (after commit only)
//! ```
//!
//! The first failing step short-circuits and the unit is rolled back, so a
//! caller sees either every effect or none, plus exactly one [`PostingError`].
//! The coordinator never retries; a `write-conflict` is for the caller to retry.
//!
//! The transaction timeout bounds steps 4 to 7. Commit is not cut short on the
//! client: once COMMIT is sent its outcome is the outcome reported, and the
//! store's own statement timeout bounds it.

use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use tradebook_core::{Aggregate, AggregateRoot, DomainError, ExpectedVersion, UserId};
use tradebook_documents::{
    Computation, Document, DocumentHeader, DocumentId, DocumentKind, DocumentView, LineItemCalculator,
    PostingEvent, PricedLine, StockMovement, validate_initial_payment,
};
use tradebook_events::{Event, EventBus, EventEnvelope, InMemoryEventBus};
use tradebook_inventory::{BatchId, DeductStock, InventoryCommand, ReceiveBatch};
use tradebook_parties::{
    LedgerCommand, LedgerEntry, LedgerEvent, PartyAccount, PartyId, PartyKind, PaymentMode,
    PostLedgerEntry, TransactionType,
};
use tradebook_products::ProductId;

use crate::config::PostingConfig;
use crate::directory::{ProductCatalog, ReferenceDirectory};
use crate::error::PostingError;
use crate::store::{PostingStore, PostingTx};

/// One requested document line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInput {
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    /// Purchases only: the price the received batch should sell at.
    pub sale_unit_price: Option<Decimal>,
}

impl LineInput {
    pub fn new(product_id: ProductId, quantity: Decimal, unit_price: Decimal, tax_rate: Decimal) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
            tax_rate,
            sale_unit_price: None,
        }
    }

    pub fn with_sale_unit_price(mut self, price: Decimal) -> Self {
        self.sale_unit_price = Some(price);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDocumentRequest {
    pub header: DocumentHeader,
    pub lines: Vec<LineInput>,
}

/// What a committed document posting did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingOutcome {
    pub document: DocumentView,
    /// Full-amount entry first, then the initial-payment entry if any.
    pub ledger_entries: Vec<LedgerEntry>,
    /// One movement per line, in line order.
    pub stock_movements: Vec<StockMovement>,
}

/// A standalone cash movement: payment received from a customer or made to a vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostPaymentRequest {
    pub party_id: PartyId,
    pub amount: Decimal,
    pub payment_mode: PaymentMode,
    pub description: Option<String>,
    pub created_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOutcome {
    pub entry: LedgerEntry,
    pub balance: Decimal,
}

/// Everything a unit staged, kept until commit succeeds.
struct Staged<T> {
    outcome: T,
    events: Vec<(u64, PostingEvent)>,
}

/// Runs posting units against a [`PostingStore`].
///
/// The bus is optional: without one, committed units are simply not announced.
#[derive(Debug)]
pub struct TransactionCoordinator<S, C, R, B = InMemoryEventBus> {
    store: S,
    catalog: C,
    references: R,
    config: PostingConfig,
    calculator: LineItemCalculator,
    bus: Option<B>,
}

impl<S, C, R> TransactionCoordinator<S, C, R> {
    pub fn new(store: S, catalog: C, references: R, config: PostingConfig) -> Self {
        Self {
            store,
            catalog,
            references,
            config,
            calculator: LineItemCalculator,
            bus: None,
        }
    }
}

impl<S, C, R, B> TransactionCoordinator<S, C, R, B> {
    pub fn with_bus<B2>(self, bus: B2) -> TransactionCoordinator<S, C, R, B2> {
        TransactionCoordinator {
            store: self.store,
            catalog: self.catalog,
            references: self.references,
            config: self.config,
            calculator: self.calculator,
            bus: Some(bus),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &PostingConfig {
        &self.config
    }
}

impl<S, C, R, B> TransactionCoordinator<S, C, R, B>
where
    S: PostingStore,
    C: ProductCatalog,
    R: ReferenceDirectory,
    B: EventBus,
{
    /// Post an invoice or purchase as one atomic unit.
    pub async fn post_document(
        &self,
        request: PostDocumentRequest,
    ) -> Result<PostingOutcome, PostingError> {
        let span = info_span!(
            "post_document",
            kind = request.header.kind.as_str(),
            counterparty = %request.header.counterparty_id,
            actor = %request.header.created_by,
        );

        async move {
            match self.run_document(request).await {
                Ok(staged) => {
                    let doc = &staged.outcome.document;
                    info!(
                        number = %doc.number,
                        lines = doc.lines.len(),
                        subtotal = %doc.subtotal,
                        total_amount = %doc.total_amount,
                        rounding_adjustment = %doc.rounding_adjustment,
                        "document posted"
                    );
                    self.publish(staged.events);
                    Ok(staged.outcome)
                }
                Err(err) => {
                    warn!(kind = err.kind(), error = %err, "posting aborted");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Post a standalone payment (customer credit / vendor debit) as one unit.
    pub async fn post_payment(
        &self,
        request: PostPaymentRequest,
    ) -> Result<PaymentOutcome, PostingError> {
        let span = info_span!(
            "post_payment",
            party = %request.party_id,
            actor = %request.created_by,
        );

        async move {
            match self.run_payment(request).await {
                Ok(staged) => {
                    info!(
                        amount = %staged.outcome.entry.amount,
                        balance = %staged.outcome.balance,
                        "payment posted"
                    );
                    self.publish(staged.events);
                    Ok(staged.outcome)
                }
                Err(err) => {
                    warn!(kind = err.kind(), error = %err, "payment aborted");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Dropping the staging future on timeout abandons its pending writes; the
    /// caller then rolls the transaction back.
    async fn within_timeout<T>(
        &self,
        unit: impl Future<Output = Result<T, PostingError>>,
    ) -> Result<T, PostingError> {
        let limit = self.config.txn_timeout;
        tokio::time::timeout(limit, unit).await.unwrap_or_else(|_| {
            Err(PostingError::PersistenceFailure(format!(
                "posting unit exceeded the {}ms transaction timeout",
                limit.as_millis()
            )))
        })
    }

    async fn run_document(
        &self,
        request: PostDocumentRequest,
    ) -> Result<Staged<PostingOutcome>, PostingError> {
        let PostDocumentRequest { header, lines } = request;

        // 1.
        header.validate_shape()?;
        if lines.is_empty() {
            return Err(PostingError::Validation(
                "a document needs at least one line".to_string(),
            ));
        }
        self.check_references(&header).await?;
        let priced = self.price_lines(header.kind, &lines).await?;

        // 2. + 3.
        let computation = self.calculator.compute(&priced, header.is_rounded_off)?;
        validate_initial_payment(
            header.transaction_type,
            header.payment_mode,
            header.initial_payment,
            computation.totals.total_amount,
        )?;

        let mut tx = self.store.begin().await?;
        let staged = self
            .within_timeout(self.stage_document(&mut tx, header, &lines, computation))
            .await;
        // 8.
        finish(tx, staged).await
    }

    async fn stage_document(
        &self,
        tx: &mut S::Tx,
        header: DocumentHeader,
        lines: &[LineInput],
        computation: Computation,
    ) -> Result<Staged<PostingOutcome>, PostingError> {
        let now = Utc::now();
        let kind = header.kind;

        // 4.
        let mut party = load_counterparty(tx, header.counterparty_id, kind.party_kind()).await?;
        let year = header.date.year();
        let sequence = tx.next_number(kind, year).await?;
        let number = self.config.numbering.number(kind, year, sequence);

        // 5.
        let created_by = header.created_by;
        let payment_mode = header.payment_mode;
        let document = Document::assemble(DocumentId::generate(), number, header, computation, now)?;
        tx.insert_document(&document).await?;
        let document_id = document.aggregate_id();

        let mut events = vec![(
            document.version(),
            PostingEvent::DocumentPosted {
                document: document.view(),
            },
        )];

        // 6.
        let mut stock_movements = Vec::with_capacity(lines.len());
        for (line, input) in document.lines().iter().zip(lines) {
            let command = match kind {
                DocumentKind::Purchase => InventoryCommand::ReceiveBatch(ReceiveBatch {
                    batch_id: BatchId::generate(),
                    product_id: line.product_id,
                    source_document_id: document_id,
                    quantity: line.quantity,
                    unit_cost: line.unit_price,
                    sale_unit_price: input.sale_unit_price,
                    occurred_at: now,
                }),
                DocumentKind::Invoice => InventoryCommand::DeductStock(DeductStock {
                    product_id: line.product_id,
                    document_id,
                    quantity: line.quantity,
                    occurred_at: now,
                }),
            };

            let mut record = tx.load_inventory(line.product_id).await?;
            let expected = ExpectedVersion::Exact(record.version());
            let applied = record
                .execute(&command)
                .map_err(|e| with_line(line.line_no, e))?;
            tx.save_inventory(&record, expected).await?;

            for event in &applied {
                let movement = StockMovement::from_inventory_event(line.line_no, event);
                debug!(
                    line = line.line_no,
                    product = %line.product_id,
                    delta = %movement.quantity_delta(),
                    on_hand = %record.total_quantity(),
                    "stock moved"
                );
                events.push((
                    record.version(),
                    PostingEvent::InventoryChanged {
                        document_id,
                        movement: movement.clone(),
                        total_quantity: record.total_quantity(),
                        occurred_at: event.occurred_at(),
                    },
                ));
                stock_movements.push(movement);
            }
        }

        // 7.
        let display = document.number().display.clone();
        let full = kind.ledger_transaction();
        let mut postings = vec![PostLedgerEntry {
            entry_id: Uuid::now_v7(),
            party_id: party.id_typed(),
            amount: document.total_amount(),
            transaction_type: full,
            payment_mode: None,
            description: format!("{} {display}", document_label(kind)),
            document_id: Some(document_id),
            created_by,
            occurred_at: now,
        }];
        if !document.initial_payment().is_zero() {
            postings.push(PostLedgerEntry {
                entry_id: Uuid::now_v7(),
                party_id: party.id_typed(),
                amount: document.initial_payment(),
                transaction_type: full.opposite(),
                payment_mode,
                description: format!("Initial payment on {display}"),
                document_id: Some(document_id),
                created_by,
                occurred_at: now,
            });
        }

        let expected = ExpectedVersion::Exact(party.version());
        let ledger_entries = post_entries(&mut party, postings, &mut events)?;
        tx.append_ledger(&party, &ledger_entries, expected).await?;

        Ok(Staged {
            outcome: PostingOutcome {
                document: document.view(),
                ledger_entries,
                stock_movements,
            },
            events,
        })
    }

    async fn run_payment(
        &self,
        request: PostPaymentRequest,
    ) -> Result<Staged<PaymentOutcome>, PostingError> {
        if !request.payment_mode.is_real() {
            return Err(PostingError::Validation(
                "a payment requires a payment mode".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        let staged = self.within_timeout(stage_payment(&mut tx, request)).await;
        finish(tx, staged).await
    }

    /// Invoices may print a bank account and a signature; both must exist and be active.
    async fn check_references(&self, header: &DocumentHeader) -> Result<(), PostingError> {
        if let Some(id) = header.bank_account_id {
            let account = self
                .references
                .bank_account(id)
                .await?
                .ok_or_else(|| PostingError::NotFound(format!("bank account {id}")))?;
            if !account.active {
                return Err(PostingError::Validation(format!("bank account {id} is inactive")));
            }
        }
        if let Some(id) = header.signature_id {
            let signature = self
                .references
                .signature(id)
                .await?
                .ok_or_else(|| PostingError::NotFound(format!("signature {id}")))?;
            if !signature.active {
                return Err(PostingError::Validation(format!("signature {id} is inactive")));
            }
        }
        Ok(())
    }

    /// Resolve each line's product and discount policy from the catalog.
    async fn price_lines(
        &self,
        kind: DocumentKind,
        lines: &[LineInput],
    ) -> Result<Vec<PricedLine>, PostingError> {
        let mut priced = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            let line_no = idx + 1;
            if line.sale_unit_price.is_some() && kind != DocumentKind::Purchase {
                return Err(PostingError::Validation(format!(
                    "line {line_no}: sale unit price applies to purchases only"
                )));
            }
            let product = self
                .catalog
                .product(line.product_id)
                .await?
                .ok_or_else(|| PostingError::NotFound(format!("product {}", line.product_id)))?;
            if !product.can_transact() {
                return Err(PostingError::Validation(format!(
                    "line {line_no}: product {} is not active",
                    product.sku
                )));
            }
            priced.push(PricedLine {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                tax_rate: line.tax_rate,
                discount: product.discount,
            });
        }
        Ok(priced)
    }

    fn publish(&self, events: Vec<(u64, PostingEvent)>) {
        let Some(bus) = &self.bus else {
            return;
        };
        for (sequence, event) in events {
            let (aggregate_id, aggregate_type) = event.stream();
            let envelope = match EventEnvelope::from_typed(aggregate_id, aggregate_type, sequence, &event) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(error = %err, "failed to encode posting event");
                    continue;
                }
            };
            if let Err(err) = bus.publish(envelope) {
                warn!(error = ?err, "failed to publish posting event");
            }
        }
    }
}

/// Commit a fully staged unit, or roll back a failed one.
async fn finish<T: PostingTx, O>(
    tx: T,
    staged: Result<Staged<O>, PostingError>,
) -> Result<Staged<O>, PostingError> {
    match staged {
        Ok(staged) => {
            tx.commit().await?;
            Ok(staged)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                error!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn stage_payment<T: PostingTx>(
    tx: &mut T,
    request: PostPaymentRequest,
) -> Result<Staged<PaymentOutcome>, PostingError> {
    let mut party = tx
        .load_party(request.party_id)
        .await?
        .ok_or_else(|| PostingError::NotFound(format!("party {}", request.party_id)))?;

    let (transaction_type, label) = match party.kind() {
        PartyKind::Customer => (TransactionType::Credit, "Payment received"),
        PartyKind::Vendor => (TransactionType::Debit, "Payment made"),
    };
    let posting = PostLedgerEntry {
        entry_id: Uuid::now_v7(),
        party_id: party.id_typed(),
        amount: request.amount,
        transaction_type,
        payment_mode: Some(request.payment_mode),
        description: request.description.unwrap_or_else(|| label.to_string()),
        document_id: None,
        created_by: request.created_by,
        occurred_at: Utc::now(),
    };

    let expected = ExpectedVersion::Exact(party.version());
    let mut events = Vec::with_capacity(1);
    let mut entries = post_entries(&mut party, vec![posting], &mut events)?;
    tx.append_ledger(&party, &entries, expected).await?;

    let entry = entries
        .pop()
        .ok_or_else(|| PostingError::PersistenceFailure("payment produced no entry".to_string()))?;
    Ok(Staged {
        outcome: PaymentOutcome {
            entry,
            balance: party.balance(),
        },
        events,
    })
}

async fn load_counterparty<T: PostingTx>(
    tx: &mut T,
    id: PartyId,
    expected_kind: PartyKind,
) -> Result<PartyAccount, PostingError> {
    let party = tx
        .load_party(id)
        .await?
        .ok_or_else(|| PostingError::NotFound(format!("party {id}")))?;
    if party.kind() != expected_kind {
        return Err(PostingError::Validation(format!(
            "party {id} is a {}, expected a {}",
            party.kind().as_str(),
            expected_kind.as_str()
        )));
    }
    if !party.can_transact() {
        return Err(PostingError::Validation(format!("party {id} is suspended")));
    }
    Ok(party)
}

/// Execute each posting on the account, collecting entries and their events.
fn post_entries(
    party: &mut PartyAccount,
    postings: Vec<PostLedgerEntry>,
    events: &mut Vec<(u64, PostingEvent)>,
) -> Result<Vec<LedgerEntry>, PostingError> {
    let mut entries = Vec::with_capacity(postings.len());
    for posting in postings {
        for event in party.execute(&LedgerCommand::PostEntry(posting))? {
            let LedgerEvent::EntryPosted(entry) = event;
            events.push((party.version(), PostingEvent::LedgerEntryPosted(entry.clone())));
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn with_line(line_no: u32, err: DomainError) -> PostingError {
    match err {
        DomainError::Validation(msg) => PostingError::Validation(format!("line {line_no}: {msg}")),
        other => other.into(),
    }
}

fn document_label(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Invoice => "Invoice",
        DocumentKind::Purchase => "Purchase",
    }
}
