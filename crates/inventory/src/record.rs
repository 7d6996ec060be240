use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tradebook_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use tradebook_events::Event;
use tradebook_products::ProductId;

use crate::batch::{Batch, BatchConsumption, BatchId};

/// Aggregate root: a product's stock, held as batches.
///
/// `total_quantity` is derived: it always equals the sum of non-deleted batch
/// quantities and is recomputed after every applied event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    product_id: ProductId,
    batches: Vec<Batch>,
    total_quantity: Decimal,
    version: u64,
}

impl InventoryRecord {
    /// A record with no batches, for a product that has never been received.
    pub fn empty(product_id: ProductId) -> Self {
        Self {
            product_id,
            batches: Vec::new(),
            total_quantity: Decimal::ZERO,
            version: 0,
        }
    }

    /// Rebuild a record from persisted batches.
    pub fn restore(product_id: ProductId, batches: Vec<Batch>, version: u64) -> Self {
        let mut record = Self {
            product_id,
            batches,
            total_quantity: Decimal::ZERO,
            version,
        };
        record.recompute_total();
        record
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn batch(&self, id: BatchId) -> Option<&Batch> {
        self.batches.iter().find(|b| b.id == id)
    }

    pub fn total_quantity(&self) -> Decimal {
        self.total_quantity
    }

    /// Quantity a deduction could consume right now.
    pub fn available_quantity(&self) -> Decimal {
        self.eligible().map(|b| b.current_quantity).sum()
    }

    fn recompute_total(&mut self) {
        self.total_quantity = self
            .batches
            .iter()
            .filter(|b| !b.is_deleted)
            .map(|b| b.current_quantity)
            .sum();
    }

    /// Eligible batches, oldest first (ties broken by id, which is time-ordered).
    fn eligible(&self) -> impl Iterator<Item = &Batch> {
        let mut eligible: Vec<&Batch> = self.batches.iter().filter(|b| b.is_eligible()).collect();
        eligible.sort_by_key(|b| (b.received_at, b.id));
        eligible.into_iter()
    }
}

impl AggregateRoot for InventoryRecord {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ReceiveBatch (purchase posting).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBatch {
    pub batch_id: BatchId,
    pub product_id: ProductId,
    pub source_document_id: AggregateId,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub sale_unit_price: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeductStock (invoice posting).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductStock {
    pub product_id: ProductId,
    pub document_id: AggregateId,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    ReceiveBatch(ReceiveBatch),
    DeductStock(DeductStock),
}

/// Event: BatchReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceived {
    pub batch: Batch,
}

/// Event: StockDeducted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDeducted {
    pub product_id: ProductId,
    pub document_id: AggregateId,
    pub requested: Decimal,
    /// In consumption order (oldest batch first).
    pub consumptions: Vec<BatchConsumption>,
    /// `Σ(consumed × unit_cost) / requested`.
    pub weighted_unit_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    BatchReceived(BatchReceived),
    StockDeducted(StockDeducted),
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::BatchReceived(_) => "inventory.batch.received",
            InventoryEvent::StockDeducted(_) => "inventory.stock.deducted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::BatchReceived(e) => e.batch.received_at,
            InventoryEvent::StockDeducted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryRecord {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::BatchReceived(e) => {
                self.batches.push(e.batch.clone());
            }
            InventoryEvent::StockDeducted(e) => {
                for consumption in &e.consumptions {
                    if let Some(batch) = self.batches.iter_mut().find(|b| b.id == consumption.batch_id)
                    {
                        batch.current_quantity -= consumption.quantity;
                    }
                }
            }
        }

        self.recompute_total();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::ReceiveBatch(cmd) => self.handle_receive(cmd),
            InventoryCommand::DeductStock(cmd) => self.handle_deduct(cmd),
        }
    }
}

impl InventoryRecord {
    fn ensure_product(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.product_id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_receive(&self, cmd: &ReceiveBatch) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_product(cmd.product_id)?;

        if cmd.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("received quantity must be positive"));
        }
        if cmd.unit_cost <= Decimal::ZERO {
            return Err(DomainError::validation("unit cost must be positive"));
        }
        if let Some(price) = cmd.sale_unit_price {
            if price <= Decimal::ZERO {
                return Err(DomainError::validation("sale unit price must be positive"));
            }
        }
        if self.total_quantity.checked_add(cmd.quantity).is_none() {
            return Err(DomainError::validation("stock on hand out of range"));
        }
        if self.batch(cmd.batch_id).is_some() {
            return Err(DomainError::conflict(format!(
                "batch {} already exists",
                cmd.batch_id
            )));
        }

        Ok(vec![InventoryEvent::BatchReceived(BatchReceived {
            batch: Batch {
                id: cmd.batch_id,
                product_id: cmd.product_id,
                source_document_id: cmd.source_document_id,
                unit_cost: cmd.unit_cost,
                current_quantity: cmd.quantity,
                sale_unit_price: cmd.sale_unit_price,
                is_deleted: false,
                received_at: cmd.occurred_at,
            },
        })])
    }

    fn handle_deduct(&self, cmd: &DeductStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_product(cmd.product_id)?;

        if cmd.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("deducted quantity must be positive"));
        }

        let available = self.available_quantity();
        if available < cmd.quantity {
            return Err(DomainError::InsufficientStock {
                product: self.product_id.to_string(),
                requested: cmd.quantity,
                available,
            });
        }

        let mut remaining = cmd.quantity;
        let mut consumptions = Vec::new();
        for batch in self.eligible() {
            if remaining.is_zero() {
                break;
            }
            let take = remaining.min(batch.current_quantity);
            consumptions.push(BatchConsumption {
                batch_id: batch.id,
                quantity: take,
                unit_cost: batch.unit_cost,
            });
            remaining -= take;
        }

        let weighted_unit_cost = consumptions
            .iter()
            .try_fold(Decimal::ZERO, |acc, c| acc.checked_add(c.cost()?))
            .and_then(|total_cost| total_cost.checked_div(cmd.quantity))
            .ok_or_else(|| DomainError::validation("stock cost out of range"))?;

        Ok(vec![InventoryEvent::StockDeducted(StockDeducted {
            product_id: cmd.product_id,
            document_id: cmd.document_id,
            requested: cmd.quantity,
            consumptions,
            weighted_unit_cost,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn receive(
        record: &mut InventoryRecord,
        quantity: Decimal,
        unit_cost: Decimal,
        at: DateTime<Utc>,
    ) -> BatchId {
        let batch_id = BatchId::generate();
        record
            .execute(&InventoryCommand::ReceiveBatch(ReceiveBatch {
                batch_id,
                product_id: record.product_id(),
                source_document_id: AggregateId::new(),
                quantity,
                unit_cost,
                sale_unit_price: None,
                occurred_at: at,
            }))
            .unwrap();
        batch_id
    }

    fn deduct(record: &InventoryRecord, quantity: Decimal) -> InventoryCommand {
        InventoryCommand::DeductStock(DeductStock {
            product_id: record.product_id(),
            document_id: AggregateId::new(),
            quantity,
            occurred_at: Utc::now(),
        })
    }

    fn deducted(events: &[InventoryEvent]) -> &StockDeducted {
        match &events[0] {
            InventoryEvent::StockDeducted(e) => e,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn fifo_consumes_oldest_batches_first_and_weights_cost() {
        let mut record = InventoryRecord::empty(ProductId::generate());
        let t0 = Utc::now();
        let first = receive(&mut record, dec!(5), dec!(10), t0);
        let second = receive(&mut record, dec!(10), dec!(12), t0 + Duration::seconds(1));
        assert_eq!(record.total_quantity(), dec!(15));

        let cmd = deduct(&record, dec!(8));
        let events = record.execute(&cmd).unwrap();
        let e = deducted(&events);

        assert_eq!(
            e.consumptions,
            vec![
                BatchConsumption { batch_id: first, quantity: dec!(5), unit_cost: dec!(10) },
                BatchConsumption { batch_id: second, quantity: dec!(3), unit_cost: dec!(12) },
            ]
        );
        // (5 × 10 + 3 × 12) / 8
        assert_eq!(e.weighted_unit_cost, dec!(10.75));
        assert_eq!(record.batch(first).unwrap().current_quantity, dec!(0));
        assert_eq!(record.batch(second).unwrap().current_quantity, dec!(7));
        assert_eq!(record.total_quantity(), dec!(7));
    }

    #[test]
    fn receipt_order_wins_over_insertion_order() {
        let mut record = InventoryRecord::empty(ProductId::generate());
        let t0 = Utc::now();
        let newer = receive(&mut record, dec!(4), dec!(9), t0 + Duration::seconds(10));
        let older = receive(&mut record, dec!(4), dec!(7), t0);

        let events = record.handle(&deduct(&record, dec!(2))).unwrap();
        assert_eq!(deducted(&events).consumptions[0].batch_id, older);
        assert_ne!(deducted(&events).consumptions[0].batch_id, newer);
    }

    #[test]
    fn insufficient_stock_leaves_batches_untouched() {
        let mut record = InventoryRecord::empty(ProductId::generate());
        receive(&mut record, dec!(3), dec!(10), Utc::now());
        let before = record.clone();

        let err = record.execute(&deduct(&record, dec!(4))).unwrap_err();
        match err {
            DomainError::InsufficientStock { requested, available, .. } => {
                assert_eq!(requested, dec!(4));
                assert_eq!(available, dec!(3));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(record, before);
    }

    #[test]
    fn deleted_batches_are_not_eligible_and_not_counted() {
        let product_id = ProductId::generate();
        let live = Batch {
            id: BatchId::generate(),
            product_id,
            source_document_id: AggregateId::new(),
            unit_cost: dec!(5),
            current_quantity: dec!(2),
            sale_unit_price: None,
            is_deleted: false,
            received_at: Utc::now(),
        };
        let deleted = Batch {
            id: BatchId::generate(),
            is_deleted: true,
            current_quantity: dec!(50),
            received_at: live.received_at - Duration::days(1),
            ..live.clone()
        };
        let record = InventoryRecord::restore(product_id, vec![deleted, live], 3);

        assert_eq!(record.total_quantity(), dec!(2));
        assert!(matches!(
            record.handle(&deduct(&record, dec!(3))),
            Err(DomainError::InsufficientStock { .. })
        ));
    }

    #[test]
    fn receive_rejects_non_positive_quantity_and_cost() {
        let record = InventoryRecord::empty(ProductId::generate());
        for (quantity, unit_cost) in [(dec!(0), dec!(1)), (dec!(1), dec!(0))] {
            let cmd = InventoryCommand::ReceiveBatch(ReceiveBatch {
                batch_id: BatchId::generate(),
                product_id: record.product_id(),
                source_document_id: AggregateId::new(),
                quantity,
                unit_cost,
                sale_unit_price: None,
                occurred_at: Utc::now(),
            });
            assert!(matches!(record.handle(&cmd), Err(DomainError::Validation(_))));
        }
    }

    #[test]
    fn out_of_range_quantities_and_costs_fail_validation() {
        let mut record = InventoryRecord::empty(ProductId::generate());
        let quarter = Decimal::MAX / dec!(4);
        receive(&mut record, quarter, dec!(5), Utc::now());

        let err = record.handle(&deduct(&record, quarter)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let more = InventoryCommand::ReceiveBatch(ReceiveBatch {
            batch_id: BatchId::generate(),
            product_id: record.product_id(),
            source_document_id: AggregateId::new(),
            quantity: Decimal::MAX,
            unit_cost: dec!(1),
            sale_unit_price: None,
            occurred_at: Utc::now(),
        });
        assert!(matches!(record.handle(&more), Err(DomainError::Validation(_))));
        assert_eq!(record.total_quantity(), quarter);
        assert_eq!(record.version(), 1);
    }

    #[test]
    fn commands_for_another_product_are_rejected() {
        let record = InventoryRecord::empty(ProductId::generate());
        let cmd = InventoryCommand::DeductStock(DeductStock {
            product_id: ProductId::generate(),
            document_id: AggregateId::new(),
            quantity: dec!(1),
            occurred_at: Utc::now(),
        });
        assert!(matches!(
            record.handle(&cmd),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a successful deduction consumes exactly the requested quantity,
        /// no batch goes negative, and the total stays the sum of the batches.
        #[test]
        fn deductions_conserve_quantity(
            receipts in prop::collection::vec((1i64..500i64, 1i64..10_000i64), 1..8),
            requests in prop::collection::vec(1i64..800i64, 1..8),
        ) {
            let mut record = InventoryRecord::empty(ProductId::generate());
            let t0 = Utc::now();
            for (i, (qty, cost)) in receipts.iter().enumerate() {
                receive(&mut record, Decimal::from(*qty), Decimal::new(*cost, 2), t0 + Duration::seconds(i as i64));
            }

            for requested in requests {
                let requested = Decimal::from(requested);
                let before = record.total_quantity();
                match record.execute(&deduct(&record, requested)) {
                    Ok(events) => {
                        let e = deducted(&events);
                        let consumed: Decimal = e.consumptions.iter().map(|c| c.quantity).sum();
                        prop_assert_eq!(consumed, requested);
                        prop_assert_eq!(record.total_quantity(), before - requested);
                    }
                    Err(DomainError::InsufficientStock { .. }) => {
                        prop_assert!(before < requested);
                        prop_assert_eq!(record.total_quantity(), before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                }

                for batch in record.batches() {
                    prop_assert!(batch.current_quantity >= Decimal::ZERO);
                }
                let sum: Decimal = record.batches().iter().map(|b| b.current_quantity).sum();
                prop_assert_eq!(record.total_quantity(), sum);
            }
        }
    }
}
