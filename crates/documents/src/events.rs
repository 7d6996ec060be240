//! Events published once a posting unit has committed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tradebook_core::AggregateId;
use tradebook_events::Event;
use tradebook_inventory::{BatchConsumption, BatchId, InventoryEvent};
use tradebook_parties::LedgerEntry;
use tradebook_products::ProductId;

use crate::document::DocumentView;

/// What a posting did to one product's stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    /// Document line that caused the movement.
    pub line_no: u32,
    pub product_id: ProductId,
    pub kind: StockMovementKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StockMovementKind {
    Received {
        batch_id: BatchId,
        quantity: Decimal,
        unit_cost: Decimal,
    },
    Deducted {
        consumptions: Vec<BatchConsumption>,
        weighted_unit_cost: Decimal,
    },
}

impl StockMovement {
    pub fn from_inventory_event(line_no: u32, event: &InventoryEvent) -> Self {
        match event {
            InventoryEvent::BatchReceived(e) => Self {
                line_no,
                product_id: e.batch.product_id,
                kind: StockMovementKind::Received {
                    batch_id: e.batch.id,
                    quantity: e.batch.current_quantity,
                    unit_cost: e.batch.unit_cost,
                },
            },
            InventoryEvent::StockDeducted(e) => Self {
                line_no,
                product_id: e.product_id,
                kind: StockMovementKind::Deducted {
                    consumptions: e.consumptions.clone(),
                    weighted_unit_cost: e.weighted_unit_cost,
                },
            },
        }
    }

    /// Signed change in on-hand quantity.
    pub fn quantity_delta(&self) -> Decimal {
        match &self.kind {
            StockMovementKind::Received { quantity, .. } => *quantity,
            StockMovementKind::Deducted { consumptions, .. } => {
                -consumptions.iter().map(|c| c.quantity).sum::<Decimal>()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostingEvent {
    DocumentPosted {
        document: DocumentView,
    },
    LedgerEntryPosted(LedgerEntry),
    InventoryChanged {
        document_id: AggregateId,
        movement: StockMovement,
        /// On-hand quantity after the movement.
        total_quantity: Decimal,
        occurred_at: DateTime<Utc>,
    },
}

impl PostingEvent {
    /// Stream the event belongs to: `(aggregate id, aggregate type)`.
    pub fn stream(&self) -> (AggregateId, &'static str) {
        match self {
            PostingEvent::DocumentPosted { document } => (document.id.0, "documents.document"),
            PostingEvent::LedgerEntryPosted(entry) => (entry.party_id.0, "parties.party"),
            PostingEvent::InventoryChanged { movement, .. } => {
                (movement.product_id.0, "inventory.record")
            }
        }
    }
}

impl Event for PostingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PostingEvent::DocumentPosted { .. } => "documents.document.posted",
            PostingEvent::LedgerEntryPosted(_) => "parties.ledger.entry_posted",
            PostingEvent::InventoryChanged { .. } => "inventory.record.changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PostingEvent::DocumentPosted { document } => document.created_at,
            PostingEvent::LedgerEntryPosted(entry) => entry.created_at,
            PostingEvent::InventoryChanged { occurred_at, .. } => *occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tradebook_inventory::{Batch, BatchReceived, StockDeducted};

    #[test]
    fn movements_carry_signed_quantity() {
        let product_id = ProductId::generate();
        let batch_id = BatchId::generate();
        let received = InventoryEvent::BatchReceived(BatchReceived {
            batch: Batch {
                id: batch_id,
                product_id,
                source_document_id: AggregateId::new(),
                unit_cost: dec!(12),
                current_quantity: dec!(10),
                sale_unit_price: None,
                is_deleted: false,
                received_at: Utc::now(),
            },
        });
        let deducted = InventoryEvent::StockDeducted(StockDeducted {
            product_id,
            document_id: AggregateId::new(),
            requested: dec!(4),
            consumptions: vec![BatchConsumption {
                batch_id,
                quantity: dec!(4),
                unit_cost: dec!(12),
            }],
            weighted_unit_cost: dec!(12),
            occurred_at: Utc::now(),
        });

        let r = StockMovement::from_inventory_event(1, &received);
        let d = StockMovement::from_inventory_event(2, &deducted);
        assert_eq!(r.quantity_delta(), dec!(10));
        assert_eq!(d.quantity_delta(), dec!(-4));
        assert_eq!(d.line_no, 2);
        assert_eq!(d.product_id, product_id);
    }
}
