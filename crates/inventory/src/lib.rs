//! Inventory domain module: batch-level stock with FIFO consumption.
//!
//! Pure domain logic (no IO, no storage). Stock only changes through the
//! [`InventoryRecord`] aggregate, which recomputes its total after every event.

pub mod batch;
pub mod record;

pub use batch::{Batch, BatchConsumption, BatchId};
pub use record::{
    BatchReceived, DeductStock, InventoryCommand, InventoryEvent, InventoryRecord, ReceiveBatch,
    StockDeducted,
};
