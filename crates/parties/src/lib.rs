//! Parties module: customer and vendor accounts with their running-balance ledgers.
//!
//! Pure domain logic only (no IO, no storage). The sign convention between
//! party kinds and transaction types lives in one table, [`ledger::SIGN_TABLE`].

pub mod ledger;
pub mod party;

pub use ledger::{
    BalanceEffect, LedgerEntry, LedgerEvent, PaymentMode, PostLedgerEntry, SIGN_TABLE, SignRule,
    TransactionType, replay_balance, sign_rule,
};
pub use party::{LedgerCommand, PartyAccount, PartyId, PartyKind, PartyStatus};
