use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tradebook_core::{AggregateId, UserId};
use tradebook_events::Event;

use crate::party::{PartyId, PartyKind};

/// Ledger direction of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Debit,
    Credit,
}

impl TransactionType {
    pub fn opposite(self) -> Self {
        match self {
            TransactionType::Debit => TransactionType::Credit,
            TransactionType::Credit => TransactionType::Debit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Debit => "debit",
            TransactionType::Credit => "credit",
        }
    }

    fn index(self) -> usize {
        match self {
            TransactionType::Debit => 0,
            TransactionType::Credit => 1,
        }
    }
}

/// How money moved. `NotApplicable` is stored for postings that move no cash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMode {
    Cash,
    BankTransfer,
    Cheque,
    Card,
    Online,
    NotApplicable,
}

impl PaymentMode {
    /// Whether this mode describes an actual movement of money.
    pub fn is_real(self) -> bool {
        self != PaymentMode::NotApplicable
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::BankTransfer => "bank-transfer",
            PaymentMode::Cheque => "cheque",
            PaymentMode::Card => "card",
            PaymentMode::Online => "online",
            PaymentMode::NotApplicable => "not-applicable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(PaymentMode::Cash),
            "bank-transfer" => Some(PaymentMode::BankTransfer),
            "cheque" => Some(PaymentMode::Cheque),
            "card" => Some(PaymentMode::Card),
            "online" => Some(PaymentMode::Online),
            "not-applicable" => Some(PaymentMode::NotApplicable),
            _ => None,
        }
    }
}

/// Effect of a posting on the party's running balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceEffect {
    Increase,
    Decrease,
}

/// One row of the sign convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignRule {
    pub party_kind: PartyKind,
    pub transaction_type: TransactionType,
    pub effect: BalanceEffect,
    /// Real cash movement: a payment mode is required.
    pub moves_cash: bool,
    pub meaning: &'static str,
}

impl SignRule {
    /// Balance after posting `amount` under this rule (may be negative; callers guard).
    /// `None` when the result leaves the `Decimal` range.
    pub fn next_balance(&self, balance: Decimal, amount: Decimal) -> Option<Decimal> {
        match self.effect {
            BalanceEffect::Increase => balance.checked_add(amount),
            BalanceEffect::Decrease => balance.checked_sub(amount),
        }
    }

    /// `amount` with the sign this rule gives it on the balance.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self.effect {
            BalanceEffect::Increase => amount,
            BalanceEffect::Decrease => -amount,
        }
    }
}

/// Sign convention, indexed `[party kind][transaction type]`.
pub const SIGN_TABLE: [[SignRule; 2]; 2] = [
    [
        SignRule {
            party_kind: PartyKind::Customer,
            transaction_type: TransactionType::Debit,
            effect: BalanceEffect::Increase,
            moves_cash: false,
            meaning: "invoice issued",
        },
        SignRule {
            party_kind: PartyKind::Customer,
            transaction_type: TransactionType::Credit,
            effect: BalanceEffect::Decrease,
            moves_cash: true,
            meaning: "payment received",
        },
    ],
    [
        SignRule {
            party_kind: PartyKind::Vendor,
            transaction_type: TransactionType::Debit,
            effect: BalanceEffect::Decrease,
            moves_cash: true,
            meaning: "payment made",
        },
        SignRule {
            party_kind: PartyKind::Vendor,
            transaction_type: TransactionType::Credit,
            effect: BalanceEffect::Increase,
            moves_cash: false,
            meaning: "purchase received",
        },
    ],
];

/// Look up the rule for a party kind and transaction type.
pub fn sign_rule(party_kind: PartyKind, transaction_type: TransactionType) -> &'static SignRule {
    &SIGN_TABLE[party_kind.index()][transaction_type.index()]
}

/// Immutable ledger entry with its resulting-balance snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub party_id: PartyId,
    pub party_kind: PartyKind,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub payment_mode: PaymentMode,
    pub resulting_balance: Decimal,
    pub description: String,
    /// Document this entry belongs to, if it was posted as part of one.
    pub document_id: Option<AggregateId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Amount with the sign it had on the running balance.
    pub fn signed_amount(&self) -> Decimal {
        sign_rule(self.party_kind, self.transaction_type).signed(self.amount)
    }
}

/// Replay a ledger from zero: the balance the entries imply.
pub fn replay_balance<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Decimal {
    entries
        .into_iter()
        .map(LedgerEntry::signed_amount)
        .sum()
}

/// Command: post one entry on a party ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostLedgerEntry {
    pub entry_id: Uuid,
    pub party_id: PartyId,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    /// Required for cash-movement postings, ignored otherwise.
    pub payment_mode: Option<PaymentMode>,
    pub description: String,
    pub document_id: Option<AggregateId>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    EntryPosted(LedgerEntry),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::EntryPosted(_) => "parties.ledger.entry_posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::EntryPosted(e) => e.created_at,
        }
    }
}
