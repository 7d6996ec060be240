use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tradebook_core::{Aggregate, AggregateRoot, DomainError, typed_id};

use crate::ledger::{LedgerEntry, LedgerEvent, PaymentMode, PostLedgerEntry, sign_rule};

typed_id!(
    /// Party identifier (customer or vendor).
    PartyId
);

/// Party kind: customer (receivable) or vendor (payable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyKind {
    Customer,
    Vendor,
}

impl PartyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PartyKind::Customer => "customer",
            PartyKind::Vendor => "vendor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(PartyKind::Customer),
            "vendor" => Some(PartyKind::Vendor),
            _ => None,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            PartyKind::Customer => 0,
            PartyKind::Vendor => 1,
        }
    }
}

/// Party status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyStatus {
    Active,
    Suspended,
}

/// Aggregate root: a party's ledger account.
///
/// `balance` always mirrors the `resulting_balance` of the last posted entry
/// and is never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyAccount {
    id: PartyId,
    kind: PartyKind,
    name: String,
    status: PartyStatus,
    balance: Decimal,
    last_entry_id: Option<Uuid>,
    version: u64,
}

impl PartyAccount {
    /// A freshly opened account with a zero balance.
    pub fn open(id: PartyId, kind: PartyKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            status: PartyStatus::Active,
            balance: Decimal::ZERO,
            last_entry_id: None,
            version: 0,
        }
    }

    /// Rebuild an account from persisted state.
    pub fn restore(
        id: PartyId,
        kind: PartyKind,
        name: impl Into<String>,
        status: PartyStatus,
        balance: Decimal,
        last_entry_id: Option<Uuid>,
        version: u64,
    ) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            status,
            balance,
            last_entry_id,
            version,
        }
    }

    pub fn id_typed(&self) -> PartyId {
        self.id
    }

    pub fn kind(&self) -> PartyKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> PartyStatus {
        self.status
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn last_entry_id(&self) -> Option<Uuid> {
        self.last_entry_id
    }

    pub fn suspend(&mut self) {
        self.status = PartyStatus::Suspended;
        self.version += 1;
    }

    /// Suspended parties cannot transact.
    pub fn can_transact(&self) -> bool {
        self.status == PartyStatus::Active
    }
}

impl AggregateRoot for PartyAccount {
    type Id = PartyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    PostEntry(PostLedgerEntry),
}

impl Aggregate for PartyAccount {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::EntryPosted(entry) => {
                self.balance = entry.resulting_balance;
                self.last_entry_id = Some(entry.id);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LedgerCommand::PostEntry(cmd) => self.handle_post(cmd),
        }
    }
}

impl PartyAccount {
    fn handle_post(&self, cmd: &PostLedgerEntry) -> Result<Vec<LedgerEvent>, DomainError> {
        if cmd.party_id != self.id {
            return Err(DomainError::invariant("party_id mismatch"));
        }
        if !self.can_transact() {
            return Err(DomainError::validation(format!(
                "party {} is not active",
                self.id
            )));
        }
        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::validation("ledger amount must be positive"));
        }

        let rule = sign_rule(self.kind, cmd.transaction_type);
        let payment_mode = if rule.moves_cash {
            match cmd.payment_mode {
                Some(mode) if mode.is_real() => mode,
                _ => {
                    return Err(DomainError::validation(format!(
                        "payment mode is required for {}",
                        rule.meaning
                    )));
                }
            }
        } else {
            PaymentMode::NotApplicable
        };

        let next_balance = rule
            .next_balance(self.balance, cmd.amount)
            .ok_or_else(|| DomainError::validation("ledger balance out of range"))?;
        if next_balance < Decimal::ZERO {
            return Err(DomainError::OverPayment {
                party: self.id.to_string(),
                balance: self.balance,
                amount: cmd.amount,
            });
        }

        Ok(vec![LedgerEvent::EntryPosted(LedgerEntry {
            id: cmd.entry_id,
            party_id: self.id,
            party_kind: self.kind,
            amount: cmd.amount,
            transaction_type: cmd.transaction_type,
            payment_mode,
            resulting_balance: next_balance,
            description: cmd.description.clone(),
            document_id: cmd.document_id,
            created_by: cmd.created_by,
            created_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{TransactionType, replay_balance};
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use tradebook_core::UserId;

    fn post(
        account: &PartyAccount,
        amount: Decimal,
        transaction_type: TransactionType,
        payment_mode: Option<PaymentMode>,
    ) -> LedgerCommand {
        LedgerCommand::PostEntry(PostLedgerEntry {
            entry_id: Uuid::now_v7(),
            party_id: account.id_typed(),
            amount,
            transaction_type,
            payment_mode,
            description: "test".to_string(),
            document_id: None,
            created_by: UserId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn entry_of(events: &[LedgerEvent]) -> &LedgerEntry {
        match &events[0] {
            LedgerEvent::EntryPosted(e) => e,
        }
    }

    #[test]
    fn customer_invoice_then_payment_runs_the_balance() {
        let mut customer = PartyAccount::open(PartyId::generate(), PartyKind::Customer, "Acme");

        let cmd = post(&customer, dec!(500), TransactionType::Debit, None);
        let events = customer.execute(&cmd).unwrap();
        assert_eq!(entry_of(&events).resulting_balance, dec!(500));
        assert_eq!(entry_of(&events).payment_mode, PaymentMode::NotApplicable);
        assert_eq!(customer.balance(), dec!(500));

        let cmd = post(&customer, dec!(200), TransactionType::Credit, Some(PaymentMode::Cash));
        let events = customer.execute(&cmd).unwrap();
        assert_eq!(entry_of(&events).resulting_balance, dec!(300));
        assert_eq!(customer.balance(), dec!(300));
        assert_eq!(customer.version(), 2);
        assert_eq!(customer.last_entry_id(), Some(entry_of(&events).id));
    }

    #[test]
    fn vendor_over_payment_is_rejected_without_change() {
        let mut vendor = PartyAccount::open(PartyId::generate(), PartyKind::Vendor, "Supplier");
        let cmd = post(&vendor, dec!(100), TransactionType::Credit, None);
        vendor.execute(&cmd).unwrap();
        assert_eq!(vendor.balance(), dec!(100));

        let cmd = post(&vendor, dec!(150), TransactionType::Debit, Some(PaymentMode::BankTransfer));
        let err = vendor.execute(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::OverPayment { .. }));
        assert_eq!(vendor.balance(), dec!(100));
        assert_eq!(vendor.version(), 1);
    }

    #[test]
    fn balance_overflow_is_a_validation_failure() {
        let mut customer = PartyAccount::open(PartyId::generate(), PartyKind::Customer, "Acme");
        customer
            .execute(&post(&customer, Decimal::MAX, TransactionType::Debit, None))
            .unwrap();

        let err = customer
            .execute(&post(&customer, dec!(1), TransactionType::Debit, None))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(customer.balance(), Decimal::MAX);
        assert_eq!(customer.version(), 1);
    }

    #[test]
    fn cash_postings_require_a_payment_mode() {
        let mut customer = PartyAccount::open(PartyId::generate(), PartyKind::Customer, "Acme");
        customer
            .execute(&post(&customer, dec!(50), TransactionType::Debit, None))
            .unwrap();

        for mode in [None, Some(PaymentMode::NotApplicable)] {
            let err = customer
                .handle(&post(&customer, dec!(10), TransactionType::Credit, mode))
                .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
    }

    #[test]
    fn non_cash_postings_store_not_applicable() {
        let vendor = PartyAccount::open(PartyId::generate(), PartyKind::Vendor, "Supplier");
        let events = vendor
            .handle(&post(&vendor, dec!(10), TransactionType::Credit, Some(PaymentMode::Cash)))
            .unwrap();
        assert_eq!(entry_of(&events).payment_mode, PaymentMode::NotApplicable);
    }

    #[test]
    fn suspended_party_cannot_post() {
        let mut customer = PartyAccount::open(PartyId::generate(), PartyKind::Customer, "Acme");
        customer.suspend();
        let err = customer
            .handle(&post(&customer, dec!(10), TransactionType::Debit, None))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let customer = PartyAccount::open(PartyId::generate(), PartyKind::Customer, "Acme");
        for amount in [dec!(0), dec!(-5)] {
            assert!(matches!(
                customer.handle(&post(&customer, amount, TransactionType::Debit, None)),
                Err(DomainError::Validation(_))
            ));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the final balance equals the signed sum of every accepted
        /// posting, replayed from zero, and never dips below zero on the way.
        #[test]
        fn balance_equals_replayed_signed_sum(
            postings in prop::collection::vec((1i64..100_000i64, any::<bool>(), any::<bool>()), 1..40)
        ) {
            let kind_is_customer = postings[0].2;
            let kind = if kind_is_customer { PartyKind::Customer } else { PartyKind::Vendor };
            let mut account = PartyAccount::open(PartyId::generate(), kind, "prop");
            let mut accepted: Vec<LedgerEntry> = Vec::new();

            for (cents, is_debit, _) in postings {
                let amount = Decimal::new(cents, 2);
                let tx = if is_debit { TransactionType::Debit } else { TransactionType::Credit };
                let cmd = post(&account, amount, tx, Some(PaymentMode::Cash));
                match account.execute(&cmd) {
                    Ok(events) => accepted.push(entry_of(&events).clone()),
                    Err(DomainError::OverPayment { .. }) => {}
                    Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                }
                prop_assert!(account.balance() >= Decimal::ZERO);
            }

            prop_assert_eq!(account.balance(), replay_balance(&accepted));
            if let Some(last) = accepted.last() {
                prop_assert_eq!(account.balance(), last.resulting_balance);
            }
        }
    }
}
