use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tradebook_core::{AggregateId, DomainError, DomainResult, UserId, typed_id};
use tradebook_parties::{PartyId, PartyKind, PaymentMode, TransactionType};

use crate::calculator::{Computation, DocumentTotals, LineItem};
use crate::numbering::{DocumentKind, DocumentNumber};

typed_id!(
    /// Document identifier (invoice or purchase).
    DocumentId
);

typed_id!(
    /// Company bank account printed on invoices.
    BankAccountId
);

typed_id!(
    /// Authorized signature printed on invoices.
    SignatureId
);

impl DocumentKind {
    /// Counterparty kind a document of this kind is issued to.
    pub fn party_kind(self) -> PartyKind {
        match self {
            DocumentKind::Invoice => PartyKind::Customer,
            DocumentKind::Purchase => PartyKind::Vendor,
        }
    }

    /// Ledger direction of the full-amount entry (invoice issued / purchase received).
    pub fn ledger_transaction(self) -> TransactionType {
        match self {
            DocumentKind::Invoice => TransactionType::Debit,
            DocumentKind::Purchase => TransactionType::Credit,
        }
    }
}

/// Post-commit flags: the only state a document may change once committed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFlags {
    pub is_deleted: bool,
    pub is_return: bool,
}

/// Header fields of a document, as requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHeader {
    pub kind: DocumentKind,
    pub date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub counterparty_id: PartyId,
    pub transaction_type: TransactionType,
    pub payment_mode: Option<PaymentMode>,
    pub initial_payment: Decimal,
    pub is_rounded_off: bool,
    pub description: Option<String>,
    pub bank_account_id: Option<BankAccountId>,
    pub signature_id: Option<SignatureId>,
    pub created_by: UserId,
}

impl DocumentHeader {
    /// Checks that need no computed totals and no collaborator.
    pub fn validate_shape(&self) -> DomainResult<()> {
        if let Some(due) = self.due_date {
            if due < self.date {
                return Err(DomainError::validation(format!(
                    "due date {due} precedes document date {}",
                    self.date
                )));
            }
        }
        if self.kind == DocumentKind::Purchase
            && (self.bank_account_id.is_some() || self.signature_id.is_some())
        {
            return Err(DomainError::validation(
                "bank account and signature apply to invoices only",
            ));
        }
        if self.initial_payment < Decimal::ZERO {
            return Err(DomainError::validation("initial payment cannot be negative"));
        }
        Ok(())
    }
}

/// Initial-payment rules against the computed document total.
///
/// Credit-type documents need `0 < payment ≤ total`, debit-type `0 ≤ payment ≤
/// total`. A non-zero payment needs a real payment mode.
pub fn validate_initial_payment(
    transaction_type: TransactionType,
    payment_mode: Option<PaymentMode>,
    initial_payment: Decimal,
    total_amount: Decimal,
) -> DomainResult<()> {
    if initial_payment < Decimal::ZERO {
        return Err(DomainError::validation("initial payment cannot be negative"));
    }
    if transaction_type == TransactionType::Credit && initial_payment.is_zero() {
        return Err(DomainError::validation(
            "credit documents require a positive initial payment",
        ));
    }
    if initial_payment > total_amount {
        return Err(DomainError::validation(format!(
            "initial payment {initial_payment} exceeds document total {total_amount}"
        )));
    }
    if !initial_payment.is_zero() && !payment_mode.is_some_and(PaymentMode::is_real) {
        return Err(DomainError::validation(
            "initial payment requires a payment mode",
        ));
    }
    Ok(())
}

/// A committed invoice or purchase.
///
/// Immutable once committed except for [`DocumentFlags`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    id: DocumentId,
    kind: DocumentKind,
    number: DocumentNumber,
    date: NaiveDate,
    due_date: Option<NaiveDate>,
    counterparty_id: PartyId,
    lines: Vec<LineItem>,
    totals: DocumentTotals,
    transaction_type: TransactionType,
    payment_mode: PaymentMode,
    initial_payment: Decimal,
    is_rounded_off: bool,
    description: Option<String>,
    bank_account_id: Option<BankAccountId>,
    signature_id: Option<SignatureId>,
    flags: DocumentFlags,
    created_by: UserId,
    created_at: DateTime<Utc>,
    version: u64,
}

impl Document {
    /// Build the record to persist from a validated header, its computation and
    /// the number allocated in the same unit of work.
    pub fn assemble(
        id: DocumentId,
        number: DocumentNumber,
        header: DocumentHeader,
        computation: Computation,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        header.validate_shape()?;
        if number.kind != header.kind || number.year != header.date.year() {
            return Err(DomainError::invariant(format!(
                "number {number} does not belong to a {} dated {}",
                header.kind.as_str(),
                header.date
            )));
        }
        validate_initial_payment(
            header.transaction_type,
            header.payment_mode,
            header.initial_payment,
            computation.totals.total_amount,
        )?;

        let payment_mode = if header.initial_payment.is_zero() {
            PaymentMode::NotApplicable
        } else {
            header.payment_mode.unwrap_or(PaymentMode::NotApplicable)
        };

        Ok(Self {
            id,
            kind: header.kind,
            number,
            date: header.date,
            due_date: header.due_date,
            counterparty_id: header.counterparty_id,
            lines: computation.lines,
            totals: computation.totals,
            transaction_type: header.transaction_type,
            payment_mode,
            initial_payment: header.initial_payment,
            is_rounded_off: header.is_rounded_off,
            description: header.description,
            bank_account_id: header.bank_account_id,
            signature_id: header.signature_id,
            flags: DocumentFlags::default(),
            created_by: header.created_by,
            created_at,
            version: 1,
        })
    }

    pub fn id_typed(&self) -> DocumentId {
        self.id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.id.0
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn number(&self) -> &DocumentNumber {
        &self.number
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn counterparty_id(&self) -> PartyId {
        self.counterparty_id
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn totals(&self) -> &DocumentTotals {
        &self.totals
    }

    pub fn total_amount(&self) -> Decimal {
        self.totals.total_amount
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn payment_mode(&self) -> PaymentMode {
        self.payment_mode
    }

    pub fn initial_payment(&self) -> Decimal {
        self.initial_payment
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn flags(&self) -> DocumentFlags {
        self.flags
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Soft delete. Deleting twice is a conflict.
    pub fn mark_deleted(&mut self) -> DomainResult<()> {
        if self.flags.is_deleted {
            return Err(DomainError::conflict(format!(
                "document {} is already deleted",
                self.number
            )));
        }
        self.flags.is_deleted = true;
        self.version += 1;
        Ok(())
    }

    /// Flag as returned. Deleted documents cannot be returned.
    pub fn mark_return(&mut self) -> DomainResult<()> {
        if self.flags.is_deleted {
            return Err(DomainError::validation(format!(
                "document {} is deleted",
                self.number
            )));
        }
        if self.flags.is_return {
            return Err(DomainError::conflict(format!(
                "document {} is already returned",
                self.number
            )));
        }
        self.flags.is_return = true;
        self.version += 1;
        Ok(())
    }

    /// The outbound shape: internal flags and version stripped.
    pub fn view(&self) -> DocumentView {
        DocumentView {
            id: self.id,
            kind: self.kind,
            number: self.number.display.clone(),
            year: self.number.year,
            sequence: self.number.sequence,
            date: self.date,
            due_date: self.due_date,
            counterparty_id: self.counterparty_id,
            lines: self.lines.clone(),
            total_discount: self.totals.total_discount,
            total_tax: self.totals.total_tax,
            subtotal: self.totals.subtotal,
            rounding_adjustment: self.totals.rounding_adjustment,
            total_amount: self.totals.total_amount,
            transaction_type: self.transaction_type,
            payment_mode: self.payment_mode,
            initial_payment: self.initial_payment,
            is_rounded_off: self.is_rounded_off,
            description: self.description.clone(),
            bank_account_id: self.bank_account_id,
            signature_id: self.signature_id,
            created_by: self.created_by,
            created_at: self.created_at,
        }
    }
}

/// Document as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub id: DocumentId,
    pub kind: DocumentKind,
    pub number: String,
    pub year: i32,
    pub sequence: u64,
    pub date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub counterparty_id: PartyId,
    pub lines: Vec<LineItem>,
    pub total_discount: Decimal,
    pub total_tax: Decimal,
    pub subtotal: Decimal,
    pub rounding_adjustment: Decimal,
    pub total_amount: Decimal,
    pub transaction_type: TransactionType,
    pub payment_mode: PaymentMode,
    pub initial_payment: Decimal,
    pub is_rounded_off: bool,
    pub description: Option<String>,
    pub bank_account_id: Option<BankAccountId>,
    pub signature_id: Option<SignatureId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::{LineItemCalculator, PricedLine};
    use crate::numbering::NumberingScheme;
    use rust_decimal_macros::dec;
    use tradebook_products::{DiscountPolicy, ProductId};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn header(kind: DocumentKind) -> DocumentHeader {
        DocumentHeader {
            kind,
            date: date(2025, 3, 14),
            due_date: None,
            counterparty_id: PartyId::generate(),
            transaction_type: TransactionType::Debit,
            payment_mode: None,
            initial_payment: Decimal::ZERO,
            is_rounded_off: false,
            description: None,
            bank_account_id: None,
            signature_id: None,
            created_by: UserId::new(),
        }
    }

    fn computation() -> Computation {
        LineItemCalculator
            .compute(
                &[PricedLine {
                    product_id: ProductId::generate(),
                    quantity: dec!(3),
                    unit_price: dec!(100),
                    tax_rate: dec!(18),
                    discount: DiscountPolicy::Rate(dec!(10)),
                }],
                false,
            )
            .unwrap()
    }

    fn assemble(header: DocumentHeader) -> DomainResult<Document> {
        let number = NumberingScheme::default().number(header.kind, header.date.year(), 1);
        Document::assemble(DocumentId::generate(), number, header, computation(), Utc::now())
    }

    #[test]
    fn initial_payment_bounds_depend_on_transaction_type() {
        use TransactionType::{Credit, Debit};
        let cash = Some(PaymentMode::Cash);

        assert!(validate_initial_payment(Debit, None, dec!(0), dec!(100)).is_ok());
        assert!(validate_initial_payment(Debit, cash, dec!(100), dec!(100)).is_ok());
        assert!(validate_initial_payment(Credit, cash, dec!(0.01), dec!(100)).is_ok());

        assert!(validate_initial_payment(Credit, cash, dec!(0), dec!(100)).is_err());
        assert!(validate_initial_payment(Debit, cash, dec!(100.01), dec!(100)).is_err());
        assert!(validate_initial_payment(Debit, cash, dec!(-1), dec!(100)).is_err());
        assert!(validate_initial_payment(Debit, None, dec!(10), dec!(100)).is_err());
        assert!(
            validate_initial_payment(Debit, Some(PaymentMode::NotApplicable), dec!(10), dec!(100))
                .is_err()
        );
    }

    #[test]
    fn due_date_cannot_precede_date() {
        let mut h = header(DocumentKind::Invoice);
        h.due_date = Some(date(2025, 3, 13));
        assert!(matches!(assemble(h), Err(DomainError::Validation(_))));
    }

    #[test]
    fn purchases_reject_invoice_references() {
        let mut h = header(DocumentKind::Purchase);
        h.transaction_type = TransactionType::Debit;
        h.bank_account_id = Some(BankAccountId::generate());
        assert!(matches!(assemble(h), Err(DomainError::Validation(_))));
    }

    #[test]
    fn number_must_match_kind_and_year() {
        let h = header(DocumentKind::Invoice);
        let wrong_year = NumberingScheme::default().number(DocumentKind::Invoice, 2024, 1);
        let err = Document::assemble(DocumentId::generate(), wrong_year, h, computation(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn zero_initial_payment_stores_not_applicable() {
        let mut h = header(DocumentKind::Invoice);
        h.payment_mode = Some(PaymentMode::Card);
        let doc = assemble(h).unwrap();
        assert_eq!(doc.payment_mode(), PaymentMode::NotApplicable);
    }

    #[test]
    fn flags_are_the_only_post_commit_mutation() {
        let mut doc = assemble(header(DocumentKind::Invoice)).unwrap();
        assert_eq!(doc.version(), 1);

        doc.mark_return().unwrap();
        assert!(matches!(doc.mark_return(), Err(DomainError::Conflict(_))));
        doc.mark_deleted().unwrap();
        assert!(matches!(doc.mark_deleted(), Err(DomainError::Conflict(_))));
        assert_eq!(
            doc.flags(),
            DocumentFlags {
                is_deleted: true,
                is_return: true
            }
        );
        assert_eq!(doc.version(), 3);
    }

    #[test]
    fn view_strips_flags_and_version() {
        let mut doc = assemble(header(DocumentKind::Invoice)).unwrap();
        doc.mark_deleted().unwrap();
        let json = serde_json::to_value(doc.view()).unwrap();

        assert_eq!(json["number"], "INV-2025/1");
        assert!(json.get("flags").is_none());
        assert!(json.get("isDeleted").is_none());
        assert!(json.get("version").is_none());
    }
}
