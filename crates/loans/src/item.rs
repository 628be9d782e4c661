//! Loaned item state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockloan_core::{DomainError, DomainResult, LocationId};
use stockloan_inventory::StockItemId;

/// Lifecycle of one inventory unit inside one loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanedItemStatus {
    /// Attached to the loan, still at its stock location.
    Pending,
    /// Moved to the loan-holding location.
    OnLoan,
    /// Moved back into stock. Terminal.
    Returned,
}

impl LoanedItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoanedItemStatus::Pending => "PENDING",
            LoanedItemStatus::OnLoan => "ON_LOAN",
            LoanedItemStatus::Returned => "RETURNED",
        }
    }

    /// PENDING and ON_LOAN items hold their inventory unit exclusively.
    pub fn is_open(self) -> bool {
        !matches!(self, LoanedItemStatus::Returned)
    }

    /// Only single forward steps exist.
    pub fn can_transition_to(self, next: LoanedItemStatus) -> bool {
        matches!(
            (self, next),
            (LoanedItemStatus::Pending, LoanedItemStatus::OnLoan)
                | (LoanedItemStatus::OnLoan, LoanedItemStatus::Returned)
        )
    }
}

impl core::fmt::Display for LoanedItemStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inventory item's participation in a loan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanedItem {
    /// 1-based position within the loan.
    pub line_no: u32,
    pub stock_item: StockItemId,
    pub status: LoanedItemStatus,
    pub added_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub returned_to: Option<LocationId>,
}

impl LoanedItem {
    pub fn new(line_no: u32, stock_item: StockItemId, added_at: DateTime<Utc>) -> Self {
        Self {
            line_no,
            stock_item,
            status: LoanedItemStatus::Pending,
            added_at,
            issued_at: None,
            returned_at: None,
            returned_to: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Precondition for `issue`: the unit must still be PENDING.
    pub fn ensure_can_issue(&self) -> DomainResult<()> {
        self.ensure_transition(LoanedItemStatus::OnLoan, "issue")
    }

    /// Precondition for `return`: the unit must be ON_LOAN.
    pub fn ensure_can_return(&self) -> DomainResult<()> {
        self.ensure_transition(LoanedItemStatus::Returned, "return")
    }

    pub(crate) fn mark_issued(&mut self, at: DateTime<Utc>) {
        self.status = LoanedItemStatus::OnLoan;
        self.issued_at = Some(at);
    }

    pub(crate) fn mark_returned(&mut self, at: DateTime<Utc>, destination: LocationId) {
        self.status = LoanedItemStatus::Returned;
        self.returned_at = Some(at);
        self.returned_to = Some(destination);
    }

    fn ensure_transition(&self, next: LoanedItemStatus, action: &str) -> DomainResult<()> {
        if self.status.can_transition_to(next) {
            return Ok(());
        }
        let reason = if self.status == LoanedItemStatus::Returned {
            format!("cannot {action} stock item {}: returned items are final", self.stock_item)
        } else {
            format!("cannot {action} stock item {} from its current status", self.stock_item)
        };
        Err(DomainError::invalid_state(self.status, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockloan_core::AggregateId;

    fn item() -> LoanedItem {
        LoanedItem::new(1, StockItemId::new(AggregateId::new()), Utc::now())
    }

    #[test]
    fn new_item_is_pending_and_open() {
        let it = item();
        assert_eq!(it.status, LoanedItemStatus::Pending);
        assert!(it.is_open());
        assert!(it.ensure_can_issue().is_ok());
    }

    #[test]
    fn pending_item_cannot_be_returned() {
        let err = item().ensure_can_return().unwrap_err();
        match err {
            DomainError::InvalidState { current, .. } => assert_eq!(current, "PENDING"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn on_loan_item_cannot_be_issued_twice() {
        let mut it = item();
        it.mark_issued(Utc::now());
        let err = it.ensure_can_issue().unwrap_err();
        match err {
            DomainError::InvalidState { current, .. } => assert_eq!(current, "ON_LOAN"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(it.ensure_can_return().is_ok());
    }

    #[test]
    fn returned_item_is_terminal() {
        let mut it = item();
        it.mark_issued(Utc::now());
        it.mark_returned(Utc::now(), LocationId::new());

        assert!(!it.is_open());
        for err in [it.ensure_can_issue().unwrap_err(), it.ensure_can_return().unwrap_err()] {
            match err {
                DomainError::InvalidState { current, reason } => {
                    assert_eq!(current, "RETURNED");
                    assert!(reason.contains("final"));
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn no_backward_or_skipping_transitions() {
        use LoanedItemStatus::*;
        for (from, to) in [
            (OnLoan, Pending),
            (Returned, Pending),
            (Returned, OnLoan),
            (Pending, Returned),
            (Pending, Pending),
        ] {
            assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
        }
    }
}
