//! In-flight claims on loans and loaned items.
//!
//! An item claim is held from before the relocation call until the outcome
//! is committed, so two intents for the same loaned item never both reach
//! the gateway. A loan claim covers every item of the loan and is taken by
//! loan-wide intents (cancel, delete); the two kinds exclude each other.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use stockloan_inventory::StockItemId;
use stockloan_loans::LoanId;

use crate::error::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Scope {
    Loan,
    Item(StockItemId),
}

type Key = (LoanId, Scope);

#[derive(Debug, Clone, Default)]
pub struct InFlightClaims {
    held: Arc<Mutex<HashSet<Key>>>,
}

impl InFlightClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim one loaned item. Fails while the same item or the whole loan is claimed.
    pub fn try_claim(&self, loan: LoanId, item: StockItemId) -> Result<ClaimGuard, WorkflowError> {
        self.acquire(loan, Scope::Item(item), |held| {
            if held.contains(&(loan, Scope::Loan)) {
                return Err(WorkflowError::Conflict(format!(
                    "loan {loan} is being cancelled or deleted"
                )));
            }
            if held.contains(&(loan, Scope::Item(item))) {
                return Err(WorkflowError::Conflict(format!(
                    "stock item {item} on loan {loan} is already being processed"
                )));
            }
            Ok(())
        })
    }

    /// Claim the whole loan. Fails while any of its items is in flight.
    pub fn try_claim_loan(&self, loan: LoanId) -> Result<ClaimGuard, WorkflowError> {
        self.acquire(loan, Scope::Loan, |held| {
            if held.iter().any(|(l, _)| *l == loan) {
                return Err(WorkflowError::Conflict(format!(
                    "loan {loan} has an issue or return in progress"
                )));
            }
            Ok(())
        })
    }

    pub fn is_claimed(&self, loan: LoanId, item: StockItemId) -> bool {
        self.held
            .lock()
            .map(|h| h.contains(&(loan, Scope::Item(item))))
            .unwrap_or(false)
    }

    pub fn any_for_loan(&self, loan: LoanId) -> bool {
        self.held
            .lock()
            .map(|h| h.iter().any(|(l, _)| *l == loan))
            .unwrap_or(false)
    }

    fn acquire(
        &self,
        loan: LoanId,
        scope: Scope,
        admit: impl FnOnce(&HashSet<Key>) -> Result<(), WorkflowError>,
    ) -> Result<ClaimGuard, WorkflowError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| WorkflowError::Store("claim set poisoned".to_string()))?;
        admit(&held)?;
        held.insert((loan, scope));
        Ok(ClaimGuard {
            held: self.held.clone(),
            key: (loan, scope),
        })
    }
}

/// Releases its claim when dropped.
#[derive(Debug)]
pub struct ClaimGuard {
    held: Arc<Mutex<HashSet<Key>>>,
    key: Key,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockloan_core::AggregateId;

    fn loan() -> LoanId {
        LoanId::new(AggregateId::new())
    }

    fn item() -> StockItemId {
        StockItemId::new(AggregateId::new())
    }

    #[test]
    fn second_claim_conflicts_until_first_is_dropped() {
        let claims = InFlightClaims::new();
        let (loan, item) = (loan(), item());

        let guard = claims.try_claim(loan, item).unwrap();
        assert!(matches!(claims.try_claim(loan, item), Err(WorkflowError::Conflict(_))));
        assert!(claims.is_claimed(loan, item));

        drop(guard);
        assert!(!claims.is_claimed(loan, item));
        assert!(claims.try_claim(loan, item).is_ok());
    }

    #[test]
    fn claims_are_per_pair() {
        let claims = InFlightClaims::new();
        let item = item();
        let _a = claims.try_claim(loan(), item).unwrap();
        assert!(claims.try_claim(loan(), item).is_ok());
    }

    #[test]
    fn loan_claim_waits_for_items_in_flight() {
        let claims = InFlightClaims::new();
        let (loan, item) = (loan(), item());

        let guard = claims.try_claim(loan, item).unwrap();
        assert!(claims.any_for_loan(loan));
        assert!(matches!(claims.try_claim_loan(loan), Err(WorkflowError::Conflict(_))));

        drop(guard);
        assert!(!claims.any_for_loan(loan));
        assert!(claims.try_claim_loan(loan).is_ok());
    }

    #[test]
    fn loan_claim_blocks_item_claims_of_that_loan_only() {
        let claims = InFlightClaims::new();
        let (loan, other, item) = (loan(), loan(), item());

        let guard = claims.try_claim_loan(loan).unwrap();
        assert!(matches!(claims.try_claim(loan, item), Err(WorkflowError::Conflict(_))));
        assert!(matches!(claims.try_claim_loan(loan), Err(WorkflowError::Conflict(_))));
        assert!(claims.try_claim(other, item).is_ok());

        drop(guard);
        assert!(claims.try_claim(loan, item).is_ok());
    }
}
