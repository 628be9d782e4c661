//! Aggregate loan status and its derivation from item statuses.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::item::LoanedItemStatus;

/// Loan-level lifecycle state.
///
/// Only `Cancelled` is an independent fact. Everything else is computed from
/// the item statuses, and `Overdue` is a read-time view of `Active` on a given
/// evaluation date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Pending,
    Active,
    Overdue,
    Returned,
    Cancelled,
}

impl LoanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoanStatus::Pending => "PENDING",
            LoanStatus::Active => "ACTIVE",
            LoanStatus::Overdue => "OVERDUE",
            LoanStatus::Returned => "RETURNED",
            LoanStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LoanStatus::Returned | LoanStatus::Cancelled)
    }

    /// Stored-state derivation (never yields `Overdue`).
    ///
    /// - cancelled wins
    /// - at least one item and all RETURNED, or explicitly closed while empty: RETURNED
    /// - any ON_LOAN: ACTIVE
    /// - otherwise (all PENDING, a PENDING/RETURNED mix, or empty): PENDING
    pub fn derive<I>(cancelled: bool, closed_empty: bool, items: I) -> Self
    where
        I: IntoIterator<Item = LoanedItemStatus>,
    {
        if cancelled {
            return LoanStatus::Cancelled;
        }

        let mut any = false;
        let mut all_returned = true;
        let mut any_on_loan = false;
        for status in items {
            any = true;
            all_returned &= status == LoanedItemStatus::Returned;
            any_on_loan |= status == LoanedItemStatus::OnLoan;
        }

        if (any && all_returned) || (!any && closed_empty) {
            LoanStatus::Returned
        } else if any_on_loan {
            LoanStatus::Active
        } else {
            LoanStatus::Pending
        }
    }

    /// Refine a derived status to `Overdue` when an active loan is past due.
    pub fn on_date(self, due_date: NaiveDate, today: NaiveDate) -> Self {
        if self == LoanStatus::Active && due_date < today {
            LoanStatus::Overdue
        } else {
            self
        }
    }
}

impl core::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for LoanStatus {
    type Err = stockloan_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(LoanStatus::Pending),
            "ACTIVE" => Ok(LoanStatus::Active),
            "OVERDUE" => Ok(LoanStatus::Overdue),
            "RETURNED" => Ok(LoanStatus::Returned),
            "CANCELLED" => Ok(LoanStatus::Cancelled),
            other => Err(stockloan_core::DomainError::validation(format!(
                "unknown loan status '{other}'"
            ))),
        }
    }
}
