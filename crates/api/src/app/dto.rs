use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockloan_core::{CustomerId, LocationId, UserId};
use stockloan_infra::projections::{LoanSortKey, LoanSummary};
use stockloan_inventory::{StockItemId, StockLocation};
use stockloan_loans::{Loan, LoanId, LoanStatus, LoanedItem, LoanedItemStatus};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateLoanRequest {
    pub customer_id: String,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Deserialize)]
pub struct AmendLoanRequest {
    pub due_date: Option<NaiveDate>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub stock_item_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReturnItemRequest {
    pub location_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListLoansParams {
    pub customer_id: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub overdue: bool,
    pub sort: Option<LoanSortKey>,
    /// `asc` (default) or `desc`.
    pub order: Option<String>,
    /// Evaluation date for OVERDUE; defaults to the server's today.
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OverdueParams {
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLocationRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterStockItemRequest {
    pub part: String,
    pub serial: Option<String>,
    pub location_id: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct LoanedItemResponse {
    pub line_no: u32,
    pub stock_item_id: StockItemId,
    pub status: LoanedItemStatus,
    pub added_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub returned_to: Option<LocationId>,
}

impl From<&LoanedItem> for LoanedItemResponse {
    fn from(item: &LoanedItem) -> Self {
        Self {
            line_no: item.line_no,
            stock_item_id: item.stock_item,
            status: item.status,
            added_at: item.added_at,
            issued_at: item.issued_at,
            returned_at: item.returned_at,
            returned_to: item.returned_to,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoanResponse {
    pub id: LoanId,
    pub customer_id: Option<CustomerId>,
    pub loan_date: Option<DateTime<Utc>>,
    pub due_date: Option<NaiveDate>,
    pub return_date: Option<NaiveDate>,
    pub reference: String,
    pub notes: String,
    pub created_by: Option<UserId>,
    /// Effective status on the evaluation date (may be OVERDUE).
    pub status: LoanStatus,
    pub items: Vec<LoanedItemResponse>,
}

impl LoanResponse {
    pub fn from_loan(loan: &Loan, today: NaiveDate) -> Self {
        Self {
            id: loan.id_typed(),
            customer_id: loan.customer(),
            loan_date: loan.loan_date(),
            due_date: loan.due_date(),
            return_date: loan.return_date(),
            reference: loan.reference().to_string(),
            notes: loan.notes().to_string(),
            created_by: loan.created_by(),
            status: loan.status_on(today),
            items: loan.items().iter().map(LoanedItemResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoanSummaryResponse {
    pub id: LoanId,
    pub customer_id: CustomerId,
    pub loan_date: DateTime<Utc>,
    pub due_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
    pub reference: String,
    pub status: LoanStatus,
    pub item_count: usize,
    pub open_item_count: usize,
}

impl LoanSummaryResponse {
    pub fn from_summary(summary: &LoanSummary, today: NaiveDate) -> Self {
        Self {
            id: summary.loan_id,
            customer_id: summary.customer,
            loan_date: summary.loan_date,
            due_date: summary.due_date,
            return_date: summary.return_date(),
            reference: summary.reference.clone(),
            status: summary.status_on(today),
            item_count: summary.lines.len(),
            open_item_count: summary.open_items().count(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StockItemResponse {
    pub id: StockItemId,
    pub part: String,
    pub serial: Option<String>,
    pub location_id: Option<LocationId>,
    pub move_count: u32,
}

#[derive(Debug, Serialize)]
pub struct LocationResponse {
    pub id: LocationId,
    pub name: String,
}

impl From<StockLocation> for LocationResponse {
    fn from(location: StockLocation) -> Self {
        Self {
            id: location.id,
            name: location.name,
        }
    }
}

// -------------------------
// Parsing helpers
// -------------------------

/// Parse a path or body id, answering 400 with the kind of id on failure.
pub fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, axum::response::Response> {
    raw.parse().map_err(|_| errors::invalid_id(what))
}

pub fn parse_status(raw: &str) -> Result<LoanStatus, axum::response::Response> {
    raw.parse().map_err(|e: stockloan_core::DomainError| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "validation_error",
            e.to_string(),
        )
    })
}

pub fn parse_descending(order: Option<&str>) -> Result<bool, axum::response::Response> {
    match order.map(|o| o.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(o) if o == "asc" => Ok(false),
        Some(o) if o == "desc" => Ok(true),
        Some(_) => Err(errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "validation_error",
            "order must be one of: asc, desc",
        )),
    }
}
