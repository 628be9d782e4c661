//! Loan directory: the read model behind `listLoans` and `overdueLoans`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockloan_core::{AggregateId, CustomerId};
use stockloan_events::EventEnvelope;
use stockloan_inventory::StockItemId;
use stockloan_loans::{LOAN_AGGREGATE_TYPE, LoanEvent, LoanId, LoanStatus, LoanedItemStatus};

use crate::read_model::ReadStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanLineSummary {
    pub line_no: u32,
    pub stock_item: StockItemId,
    pub status: LoanedItemStatus,
    pub returned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanSummary {
    pub loan_id: LoanId,
    pub customer: CustomerId,
    pub loan_date: DateTime<Utc>,
    pub due_date: NaiveDate,
    pub reference: String,
    pub lines: Vec<LoanLineSummary>,
    pub cancelled: bool,
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl LoanSummary {
    pub fn status(&self) -> LoanStatus {
        LoanStatus::derive(
            self.cancelled,
            self.closed_at.is_some(),
            self.lines.iter().map(|l| l.status),
        )
    }

    pub fn status_on(&self, today: NaiveDate) -> LoanStatus {
        self.status().on_date(self.due_date, today)
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status_on(today) == LoanStatus::Overdue
    }

    pub fn return_date(&self) -> Option<NaiveDate> {
        if self.status() != LoanStatus::Returned {
            return None;
        }
        if self.lines.is_empty() {
            return self.closed_at.map(|t| t.date_naive());
        }
        self.lines
            .iter()
            .filter_map(|l| l.returned_at)
            .max()
            .map(|t| t.date_naive())
    }

    /// Items still holding their inventory unit. Items of a cancelled loan
    /// hold nothing.
    pub fn open_items(&self) -> impl Iterator<Item = StockItemId> + '_ {
        self.lines
            .iter()
            .filter(|l| !self.cancelled && l.status.is_open())
            .map(|l| l.stock_item)
    }

    fn line_mut(&mut self, line_no: u32) -> Option<&mut LoanLineSummary> {
        self.lines.iter_mut().find(|l| l.line_no == line_no)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanSortKey {
    #[default]
    LoanDate,
    DueDate,
    Customer,
}

/// Filter and ordering for directory listings. Status filtering uses the
/// effective status on `today`, so `Overdue` is a valid filter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanQuery {
    pub today: NaiveDate,
    pub customer: Option<CustomerId>,
    pub status: Option<LoanStatus>,
    pub overdue_only: bool,
    pub sort: LoanSortKey,
    pub descending: bool,
}

impl LoanQuery {
    pub fn on(today: NaiveDate) -> Self {
        Self {
            today,
            customer: None,
            status: None,
            overdue_only: false,
            sort: LoanSortKey::default(),
            descending: false,
        }
    }

    fn matches(&self, loan: &LoanSummary) -> bool {
        if self.customer.is_some_and(|c| c != loan.customer) {
            return false;
        }
        let effective = loan.status_on(self.today);
        if self.status.is_some_and(|s| s != effective) {
            return false;
        }
        !self.overdue_only || effective == LoanStatus::Overdue
    }

    fn compare(&self, a: &LoanSummary, b: &LoanSummary) -> Ordering {
        let primary = match self.sort {
            LoanSortKey::LoanDate => a.loan_date.cmp(&b.loan_date),
            LoanSortKey::DueDate => a.due_date.cmp(&b.due_date),
            LoanSortKey::Customer => a.customer.cmp(&b.customer),
        };
        let ord = primary.then_with(|| a.loan_id.cmp(&b.loan_id));
        if self.descending { ord.reverse() } else { ord }
    }
}

#[derive(Debug, Error)]
pub enum LoanDirectoryError {
    #[error("failed to deserialize loan event: {0}")]
    Deserialize(String),
    #[error("event loan_id does not match envelope aggregate_id")]
    StreamMismatch,
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Builds `LoanSummary` records from loan events.
///
/// Idempotent under at-least-once delivery: envelopes at or below the
/// per-stream cursor are ignored, gaps are rejected.
#[derive(Debug)]
pub struct LoanDirectoryProjection<S>
where
    S: ReadStore<LoanId, LoanSummary>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> LoanDirectoryProjection<S>
where
    S: ReadStore<LoanId, LoanSummary>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    fn cursor(&self, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => cursors.get(&aggregate_id).copied().unwrap_or(0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(aggregate_id, seq);
        }
    }

    pub fn get(&self, loan_id: &LoanId) -> Option<LoanSummary> {
        self.store.get(loan_id)
    }

    pub fn list(&self, query: &LoanQuery) -> Vec<LoanSummary> {
        let mut loans: Vec<LoanSummary> = self
            .store
            .list()
            .into_iter()
            .filter(|l| query.matches(l))
            .collect();
        loans.sort_by(|a, b| query.compare(a, b));
        loans
    }

    /// ACTIVE loans whose due date is strictly before `today`, earliest due first.
    pub fn overdue(&self, today: NaiveDate) -> Vec<LoanSummary> {
        let mut query = LoanQuery::on(today);
        query.overdue_only = true;
        query.sort = LoanSortKey::DueDate;
        self.list(&query)
    }

    /// Every (stock item, loan) pair where the item is still PENDING or ON_LOAN.
    pub fn open_items(&self) -> Vec<(StockItemId, LoanId)> {
        self.store
            .list()
            .iter()
            .flat_map(|l| l.open_items().map(move |item| (item, l.loan_id)))
            .collect()
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), LoanDirectoryError> {
        if envelope.aggregate_type() != LOAN_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.cursor(aggregate_id);
        if seq == 0 || (seq > last + 1) {
            return Err(LoanDirectoryError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }

        let ev: LoanEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| LoanDirectoryError::Deserialize(e.to_string()))?;
        if ev.loan_id().0 != aggregate_id {
            return Err(LoanDirectoryError::StreamMismatch);
        }

        self.apply_event(ev);
        self.update_cursor(aggregate_id, seq);
        Ok(())
    }

    fn apply_event(&self, ev: LoanEvent) {
        let loan_id = ev.loan_id();

        if let LoanEvent::LoanCreated(e) = &ev {
            self.store.upsert(
                loan_id,
                LoanSummary {
                    loan_id,
                    customer: e.customer,
                    loan_date: e.occurred_at,
                    due_date: e.due_date,
                    reference: e.reference.clone(),
                    lines: vec![],
                    cancelled: false,
                    closed_at: None,
                    updated_at: e.occurred_at,
                },
            );
            return;
        }
        if let LoanEvent::LoanDeleted(_) = &ev {
            self.store.remove(&loan_id);
            return;
        }

        // Later events for a loan the directory never saw are ignored.
        let Some(mut rm) = self.store.get(&loan_id) else {
            return;
        };

        match ev {
            LoanEvent::ItemAdded(e) => {
                rm.lines.push(LoanLineSummary {
                    line_no: e.line_no,
                    stock_item: e.stock_item,
                    status: LoanedItemStatus::Pending,
                    returned_at: None,
                });
                rm.updated_at = e.occurred_at;
            }
            LoanEvent::ItemIssued(e) => {
                if let Some(line) = rm.line_mut(e.line_no) {
                    line.status = LoanedItemStatus::OnLoan;
                }
                rm.updated_at = e.occurred_at;
            }
            LoanEvent::ItemReturned(e) => {
                if let Some(line) = rm.line_mut(e.line_no) {
                    line.status = LoanedItemStatus::Returned;
                    line.returned_at = Some(e.occurred_at);
                }
                rm.updated_at = e.occurred_at;
            }
            LoanEvent::LoanAmended(e) => {
                if let Some(due) = e.due_date {
                    rm.due_date = due;
                }
                if let Some(reference) = e.reference {
                    rm.reference = reference;
                }
                rm.updated_at = e.occurred_at;
            }
            LoanEvent::LoanCancelled(e) => {
                rm.cancelled = true;
                rm.updated_at = e.occurred_at;
            }
            LoanEvent::LoanClosed(e) => {
                rm.closed_at = Some(e.occurred_at);
                rm.updated_at = e.occurred_at;
            }
            LoanEvent::LoanCreated(_) | LoanEvent::LoanDeleted(_) => {}
        }

        self.store.upsert(loan_id, rm);
    }

    /// Drop all state and replay the given envelopes in stream order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), LoanDirectoryError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        self.store.clear();
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));
        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
