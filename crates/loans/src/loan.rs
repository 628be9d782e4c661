use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockloan_core::{
    Aggregate, AggregateId, AggregateRoot, CustomerId, DomainError, LocationId, UserId,
};
use stockloan_events::Event;
use stockloan_inventory::StockItemId;

use crate::item::{LoanedItem, LoanedItemStatus};
use crate::status::LoanStatus;

/// Stream type name for loan aggregates.
pub const LOAN_AGGREGATE_TYPE: &str = "loan";

/// Loan identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanId(pub AggregateId);

impl LoanId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LoanId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for LoanId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Aggregate root: Loan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loan {
    id: LoanId,
    customer: Option<CustomerId>,
    loan_date: Option<DateTime<Utc>>,
    due_date: Option<NaiveDate>,
    reference: String,
    notes: String,
    created_by: Option<UserId>,
    updated_at: Option<DateTime<Utc>>,
    items: Vec<LoanedItem>,
    cancelled_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    deleted: bool,
    version: u64,
    created: bool,
}

impl Loan {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: LoanId) -> Self {
        Self {
            id,
            customer: None,
            loan_date: None,
            due_date: None,
            reference: String::new(),
            notes: String::new(),
            created_by: None,
            updated_at: None,
            items: Vec::new(),
            cancelled_at: None,
            closed_at: None,
            deleted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> LoanId {
        self.id
    }

    /// Created and not deleted.
    pub fn exists(&self) -> bool {
        self.created && !self.deleted
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn customer(&self) -> Option<CustomerId> {
        self.customer
    }

    pub fn loan_date(&self) -> Option<DateTime<Utc>> {
        self.loan_date
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn items(&self) -> &[LoanedItem] {
        &self.items
    }

    /// The latest entry for a stock item (the only one that can still be open).
    pub fn item_for(&self, stock_item: StockItemId) -> Option<&LoanedItem> {
        self.items.iter().rev().find(|i| i.stock_item == stock_item)
    }

    pub fn open_items(&self) -> impl Iterator<Item = &LoanedItem> {
        self.items.iter().filter(|i| i.is_open())
    }

    /// Derived status (never `Overdue`; see [`Loan::status_on`]).
    pub fn status(&self) -> LoanStatus {
        LoanStatus::derive(
            self.cancelled_at.is_some(),
            self.closed_at.is_some(),
            self.items.iter().map(|i| i.status),
        )
    }

    /// Status as seen on `today`, refining ACTIVE to OVERDUE.
    pub fn status_on(&self, today: NaiveDate) -> LoanStatus {
        match self.due_date {
            Some(due) => self.status().on_date(due, today),
            None => self.status(),
        }
    }

    /// ACTIVE and the due date strictly before `today`.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status_on(today) == LoanStatus::Overdue
    }

    /// Date the loan fully closed: non-null iff the status is RETURNED.
    pub fn return_date(&self) -> Option<NaiveDate> {
        if self.status() != LoanStatus::Returned {
            return None;
        }
        if self.items.is_empty() {
            return self.closed_at.map(|t| t.date_naive());
        }
        self.items
            .iter()
            .filter_map(|i| i.returned_at)
            .max()
            .map(|t| t.date_naive())
    }

    /// True once any unit of this loan has been physically relocated.
    pub fn has_relocated_items(&self) -> bool {
        self.items
            .iter()
            .any(|i| i.status != LoanedItemStatus::Pending)
    }
}

impl AggregateRoot for Loan {
    type Id = LoanId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateLoan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLoan {
    pub loan_id: LoanId,
    pub customer: CustomerId,
    pub due_date: NaiveDate,
    pub reference: String,
    pub notes: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem. Cross-loan exclusivity is checked by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub loan_id: LoanId,
    pub stock_item: StockItemId,
    pub added_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IssueItem. Records a relocation to the loan location that
/// already succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueItem {
    pub loan_id: LoanId,
    pub stock_item: StockItemId,
    pub location: LocationId,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnItem. Records a relocation back into stock that already
/// succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItem {
    pub loan_id: LoanId,
    pub stock_item: StockItemId,
    pub destination: LocationId,
    pub returned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AmendLoan. `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendLoan {
    pub loan_id: LoanId,
    pub due_date: Option<NaiveDate>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub amended_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelLoan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelLoan {
    pub loan_id: LoanId,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseLoan (only for loans without items).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseLoan {
    pub loan_id: LoanId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteLoan (cascades to the loan's items).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteLoan {
    pub loan_id: LoanId,
    pub deleted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanCommand {
    CreateLoan(CreateLoan),
    AddItem(AddItem),
    IssueItem(IssueItem),
    ReturnItem(ReturnItem),
    AmendLoan(AmendLoan),
    CancelLoan(CancelLoan),
    CloseLoan(CloseLoan),
    DeleteLoan(DeleteLoan),
}

impl LoanCommand {
    pub fn loan_id(&self) -> LoanId {
        match self {
            LoanCommand::CreateLoan(c) => c.loan_id,
            LoanCommand::AddItem(c) => c.loan_id,
            LoanCommand::IssueItem(c) => c.loan_id,
            LoanCommand::ReturnItem(c) => c.loan_id,
            LoanCommand::AmendLoan(c) => c.loan_id,
            LoanCommand::CancelLoan(c) => c.loan_id,
            LoanCommand::CloseLoan(c) => c.loan_id,
            LoanCommand::DeleteLoan(c) => c.loan_id,
        }
    }
}

/// Event: LoanCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanCreated {
    pub loan_id: LoanId,
    pub customer: CustomerId,
    pub due_date: NaiveDate,
    pub reference: String,
    pub notes: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub loan_id: LoanId,
    pub line_no: u32,
    pub stock_item: StockItemId,
    pub added_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemIssued {
    pub loan_id: LoanId,
    pub line_no: u32,
    pub stock_item: StockItemId,
    pub location: LocationId,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemReturned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReturned {
    pub loan_id: LoanId,
    pub line_no: u32,
    pub stock_item: StockItemId,
    pub destination: LocationId,
    pub returned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LoanAmended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanAmended {
    pub loan_id: LoanId,
    pub due_date: Option<NaiveDate>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub amended_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LoanCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanCancelled {
    pub loan_id: LoanId,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LoanClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanClosed {
    pub loan_id: LoanId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LoanDeleted (tombstone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanDeleted {
    pub loan_id: LoanId,
    pub deleted_by: UserId,
    /// Items that were still open (PENDING) when the loan was deleted.
    pub released: Vec<StockItemId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanEvent {
    LoanCreated(LoanCreated),
    ItemAdded(ItemAdded),
    ItemIssued(ItemIssued),
    ItemReturned(ItemReturned),
    LoanAmended(LoanAmended),
    LoanCancelled(LoanCancelled),
    LoanClosed(LoanClosed),
    LoanDeleted(LoanDeleted),
}

impl LoanEvent {
    pub fn loan_id(&self) -> LoanId {
        match self {
            LoanEvent::LoanCreated(e) => e.loan_id,
            LoanEvent::ItemAdded(e) => e.loan_id,
            LoanEvent::ItemIssued(e) => e.loan_id,
            LoanEvent::ItemReturned(e) => e.loan_id,
            LoanEvent::LoanAmended(e) => e.loan_id,
            LoanEvent::LoanCancelled(e) => e.loan_id,
            LoanEvent::LoanClosed(e) => e.loan_id,
            LoanEvent::LoanDeleted(e) => e.loan_id,
        }
    }
}

impl Event for LoanEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LoanEvent::LoanCreated(_) => "loan.created",
            LoanEvent::ItemAdded(_) => "loan.item_added",
            LoanEvent::ItemIssued(_) => "loan.item_issued",
            LoanEvent::ItemReturned(_) => "loan.item_returned",
            LoanEvent::LoanAmended(_) => "loan.amended",
            LoanEvent::LoanCancelled(_) => "loan.cancelled",
            LoanEvent::LoanClosed(_) => "loan.closed",
            LoanEvent::LoanDeleted(_) => "loan.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LoanEvent::LoanCreated(e) => e.occurred_at,
            LoanEvent::ItemAdded(e) => e.occurred_at,
            LoanEvent::ItemIssued(e) => e.occurred_at,
            LoanEvent::ItemReturned(e) => e.occurred_at,
            LoanEvent::LoanAmended(e) => e.occurred_at,
            LoanEvent::LoanCancelled(e) => e.occurred_at,
            LoanEvent::LoanClosed(e) => e.occurred_at,
            LoanEvent::LoanDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Loan {
    type Command = LoanCommand;
    type Event = LoanEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LoanEvent::LoanCreated(e) => {
                self.id = e.loan_id;
                self.customer = Some(e.customer);
                self.loan_date = Some(e.occurred_at);
                self.due_date = Some(e.due_date);
                self.reference = e.reference.clone();
                self.notes = e.notes.clone();
                self.created_by = Some(e.created_by);
                self.items.clear();
                self.created = true;
            }
            LoanEvent::ItemAdded(e) => {
                self.items
                    .push(LoanedItem::new(e.line_no, e.stock_item, e.occurred_at));
            }
            LoanEvent::ItemIssued(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.line_no == e.line_no) {
                    item.mark_issued(e.occurred_at);
                }
            }
            LoanEvent::ItemReturned(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.line_no == e.line_no) {
                    item.mark_returned(e.occurred_at, e.destination);
                }
            }
            LoanEvent::LoanAmended(e) => {
                if let Some(due) = e.due_date {
                    self.due_date = Some(due);
                }
                if let Some(reference) = &e.reference {
                    self.reference = reference.clone();
                }
                if let Some(notes) = &e.notes {
                    self.notes = notes.clone();
                }
            }
            LoanEvent::LoanCancelled(e) => {
                self.cancelled_at = Some(e.occurred_at);
            }
            LoanEvent::LoanClosed(e) => {
                self.closed_at = Some(e.occurred_at);
            }
            LoanEvent::LoanDeleted(_) => {
                self.deleted = true;
            }
        }

        self.updated_at = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LoanCommand::CreateLoan(cmd) => self.handle_create(cmd),
            LoanCommand::AddItem(cmd) => self.handle_add_item(cmd),
            LoanCommand::IssueItem(cmd) => self.handle_issue(cmd),
            LoanCommand::ReturnItem(cmd) => self.handle_return(cmd),
            LoanCommand::AmendLoan(cmd) => self.handle_amend(cmd),
            LoanCommand::CancelLoan(cmd) => self.handle_cancel(cmd),
            LoanCommand::CloseLoan(cmd) => self.handle_close(cmd),
            LoanCommand::DeleteLoan(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Loan {
    fn ensure_exists(&self, loan_id: LoanId) -> Result<(), DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found(format!("loan {loan_id}")));
        }
        if self.id != loan_id {
            return Err(DomainError::validation("loan_id mismatch"));
        }
        Ok(())
    }

    fn ensure_not_terminal(&self, action: &str) -> Result<(), DomainError> {
        let status = self.status();
        if status.is_terminal() {
            return Err(DomainError::invalid_state(
                status,
                format!("cannot {action} a {} loan", status.as_str().to_lowercase()),
            ));
        }
        Ok(())
    }

    fn target_item(&self, stock_item: StockItemId) -> Result<&LoanedItem, DomainError> {
        self.item_for(stock_item).ok_or_else(|| {
            DomainError::not_found(format!("stock item {stock_item} on loan {}", self.id))
        })
    }

    fn handle_create(&self, cmd: &CreateLoan) -> Result<Vec<LoanEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("loan already exists"));
        }
        if cmd.due_date < cmd.occurred_at.date_naive() {
            return Err(DomainError::validation(format!(
                "due date {} is before the loan date {}",
                cmd.due_date,
                cmd.occurred_at.date_naive()
            )));
        }

        Ok(vec![LoanEvent::LoanCreated(LoanCreated {
            loan_id: cmd.loan_id,
            customer: cmd.customer,
            due_date: cmd.due_date,
            reference: cmd.reference.trim().to_string(),
            notes: cmd.notes.clone(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_exists(cmd.loan_id)?;
        self.ensure_not_terminal("add items to")?;

        if self
            .item_for(cmd.stock_item)
            .is_some_and(LoanedItem::is_open)
        {
            return Err(DomainError::constraint(format!(
                "stock item {} is already open on loan {}",
                cmd.stock_item, self.id
            )));
        }

        let next_line_no = (self.items.len() as u32) + 1;

        Ok(vec![LoanEvent::ItemAdded(ItemAdded {
            loan_id: cmd.loan_id,
            line_no: next_line_no,
            stock_item: cmd.stock_item,
            added_by: cmd.added_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_issue(&self, cmd: &IssueItem) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_exists(cmd.loan_id)?;
        self.ensure_not_terminal("issue items of")?;

        let item = self.target_item(cmd.stock_item)?;
        item.ensure_can_issue()?;

        Ok(vec![LoanEvent::ItemIssued(ItemIssued {
            loan_id: cmd.loan_id,
            line_no: item.line_no,
            stock_item: cmd.stock_item,
            location: cmd.location,
            issued_by: cmd.issued_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &ReturnItem) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_exists(cmd.loan_id)?;

        let item = self.target_item(cmd.stock_item)?;
        item.ensure_can_return()?;

        Ok(vec![LoanEvent::ItemReturned(ItemReturned {
            loan_id: cmd.loan_id,
            line_no: item.line_no,
            stock_item: cmd.stock_item,
            destination: cmd.destination,
            returned_by: cmd.returned_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_amend(&self, cmd: &AmendLoan) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_exists(cmd.loan_id)?;
        self.ensure_not_terminal("amend")?;

        if cmd.due_date.is_none() && cmd.reference.is_none() && cmd.notes.is_none() {
            return Err(DomainError::validation("nothing to amend"));
        }
        if let (Some(due), Some(loan_date)) = (cmd.due_date, self.loan_date) {
            if due < loan_date.date_naive() {
                return Err(DomainError::validation(format!(
                    "due date {due} is before the loan date {}",
                    loan_date.date_naive()
                )));
            }
        }

        Ok(vec![LoanEvent::LoanAmended(LoanAmended {
            loan_id: cmd.loan_id,
            due_date: cmd.due_date,
            reference: cmd.reference.as_ref().map(|r| r.trim().to_string()),
            notes: cmd.notes.clone(),
            amended_by: cmd.amended_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelLoan) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_exists(cmd.loan_id)?;
        self.ensure_not_terminal("cancel")?;

        if self.has_relocated_items() {
            return Err(DomainError::invalid_state(
                self.status(),
                "cannot cancel a loan once any item has been issued",
            ));
        }

        Ok(vec![LoanEvent::LoanCancelled(LoanCancelled {
            loan_id: cmd.loan_id,
            cancelled_by: cmd.cancelled_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &CloseLoan) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_exists(cmd.loan_id)?;
        self.ensure_not_terminal("close")?;

        if !self.items.is_empty() {
            return Err(DomainError::invalid_state(
                self.status(),
                "only loans without items can be closed explicitly",
            ));
        }

        Ok(vec![LoanEvent::LoanClosed(LoanClosed {
            loan_id: cmd.loan_id,
            closed_by: cmd.closed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteLoan) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_exists(cmd.loan_id)?;

        if self
            .items
            .iter()
            .any(|i| i.status == LoanedItemStatus::OnLoan)
        {
            return Err(DomainError::invalid_state(
                self.status(),
                "cannot delete a loan while items are physically on loan",
            ));
        }

        Ok(vec![LoanEvent::LoanDeleted(LoanDeleted {
            loan_id: cmd.loan_id,
            deleted_by: cmd.deleted_by,
            released: self.open_items().map(|i| i.stock_item).collect(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use stockloan_events::execute;

    fn test_loan_id() -> LoanId {
        LoanId::new(AggregateId::new())
    }

    fn test_stock_item() -> StockItemId {
        StockItemId::new(AggregateId::new())
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn created_loan(due: NaiveDate, now: DateTime<Utc>) -> Loan {
        let loan_id = test_loan_id();
        let mut loan = Loan::empty(loan_id);
        execute(
            &mut loan,
            &LoanCommand::CreateLoan(CreateLoan {
                loan_id,
                customer: CustomerId::new(),
                due_date: due,
                reference: " PO-17 ".to_string(),
                notes: String::new(),
                created_by: UserId::new(),
                occurred_at: now,
            }),
        )
        .unwrap();
        loan
    }

    fn add(loan: &mut Loan, stock_item: StockItemId, now: DateTime<Utc>) -> Result<Vec<LoanEvent>, DomainError> {
        let cmd = LoanCommand::AddItem(AddItem {
            loan_id: loan.id_typed(),
            stock_item,
            added_by: UserId::new(),
            occurred_at: now,
        });
        execute(loan, &cmd)
    }

    fn issue(loan: &mut Loan, stock_item: StockItemId, now: DateTime<Utc>) -> Result<Vec<LoanEvent>, DomainError> {
        let cmd = LoanCommand::IssueItem(IssueItem {
            loan_id: loan.id_typed(),
            stock_item,
            location: LocationId::new(),
            issued_by: UserId::new(),
            occurred_at: now,
        });
        execute(loan, &cmd)
    }

    fn give_back(loan: &mut Loan, stock_item: StockItemId, now: DateTime<Utc>) -> Result<Vec<LoanEvent>, DomainError> {
        let cmd = LoanCommand::ReturnItem(ReturnItem {
            loan_id: loan.id_typed(),
            stock_item,
            destination: LocationId::new(),
            returned_by: UserId::new(),
            occurred_at: now,
        });
        execute(loan, &cmd)
    }

    fn cancel(loan: &mut Loan, now: DateTime<Utc>) -> Result<Vec<LoanEvent>, DomainError> {
        let cmd = LoanCommand::CancelLoan(CancelLoan {
            loan_id: loan.id_typed(),
            cancelled_by: UserId::new(),
            occurred_at: now,
        });
        execute(loan, &cmd)
    }

    fn current_of(err: DomainError) -> String {
        match err {
            DomainError::InvalidState { current, .. } => current,
            other => panic!("expected InvalidState, got {other:?}"),
        }
    }

    #[test]
    fn create_loan_starts_pending_without_return_date() {
        let loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));

        assert!(loan.exists());
        assert_eq!(loan.status(), LoanStatus::Pending);
        assert_eq!(loan.return_date(), None);
        assert_eq!(loan.reference(), "PO-17");
        assert_eq!(loan.loan_date(), Some(at(2025, 1, 2)));
        assert_eq!(loan.version(), 1);
    }

    #[test]
    fn due_date_before_loan_date_is_rejected() {
        let loan_id = test_loan_id();
        let err = Loan::empty(loan_id)
            .handle(&LoanCommand::CreateLoan(CreateLoan {
                loan_id,
                customer: CustomerId::new(),
                due_date: date(2025, 1, 1),
                reference: String::new(),
                notes: String::new(),
                created_by: UserId::new(),
                occurred_at: at(2025, 1, 2),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn issue_then_return_walks_loan_through_active_to_returned() {
        let mut loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        let a = test_stock_item();

        add(&mut loan, a, at(2025, 1, 2)).unwrap();
        assert_eq!(loan.items()[0].status, LoanedItemStatus::Pending);
        assert_eq!(loan.status(), LoanStatus::Pending);

        issue(&mut loan, a, at(2025, 1, 3)).unwrap();
        assert_eq!(loan.items()[0].status, LoanedItemStatus::OnLoan);
        assert_eq!(loan.status(), LoanStatus::Active);

        give_back(&mut loan, a, at(2025, 1, 8)).unwrap();
        assert_eq!(loan.items()[0].status, LoanedItemStatus::Returned);
        assert_eq!(loan.status(), LoanStatus::Returned);
        assert_eq!(loan.return_date(), Some(date(2025, 1, 8)));
    }

    #[test]
    fn return_date_is_when_the_last_item_came_back() {
        let mut loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        let (a, b) = (test_stock_item(), test_stock_item());
        add(&mut loan, a, at(2025, 1, 2)).unwrap();
        add(&mut loan, b, at(2025, 1, 2)).unwrap();
        issue(&mut loan, a, at(2025, 1, 3)).unwrap();
        issue(&mut loan, b, at(2025, 1, 3)).unwrap();

        give_back(&mut loan, a, at(2025, 1, 5)).unwrap();
        assert_eq!(loan.status(), LoanStatus::Active);
        assert_eq!(loan.return_date(), None);

        give_back(&mut loan, b, at(2025, 1, 9)).unwrap();
        assert_eq!(loan.status(), LoanStatus::Returned);
        assert_eq!(loan.return_date(), Some(date(2025, 1, 9)));
    }

    #[test]
    fn issuing_an_item_twice_reports_current_status() {
        let mut loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        let a = test_stock_item();
        add(&mut loan, a, at(2025, 1, 2)).unwrap();
        issue(&mut loan, a, at(2025, 1, 3)).unwrap();

        let err = issue(&mut loan, a, at(2025, 1, 3)).unwrap_err();
        assert_eq!(current_of(err), "ON_LOAN");
    }

    #[test]
    fn unknown_item_is_not_found() {
        let mut loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        let err = issue(&mut loan, test_stock_item(), at(2025, 1, 3)).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn same_item_cannot_be_open_twice_on_one_loan() {
        let mut loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        let a = test_stock_item();
        add(&mut loan, a, at(2025, 1, 2)).unwrap();

        let err = add(&mut loan, a, at(2025, 1, 2)).unwrap_err();
        assert!(matches!(err, DomainError::ConstraintViolation(_)));
        assert_eq!(loan.items().len(), 1);
    }

    #[test]
    fn cancel_is_allowed_only_before_any_relocation() {
        let mut pending = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        add(&mut pending, test_stock_item(), at(2025, 1, 2)).unwrap();
        cancel(&mut pending, at(2025, 1, 3)).unwrap();
        assert_eq!(pending.status(), LoanStatus::Cancelled);

        let mut active = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        let a = test_stock_item();
        add(&mut active, a, at(2025, 1, 2)).unwrap();
        issue(&mut active, a, at(2025, 1, 3)).unwrap();
        let err = cancel(&mut active, at(2025, 1, 4)).unwrap_err();
        assert_eq!(current_of(err), "ACTIVE");
        assert_eq!(active.status(), LoanStatus::Active);
    }

    #[test]
    fn cancelled_loan_rejects_further_work() {
        let mut loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        let a = test_stock_item();
        add(&mut loan, a, at(2025, 1, 2)).unwrap();
        cancel(&mut loan, at(2025, 1, 3)).unwrap();

        assert_eq!(current_of(issue(&mut loan, a, at(2025, 1, 4)).unwrap_err()), "CANCELLED");
        assert_eq!(
            current_of(add(&mut loan, test_stock_item(), at(2025, 1, 4)).unwrap_err()),
            "CANCELLED"
        );
        assert_eq!(current_of(cancel(&mut loan, at(2025, 1, 4)).unwrap_err()), "CANCELLED");
    }

    #[test]
    fn returned_loan_accepts_no_new_items() {
        let mut loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        let a = test_stock_item();
        add(&mut loan, a, at(2025, 1, 2)).unwrap();
        issue(&mut loan, a, at(2025, 1, 3)).unwrap();
        give_back(&mut loan, a, at(2025, 1, 4)).unwrap();

        let err = add(&mut loan, test_stock_item(), at(2025, 1, 5)).unwrap_err();
        assert_eq!(current_of(err), "RETURNED");
    }

    #[test]
    fn empty_loan_can_be_closed_and_gets_a_return_date() {
        let mut loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        let cmd = LoanCommand::CloseLoan(CloseLoan {
            loan_id: loan.id_typed(),
            closed_by: UserId::new(),
            occurred_at: at(2025, 1, 4),
        });
        execute(&mut loan, &cmd).unwrap();

        assert_eq!(loan.status(), LoanStatus::Returned);
        assert_eq!(loan.return_date(), Some(date(2025, 1, 4)));
    }

    #[test]
    fn loan_with_items_cannot_be_closed_explicitly() {
        let mut loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        add(&mut loan, test_stock_item(), at(2025, 1, 2)).unwrap();
        let err = loan
            .handle(&LoanCommand::CloseLoan(CloseLoan {
                loan_id: loan.id_typed(),
                closed_by: UserId::new(),
                occurred_at: at(2025, 1, 4),
            }))
            .unwrap_err();
        assert_eq!(current_of(err), "PENDING");
    }

    #[test]
    fn amend_moves_due_date_until_terminal() {
        let mut loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        let cmd = LoanCommand::AmendLoan(AmendLoan {
            loan_id: loan.id_typed(),
            due_date: Some(date(2025, 2, 1)),
            reference: None,
            notes: Some("extended by phone".to_string()),
            amended_by: UserId::new(),
            occurred_at: at(2025, 1, 5),
        });
        execute(&mut loan, &cmd).unwrap();
        assert_eq!(loan.due_date(), Some(date(2025, 2, 1)));
        assert_eq!(loan.notes(), "extended by phone");
        assert_eq!(loan.reference(), "PO-17");
        assert_eq!(loan.updated_at(), Some(at(2025, 1, 5)));

        cancel(&mut loan, at(2025, 1, 6)).unwrap();
        assert_eq!(current_of(loan.handle(&cmd).unwrap_err()), "CANCELLED");
    }

    #[test]
    fn delete_is_refused_while_items_are_out() {
        let mut loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        let (a, b) = (test_stock_item(), test_stock_item());
        add(&mut loan, a, at(2025, 1, 2)).unwrap();
        add(&mut loan, b, at(2025, 1, 2)).unwrap();
        issue(&mut loan, a, at(2025, 1, 3)).unwrap();

        let delete = LoanCommand::DeleteLoan(DeleteLoan {
            loan_id: loan.id_typed(),
            deleted_by: UserId::new(),
            occurred_at: at(2025, 1, 4),
        });
        assert_eq!(current_of(loan.handle(&delete).unwrap_err()), "ACTIVE");

        give_back(&mut loan, a, at(2025, 1, 5)).unwrap();
        let events = execute(&mut loan, &delete).unwrap();
        match &events[0] {
            LoanEvent::LoanDeleted(e) => assert_eq!(e.released, vec![b]),
            other => panic!("expected LoanDeleted, got {other:?}"),
        }
        assert!(!loan.exists());
        let err = issue(&mut loan, b, at(2025, 1, 6)).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn overdue_is_strict_and_clears_on_return() {
        let mut loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        let a = test_stock_item();
        add(&mut loan, a, at(2025, 1, 2)).unwrap();
        issue(&mut loan, a, at(2025, 1, 3)).unwrap();

        assert!(!loan.is_overdue(date(2025, 1, 10)));
        assert!(loan.is_overdue(date(2025, 1, 11)));
        assert_eq!(loan.status_on(date(2025, 1, 11)), LoanStatus::Overdue);

        give_back(&mut loan, a, at(2025, 1, 20)).unwrap();
        assert!(!loan.is_overdue(date(2025, 1, 21)));
        assert_eq!(loan.status_on(date(2025, 1, 21)), LoanStatus::Returned);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let mut loan = created_loan(date(2025, 1, 10), at(2025, 1, 2));
        let a = test_stock_item();
        add(&mut loan, a, at(2025, 1, 2)).unwrap();
        let before = loan.clone();

        let cmd = LoanCommand::IssueItem(IssueItem {
            loan_id: loan.id_typed(),
            stock_item: a,
            location: LocationId::new(),
            issued_by: UserId::new(),
            occurred_at: at(2025, 1, 3),
        });
        let first = loan.handle(&cmd).unwrap();
        let second = loan.handle(&cmd).unwrap();

        assert_eq!(loan, before);
        assert_eq!(first, second);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize),
        Issue(usize),
        Return(usize),
        Cancel,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..4).prop_map(Op::Add),
            (0usize..4).prop_map(Op::Issue),
            (0usize..4).prop_map(Op::Return),
            Just(Op::Cancel),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Whatever the sequence of intents, item statuses only move forward,
        /// the loan status equals the derivation from its items, and overdue
        /// follows the ACTIVE-and-past-due rule.
        #[test]
        fn lifecycle_invariants_hold_for_any_intent_sequence(
            ops in prop::collection::vec(op(), 0..40),
            probe_offset in -5i64..15,
        ) {
            let start = at(2025, 1, 2);
            let due = date(2025, 1, 10);
            let pool: Vec<StockItemId> = (0..4).map(|_| test_stock_item()).collect();
            let mut loan = created_loan(due, start);
            let mut cancelled = false;

            for (step, op) in ops.into_iter().enumerate() {
                let now = start + Duration::hours(step as i64);
                let before: Vec<(u32, LoanedItemStatus)> =
                    loan.items().iter().map(|i| (i.line_no, i.status)).collect();

                let result = match op {
                    Op::Add(i) => add(&mut loan, pool[i], now),
                    Op::Issue(i) => issue(&mut loan, pool[i], now),
                    Op::Return(i) => give_back(&mut loan, pool[i], now),
                    Op::Cancel => cancel(&mut loan, now),
                };
                if matches!(op, Op::Cancel) && result.is_ok() {
                    cancelled = true;
                }

                for (line_no, old) in before {
                    let new = loan.items().iter().find(|i| i.line_no == line_no).unwrap().status;
                    prop_assert!(new == old || old.can_transition_to(new), "{old} -> {new}");
                }

                for stock_item in &pool {
                    let open = loan.items().iter().filter(|i| i.stock_item == *stock_item && i.is_open()).count();
                    prop_assert!(open <= 1);
                }

                let expected = LoanStatus::derive(cancelled, false, loan.items().iter().map(|i| i.status));
                prop_assert_eq!(loan.status(), expected);
                prop_assert_eq!(loan.return_date().is_some(), loan.status() == LoanStatus::Returned);

                let probe = due + Duration::days(probe_offset);
                prop_assert_eq!(
                    loan.is_overdue(probe),
                    loan.status() == LoanStatus::Active && due < probe
                );
            }
        }
    }
}
