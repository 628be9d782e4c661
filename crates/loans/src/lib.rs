//! Loans domain module (event-sourced).
//!
//! Two state machines live here:
//! - [`item`]: one loaned unit, `PENDING -> ON_LOAN -> RETURNED`, forward only
//! - [`loan`]: the loan aggregate, whose status is derived from its items
//!   (see [`status`]) except for the explicit cancel/close/delete actions
//!
//! Everything is deterministic domain logic. Physical relocation happens in
//! the workflow layer *before* `IssueItem` / `ReturnItem` are handled here, so
//! these commands record facts the stock subsystem has already confirmed.

pub mod item;
pub mod loan;
pub mod status;

pub use item::{LoanedItem, LoanedItemStatus};
pub use loan::{
    AddItem, AmendLoan, CancelLoan, CloseLoan, CreateLoan, DeleteLoan, IssueItem, ItemAdded,
    ItemIssued, ItemReturned, LOAN_AGGREGATE_TYPE, Loan, LoanAmended, LoanCancelled, LoanClosed,
    LoanCommand, LoanCreated, LoanDeleted, LoanEvent, LoanId, ReturnItem,
};
pub use status::LoanStatus;
