//! Loan workflow: validates intents, drives relocations through the gateway
//! and commits the resulting loan transitions.

pub mod claims;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod stock;

pub use claims::{ClaimGuard, InFlightClaims};
pub use config::{LoanSettings, LocationMismatchPolicy};
pub use coordinator::{Clock, FixedClock, LoanAmendment, LoanCoordinator, NewLoan, SystemClock};
pub use error::{WorkflowError, WorkflowResult};
pub use gateway::{LookupFailure, RelocationFailure, RelocationGateway, StockDirectory, StockItemInfo};
pub use stock::InventoryStockGateway;
