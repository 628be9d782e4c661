//! Contracts the workflow consumes from the stock subsystem.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockloan_core::{LocationId, UserId};
use stockloan_inventory::StockItemId;

/// The stock subsystem declined or failed a physical move.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct RelocationFailure {
    pub reason: String,
}

impl RelocationFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Moves one inventory item to a destination on behalf of a user.
///
/// This is the only call in a workflow operation that may block; the
/// coordinator awaits it before committing anything.
#[async_trait]
pub trait RelocationGateway: Send + Sync {
    async fn relocate(
        &self,
        item: StockItemId,
        destination: LocationId,
        acting_user: UserId,
        note: &str,
    ) -> Result<(), RelocationFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stock lookup failed: {0}")]
pub struct LookupFailure(pub String);

/// What the workflow needs to know about a unit of stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItemInfo {
    pub item: StockItemId,
    /// Only serialized (individually tracked) items can be loaned.
    pub serialized: bool,
    pub location: Option<LocationId>,
}

/// Read side of the stock subsystem.
#[async_trait]
pub trait StockDirectory: Send + Sync {
    async fn stock_item(&self, item: StockItemId) -> Result<Option<StockItemInfo>, LookupFailure>;

    async fn location_exists(&self, location: LocationId) -> Result<bool, LookupFailure>;
}
