use serde::{Deserialize, Serialize};

use stockloan_core::LocationId;

/// A place stock can be moved to (shelf, bin, the loan-holding area).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLocation {
    pub id: LocationId,
    pub name: String,
}

impl StockLocation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: LocationId::new(),
            name: name.into(),
        }
    }

    /// A location whose id is assigned elsewhere (e.g. from configuration).
    pub fn with_id(id: LocationId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}
