use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockloan_core::{Aggregate, AggregateId, AggregateRoot, DomainError, LocationId, UserId};
use stockloan_events::Event;

/// Stream type name for stock item aggregates.
pub const STOCK_ITEM_AGGREGATE_TYPE: &str = "inventory.item";

/// Stock item identifier (one physical unit when serialized).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockItemId(pub AggregateId);

impl StockItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for StockItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for StockItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Aggregate root: StockItem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    id: StockItemId,
    part: String,
    serial: Option<String>,
    location: Option<LocationId>,
    moves: u32,
    version: u64,
    created: bool,
}

impl StockItem {
    /// Empty instance for rehydration.
    pub fn empty(id: StockItemId) -> Self {
        Self {
            id,
            part: String::new(),
            serial: None,
            location: None,
            moves: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StockItemId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn part(&self) -> &str {
        &self.part
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Serialized items are individually trackable and therefore loanable.
    pub fn is_serialized(&self) -> bool {
        self.serial.is_some()
    }

    pub fn location(&self) -> Option<LocationId> {
        self.location
    }

    pub fn move_count(&self) -> u32 {
        self.moves
    }
}

impl AggregateRoot for StockItem {
    type Id = StockItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterItem {
    pub item_id: StockItemId,
    pub part: String,
    /// `None` for bulk (quantity-tracked) stock.
    pub serial: Option<String>,
    pub location: LocationId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MoveItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveItem {
    pub item_id: StockItemId,
    pub destination: LocationId,
    pub moved_by: UserId,
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockItemCommand {
    RegisterItem(RegisterItem),
    MoveItem(MoveItem),
}

/// Event: ItemRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRegistered {
    pub item_id: StockItemId,
    pub part: String,
    pub serial: Option<String>,
    pub location: LocationId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemMoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMoved {
    pub item_id: StockItemId,
    pub from: LocationId,
    pub to: LocationId,
    pub moved_by: UserId,
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockItemEvent {
    ItemRegistered(ItemRegistered),
    ItemMoved(ItemMoved),
}

impl Event for StockItemEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockItemEvent::ItemRegistered(_) => "inventory.item.registered",
            StockItemEvent::ItemMoved(_) => "inventory.item.moved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockItemEvent::ItemRegistered(e) => e.occurred_at,
            StockItemEvent::ItemMoved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockItem {
    type Command = StockItemCommand;
    type Event = StockItemEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockItemEvent::ItemRegistered(e) => {
                self.id = e.item_id;
                self.part = e.part.clone();
                self.serial = e.serial.clone();
                self.location = Some(e.location);
                self.created = true;
            }
            StockItemEvent::ItemMoved(e) => {
                self.location = Some(e.to);
                self.moves += 1;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockItemCommand::RegisterItem(cmd) => self.handle_register(cmd),
            StockItemCommand::MoveItem(cmd) => self.handle_move(cmd),
        }
    }
}

impl StockItem {
    fn ensure_item_id(&self, item_id: StockItemId) -> Result<(), DomainError> {
        if self.id != item_id {
            return Err(DomainError::validation("item_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterItem) -> Result<Vec<StockItemEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("stock item already registered"));
        }
        if cmd.part.trim().is_empty() {
            return Err(DomainError::validation("part cannot be empty"));
        }
        if cmd.serial.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(DomainError::validation("serial cannot be blank"));
        }

        Ok(vec![StockItemEvent::ItemRegistered(ItemRegistered {
            item_id: cmd.item_id,
            part: cmd.part.trim().to_string(),
            serial: cmd.serial.as_ref().map(|s| s.trim().to_string()),
            location: cmd.location,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_move(&self, cmd: &MoveItem) -> Result<Vec<StockItemEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("stock item {}", cmd.item_id)));
        }
        self.ensure_item_id(cmd.item_id)?;

        let Some(from) = self.location else {
            return Err(DomainError::invalid_state("unplaced", "item has no location"));
        };

        Ok(vec![StockItemEvent::ItemMoved(ItemMoved {
            item_id: cmd.item_id,
            from,
            to: cmd.destination,
            moved_by: cmd.moved_by,
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
