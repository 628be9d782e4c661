//! Relocation gateway backed by the event-sourced inventory domain.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::debug;

use stockloan_core::{AggregateId, LocationId, UserId};
use stockloan_events::{EventBus, EventEnvelope};
use stockloan_infra::command_dispatcher::{CommandDispatcher, DispatchError};
use stockloan_infra::event_store::EventStore;
use stockloan_inventory::{
    MoveItem, RegisterItem, STOCK_ITEM_AGGREGATE_TYPE, StockItem, StockItemCommand, StockItemId,
    StockLocation,
};

use crate::error::{WorkflowError, WorkflowResult};
use crate::gateway::{LookupFailure, RelocationFailure, RelocationGateway, StockDirectory, StockItemInfo};

/// Stock subsystem adapter: items are `StockItem` streams in the shared
/// event store, locations live in a small in-process registry.
pub struct InventoryStockGateway<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    locations: RwLock<HashMap<LocationId, StockLocation>>,
}

impl<S, B> InventoryStockGateway<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self {
            dispatcher,
            locations: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_location(&self, name: impl Into<String>) -> WorkflowResult<StockLocation> {
        self.insert_location(StockLocation::new(name))
    }

    /// Register a location with a known id. Re-inserting an id renames it.
    pub fn insert_location(&self, location: StockLocation) -> WorkflowResult<StockLocation> {
        self.locations
            .write()
            .map_err(|_| WorkflowError::Store("location registry poisoned".to_string()))?
            .insert(location.id, location.clone());
        Ok(location)
    }

    pub fn locations(&self) -> Vec<StockLocation> {
        self.locations
            .read()
            .map(|l| l.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Register a stock item at a known location. `serial: None` creates
    /// bulk stock, which the loan workflow refuses.
    pub fn register_item(
        &self,
        part: impl Into<String>,
        serial: Option<String>,
        location: LocationId,
    ) -> WorkflowResult<StockItemId> {
        if !self.has_location(location) {
            return Err(WorkflowError::NotFound(format!("location {location}")));
        }
        let item_id = StockItemId::new(AggregateId::new());
        let cmd = StockItemCommand::RegisterItem(RegisterItem {
            item_id,
            part: part.into(),
            serial,
            location,
            occurred_at: Utc::now(),
        });
        self.dispatcher
            .dispatch(item_id.0, STOCK_ITEM_AGGREGATE_TYPE, &cmd, make_item)?;
        Ok(item_id)
    }

    pub fn load_item(&self, item: StockItemId) -> Result<StockItem, DispatchError> {
        self.dispatcher.load(item.0, make_item)
    }

    fn has_location(&self, location: LocationId) -> bool {
        self.locations
            .read()
            .map(|l| l.contains_key(&location))
            .unwrap_or(false)
    }
}

fn make_item(id: AggregateId) -> StockItem {
    StockItem::empty(StockItemId::new(id))
}

#[async_trait]
impl<S, B> RelocationGateway for InventoryStockGateway<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    async fn relocate(
        &self,
        item: StockItemId,
        destination: LocationId,
        acting_user: UserId,
        note: &str,
    ) -> Result<(), RelocationFailure> {
        if !self.has_location(destination) {
            return Err(RelocationFailure::new(format!("unknown location {destination}")));
        }

        let cmd = StockItemCommand::MoveItem(MoveItem {
            item_id: item,
            destination,
            moved_by: acting_user,
            note: note.to_string(),
            occurred_at: Utc::now(),
        });
        self.dispatcher
            .dispatch(item.0, STOCK_ITEM_AGGREGATE_TYPE, &cmd, make_item)
            .map_err(|e| RelocationFailure::new(e.to_string()))?;

        debug!(%item, %destination, note, "stock item relocated");
        Ok(())
    }
}

#[async_trait]
impl<S, B> StockDirectory for InventoryStockGateway<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    async fn stock_item(&self, item: StockItemId) -> Result<Option<StockItemInfo>, LookupFailure> {
        let loaded = self
            .load_item(item)
            .map_err(|e| LookupFailure(e.to_string()))?;
        if !loaded.exists() {
            return Ok(None);
        }
        Ok(Some(StockItemInfo {
            item,
            serialized: loaded.is_serialized(),
            location: loaded.location(),
        }))
    }

    async fn location_exists(&self, location: LocationId) -> Result<bool, LookupFailure> {
        Ok(self.has_location(location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockloan_events::InMemoryEventBus;
    use stockloan_infra::event_store::InMemoryEventStore;

    type Gateway = InventoryStockGateway<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn gateway() -> Gateway {
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), Arc::new(InMemoryEventBus::new()));
        InventoryStockGateway::new(Arc::new(dispatcher))
    }

    #[tokio::test]
    async fn relocate_moves_the_item() {
        let gw = gateway();
        let shelf = gw.add_location("Shelf 7").unwrap();
        let loans = gw.add_location("Loan area").unwrap();
        let item = gw.register_item("Drill", Some("SN-1".into()), shelf.id).unwrap();

        gw.relocate(item, loans.id, UserId::new(), "Issued on loan").await.unwrap();

        let info = gw.stock_item(item).await.unwrap().unwrap();
        assert_eq!(info.location, Some(loans.id));
        assert!(info.serialized);
    }

    #[tokio::test]
    async fn locations_with_fixed_ids_are_resolvable() {
        let gw = gateway();
        let id = LocationId::new();
        gw.insert_location(StockLocation::with_id(id, "Loan area")).unwrap();
        assert!(gw.location_exists(id).await.unwrap());
        assert_eq!(gw.locations().len(), 1);
    }

    #[tokio::test]
    async fn unknown_destination_or_item_fails() {
        let gw = gateway();
        let shelf = gw.add_location("Shelf").unwrap();
        let item = gw.register_item("Drill", Some("SN-2".into()), shelf.id).unwrap();

        assert!(gw.relocate(item, LocationId::new(), UserId::new(), "x").await.is_err());
        let ghost = StockItemId::new(AggregateId::new());
        assert!(gw.relocate(ghost, shelf.id, UserId::new(), "x").await.is_err());
        assert_eq!(gw.stock_item(ghost).await.unwrap(), None);
    }
}
