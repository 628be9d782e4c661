use std::sync::Arc;

use anyhow::Context;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use stockloan_core::LocationId;
use stockloan_events::{EventEnvelope, InMemoryEventBus};
use stockloan_infra::{
    command_dispatcher::CommandDispatcher,
    event_store::InMemoryEventStore,
    projections::{LoanDirectoryProjection, LoanSummary},
    read_model::InMemoryReadStore,
    reservations::InMemoryOpenItemIndex,
};
use stockloan_inventory::StockLocation;
use stockloan_loans::LoanId;
use stockloan_workflow::{InventoryStockGateway, LoanCoordinator, LoanSettings};

pub type Store = Arc<InMemoryEventStore>;
pub type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type DirectoryStore = Arc<InMemoryReadStore<LoanId, LoanSummary>>;
pub type Dispatcher = CommandDispatcher<Store, Bus>;
pub type StockGateway = InventoryStockGateway<Store, Bus>;
pub type Coordinator = LoanCoordinator<Store, Bus, DirectoryStore>;

/// Everything the handlers need. Loans and simulated stock share one store.
pub struct AppServices {
    pub coordinator: Coordinator,
    pub stock: Arc<StockGateway>,
}

/// Wire the in-memory stack around the given settings.
///
/// The configured loan-holding location (if it is a valid id) is registered
/// in the simulated stock subsystem so issue and return can resolve it.
pub fn build_services(settings: LoanSettings) -> anyhow::Result<AppServices> {
    let dispatcher = Arc::new(
        CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        )
        .with_commit_attempts(settings.commit_attempts),
    );
    let stock = Arc::new(InventoryStockGateway::new(dispatcher.clone()));

    match settings.loan_location.as_deref().map(str::parse::<LocationId>) {
        Some(Ok(id)) => {
            stock
                .insert_location(StockLocation::with_id(id, "Loan area"))
                .context("failed to register the loan-holding location")?;
            info!(location = %id, "loan-holding location registered");
        }
        Some(Err(err)) => warn!(error = %err, "loan-holding location is not a valid id; issue and return will fail"),
        None => warn!("no loan-holding location configured; issue and return will fail"),
    }

    let coordinator = LoanCoordinator::new(
        dispatcher.clone(),
        Arc::new(LoanDirectoryProjection::new(Arc::new(InMemoryReadStore::new()))),
        Arc::new(InMemoryOpenItemIndex::new()),
        stock.clone(),
        stock.clone(),
        settings,
    );
    coordinator
        .rebuild_indexes()
        .context("failed to rebuild loan indexes")?;

    Ok(AppServices { coordinator, stock })
}
