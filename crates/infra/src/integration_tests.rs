//! Command → EventStore → EventBus → Projection → ReadModel.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde_json::Value as JsonValue;

use stockloan_core::{AggregateId, CustomerId, LocationId, UserId};
use stockloan_events::{EventBus, EventEnvelope, InMemoryEventBus};
use stockloan_inventory::StockItemId;
use stockloan_loans::{
    AddItem, CreateLoan, IssueItem, LOAN_AGGREGATE_TYPE, Loan, LoanCommand, LoanId, LoanStatus,
};

use crate::command_dispatcher::CommandDispatcher;
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::projections::{LoanDirectoryProjection, LoanSummary};
use crate::read_model::InMemoryReadStore;
use crate::reservations::{InMemoryOpenItemIndex, OpenItemIndex};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Directory = LoanDirectoryProjection<Arc<InMemoryReadStore<LoanId, LoanSummary>>>;

fn setup() -> (CommandDispatcher<Arc<InMemoryEventStore>, Bus>, Arc<Directory>, Bus) {
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let dispatcher = CommandDispatcher::new(store, bus.clone());
    let directory = Arc::new(LoanDirectoryProjection::new(Arc::new(InMemoryReadStore::new())));
    (dispatcher, directory, bus)
}

fn make(id: AggregateId) -> Loan {
    Loan::empty(LoanId::new(id))
}

fn open_loan(
    dispatcher: &CommandDispatcher<Arc<InMemoryEventStore>, Bus>,
    item: StockItemId,
) -> LoanId {
    let loan_id = LoanId::new(AggregateId::new());
    let user = UserId::new();
    let commands = [
        LoanCommand::CreateLoan(CreateLoan {
            loan_id,
            customer: CustomerId::new(),
            due_date: NaiveDate::from_ymd_opt(2999, 1, 1).unwrap(),
            reference: String::new(),
            notes: String::new(),
            created_by: user,
            occurred_at: Utc::now(),
        }),
        LoanCommand::AddItem(AddItem {
            loan_id,
            stock_item: item,
            added_by: user,
            occurred_at: Utc::now(),
        }),
        LoanCommand::IssueItem(IssueItem {
            loan_id,
            stock_item: item,
            location: LocationId::new(),
            issued_by: user,
            occurred_at: Utc::now(),
        }),
    ];
    for cmd in &commands {
        dispatcher.dispatch(loan_id.0, LOAN_AGGREGATE_TYPE, cmd, make).unwrap();
    }
    loan_id
}

#[test]
fn committed_loan_events_reach_the_directory() {
    let (dispatcher, directory, bus) = setup();
    let subscription = bus.subscribe();

    let item = StockItemId::new(AggregateId::new());
    let loan_id = open_loan(&dispatcher, item);

    let mut delivered = Vec::new();
    while let Ok(env) = subscription.try_recv() {
        directory.apply_envelope(&env).unwrap();
        delivered.push(env);
    }
    assert_eq!(delivered.len(), 3);

    // Redelivery is dropped by sequence number.
    for env in &delivered {
        directory.apply_envelope(env).unwrap();
    }

    let rm = directory.get(&loan_id).unwrap();
    assert_eq!(rm.status(), LoanStatus::Active);
    assert_eq!(rm.lines.len(), 1);
    assert_eq!(directory.open_items(), vec![(item, loan_id)]);
}

#[test]
fn directory_and_reservations_rebuild_from_the_store() {
    let (dispatcher, directory, _bus) = setup();
    let first = StockItemId::new(AggregateId::new());
    let second = StockItemId::new(AggregateId::new());
    let loan_a = open_loan(&dispatcher, first);
    let loan_b = open_loan(&dispatcher, second);

    let history = dispatcher.store().load_by_type(LOAN_AGGREGATE_TYPE).unwrap();
    directory
        .rebuild_from_scratch(history.iter().map(|e| e.to_envelope()))
        .unwrap();

    let index = InMemoryOpenItemIndex::new();
    index.rebuild(directory.open_items());
    assert_eq!(index.holder(first), Some(loan_a));
    assert_eq!(index.holder(second), Some(loan_b));
}
