//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the aggregate stream
//!   ↓
//! 2. Rehydrate (apply history)
//!   ↓
//! 3. Handle (pure decision, produces events)
//!   ↓
//! 4. Append with ExpectedVersion::Exact(loaded version)
//!   ↓    └─ concurrency conflict: back to 1, up to `commit_attempts` times
//! 5. Publish committed events on the bus
//! ```
//!
//! Each retry re-decides against the fresh stream, so a command that was
//! valid against stale state but not against the new one fails with the
//! domain error rather than overwriting a concurrent change.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use stockloan_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use stockloan_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

pub const DEFAULT_COMMIT_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency kept failing after every allowed attempt.
    #[error("concurrent modification: {0}")]
    Concurrency(String),
    /// Deterministic rejection by the aggregate.
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// Historical payloads no longer match the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    /// Loaded stream is corrupt (wrong aggregate, gaps, non-monotonic).
    #[error("corrupt stream: {0}")]
    CorruptStream(String),
    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// Result of a successful dispatch: the aggregate with the new events
/// applied, and the events as they were committed.
#[derive(Debug, Clone)]
pub struct Dispatched<A> {
    pub aggregate: A,
    pub committed: Vec<StoredEvent>,
}

/// Reusable command execution engine.
///
/// Generic over the store and bus so tests run on the in-memory pair and a
/// durable backend can be swapped in without touching domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    commit_attempts: u32,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }

    /// Bound on load-decide-append cycles per command (at least 1).
    pub fn with_commit_attempts(mut self, attempts: u32) -> Self {
        self.commit_attempts = attempts.max(1);
        self
    }

    pub fn commit_attempts(&self) -> u32 {
        self.commit_attempts
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate from its stream.
    ///
    /// Returns the empty aggregate from `make_aggregate` when the stream does
    /// not exist; callers decide whether that means "not found".
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full pipeline, retrying on
    /// optimistic-concurrency conflicts.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockloan_events::Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 1;
        loop {
            match self.try_dispatch(aggregate_id, aggregate_type, command, &make_aggregate) {
                Err(DispatchError::Concurrency(msg)) if attempt < self.commit_attempts => {
                    debug!(
                        %aggregate_id,
                        aggregate_type,
                        attempt,
                        reason = %msg,
                        "append lost a concurrency race, retrying against fresh state"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn try_dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: &impl Fn(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockloan_events::Event + Serialize + DeserializeOwned,
    {
        // 1-2) Load + rehydrate
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;

        // 3) Decide
        let decided = aggregate.handle(command)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                aggregate,
                committed: vec![],
            });
        }

        // 4) Persist
        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;
        for ev in &decided {
            aggregate.apply(ev);
        }

        // 5) Publish. The append is the commit point; a bus failure only
        // delays read models, which can be rebuilt from the store.
        for stored in &committed {
            if let Err(err) = self.bus.publish(stored.to_envelope()) {
                warn!(
                    %aggregate_id,
                    sequence_number = stored.sequence_number,
                    error = ?err,
                    "committed event could not be published"
                );
            }
        }

        Ok(Dispatched {
            aggregate,
            committed,
        })
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::CorruptStream(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::CorruptStream(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::{NaiveDate, Utc};
    use stockloan_core::{AggregateRoot, CustomerId, UserId};
    use stockloan_events::InMemoryEventBus;
    use stockloan_loans::{CreateLoan, Loan, LoanCommand, LoanId, LOAN_AGGREGATE_TYPE};

    use crate::event_store::InMemoryEventStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    /// Store double that reports a concurrency conflict for the first `n`
    /// appends, then delegates.
    struct FlakyStore {
        inner: InMemoryEventStore,
        conflicts_left: AtomicU32,
    }

    impl EventStore for FlakyStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            if self
                .conflicts_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EventStoreError::Concurrency("simulated".to_string()));
            }
            self.inner.append(events, expected_version)
        }

        fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(aggregate_id)
        }

        fn load_by_type(&self, aggregate_type: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_by_type(aggregate_type)
        }
    }

    fn create(loan_id: LoanId) -> LoanCommand {
        LoanCommand::CreateLoan(CreateLoan {
            loan_id,
            customer: CustomerId::new(),
            due_date: NaiveDate::from_ymd_opt(2999, 1, 1).unwrap(),
            reference: "R-1".to_string(),
            notes: String::new(),
            created_by: UserId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn flaky(conflicts: u32) -> FlakyStore {
        FlakyStore {
            inner: InMemoryEventStore::new(),
            conflicts_left: AtomicU32::new(conflicts),
        }
    }

    #[test]
    fn dispatch_returns_rehydrated_aggregate_and_publishes() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), bus);
        let loan_id = LoanId::new(AggregateId::new());

        let out = dispatcher
            .dispatch(loan_id.0, LOAN_AGGREGATE_TYPE, &create(loan_id), |id| {
                Loan::empty(LoanId::new(id))
            })
            .unwrap();

        assert_eq!(out.aggregate.version(), 1);
        assert_eq!(out.committed.len(), 1);
        let env = sub.try_recv().unwrap();
        assert_eq!(env.aggregate_type(), LOAN_AGGREGATE_TYPE);
        assert_eq!(env.sequence_number(), 1);

        let loaded = dispatcher.load(loan_id.0, |id| Loan::empty(LoanId::new(id))).unwrap();
        assert!(loaded.exists());
    }

    #[test]
    fn transient_conflicts_are_retried_within_budget() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(flaky(2), bus).with_commit_attempts(3);
        let loan_id = LoanId::new(AggregateId::new());

        let out = dispatcher.dispatch(loan_id.0, LOAN_AGGREGATE_TYPE, &create(loan_id), |id| {
            Loan::empty(LoanId::new(id))
        });
        assert!(out.is_ok());
    }

    #[test]
    fn exhausted_budget_surfaces_concurrency() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(flaky(5), bus).with_commit_attempts(2);
        let loan_id = LoanId::new(AggregateId::new());

        let err = dispatcher
            .dispatch(loan_id.0, LOAN_AGGREGATE_TYPE, &create(loan_id), |id| {
                Loan::empty(LoanId::new(id))
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
        assert!(dispatcher.store().inner.load_stream(loan_id.0).unwrap().is_empty());
    }

    #[test]
    fn domain_rejection_is_not_retried() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), bus);
        let loan_id = LoanId::new(AggregateId::new());
        let make = |id| Loan::empty(LoanId::new(id));

        dispatcher.dispatch(loan_id.0, LOAN_AGGREGATE_TYPE, &create(loan_id), make).unwrap();
        let err = dispatcher
            .dispatch(loan_id.0, LOAN_AGGREGATE_TYPE, &create(loan_id), make)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Domain(DomainError::Conflict(_))));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), bus).with_commit_attempts(0);
        assert_eq!(dispatcher.commit_attempts(), 1);
    }
}
