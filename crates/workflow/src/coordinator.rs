//! Loan workflow coordinator.
//!
//! The sole writer of loan state. Every intent follows the same shape:
//!
//! ```text
//! load loan ─▶ validate ─▶ [claim ─▶ relocate] ─▶ commit (retried CAS) ─▶ refresh directory
//! ```
//!
//! Relocation happens before the commit and nothing is committed when it
//! fails, so an item is never marked ON_LOAN or RETURNED without a
//! successful physical move.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use stockloan_core::{AggregateId, CustomerId, DomainResult, LocationId, UserId};
use stockloan_events::{EventBus, EventEnvelope};
use stockloan_infra::command_dispatcher::CommandDispatcher;
use stockloan_infra::event_store::EventStore;
use stockloan_infra::projections::{LoanDirectoryProjection, LoanQuery, LoanSummary};
use stockloan_infra::read_model::ReadStore;
use stockloan_infra::reservations::OpenItemIndex;
use stockloan_inventory::StockItemId;
use stockloan_loans::{
    AddItem, AmendLoan, CancelLoan, CloseLoan, CreateLoan, DeleteLoan, IssueItem,
    LOAN_AGGREGATE_TYPE, Loan, LoanCommand, LoanId, LoanedItem, ReturnItem,
};

use crate::claims::InFlightClaims;
use crate::config::{LoanSettings, LocationMismatchPolicy};
use crate::error::{WorkflowError, WorkflowResult};
use crate::gateway::{RelocationGateway, StockDirectory};

/// Source of "now" for event timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLoan {
    pub customer: CustomerId,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub notes: String,
}

/// Fields left as `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanAmendment {
    pub due_date: Option<NaiveDate>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

pub struct LoanCoordinator<S, B, R>
where
    R: ReadStore<LoanId, LoanSummary>,
{
    dispatcher: Arc<CommandDispatcher<S, B>>,
    directory: Arc<LoanDirectoryProjection<R>>,
    reservations: Arc<dyn OpenItemIndex>,
    gateway: Arc<dyn RelocationGateway>,
    stock: Arc<dyn StockDirectory>,
    settings: LoanSettings,
    claims: InFlightClaims,
    clock: Arc<dyn Clock>,
}

impl<S, B, R> LoanCoordinator<S, B, R>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    R: ReadStore<LoanId, LoanSummary>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        directory: Arc<LoanDirectoryProjection<R>>,
        reservations: Arc<dyn OpenItemIndex>,
        gateway: Arc<dyn RelocationGateway>,
        stock: Arc<dyn StockDirectory>,
        settings: LoanSettings,
    ) -> Self {
        Self {
            dispatcher,
            directory,
            reservations,
            gateway,
            stock,
            settings,
            claims: InFlightClaims::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &LoanSettings {
        &self.settings
    }

    pub fn claims(&self) -> &InFlightClaims {
        &self.claims
    }

    /// Evaluation date for OVERDUE when the caller does not supply one.
    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Rebuild the loan directory and the open-item index from the store.
    pub fn rebuild_indexes(&self) -> WorkflowResult<()> {
        let history = self
            .dispatcher
            .store()
            .load_by_type(LOAN_AGGREGATE_TYPE)
            .map_err(|e| WorkflowError::Store(e.to_string()))?;
        self.directory
            .rebuild_from_scratch(history.iter().map(|e| e.to_envelope()))
            .map_err(|e| WorkflowError::Store(e.to_string()))?;
        let open = self.directory.open_items();
        info!(events = history.len(), open_items = open.len(), "loan indexes rebuilt");
        self.reservations.rebuild(open);
        Ok(())
    }

    pub fn get_loan(&self, loan_id: LoanId) -> WorkflowResult<Loan> {
        let loan = self.dispatcher.load(loan_id.0, make_loan)?;
        if !loan.exists() {
            return Err(WorkflowError::NotFound(format!("loan {loan_id}")));
        }
        Ok(loan)
    }

    pub fn list_loans(&self, query: &LoanQuery) -> Vec<LoanSummary> {
        self.directory.list(query)
    }

    pub fn overdue_loans(&self, today: NaiveDate) -> Vec<LoanSummary> {
        self.directory.overdue(today)
    }

    pub fn create_loan(&self, new: NewLoan, acting_user: UserId) -> WorkflowResult<Loan> {
        let loan_id = LoanId::new(AggregateId::new());
        let cmd = LoanCommand::CreateLoan(CreateLoan {
            loan_id,
            customer: new.customer,
            due_date: new.due_date,
            reference: new.reference,
            notes: new.notes,
            created_by: acting_user,
            occurred_at: self.clock.now(),
        });
        let loan = self.commit(loan_id, &cmd)?;
        info!(loan = %loan_id, customer = %new.customer, user = %acting_user, "loan created");
        Ok(loan)
    }

    pub async fn request_add_item(
        &self,
        loan_id: LoanId,
        item: StockItemId,
        acting_user: UserId,
    ) -> WorkflowResult<Loan> {
        let loan = self.get_loan(loan_id)?;
        ensure_not_terminal(&loan, "add items to")?;

        let info = self
            .stock
            .stock_item(item)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("stock item {item}")))?;
        if !info.serialized {
            return Err(WorkflowError::Validation(format!(
                "stock item {item} is not serialized; only individually tracked items can be loaned"
            )));
        }

        // Check-and-create: the reservation is the uniqueness constraint,
        // the append is the create. Undo the former if the latter fails.
        if let Err(err) = self.reservations.reserve(item, loan_id) {
            warn!(loan = %loan_id, %item, error = %err, "add item rejected");
            return Err(err.into());
        }

        let cmd = LoanCommand::AddItem(AddItem {
            loan_id,
            stock_item: item,
            added_by: acting_user,
            occurred_at: self.clock.now(),
        });
        match self.commit(loan_id, &cmd) {
            Ok(loan) => {
                info!(loan = %loan_id, %item, user = %acting_user, "item added to loan");
                Ok(loan)
            }
            Err(err) => {
                self.reservations.release(item, loan_id);
                Err(err)
            }
        }
    }

    pub async fn request_issue(
        &self,
        loan_id: LoanId,
        item: StockItemId,
        acting_user: UserId,
    ) -> WorkflowResult<Loan> {
        let loan = self.get_loan(loan_id)?;
        ensure_not_terminal(&loan, "issue items of")?;
        entry(&loan, item)?.ensure_can_issue()?;

        let loan_location = self.resolve_loan_location().await?;
        let _claim = self.claims.try_claim(loan_id, item)?;
        // A competing intent may have committed between load and claim.
        self.revalidate(loan_id, item, LoanedItem::ensure_can_issue)?;

        let note = format!("Issued on loan {loan_id}");
        self.gateway
            .relocate(item, loan_location, acting_user, &note)
            .await
            .inspect_err(|err| warn!(loan = %loan_id, %item, error = %err, "issue relocation failed"))?;

        let cmd = LoanCommand::IssueItem(IssueItem {
            loan_id,
            stock_item: item,
            location: loan_location,
            issued_by: acting_user,
            occurred_at: self.clock.now(),
        });
        let loan = self.commit_after_relocation(loan_id, item, &cmd)?;
        info!(loan = %loan_id, %item, user = %acting_user, status = %loan.status(), "item issued");
        Ok(loan)
    }

    pub async fn request_return(
        &self,
        loan_id: LoanId,
        item: StockItemId,
        target_location: LocationId,
        acting_user: UserId,
    ) -> WorkflowResult<Loan> {
        let loan = self.get_loan(loan_id)?;
        entry(&loan, item)?.ensure_can_return()?;

        if !self.stock.location_exists(target_location).await? {
            return Err(WorkflowError::NotFound(format!("location {target_location}")));
        }
        self.check_return_origin(loan_id, item).await?;

        let _claim = self.claims.try_claim(loan_id, item)?;
        self.revalidate(loan_id, item, LoanedItem::ensure_can_return)?;

        let note = format!("Returned from loan {loan_id}");
        self.gateway
            .relocate(item, target_location, acting_user, &note)
            .await
            .inspect_err(|err| warn!(loan = %loan_id, %item, error = %err, "return relocation failed"))?;

        let cmd = LoanCommand::ReturnItem(ReturnItem {
            loan_id,
            stock_item: item,
            destination: target_location,
            returned_by: acting_user,
            occurred_at: self.clock.now(),
        });
        let loan = self.commit_after_relocation(loan_id, item, &cmd)?;
        self.reservations.release(item, loan_id);
        info!(
            loan = %loan_id,
            %item,
            user = %acting_user,
            status = %loan.status(),
            return_date = ?loan.return_date(),
            "item returned"
        );
        Ok(loan)
    }

    pub fn request_cancel(&self, loan_id: LoanId, acting_user: UserId) -> WorkflowResult<Loan> {
        // Held through the commit so no issue can relocate an item meanwhile.
        let _claim = self.claims.try_claim_loan(loan_id).inspect_err(|err| {
            warn!(loan = %loan_id, error = %err, "cancel rejected");
        })?;
        let cmd = LoanCommand::CancelLoan(CancelLoan {
            loan_id,
            cancelled_by: acting_user,
            occurred_at: self.clock.now(),
        });
        let loan = self.commit(loan_id, &cmd).inspect_err(|err| {
            warn!(loan = %loan_id, error = %err, "cancel rejected");
        })?;
        for entry in loan.items() {
            self.reservations.release(entry.stock_item, loan_id);
        }
        info!(loan = %loan_id, user = %acting_user, "loan cancelled");
        Ok(loan)
    }

    pub fn request_amend(
        &self,
        loan_id: LoanId,
        amendment: LoanAmendment,
        acting_user: UserId,
    ) -> WorkflowResult<Loan> {
        let cmd = LoanCommand::AmendLoan(AmendLoan {
            loan_id,
            due_date: amendment.due_date,
            reference: amendment.reference,
            notes: amendment.notes,
            amended_by: acting_user,
            occurred_at: self.clock.now(),
        });
        let loan = self.commit(loan_id, &cmd)?;
        info!(loan = %loan_id, user = %acting_user, due_date = ?loan.due_date(), "loan amended");
        Ok(loan)
    }

    pub fn request_close(&self, loan_id: LoanId, acting_user: UserId) -> WorkflowResult<Loan> {
        let cmd = LoanCommand::CloseLoan(CloseLoan {
            loan_id,
            closed_by: acting_user,
            occurred_at: self.clock.now(),
        });
        let loan = self.commit(loan_id, &cmd)?;
        info!(loan = %loan_id, user = %acting_user, "empty loan closed");
        Ok(loan)
    }

    pub fn request_delete(&self, loan_id: LoanId, acting_user: UserId) -> WorkflowResult<()> {
        let _claim = self.claims.try_claim_loan(loan_id).inspect_err(|err| {
            warn!(loan = %loan_id, error = %err, "delete rejected");
        })?;
        let cmd = LoanCommand::DeleteLoan(DeleteLoan {
            loan_id,
            deleted_by: acting_user,
            occurred_at: self.clock.now(),
        });
        let loan = self.commit(loan_id, &cmd).inspect_err(|err| {
            warn!(loan = %loan_id, error = %err, "delete rejected");
        })?;
        for entry in loan.items() {
            self.reservations.release(entry.stock_item, loan_id);
        }
        info!(loan = %loan_id, user = %acting_user, "loan deleted");
        Ok(())
    }

    async fn resolve_loan_location(&self) -> WorkflowResult<LocationId> {
        let raw = self
            .settings
            .loan_location
            .as_deref()
            .ok_or_else(|| WorkflowError::Configuration("no loan-holding location is configured".to_string()))?;
        let location: LocationId = raw.parse().map_err(|_| {
            WorkflowError::Configuration(format!("loan-holding location '{raw}' is not a valid location id"))
        })?;
        if !self.stock.location_exists(location).await? {
            return Err(WorkflowError::Configuration(format!(
                "loan-holding location {location} does not exist"
            )));
        }
        Ok(location)
    }

    /// Sanity check that a returning item is at the loan-holding location.
    async fn check_return_origin(&self, loan_id: LoanId, item: StockItemId) -> WorkflowResult<()> {
        let expected = match self.resolve_loan_location().await {
            Ok(location) => location,
            Err(err) => {
                debug!(loan = %loan_id, %item, reason = %err, "skipping return location check");
                return Ok(());
            }
        };
        let actual = self.stock.stock_item(item).await?.and_then(|info| info.location);
        if actual == Some(expected) {
            return Ok(());
        }

        let found = actual.map(|l| l.to_string()).unwrap_or_else(|| "no location".to_string());
        match self.settings.location_mismatch {
            LocationMismatchPolicy::Warn => {
                warn!(
                    loan = %loan_id,
                    %item,
                    expected = %expected,
                    found = %found,
                    "returning item is not at the loan-holding location; proceeding"
                );
                Ok(())
            }
            LocationMismatchPolicy::Reject => Err(WorkflowError::InvalidState {
                current: "ON_LOAN".to_string(),
                reason: format!(
                    "stock item {item} is at {found}, not at the loan-holding location {expected}"
                ),
            }),
        }
    }

    fn revalidate(
        &self,
        loan_id: LoanId,
        item: StockItemId,
        check: fn(&LoanedItem) -> DomainResult<()>,
    ) -> WorkflowResult<()> {
        let loan = self.get_loan(loan_id)?;
        check(entry(&loan, item)?)?;
        Ok(())
    }

    fn commit(&self, loan_id: LoanId, cmd: &LoanCommand) -> WorkflowResult<Loan> {
        let dispatched = self
            .dispatcher
            .dispatch(loan_id.0, LOAN_AGGREGATE_TYPE, cmd, make_loan)?;
        self.refresh_directory(loan_id);
        Ok(dispatched.aggregate)
    }

    fn commit_after_relocation(
        &self,
        loan_id: LoanId,
        item: StockItemId,
        cmd: &LoanCommand,
    ) -> WorkflowResult<Loan> {
        self.commit(loan_id, cmd).inspect_err(|err| {
            error!(
                loan = %loan_id,
                %item,
                error = %err,
                "stock item was relocated but the loan transition could not be committed"
            );
        })
    }

    /// Feed the loan's stream into the directory so listings see this
    /// commit immediately. Already-applied events are skipped by the
    /// projection's cursor.
    fn refresh_directory(&self, loan_id: LoanId) {
        let stream = match self.dispatcher.store().load_stream(loan_id.0) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(loan = %loan_id, error = %err, "loan directory refresh failed");
                return;
            }
        };
        for stored in &stream {
            if let Err(err) = self.directory.apply_envelope(&stored.to_envelope()) {
                warn!(loan = %loan_id, error = %err, "loan directory refresh failed");
                return;
            }
        }
    }
}

fn make_loan(id: AggregateId) -> Loan {
    Loan::empty(LoanId::new(id))
}

fn entry(loan: &Loan, item: StockItemId) -> WorkflowResult<&LoanedItem> {
    loan.item_for(item).ok_or_else(|| {
        WorkflowError::NotFound(format!("stock item {item} on loan {}", loan.id_typed()))
    })
}

fn ensure_not_terminal(loan: &Loan, action: &str) -> WorkflowResult<()> {
    let status = loan.status();
    if status.is_terminal() {
        return Err(WorkflowError::InvalidState {
            current: status.to_string(),
            reason: format!("cannot {action} a {} loan", status.as_str().to_lowercase()),
        });
    }
    Ok(())
}
