use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use stockloan_core::{CustomerId, LocationId};
use stockloan_infra::projections::LoanQuery;
use stockloan_inventory::StockItemId;
use stockloan_loans::{Loan, LoanId};
use stockloan_workflow::{LoanAmendment, NewLoan, WorkflowResult};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActingUser;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_loan).get(list_loans))
        .route("/overdue", get(overdue_loans))
        .route("/:id", get(get_loan).patch(amend_loan).delete(delete_loan))
        .route("/:id/items", post(add_item))
        .route("/:id/items/:item/issue", post(issue_item))
        .route("/:id/items/:item/return", post(return_item))
        .route("/:id/cancel", post(cancel_loan))
        .route("/:id/close", post(close_loan))
}

fn loan_response(
    services: &AppServices,
    result: WorkflowResult<Loan>,
    status: StatusCode,
) -> axum::response::Response {
    match result {
        Ok(loan) => (
            status,
            Json(dto::LoanResponse::from_loan(&loan, services.coordinator.today())),
        )
            .into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

pub async fn create_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<ActingUser>,
    Json(body): Json<dto::CreateLoanRequest>,
) -> axum::response::Response {
    let customer: CustomerId = match dto::parse_id(&body.customer_id, "customer") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let result = services.coordinator.create_loan(
        NewLoan {
            customer,
            due_date: body.due_date,
            reference: body.reference,
            notes: body.notes,
        },
        user.user_id(),
    );
    loan_response(&services, result, StatusCode::CREATED)
}

pub async fn list_loans(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::ListLoansParams>,
) -> axum::response::Response {
    let today = params.today.unwrap_or_else(|| services.coordinator.today());
    let mut query = LoanQuery::on(today);

    if let Some(raw) = params.customer_id.as_deref() {
        match dto::parse_id(raw, "customer") {
            Ok(c) => query.customer = Some(c),
            Err(resp) => return resp,
        }
    }
    if let Some(raw) = params.status.as_deref() {
        match dto::parse_status(raw) {
            Ok(s) => query.status = Some(s),
            Err(resp) => return resp,
        }
    }
    match dto::parse_descending(params.order.as_deref()) {
        Ok(d) => query.descending = d,
        Err(resp) => return resp,
    }
    query.overdue_only = params.overdue;
    query.sort = params.sort.unwrap_or_default();

    let loans: Vec<dto::LoanSummaryResponse> = services
        .coordinator
        .list_loans(&query)
        .iter()
        .map(|s| dto::LoanSummaryResponse::from_summary(s, today))
        .collect();
    Json(loans).into_response()
}

pub async fn overdue_loans(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::OverdueParams>,
) -> axum::response::Response {
    let today = params.today.unwrap_or_else(|| services.coordinator.today());
    let loans: Vec<dto::LoanSummaryResponse> = services
        .coordinator
        .overdue_loans(today)
        .iter()
        .map(|s| dto::LoanSummaryResponse::from_summary(s, today))
        .collect();
    Json(loans).into_response()
}

pub async fn get_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let loan_id: LoanId = match dto::parse_id(&id, "loan") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = services.coordinator.get_loan(loan_id);
    loan_response(&services, result, StatusCode::OK)
}

pub async fn amend_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<ActingUser>,
    Path(id): Path<String>,
    Json(body): Json<dto::AmendLoanRequest>,
) -> axum::response::Response {
    let loan_id: LoanId = match dto::parse_id(&id, "loan") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let amendment = LoanAmendment {
        due_date: body.due_date,
        reference: body.reference,
        notes: body.notes,
    };
    let result = services
        .coordinator
        .request_amend(loan_id, amendment, user.user_id());
    loan_response(&services, result, StatusCode::OK)
}

pub async fn delete_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<ActingUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let loan_id: LoanId = match dto::parse_id(&id, "loan") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.coordinator.request_delete(loan_id, user.user_id()) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

pub async fn add_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<ActingUser>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddItemRequest>,
) -> axum::response::Response {
    let loan_id: LoanId = match dto::parse_id(&id, "loan") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let item: StockItemId = match dto::parse_id(&body.stock_item_id, "stock item") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = services
        .coordinator
        .request_add_item(loan_id, item, user.user_id())
        .await;
    loan_response(&services, result, StatusCode::CREATED)
}

pub async fn issue_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<ActingUser>,
    Path((id, item)): Path<(String, String)>,
) -> axum::response::Response {
    let (loan_id, item) = match parse_loan_item(&id, &item) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = services
        .coordinator
        .request_issue(loan_id, item, user.user_id())
        .await;
    loan_response(&services, result, StatusCode::OK)
}

pub async fn return_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<ActingUser>,
    Path((id, item)): Path<(String, String)>,
    Json(body): Json<dto::ReturnItemRequest>,
) -> axum::response::Response {
    let (loan_id, item) = match parse_loan_item(&id, &item) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let target: LocationId = match dto::parse_id(&body.location_id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = services
        .coordinator
        .request_return(loan_id, item, target, user.user_id())
        .await;
    loan_response(&services, result, StatusCode::OK)
}

pub async fn cancel_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<ActingUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let loan_id: LoanId = match dto::parse_id(&id, "loan") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = services.coordinator.request_cancel(loan_id, user.user_id());
    loan_response(&services, result, StatusCode::OK)
}

pub async fn close_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<ActingUser>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let loan_id: LoanId = match dto::parse_id(&id, "loan") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = services.coordinator.request_close(loan_id, user.user_id());
    loan_response(&services, result, StatusCode::OK)
}

fn parse_loan_item(
    loan: &str,
    item: &str,
) -> Result<(LoanId, StockItemId), axum::response::Response> {
    Ok((dto::parse_id(loan, "loan")?, dto::parse_id(item, "stock item")?))
}
