//! Simulated stock subsystem: enough to register locations and serialized
//! items that loans can reference.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use stockloan_core::LocationId;
use stockloan_inventory::StockItemId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/locations", post(create_location).get(list_locations))
        .route("/items", post(register_item))
        .route("/items/:id", get(get_item))
}

pub async fn create_location(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateLocationRequest>,
) -> axum::response::Response {
    match services.stock.add_location(body.name) {
        Ok(location) => (
            StatusCode::CREATED,
            Json(dto::LocationResponse::from(location)),
        )
            .into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

pub async fn list_locations(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let mut locations: Vec<dto::LocationResponse> = services
        .stock
        .locations()
        .into_iter()
        .map(dto::LocationResponse::from)
        .collect();
    locations.sort_by(|a, b| a.name.cmp(&b.name));
    Json(locations).into_response()
}

pub async fn register_item(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RegisterStockItemRequest>,
) -> axum::response::Response {
    let location: LocationId = match dto::parse_id(&body.location_id, "location") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.stock.register_item(body.part, body.serial, location) {
        Ok(id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "id": id.to_string() })),
        )
            .into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

pub async fn get_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let item_id: StockItemId = match dto::parse_id(&id, "stock item") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let item = match services.stock.load_item(item_id) {
        Ok(item) => item,
        Err(e) => return errors::workflow_error_to_response(e.into()),
    };
    if !item.exists() {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "stock item not found");
    }

    Json(dto::StockItemResponse {
        id: item_id,
        part: item.part().to_string(),
        serial: item.serial().map(str::to_string),
        location_id: item.location(),
        move_count: item.move_count(),
    })
    .into_response()
}
