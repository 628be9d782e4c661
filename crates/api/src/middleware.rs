use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use stockloan_core::UserId;

use crate::app::errors::json_error;
use crate::context::ActingUser;

/// Header carrying the acting user's id. Authentication happens upstream.
pub const ACTING_USER_HEADER: &str = "x-acting-user";

pub async fn acting_user_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let user_id = extract_acting_user(req.headers())?;
    req.extensions_mut().insert(ActingUser::new(user_id));
    Ok(next.run(req).await)
}

fn extract_acting_user(headers: &HeaderMap) -> Result<UserId, Response> {
    let unauthorized =
        |msg: &str| json_error(StatusCode::UNAUTHORIZED, "unauthorized", msg.to_string());

    let header = headers
        .get(ACTING_USER_HEADER)
        .ok_or_else(|| unauthorized("missing X-Acting-User header"))?;
    let raw = header
        .to_str()
        .map_err(|_| unauthorized("X-Acting-User header is not valid text"))?;

    raw.parse()
        .map_err(|_| unauthorized("X-Acting-User header is not a valid user id"))
}
