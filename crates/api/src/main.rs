use anyhow::Context;

use stockloan_api::{DEFAULT_BIND_ADDR, ENV_BIND_ADDR};
use stockloan_workflow::LoanSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional.
    dotenvy::dotenv().ok();
    stockloan_observability::init();

    let settings = LoanSettings::from_env().context("invalid loan settings")?;
    tracing::info!(
        loan_location = settings.loan_location.as_deref().unwrap_or("<unset>"),
        location_mismatch = ?settings.location_mismatch,
        commit_attempts = settings.commit_attempts,
        "loan settings loaded"
    );

    let app = stockloan_api::app::build_app(settings)?;

    let addr = std::env::var(ENV_BIND_ADDR).unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
