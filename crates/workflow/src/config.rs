//! Workflow settings, injected into the coordinator at construction.

use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use stockloan_infra::command_dispatcher::DEFAULT_COMMIT_ATTEMPTS;

pub const ENV_LOAN_LOCATION: &str = "STOCKLOAN_LOAN_LOCATION";
pub const ENV_LOCATION_MISMATCH: &str = "STOCKLOAN_LOCATION_MISMATCH";
pub const ENV_COMMIT_ATTEMPTS: &str = "STOCKLOAN_COMMIT_ATTEMPTS";

/// What to do when a returned item is not physically at the loan-holding
/// location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationMismatchPolicy {
    /// Log a warning and move the item anyway.
    #[default]
    Warn,
    /// Fail the return with an invalid-state error.
    Reject,
}

impl FromStr for LocationMismatchPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(LocationMismatchPolicy::Warn),
            "reject" => Ok(LocationMismatchPolicy::Reject),
            other => anyhow::bail!("unknown location mismatch policy '{other}' (expected warn or reject)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoanSettings {
    /// Id of the loan-holding location. Resolved on every operation that
    /// needs it, so an unset or stale value fails only those operations.
    pub loan_location: Option<String>,
    pub location_mismatch: LocationMismatchPolicy,
    pub commit_attempts: u32,
}

impl Default for LoanSettings {
    fn default() -> Self {
        Self {
            loan_location: None,
            location_mismatch: LocationMismatchPolicy::default(),
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }
}

impl LoanSettings {
    /// Load settings from `STOCKLOAN_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self {
            loan_location: lookup(ENV_LOAN_LOCATION)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            ..Self::default()
        };

        if let Some(raw) = lookup(ENV_LOCATION_MISMATCH) {
            settings.location_mismatch = raw
                .parse()
                .with_context(|| format!("{ENV_LOCATION_MISMATCH} is invalid"))?;
        }
        if let Some(raw) = lookup(ENV_COMMIT_ATTEMPTS) {
            let attempts: u32 = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_COMMIT_ATTEMPTS} must be a positive integer"))?;
            anyhow::ensure!(attempts >= 1, "{ENV_COMMIT_ATTEMPTS} must be at least 1");
            settings.commit_attempts = attempts;
        }

        Ok(settings)
    }

    pub fn with_loan_location(mut self, location: impl ToString) -> Self {
        self.loan_location = Some(location.to_string());
        self
    }

    pub fn with_mismatch_policy(mut self, policy: LocationMismatchPolicy) -> Self {
        self.location_mismatch = policy;
        self
    }
}
