//! Per-scenario state machine and the data it records.

pub mod case;
pub mod context;
pub mod flow;
pub mod lease;
pub mod runtime;

use std::fmt;

pub use case::{CheckOutcome, Checks, RunState, TestCase};
pub use context::{KeptValidator, RunContext, RunSettings};
pub use flow::{FundingRequest, RoleSpec, ScenarioFlow, Step};
pub use lease::{AccountLease, LeaseSet, SweepOutcome, SweepRecord, TeardownRecord};
pub use runtime::Orchestrator;
use thiserror::Error;

use crate::funding::FundingError;

/// Boxed error type shared by collaborator traits.
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// States a scenario moves through. `Aborted` is reachable from any state on
/// an unrecoverable error; teardown still runs afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Created,
    Provisioning,
    Funding,
    Executing,
    Verifying,
    TearingDown,
    Finished,
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Provisioning => "provisioning",
            Self::Funding => "funding",
            Self::Executing => "executing",
            Self::Verifying => "verifying",
            Self::TearingDown => "tearing_down",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to provision {role} account `{name}`: {source}")]
    Provision {
        role: &'static str,
        name: String,
        #[source]
        source: DynError,
    },
    #[error(transparent)]
    Funding(#[from] FundingError),
    #[error("no {role} account was provisioned")]
    MissingRole { role: &'static str },
    #[error("{context}: {source}")]
    Query {
        context: String,
        #[source]
        source: DynError,
    },
    #[error("invalid scenario parameters: {reason}")]
    InvalidParameters { reason: String },
    #[error("scenario panicked: {message}")]
    Panicked { message: String },
}

impl ScenarioError {
    pub fn query(context: impl Into<String>, source: impl Into<DynError>) -> Self {
        Self::Query {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Deterministic account name for `role` within `case`.
///
/// Case names are sanitized so the result is a valid key name. Uniqueness
/// relies on sanitized case names being unique within a suite.
#[must_use]
pub fn account_name(identifier: &str, case: &str, role: &str) -> String {
    format!(
        "{}_{}_{}",
        sanitize(identifier),
        sanitize(case),
        sanitize(role)
    )
}

/// Lowercases and replaces every non-alphanumeric character with `_`.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_names_are_deterministic_and_role_scoped() {
        let validator = account_name("nightly", "Delegate: 100 ONE", "Validator");
        let delegator = account_name("nightly", "Delegate: 100 ONE", "Delegator");
        assert_eq!(validator, "nightly_delegate__100_one_validator");
        assert_ne!(validator, delegator);
        assert_eq!(
            validator,
            account_name("nightly", "Delegate: 100 ONE", "Validator")
        );
    }
}
