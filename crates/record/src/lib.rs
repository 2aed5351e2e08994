//! The longitudinal clinical record graph and its mutation ledger.
//!
//! This crate owns the domain entities the form engine reads and mutates: a
//! [`Visit`](visit::Visit) containing observations and orders, the
//! [`RecordDraft`](draft::RecordDraft) ledger of pending mutations produced by
//! one form submission, and the revision-chain rules for [`Order`](order::Order).
//!
//! Rendering, widgets, and submission handling live in `chartform-engine`.
//! This crate never persists anything itself: persistence, reference lookup,
//! and the current time are collaborator traits defined in [`store`],
//! [`reference`], and [`time`], with in-memory implementations for tests and
//! the developer CLI.

pub mod draft;
pub mod order;
pub mod reference;
pub mod store;
pub mod time;
pub mod visit;

use thiserror::Error;

/// Errors raised by record-graph operations.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid record YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("unknown visit {0}")]
    UnknownVisit(chartform_types::VisitId),

    #[error("order {0} already carries a stop date")]
    AlreadyStopped(chartform_types::OrderId),

    #[error("stop date {stop} does not precede activation date {activated}")]
    StopNotBeforeActivation {
        stop: chrono::DateTime<chrono::Utc>,
        activated: chrono::DateTime<chrono::Utc>,
    },

    #[error("order {0} revises a previous order but names none")]
    MissingPreviousOrder(chartform_types::OrderId),

    #[error("draft references unknown order {0}")]
    UnknownOrder(chartform_types::OrderId),

    #[error("draft references unknown observation {0}")]
    UnknownObservation(chartform_types::ObsId),
}

pub type RecordResult<T> = std::result::Result<T, RecordError>;

/// Read a visit graph from its YAML fixture form.
pub fn read_visit_yaml(yaml: &str) -> RecordResult<visit::Visit> {
    Ok(serde_yaml::from_str(yaml)?)
}
