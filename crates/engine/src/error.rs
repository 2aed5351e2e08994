//! Engine failure taxonomy.
//!
//! Four kinds of failure, with different audiences and blast radii:
//!
//! - [`DesignError`] — the form definition itself is malformed. Raised while
//!   rendering, fatal for the whole form instance: a broken definition must
//!   not render partially.
//! - [`ValidationError`] — a user-input problem. Collected across every
//!   action so the user sees all problems in one round trip; the submission
//!   is not applied.
//! - [`ApplyError`] — an engine invariant broke during apply. Not
//!   user-facing; the submission aborts with nothing persisted.
//! - [`SubmitError`] — submission-level rejection: a stale record marker or
//!   a collaborator failure. No in-engine retry.

use chartform_record::RecordError;
use chartform_types::ConceptId;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::widget::FieldName;

#[derive(Debug, Error)]
pub enum DesignError {
    #[error("tag <{tag}> is missing required attribute '{attribute}'")]
    MissingAttribute { tag: String, attribute: String },

    #[error("tag <{tag}> attribute '{attribute}' is invalid: {reason}")]
    BadAttribute {
        tag: String,
        attribute: String,
        reason: String,
    },

    #[error("tag <{tag}> attribute '{attribute}' references unknown value '{value}'")]
    UnknownReference {
        tag: String,
        attribute: String,
        value: String,
    },

    #[error("nested <repeat> tags are not supported")]
    NestedRepeat,

    #[error("<repeat> closed without a matching open")]
    RepeatNotOpen,

    #[error("invalid form definition: {0}")]
    InvalidDefinition(#[from] serde_yaml::Error),
}

/// Stable message codes surfaced beside fields.
///
/// Message lookup/localization is an external concern; the engine reports
/// codes only.
pub mod codes {
    pub const REQUIRED: &str = "required";
    pub const BAD_NUMBER: &str = "badNumber";
    pub const BAD_DATE: &str = "badDate";
    pub const BAD_CODED_VALUE: &str = "badCodedValue";
    pub const DOSE_OUT_OF_RANGE: &str = "doseOutOfRange";
    pub const DISCONTINUE_BEFORE_START: &str = "discontinueDateBeforeStart";
    pub const REASON_WITHOUT_DATE: &str = "discontinueReasonWithoutDate";
    pub const PREVIOUS_ORDER_REQUIRED: &str = "previousOrderRequired";
    pub const DRUG_CHANGED_FOR_REVISION: &str = "drugChangedForRevision";
    pub const DOSING_CHANGED_FOR_RENEW: &str = "dosingChangedForRenew";
}

/// One user-facing validation problem, addressed to the field whose error
/// widget should display it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    pub field: FieldName,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: FieldName, code: &str) -> Self {
        Self {
            field,
            message: code.to_owned(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("group boundary closed without a matching start")]
    GroupBoundaryMismatch,

    #[error("group for concept {0} matched more than one existing entry")]
    AmbiguousGroupMatch(ConceptId),

    #[error("field {0} carried an unvalidated value into apply")]
    UnvalidatedValue(FieldName),

    #[error(transparent)]
    Record(#[from] RecordError),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("stale submission: record modified at {current}, form rendered against {rendered}")]
    Stale {
        rendered: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error("record store failure: {0}")]
    Store(#[from] RecordError),
}
