//! # chartform engine
//!
//! Renders declarative, tag-based clinical form definitions into HTML and
//! converts submissions into structured mutations of a longitudinal record.
//!
//! The pieces, in control-flow order:
//! - [`definition`]: the parsed form tree and its compiled, dispatch-resolved
//!   form.
//! - [`registry`] + [`handlers`]: tag handlers behind an explicitly
//!   constructed registry.
//! - [`render`]: the depth-first tag dispatcher.
//! - [`context`]: per-render state — widget arena, nesting scopes, and the
//!   unclaimed pre-existing entries used for Edit/View reconciliation.
//! - [`submission`]: the ordered action list and the two-phase
//!   validate-then-apply controller.
//! - [`matcher`]: existing-group signature matching.
//! - [`orders`]: the order revision engine.
//! - [`session`]: the per-request coordinator tying one render to one
//!   submit.
//!
//! Persistence, reference data, and time come in through the collaborator
//! traits of `chartform-record`; the engine never persists anything itself.

pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod handlers;
pub mod matcher;
pub mod orders;
pub mod registry;
pub mod render;
pub mod session;
pub mod submission;
pub mod widget;

pub use config::EngineConfig;
pub use context::{FormEntryContext, Mode};
pub use definition::{read_form_yaml, CompiledForm, FormNode};
pub use error::{ApplyError, DesignError, SubmitError, ValidationError};
pub use registry::TagRegistry;
pub use session::{FormEntrySession, SubmitOutcome};
pub use submission::Submission;
