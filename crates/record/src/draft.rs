//! The pending-mutation ledger produced by one form submission.
//!
//! A [`RecordDraft`] holds everything the apply phase decided to do, without
//! doing any of it: observations to create (with their group parent links),
//! observations and orders to void, new order links, and the stop dates new
//! links impose on their predecessors. The whole draft is handed to the
//! persistence collaborator in one unit; a submission either lands entirely
//! or not at all.

use chartform_types::{ConceptId, ObsId, OrderId, VisitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::Order;
use crate::visit::ObsValue;

/// Where a drafted observation attaches in the record forest.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObsParent {
    /// Directly under the visit.
    TopLevel,
    /// Under an already-persisted group observation.
    Existing(ObsId),
    /// Under another drafted observation, by index into `new_observations`.
    New(usize),
}

/// One observation waiting to be created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewObservation {
    #[serde(default = "ObsId::new")]
    pub id: ObsId,
    pub concept: ConceptId,
    /// `None` for group parents.
    #[serde(default)]
    pub value: Option<ObsValue>,
    pub parent: ObsParent,
}

/// A stop date a new chain link imposes on its predecessor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderStop {
    pub order: OrderId,
    pub date_stopped: DateTime<Utc>,
}

/// All mutations one submission wants applied to one visit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordDraft {
    pub visit: VisitId,
    /// Requested change to the visit date, if the form carries a visit-date field.
    #[serde(default)]
    pub visit_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub new_observations: Vec<NewObservation>,
    #[serde(default)]
    pub observations_to_void: Vec<ObsId>,
    #[serde(default)]
    pub orders_to_create: Vec<Order>,
    #[serde(default)]
    pub orders_to_void: Vec<OrderId>,
    #[serde(default)]
    pub order_stops: Vec<OrderStop>,
}

impl RecordDraft {
    pub fn for_visit(visit: VisitId) -> Self {
        Self {
            visit,
            visit_date: None,
            new_observations: Vec::new(),
            observations_to_void: Vec::new(),
            orders_to_create: Vec::new(),
            orders_to_void: Vec::new(),
            order_stops: Vec::new(),
        }
    }

    /// Queues an observation and returns its index for child linkage.
    pub fn push_observation(&mut self, obs: NewObservation) -> usize {
        self.new_observations.push(obs);
        self.new_observations.len() - 1
    }

    /// Whether the draft carries any mutation at all.
    pub fn is_empty(&self) -> bool {
        self.visit_date.is_none()
            && self.new_observations.is_empty()
            && self.observations_to_void.is_empty()
            && self.orders_to_create.is_empty()
            && self.orders_to_void.is_empty()
            && self.order_stops.is_empty()
    }
}
