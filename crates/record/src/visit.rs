//! Visits and observations.
//!
//! A [`Visit`] is the record container for one clinical encounter: its
//! observations (a forest, since grouped observations nest) and its orders.
//! The `last_modified` stamp is the optimistic-concurrency marker the form
//! engine captures at render time and re-checks at submit time.

use chartform_types::{ConceptId, ObsId, PersonId, VisitId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::order::Order;

/// The value recorded by a single observation.
///
/// Group-parent observations carry no value of their own; their meaning is
/// the set of member observations beneath them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObsValue {
    Text(String),
    Numeric(f64),
    Coded(ConceptId),
    Bool(bool),
    Date(NaiveDate),
}

impl ObsValue {
    /// The coded answer, if this value is coded.
    pub fn as_coded(&self) -> Option<ConceptId> {
        match self {
            ObsValue::Coded(c) => Some(*c),
            _ => None,
        }
    }
}

/// One recorded data point: a question concept, an optional value, and any
/// member observations when this entry is a group parent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default = "ObsId::new")]
    pub id: ObsId,
    pub concept: ConceptId,
    #[serde(default)]
    pub value: Option<ObsValue>,
    #[serde(default)]
    pub members: Vec<Observation>,
    #[serde(default)]
    pub voided: bool,
}

impl Observation {
    /// A leaf observation with a value.
    pub fn new(concept: ConceptId, value: ObsValue) -> Self {
        Self {
            id: ObsId::new(),
            concept,
            value: Some(value),
            members: Vec::new(),
            voided: false,
        }
    }

    /// A group-parent observation with the given members.
    pub fn group(concept: ConceptId, members: Vec<Observation>) -> Self {
        Self {
            id: ObsId::new(),
            concept,
            value: None,
            members,
            voided: false,
        }
    }

    /// Whether this observation is a grouping parent.
    pub fn is_group(&self) -> bool {
        !self.members.is_empty()
    }
}

/// One clinical visit: the owning patient, the visit date, the
/// last-modified marker, and the observation and order content.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Visit {
    pub id: VisitId,
    pub patient: PersonId,
    pub visit_date: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub orders: Vec<Order>,
}

impl Visit {
    /// A fresh, empty visit for entering new data.
    pub fn new(id: VisitId, patient: PersonId, visit_date: DateTime<Utc>) -> Self {
        Self {
            id,
            patient,
            visit_date,
            last_modified: visit_date,
            observations: Vec::new(),
            orders: Vec::new(),
        }
    }

    /// Non-voided top-level observations.
    pub fn active_observations(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter().filter(|o| !o.voided)
    }

    /// Non-voided orders.
    pub fn active_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| !o.voided)
    }

    /// Finds an observation anywhere in the forest by id.
    pub fn find_observation(&self, id: ObsId) -> Option<&Observation> {
        fn walk(list: &[Observation], id: ObsId) -> Option<&Observation> {
            for obs in list {
                if obs.id == id {
                    return Some(obs);
                }
                if let Some(found) = walk(&obs.members, id) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.observations, id)
    }
}
