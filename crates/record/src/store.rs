//! Persistence collaborator.
//!
//! [`RecordStore`] is the contract the engine hands a finished
//! [`RecordDraft`](crate::draft::RecordDraft) to. A draft is applied
//! transactionally: either every mutation lands, or none do.
//! [`InMemoryStore`] applies drafts to visits held in memory, for tests and
//! the developer CLI.

use chartform_types::{PersonId, VisitId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::draft::{NewObservation, ObsParent, RecordDraft};
use crate::order::Order;
use crate::visit::{Observation, Visit};
use crate::{RecordError, RecordResult};

pub trait RecordStore {
    /// Loads the full record graph for one visit.
    fn load_visit(&self, visit: VisitId) -> RecordResult<Visit>;

    /// The visit's current last-modified marker, for the optimistic
    /// staleness check.
    fn last_modified(&self, visit: VisitId) -> RecordResult<DateTime<Utc>>;

    /// All of a patient's orders, across visits. Revision chains span
    /// visits, so reconciliation needs the full pool.
    fn orders_for_patient(&self, patient: PersonId) -> RecordResult<Vec<Order>>;

    /// Applies a draft in one unit and stamps the visit with `now`.
    fn persist(&mut self, draft: RecordDraft, now: DateTime<Utc>) -> RecordResult<()>;
}

/// A store over visits held in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    visits: BTreeMap<VisitId, Visit>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_visit(&mut self, visit: Visit) {
        self.visits.insert(visit.id, visit);
    }

    pub fn visit(&self, id: VisitId) -> Option<&Visit> {
        self.visits.get(&id)
    }
}

impl RecordStore for InMemoryStore {
    fn load_visit(&self, visit: VisitId) -> RecordResult<Visit> {
        self.visits
            .get(&visit)
            .cloned()
            .ok_or(RecordError::UnknownVisit(visit))
    }

    fn last_modified(&self, visit: VisitId) -> RecordResult<DateTime<Utc>> {
        Ok(self
            .visits
            .get(&visit)
            .ok_or(RecordError::UnknownVisit(visit))?
            .last_modified)
    }

    fn orders_for_patient(&self, patient: PersonId) -> RecordResult<Vec<Order>> {
        Ok(self
            .visits
            .values()
            .filter(|v| v.patient == patient)
            .flat_map(|v| v.orders.iter().cloned())
            .collect())
    }

    fn persist(&mut self, draft: RecordDraft, now: DateTime<Utc>) -> RecordResult<()> {
        let visit_id = draft.visit;
        if !self.visits.contains_key(&visit_id) {
            return Err(RecordError::UnknownVisit(visit_id));
        }

        // Work on a copy of the whole map: voids and stops may target
        // orders owned by earlier visits (revision chains span visits), and
        // a bad draft must leave nothing half-applied.
        let mut visits = self.visits.clone();

        {
            let visit = visits.get_mut(&visit_id).expect("checked above");
            if let Some(date) = draft.visit_date {
                visit.visit_date = date;
            }
            for obs_id in &draft.observations_to_void {
                if !void_observation(&mut visit.observations, *obs_id) {
                    return Err(RecordError::UnknownObservation(*obs_id));
                }
            }
            attach_new_observations(visit, &draft.new_observations)?;
            for order in &draft.orders_to_create {
                order.check_link()?;
                visit.orders.push(order.clone());
            }
        }

        for order_id in &draft.orders_to_void {
            let order = find_order_mut(&mut visits, *order_id)
                .ok_or(RecordError::UnknownOrder(*order_id))?;
            order.voided = true;
        }

        for stop in &draft.order_stops {
            let order = find_order_mut(&mut visits, stop.order)
                .ok_or(RecordError::UnknownOrder(stop.order))?;
            if order.date_stopped.is_some() {
                tracing::debug!(order = %stop.order, "replacing stop date on superseded link");
            }
            order.date_stopped = Some(stop.date_stopped);
        }

        visits
            .get_mut(&visit_id)
            .expect("checked above")
            .last_modified = now;
        self.visits = visits;
        Ok(())
    }
}

fn find_order_mut(
    visits: &mut BTreeMap<VisitId, Visit>,
    order: chartform_types::OrderId,
) -> Option<&mut Order> {
    visits
        .values_mut()
        .flat_map(|v| v.orders.iter_mut())
        .find(|o| o.id == order)
}

fn void_observation(list: &mut [Observation], id: chartform_types::ObsId) -> bool {
    for obs in list.iter_mut() {
        if obs.id == id {
            obs.voided = true;
            return true;
        }
        if void_observation(&mut obs.members, id) {
            return true;
        }
    }
    false
}

fn attach_new_observations(visit: &mut Visit, drafted: &[NewObservation]) -> RecordResult<()> {
    // Drafted parents always precede their children (the ledger assigns
    // parent indexes as entries are pushed), which also rules out cycles.
    let mut child_indexes: Vec<Vec<usize>> = vec![Vec::new(); drafted.len()];
    for (index, entry) in drafted.iter().enumerate() {
        if let ObsParent::New(p) = entry.parent {
            if p >= index {
                return Err(RecordError::UnknownObservation(entry.id));
            }
            child_indexes[p].push(index);
        }
    }

    fn build(index: usize, drafted: &[NewObservation], child_indexes: &[Vec<usize>]) -> Observation {
        let entry = &drafted[index];
        Observation {
            id: entry.id,
            concept: entry.concept,
            value: entry.value.clone(),
            members: child_indexes[index]
                .iter()
                .map(|&child| build(child, drafted, child_indexes))
                .collect(),
            voided: false,
        }
    }

    for (index, entry) in drafted.iter().enumerate() {
        match entry.parent {
            ObsParent::New(_) => continue,
            ObsParent::TopLevel => {
                let node = build(index, drafted, &child_indexes);
                visit.observations.push(node);
            }
            ObsParent::Existing(parent_id) => {
                let node = build(index, drafted, &child_indexes);
                if !push_member(&mut visit.observations, parent_id, node) {
                    return Err(RecordError::UnknownObservation(parent_id));
                }
            }
        }
    }
    Ok(())
}

fn push_member(
    list: &mut [Observation],
    parent: chartform_types::ObsId,
    child: Observation,
) -> bool {
    fn walk(list: &mut [Observation], parent: chartform_types::ObsId) -> Option<&mut Observation> {
        for obs in list.iter_mut() {
            if obs.id == parent {
                return Some(obs);
            }
            if let Some(found) = walk(&mut obs.members, parent) {
                return Some(found);
            }
        }
        None
    }
    match walk(list, parent) {
        Some(target) => {
            target.members.push(child);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visit::ObsValue;
    use chartform_types::{ConceptId, ObsId, PersonId};
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn store_with_visit() -> (InMemoryStore, VisitId) {
        let mut store = InMemoryStore::new();
        let visit = Visit::new(VisitId(1), PersonId(7), date(2026, 1, 10));
        store.insert_visit(visit);
        (store, VisitId(1))
    }

    #[test]
    fn test_persist_creates_nested_observations() {
        let (mut store, visit_id) = store_with_visit();
        let mut draft = RecordDraft::for_visit(visit_id);
        let parent = draft.push_observation(NewObservation {
            id: ObsId::new(),
            concept: ConceptId(1),
            value: None,
            parent: ObsParent::TopLevel,
        });
        draft.push_observation(NewObservation {
            id: ObsId::new(),
            concept: ConceptId(2),
            value: Some(ObsValue::Numeric(3.0)),
            parent: ObsParent::New(parent),
        });
        draft.push_observation(NewObservation {
            id: ObsId::new(),
            concept: ConceptId(3),
            value: Some(ObsValue::Bool(true)),
            parent: ObsParent::New(parent),
        });

        store.persist(draft, date(2026, 1, 11)).expect("persist");
        let visit = store.visit(visit_id).unwrap();
        assert_eq!(visit.observations.len(), 1);
        let group = &visit.observations[0];
        assert_eq!(group.members.len(), 2);
        assert_eq!(group.members[0].concept, ConceptId(2));
        assert_eq!(group.members[1].concept, ConceptId(3));
        assert_eq!(visit.last_modified, date(2026, 1, 11));
    }

    #[test]
    fn test_persist_rejects_unknown_void_target_without_partial_apply() {
        let (mut store, visit_id) = store_with_visit();
        let mut draft = RecordDraft::for_visit(visit_id);
        draft.push_observation(NewObservation {
            id: ObsId::new(),
            concept: ConceptId(2),
            value: Some(ObsValue::Numeric(3.0)),
            parent: ObsParent::TopLevel,
        });
        draft.observations_to_void.push(ObsId::new());

        let err = store.persist(draft, date(2026, 1, 11)).expect_err("bad draft");
        assert!(matches!(err, RecordError::UnknownObservation(_)));
        // Nothing landed.
        assert!(store.visit(visit_id).unwrap().observations.is_empty());
    }

    #[test]
    fn test_persist_voids_and_stops_orders() {
        use crate::order::{Order, OrderAction};
        let (mut store, visit_id) = store_with_visit();
        let existing = Order {
            id: chartform_types::OrderId::new(),
            visit: visit_id,
            patient: PersonId(7),
            action: OrderAction::New,
            previous_order: None,
            drug: chartform_types::DrugId(4),
            date_activated: date(2026, 1, 1),
            date_stopped: None,
            auto_expire: None,
            dose: Some(1.0),
            dose_units: None,
            route: None,
            frequency: None,
            care_setting: None,
            quantity: None,
            num_refills: None,
            duration_days: None,
            instructions: None,
            order_reason: None,
            voided: false,
        };
        let existing_id = existing.id;
        store.visits.get_mut(&visit_id).unwrap().orders.push(existing);

        let mut draft = RecordDraft::for_visit(visit_id);
        draft.order_stops.push(crate::draft::OrderStop {
            order: existing_id,
            date_stopped: date(2026, 1, 31),
        });
        store.persist(draft, date(2026, 2, 1)).expect("persist");

        let visit = store.visit(visit_id).unwrap();
        assert_eq!(visit.orders[0].date_stopped, Some(date(2026, 1, 31)));
    }
}
