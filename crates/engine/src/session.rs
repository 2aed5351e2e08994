//! The per-request form entry session.
//!
//! One session coordinates one render-then-submit cycle: it loads the visit
//! graph, captures the last-modified marker for the optimistic staleness
//! check, renders the compiled form (populating the context and action
//! list), and later drives the two-phase submission. Sessions are strictly
//! sequential and own the in-memory record graph exclusively for their
//! cycle; nothing is cached across sessions.

use chartform_types::VisitId;
use chartform_record::draft::RecordDraft;
use chartform_record::reference::ReferenceResolver;
use chartform_record::store::RecordStore;
use chartform_record::time::Clock;
use chartform_record::visit::Visit;
use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::context::{FormEntryContext, Mode};
use crate::definition::CompiledForm;
use crate::error::{DesignError, SubmitError, ValidationError};
use crate::registry::{RenderScope, TagRegistry};
use crate::render::render_form;
use crate::submission::{Submission, SubmissionAction, SubmissionController, SubmitEnv};

/// The result of one submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// User-input problems; the form should be redisplayed with these
    /// messages beside their fields and the submitted values retained.
    Invalid(Vec<ValidationError>),
    /// The draft was applied and handed to the store.
    Applied(RecordDraft),
}

pub struct FormEntrySession<'a> {
    mode: Mode,
    config: EngineConfig,
    resolver: &'a dyn ReferenceResolver,
    clock: &'a dyn Clock,
    visit: Visit,
    marker: DateTime<Utc>,
    context: FormEntryContext,
    controller: SubmissionController,
    html: Option<String>,
}

impl<'a> FormEntrySession<'a> {
    /// Opens a session over a visit held by the store.
    ///
    /// In Edit and View the context is seeded with the visit's unclaimed
    /// entries and the patient's order pool; in Enter no matching runs.
    pub fn open(
        mode: Mode,
        visit_id: VisitId,
        store: &dyn RecordStore,
        config: EngineConfig,
        resolver: &'a dyn ReferenceResolver,
        clock: &'a dyn Clock,
    ) -> Result<Self, SubmitError> {
        let visit = store.load_visit(visit_id)?;
        let marker = visit.last_modified;
        let mut context = FormEntryContext::new(mode);
        if mode.matches_existing() {
            let orders = store.orders_for_patient(visit.patient)?;
            context.setup_existing(&visit, orders);
        }
        Ok(Self {
            mode,
            config,
            resolver,
            clock,
            visit,
            marker,
            context,
            controller: SubmissionController::new(),
            html: None,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn context(&self) -> &FormEntryContext {
        &self.context
    }

    /// The ordered submission action list built by the last render.
    pub fn actions(&self) -> &[SubmissionAction] {
        self.controller.actions()
    }

    /// Renders the form, retaining the HTML fragment, populated context,
    /// and action list for the subsequent submit call.
    pub fn render(
        &mut self,
        form: &CompiledForm,
        registry: &TagRegistry,
    ) -> Result<&str, DesignError> {
        let mut out = String::new();
        let mut scope = RenderScope {
            ctx: &mut self.context,
            controller: &mut self.controller,
            out: &mut out,
            resolver: self.resolver,
            config: &self.config,
            visit: &self.visit,
        };
        render_form(form, registry, &mut scope)?;
        self.html = Some(out);
        Ok(self.html.as_deref().expect("just rendered"))
    }

    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    /// Drives the two-phase submission protocol.
    ///
    /// Validation errors short of zero return [`SubmitOutcome::Invalid`]
    /// without touching the record. A changed last-modified marker is
    /// rejected as stale rather than silently merged. Apply-phase invariant
    /// violations abort with nothing persisted.
    pub fn submit(
        &mut self,
        store: &mut dyn RecordStore,
        submission: &Submission,
    ) -> Result<SubmitOutcome, SubmitError> {
        let env = SubmitEnv {
            resolver: self.resolver,
            config: &self.config,
            now: self.clock.now(),
            visit: &self.visit,
        };

        let errors = self.controller.validate(&self.context, submission, &env);
        if !errors.is_empty() {
            tracing::debug!(count = errors.len(), "submission failed validation");
            return Ok(SubmitOutcome::Invalid(errors));
        }

        let current = store.last_modified(self.visit.id)?;
        if current != self.marker {
            return Err(SubmitError::Stale {
                rendered: self.marker,
                current,
            });
        }

        let draft = self.controller.apply(&self.context, submission, &env)?;
        store.persist(draft.clone(), env.now)?;
        tracing::debug!(visit = %self.visit.id, "submission applied");
        Ok(SubmitOutcome::Applied(draft))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{CompiledForm, ElementNode, FormNode};
    use crate::error::codes;
    use crate::orders::OrderWidgets;
    use crate::widget::FieldValue;
    use chartform_types::{CareSettingId, ConceptId, DrugId, FrequencyId, PersonId};
    use chartform_record::order::{Order, OrderAction};
    use chartform_record::reference::{
        CareSetting, CareSettingKind, Concept, Drug, Frequency, StaticReferences,
    };
    use chartform_record::store::{InMemoryStore, RecordStore};
    use chartform_record::time::FixedClock;
    use chartform_record::visit::{ObsValue, Observation, Visit};
    use chrono::{TimeZone, Utc};

    const WEIGHT: u32 = 5089;
    const ASPIRIN: u32 = 1;
    const OUTPATIENT: u32 = 1;
    const INPATIENT: u32 = 2;
    const DAILY: u32 = 1;
    const ORAL: u32 = 100;
    const MILLIGRAM: u32 = 101;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn references() -> StaticReferences {
        let mut refs = StaticReferences::new();
        refs.add_concept(Concept {
            id: ConceptId(WEIGHT),
            name: "Weight (kg)".into(),
            answers: vec![],
        });
        refs.add_concept(Concept {
            id: ConceptId(ORAL),
            name: "Oral".into(),
            answers: vec![],
        });
        refs.add_concept(Concept {
            id: ConceptId(MILLIGRAM),
            name: "mg".into(),
            answers: vec![],
        });
        refs.add_route(ConceptId(ORAL));
        refs.add_dose_unit(ConceptId(MILLIGRAM));
        refs.add_drug(Drug {
            id: DrugId(ASPIRIN),
            name: "Aspirin 81mg".into(),
            concept: ConceptId(71),
            min_daily_dose: None,
            max_daily_dose: None,
        });
        refs.add_care_setting(CareSetting {
            id: CareSettingId(OUTPATIENT),
            name: "Outpatient".into(),
            kind: CareSettingKind::Outpatient,
        });
        refs.add_care_setting(CareSetting {
            id: CareSettingId(INPATIENT),
            name: "Inpatient".into(),
            kind: CareSettingKind::Inpatient,
        });
        refs.add_frequency(Frequency {
            id: FrequencyId(DAILY),
            name: "Once daily".into(),
        });
        refs
    }

    fn order_form() -> FormNode {
        FormNode::Element(
            ElementNode::new("htmlform").with_child(FormNode::Element(
                ElementNode::new("drugOrder").with_attribute("drugs", ASPIRIN.to_string()),
            )),
        )
    }

    fn order_widgets(session: &FormEntrySession<'_>) -> OrderWidgets {
        session
            .actions()
            .iter()
            .find_map(|a| match a {
                SubmissionAction::DrugOrder(action) => Some(action.widgets.clone()),
                _ => None,
            })
            .expect("form has a drug order field")
    }

    /// Field-name lookup for a widget ref, via the session context.
    fn field(session: &FormEntrySession<'_>, widget: crate::widget::WidgetRef) -> String {
        session.context().field_name(widget).as_str().to_owned()
    }

    fn base_order_submission(
        session: &FormEntrySession<'_>,
        action: &str,
        dose: &str,
        start: &str,
    ) -> Submission {
        let w = order_widgets(session);
        let mut submission = Submission::new();
        submission.insert(&field(session, w.action), action);
        submission.insert(&field(session, w.drug), &ASPIRIN.to_string());
        submission.insert(&field(session, w.dose), dose);
        submission.insert(&field(session, w.dose_units), &MILLIGRAM.to_string());
        submission.insert(&field(session, w.route), &ORAL.to_string());
        submission.insert(&field(session, w.frequency), &DAILY.to_string());
        submission.insert(&field(session, w.care_setting), &INPATIENT.to_string());
        submission.insert(&field(session, w.start_date), start);
        submission
    }

    fn store_with_visit(visit: Visit) -> InMemoryStore {
        let mut store = InMemoryStore::new();
        store.insert_visit(visit);
        store
    }

    fn applied(outcome: SubmitOutcome) -> RecordDraft {
        match outcome {
            SubmitOutcome::Applied(draft) => draft,
            SubmitOutcome::Invalid(errors) => panic!("expected applied, got {errors:?}"),
        }
    }

    fn invalid(outcome: SubmitOutcome) -> Vec<ValidationError> {
        match outcome {
            SubmitOutcome::Invalid(errors) => errors,
            SubmitOutcome::Applied(_) => panic!("expected validation errors"),
        }
    }

    #[test]
    fn test_scenario_a_new_order() {
        let refs = references();
        let clock = FixedClock(date(2026, 3, 1));
        let registry = TagRegistry::standard();
        let form = CompiledForm::compile(&order_form(), &registry);
        let mut store = store_with_visit(Visit::new(VisitId(1), PersonId(1), date(2026, 3, 1)));

        let mut session = FormEntrySession::open(
            Mode::Enter,
            VisitId(1),
            &store,
            EngineConfig::default(),
            &refs,
            &clock,
        )
        .unwrap();
        session.render(&form, &registry).unwrap();

        let submission = base_order_submission(&session, "NEW", "1", "2026-03-01");
        let draft = applied(session.submit(&mut store, &submission).unwrap());

        assert_eq!(draft.orders_to_create.len(), 1);
        let order = &draft.orders_to_create[0];
        assert_eq!(order.action, OrderAction::New);
        assert_eq!(order.date_activated, date(2026, 3, 1));
        assert_eq!(order.previous_order, None);
        assert_eq!(order.dose, Some(1.0));
        assert!(draft.orders_to_void.is_empty());
        assert!(draft.order_stops.is_empty());
    }

    #[test]
    fn test_scenario_b_same_session_edit_voids_and_replaces() {
        let refs = references();
        let clock = FixedClock(date(2026, 3, 1));
        let registry = TagRegistry::standard();
        let form = CompiledForm::compile(&order_form(), &registry);
        let mut store = store_with_visit(Visit::new(VisitId(1), PersonId(1), date(2026, 3, 1)));

        // First pass: enter the order.
        let mut session = FormEntrySession::open(
            Mode::Enter,
            VisitId(1),
            &store,
            EngineConfig::default(),
            &refs,
            &clock,
        )
        .unwrap();
        session.render(&form, &registry).unwrap();
        let submission = base_order_submission(&session, "NEW", "1", "2026-03-01");
        applied(session.submit(&mut store, &submission).unwrap());
        let first_order_id = store.visit(VisitId(1)).unwrap().orders[0].id;

        // Reopen the same not-yet-finalized visit and revise the dose.
        let mut session = FormEntrySession::open(
            Mode::Edit,
            VisitId(1),
            &store,
            EngineConfig::default(),
            &refs,
            &clock,
        )
        .unwrap();
        session.render(&form, &registry).unwrap();
        let submission = base_order_submission(&session, "REVISE", "2", "2026-03-01");
        let draft = applied(session.submit(&mut store, &submission).unwrap());

        // The first order is voided and replaced; no chain is created.
        assert_eq!(draft.orders_to_void, vec![first_order_id]);
        assert_eq!(draft.orders_to_create.len(), 1);
        let replacement = &draft.orders_to_create[0];
        assert_eq!(replacement.action, OrderAction::New);
        assert_eq!(replacement.previous_order, None);
        assert_eq!(replacement.dose, Some(2.0));
        assert!(draft.order_stops.is_empty());
    }

    #[test]
    fn test_scenario_c_cross_visit_revision_extends_chain() {
        let refs = references();
        let clock = FixedClock(date(2026, 4, 10));
        let registry = TagRegistry::standard();
        let form = CompiledForm::compile(&order_form(), &registry);

        // An order from an earlier, finalized visit.
        let mut earlier = Visit::new(VisitId(1), PersonId(1), date(2026, 3, 1));
        let original = Order {
            id: chartform_types::OrderId::new(),
            visit: VisitId(1),
            patient: PersonId(1),
            action: OrderAction::New,
            previous_order: None,
            drug: DrugId(ASPIRIN),
            date_activated: date(2026, 3, 1),
            date_stopped: None,
            auto_expire: None,
            dose: Some(1.0),
            dose_units: Some(ConceptId(MILLIGRAM)),
            route: Some(ConceptId(ORAL)),
            frequency: Some(FrequencyId(DAILY)),
            care_setting: Some(CareSettingId(INPATIENT)),
            quantity: None,
            num_refills: None,
            duration_days: None,
            instructions: None,
            order_reason: None,
            voided: false,
        };
        let original_id = original.id;
        earlier.orders.push(original);

        let mut store = InMemoryStore::new();
        store.insert_visit(earlier);
        store.insert_visit(Visit::new(VisitId(2), PersonId(1), date(2026, 4, 10)));

        let mut session = FormEntrySession::open(
            Mode::Edit,
            VisitId(2),
            &store,
            EngineConfig::default(),
            &refs,
            &clock,
        )
        .unwrap();
        session.render(&form, &registry).unwrap();
        let submission = base_order_submission(&session, "REVISE", "2", "2026-04-10");
        let draft = applied(session.submit(&mut store, &submission).unwrap());

        assert!(draft.orders_to_void.is_empty());
        assert_eq!(draft.orders_to_create.len(), 1);
        let revision = &draft.orders_to_create[0];
        assert_eq!(revision.action, OrderAction::Revise);
        assert_eq!(revision.previous_order, Some(original_id));
        assert_eq!(revision.date_activated, date(2026, 4, 10));
        assert_eq!(revision.dose, Some(2.0));

        // Chain invariant: previous stopped one day before the new start.
        assert_eq!(draft.order_stops.len(), 1);
        assert_eq!(draft.order_stops[0].order, original_id);
        assert_eq!(draft.order_stops[0].date_stopped, date(2026, 4, 9));
        assert!(draft.order_stops[0].date_stopped < revision.date_activated);

        let persisted = store.visit(VisitId(1)).unwrap();
        assert_eq!(persisted.orders[0].date_stopped, Some(date(2026, 4, 9)));
    }

    #[test]
    fn test_scenario_d_renew_with_changed_dosing_is_rejected() {
        let refs = references();
        let clock = FixedClock(date(2026, 4, 10));
        let registry = TagRegistry::standard();
        let form = CompiledForm::compile(&order_form(), &registry);

        let mut earlier = Visit::new(VisitId(1), PersonId(1), date(2026, 3, 1));
        earlier.orders.push(Order {
            id: chartform_types::OrderId::new(),
            visit: VisitId(1),
            patient: PersonId(1),
            action: OrderAction::New,
            previous_order: None,
            drug: DrugId(ASPIRIN),
            date_activated: date(2026, 3, 1),
            date_stopped: None,
            auto_expire: None,
            dose: Some(1.0),
            dose_units: Some(ConceptId(MILLIGRAM)),
            route: Some(ConceptId(ORAL)),
            frequency: Some(FrequencyId(DAILY)),
            care_setting: Some(CareSettingId(INPATIENT)),
            quantity: None,
            num_refills: None,
            duration_days: None,
            instructions: None,
            order_reason: None,
            voided: false,
        });
        let mut store = InMemoryStore::new();
        store.insert_visit(earlier);
        store.insert_visit(Visit::new(VisitId(2), PersonId(1), date(2026, 4, 10)));

        let mut session = FormEntrySession::open(
            Mode::Edit,
            VisitId(2),
            &store,
            EngineConfig::default(),
            &refs,
            &clock,
        )
        .unwrap();
        session.render(&form, &registry).unwrap();
        let submission = base_order_submission(&session, "RENEW", "2", "2026-04-10");
        let errors = invalid(session.submit(&mut store, &submission).unwrap());

        assert!(errors
            .iter()
            .any(|e| e.message == codes::DOSING_CHANGED_FOR_RENEW));
        // Zero orders created anywhere.
        assert!(store.visit(VisitId(2)).unwrap().orders.is_empty());
        assert!(store.visit(VisitId(1)).unwrap().orders[0].date_stopped.is_none());
    }

    #[test]
    fn test_scenario_e_revise_without_previous_order() {
        let refs = references();
        let clock = FixedClock(date(2026, 3, 1));
        let registry = TagRegistry::standard();
        let form = CompiledForm::compile(&order_form(), &registry);
        let mut store = store_with_visit(Visit::new(VisitId(1), PersonId(1), date(2026, 3, 1)));

        let mut session = FormEntrySession::open(
            Mode::Enter,
            VisitId(1),
            &store,
            EngineConfig::default(),
            &refs,
            &clock,
        )
        .unwrap();
        session.render(&form, &registry).unwrap();
        let submission = base_order_submission(&session, "REVISE", "2", "2026-03-01");
        let errors = invalid(session.submit(&mut store, &submission).unwrap());

        assert!(errors
            .iter()
            .any(|e| e.message == codes::PREVIOUS_ORDER_REQUIRED));
    }

    #[test]
    fn test_auto_expired_order_synthesizes_discontinuation() {
        let refs = references();
        // "Now" is well past the five-day duration.
        let clock = FixedClock(date(2026, 3, 20));
        let registry = TagRegistry::standard();
        let form = CompiledForm::compile(&order_form(), &registry);
        let mut store = store_with_visit(Visit::new(VisitId(1), PersonId(1), date(2026, 3, 1)));

        let mut session = FormEntrySession::open(
            Mode::Enter,
            VisitId(1),
            &store,
            EngineConfig::default(),
            &refs,
            &clock,
        )
        .unwrap();
        session.render(&form, &registry).unwrap();
        let w = order_widgets(&session);
        let mut submission = base_order_submission(&session, "NEW", "1", "2026-03-01");
        submission.insert(&field(&session, w.duration), "5");
        let draft = applied(session.submit(&mut store, &submission).unwrap());

        assert_eq!(draft.orders_to_create.len(), 2);
        let order = &draft.orders_to_create[0];
        let discontinuation = &draft.orders_to_create[1];
        assert_eq!(order.auto_expire, Some(date(2026, 3, 6)));
        assert_eq!(discontinuation.action, OrderAction::Discontinue);
        assert_eq!(discontinuation.previous_order, Some(order.id));
        assert_eq!(discontinuation.date_activated, date(2026, 3, 6));
        assert_eq!(order.date_stopped, Some(date(2026, 3, 5)));
    }

    #[test]
    fn test_discontinue_cross_session_stops_previous() {
        let refs = references();
        let clock = FixedClock(date(2026, 4, 10));
        let registry = TagRegistry::standard();
        let form = CompiledForm::compile(&order_form(), &registry);

        let mut earlier = Visit::new(VisitId(1), PersonId(1), date(2026, 3, 1));
        let original = Order {
            id: chartform_types::OrderId::new(),
            visit: VisitId(1),
            patient: PersonId(1),
            action: OrderAction::New,
            previous_order: None,
            drug: DrugId(ASPIRIN),
            date_activated: date(2026, 3, 1),
            date_stopped: None,
            auto_expire: None,
            dose: Some(1.0),
            dose_units: Some(ConceptId(MILLIGRAM)),
            route: Some(ConceptId(ORAL)),
            frequency: Some(FrequencyId(DAILY)),
            care_setting: Some(CareSettingId(INPATIENT)),
            quantity: None,
            num_refills: None,
            duration_days: None,
            instructions: None,
            order_reason: None,
            voided: false,
        };
        let original_id = original.id;
        earlier.orders.push(original);
        let mut store = InMemoryStore::new();
        store.insert_visit(earlier);
        store.insert_visit(Visit::new(VisitId(2), PersonId(1), date(2026, 4, 10)));

        let mut session = FormEntrySession::open(
            Mode::Edit,
            VisitId(2),
            &store,
            EngineConfig::default(),
            &refs,
            &clock,
        )
        .unwrap();
        session.render(&form, &registry).unwrap();
        let w = order_widgets(&session);
        let mut submission = Submission::new();
        submission.insert(&field(&session, w.action), "DISCONTINUE");
        submission.insert(&field(&session, w.discontinue_date), "2026-04-10");
        let draft = applied(session.submit(&mut store, &submission).unwrap());

        assert_eq!(draft.orders_to_create.len(), 1);
        let discontinuation = &draft.orders_to_create[0];
        assert_eq!(discontinuation.action, OrderAction::Discontinue);
        assert_eq!(discontinuation.previous_order, Some(original_id));
        assert_eq!(discontinuation.date_activated, date(2026, 4, 10));
        assert_eq!(draft.order_stops[0].date_stopped, date(2026, 4, 9));
    }

    #[test]
    fn test_round_trip_enter_then_edit_reproduces_values() {
        let refs = references();
        let clock = FixedClock(date(2026, 3, 1));
        let registry = TagRegistry::standard();
        let form_def = FormNode::Element(
            ElementNode::new("htmlform")
                .with_child(FormNode::Element(ElementNode::new("visitDate")))
                .with_child(FormNode::Element(
                    ElementNode::new("obs")
                        .with_attribute("concept", WEIGHT.to_string())
                        .with_attribute("datatype", "number"),
                )),
        );
        let form = CompiledForm::compile(&form_def, &registry);
        let mut store = store_with_visit(Visit::new(VisitId(1), PersonId(1), date(2026, 3, 1)));

        let mut session = FormEntrySession::open(
            Mode::Enter,
            VisitId(1),
            &store,
            EngineConfig::default(),
            &refs,
            &clock,
        )
        .unwrap();
        session.render(&form, &registry).unwrap();
        // w1 visit date, w2 its error, w3 weight, w4 its error.
        let submission = Submission::from_pairs(&[("w1", "2026-03-01"), ("w3", "72.5")]);
        applied(session.submit(&mut store, &submission).unwrap());

        let mut edit = FormEntrySession::open(
            Mode::Edit,
            VisitId(1),
            &store,
            EngineConfig::default(),
            &refs,
            &clock,
        )
        .unwrap();
        edit.render(&form, &registry).unwrap();

        let weight_widget = edit
            .actions()
            .iter()
            .find_map(|a| match a {
                SubmissionAction::Obs(obs) => Some(obs.widget),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            edit.context().widget(weight_widget).initial,
            Some(FieldValue::Number(72.5))
        );
    }

    #[test]
    fn test_matching_uniqueness_first_registered_first_claimed() {
        let refs = references();
        let clock = FixedClock(date(2026, 3, 1));
        let registry = TagRegistry::standard();

        // Two declared fields over three pre-existing entries for the same
        // concept: exactly two are consumed, in registration order.
        let obs_field = || {
            FormNode::Element(
                ElementNode::new("obs")
                    .with_attribute("concept", WEIGHT.to_string())
                    .with_attribute("datatype", "number"),
            )
        };
        let form_def = FormNode::Element(
            ElementNode::new("htmlform")
                .with_child(obs_field())
                .with_child(obs_field()),
        );
        let form = CompiledForm::compile(&form_def, &registry);

        let mut visit = Visit::new(VisitId(1), PersonId(1), date(2026, 3, 1));
        for value in [70.0, 71.0, 72.0] {
            visit
                .observations
                .push(Observation::new(ConceptId(WEIGHT), ObsValue::Numeric(value)));
        }
        let store = store_with_visit(visit);

        let mut session = FormEntrySession::open(
            Mode::Edit,
            VisitId(1),
            &store,
            EngineConfig::default(),
            &refs,
            &clock,
        )
        .unwrap();
        session.render(&form, &registry).unwrap();

        let initials: Vec<_> = session
            .actions()
            .iter()
            .filter_map(|a| match a {
                SubmissionAction::Obs(obs) => {
                    Some(session.context().widget(obs.widget).initial.clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            initials,
            vec![
                Some(FieldValue::Number(70.0)),
                Some(FieldValue::Number(71.0)),
            ]
        );
        assert_eq!(session.context().unclaimed_obs_count(), 1);
    }

    #[test]
    fn test_stale_submission_is_rejected() {
        let refs = references();
        let clock = FixedClock(date(2026, 3, 2));
        let registry = TagRegistry::standard();
        let form_def = FormNode::Element(ElementNode::new("htmlform").with_child(
            FormNode::Element(
                ElementNode::new("obs")
                    .with_attribute("concept", WEIGHT.to_string())
                    .with_attribute("datatype", "number"),
            ),
        ));
        let form = CompiledForm::compile(&form_def, &registry);
        let mut store = store_with_visit(Visit::new(VisitId(1), PersonId(1), date(2026, 3, 1)));

        let mut session = FormEntrySession::open(
            Mode::Enter,
            VisitId(1),
            &store,
            EngineConfig::default(),
            &refs,
            &clock,
        )
        .unwrap();
        session.render(&form, &registry).unwrap();

        // Another submission lands in between.
        store
            .persist(RecordDraft::for_visit(VisitId(1)), date(2026, 3, 2))
            .unwrap();

        let submission = Submission::from_pairs(&[("w1", "70")]);
        let err = session.submit(&mut store, &submission).expect_err("stale");
        assert!(matches!(err, SubmitError::Stale { .. }));
    }

    #[test]
    fn test_outpatient_quantity_required_by_config() {
        let refs = references();
        let clock = FixedClock(date(2026, 3, 1));
        let registry = TagRegistry::standard();
        let form = CompiledForm::compile(&order_form(), &registry);
        let mut store = store_with_visit(Visit::new(VisitId(1), PersonId(1), date(2026, 3, 1)));

        let mut session = FormEntrySession::open(
            Mode::Enter,
            VisitId(1),
            &store,
            EngineConfig::default(),
            &refs,
            &clock,
        )
        .unwrap();
        session.render(&form, &registry).unwrap();
        let w = order_widgets(&session);
        let mut submission = base_order_submission(&session, "NEW", "1", "2026-03-01");
        submission.set(&field(&session, w.care_setting), &[&OUTPATIENT.to_string()]);
        let errors = invalid(session.submit(&mut store, &submission).unwrap());

        assert_eq!(
            errors.iter().filter(|e| e.message == codes::REQUIRED).count(),
            2 // quantity and refills
        );
    }
}
