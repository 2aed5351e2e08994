//! The order revision engine.
//!
//! One [`DrugOrderAction`] owns the widgets of one order-bearing field and
//! implements both phases of its submission: validation of the declared
//! action against the claimed previous order, and the apply-phase planning
//! that turns an [`OrderTag`] into chain-linked order mutations.
//!
//! State machine per order slot (one drug for one patient):
//! `ABSENT -> ACTIVE_NEW -> ACTIVE_REVISED -> DISCONTINUED`, with a fresh
//! `NEW` allowed to start a new slot after `DISCONTINUED`. A revise or renew
//! of an order created earlier in the same edit session (same drug, same
//! day-truncated activation, same owning visit) voids that order and
//! replaces it with a plain `NEW` order instead of extending the chain;
//! never-finalized data does not accumulate revision links.

use chartform_types::{CareSettingId, ConceptId, DrugId, FrequencyId, OrderId};
use chartform_record::draft::OrderStop;
use chartform_record::order::{same_day, stop_date_for, Order, OrderAction};
use chartform_record::reference::CareSettingKind;
use chartform_record::RecordError;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::context::{ClaimedOrder, FormEntryContext};
use crate::error::{codes, ApplyError, ValidationError};
use crate::submission::{ApplyState, Submission, SubmitEnv};
use crate::widget::WidgetRef;

/// The widget set one drug-order field registers.
#[derive(Clone, Debug)]
pub struct OrderWidgets {
    pub action: WidgetRef,
    /// Order-level error target for chain and required-reference problems.
    pub error: WidgetRef,
    pub drug: WidgetRef,
    pub drug_error: WidgetRef,
    pub dose: WidgetRef,
    pub dose_error: WidgetRef,
    pub dose_units: WidgetRef,
    pub route: WidgetRef,
    pub frequency: WidgetRef,
    pub care_setting: WidgetRef,
    pub quantity: WidgetRef,
    pub quantity_error: WidgetRef,
    pub num_refills: WidgetRef,
    pub refills_error: WidgetRef,
    pub duration: WidgetRef,
    pub duration_error: WidgetRef,
    pub start_date: WidgetRef,
    pub start_error: WidgetRef,
    pub discontinue_date: WidgetRef,
    pub discontinue_error: WidgetRef,
    pub discontinue_reason: Option<WidgetRef>,
    pub reason_error: Option<WidgetRef>,
    pub instructions: Option<WidgetRef>,
}

/// The transient bridge between raw submitted values and order
/// construction.
#[derive(Clone, Debug, Default)]
pub struct OrderTag {
    pub drug: Option<DrugId>,
    pub dose: Option<f64>,
    pub dose_units: Option<ConceptId>,
    pub route: Option<ConceptId>,
    pub frequency: Option<FrequencyId>,
    pub care_setting: Option<CareSettingId>,
    pub quantity: Option<f64>,
    pub num_refills: Option<u32>,
    pub duration_days: Option<u32>,
    pub start_date: Option<DateTime<Utc>>,
    pub discontinue_date: Option<DateTime<Utc>>,
    pub discontinue_reason: Option<ConceptId>,
    pub instructions: Option<String>,
}

/// Field action for one order-bearing field.
#[derive(Debug)]
pub struct DrugOrderAction {
    pub widgets: OrderWidgets,
    /// Drugs this field is configured to order.
    pub drugs: Vec<DrugId>,
    /// Whether dose is checked against the drug's daily-dose bounds.
    pub validate_dose: bool,
    /// The existing chain claimed during rendering, if any.
    pub existing: Option<ClaimedOrder>,
}

impl DrugOrderAction {
    /// Reads the submitted action; `None` means this entry was not
    /// submitted at all this cycle.
    fn read_action(
        &self,
        ctx: &FormEntryContext,
        submission: &Submission,
        iteration: Option<usize>,
    ) -> Option<OrderAction> {
        ctx.widget(self.widgets.action)
            .submitted(submission, iteration)
            .and_then(OrderAction::parse)
    }

    /// Assembles the order tag from the submitted widget values, collecting
    /// per-field parse errors.
    fn read_tag(
        &self,
        ctx: &FormEntryContext,
        submission: &Submission,
        iteration: Option<usize>,
        errors: &mut Vec<ValidationError>,
    ) -> OrderTag {
        let w = &self.widgets;
        let mut tag = OrderTag::default();

        let drug_raw = ctx.widget(w.drug).submitted(submission, iteration);
        if let Some(raw) = drug_raw {
            match DrugId::parse(raw) {
                Some(drug) => tag.drug = Some(drug),
                None => errors.push(ValidationError::new(
                    ctx.error_field(w.drug),
                    codes::BAD_CODED_VALUE,
                )),
            }
        }

        match ctx.widget(w.dose).submitted_number(submission, iteration) {
            Ok(dose) => tag.dose = dose,
            Err(code) => errors.push(ValidationError::new(ctx.error_field(w.dose), code)),
        }
        match ctx.widget(w.quantity).submitted_number(submission, iteration) {
            Ok(quantity) => tag.quantity = quantity,
            Err(code) => errors.push(ValidationError::new(ctx.error_field(w.quantity), code)),
        }
        match ctx
            .widget(w.num_refills)
            .submitted_number(submission, iteration)
        {
            Ok(refills) => tag.num_refills = refills.map(|n| n as u32),
            Err(code) => errors.push(ValidationError::new(ctx.error_field(w.num_refills), code)),
        }
        match ctx.widget(w.duration).submitted_number(submission, iteration) {
            Ok(days) => tag.duration_days = days.map(|n| n as u32),
            Err(code) => errors.push(ValidationError::new(ctx.error_field(w.duration), code)),
        }

        match ctx
            .widget(w.start_date)
            .submitted_date(submission, iteration)
        {
            Ok(date) => tag.start_date = date.map(to_midnight),
            Err(code) => errors.push(ValidationError::new(ctx.error_field(w.start_date), code)),
        }
        match ctx
            .widget(w.discontinue_date)
            .submitted_date(submission, iteration)
        {
            Ok(date) => tag.discontinue_date = date.map(to_midnight),
            Err(code) => errors.push(ValidationError::new(
                ctx.error_field(w.discontinue_date),
                code,
            )),
        }

        tag.dose_units = ctx
            .widget(w.dose_units)
            .submitted(submission, iteration)
            .and_then(ConceptId::parse);
        tag.route = ctx
            .widget(w.route)
            .submitted(submission, iteration)
            .and_then(ConceptId::parse);
        tag.frequency = ctx
            .widget(w.frequency)
            .submitted(submission, iteration)
            .and_then(FrequencyId::parse);
        tag.care_setting = ctx
            .widget(w.care_setting)
            .submitted(submission, iteration)
            .and_then(CareSettingId::parse);
        if let Some(reason_widget) = w.discontinue_reason {
            tag.discontinue_reason = ctx
                .widget(reason_widget)
                .submitted(submission, iteration)
                .and_then(ConceptId::parse);
        }
        if let Some(instructions_widget) = w.instructions {
            tag.instructions = ctx
                .widget(instructions_widget)
                .submitted(submission, iteration)
                .map(str::to_owned);
        }
        tag
    }

    pub(crate) fn validate(
        &self,
        ctx: &FormEntryContext,
        submission: &Submission,
        env: &SubmitEnv<'_>,
        iteration: Option<usize>,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(action) = self.read_action(ctx, submission, iteration) else {
            // Nothing submitted for this entry.
            return;
        };
        let w = &self.widgets;
        let mut local = Vec::new();
        let tag = self.read_tag(ctx, submission, iteration, &mut local);

        let require = |local: &mut Vec<ValidationError>, missing: bool, widget: WidgetRef| {
            if missing {
                local.push(ValidationError::new(ctx.error_field(widget), codes::REQUIRED));
            }
        };

        if action != OrderAction::Discontinue {
            require(&mut local, tag.care_setting.is_none(), w.action);
            require(&mut local, tag.dose.is_none(), w.dose);
            require(&mut local, tag.dose_units.is_none(), w.action);
            require(&mut local, tag.route.is_none(), w.action);
            require(&mut local, tag.frequency.is_none(), w.action);
            require(&mut local, tag.start_date.is_none(), w.start_date);

            if env.config.require_drug {
                require(&mut local, tag.drug.is_none() && self.existing.is_none(), w.drug);
            }

            if self.validate_dose {
                if let (Some(dose), Some(drug_id)) = (tag.dose, tag.drug) {
                    if let Some(drug) = env.resolver.drug(drug_id) {
                        let below = drug.min_daily_dose.is_some_and(|min| dose < min);
                        let above = drug.max_daily_dose.is_some_and(|max| dose > max);
                        if below || above {
                            local.push(ValidationError::new(
                                ctx.error_field(w.dose),
                                codes::DOSE_OUT_OF_RANGE,
                            ));
                        }
                    }
                }
            }

            if env.config.require_outpatient_quantity {
                let outpatient = tag
                    .care_setting
                    .and_then(|id| env.resolver.care_setting(id))
                    .is_some_and(|cs| cs.kind == CareSettingKind::Outpatient);
                if outpatient {
                    require(&mut local, tag.quantity.is_none(), w.quantity);
                    require(&mut local, tag.num_refills.is_none(), w.num_refills);
                }
            }
        } else {
            require(&mut local, tag.discontinue_date.is_none(), w.discontinue_date);
        }

        if let (Some(start), Some(end)) = (tag.start_date, tag.discontinue_date) {
            if end < start {
                local.push(ValidationError::new(
                    ctx.error_field(w.discontinue_date),
                    codes::DISCONTINUE_BEFORE_START,
                ));
            }
        }
        if tag.discontinue_reason.is_some() && tag.discontinue_date.is_none() {
            if let Some(reason_widget) = w.discontinue_reason {
                local.push(ValidationError::new(
                    ctx.error_field(reason_widget),
                    codes::REASON_WITHOUT_DATE,
                ));
            }
        }

        if action != OrderAction::New {
            match &self.existing {
                None => local.push(ValidationError::new(
                    ctx.error_field(w.action),
                    codes::PREVIOUS_ORDER_REQUIRED,
                )),
                Some(claimed) => {
                    let previous_discontinued = claimed.tip.action == OrderAction::Discontinue;
                    if previous_discontinued && action != OrderAction::Discontinue {
                        // The slot is closed; only a fresh NEW can reopen it.
                        local.push(ValidationError::new(
                            ctx.error_field(w.action),
                            codes::PREVIOUS_ORDER_REQUIRED,
                        ));
                    } else {
                        if tag
                            .drug
                            .is_some_and(|drug| drug != claimed.dosing.drug)
                        {
                            local.push(ValidationError::new(
                                ctx.error_field(w.action),
                                codes::DRUG_CHANGED_FOR_REVISION,
                            ));
                        }
                        if action == OrderAction::Renew
                            && dosing_changed(&tag, &claimed.dosing)
                        {
                            local.push(ValidationError::new(
                                ctx.error_field(w.action),
                                codes::DOSING_CHANGED_FOR_RENEW,
                            ));
                        }
                    }
                }
            }
        }

        errors.extend(local);
    }

    pub(crate) fn apply(
        &self,
        ctx: &FormEntryContext,
        submission: &Submission,
        env: &SubmitEnv<'_>,
        iteration: Option<usize>,
        state: &mut ApplyState,
    ) -> Result<(), ApplyError> {
        let Some(action) = self.read_action(ctx, submission, iteration) else {
            return Ok(());
        };
        let mut parse_errors = Vec::new();
        let tag = self.read_tag(ctx, submission, iteration, &mut parse_errors);
        if !parse_errors.is_empty() {
            let field = ctx.widget(self.widgets.action).field().clone();
            return Err(ApplyError::UnvalidatedValue(field));
        }

        match action {
            OrderAction::New => {
                let start = self.required_date(ctx, tag.start_date, self.widgets.start_date)?;
                let order = self.build_order(ctx, OrderAction::New, None, start, &tag, env)?;
                push_with_companion(order, &tag, env, state);
            }
            OrderAction::Revise | OrderAction::Renew => {
                let claimed = self.claimed(ctx)?;
                let start = self.required_date(ctx, tag.start_date, self.widgets.start_date)?;
                let previous = &claimed.tip;
                let drug = tag.drug.unwrap_or(claimed.dosing.drug);
                if is_same_session(previous, drug, start, env) {
                    tracing::debug!(
                        previous = %previous.id,
                        "same-session amendment: voiding and re-issuing as NEW"
                    );
                    state.draft.orders_to_void.push(previous.id);
                    let order = self.build_order(ctx, OrderAction::New, None, start, &tag, env)?;
                    push_with_companion(order, &tag, env, state);
                } else {
                    let order =
                        self.build_order(ctx, action, Some(previous.id), start, &tag, env)?;
                    state.draft.order_stops.push(OrderStop {
                        order: previous.id,
                        date_stopped: stop_date_for(start),
                    });
                    push_with_companion(order, &tag, env, state);
                }
            }
            OrderAction::Discontinue => {
                let claimed = self.claimed(ctx)?;
                let date =
                    self.required_date(ctx, tag.discontinue_date, self.widgets.discontinue_date)?;
                let previous = &claimed.tip;
                if previous.action == OrderAction::Discontinue {
                    // Amending an existing discontinuation: only its date and
                    // reason change; the chain target stays the same.
                    let target = previous.previous_order.ok_or_else(|| {
                        ApplyError::Record(RecordError::MissingPreviousOrder(previous.id))
                    })?;
                    state.draft.orders_to_void.push(previous.id);
                    let order =
                        build_discontinuation(&claimed.dosing, target, date, tag.discontinue_reason, env);
                    state.draft.order_stops.push(OrderStop {
                        order: target,
                        date_stopped: stop_date_for(date),
                    });
                    state.draft.orders_to_create.push(order);
                } else if is_same_session(previous, previous.drug, date, env) {
                    // Ordered and discontinued within one never-finalized
                    // session: the order simply goes away.
                    tracing::debug!(previous = %previous.id, "same-session discontinue: voiding");
                    state.draft.orders_to_void.push(previous.id);
                } else {
                    let order = build_discontinuation(
                        &claimed.dosing,
                        previous.id,
                        date,
                        tag.discontinue_reason,
                        env,
                    );
                    state.draft.order_stops.push(OrderStop {
                        order: previous.id,
                        date_stopped: stop_date_for(date),
                    });
                    state.draft.orders_to_create.push(order);
                }
            }
        }
        Ok(())
    }

    fn claimed(&self, ctx: &FormEntryContext) -> Result<&ClaimedOrder, ApplyError> {
        self.existing.as_ref().ok_or_else(|| {
            ApplyError::UnvalidatedValue(ctx.widget(self.widgets.action).field().clone())
        })
    }

    fn required_date(
        &self,
        ctx: &FormEntryContext,
        date: Option<DateTime<Utc>>,
        widget: WidgetRef,
    ) -> Result<DateTime<Utc>, ApplyError> {
        date.ok_or_else(|| ApplyError::UnvalidatedValue(ctx.widget(widget).field().clone()))
    }

    fn build_order(
        &self,
        ctx: &FormEntryContext,
        action: OrderAction,
        previous: Option<OrderId>,
        date_activated: DateTime<Utc>,
        tag: &OrderTag,
        env: &SubmitEnv<'_>,
    ) -> Result<Order, ApplyError> {
        let drug = tag
            .drug
            .or_else(|| self.existing.as_ref().map(|c| c.dosing.drug))
            .ok_or_else(|| {
                ApplyError::UnvalidatedValue(ctx.widget(self.widgets.drug).field().clone())
            })?;
        tracing::debug!(%drug, ?action, %date_activated, "building order");
        Ok(Order {
            id: OrderId::new(),
            visit: env.visit.id,
            patient: env.visit.patient,
            action,
            previous_order: previous,
            drug,
            date_activated,
            date_stopped: None,
            auto_expire: tag
                .duration_days
                .map(|days| date_activated + Duration::days(i64::from(days))),
            dose: tag.dose,
            dose_units: tag.dose_units,
            route: tag.route,
            frequency: tag.frequency,
            care_setting: tag.care_setting,
            quantity: tag.quantity,
            num_refills: tag.num_refills,
            duration_days: tag.duration_days,
            instructions: tag.instructions.clone(),
            order_reason: None,
            voided: false,
        })
    }
}

/// Whether the submitted dosing differs from the previous order's, for the
/// renew check. Quantity and refills are allowed to differ.
fn dosing_changed(tag: &OrderTag, previous: &Order) -> bool {
    let candidate = Order {
        dose: tag.dose,
        dose_units: tag.dose_units,
        route: tag.route,
        frequency: tag.frequency,
        instructions: tag.instructions.clone(),
        ..previous.clone()
    };
    !candidate.dosing_matches(previous)
}

/// The same-session amendment tie-break: the candidate previous order was
/// created within the visit currently being applied, for the same drug, on
/// the same day-truncated activation date.
fn is_same_session(
    previous: &Order,
    drug: DrugId,
    new_activation: DateTime<Utc>,
    env: &SubmitEnv<'_>,
) -> bool {
    previous.visit == env.visit.id
        && previous.drug == drug
        && same_day(previous.date_activated, new_activation)
}

/// Queues a created order together with its discontinuation companion when
/// one is called for: an explicit discontinue date on the same entry, or an
/// auto-expire date that has already passed "now".
fn push_with_companion(
    mut order: Order,
    tag: &OrderTag,
    env: &SubmitEnv<'_>,
    state: &mut ApplyState,
) {
    let companion = if let Some(date) = tag.discontinue_date {
        Some(build_discontinuation(
            &order,
            order.id,
            date,
            tag.discontinue_reason,
            env,
        ))
    } else if let Some(expire) = order.auto_expire.filter(|e| *e < env.now) {
        tracing::debug!(order = %order.id, %expire, "auto-expire passed; synthesizing discontinuation");
        Some(build_discontinuation(&order, order.id, expire, None, env))
    } else {
        None
    };

    if let Some(companion) = &companion {
        order.date_stopped = Some(stop_date_for(companion.date_activated));
    }
    state.draft.orders_to_create.push(order);
    if let Some(companion) = companion {
        state.draft.orders_to_create.push(companion);
    }
}

/// A discontinuation link: carries the drug and care context of the order
/// it closes, a reason, and no dosing of its own.
fn build_discontinuation(
    closes: &Order,
    previous: OrderId,
    date_activated: DateTime<Utc>,
    reason: Option<ConceptId>,
    env: &SubmitEnv<'_>,
) -> Order {
    Order {
        id: OrderId::new(),
        visit: env.visit.id,
        patient: env.visit.patient,
        action: OrderAction::Discontinue,
        previous_order: Some(previous),
        drug: closes.drug,
        date_activated,
        date_stopped: None,
        auto_expire: None,
        dose: None,
        dose_units: None,
        route: None,
        frequency: None,
        care_setting: closes.care_setting,
        quantity: None,
        num_refills: None,
        duration_days: None,
        instructions: None,
        order_reason: reason,
        voided: false,
    }
}

fn to_midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartform_types::{PersonId, VisitId};
    use chartform_record::reference::StaticReferences;
    use chartform_record::visit::Visit;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn order_on(visit: VisitId, drug: u32, activated: DateTime<Utc>) -> Order {
        Order {
            id: OrderId::new(),
            visit,
            patient: PersonId(1),
            action: OrderAction::New,
            previous_order: None,
            drug: DrugId(drug),
            date_activated: activated,
            date_stopped: None,
            auto_expire: None,
            dose: Some(1.0),
            dose_units: Some(ConceptId(10)),
            route: Some(ConceptId(20)),
            frequency: Some(FrequencyId(1)),
            care_setting: None,
            quantity: None,
            num_refills: None,
            duration_days: None,
            instructions: None,
            order_reason: None,
            voided: false,
        }
    }

    #[test]
    fn test_same_session_requires_drug_day_and_visit() {
        let refs = StaticReferences::new();
        let config = crate::config::EngineConfig::default();
        let visit = Visit::new(VisitId(2), PersonId(1), date(2026, 3, 1));
        let env = SubmitEnv {
            resolver: &refs,
            config: &config,
            now: date(2026, 3, 1),
            visit: &visit,
        };

        let same = order_on(VisitId(2), 5, date(2026, 3, 1));
        assert!(is_same_session(&same, DrugId(5), date(2026, 3, 1), &env));
        // Later the same day still counts; a different day does not.
        assert!(is_same_session(
            &same,
            DrugId(5),
            Utc.with_ymd_and_hms(2026, 3, 1, 17, 30, 0).unwrap(),
            &env
        ));
        assert!(!is_same_session(&same, DrugId(5), date(2026, 3, 2), &env));
        assert!(!is_same_session(&same, DrugId(6), date(2026, 3, 1), &env));

        let other_visit = order_on(VisitId(1), 5, date(2026, 3, 1));
        assert!(!is_same_session(&other_visit, DrugId(5), date(2026, 3, 1), &env));
    }

    #[test]
    fn test_dosing_changed_ignores_supply_fields() {
        let previous = order_on(VisitId(1), 5, date(2026, 3, 1));
        let unchanged = OrderTag {
            dose: previous.dose,
            dose_units: previous.dose_units,
            route: previous.route,
            frequency: previous.frequency,
            quantity: Some(60.0),
            num_refills: Some(3),
            ..OrderTag::default()
        };
        assert!(!dosing_changed(&unchanged, &previous));

        let changed = OrderTag {
            dose: Some(2.0),
            ..unchanged
        };
        assert!(dosing_changed(&changed, &previous));
    }
}
