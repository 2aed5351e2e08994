//! The submission action list and two-phase controller.
//!
//! Rendering builds an ordered list of [`SubmissionAction`]s as a side
//! effect, one per bindable field or scope boundary. Submitting then runs
//! the same list twice: `validate` walks every action and aggregates every
//! error (no short-circuiting, so the user sees all problems in one round
//! trip), and `apply` — only ever invoked on a submission validate accepted
//! with zero errors — performs the identical ordered traversal mutating a
//! [`RecordDraft`].
//!
//! Group boundary actions push and pop the "current group parent" so field
//! actions between them attach beneath the correct parent. A repeat action
//! wraps its child actions and iterates them with the iteration index
//! scoping submitted-value lookup; its iteration count is computed once,
//! before iterating, never mid-iteration.

use chartform_types::ConceptId;
use chartform_record::draft::{NewObservation, ObsParent, RecordDraft};
use chartform_record::reference::ReferenceResolver;
use chartform_record::visit::{ObsValue, Observation, Visit};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::context::FormEntryContext;
use crate::error::{codes, ApplyError, DesignError, ValidationError};
use crate::matcher::GroupMatch;
use crate::orders::DrugOrderAction;
use crate::widget::WidgetRef;

/// A submitted field-name → values map with form-encoded semantics:
/// zero, one, or many values per name.
#[derive(Clone, Debug, Default)]
pub struct Submission {
    values: HashMap<String, Vec<String>>,
}

impl Submission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one value for a field.
    pub fn insert(&mut self, field: &str, value: &str) {
        self.values
            .entry(field.to_owned())
            .or_default()
            .push(value.to_owned());
    }

    /// Replaces all values for a field.
    pub fn set(&mut self, field: &str, values: &[&str]) {
        self.values.insert(
            field.to_owned(),
            values.iter().map(|v| (*v).to_owned()).collect(),
        );
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut submission = Self::new();
        for (field, value) in pairs {
            submission.insert(field, value);
        }
        submission
    }

    /// The first non-blank value for a field, trimmed.
    pub fn first(&self, field: &str) -> Option<&str> {
        self.values
            .get(field)?
            .iter()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    pub fn all(&self, field: &str) -> &[String] {
        self.values.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Collaborators and per-cycle facts the validate and apply phases consult.
pub struct SubmitEnv<'a> {
    pub resolver: &'a dyn ReferenceResolver,
    pub config: &'a EngineConfig,
    pub now: DateTime<Utc>,
    pub visit: &'a Visit,
}

/// The value shape an observation field binds.
#[derive(Clone, Debug, PartialEq)]
pub enum ObsKind {
    Text,
    Number,
    Date,
    Coded,
    /// A checkbox recording a specific coded answer when checked.
    CheckboxCoded { answer: ConceptId },
    /// A checkbox recording boolean true when checked.
    CheckboxBool,
}

/// Field action for one observation widget.
#[derive(Clone, Debug)]
pub struct ObsAction {
    pub widget: WidgetRef,
    pub concept: ConceptId,
    pub kind: ObsKind,
    pub required: bool,
    /// The pre-existing observation this field claimed during rendering.
    pub matched: Option<Observation>,
}

/// Field action for the visit-date widget.
#[derive(Clone, Debug)]
pub struct VisitDateAction {
    pub widget: WidgetRef,
}

/// Boundary action opening a group scope.
#[derive(Clone, Debug)]
pub struct BeginGroupAction {
    pub concept: ConceptId,
    pub matched: GroupMatch,
}

/// Wraps child actions iterated once per computed iteration count.
#[derive(Debug)]
pub struct RepeatAction {
    /// Hidden widget carrying the rendered block count.
    pub count_widget: WidgetRef,
    /// The count declared in the definition, the fallback when the
    /// submission carries no counter value.
    pub declared_count: usize,
    pub actions: Vec<SubmissionAction>,
}

/// One entry of the ordered submission action list.
#[derive(Debug)]
pub enum SubmissionAction {
    VisitDate(VisitDateAction),
    Obs(ObsAction),
    DrugOrder(DrugOrderAction),
    BeginGroup(BeginGroupAction),
    EndGroup,
    Repeat(RepeatAction),
}

/// Mutable state threaded through the apply phase: the draft under
/// construction plus the group-parent stack mirroring boundary actions.
pub struct ApplyState {
    pub draft: RecordDraft,
    groups: Vec<GroupSlot>,
}

enum GroupSlot {
    Existing(chartform_types::ObsId),
    /// A group with no matched existing entry; its parent observation is
    /// drafted lazily, when the first member value arrives.
    Deferred {
        concept: ConceptId,
        drafted: Option<usize>,
    },
}

impl ApplyState {
    fn new(visit: &Visit) -> Self {
        Self {
            draft: RecordDraft::for_visit(visit.id),
            groups: Vec::new(),
        }
    }

    fn push_group(&mut self, action: &BeginGroupAction) -> Result<(), ApplyError> {
        match &action.matched {
            GroupMatch::Ambiguous => Err(ApplyError::AmbiguousGroupMatch(action.concept)),
            GroupMatch::Matched(id) => {
                self.groups.push(GroupSlot::Existing(*id));
                Ok(())
            }
            GroupMatch::Unmatched | GroupMatch::NotApplicable => {
                self.groups.push(GroupSlot::Deferred {
                    concept: action.concept,
                    drafted: None,
                });
                Ok(())
            }
        }
    }

    fn pop_group(&mut self) -> Result<(), ApplyError> {
        self.groups
            .pop()
            .map(|_| ())
            .ok_or(ApplyError::GroupBoundaryMismatch)
    }

    /// The parent a newly created observation attaches under, materializing
    /// any still-deferred group parents on the path.
    pub fn parent_for_new_obs(&mut self) -> ObsParent {
        let mut parent = ObsParent::TopLevel;
        for index in 0..self.groups.len() {
            parent = match &self.groups[index] {
                GroupSlot::Existing(id) => ObsParent::Existing(*id),
                GroupSlot::Deferred {
                    drafted: Some(idx), ..
                } => ObsParent::New(*idx),
                GroupSlot::Deferred {
                    concept,
                    drafted: None,
                } => {
                    let concept = *concept;
                    let idx = self.draft.push_observation(NewObservation {
                        id: chartform_types::ObsId::new(),
                        concept,
                        value: None,
                        parent,
                    });
                    self.groups[index] = GroupSlot::Deferred {
                        concept,
                        drafted: Some(idx),
                    };
                    ObsParent::New(idx)
                }
            };
        }
        parent
    }

    fn finish(self) -> Result<RecordDraft, ApplyError> {
        if !self.groups.is_empty() {
            return Err(ApplyError::GroupBoundaryMismatch);
        }
        Ok(self.draft)
    }
}

/// Drives the two-phase validate/apply protocol over the action list.
#[derive(Debug, Default)]
pub struct SubmissionController {
    actions: Vec<SubmissionAction>,
    open_repeat: Option<RepeatAction>,
}

impl SubmissionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an action, routing it into the open repeat if one is active.
    pub fn push(&mut self, action: SubmissionAction) {
        match &mut self.open_repeat {
            Some(repeat) => repeat.actions.push(action),
            None => self.actions.push(action),
        }
    }

    /// Opens a repeat scope. Nested repeats are not supported.
    pub fn start_repeat(
        &mut self,
        count_widget: WidgetRef,
        declared_count: usize,
    ) -> Result<(), DesignError> {
        if self.open_repeat.is_some() {
            return Err(DesignError::NestedRepeat);
        }
        self.open_repeat = Some(RepeatAction {
            count_widget,
            declared_count,
            actions: Vec::new(),
        });
        Ok(())
    }

    /// Closes the open repeat scope.
    pub fn end_repeat(&mut self) -> Result<(), DesignError> {
        let repeat = self.open_repeat.take().ok_or(DesignError::RepeatNotOpen)?;
        self.actions.push(SubmissionAction::Repeat(repeat));
        Ok(())
    }

    pub fn actions(&self) -> &[SubmissionAction] {
        &self.actions
    }

    /// Phase one: aggregates every validation error from every action.
    pub fn validate(
        &self,
        ctx: &FormEntryContext,
        submission: &Submission,
        env: &SubmitEnv<'_>,
    ) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        validate_list(&self.actions, ctx, submission, env, None, &mut errors);
        errors
    }

    /// Phase two: the identical ordered traversal, mutating a draft.
    ///
    /// Must only be called for a submission `validate` accepted with zero
    /// errors; any invariant violation aborts with nothing to hand over.
    pub fn apply(
        &self,
        ctx: &FormEntryContext,
        submission: &Submission,
        env: &SubmitEnv<'_>,
    ) -> Result<RecordDraft, ApplyError> {
        let mut state = ApplyState::new(env.visit);
        apply_list(&self.actions, ctx, submission, env, None, &mut state)?;
        state.finish()
    }
}

fn validate_list(
    actions: &[SubmissionAction],
    ctx: &FormEntryContext,
    submission: &Submission,
    env: &SubmitEnv<'_>,
    iteration: Option<usize>,
    errors: &mut Vec<ValidationError>,
) {
    for action in actions {
        match action {
            SubmissionAction::VisitDate(a) => a.validate(ctx, submission, iteration, errors),
            SubmissionAction::Obs(a) => a.validate(ctx, submission, iteration, errors),
            SubmissionAction::DrugOrder(a) => a.validate(ctx, submission, env, iteration, errors),
            SubmissionAction::BeginGroup(_) | SubmissionAction::EndGroup => {}
            SubmissionAction::Repeat(repeat) => {
                let count = repeat.evaluate_count(ctx, submission);
                for i in 0..count {
                    validate_list(&repeat.actions, ctx, submission, env, Some(i), errors);
                }
            }
        }
    }
}

fn apply_list(
    actions: &[SubmissionAction],
    ctx: &FormEntryContext,
    submission: &Submission,
    env: &SubmitEnv<'_>,
    iteration: Option<usize>,
    state: &mut ApplyState,
) -> Result<(), ApplyError> {
    for action in actions {
        match action {
            SubmissionAction::VisitDate(a) => a.apply(ctx, submission, env, iteration, state)?,
            SubmissionAction::Obs(a) => a.apply(ctx, submission, iteration, state)?,
            SubmissionAction::DrugOrder(a) => a.apply(ctx, submission, env, iteration, state)?,
            SubmissionAction::BeginGroup(a) => state.push_group(a)?,
            SubmissionAction::EndGroup => state.pop_group()?,
            SubmissionAction::Repeat(repeat) => {
                // Evaluated once, before iterating.
                let count = repeat.evaluate_count(ctx, submission);
                for i in 0..count {
                    apply_list(&repeat.actions, ctx, submission, env, Some(i), state)?;
                }
            }
        }
    }
    Ok(())
}

impl RepeatAction {
    /// The iteration count for this submission: the submitted counter value
    /// when present and sane, otherwise the declared count.
    fn evaluate_count(&self, ctx: &FormEntryContext, submission: &Submission) -> usize {
        let widget = ctx.widget(self.count_widget);
        widget
            .submitted(submission, None)
            .and_then(|raw| raw.parse::<usize>().ok())
            .unwrap_or(self.declared_count)
    }
}

impl VisitDateAction {
    fn validate(
        &self,
        ctx: &FormEntryContext,
        submission: &Submission,
        iteration: Option<usize>,
        errors: &mut Vec<ValidationError>,
    ) {
        let widget = ctx.widget(self.widget);
        match widget.submitted_date(submission, iteration) {
            Ok(Some(_)) => {}
            Ok(None) => errors.push(ValidationError::new(
                ctx.error_field(self.widget),
                codes::REQUIRED,
            )),
            Err(code) => errors.push(ValidationError::new(ctx.error_field(self.widget), code)),
        }
    }

    fn apply(
        &self,
        ctx: &FormEntryContext,
        submission: &Submission,
        env: &SubmitEnv<'_>,
        iteration: Option<usize>,
        state: &mut ApplyState,
    ) -> Result<(), ApplyError> {
        let widget = ctx.widget(self.widget);
        let date = widget
            .submitted_date(submission, iteration)
            .ok()
            .flatten()
            .ok_or_else(|| ApplyError::UnvalidatedValue(widget.field().clone()))?;
        let datetime = date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid")
            .and_utc();
        if datetime != env.visit.visit_date {
            state.draft.visit_date = Some(datetime);
        }
        Ok(())
    }
}

impl ObsAction {
    /// Reads the submitted value for this field. `Ok(None)` means absent.
    fn read_value(
        &self,
        ctx: &FormEntryContext,
        submission: &Submission,
        iteration: Option<usize>,
    ) -> Result<Option<ObsValue>, &'static str> {
        let widget = ctx.widget(self.widget);
        match &self.kind {
            ObsKind::Text => Ok(widget
                .submitted(submission, iteration)
                .map(|raw| ObsValue::Text(raw.to_owned()))),
            ObsKind::Number => Ok(widget
                .submitted_number(submission, iteration)?
                .map(ObsValue::Numeric)),
            ObsKind::Date => Ok(widget
                .submitted_date(submission, iteration)?
                .map(ObsValue::Date)),
            ObsKind::Coded => match widget.submitted(submission, iteration) {
                None => Ok(None),
                Some(raw) => ConceptId::parse(raw)
                    .map(|c| Some(ObsValue::Coded(c)))
                    .ok_or(codes::BAD_CODED_VALUE),
            },
            ObsKind::CheckboxCoded { answer } => {
                Ok(widget
                    .submitted(submission, iteration)
                    .map(|_| ObsValue::Coded(*answer)))
            }
            ObsKind::CheckboxBool => Ok(widget
                .submitted(submission, iteration)
                .map(|_| ObsValue::Bool(true))),
        }
    }

    fn validate(
        &self,
        ctx: &FormEntryContext,
        submission: &Submission,
        iteration: Option<usize>,
        errors: &mut Vec<ValidationError>,
    ) {
        match self.read_value(ctx, submission, iteration) {
            Ok(Some(_)) => {}
            Ok(None) => {
                if self.required {
                    errors.push(ValidationError::new(
                        ctx.error_field(self.widget),
                        codes::REQUIRED,
                    ));
                }
            }
            Err(code) => errors.push(ValidationError::new(ctx.error_field(self.widget), code)),
        }
    }

    fn apply(
        &self,
        ctx: &FormEntryContext,
        submission: &Submission,
        iteration: Option<usize>,
        state: &mut ApplyState,
    ) -> Result<(), ApplyError> {
        let value = self
            .read_value(ctx, submission, iteration)
            .map_err(|_| ApplyError::UnvalidatedValue(ctx.widget(self.widget).field().clone()))?;

        match (value, &self.matched) {
            (None, None) => {}
            // Cleared on the form: void the entry it previously recorded.
            (None, Some(existing)) => state.draft.observations_to_void.push(existing.id),
            (Some(value), None) => {
                let parent = state.parent_for_new_obs();
                state.draft.push_observation(NewObservation {
                    id: chartform_types::ObsId::new(),
                    concept: self.concept,
                    value: Some(value),
                    parent,
                });
            }
            (Some(value), Some(existing)) => {
                if existing.value.as_ref() == Some(&value) {
                    // Unchanged.
                } else {
                    state.draft.observations_to_void.push(existing.id);
                    let parent = state.parent_for_new_obs();
                    state.draft.push_observation(NewObservation {
                        id: chartform_types::ObsId::new(),
                        concept: self.concept,
                        value: Some(value),
                        parent,
                    });
                }
            }
        }
        Ok(())
    }
}
