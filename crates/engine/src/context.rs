//! Per-render form-entry context.
//!
//! Holds everything one render accumulates: the mode, the widget arena and
//! field-name allocation, error-widget associations, the stack of active
//! nesting scopes, and (in Edit/View) the multimaps of not-yet-claimed
//! pre-existing record entries. All of it is created fresh per render and
//! discarded after one submit cycle; nothing is cached across requests.
//!
//! Widgets are owned exclusively by the context and addressed by
//! [`WidgetRef`] indices, so actions and scopes never hold references back
//! into the arena.

use chartform_types::{ConceptId, DrugId};
use chartform_record::order::{self, Order};
use chartform_record::visit::{ObsValue, Observation, Visit};
use std::collections::HashMap;

use crate::matcher::{self, GroupComponent, GroupMatch};
use crate::widget::{Control, FieldName, FieldValue, Widget, WidgetRef};

/// What a render/submit cycle is doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// A new, unsaved form.
    Enter,
    /// A saved form being edited.
    Edit,
    /// A saved form displayed read-only.
    View,
}

impl Mode {
    pub fn is_view(self) -> bool {
        self == Mode::View
    }

    /// Whether existing-record matching runs in this mode.
    pub fn matches_existing(self) -> bool {
        self != Mode::Enter
    }
}

/// One entry on the nesting-scope stack.
#[derive(Debug)]
pub enum Scope {
    Section {
        label: Option<String>,
    },
    Group {
        concept: ConceptId,
        matched: GroupMatch,
        /// Unclaimed members of the matched existing group.
        members: Vec<Observation>,
    },
    Repeat,
}

/// An existing order chain claimed for an order-bearing field.
#[derive(Clone, Debug)]
pub struct ClaimedOrder {
    /// The latest link in the chain.
    pub tip: Order,
    /// The last link still carrying dosing values (the tip itself unless
    /// the chain ends in a discontinuation).
    pub dosing: Order,
}

#[derive(Debug)]
pub struct FormEntryContext {
    mode: Mode,
    sequence: u32,
    widgets: Vec<Widget>,
    error_for: HashMap<usize, usize>,
    scopes: Vec<Scope>,
    existing_obs: HashMap<ConceptId, Vec<Observation>>,
    existing_groups: Vec<Observation>,
    existing_orders: Vec<Order>,
}

impl FormEntryContext {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            sequence: 0,
            widgets: Vec::new(),
            error_for: HashMap::new(),
            scopes: Vec::new(),
            existing_obs: HashMap::new(),
            existing_groups: Vec::new(),
            existing_orders: Vec::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Loads the unclaimed-entry multimaps from the visit being
    /// re-displayed. `patient_orders` is the patient's full order pool,
    /// which may span earlier visits (revision chains do).
    pub fn setup_existing(&mut self, visit: &Visit, patient_orders: Vec<Order>) {
        self.existing_obs.clear();
        self.existing_groups.clear();
        for obs in visit.active_observations() {
            if obs.is_group() {
                self.existing_groups.push(obs.clone());
            } else {
                self.existing_obs
                    .entry(obs.concept)
                    .or_default()
                    .push(obs.clone());
            }
        }
        self.existing_orders = patient_orders.into_iter().filter(|o| !o.voided).collect();
    }

    // ---- widget arena ----

    /// Registers a widget, assigning it the next field name.
    pub fn register_widget(&mut self, control: Control, initial: Option<FieldValue>) -> WidgetRef {
        self.sequence += 1;
        let field = FieldName::from_sequence(self.sequence);
        tracing::trace!(field = %field, "registered widget");
        self.widgets.push(Widget::new(field, control, initial));
        WidgetRef(self.widgets.len() - 1)
    }

    /// Registers an error widget and associates it with `owner` so
    /// validation messages land beside the owning field.
    pub fn register_error_widget(&mut self, owner: WidgetRef) -> WidgetRef {
        let error = self.register_widget(Control::Error, None);
        self.error_for.insert(owner.0, error.0);
        error
    }

    pub fn widget(&self, widget: WidgetRef) -> &Widget {
        &self.widgets[widget.0]
    }

    pub fn field_name(&self, widget: WidgetRef) -> &FieldName {
        self.widgets[widget.0].field()
    }

    /// The field validation messages for `widget` should be addressed to:
    /// its associated error widget, or itself when none was registered.
    pub fn error_field(&self, widget: WidgetRef) -> FieldName {
        let target = self.error_for.get(&widget.0).copied().unwrap_or(widget.0);
        self.widgets[target].field().clone()
    }

    /// Widgets in registration order.
    pub fn widgets(&self) -> &[Widget] {
        &self.widgets
    }

    // ---- nesting scopes ----

    pub fn begin_section(&mut self, label: Option<String>) {
        self.scopes.push(Scope::Section { label });
    }

    pub fn end_section(&mut self) {
        debug_assert!(matches!(self.scopes.last(), Some(Scope::Section { .. })));
        self.scopes.pop();
    }

    pub fn begin_group(
        &mut self,
        concept: ConceptId,
        matched: GroupMatch,
        members: Vec<Observation>,
    ) {
        self.scopes.push(Scope::Group {
            concept,
            matched,
            members,
        });
    }

    pub fn end_group(&mut self) {
        debug_assert!(matches!(self.scopes.last(), Some(Scope::Group { .. })));
        self.scopes.pop();
    }

    pub fn begin_repeat(&mut self) {
        self.scopes.push(Scope::Repeat);
    }

    pub fn end_repeat(&mut self) {
        debug_assert!(matches!(self.scopes.last(), Some(Scope::Repeat)));
        self.scopes.pop();
    }

    pub fn in_repeat(&self) -> bool {
        self.scopes.iter().any(|s| matches!(s, Scope::Repeat))
    }

    /// The innermost active group scope, if any.
    fn innermost_group(&mut self) -> Option<&mut Scope> {
        self.scopes
            .iter_mut()
            .rev()
            .find(|s| matches!(s, Scope::Group { .. }))
    }

    // ---- existing-entry claims ----

    /// Claims (removes and returns) the first unclaimed pre-existing
    /// observation for a concept, optionally constrained to a specific
    /// recorded value. Inside a group scope the claim is made against the
    /// matched group's members; outside, against the top-level multimap.
    ///
    /// Claims consume: two fields sharing a concept never claim the same
    /// entry.
    pub fn claim_obs(
        &mut self,
        concept: ConceptId,
        expected: Option<&ObsValue>,
    ) -> Option<Observation> {
        if !self.mode.matches_existing() {
            return None;
        }
        if let Some(Scope::Group { members, .. }) = self.innermost_group() {
            let position = members.iter().position(|obs| {
                !obs.voided
                    && obs.concept == concept
                    && expected.map_or(true, |want| obs.value.as_ref() == Some(want))
            })?;
            return Some(members.remove(position));
        }

        let list = self.existing_obs.get_mut(&concept)?;
        let position = list
            .iter()
            .position(|obs| expected.map_or(true, |want| obs.value.as_ref() == Some(want)))?;
        let claimed = list.remove(position);
        if list.is_empty() {
            self.existing_obs.remove(&concept);
        }
        Some(claimed)
    }

    /// Claims the existing-group pool match for a signature.
    pub fn claim_group(
        &mut self,
        concept: ConceptId,
        signature: &[GroupComponent],
    ) -> (GroupMatch, Vec<Observation>) {
        if !self.mode.matches_existing() {
            return (GroupMatch::NotApplicable, Vec::new());
        }
        matcher::find_matching_group(&mut self.existing_groups, concept, signature)
    }

    /// Claims the order chain for a drug and walks it to its latest link.
    ///
    /// Every link of the claimed chain is removed from the unclaimed pool so
    /// a second field for the same drug opens a different chain (or none).
    pub fn claim_order_chain(&mut self, drug: DrugId) -> Option<ClaimedOrder> {
        if !self.mode.matches_existing() {
            return None;
        }
        let start = self
            .existing_orders
            .iter()
            .find(|o| o.drug == drug)?
            .clone();
        let tip = order::latest_in_chain(&self.existing_orders, &start).clone();
        let dosing = order::last_dosing_link(&self.existing_orders, &tip).clone();

        // Remove the whole chain from the pool.
        let mut chain_ids = vec![tip.id];
        let mut cursor = tip.clone();
        while let Some(prev_id) = cursor.previous_order {
            chain_ids.push(prev_id);
            match self.existing_orders.iter().find(|o| o.id == prev_id) {
                Some(prev) => cursor = prev.clone(),
                None => break,
            }
        }
        self.existing_orders.retain(|o| !chain_ids.contains(&o.id));

        tracing::debug!(drug = %drug, tip = %tip.id, "claimed existing order chain");
        Some(ClaimedOrder { tip, dosing })
    }

    /// Count of pre-existing simple observations still unclaimed.
    pub fn unclaimed_obs_count(&self) -> usize {
        self.existing_obs.values().map(Vec::len).sum()
    }
}
