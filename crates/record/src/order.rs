//! Orders and the revision chain.
//!
//! An order is one link in a per-drug history chain. Successive edits never
//! rewrite an existing link: they append a new order whose `previous_order`
//! names the link it revises or discontinues. `previous_order` is a weak
//! reference used only for traversal; ownership of every order stays with
//! the visit that recorded it.
//!
//! Chain invariant: an order created by a revise, renew, or discontinue
//! action has a non-null `previous_order`, and applying it sets exactly one
//! stop date on that previous order, strictly before the new order's
//! activation date.

use chartform_types::{CareSettingId, ConceptId, DrugId, FrequencyId, OrderId, PersonId, VisitId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{RecordError, RecordResult};

/// The action one order link performs on its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderAction {
    New,
    Revise,
    Renew,
    Discontinue,
}

impl OrderAction {
    /// Parses the submitted action token.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "NEW" => Some(OrderAction::New),
            "REVISE" => Some(OrderAction::Revise),
            "RENEW" => Some(OrderAction::Renew),
            "DISCONTINUE" => Some(OrderAction::Discontinue),
            _ => None,
        }
    }
}

/// One drug order link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default = "OrderId::new")]
    pub id: OrderId,
    pub visit: VisitId,
    pub patient: PersonId,
    pub action: OrderAction,
    /// Weak link to the order this one revises or discontinues.
    #[serde(default)]
    pub previous_order: Option<OrderId>,
    pub drug: DrugId,
    pub date_activated: DateTime<Utc>,
    #[serde(default)]
    pub date_stopped: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_expire: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dose: Option<f64>,
    #[serde(default)]
    pub dose_units: Option<ConceptId>,
    #[serde(default)]
    pub route: Option<ConceptId>,
    #[serde(default)]
    pub frequency: Option<FrequencyId>,
    #[serde(default)]
    pub care_setting: Option<CareSettingId>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub num_refills: Option<u32>,
    #[serde(default)]
    pub duration_days: Option<u32>,
    #[serde(default)]
    pub instructions: Option<String>,
    /// Reason concept for a discontinuation link.
    #[serde(default)]
    pub order_reason: Option<ConceptId>,
    #[serde(default)]
    pub voided: bool,
}

impl Order {
    /// Whether this link is still active (not voided, not stopped).
    pub fn is_active(&self) -> bool {
        !self.voided && self.date_stopped.is_none() && self.action != OrderAction::Discontinue
    }

    /// The dosing fields a renew is required to leave unchanged.
    ///
    /// Quantity and refills are deliberately excluded: a renewal exists to
    /// re-issue the same dosing with fresh supply numbers.
    pub fn dosing_matches(&self, other: &Order) -> bool {
        same_text(&self.instructions, &other.instructions)
            && self.dose == other.dose
            && self.dose_units == other.dose_units
            && self.route == other.route
            && self.frequency == other.frequency
    }

    /// Validates the revision-link shape of this order.
    pub fn check_link(&self) -> RecordResult<()> {
        if self.action != OrderAction::New && self.previous_order.is_none() {
            return Err(RecordError::MissingPreviousOrder(self.id));
        }
        Ok(())
    }
}

fn same_text(a: &Option<String>, b: &Option<String>) -> bool {
    let norm = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };
    norm(a) == norm(b)
}

/// The stop date a chain link imposes on its predecessor: one day before
/// the new link's activation.
pub fn stop_date_for(new_activation: DateTime<Utc>) -> DateTime<Utc> {
    new_activation - Duration::days(1)
}

/// Whether two datetimes fall on the same UTC day.
pub fn same_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive()
}

/// Records the stop a new chain link imposes on its predecessor.
///
/// Enforces the chain invariant: the predecessor must not already be
/// stopped, and the stop must land strictly before the new activation.
pub fn link_stop(previous: &mut Order, new_activation: DateTime<Utc>) -> RecordResult<()> {
    if previous.date_stopped.is_some() {
        return Err(RecordError::AlreadyStopped(previous.id));
    }
    let stop = stop_date_for(new_activation);
    if stop >= new_activation {
        return Err(RecordError::StopNotBeforeActivation {
            stop,
            activated: new_activation,
        });
    }
    previous.date_stopped = Some(stop);
    Ok(())
}

/// Walks from any link of a chain to its latest link.
///
/// The walk first rewinds to the chain's root, then repeatedly follows the
/// order that revises the current link, or failing that the order that
/// discontinues it, until no further link exists. Editing therefore always
/// opens the latest link, never a superseded one.
pub fn latest_in_chain<'a>(orders: &'a [Order], start: &'a Order) -> &'a Order {
    let find = |id: OrderId| orders.iter().find(|o| o.id == id && !o.voided);

    let mut current = start;
    while let Some(prev) = current.previous_order.and_then(find) {
        current = prev;
    }

    loop {
        let revision = orders.iter().find(|o| {
            !o.voided
                && o.previous_order == Some(current.id)
                && matches!(o.action, OrderAction::Revise | OrderAction::Renew)
        });
        if let Some(next) = revision {
            current = next;
            continue;
        }
        let discontinuation = orders.iter().find(|o| {
            !o.voided
                && o.previous_order == Some(current.id)
                && o.action == OrderAction::Discontinue
        });
        match discontinuation {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

/// The last link of the chain that still carries dosing information.
///
/// For a discontinued chain this is the link the discontinuation points at;
/// otherwise it is the latest link itself.
pub fn last_dosing_link<'a>(orders: &'a [Order], tip: &'a Order) -> &'a Order {
    if tip.action != OrderAction::Discontinue {
        return tip;
    }
    tip.previous_order
        .and_then(|id| orders.iter().find(|o| o.id == id))
        .unwrap_or(tip)
}
