//! `<drugOrder>`: one order-bearing field.
//!
//! Attributes: `drugs` (required, comma-separated drug ids this field may
//! order), `validateDose`, `discontinueReasons` (comma-separated concept
//! ids offered as discontinuation reasons), `instructionsLabel` (adds a
//! free-text instructions widget).
//!
//! In Edit/View the field claims the existing order chain for its first
//! configured drug with one, walks it to the latest link, and seeds widget
//! initial values from the last dosing link.

use chartform_types::{ConceptId, DrugId};
use chartform_record::order::OrderAction;

use crate::context::ClaimedOrder;
use crate::definition::ElementNode;
use crate::error::DesignError;
use crate::orders::{DrugOrderAction, OrderWidgets};
use crate::registry::{Descend, RenderScope, TagHandler};
use crate::submission::SubmissionAction;
use crate::widget::{ChoiceOption, Control, FieldValue, WidgetRef};

pub struct DrugOrderTagHandler;

impl TagHandler for DrugOrderTagHandler {
    fn start(
        &self,
        element: &ElementNode,
        scope: &mut RenderScope<'_>,
    ) -> Result<Descend, DesignError> {
        let drugs = parse_drugs(element, scope)?;
        let validate_dose = element.flag("validateDose");
        let reasons = parse_reasons(element, scope)?;

        let existing = drugs.iter().find_map(|drug| scope.ctx.claim_order_chain(*drug));

        let widgets = register_widgets(
            element,
            scope,
            &drugs,
            reasons,
            existing.as_ref(),
        )?;
        emit_html(&widgets, scope, element);

        scope
            .controller
            .push(SubmissionAction::DrugOrder(DrugOrderAction {
                widgets,
                drugs,
                validate_dose,
                existing,
            }));
        Ok(Descend::Skip)
    }
}

fn parse_drugs(
    element: &ElementNode,
    scope: &mut RenderScope<'_>,
) -> Result<Vec<DrugId>, DesignError> {
    let raw = element.required_attribute("drugs")?;
    let mut drugs = Vec::new();
    for token in raw.split(',') {
        let drug = DrugId::parse(token).ok_or_else(|| DesignError::BadAttribute {
            tag: element.tag.clone(),
            attribute: "drugs".into(),
            reason: format!("'{}' is not a drug id", token.trim()),
        })?;
        if scope.resolver.drug(drug).is_none() {
            return Err(DesignError::UnknownReference {
                tag: element.tag.clone(),
                attribute: "drugs".into(),
                value: token.trim().to_owned(),
            });
        }
        drugs.push(drug);
    }
    Ok(drugs)
}

fn parse_reasons(
    element: &ElementNode,
    scope: &mut RenderScope<'_>,
) -> Result<Vec<ConceptId>, DesignError> {
    let Some(raw) = element.attribute("discontinueReasons") else {
        return Ok(Vec::new());
    };
    let mut reasons = Vec::new();
    for token in raw.split(',') {
        let concept = ConceptId::parse(token).ok_or_else(|| DesignError::BadAttribute {
            tag: element.tag.clone(),
            attribute: "discontinueReasons".into(),
            reason: format!("'{}' is not a concept id", token.trim()),
        })?;
        if scope.resolver.concept(concept).is_none() {
            return Err(DesignError::UnknownReference {
                tag: element.tag.clone(),
                attribute: "discontinueReasons".into(),
                value: token.trim().to_owned(),
            });
        }
        reasons.push(concept);
    }
    Ok(reasons)
}

fn register_widgets(
    element: &ElementNode,
    scope: &mut RenderScope<'_>,
    drugs: &[DrugId],
    reasons: Vec<ConceptId>,
    existing: Option<&ClaimedOrder>,
) -> Result<OrderWidgets, DesignError> {
    let view = scope.ctx.mode().is_view();
    let options = |list: Vec<ChoiceOption>| -> Vec<ChoiceOption> {
        if view {
            Vec::new()
        } else {
            let mut all = vec![ChoiceOption::new("", "")];
            all.extend(list);
            all
        }
    };

    let dosing = existing.map(|c| &c.dosing);
    let tip = existing.map(|c| &c.tip);

    let action_initial = if view {
        tip.map(|t| FieldValue::Text(action_token(t.action).to_owned()))
    } else {
        None
    };
    let action = scope.ctx.register_widget(
        Control::Dropdown {
            options: options(
                ["NEW", "REVISE", "RENEW", "DISCONTINUE"]
                    .iter()
                    .map(|a| ChoiceOption::new(*a, *a))
                    .collect(),
            ),
        },
        action_initial,
    );
    let error = scope.ctx.register_error_widget(action);

    let drug_options: Vec<ChoiceOption> = drugs
        .iter()
        .map(|d| {
            let name = scope
                .resolver
                .drug(*d)
                .map(|drug| drug.name.clone())
                .unwrap_or_else(|| d.to_string());
            ChoiceOption::new(name, d.to_string())
        })
        .collect();
    let drug = scope.ctx.register_widget(
        Control::Dropdown {
            options: options(drug_options),
        },
        dosing.map(|o| FieldValue::Text(o.drug.to_string())),
    );
    let drug_error = scope.ctx.register_error_widget(drug);

    let dose = scope.ctx.register_widget(
        Control::Number {
            min: Some(0.0),
            max: Some(9_999_999.0),
            allow_decimal: true,
        },
        dosing.and_then(|o| o.dose).map(FieldValue::Number),
    );
    let dose_error = scope.ctx.register_error_widget(dose);

    let dose_unit_options: Vec<ChoiceOption> = scope
        .resolver
        .dose_units()
        .iter()
        .map(|c| ChoiceOption::new(c.name.clone(), c.id.to_string()))
        .collect();
    let dose_units = scope.ctx.register_widget(
        Control::Dropdown {
            options: options(dose_unit_options),
        },
        dosing.and_then(|o| o.dose_units).map(FieldValue::Coded),
    );

    let route_options: Vec<ChoiceOption> = scope
        .resolver
        .routes()
        .iter()
        .map(|c| ChoiceOption::new(c.name.clone(), c.id.to_string()))
        .collect();
    let route = scope.ctx.register_widget(
        Control::Dropdown {
            options: options(route_options),
        },
        dosing.and_then(|o| o.route).map(FieldValue::Coded),
    );

    let frequency_options: Vec<ChoiceOption> = scope
        .resolver
        .frequencies()
        .iter()
        .map(|f| ChoiceOption::new(f.name.clone(), f.id.to_string()))
        .collect();
    let frequency = scope.ctx.register_widget(
        Control::Dropdown {
            options: options(frequency_options),
        },
        dosing
            .and_then(|o| o.frequency)
            .map(|f| FieldValue::Text(f.to_string())),
    );

    let care_options: Vec<ChoiceOption> = scope
        .resolver
        .care_settings()
        .iter()
        .map(|c| ChoiceOption::new(c.name.clone(), c.id.to_string()))
        .collect();
    let care_setting = scope.ctx.register_widget(
        Control::Dropdown {
            options: options(care_options),
        },
        dosing
            .and_then(|o| o.care_setting)
            .map(|c| FieldValue::Text(c.to_string())),
    );

    let quantity = scope.ctx.register_widget(
        Control::Number {
            min: Some(0.0),
            max: Some(9_999_999.0),
            allow_decimal: true,
        },
        dosing.and_then(|o| o.quantity).map(FieldValue::Number),
    );
    let quantity_error = scope.ctx.register_error_widget(quantity);

    let num_refills = scope.ctx.register_widget(
        Control::Number {
            min: Some(0.0),
            max: Some(9_999_999.0),
            allow_decimal: false,
        },
        dosing
            .and_then(|o| o.num_refills)
            .map(|n| FieldValue::Number(f64::from(n))),
    );
    let refills_error = scope.ctx.register_error_widget(num_refills);

    let duration = scope.ctx.register_widget(
        Control::Number {
            min: Some(0.0),
            max: Some(9_999_999.0),
            allow_decimal: false,
        },
        dosing
            .and_then(|o| o.duration_days)
            .map(|n| FieldValue::Number(f64::from(n))),
    );
    let duration_error = scope.ctx.register_error_widget(duration);

    let start_date = scope.ctx.register_widget(
        Control::Date,
        dosing.map(|o| FieldValue::Date(o.date_activated.date_naive())),
    );
    let start_error = scope.ctx.register_error_widget(start_date);

    let discontinue_initial = tip
        .filter(|t| t.action == OrderAction::Discontinue)
        .map(|t| FieldValue::Date(t.date_activated.date_naive()));
    let discontinue_date = scope.ctx.register_widget(Control::Date, discontinue_initial);
    let discontinue_error = scope.ctx.register_error_widget(discontinue_date);

    let (discontinue_reason, reason_error) = if reasons.is_empty() {
        (None, None)
    } else {
        let reason_options: Vec<ChoiceOption> = reasons
            .iter()
            .map(|id| {
                let name = scope
                    .resolver
                    .concept(*id)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| id.to_string());
                ChoiceOption::new(name, id.to_string())
            })
            .collect();
        let initial = tip
            .filter(|t| t.action == OrderAction::Discontinue)
            .and_then(|t| t.order_reason)
            .map(FieldValue::Coded);
        let widget = scope.ctx.register_widget(
            Control::Dropdown {
                options: options(reason_options),
            },
            initial,
        );
        let error = scope.ctx.register_error_widget(widget);
        (Some(widget), Some(error))
    };

    let instructions = element.attribute("instructionsLabel").map(|_| {
        scope.ctx.register_widget(
            Control::Text { size: Some(40) },
            dosing
                .and_then(|o| o.instructions.clone())
                .map(FieldValue::Text),
        )
    });

    Ok(OrderWidgets {
        action,
        error,
        drug,
        drug_error,
        dose,
        dose_error,
        dose_units,
        route,
        frequency,
        care_setting,
        quantity,
        quantity_error,
        num_refills,
        refills_error,
        duration,
        duration_error,
        start_date,
        start_error,
        discontinue_date,
        discontinue_error,
        discontinue_reason,
        reason_error,
        instructions,
    })
}

fn action_token(action: OrderAction) -> &'static str {
    match action {
        OrderAction::New => "NEW",
        OrderAction::Revise => "REVISE",
        OrderAction::Renew => "RENEW",
        OrderAction::Discontinue => "DISCONTINUE",
    }
}

fn emit_html(widgets: &OrderWidgets, scope: &mut RenderScope<'_>, element: &ElementNode) {
    let mode = scope.ctx.mode();
    let mut segment = |label: &str, widget: WidgetRef, error: Option<WidgetRef>| {
        let mut html = format!("{label} ");
        html.push_str(&scope.ctx.widget(widget).html(mode));
        if !mode.is_view() {
            if let Some(error) = error {
                html.push(' ');
                html.push_str(&scope.ctx.widget(error).html(mode));
            }
        }
        html.push_str(" | ");
        scope.out.push_str(&html);
    };

    segment("Action", widgets.action, Some(widgets.error));
    segment("Drug", widgets.drug, Some(widgets.drug_error));
    segment("Dose", widgets.dose, Some(widgets.dose_error));
    segment("Units", widgets.dose_units, None);
    segment("Route", widgets.route, None);
    segment("Frequency", widgets.frequency, None);
    segment("Care setting", widgets.care_setting, None);
    segment("Quantity", widgets.quantity, Some(widgets.quantity_error));
    segment("Refills", widgets.num_refills, Some(widgets.refills_error));
    segment("Duration (days)", widgets.duration, Some(widgets.duration_error));
    segment("Start date", widgets.start_date, Some(widgets.start_error));
    segment(
        "Discontinue date",
        widgets.discontinue_date,
        Some(widgets.discontinue_error),
    );
    if let Some(reason) = widgets.discontinue_reason {
        segment("Reason", reason, widgets.reason_error);
    }
    if let Some(instructions) = widgets.instructions {
        let label = element
            .attribute("instructionsLabel")
            .unwrap_or("Instructions")
            .to_owned();
        segment(&label, instructions, None);
    }
}
