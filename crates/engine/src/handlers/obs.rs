//! `<obs>`: one observation field.
//!
//! Attributes: `concept` (required), `datatype` (`text` | `number` | `date`
//! | `coded` | `checkbox`, default `text`), `answer` (turns the field into
//! a coded checkbox), `answers` (explicit option list for a coded field,
//! overriding the concept's own answers), `required`, `size`, `min`,
//! `max`, `label`.

use chartform_types::ConceptId;
use chartform_record::visit::ObsValue;

use crate::definition::ElementNode;
use crate::error::DesignError;
use crate::registry::{Descend, RenderScope, TagHandler};
use crate::submission::{ObsAction, ObsKind, SubmissionAction};
use crate::widget::{ChoiceOption, Control, FieldValue};

pub struct ObsTagHandler;

impl TagHandler for ObsTagHandler {
    fn start(
        &self,
        element: &ElementNode,
        scope: &mut RenderScope<'_>,
    ) -> Result<Descend, DesignError> {
        let concept_raw = element.required_attribute("concept")?;
        let concept = ConceptId::parse(concept_raw).ok_or_else(|| DesignError::BadAttribute {
            tag: element.tag.clone(),
            attribute: "concept".into(),
            reason: format!("'{concept_raw}' is not a concept id"),
        })?;
        let concept_ref = scope.resolver.concept(concept).ok_or_else(|| {
            DesignError::UnknownReference {
                tag: element.tag.clone(),
                attribute: "concept".into(),
                value: concept_raw.to_owned(),
            }
        })?;
        let concept_name = concept_ref.name.clone();
        let concept_answers = concept_ref.answers.clone();

        let required = element.flag("required");
        let (kind, control) = self.field_shape(element, &concept_name, &concept_answers, scope)?;

        let expected = match &kind {
            ObsKind::CheckboxCoded { answer } => Some(ObsValue::Coded(*answer)),
            ObsKind::CheckboxBool => Some(ObsValue::Bool(true)),
            _ => None,
        };
        let matched = scope.ctx.claim_obs(concept, expected.as_ref());
        let initial = matched
            .as_ref()
            .and_then(|obs| obs.value.as_ref())
            .map(to_field_value);

        let widget = scope.ctx.register_widget(control, initial);
        let error = scope.ctx.register_error_widget(widget);

        let mode = scope.ctx.mode();
        scope.out.push_str(&scope.ctx.widget(widget).html(mode));
        if !mode.is_view() {
            scope.out.push_str(&scope.ctx.widget(error).html(mode));
        }

        scope.controller.push(SubmissionAction::Obs(ObsAction {
            widget,
            concept,
            kind,
            required,
            matched,
        }));
        Ok(Descend::Skip)
    }
}

impl ObsTagHandler {
    fn field_shape(
        &self,
        element: &ElementNode,
        concept_name: &str,
        concept_answers: &[ConceptId],
        scope: &mut RenderScope<'_>,
    ) -> Result<(ObsKind, Control), DesignError> {
        // An explicit answer makes this a coded checkbox regardless of the
        // declared datatype.
        if let Some(answer_raw) = element.attribute("answer") {
            let answer =
                ConceptId::parse(answer_raw).ok_or_else(|| DesignError::BadAttribute {
                    tag: element.tag.clone(),
                    attribute: "answer".into(),
                    reason: format!("'{answer_raw}' is not a concept id"),
                })?;
            let label = match element.attribute("label") {
                Some(label) => label.to_owned(),
                None => {
                    scope
                        .resolver
                        .concept(answer)
                        .ok_or_else(|| DesignError::UnknownReference {
                            tag: element.tag.clone(),
                            attribute: "answer".into(),
                            value: answer_raw.to_owned(),
                        })?
                        .name
                        .clone()
                }
            };
            return Ok((
                ObsKind::CheckboxCoded { answer },
                Control::Checkbox {
                    value: answer.to_string(),
                    label,
                },
            ));
        }

        match element.attribute("datatype").unwrap_or("text") {
            "number" => {
                let parse_bound = |name: &str| -> Result<Option<f64>, DesignError> {
                    match element.attribute(name) {
                        None => Ok(None),
                        Some(raw) => {
                            raw.parse::<f64>().map(Some).map_err(|_| {
                                DesignError::BadAttribute {
                                    tag: element.tag.clone(),
                                    attribute: name.to_owned(),
                                    reason: format!("'{raw}' is not numeric"),
                                }
                            })
                        }
                    }
                };
                Ok((
                    ObsKind::Number,
                    Control::Number {
                        min: parse_bound("min")?,
                        max: parse_bound("max")?,
                        allow_decimal: true,
                    },
                ))
            }
            "date" => Ok((ObsKind::Date, Control::Date)),
            "checkbox" => Ok((
                ObsKind::CheckboxBool,
                Control::Checkbox {
                    value: "true".into(),
                    label: element
                        .attribute("label")
                        .unwrap_or(concept_name)
                        .to_owned(),
                },
            )),
            "coded" => {
                let answers: Vec<ConceptId> = match element.attribute("answers") {
                    Some(list) => list
                        .split(',')
                        .map(|raw| {
                            ConceptId::parse(raw).ok_or_else(|| DesignError::BadAttribute {
                                tag: element.tag.clone(),
                                attribute: "answers".into(),
                                reason: format!("'{}' is not a concept id", raw.trim()),
                            })
                        })
                        .collect::<Result<_, _>>()?,
                    None => concept_answers.to_vec(),
                };
                // View mode leaves the option list unpopulated.
                let options = if scope.ctx.mode().is_view() {
                    Vec::new()
                } else {
                    let mut options = vec![ChoiceOption::new("", "")];
                    for answer in &answers {
                        let name = scope
                            .resolver
                            .concept(*answer)
                            .ok_or_else(|| DesignError::UnknownReference {
                                tag: element.tag.clone(),
                                attribute: "answers".into(),
                                value: answer.to_string(),
                            })?
                            .name
                            .clone();
                        options.push(ChoiceOption::new(name, answer.to_string()));
                    }
                    options
                };
                Ok((ObsKind::Coded, Control::Dropdown { options }))
            }
            "text" => Ok((
                ObsKind::Text,
                Control::Text {
                    size: element.attribute("size").and_then(|s| s.parse().ok()),
                },
            )),
            other => Err(DesignError::BadAttribute {
                tag: element.tag.clone(),
                attribute: "datatype".into(),
                reason: format!("unknown datatype '{other}'"),
            }),
        }
    }
}

fn to_field_value(value: &ObsValue) -> FieldValue {
    match value {
        ObsValue::Text(s) => FieldValue::Text(s.clone()),
        ObsValue::Numeric(n) => FieldValue::Number(*n),
        ObsValue::Coded(c) => FieldValue::Coded(*c),
        ObsValue::Bool(b) => FieldValue::Bool(*b),
        ObsValue::Date(d) => FieldValue::Date(*d),
    }
}
