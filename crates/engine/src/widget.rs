//! Widgets: the render/bind unit for one input control.
//!
//! A widget pairs a registry-assigned field name with a control kind and an
//! optional initial value. Widgets live in the context's arena and are
//! addressed by [`WidgetRef`] everywhere else; actions never hold direct
//! references back into the context.

use chartform_types::ConceptId;
use chrono::NaiveDate;

use crate::context::Mode;
use crate::error::codes;
use crate::submission::Submission;

/// The unique field name a widget answers to in the rendered form
/// (`w1`, `w2`, ...). Inside a repeat iteration the submitted name is
/// suffixed with the iteration index (`w3.0`, `w3.1`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldName(String);

impl FieldName {
    pub(crate) fn from_sequence(seq: u32) -> Self {
        Self(format!("w{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The submitted-parameter name for the given repeat iteration.
    pub fn scoped(&self, iteration: Option<usize>) -> String {
        match iteration {
            Some(i) => format!("{}.{i}", self.0),
            None => self.0.clone(),
        }
    }
}

impl std::fmt::Display for FieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to a widget in the context arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WidgetRef(pub(crate) usize);

/// One entry in a choice widget's option list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChoiceOption {
    pub label: String,
    pub value: String,
}

impl ChoiceOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// The control kind of a widget.
#[derive(Clone, Debug, PartialEq)]
pub enum Control {
    Text {
        size: Option<u32>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
        allow_decimal: bool,
    },
    Date,
    Dropdown {
        options: Vec<ChoiceOption>,
    },
    Checkbox {
        value: String,
        label: String,
    },
    Hidden,
    /// Placeholder span validation messages are injected into.
    Error,
}

/// A typed initial value for a widget.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Coded(ConceptId),
    Bool(bool),
}

impl FieldValue {
    /// The form-encoded string for this value.
    pub fn to_form_value(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) => format_number(*n),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::Coded(c) => c.to_string(),
            FieldValue::Bool(b) => b.to_string(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// One input control's binding.
#[derive(Clone, Debug)]
pub struct Widget {
    field: FieldName,
    pub control: Control,
    pub initial: Option<FieldValue>,
}

impl Widget {
    pub(crate) fn new(field: FieldName, control: Control, initial: Option<FieldValue>) -> Self {
        Self {
            field,
            control,
            initial,
        }
    }

    pub fn field(&self) -> &FieldName {
        &self.field
    }

    /// The raw submitted value for this widget, trimmed; `None` when absent
    /// or blank.
    pub fn submitted<'a>(
        &self,
        submission: &'a Submission,
        iteration: Option<usize>,
    ) -> Option<&'a str> {
        submission.first(&self.field.scoped(iteration))
    }

    /// The submitted value parsed as a number within the control's bounds.
    pub fn submitted_number(
        &self,
        submission: &Submission,
        iteration: Option<usize>,
    ) -> Result<Option<f64>, &'static str> {
        let Some(raw) = self.submitted(submission, iteration) else {
            return Ok(None);
        };
        let parsed: f64 = raw.parse().map_err(|_| codes::BAD_NUMBER)?;
        if let Control::Number {
            min,
            max,
            allow_decimal,
        } = &self.control
        {
            if !allow_decimal && parsed.fract() != 0.0 {
                return Err(codes::BAD_NUMBER);
            }
            if min.is_some_and(|m| parsed < m) || max.is_some_and(|m| parsed > m) {
                return Err(codes::BAD_NUMBER);
            }
        }
        Ok(Some(parsed))
    }

    /// The submitted value parsed as an ISO date.
    pub fn submitted_date(
        &self,
        submission: &Submission,
        iteration: Option<usize>,
    ) -> Result<Option<NaiveDate>, &'static str> {
        match self.submitted(submission, iteration) {
            None => Ok(None),
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| codes::BAD_DATE),
        }
    }

    /// Generates this widget's HTML for the given mode.
    ///
    /// In View mode inputs degrade to their value as plain text and error
    /// placeholders disappear entirely.
    pub fn html(&self, mode: Mode) -> String {
        let name = self.field.as_str();
        let value = self
            .initial
            .as_ref()
            .map(FieldValue::to_form_value)
            .unwrap_or_default();

        if mode == Mode::View {
            return match &self.control {
                Control::Error | Control::Hidden => String::new(),
                Control::Checkbox { label, .. } => {
                    let mark = if matches!(self.initial, Some(FieldValue::Bool(true)) | Some(FieldValue::Coded(_))) {
                        "[X]"
                    } else {
                        "[ ]"
                    };
                    format!("<span class=\"value\">{mark} {}</span>", escape(label))
                }
                _ => format!("<span class=\"value\">{}</span>", escape(&value)),
            };
        }

        match &self.control {
            Control::Text { size } => {
                let size_attr = size.map(|s| format!(" size=\"{s}\"")).unwrap_or_default();
                format!(
                    "<input type=\"text\" id=\"{name}\" name=\"{name}\" value=\"{}\"{size_attr}/>",
                    escape(&value)
                )
            }
            Control::Number { .. } => format!(
                "<input type=\"text\" class=\"numberField\" id=\"{name}\" name=\"{name}\" value=\"{}\" size=\"5\"/>",
                escape(&value)
            ),
            Control::Date => format!(
                "<input type=\"date\" id=\"{name}\" name=\"{name}\" value=\"{}\"/>",
                escape(&value)
            ),
            Control::Dropdown { options } => {
                let mut html = format!("<select id=\"{name}\" name=\"{name}\">");
                for option in options {
                    let selected = if option.value == value {
                        " selected=\"selected\""
                    } else {
                        ""
                    };
                    html.push_str(&format!(
                        "<option value=\"{}\"{selected}>{}</option>",
                        escape(&option.value),
                        escape(&option.label)
                    ));
                }
                html.push_str("</select>");
                html
            }
            Control::Checkbox {
                value: checked_value,
                label,
            } => {
                let checked = if matches!(self.initial, Some(FieldValue::Bool(true)))
                    || value == *checked_value
                {
                    " checked=\"checked\""
                } else {
                    ""
                };
                format!(
                    "<input type=\"checkbox\" id=\"{name}\" name=\"{name}\" value=\"{}\"{checked}/><label for=\"{name}\">{}</label>",
                    escape(checked_value),
                    escape(label)
                )
            }
            Control::Hidden => format!(
                "<input type=\"hidden\" id=\"{name}\" name=\"{name}\" value=\"{}\"/>",
                escape(&value)
            ),
            Control::Error => {
                format!("<span class=\"error\" id=\"{name}\" style=\"display: none\"></span>")
            }
        }
    }
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
