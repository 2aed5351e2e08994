//! `<visitDate>`: binds the visit's date. Required on submission.

use crate::definition::ElementNode;
use crate::error::DesignError;
use crate::registry::{Descend, RenderScope, TagHandler};
use crate::submission::{SubmissionAction, VisitDateAction};
use crate::widget::{Control, FieldValue};

pub struct VisitDateTagHandler;

impl TagHandler for VisitDateTagHandler {
    fn start(
        &self,
        _element: &ElementNode,
        scope: &mut RenderScope<'_>,
    ) -> Result<Descend, DesignError> {
        let initial = FieldValue::Date(scope.visit.visit_date.date_naive());
        let widget = scope.ctx.register_widget(Control::Date, Some(initial));
        let error = scope.ctx.register_error_widget(widget);

        let mode = scope.ctx.mode();
        scope.out.push_str(&scope.ctx.widget(widget).html(mode));
        if !mode.is_view() {
            scope.out.push_str(&scope.ctx.widget(error).html(mode));
        }

        scope
            .controller
            .push(SubmissionAction::VisitDate(VisitDateAction { widget }));
        Ok(Descend::Skip)
    }
}
