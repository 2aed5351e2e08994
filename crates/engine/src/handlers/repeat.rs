//! `<repeat>`: iterates its child fields.
//!
//! The template renders once; the client clones it per entry, suffixing
//! field names with the iteration index and keeping the hidden counter
//! current. At submit time the wrapped actions run once per counted
//! iteration. Nested repeats are not supported.

use crate::definition::ElementNode;
use crate::error::DesignError;
use crate::registry::{Descend, RenderScope, TagHandler};
use crate::widget::{Control, FieldValue};

pub struct RepeatTagHandler;

impl TagHandler for RepeatTagHandler {
    fn start(
        &self,
        element: &ElementNode,
        scope: &mut RenderScope<'_>,
    ) -> Result<Descend, DesignError> {
        if scope.ctx.in_repeat() {
            return Err(DesignError::NestedRepeat);
        }
        let count_raw = element.required_attribute("count")?;
        let count: usize = count_raw
            .parse()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| DesignError::BadAttribute {
                tag: element.tag.clone(),
                attribute: "count".into(),
                reason: format!("'{count_raw}' is not a positive count"),
            })?;

        let counter = scope
            .ctx
            .register_widget(Control::Hidden, Some(FieldValue::Number(count as f64)));
        scope.controller.start_repeat(counter, count)?;
        scope.ctx.begin_repeat();

        let mode = scope.ctx.mode();
        scope.out.push_str(&format!(
            "<div class=\"repeat\" data-count-field=\"{}\">",
            scope.ctx.field_name(counter)
        ));
        scope.out.push_str(&scope.ctx.widget(counter).html(mode));
        Ok(Descend::Children)
    }

    fn end(
        &self,
        _element: &ElementNode,
        scope: &mut RenderScope<'_>,
    ) -> Result<(), DesignError> {
        scope.controller.end_repeat()?;
        scope.ctx.end_repeat();
        scope.out.push_str("</div>");
        Ok(())
    }
}
