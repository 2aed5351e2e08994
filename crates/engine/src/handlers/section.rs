//! `<section>`: a named structural grouping with no binding of its own.

use crate::definition::ElementNode;
use crate::error::DesignError;
use crate::registry::{Descend, RenderScope, TagHandler};

pub struct SectionTagHandler;

impl TagHandler for SectionTagHandler {
    fn start(
        &self,
        element: &ElementNode,
        scope: &mut RenderScope<'_>,
    ) -> Result<Descend, DesignError> {
        let label = element.attribute("label").map(str::to_owned);
        scope.out.push_str("<fieldset class=\"section\">");
        if let Some(label) = &label {
            scope.out.push_str(&format!("<legend>{label}</legend>"));
        }
        scope.ctx.begin_section(label);
        Ok(Descend::Children)
    }

    fn end(
        &self,
        _element: &ElementNode,
        scope: &mut RenderScope<'_>,
    ) -> Result<(), DesignError> {
        scope.ctx.end_section();
        scope.out.push_str("</fieldset>");
        Ok(())
    }
}
