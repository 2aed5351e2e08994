//! The tag dispatcher: a depth-first walk of the compiled form.
//!
//! Each node either has a resolved handler (dispatched through `start`,
//! optionally its children, then `end`) or is literal markup emitted
//! without interpretation. A handler error is fail-fast: a malformed
//! definition cannot safely render partially, so the first
//! [`DesignError`] aborts the whole walk.

use crate::definition::{CompiledForm, CompiledNode, ElementNode};
use crate::error::DesignError;
use crate::registry::{Descend, RenderScope, TagRegistry};

/// Walks the compiled form, emitting HTML into `scope.out` and populating
/// the context and submission action list as a side effect.
pub fn render_form(
    form: &CompiledForm,
    registry: &TagRegistry,
    scope: &mut RenderScope<'_>,
) -> Result<(), DesignError> {
    render_node(&form.root, registry, scope)
}

fn render_node(
    node: &CompiledNode,
    registry: &TagRegistry,
    scope: &mut RenderScope<'_>,
) -> Result<(), DesignError> {
    match node {
        CompiledNode::Text(text) => {
            scope.out.push_str(text);
            Ok(())
        }
        CompiledNode::Literal { element, children } => {
            emit_open_tag(element, children.is_empty(), scope.out);
            for child in children {
                render_node(child, registry, scope)?;
            }
            if !children.is_empty() {
                scope.out.push_str(&format!("</{}>", element.tag));
            }
            Ok(())
        }
        CompiledNode::Tag {
            handler,
            element,
            children,
        } => {
            let handler = registry.handler(*handler);
            if handler.start(element, scope)? == Descend::Children {
                for child in children {
                    render_node(child, registry, scope)?;
                }
                handler.end(element, scope)?;
            }
            Ok(())
        }
    }
}

fn emit_open_tag(element: &ElementNode, self_closing: bool, out: &mut String) {
    out.push('<');
    out.push_str(&element.tag);
    for (name, value) in &element.attributes {
        out.push_str(&format!(" {name}=\"{value}\""));
    }
    if self_closing {
        out.push_str("/>");
    } else {
        out.push('>');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::context::{FormEntryContext, Mode};
    use crate::definition::{CompiledForm, ElementNode, FormNode};
    use crate::submission::SubmissionController;
    use chartform_record::reference::StaticReferences;
    use chartform_record::visit::Visit;
    use chartform_types::{PersonId, VisitId};
    use chrono::{TimeZone, Utc};

    fn render(root: FormNode) -> Result<String, DesignError> {
        let registry = TagRegistry::standard();
        let compiled = CompiledForm::compile(&root, &registry);
        let refs = StaticReferences::new();
        let config = EngineConfig::default();
        let visit = Visit::new(
            VisitId(1),
            PersonId(1),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        );
        let mut ctx = FormEntryContext::new(Mode::Enter);
        let mut controller = SubmissionController::new();
        let mut out = String::new();
        let mut scope = RenderScope {
            ctx: &mut ctx,
            controller: &mut controller,
            out: &mut out,
            resolver: &refs,
            config: &config,
            visit: &visit,
        };
        render_form(&compiled, &registry, &mut scope)?;
        Ok(out)
    }

    #[test]
    fn test_unknown_tags_pass_through_literally() {
        let root = FormNode::Element(
            ElementNode::new("table")
                .with_attribute("class", "layout")
                .with_child(FormNode::Element(
                    ElementNode::new("tr").with_child(FormNode::Text("cell".into())),
                )),
        );
        let html = render(root).expect("render");
        assert_eq!(html, "<table class=\"layout\"><tr>cell</tr></table>");
    }

    #[test]
    fn test_childless_literal_self_closes() {
        let html = render(FormNode::Element(ElementNode::new("br"))).expect("render");
        assert_eq!(html, "<br/>");
    }

    #[test]
    fn test_design_error_aborts_whole_render() {
        // An obs tag with no concept attribute is a form-design error.
        let root = FormNode::Element(
            ElementNode::new("div")
                .with_child(FormNode::Text("before".into()))
                .with_child(FormNode::Element(ElementNode::new("obs"))),
        );
        let err = render(root).expect_err("missing concept");
        assert!(matches!(err, DesignError::MissingAttribute { .. }));
    }
}
