//! `<group>`: a grouping scope for its child `obs` fields.
//!
//! In Edit/View the group computes its signature (the (question, answer)
//! pairs its children declare) and reconciles against the unclaimed
//! existing groups before its children render, so nested claims come from
//! the matched group's members.

use chartform_types::ConceptId;

use crate::definition::ElementNode;
use crate::error::DesignError;
use crate::matcher::group_signature;
use crate::registry::{Descend, RenderScope, TagHandler};
use crate::submission::{BeginGroupAction, SubmissionAction};

pub struct GroupTagHandler;

impl TagHandler for GroupTagHandler {
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

        let signature = group_signature(element);
        let (matched, members) = scope.ctx.claim_group(concept, &signature);

        scope.out.push_str("<div class=\"group\">");
        scope
            .controller
            .push(SubmissionAction::BeginGroup(BeginGroupAction {
                concept,
                matched: matched.clone(),
            }));
        scope.ctx.begin_group(concept, matched, members);
        Ok(Descend::Children)
    }

    fn end(
        &self,
        _element: &ElementNode,
        scope: &mut RenderScope<'_>,
    ) -> Result<(), DesignError> {
        scope.ctx.end_group();
        scope.controller.push(SubmissionAction::EndGroup);
        scope.out.push_str("</div>");
        Ok(())
    }
}
