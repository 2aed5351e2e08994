//! Existing-record reconciliation.
//!
//! Active only in Edit and View. Simple fields claim unclaimed observations
//! by concept in registration order (the context owns the multimap; see
//! [`crate::context::FormEntryContext::claim_obs`]). This module holds the
//! group-matching machinery: a group's declared signature, the rank
//! comparison against a candidate existing group, and the three-way match
//! outcome. More than one equally-ranked candidate is a design ambiguity
//! and is flagged, never silently resolved.

use chartform_types::{ConceptId, ObsId};
use chartform_record::visit::Observation;
use std::collections::HashSet;

use crate::definition::{ElementNode, FormNode};

/// One declared (question, answer) pair of a group signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupComponent {
    pub question: ConceptId,
    pub answer: Option<ConceptId>,
}

/// Outcome of reconciling a group against pre-existing entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupMatch {
    /// Enter mode: no matching runs.
    NotApplicable,
    /// No compatible existing group; the group renders empty.
    Unmatched,
    /// Exactly one compatible existing group was claimed.
    Matched(ObsId),
    /// More than one equally-compatible candidate.
    Ambiguous,
}

/// Collects the signature of a group tag: the (question, answer) pairs its
/// child `obs` tags declare. Nested groups keep their own signatures.
pub fn group_signature(element: &ElementNode) -> Vec<GroupComponent> {
    let mut components = Vec::new();
    collect_components(&element.children, &mut components);
    components
}

fn collect_components(children: &[FormNode], into: &mut Vec<GroupComponent>) {
    for child in children {
        let FormNode::Element(el) = child else {
            continue;
        };
        if el.tag == "group" {
            continue;
        }
        if el.tag == "obs" {
            if let Some(question) = el.attribute("concept").and_then(ConceptId::parse) {
                let answer = el.attribute("answer").and_then(ConceptId::parse);
                into.push(GroupComponent { question, answer });
            }
        }
        collect_components(&el.children, into);
    }
}

/// Scores how well an existing group's members support a signature.
///
/// Zero means incompatible; a negative score means a declared answer was
/// contradicted outright. Higher is better: answered pairs weigh double.
pub fn supporting_rank(components: &[GroupComponent], members: &[Observation]) -> i32 {
    let mut rank = 0;
    for obs in members.iter().filter(|o| !o.voided) {
        let mut matched_questions: HashSet<ConceptId> = HashSet::new();
        for component in components {
            let question_matches = component.question == obs.concept;
            let answer_matches = component.answer.is_none()
                || obs.value.as_ref().and_then(|v| v.as_coded()) == component.answer;
            if question_matches && !answer_matches {
                if !matched_questions.contains(&component.question) {
                    match obs.value.as_ref().and_then(|v| v.as_coded()) {
                        // A non-coded value under a coded question: not this group.
                        None => return 0,
                        Some(_) => return -1000,
                    }
                }
            } else if question_matches && answer_matches {
                if component.answer.is_some() {
                    rank += 1;
                }
                matched_questions.insert(component.question);
                rank += 1;
            }
        }
    }
    rank
}

/// Finds and claims the one existing group compatible with the signature.
///
/// Candidates are the unclaimed existing groups with the declared grouping
/// concept. A unique top-ranked candidate is removed from the pool and
/// returned with its members; ties are reported as [`GroupMatch::Ambiguous`]
/// and claim nothing.
pub fn find_matching_group(
    pool: &mut Vec<Observation>,
    group_concept: ConceptId,
    signature: &[GroupComponent],
) -> (GroupMatch, Vec<Observation>) {
    let mut top_rank = 0;
    let mut top: Vec<usize> = Vec::new();
    for (index, candidate) in pool.iter().enumerate() {
        if candidate.concept != group_concept || candidate.voided {
            continue;
        }
        let rank = supporting_rank(signature, &candidate.members);
        if rank > 0 {
            if rank > top_rank {
                top_rank = rank;
                top.clear();
                top.push(index);
            } else if rank == top_rank {
                top.push(index);
            }
        }
    }

    match top.len() {
        0 => {
            tracing::debug!(concept = %group_concept, "no matching existing group");
            (GroupMatch::Unmatched, Vec::new())
        }
        1 => {
            let claimed = pool.remove(top[0]);
            tracing::debug!(concept = %group_concept, obs = %claimed.id, "claimed existing group");
            (GroupMatch::Matched(claimed.id), claimed.members)
        }
        _ => {
            tracing::debug!(
                concept = %group_concept,
                candidates = top.len(),
                "multiple existing groups support signature"
            );
            (GroupMatch::Ambiguous, Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartform_record::visit::{ObsValue, Observation};

    fn component(question: u32, answer: Option<u32>) -> GroupComponent {
        GroupComponent {
            question: ConceptId(question),
            answer: answer.map(ConceptId),
        }
    }

    fn coded(question: u32, answer: u32) -> Observation {
        Observation::new(ConceptId(question), ObsValue::Coded(ConceptId(answer)))
    }

    #[test]
    fn test_group_signature_collects_obs_pairs_in_order() {
        let el = ElementNode::new("group")
            .with_attribute("concept", "10")
            .with_child(FormNode::Element(
                ElementNode::new("obs")
                    .with_attribute("concept", "1")
                    .with_attribute("answer", "5"),
            ))
            .with_child(FormNode::Element(
                ElementNode::new("obs").with_attribute("concept", "2"),
            ));
        let sig = group_signature(&el);
        assert_eq!(
            sig,
            vec![component(1, Some(5)), component(2, None)]
        );
    }

    #[test]
    fn test_group_signature_skips_nested_groups() {
        let nested = ElementNode::new("group")
            .with_attribute("concept", "20")
            .with_child(FormNode::Element(
                ElementNode::new("obs").with_attribute("concept", "9"),
            ));
        let el = ElementNode::new("group")
            .with_child(FormNode::Element(
                ElementNode::new("obs").with_attribute("concept", "1"),
            ))
            .with_child(FormNode::Element(nested));
        let sig = group_signature(&el);
        assert_eq!(sig, vec![component(1, None)]);
    }

    #[test]
    fn test_supporting_rank_weighs_answered_pairs_double() {
        let members = vec![coded(1, 5)];
        assert_eq!(supporting_rank(&[component(1, Some(5))], &members), 2);
        assert_eq!(supporting_rank(&[component(1, None)], &members), 1);
    }

    #[test]
    fn test_supporting_rank_contradicted_answer_is_insurmountable() {
        let members = vec![coded(1, 6)];
        assert_eq!(supporting_rank(&[component(1, Some(5))], &members), -1000);
    }

    #[test]
    fn test_find_matching_group_claims_unique_candidate() {
        let group = Observation::group(ConceptId(10), vec![coded(1, 5)]);
        let group_id = group.id;
        let mut pool = vec![group];
        let (matched, members) =
            find_matching_group(&mut pool, ConceptId(10), &[component(1, Some(5))]);
        assert_eq!(matched, GroupMatch::Matched(group_id));
        assert_eq!(members.len(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_find_matching_group_flags_tie_and_claims_nothing() {
        let mut pool = vec![
            Observation::group(ConceptId(10), vec![coded(1, 5)]),
            Observation::group(ConceptId(10), vec![coded(1, 5)]),
        ];
        let (matched, _) =
            find_matching_group(&mut pool, ConceptId(10), &[component(1, Some(5))]);
        assert_eq!(matched, GroupMatch::Ambiguous);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_find_matching_group_unmatched_renders_empty() {
        let mut pool = vec![Observation::group(ConceptId(11), vec![coded(1, 5)])];
        let (matched, members) =
            find_matching_group(&mut pool, ConceptId(10), &[component(1, Some(5))]);
        assert_eq!(matched, GroupMatch::Unmatched);
        assert!(members.is_empty());
    }
}
