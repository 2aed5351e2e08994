//! Reference-data collaborator.
//!
//! The engine reads a handful of attributes from domain reference data it
//! does not own: concept names and answer lists, drug identity and daily
//! dose bounds, care settings, and order frequencies. [`ReferenceResolver`]
//! is the lookup contract; [`StaticReferences`] is the in-memory
//! implementation used by tests and the developer CLI, loadable from YAML.

use chartform_types::{CareSettingId, ConceptId, DrugId, FrequencyId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A coded concept, as much of it as the engine reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    pub name: String,
    /// Permitted coded answers, for choice questions.
    #[serde(default)]
    pub answers: Vec<ConceptId>,
}

/// An orderable drug product.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Drug {
    pub id: DrugId,
    pub name: String,
    pub concept: ConceptId,
    #[serde(default)]
    pub min_daily_dose: Option<f64>,
    #[serde(default)]
    pub max_daily_dose: Option<f64>,
}

/// Inpatient or outpatient context for an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CareSettingKind {
    Inpatient,
    Outpatient,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CareSetting {
    pub id: CareSettingId,
    pub name: String,
    pub kind: CareSettingKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frequency {
    pub id: FrequencyId,
    pub name: String,
}

/// Lookup contract for reference values, by identifier, plus the
/// enumerations the engine needs to populate choice widgets.
pub trait ReferenceResolver {
    fn concept(&self, id: ConceptId) -> Option<&Concept>;
    fn drug(&self, id: DrugId) -> Option<&Drug>;
    fn care_setting(&self, id: CareSettingId) -> Option<&CareSetting>;
    fn frequency(&self, id: FrequencyId) -> Option<&Frequency>;

    /// Route concepts for drug orders.
    fn routes(&self) -> Vec<&Concept>;
    /// Dose-unit concepts for drug orders.
    fn dose_units(&self) -> Vec<&Concept>;
    fn care_settings(&self) -> Vec<&CareSetting>;
    fn frequencies(&self) -> Vec<&Frequency>;
}

/// In-memory reference set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StaticReferences {
    #[serde(default)]
    concepts: BTreeMap<ConceptId, Concept>,
    #[serde(default)]
    drugs: BTreeMap<DrugId, Drug>,
    #[serde(default)]
    care_setting_list: Vec<CareSetting>,
    #[serde(default)]
    frequency_list: Vec<Frequency>,
    #[serde(default)]
    route_ids: Vec<ConceptId>,
    #[serde(default)]
    dose_unit_ids: Vec<ConceptId>,
}

impl StaticReferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_concept(&mut self, concept: Concept) -> &mut Self {
        self.concepts.insert(concept.id, concept);
        self
    }

    pub fn add_drug(&mut self, drug: Drug) -> &mut Self {
        self.drugs.insert(drug.id, drug);
        self
    }

    pub fn add_care_setting(&mut self, setting: CareSetting) -> &mut Self {
        self.care_setting_list.push(setting);
        self
    }

    pub fn add_frequency(&mut self, frequency: Frequency) -> &mut Self {
        self.frequency_list.push(frequency);
        self
    }

    /// Marks an already-added concept as a route option.
    pub fn add_route(&mut self, id: ConceptId) -> &mut Self {
        self.route_ids.push(id);
        self
    }

    /// Marks an already-added concept as a dose-unit option.
    pub fn add_dose_unit(&mut self, id: ConceptId) -> &mut Self {
        self.dose_unit_ids.push(id);
        self
    }
}

impl ReferenceResolver for StaticReferences {
    fn concept(&self, id: ConceptId) -> Option<&Concept> {
        self.concepts.get(&id)
    }

    fn drug(&self, id: DrugId) -> Option<&Drug> {
        self.drugs.get(&id)
    }

    fn care_setting(&self, id: CareSettingId) -> Option<&CareSetting> {
        self.care_setting_list.iter().find(|c| c.id == id)
    }

    fn frequency(&self, id: FrequencyId) -> Option<&Frequency> {
        self.frequency_list.iter().find(|f| f.id == id)
    }

    fn routes(&self) -> Vec<&Concept> {
        self.route_ids
            .iter()
            .filter_map(|id| self.concepts.get(id))
            .collect()
    }

    fn dose_units(&self) -> Vec<&Concept> {
        self.dose_unit_ids
            .iter()
            .filter_map(|id| self.concepts.get(id))
            .collect()
    }

    fn care_settings(&self) -> Vec<&CareSetting> {
        self.care_setting_list.iter().collect()
    }

    fn frequencies(&self) -> Vec<&Frequency> {
        self.frequency_list.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_lookups() {
        let mut refs = StaticReferences::new();
        refs.add_concept(Concept {
            id: ConceptId(100),
            name: "Oral".into(),
            answers: vec![],
        });
        refs.add_route(ConceptId(100));
        refs.add_drug(Drug {
            id: DrugId(1),
            name: "Aspirin 81mg".into(),
            concept: ConceptId(71),
            min_daily_dose: Some(0.5),
            max_daily_dose: Some(4.0),
        });

        assert_eq!(refs.drug(DrugId(1)).unwrap().concept, ConceptId(71));
        assert_eq!(refs.routes().len(), 1);
        assert!(refs.concept(ConceptId(999)).is_none());
    }

    #[test]
    fn test_route_listing_skips_unknown_concepts() {
        let mut refs = StaticReferences::new();
        refs.add_route(ConceptId(5));
        assert!(refs.routes().is_empty());
    }
}
