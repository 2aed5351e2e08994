//! Shared identifier types for the chartform workspace.
//!
//! Reference data (concepts, drugs, care settings, frequencies) is keyed by
//! small integer identifiers assigned by the terminology authority; record
//! entities created by the engine (observations, orders) carry UUID identity
//! from birth so drafts can be linked before anything is persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! numeric_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl $name {
            /// Parses the identifier from its decimal string form.
            pub fn parse(raw: &str) -> Option<Self> {
                raw.trim().parse::<u32>().ok().map(Self)
            }
        }
    };
}

numeric_id! {
    /// A coded question or answer in the clinical vocabulary.
    ConceptId
}

numeric_id! {
    /// An orderable drug product.
    DrugId
}

numeric_id! {
    /// A care setting (inpatient, outpatient) an order is placed under.
    CareSettingId
}

numeric_id! {
    /// An administration frequency for a drug order.
    FrequencyId
}

numeric_id! {
    /// One clinical visit, the record container for observations and orders.
    VisitId
}

numeric_id! {
    /// A patient or other person the record belongs to.
    PersonId
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mints a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id! {
    /// A single recorded observation instance.
    ObsId
}

uuid_id! {
    /// A single order instance (one link in a revision chain).
    OrderId
}
