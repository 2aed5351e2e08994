//! Engine configuration.
//!
//! Resolved once at startup and injected into each session. Nothing here is
//! read from the process environment during a render/submit cycle.

/// Site-level policy knobs the order validator consults.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Whether a non-discontinue drug order must name a drug.
    pub require_drug: bool,
    /// Whether outpatient orders must carry quantity and refills.
    pub require_outpatient_quantity: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            require_drug: false,
            require_outpatient_quantity: true,
        }
    }
}
