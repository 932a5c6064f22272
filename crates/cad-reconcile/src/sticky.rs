//! Per-council sticky offsets.
//!
//! When a council re-projects its whole dataset, the first `ExactOffset`
//! match records the observed translation; subsequent comparisons in that
//! council are biased by it so they land on the overlap rules rather than
//! failing one by one.  The map is transient state of one reconciler
//! invocation — it is not durable across runs.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct CouncilOffsets {
    map: HashMap<String, (f64, f64)>,
}

impl CouncilOffsets {
    pub fn new() -> Self {
        Self::default()
    }

    /// The council's learned offset, `(0, 0)` until an `ExactOffset` match.
    pub fn get(&self, council: &str) -> (f64, f64) {
        self.map.get(council).copied().unwrap_or((0.0, 0.0))
    }

    /// Record the offset observed by the latest `ExactOffset` match.
    pub fn set(&mut self, council: &str, offset: (f64, f64)) {
        self.map.insert(council.to_string(), offset);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, (f64, f64))> {
        self.map.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
