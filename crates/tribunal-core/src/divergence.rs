//! Divergence check between the two independent examiner totals.

use crate::outcome::{Correction, DivergenceResult};

/// Compare two corrections' totals against the configured threshold.
///
/// Pure and deterministic; divergent iff the absolute difference strictly
/// exceeds the threshold.
pub fn check(first: &Correction, second: &Correction, threshold: f64) -> DivergenceResult {
    let difference = (first.total_score - second.total_score).abs();
    DivergenceResult {
        is_divergent: difference > threshold,
        difference,
        threshold,
    }
}
