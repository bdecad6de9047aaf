//! Consensus rule reducing 2 or 3 corrections to one final score.

use crate::error::GradingError;
use crate::outcome::Correction;

/// Reduce the corrections produced for one answer to a final score.
///
/// Two corrections (no divergence): the plain average. Three corrections
/// (an arbiter ran): the totals are sorted ascending and the pair with the
/// smaller adjacent gap is averaged, discarding the outlier. When the two
/// gaps are exactly equal, the pair containing the lowest total wins.
///
/// Any other count is a pipeline wiring bug and fails with
/// [`GradingError::InvalidCorrectionCount`].
pub fn consensus(corrections: &[Correction]) -> Result<f64, GradingError> {
    match corrections {
        [first, second] => Ok((first.total_score + second.total_score) / 2.0),
        [first, second, third] => {
            let mut totals = [first.total_score, second.total_score, third.total_score];
            totals.sort_by(f64::total_cmp);
            let [low, mid, high] = totals;
            let gap_low = mid - low;
            let gap_high = high - mid;
            if gap_low <= gap_high {
                Ok((low + mid) / 2.0)
            } else {
                Ok((mid + high) / 2.0)
            }
        }
        other => Err(GradingError::InvalidCorrectionCount(other.len())),
    }
}
