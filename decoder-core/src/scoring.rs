//! Small scoring helpers shared between future-cost estimation and
//! hypothesis construction, so both follow exactly the same conventions.

use crate::lm::LanguageModel;
use crate::pattern::Pattern;

/// `log(x)` with the convention that a non-positive feature score
/// contributes its raw value (practically 0) rather than `-infinity`.
pub fn log_or_zero(x: f64) -> f64 {
    if x > 0.0 {
        x.ln()
    } else {
        x
    }
}

/// `sum_i t_weights[i] * log_or_zero(t_scores[i])`.
pub fn translation_score(t_weights: &[f64], t_scores: &[f64]) -> f64 {
    t_weights
        .iter()
        .zip(t_scores.iter())
        .map(|(&w, &s)| w * log_or_zero(s))
        .sum()
}

/// Language-model score of `target`, called with no history, summing each
/// contiguous part separately for skip-gram targets (used by future-cost
/// estimation, which by design ignores history entirely).
pub fn lm_score_no_history(lm: &dyn LanguageModel, target: &Pattern) -> f64 {
    target
        .contiguous_parts()
        .iter()
        .map(|(_, classes)| lm.score(&Pattern::from_tokens(classes), None))
        .sum()
}
