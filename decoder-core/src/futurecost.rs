//! Per-decode dense table giving an optimistic best score for translating
//! each input span, ignoring language-model history and distortion.

use crate::error::{DecoderError, Result};
use crate::fragment::SourceFragmentIndex;
use crate::lm::LanguageModel;
use crate::scoring::{lm_score_no_history, translation_score};

/// `cost[start][length-1]`, `None` meaning "not yet known to be reachable".
/// Using `Option` instead of an in-band `0.0`-as-unreachable sentinel keeps
/// an unreachable span from ever being silently read as a free one.
pub struct FutureCostTable {
    input_len: usize,
    cost: Vec<Vec<Option<f64>>>,
}

impl FutureCostTable {
    /// Build the table for an input of `input_len` tokens, seeded from the
    /// best translation option covering each exactly-matching span, then
    /// relaxed by the standard interval dynamic program.
    pub fn build(
        input_len: usize,
        fragments: &SourceFragmentIndex,
        t_weights: &[f64],
        lm_weight: f64,
        lm: &dyn LanguageModel,
    ) -> Self {
        let mut cost: Vec<Vec<Option<f64>>> = vec![vec![None; input_len]; input_len];

        for f in &fragments.fragments {
            let start = f.input_offset as usize;
            let length = f.source_pattern.n() as usize;
            if length == 0 || length > input_len {
                continue;
            }
            let best = f
                .options
                .iter()
                .map(|(target, t_scores)| {
                    translation_score(t_weights, t_scores) + lm_weight * lm_score_no_history(lm, target)
                })
                .fold(f64::NEG_INFINITY, f64::max);
            let slot = &mut cost[start][length - 1];
            *slot = Some(slot.map_or(best, |cur| cur.max(best)));
        }

        for length in 2..=input_len {
            for start in 0..=(input_len - length) {
                for k in 1..length {
                    let left = cost[start][k - 1];
                    let right = cost[start + k][length - k - 1];
                    if let (Some(a), Some(b)) = (left, right) {
                        let candidate = a + b;
                        let slot = &mut cost[start][length - 1];
                        *slot = Some(slot.map_or(candidate, |cur| cur.max(candidate)));
                    }
                }
            }
        }

        FutureCostTable { input_len, cost }
    }

    /// The optimistic cost of span `[start, start+length)`, or `None` if no
    /// combination of fragments is known to reach it.
    pub fn get(&self, start: usize, length: usize) -> Option<f64> {
        if length == 0 || start + length > self.input_len {
            return None;
        }
        self.cost[start][length - 1]
    }

    /// Sum the costs of a set of maximal uncovered runs.
    /// Any run whose cost is unknown is a hard `InternalInvariant` error:
    /// the span must have been reachable by construction (every input
    /// position is covered by at least the synthetic unknown-word
    /// fragment), so a missing entry means the table or the run computation
    /// is inconsistent.
    pub fn sum_runs(&self, runs: &[(u32, u32)]) -> Result<f64> {
        let mut total = 0.0;
        for &(start, length) in runs {
            match self.get(start as usize, length as usize) {
                Some(c) => total += c,
                None => {
                    return Err(DecoderError::Internal(format!(
                        "no future-cost entry for uncovered span [{start}, {length})"
                    )))
                }
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::InMemoryAlignmentTable;
    use crate::lm::NgramLanguageModel;
    use crate::pattern::Pattern;
    use std::collections::HashMap;

    fn uniform_lm(logprob: f64) -> NgramLanguageModel {
        // order 1: every unigram (including <unk>) scores `logprob`.
        let mut ngrams = HashMap::new();
        ngrams.insert(vec![17u32], logprob);
        ngrams.insert(vec![18u32], logprob);
        ngrams.insert(vec![19u32], logprob);
        NgramLanguageModel::new(1, ngrams, HashMap::new(), logprob)
    }

    #[test]
    fn single_span_costs_compose_additively() {
        // Three singleton spans each costing -1, no larger direct spans
        // covering the whole range -> cost[0,3] must equal -3.
        let mut table = InMemoryAlignmentTable::new();
        table
            .insert(Pattern::single(7), vec![(Pattern::single(17), vec![1.0])])
            .unwrap();
        table
            .insert(Pattern::single(8), vec![(Pattern::single(18), vec![1.0])])
            .unwrap();
        table
            .insert(Pattern::single(9), vec![(Pattern::single(19), vec![1.0])])
            .unwrap();
        let input = [7u32, 8, 9];
        let index = SourceFragmentIndex::build(&input, &table);
        let lm = uniform_lm(0.0);
        let ft = FutureCostTable::build(3, &index, &[1.0], 1.0, &lm);
        assert_eq!(ft.get(0, 1), Some(0.0));
        assert_eq!(ft.get(0, 3), Some(0.0));
    }

    #[test]
    fn monotone_relaxation_never_beats_best_split() {
        let mut table = InMemoryAlignmentTable::new();
        table
            .insert(Pattern::single(7), vec![(Pattern::single(17), vec![0.5])])
            .unwrap();
        table
            .insert(Pattern::single(8), vec![(Pattern::single(18), vec![0.5])])
            .unwrap();
        table
            .insert(
                Pattern::from_tokens(&[7, 8]),
                vec![(Pattern::from_tokens(&[17, 18]), vec![0.9])],
            )
            .unwrap();
        let input = [7u32, 8];
        let index = SourceFragmentIndex::build(&input, &table);
        let lm = uniform_lm(-0.1);
        let ft = FutureCostTable::build(2, &index, &[1.0], 1.0, &lm);
        let split = ft.get(0, 1).unwrap() + ft.get(1, 1).unwrap();
        assert!(ft.get(0, 2).unwrap() >= split - 1e-9);
    }

    #[test]
    fn unreachable_span_has_no_entry() {
        let table = InMemoryAlignmentTable::new();
        let index = SourceFragmentIndex::build(&[7u32], &table);
        let lm = uniform_lm(0.0);
        let ft = FutureCostTable::build(1, &index, &[1.0], 1.0, &lm);
        assert_eq!(ft.get(0, 1), None);
    }
}
