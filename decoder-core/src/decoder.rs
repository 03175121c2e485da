//! The stack-decoding search driver.

use std::sync::Arc;

use ahash::AHashMap;
use tracing::{debug, warn};

use crate::alignment::AlignmentTable;
use crate::config::Config;
use crate::error::{DecoderError, Result};
use crate::fragment::SourceFragmentIndex;
use crate::futurecost::FutureCostTable;
use crate::hypothesis::{Coverage, HypothesisArena, HypothesisHandle};
use crate::lm::LanguageModel;
use crate::pattern::{Class, Pattern};
use crate::stack::Stack;

/// Outcome of one decode. `SearchFallback` is not an error: it is
/// the non-fatal "best partial derivation" result, returned here as a
/// distinct successful variant rather than through `Result`'s error arm.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// Full input coverage was reached.
    Success(Vec<Class>),
    /// Search exhausted itself before reaching full coverage; this is the
    /// best partial derivation reachable from the most advanced non-empty
    /// stack.
    Fallback(Vec<Class>),
    /// Not even an initial expansion was possible.
    NoSolution,
}

/// Diagnostic counters surfaced by `--stats`/`--globalstats`.
#[derive(Debug, Default, Clone)]
pub struct DecodeStats {
    pub expansions: u64,
    pub rejections_conflict: u64,
    pub rejections_distortion: u64,
    pub rejections_infertile: u64,
    pub gap_resolutions: u64,
    /// Pattern width -> (contiguous uses, skip-gram uses).
    pub ngram_usage: AHashMap<u32, (u64, u64)>,
}

/// Per-decode search state: arena, the per-coverage-count stacks and their
/// gappy counterparts, the fragment index, the future-cost table, and the
/// shared read-only model references.
pub struct Decoder {
    arena: HypothesisArena,
    stacks: Vec<Stack>,
    gappy_stacks: Vec<Stack>,
    fragments: SourceFragmentIndex,
    future_cost: FutureCostTable,
    config: Config,
    lm: Arc<dyn LanguageModel>,
    input: Vec<Class>,
    stats: DecodeStats,
}

impl std::fmt::Debug for Decoder {
    /// Hand-written since `lm` is a `dyn LanguageModel` trait object: only
    /// the state useful for diagnosing a stuck or errored decode is shown.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("input_len", &self.input.len())
            .field("stacks", &self.stacks.len())
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Decoder {
    /// Build the per-decode state for `input`:
    /// indexes the alignment table, injects synthetic unknown-word
    /// fragments for uncovered positions, and computes the future-cost
    /// table. Fails with `DataError` if any translation option carries
    /// fewer feature scores than `config.t_weights`.
    pub fn new(
        input: Vec<Class>,
        table: &dyn AlignmentTable,
        lm: Arc<dyn LanguageModel>,
        config: Config,
    ) -> Result<Self> {
        let num_features = config.t_weights.len();
        let fragments = SourceFragmentIndex::build(&input, table).with_unknown_words(&input, num_features);
        for f in &fragments.fragments {
            for (_, scores) in &f.options {
                if scores.len() < num_features {
                    return Err(DecoderError::Data(format!(
                        "translation option has {} scores, fewer than the {} configured weights",
                        scores.len(),
                        num_features
                    )));
                }
            }
        }
        let future_cost = FutureCostTable::build(input.len(), &fragments, &config.t_weights, config.lm_weight, lm.as_ref());
        let n = input.len();
        Ok(Decoder {
            arena: HypothesisArena::new(),
            stacks: (0..=n).map(|_| Stack::new(config.stack_size)).collect(),
            gappy_stacks: (0..=n).map(|_| Stack::new(config.stack_size)).collect(),
            fragments,
            future_cost,
            config,
            lm,
            input,
            stats: DecodeStats::default(),
        })
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Drive the search stack-by-stack to completion: insert a root
    /// hypothesis, expand and prune/recombine every coverage-count stack in
    /// increasing order, then take the best fully-covering hypothesis or
    /// fall back to the most-advanced partial one.
    pub fn decode(&mut self) -> Result<DecodeOutcome> {
        let n = self.input.len();
        if n == 0 {
            return Ok(DecodeOutcome::Success(Vec::new()));
        }

        let root = self.arena.create_initial(n);
        self.insert_into_stack(root)?;

        for i in 0..n {
            self.drain_stack_at(i, false)?;
            self.drain_stack_at(i, true)?;
            for j in (i + 1)..=n {
                self.stacks[j].prune(self.config.prune_threshold, &mut self.arena)?;
                self.stacks[j].recombine(&mut self.arena)?;
                self.gappy_stacks[j].prune(self.config.prune_threshold, &mut self.arena)?;
                self.gappy_stacks[j].recombine(&mut self.arena)?;
            }
        }

        if let Some(h) = self.stacks[n].pop_best() {
            let output = self.arena.reconstruct_output(h);
            self.arena.release(h)?;
            debug!(len = output.len(), "decode reached full coverage");
            return Ok(DecodeOutcome::Success(output));
        }

        for j in (1..n).rev() {
            if let Some(h) = self.stacks[j].pop_best() {
                let output = self.arena.reconstruct_output(h);
                self.arena.release(h)?;
                warn!(coverage = j, "decode fell back to best partial derivation");
                return Ok(DecodeOutcome::Fallback(output));
            }
            if let Some(h) = self.gappy_stacks[j].pop_best() {
                let output = self.arena.reconstruct_output(h);
                self.arena.release(h)?;
                warn!(coverage = j, "decode fell back to best gappy partial derivation");
                return Ok(DecodeOutcome::Fallback(output));
            }
        }

        Ok(DecodeOutcome::NoSolution)
    }

    fn drain_stack_at(&mut self, i: usize, gappy: bool) -> Result<()> {
        loop {
            let popped = if gappy {
                self.gappy_stacks[i].pop_best()
            } else {
                self.stacks[i].pop_best()
            };
            let Some(h) = popped else { break };
            self.expand(h)?;
            self.arena.release(h)?;
        }
        Ok(())
    }

    /// Source patterns already applied on `h`'s derivation path, used both
    /// to reject re-applying the identical (hash-equal) pattern twice and,
    /// via `is_eligible`, to decide what the hypothesis can still reach.
    fn ancestor_source_patterns(&self, h: HypothesisHandle) -> Vec<Pattern> {
        self.arena
            .ancestor_path(h)
            .iter()
            .filter_map(|&a| self.arena.get(a).source_pattern.clone())
            .collect()
    }

    /// Whether a candidate fragment could ever be applied to `h`: shared
    /// between `expand` (which additionally tracks *why* a fragment was
    /// rejected, for `--stats`) and `is_fertile` (which only needs to know
    /// whether at least one eligible fragment remains). A fragment `expand`
    /// would always skip can never help a hypothesis progress, so it must
    /// not be allowed to satisfy fertility either.
    fn is_eligible(
        &self,
        coverage: &Coverage,
        used: &[Pattern],
        frontier: u32,
        source_pattern: &Pattern,
        source_offset: u32,
    ) -> bool {
        if coverage.overlaps_pattern(source_offset, source_pattern) {
            return false;
        }
        if used.iter().any(|p| p == source_pattern) {
            return false;
        }
        if !self.config.allow_skipgrams && source_pattern.is_skipgram() {
            return false;
        }
        if let Some(limit) = self.config.distortion_limit {
            let distance = (source_offset as i64 - frontier as i64).unsigned_abs() as u32;
            if distance > limit {
                return false;
            }
        }
        true
    }

    /// Expand `h` against every fragment in the index.
    fn expand(&mut self, h: HypothesisHandle) -> Result<()> {
        let coverage = self.arena.get(h).input_coverage.clone();
        let frontier = self.arena.get(h).source_frontier();
        let used = self.ancestor_source_patterns(h);

        for idx in 0..self.fragments.fragments.len() {
            let (source_pattern, source_offset, options) = {
                let f = &self.fragments.fragments[idx];
                (f.source_pattern.clone(), f.input_offset, f.options.clone())
            };

            if coverage.overlaps_pattern(source_offset, &source_pattern) {
                self.stats.rejections_conflict += 1;
                continue;
            }
            // Forbid re-applying the identical (hash-equal) source pattern
            // twice on one derivation path, regardless of where else it
            // occurs in the input.
            if used.iter().any(|p| *p == source_pattern) {
                self.stats.rejections_conflict += 1;
                continue;
            }
            if !self.config.allow_skipgrams && source_pattern.is_skipgram() {
                continue;
            }
            if let Some(limit) = self.config.distortion_limit {
                let distance = (source_offset as i64 - frontier as i64).unsigned_abs() as u32;
                if distance > limit {
                    self.stats.rejections_distortion += 1;
                    continue;
                }
            }
            for (target_pattern, t_scores) in &options {
                let via_gap = !self.arena.get(h).target_gaps.is_empty();
                let placements = self.target_placements(h, target_pattern);
                for target_offset in placements {
                    let child = self.arena.create_child(
                        h,
                        source_pattern.clone(),
                        source_offset,
                        target_pattern.clone(),
                        target_offset,
                        t_scores,
                        &self.config.t_weights,
                        self.config.lm_weight,
                        self.config.d_weight,
                        self.lm.as_ref(),
                        &self.future_cost,
                    )?;
                    let is_final = self.arena.get(child).is_final();
                    if !is_final && !self.is_fertile(child) {
                        self.stats.rejections_infertile += 1;
                        self.arena.discard(child);
                        continue;
                    }
                    self.stats.expansions += 1;
                    if via_gap {
                        self.stats.gap_resolutions += 1;
                    }
                    let usage = self.stats.ngram_usage.entry(source_pattern.n()).or_insert((0, 0));
                    if source_pattern.is_skipgram() {
                        usage.1 += 1;
                    } else {
                        usage.0 += 1;
                    }
                    self.insert_into_stack(child)?;
                }
            }
        }
        Ok(())
    }

    /// Target placement candidates for `target` against `h`'s current
    /// target gaps): if `h` has open gaps, `target` must fit
    /// one of them; otherwise it is placed at the current frontier.
    fn target_placements(&self, h: HypothesisHandle, target: &Pattern) -> Vec<u32> {
        let node = self.arena.get(h);
        if node.target_gaps.is_empty() {
            vec![node.target_frontier()]
        } else {
            node.target_gaps
                .iter()
                .filter(|&&(_, width)| target.n() <= width)
                .map(|&(offset, _)| offset)
                .collect()
        }
    }

    /// Fertility check: every uncovered input position must be
    /// reachable by at least one fragment that `expand` could actually
    /// apply — i.e. one that passes the same eligibility rules (coverage,
    /// reuse, skip-gram toggle, distortion limit), not merely one that
    /// doesn't overlap existing coverage.
    fn is_fertile(&self, h: HypothesisHandle) -> bool {
        let node = self.arena.get(h);
        let uncovered = node.input_coverage.uncovered_runs();
        if uncovered.is_empty() {
            return true;
        }
        let used = self.ancestor_source_patterns(h);
        let frontier = node.source_frontier();

        let mut counts = vec![0u32; self.input.len()];
        for f in &self.fragments.fragments {
            if !self.is_eligible(&node.input_coverage, &used, frontier, &f.source_pattern, f.input_offset) {
                continue;
            }
            for &(offset, _) in f.source_pattern.tokens() {
                counts[(f.input_offset + offset) as usize] += 1;
            }
        }
        uncovered
            .iter()
            .all(|&(start, length)| (start..start + length).all(|p| counts[p as usize] > 0))
    }

    fn insert_into_stack(&mut self, h: HypothesisHandle) -> Result<()> {
        let is_gappy = !self.arena.get(h).target_gaps.is_empty();
        if is_gappy && self.config.gappy_stack_penalty != 0.0 {
            self.arena.apply_penalty(h, self.config.gappy_stack_penalty);
        }
        let idx = self.arena.get(h).input_coverage.popcount() as usize;
        let accepted = if is_gappy {
            self.gappy_stacks[idx].add(h, &mut self.arena)?
        } else {
            self.stacks[idx].add(h, &mut self.arena)?
        };
        if !accepted {
            self.arena.discard(h);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::InMemoryAlignmentTable;
    use crate::lm::NgramLanguageModel;
    use std::collections::HashMap;

    fn uniform_lm(logprob: f64) -> Arc<dyn LanguageModel> {
        let mut ngrams = HashMap::new();
        for w in [17u32, 18, 19, 20, crate::pattern::END_OF_SENTENCE] {
            ngrams.insert(vec![w], logprob);
        }
        Arc::new(NgramLanguageModel::new(1, ngrams, HashMap::new(), logprob))
    }

    fn config(stack_size: usize, d_limit: Option<u32>) -> Config {
        Config {
            stack_size,
            prune_threshold: 1.0,
            t_weights: vec![1.0],
            lm_weight: 1.0,
            d_weight: 1.0,
            distortion_limit: d_limit,
            allow_skipgrams: true,
            gappy_stack_penalty: 0.0,
            verbosity: 0,
        }
    }

    #[test]
    fn empty_input_decodes_to_empty_output() {
        let table = InMemoryAlignmentTable::new();
        let lm = uniform_lm(0.0);
        let mut decoder = Decoder::new(vec![], &table, lm, config(10, None)).unwrap();
        assert_eq!(decoder.decode().unwrap(), DecodeOutcome::Success(vec![]));
    }

    #[test]
    fn bigram_option_wins_over_two_unigrams_scenario_1() {
        let mut table = InMemoryAlignmentTable::new();
        table.insert(Pattern::single(7), vec![(Pattern::single(17), vec![0.5])]).unwrap();
        table.insert(Pattern::single(8), vec![(Pattern::single(18), vec![0.5])]).unwrap();
        table
            .insert(
                Pattern::from_tokens(&[7, 8]),
                vec![(Pattern::from_tokens(&[17, 18]), vec![0.9])],
            )
            .unwrap();
        let lm = uniform_lm(0.1_f64.ln());
        let mut decoder = Decoder::new(vec![7, 8], &table, lm, config(10, Some(0))).unwrap();
        let outcome = decoder.decode().unwrap();
        assert_eq!(outcome, DecodeOutcome::Success(vec![17, 18]));
    }

    #[test]
    fn two_unigram_steps_cover_input_when_bigram_absent_scenario_2() {
        let mut table = InMemoryAlignmentTable::new();
        table.insert(Pattern::single(7), vec![(Pattern::single(17), vec![0.5])]).unwrap();
        table.insert(Pattern::single(8), vec![(Pattern::single(18), vec![0.5])]).unwrap();
        let lm = uniform_lm(0.1_f64.ln());
        let mut decoder = Decoder::new(vec![7, 8], &table, lm, config(10, None)).unwrap();
        let outcome = decoder.decode().unwrap();
        assert_eq!(outcome, DecodeOutcome::Success(vec![17, 18]));
    }

    #[test]
    fn unknown_word_falls_back_to_original_token_scenario_3() {
        let mut table = InMemoryAlignmentTable::new();
        table.insert(Pattern::single(7), vec![(Pattern::single(17), vec![0.5])]).unwrap();
        let lm = uniform_lm(0.1_f64.ln());
        let mut decoder = Decoder::new(vec![7, 9], &table, lm, config(10, None)).unwrap();
        let outcome = decoder.decode().unwrap();
        match outcome {
            DecodeOutcome::Success(tokens) => assert_eq!(tokens, vec![17, 9]),
            other => panic!("expected success via unknown-word injection, got {other:?}"),
        }
    }

    #[test]
    fn single_unknown_word_input_round_trips() {
        let table = InMemoryAlignmentTable::new();
        let lm = uniform_lm(0.1_f64.ln());
        let mut decoder = Decoder::new(vec![42], &table, lm, config(10, None)).unwrap();
        assert_eq!(decoder.decode().unwrap(), DecodeOutcome::Success(vec![42]));
    }

    #[test]
    fn stack_size_one_still_succeeds_on_greedy_inputs() {
        let mut table = InMemoryAlignmentTable::new();
        table.insert(Pattern::single(7), vec![(Pattern::single(17), vec![0.9])]).unwrap();
        table.insert(Pattern::single(8), vec![(Pattern::single(18), vec![0.9])]).unwrap();
        let lm = uniform_lm(0.1_f64.ln());
        let mut decoder = Decoder::new(vec![7, 8], &table, lm, config(1, None)).unwrap();
        assert_eq!(decoder.decode().unwrap(), DecodeOutcome::Success(vec![17, 18]));
    }

    #[test]
    fn rejects_table_entries_with_too_few_scores() {
        let mut table = InMemoryAlignmentTable::new();
        table.insert(Pattern::single(7), vec![(Pattern::single(17), vec![0.5])]).unwrap();
        let lm = uniform_lm(0.0);
        let mut cfg = config(10, None);
        cfg.t_weights = vec![1.0, 1.0];
        let err = Decoder::new(vec![7], &table, lm, cfg).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
