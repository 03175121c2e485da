//! Arena-based hypothesis graph: hypotheses reference each other by stable
//! handle rather than raw pointer, with explicit refcounts governing when a
//! node is reclaimed.

use crate::error::{DecoderError, Result};
use crate::futurecost::FutureCostTable;
use crate::pattern::{Class, Pattern, BEGIN_OF_SENTENCE, UNKNOWN_CLASS};
use crate::scoring::translation_score;
use crate::lm::LanguageModel;

/// Stable integer handle into a `HypothesisArena`.
pub type HypothesisHandle = u32;

/// A bitmap of input (or target) positions, used both for `input_coverage`
/// and, internally, for tracking which target positions are already filled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coverage(Vec<bool>);

impl Coverage {
    pub fn new(len: usize) -> Self {
        Coverage(vec![false; len])
    }

    pub fn popcount(&self) -> u32 {
        self.0.iter().filter(|&&b| b).count() as u32
    }

    pub fn is_all_set(&self) -> bool {
        self.0.iter().all(|&b| b)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Set the non-gap positions of `pattern` placed at `offset` (gap
    /// positions are never marked covered).
    pub fn set_pattern(&mut self, offset: u32, pattern: &Pattern) {
        for &(o, _) in pattern.tokens() {
            self.0[(offset + o) as usize] = true;
        }
    }

    /// True if any non-gap position of `pattern` at `offset` is already
    /// covered. Because gap positions are never marked, a pattern that falls
    /// entirely inside an ancestor's declared gap never overlaps.
    pub fn overlaps_pattern(&self, offset: u32, pattern: &Pattern) -> bool {
        pattern
            .tokens()
            .iter()
            .any(|&(o, _)| self.0[(offset + o) as usize])
    }

    /// Maximal runs of uncovered positions within `[0, len)`.
    pub fn uncovered_runs(&self) -> Vec<(u32, u32)> {
        let mut runs = Vec::new();
        let mut start: Option<usize> = None;
        for (i, &covered) in self.0.iter().enumerate() {
            if !covered && start.is_none() {
                start = Some(i);
            } else if covered {
                if let Some(s) = start.take() {
                    runs.push((s as u32, (i - s) as u32));
                }
            }
        }
        if let Some(s) = start {
            runs.push((s as u32, (self.0.len() - s) as u32));
        }
        runs
    }

    pub fn is_set(&self, pos: usize) -> bool {
        self.0[pos]
    }
}

/// Growing, sparse buffer of produced target tokens, used to derive target
/// gaps and LM history without re-walking the ancestor chain on every
/// access.
#[derive(Debug, Clone, Default)]
struct TargetBuffer(Vec<Option<Class>>);

impl TargetBuffer {
    fn ensure_len(&mut self, len: usize) {
        if self.0.len() < len {
            self.0.resize(len, None);
        }
    }

    fn place(&mut self, offset: u32, pattern: &Pattern) {
        self.ensure_len((offset + pattern.n()) as usize);
        for &(o, c) in pattern.tokens() {
            self.0[(offset + o) as usize] = Some(c);
        }
    }

    fn gaps_below(&self, len: usize) -> Vec<(u32, u32)> {
        let mut gaps = Vec::new();
        let mut start: Option<usize> = None;
        for i in 0..len {
            let filled = self.0.get(i).copied().flatten().is_some();
            if !filled && start.is_none() {
                start = Some(i);
            } else if filled {
                if let Some(s) = start.take() {
                    gaps.push((s as u32, (i - s) as u32));
                }
            }
        }
        if let Some(s) = start {
            gaps.push((s as u32, (len - s) as u32));
        }
        gaps
    }

    /// LM conditioning context for the word at target position `before`:
    /// the tokens immediately preceding it, up to `order-1` of them. When
    /// fewer than `order-1` tokens exist before `before`, a single
    /// `BEGIN_OF_SENTENCE` marker is prepended to the tokens actually
    /// available — the window is never padded out to a fixed `order-1`
    /// width with repeated markers. History broken by an unknown word: if
    /// the window contains one, only the tokens after the last unknown
    /// survive.
    fn history(&self, before: u32, order: usize) -> Option<Pattern> {
        if order <= 1 {
            return None;
        }
        let need = (order - 1) as usize;
        let before = before as usize;
        let mut window = Vec::with_capacity(need);
        if before < need {
            window.push(BEGIN_OF_SENTENCE);
            for i in 0..before {
                window.push(self.0[i].expect("target position before offset must already be filled"));
            }
        } else {
            for i in (before - need)..before {
                window.push(self.0[i].expect("target position before offset must already be filled"));
            }
        }
        if let Some(pos) = window.iter().rposition(|&c| c == UNKNOWN_CLASS) {
            window = window[pos + 1..].to_vec();
        }
        if window.is_empty() {
            None
        } else {
            Some(Pattern::from_tokens(&window))
        }
    }

    /// Conditioning context for the sentence-end terminator: unlike
    /// `history`, this never prepends a sentence-begin marker when clipped
    /// at position 0 (it simply uses however many tokens are available,
    /// possibly none) and never discards-and-restarts on an unknown word —
    /// it takes the raw trailing tokens as-is.
    fn terminator_context(&self, before: u32, order: usize) -> Option<Pattern> {
        if order <= 1 {
            return None;
        }
        let need = (order - 1) as usize;
        let before = before as usize;
        let have = need.min(before);
        let window: Vec<Class> = ((before - have)..before)
            .map(|i| self.0[i].expect("target position before offset must already be filled"))
            .collect();
        if window.is_empty() {
            None
        } else {
            Some(Pattern::from_tokens(&window))
        }
    }
}

/// One node of the search DAG.
pub struct HypothesisNode {
    pub parent: Option<HypothesisHandle>,
    pub source_pattern: Option<Pattern>,
    pub target_pattern: Option<Pattern>,
    pub source_offset: u32,
    pub target_offset: u32,
    pub input_coverage: Coverage,
    target_buffer: TargetBuffer,
    pub source_gaps: Vec<(u32, u32)>,
    pub target_gaps: Vec<(u32, u32)>,
    pub history: Option<Pattern>,
    pub t_score: f64,
    pub lm_score: f64,
    pub d_score: f64,
    pub future_cost: f64,
    /// Cumulative ancestors' `t_score+lm_score+d_score` plus this node's own,
    /// excluding `future_cost`.
    pub base_score: f64,
    child_count: u32,
    refcount: u32,
}

impl HypothesisNode {
    /// Total accumulated score: ancestors plus own step plus the
    /// optimistic future cost for whatever remains uncovered.
    pub fn total_score(&self) -> f64 {
        self.base_score + self.future_cost
    }

    /// `target_offset + width` of the target pattern applied here, i.e. the
    /// length of the filled target prefix after this step (gaps aside).
    pub fn target_frontier(&self) -> u32 {
        self.target_pattern
            .as_ref()
            .map(|p| self.target_offset + p.n())
            .unwrap_or(0)
            .max(self.target_buffer.0.len() as u32 - self.trailing_empty())
    }

    fn trailing_empty(&self) -> u32 {
        self.target_buffer
            .0
            .iter()
            .rev()
            .take_while(|c| c.is_none())
            .count() as u32
    }

    /// The input position immediately after this hypothesis's own source
    /// span (0 for the initial hypothesis, so the first jump is always free
    /// of distortion cost).
    pub fn source_frontier(&self) -> u32 {
        self.source_pattern
            .as_ref()
            .map(|p| self.source_offset + p.n())
            .unwrap_or(0)
    }

    pub fn is_final(&self) -> bool {
        self.input_coverage.is_all_set() && self.target_gaps.is_empty()
    }

    pub fn is_initial(&self) -> bool {
        self.parent.is_none()
    }
}

/// Arena owning all hypotheses created during one decode. Nodes are
/// reclaimed once no stack references them and they have no live children:
/// `refcount` counts stack memberships rather than a single boolean flag,
/// since a node can simultaneously sit in a stack and be the ancestor of
/// several children.
pub struct HypothesisArena {
    nodes: Vec<Option<HypothesisNode>>,
}

impl HypothesisArena {
    pub fn new() -> Self {
        HypothesisArena { nodes: Vec::new() }
    }

    pub fn get(&self, h: HypothesisHandle) -> &HypothesisNode {
        self.nodes[h as usize]
            .as_ref()
            .expect("use of a released hypothesis handle")
    }

    /// The unique initial hypothesis: empty coverage, zero scores, no
    /// parent.
    pub fn create_initial(&mut self, input_len: usize) -> HypothesisHandle {
        let node = HypothesisNode {
            parent: None,
            source_pattern: None,
            target_pattern: None,
            source_offset: 0,
            target_offset: 0,
            input_coverage: Coverage::new(input_len),
            target_buffer: TargetBuffer::default(),
            source_gaps: Vec::new(),
            target_gaps: Vec::new(),
            history: None,
            t_score: 0.0,
            lm_score: 0.0,
            d_score: 0.0,
            future_cost: 0.0,
            base_score: 0.0,
            child_count: 0,
            refcount: 0,
        };
        self.nodes.push(Some(node));
        (self.nodes.len() - 1) as HypothesisHandle
    }

    /// Increment a node's stack-membership refcount.
    pub fn retain(&mut self, h: HypothesisHandle) {
        self.nodes[h as usize].as_mut().unwrap().refcount += 1;
    }

    /// Decrement a node's refcount, collecting it (and cascading to its
    /// ancestors) once it has neither stack references nor live children.
    /// A refcount already at zero means this handle was released twice;
    /// that is an `InternalInvariant` (spec.md §7), checked unconditionally
    /// rather than via `debug_assert!` so it is still caught in release
    /// builds.
    pub fn release(&mut self, h: HypothesisHandle) -> Result<()> {
        let node = self.nodes[h as usize].as_mut().unwrap();
        if node.refcount == 0 {
            return Err(DecoderError::Internal(
                "double release of hypothesis handle".to_string(),
            ));
        }
        node.refcount -= 1;
        self.maybe_collect(h);
        Ok(())
    }

    fn maybe_collect(&mut self, h: HypothesisHandle) {
        let (refcount, child_count, parent) = {
            let node = self.nodes[h as usize].as_ref().unwrap();
            (node.refcount, node.child_count, node.parent)
        };
        if refcount == 0 && child_count == 0 {
            self.nodes[h as usize] = None;
            if let Some(p) = parent {
                let pnode = self.nodes[p as usize].as_mut().unwrap();
                pnode.child_count -= 1;
                self.maybe_collect(p);
            }
        }
    }

    /// Construct a child hypothesis: extend source/target coverage, compute
    /// translation/language-model/distortion scores and the new future-cost
    /// estimate, and check fertility of what remains uncovered.
    #[allow(clippy::too_many_arguments)]
    pub fn create_child(
        &mut self,
        parent: HypothesisHandle,
        source_pattern: Pattern,
        source_offset: u32,
        target_pattern: Pattern,
        target_offset: u32,
        t_scores: &[f64],
        t_weights: &[f64],
        lm_weight: f64,
        d_weight: f64,
        lm: &dyn LanguageModel,
        future_cost_table: &FutureCostTable,
    ) -> Result<HypothesisHandle> {
        let (mut input_coverage, mut target_buffer, base_score_before, order, parent_is_initial, parent_source_frontier) = {
            let p = self.get(parent);
            (
                p.input_coverage.clone(),
                p.target_buffer.clone(),
                p.base_score,
                lm.order(),
                p.is_initial(),
                p.source_frontier(),
            )
        };

        // Step 1: source gaps, in absolute input coordinates.
        let source_gaps: Vec<(u32, u32)> = source_pattern
            .gaps()
            .iter()
            .map(|&(o, w)| (source_offset + o, w))
            .collect();

        // Step 3: input coverage.
        let before_popcount = input_coverage.popcount();
        input_coverage.set_pattern(source_offset, &source_pattern);
        if input_coverage.popcount() <= before_popcount {
            return Err(DecoderError::Internal(
                "expansion did not increase input coverage".to_string(),
            ));
        }

        // Step 2: target coverage/gaps, via the running target buffer. The
        // scan range is the buffer's full filled extent, not just this
        // step's own span: an earlier skip-gram may have left a gap beyond
        // where this step writes.
        target_buffer.place(target_offset, &target_pattern);
        let filled_extent = target_buffer.0.len() as u32;
        let target_gaps = target_buffer.gaps_below(filled_extent as usize);

        // Step 4: LM history.
        let history = target_buffer.history(target_offset, order);

        // Step 5: translation score.
        let t_score = translation_score(t_weights, t_scores);

        // Step 6 (+7): LM score, one contiguous part at a time; history only
        // feeds the first part, and only if that part starts without a gap.
        let parts = target_pattern.contiguous_parts();
        let mut lm_score = 0.0;
        for (i, (part_offset, classes)) in parts.iter().enumerate() {
            let part_pattern = Pattern::from_tokens(classes);
            let use_history = i == 0 && *part_offset == 0;
            lm_score += lm.score(&part_pattern, if use_history { history.as_ref() } else { None });
        }

        // Step 8: distortion. The first real hypothesis (parent is initial)
        // treats the previous source end as 0: the first jump is free.
        let prev_end = if parent_is_initial { 0 } else { parent_source_frontier };
        let d_score = d_weight * -((source_offset as i64 - prev_end as i64).unsigned_abs() as f64);

        let is_final = input_coverage.is_all_set() && target_gaps.is_empty();
        if is_final {
            // Step 7: sentence-end contribution.
            let terminator = target_buffer.terminator_context(filled_extent, order);
            lm_score += lm.score(
                &Pattern::from_tokens(&[crate::pattern::END_OF_SENTENCE]),
                terminator.as_ref(),
            );
        }

        // Step 9: future cost over the remaining uncovered runs.
        let future_cost = future_cost_table.sum_runs(&input_coverage.uncovered_runs())?;

        let lm_score = lm_weight * lm_score;
        let base_score = base_score_before + t_score + lm_score + d_score;

        let node = HypothesisNode {
            parent: Some(parent),
            source_pattern: Some(source_pattern),
            target_pattern: Some(target_pattern),
            source_offset,
            target_offset,
            input_coverage,
            target_buffer,
            source_gaps,
            target_gaps,
            history,
            t_score,
            lm_score,
            d_score,
            future_cost,
            base_score,
            child_count: 0,
            refcount: 0,
        };
        self.nodes.push(Some(node));
        let handle = (self.nodes.len() - 1) as HypothesisHandle;
        self.nodes[parent as usize].as_mut().unwrap().child_count += 1;
        Ok(handle)
    }

    /// Discard a freshly-created, never-stacked hypothesis (e.g. one
    /// rejected for infertility).
    pub fn discard(&mut self, h: HypothesisHandle) {
        self.maybe_collect(h);
    }

    /// Add a flat additive penalty to a node's accumulated score (the
    /// `gappy_stack_penalty` hook).
    pub fn apply_penalty(&mut self, h: HypothesisHandle, penalty: f64) {
        self.nodes[h as usize].as_mut().unwrap().base_score += penalty;
    }

    /// Walk from `h` to the root, in root-to-`h` order.
    pub fn ancestor_path(&self, h: HypothesisHandle) -> Vec<HypothesisHandle> {
        let mut path = Vec::new();
        let mut cur = Some(h);
        while let Some(c) = cur {
            path.push(c);
            cur = self.get(c).parent;
        }
        path.reverse();
        path
    }

    /// Reconstruct the target sentence by forward-walking the derivation
    /// from root to `h`.
    pub fn reconstruct_output(&self, h: HypothesisHandle) -> Vec<Class> {
        let path = self.ancestor_path(h);
        let mut len = 0u32;
        for &n in &path {
            let node = self.get(n);
            if let Some(tp) = &node.target_pattern {
                len = len.max(node.target_offset + tp.n());
            }
        }
        let mut out: Vec<Option<Class>> = vec![None; len as usize];
        for &n in &path {
            let node = self.get(n);
            if let Some(tp) = &node.target_pattern {
                for &(o, c) in tp.tokens() {
                    out[(node.target_offset + o) as usize] = Some(c);
                }
            }
        }
        out.into_iter()
            .map(|o| o.expect("final derivation must leave no target gap unfilled"))
            .collect()
    }
}

impl Default for HypothesisArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::InMemoryAlignmentTable;
    use crate::fragment::SourceFragmentIndex;
    use crate::lm::NgramLanguageModel;
    use std::collections::HashMap;

    fn flat_lm() -> NgramLanguageModel {
        let mut ngrams = HashMap::new();
        for w in [17u32, 18, 19, UNKNOWN_CLASS, crate::pattern::END_OF_SENTENCE] {
            ngrams.insert(vec![w], 0.1_f64.ln());
        }
        NgramLanguageModel::new(1, ngrams, HashMap::new(), 0.1_f64.ln())
    }

    #[test]
    fn initial_hypothesis_satisfies_i1() {
        let mut arena = HypothesisArena::new();
        let h = arena.create_initial(2);
        let node = arena.get(h);
        assert!(node.is_initial());
        assert_eq!(node.input_coverage.popcount(), 0);
        assert_eq!(node.total_score(), 0.0);
    }

    #[test]
    fn child_increases_coverage_and_scores_additively() {
        let mut table = InMemoryAlignmentTable::new();
        table
            .insert(Pattern::single(7), vec![(Pattern::single(17), vec![0.5])])
            .unwrap();
        let input = [7u32];
        let index = SourceFragmentIndex::build(&input, &table);
        let lm = flat_lm();
        let ft = FutureCostTable::build(1, &index, &[1.0], 1.0, &lm);

        let mut arena = HypothesisArena::new();
        let root = arena.create_initial(1);
        let child = arena
            .create_child(
                root,
                Pattern::single(7),
                0,
                Pattern::single(17),
                0,
                &[0.5],
                &[1.0],
                1.0,
                1.0,
                &lm,
                &ft,
            )
            .unwrap();
        let node = arena.get(child);
        assert_eq!(node.input_coverage.popcount(), 1);
        assert!(node.is_final());
        // base_score = t_score + lm_score(+ sentence end) + d_score(=0, first jump free)
        assert!(node.base_score < 0.0);
    }

    #[test]
    fn refcount_and_child_count_reclaim_the_arena() {
        let mut table = InMemoryAlignmentTable::new();
        table
            .insert(Pattern::single(7), vec![(Pattern::single(17), vec![0.5])])
            .unwrap();
        let input = [7u32];
        let index = SourceFragmentIndex::build(&input, &table);
        let lm = flat_lm();
        let ft = FutureCostTable::build(1, &index, &[1.0], 1.0, &lm);

        let mut arena = HypothesisArena::new();
        let root = arena.create_initial(1);
        arena.retain(root);
        let child = arena
            .create_child(
                root,
                Pattern::single(7),
                0,
                Pattern::single(17),
                0,
                &[0.5],
                &[1.0],
                1.0,
                1.0,
                &lm,
                &ft,
            )
            .unwrap();
        arena.retain(child);
        arena.release(child).unwrap();
        // child gone; parent's child_count back to 0, but still retained.
        assert_eq!(arena.get(root).child_count, 0);
        arena.release(root).unwrap();
    }

    #[test]
    fn double_release_is_an_internal_invariant_error() {
        let mut arena = HypothesisArena::new();
        let root = arena.create_initial(1);
        arena.retain(root);
        arena.release(root).unwrap();
        assert!(arena.release(root).is_err());
    }
}
