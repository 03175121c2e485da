//! Per-length beam.

use ahash::AHashMap;

use crate::error::Result;
use crate::hypothesis::{Coverage, HypothesisArena, HypothesisHandle};
use crate::pattern::Pattern;

/// A capacity-bounded, descending-by-score beam of hypotheses sharing the
/// same number of input words translated so far.
pub struct Stack {
    capacity: usize,
    members: Vec<HypothesisHandle>,
}

impl Stack {
    pub fn new(capacity: usize) -> Self {
        Stack {
            capacity,
            members: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[HypothesisHandle] {
        &self.members
    }

    fn score(arena: &HypothesisArena, h: HypothesisHandle) -> f64 {
        arena.get(h).total_score()
    }

    /// Insert `h` in descending-score order, evicting the worst member if the
    /// stack is already at capacity and `h` is no worse than it (histogram
    /// pruning). Returns whether `h` was kept. The caller owns `h`'s refcount
    /// bookkeeping: `true` means the stack now holds a retained reference;
    /// `false` means the caller must release it.
    pub fn add(&mut self, h: HypothesisHandle, arena: &mut HypothesisArena) -> Result<bool> {
        if self.capacity == 0 {
            return Ok(false);
        }
        let score = Self::score(arena, h);
        let pos = self
            .members
            .binary_search_by(|&m| Self::score(arena, m).partial_cmp(&score).unwrap().reverse())
            .unwrap_or_else(|e| e);
        if self.members.len() < self.capacity {
            self.members.insert(pos, h);
            arena.retain(h);
            Ok(true)
        } else if pos < self.capacity {
            let evicted = self.members.pop().unwrap();
            arena.release(evicted)?;
            self.members.insert(pos, h);
            arena.retain(h);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Remove and return the highest-scoring member, if any. Ownership of
    /// the returned handle's stack-reference transfers to the caller.
    pub fn pop_best(&mut self) -> Option<HypothesisHandle> {
        if self.members.is_empty() {
            None
        } else {
            Some(self.members.remove(0))
        }
    }

    /// Discard every member scoring worse than `best_score + ln(threshold)`;
    /// no-op unless `0 < threshold < 1`.
    pub fn prune(&mut self, threshold: f64, arena: &mut HypothesisArena) -> Result<()> {
        if !(0.0 < threshold && threshold < 1.0) {
            return Ok(());
        }
        let Some(&best) = self.members.first() else {
            return Ok(());
        };
        let cutoff = Self::score(arena, best) + threshold.ln();
        let keep: Vec<HypothesisHandle> = self
            .members
            .iter()
            .copied()
            .take_while(|&h| Self::score(arena, h) >= cutoff)
            .collect();
        for &h in &self.members[keep.len()..] {
            arena.release(h)?;
        }
        self.members = keep;
        Ok(())
    }

    /// Collapse hypotheses that agree on `(input_coverage, history)`: since
    /// the list is already sorted descending by score, the first hypothesis
    /// seen per key is the best and the rest are released.
    pub fn recombine(&mut self, arena: &mut HypothesisArena) -> Result<()> {
        let mut seen: AHashMap<(Coverage, Option<Pattern>), ()> = AHashMap::default();
        let mut keep = Vec::with_capacity(self.members.len());
        for &h in &self.members {
            let node = arena.get(h);
            let key = (node.input_coverage.clone(), node.history.clone());
            if seen.insert(key, ()).is_none() {
                keep.push(h);
            } else {
                arena.release(h)?;
            }
        }
        self.members = keep;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::InMemoryAlignmentTable;
    use crate::fragment::SourceFragmentIndex;
    use crate::futurecost::FutureCostTable;
    use crate::lm::NgramLanguageModel;
    use std::collections::HashMap;

    fn setup() -> (HypothesisArena, FutureCostTable, NgramLanguageModel) {
        let mut table = InMemoryAlignmentTable::new();
        table
            .insert(Pattern::single(7), vec![(Pattern::single(17), vec![0.5])])
            .unwrap();
        let input = [7u32];
        let index = SourceFragmentIndex::build(&input, &table);
        let mut ngrams = HashMap::new();
        ngrams.insert(vec![17u32], 0.1_f64.ln());
        ngrams.insert(vec![crate::pattern::END_OF_SENTENCE], 0.1_f64.ln());
        let lm = NgramLanguageModel::new(1, ngrams, HashMap::new(), 0.1_f64.ln());
        let ft = FutureCostTable::build(1, &index, &[1.0], 1.0, &lm);
        (HypothesisArena::new(), ft, lm)
    }

    #[test]
    fn histogram_pruning_respects_capacity() {
        let (mut arena, ft, lm) = setup();
        let root = arena.create_initial(1);
        arena.retain(root);
        let mut stack = Stack::new(1);
        let a = arena
            .create_child(root, Pattern::single(7), 0, Pattern::single(17), 0, &[0.9], &[1.0], 1.0, 1.0, &lm, &ft)
            .unwrap();
        let b = arena
            .create_child(root, Pattern::single(7), 0, Pattern::single(17), 0, &[0.1], &[1.0], 1.0, 1.0, &lm, &ft)
            .unwrap();
        assert!(stack.add(a, &mut arena).unwrap());
        assert!(!stack.add(b, &mut arena).unwrap());
        assert_eq!(stack.len(), 1);
        arena.release(root).unwrap();
    }

    #[test]
    fn recombine_keeps_only_best_per_coverage_history_key() {
        let (mut arena, ft, lm) = setup();
        let root = arena.create_initial(1);
        arena.retain(root);
        let mut stack = Stack::new(4);
        let a = arena
            .create_child(root, Pattern::single(7), 0, Pattern::single(17), 0, &[0.9], &[1.0], 1.0, 1.0, &lm, &ft)
            .unwrap();
        let b = arena
            .create_child(root, Pattern::single(7), 0, Pattern::single(17), 0, &[0.1], &[1.0], 1.0, 1.0, &lm, &ft)
            .unwrap();
        stack.add(a, &mut arena).unwrap();
        stack.add(b, &mut arena).unwrap();
        stack.recombine(&mut arena).unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.members()[0], a);
        arena.release(root).unwrap();
    }
}
