//! Per-decode list of `(source pattern, input position, translation
//! options)` triples covering the input.

use crate::alignment::{AlignmentTable, TranslationOption};
use crate::pattern::{Class, Pattern};

/// One entry of the per-decode fragment index: a source pattern known to
/// occur starting at `input_offset`, together with its translation
/// options.
#[derive(Debug, Clone)]
pub struct SourceFragment {
    pub source_pattern: Pattern,
    pub input_offset: u32,
    pub options: Vec<TranslationOption>,
}

/// The full set of fragments available for one decode: closed under every
/// alignment-table pattern matching some span of the input, plus synthetic
/// unknown-word fragments for any position no table pattern reaches.
#[derive(Debug, Default)]
pub struct SourceFragmentIndex {
    pub fragments: Vec<SourceFragment>,
}

fn pattern_matches_at(pattern: &Pattern, input: &[Class], start: usize) -> bool {
    let end = start as u32 + pattern.n();
    if end as usize > input.len() {
        return false;
    }
    pattern
        .tokens()
        .iter()
        .all(|&(offset, class)| input[start + offset as usize] == class)
}

impl SourceFragmentIndex {
    /// Build the index by scanning every source pattern in `table` against
    /// every start position of `input`.
    pub fn build(input: &[Class], table: &dyn AlignmentTable) -> Self {
        let mut fragments = Vec::new();
        for pattern in table.source_patterns() {
            let width = pattern.n() as usize;
            if width == 0 || width > input.len() {
                continue;
            }
            for start in 0..=(input.len() - width) {
                if pattern_matches_at(pattern, input, start) {
                    let options = table.options(pattern).unwrap_or(&[]).to_vec();
                    fragments.push(SourceFragment {
                        source_pattern: pattern.clone(),
                        input_offset: start as u32,
                        options,
                    });
                }
            }
        }
        SourceFragmentIndex { fragments }
    }

    /// Positions touched by at least one fragment's concrete (non-gap)
    /// token, matching `Coverage::set_pattern`'s convention: a skip-gram's
    /// gap span is never itself "covered" by that fragment, so a position
    /// reachable only as someone else's gap still needs its own fragment
    /// (table-matched or synthetic) to ever be coverable.
    fn covered_mask(&self, input_len: usize) -> Vec<bool> {
        let mut covered = vec![false; input_len];
        for f in &self.fragments {
            for &(offset, _) in f.source_pattern.tokens() {
                covered[f.input_offset as usize + offset as usize] = true;
            }
        }
        covered
    }

    /// Add synthetic unknown-word fragments for every input position not
    /// reached by any existing fragment, each mapping the single input word
    /// to itself with a score vector of all 1s.
    pub fn with_unknown_words(mut self, input: &[Class], num_features: usize) -> Self {
        let covered = self.covered_mask(input.len());
        for (pos, &is_covered) in covered.iter().enumerate() {
            if is_covered {
                continue;
            }
            let word = input[pos];
            let source_pattern = Pattern::single(word);
            let target_pattern = Pattern::single(word);
            self.fragments.push(SourceFragment {
                source_pattern,
                input_offset: pos as u32,
                options: vec![(target_pattern, vec![1.0; num_features])],
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::InMemoryAlignmentTable;

    #[test]
    fn finds_all_matching_spans() {
        let mut table = InMemoryAlignmentTable::new();
        table
            .insert(Pattern::single(7), vec![(Pattern::single(17), vec![0.5])])
            .unwrap();
        table
            .insert(
                Pattern::from_tokens(&[7, 8]),
                vec![(Pattern::from_tokens(&[17, 18]), vec![0.9])],
            )
            .unwrap();
        table
            .insert(Pattern::single(8), vec![(Pattern::single(18), vec![0.5])])
            .unwrap();

        let index = SourceFragmentIndex::build(&[7, 8], &table);
        assert_eq!(index.fragments.len(), 3);
    }

    #[test]
    fn unknown_words_fill_uncovered_positions_only() {
        let mut table = InMemoryAlignmentTable::new();
        table
            .insert(Pattern::single(7), vec![(Pattern::single(17), vec![0.5])])
            .unwrap();
        let index = SourceFragmentIndex::build(&[7, 9], &table).with_unknown_words(&[7, 9], 1);
        assert_eq!(index.fragments.len(), 2);
        let synthetic = index
            .fragments
            .iter()
            .find(|f| f.input_offset == 1)
            .unwrap();
        assert_eq!(synthetic.source_pattern.token_at(0), Some(9));
        assert_eq!(synthetic.options[0].1, vec![1.0]);
    }
}
