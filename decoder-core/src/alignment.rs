//! Mapping from source Pattern to a set of (target Pattern, feature-score
//! vector) options. The decoder reads this structure only; it is
//! built once, before decoding begins, by an external loader.

use ahash::AHashMap;

use crate::error::{DecoderError, Result};
use crate::pattern::Pattern;

/// One target option: the target phrase and its translation-feature score
/// vector, of length at least the number of configured feature weights.
pub type TranslationOption = (Pattern, Vec<f64>);

/// Read-only mapping from source Pattern to its translation options.
/// Invariant: every source pattern present has at least one option.
pub trait AlignmentTable: Send + Sync {
    /// All distinct source patterns in the table.
    fn source_patterns(&self) -> &[Pattern];

    /// The translation options for a known source pattern; `None` if the
    /// pattern is not in the table.
    fn options(&self, source: &Pattern) -> Option<&[TranslationOption]>;
}

/// A table built entirely in memory, keyed by source pattern.
#[derive(Debug, Default)]
pub struct InMemoryAlignmentTable {
    patterns: Vec<Pattern>,
    entries: AHashMap<Pattern, Vec<TranslationOption>>,
}

impl InMemoryAlignmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a source pattern's options, failing if it would have zero
    /// options (violates the table's basic invariant).
    pub fn insert(&mut self, source: Pattern, options: Vec<TranslationOption>) -> Result<()> {
        if options.is_empty() {
            return Err(DecoderError::Data(format!(
                "source pattern of width {} has no translation options",
                source.n()
            )));
        }
        if !self.entries.contains_key(&source) {
            self.patterns.push(source.clone());
        }
        self.entries.entry(source).or_default().extend(options);
        Ok(())
    }
}

impl AlignmentTable for InMemoryAlignmentTable {
    fn source_patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    fn options(&self, source: &Pattern) -> Option<&[TranslationOption]> {
        self.entries.get(source).map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_option_list() {
        let mut table = InMemoryAlignmentTable::new();
        let src = Pattern::single(7);
        assert!(table.insert(src, Vec::new()).is_err());
    }

    #[test]
    fn looks_up_inserted_options() {
        let mut table = InMemoryAlignmentTable::new();
        let src = Pattern::single(7);
        let tgt = Pattern::single(17);
        table.insert(src.clone(), vec![(tgt.clone(), vec![0.5])]).unwrap();
        let opts = table.options(&src).unwrap();
        assert_eq!(opts.len(), 1);
        assert_eq!(opts[0].0, tgt);
    }
}
