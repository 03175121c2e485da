//! Immutable, integer-encoded phrases ("patterns"), optionally containing
//! fixed-width gap positions for discontiguous (skip-gram) phrases.

use serde::{Deserialize, Serialize};

/// A source or target word class. Classes are assigned externally by the
/// (out-of-scope) class encoder/decoder; the decoder only ever compares and
/// hashes them.
pub type Class = u32;

/// Reserved class standing in for out-of-vocabulary surface words.
pub const UNKNOWN_CLASS: Class = u32::MAX;
/// Reserved class used only to pad language-model history near the start
/// of a sentence.
pub const BEGIN_OF_SENTENCE: Class = u32::MAX - 1;
/// Reserved class used only when scoring the sentence-end contribution of
/// a final hypothesis.
pub const END_OF_SENTENCE: Class = u32::MAX - 2;

/// An ordered sequence of token classes of total width `n`, where some
/// positions may be designated gaps of a fixed width standing for an
/// unspecified run of tokens. Equality and hashing are over the full
/// structural description (width, concrete tokens, gap positions).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pattern {
    width: u32,
    tokens: Vec<(u32, Class)>,
    gaps: Vec<(u32, u32)>,
}

impl Pattern {
    /// A contiguous pattern built from a plain sequence of classes.
    pub fn from_tokens(tokens: &[Class]) -> Self {
        let tokens: Vec<(u32, Class)> = tokens
            .iter()
            .enumerate()
            .map(|(i, &c)| (i as u32, c))
            .collect();
        let width = tokens.len() as u32;
        Pattern {
            width,
            tokens,
            gaps: Vec::new(),
        }
    }

    /// A single-token pattern.
    pub fn single(token: Class) -> Self {
        Pattern::from_tokens(&[token])
    }

    /// Construct a pattern from explicit (offset, class) token positions and
    /// (offset, width) gap positions. Positions must be disjoint and within
    /// `[0, width)`; this is a debug-only sanity check, not a runtime cost.
    pub fn with_gaps(width: u32, tokens: Vec<(u32, Class)>, gaps: Vec<(u32, u32)>) -> Self {
        debug_assert!(tokens.iter().all(|&(o, _)| o < width));
        debug_assert!(gaps.iter().all(|&(o, w)| o + w <= width && w > 0));
        Pattern {
            width,
            tokens,
            gaps,
        }
    }

    /// Total width in token positions, gaps counted at their span width.
    pub fn n(&self) -> u32 {
        self.width
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0
    }

    /// True if this pattern contains at least one gap position.
    pub fn is_skipgram(&self) -> bool {
        !self.gaps.is_empty()
    }

    /// Concrete (offset, class) pairs, ascending by offset.
    pub fn tokens(&self) -> &[(u32, Class)] {
        &self.tokens
    }

    /// (offset, width) gap spans, ascending by offset.
    pub fn gaps(&self) -> &[(u32, u32)] {
        &self.gaps
    }

    /// The class at a concrete (non-gap) position, if any.
    pub fn token_at(&self, offset: u32) -> Option<Class> {
        self.tokens
            .iter()
            .find(|&&(o, _)| o == offset)
            .map(|&(_, c)| c)
    }

    /// Extract the sub-pattern covering `[offset, offset+length)`. Any gap
    /// that straddles the boundary is truncated to the covered portion;
    /// tokens outside the range are dropped.
    pub fn slice(&self, offset: u32, length: u32) -> Pattern {
        let end = offset + length;
        let tokens = self
            .tokens
            .iter()
            .filter(|&&(o, _)| o >= offset && o < end)
            .map(|&(o, c)| (o - offset, c))
            .collect();
        let gaps = self
            .gaps
            .iter()
            .filter_map(|&(o, w)| {
                let g_end = o + w;
                let lo = o.max(offset);
                let hi = g_end.min(end);
                if lo < hi {
                    Some((lo - offset, hi - lo))
                } else {
                    None
                }
            })
            .collect();
        Pattern::with_gaps(length, tokens, gaps)
    }

    /// Concatenate two patterns; `other`'s positions are shifted by `self`'s
    /// width.
    pub fn concat(&self, other: &Pattern) -> Pattern {
        let shift = self.width;
        let mut tokens = self.tokens.clone();
        tokens.extend(other.tokens.iter().map(|&(o, c)| (o + shift, c)));
        let mut gaps = self.gaps.clone();
        gaps.extend(other.gaps.iter().map(|&(o, w)| (o + shift, w)));
        Pattern::with_gaps(self.width + other.width, tokens, gaps)
    }

    /// The maximal contiguous runs of concrete tokens, in ascending order,
    /// each as `(offset, classes)`. A skip-gram pattern splits into one part
    /// per run between gaps; a gap-free pattern yields exactly one part.
    pub fn contiguous_parts(&self) -> Vec<(u32, Vec<Class>)> {
        if self.gaps.is_empty() {
            let classes = self.tokens.iter().map(|&(_, c)| c).collect();
            return vec![(0, classes)];
        }
        let mut parts = Vec::new();
        let mut cursor = 0u32;
        let mut current_offset = 0u32;
        let mut current: Vec<Class> = Vec::new();
        let mut gap_iter = self.gaps.iter().peekable();
        for &(offset, class) in &self.tokens {
            while let Some(&&(g_off, g_w)) = gap_iter.peek() {
                if g_off <= offset {
                    if !current.is_empty() {
                        parts.push((current_offset, std::mem::take(&mut current)));
                    }
                    gap_iter.next();
                    cursor = g_off + g_w;
                    current_offset = cursor;
                } else {
                    break;
                }
            }
            if current.is_empty() {
                current_offset = offset;
            }
            debug_assert!(offset >= cursor);
            current.push(class);
            cursor = offset + 1;
        }
        if !current.is_empty() {
            parts.push((current_offset, current));
        }
        parts
    }
}

impl std::ops::Add for &Pattern {
    type Output = Pattern;
    fn add(self, rhs: &Pattern) -> Pattern {
        self.concat(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_pattern_has_no_gaps() {
        let p = Pattern::from_tokens(&[1, 2, 3]);
        assert_eq!(p.n(), 3);
        assert!(!p.is_skipgram());
        assert_eq!(p.token_at(1), Some(2));
    }

    #[test]
    fn skipgram_slicing_truncates_gaps() {
        // [7] GAP(1) [9], width 3
        let p = Pattern::with_gaps(3, vec![(0, 7), (2, 9)], vec![(1, 1)]);
        assert!(p.is_skipgram());
        let left = p.slice(0, 2);
        assert_eq!(left.n(), 2);
        assert_eq!(left.gaps(), &[(1, 1)]);
        let right = p.slice(2, 1);
        assert_eq!(right.token_at(0), Some(9));
        assert!(right.gaps().is_empty());
    }

    #[test]
    fn concat_shifts_offsets() {
        let a = Pattern::from_tokens(&[17]);
        let b = Pattern::from_tokens(&[18]);
        let c = a.concat(&b);
        assert_eq!(c.n(), 2);
        assert_eq!(c.token_at(0), Some(17));
        assert_eq!(c.token_at(1), Some(18));
    }

    #[test]
    fn contiguous_parts_split_on_gaps() {
        let p = Pattern::with_gaps(3, vec![(0, 17), (2, 19)], vec![(1, 1)]);
        let parts = p.contiguous_parts();
        assert_eq!(parts, vec![(0, vec![17]), (2, vec![19])]);
    }

    #[test]
    fn contiguous_parts_of_plain_pattern_is_one_run() {
        let p = Pattern::from_tokens(&[1, 2, 3]);
        assert_eq!(p.contiguous_parts(), vec![(0, vec![1, 2, 3])]);
    }

    #[test]
    fn hash_and_eq_are_structural() {
        let a = Pattern::from_tokens(&[1, 2]);
        let b = Pattern::from_tokens(&[1, 2]);
        assert_eq!(a, b);
        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }
}
