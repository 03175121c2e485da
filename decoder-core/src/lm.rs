//! Back-off n-gram language model contract.

use std::collections::HashMap;

use crate::pattern::{Class, Pattern};

/// Answers `score(pattern, history)` in natural-log space with Katz
/// back-off. Implementations are shared, read-only state across an entire
/// run of decodes.
pub trait LanguageModel: Send + Sync {
    /// Maximum n-gram order the model was trained at.
    fn order(&self) -> usize;

    /// Natural-log probability of a single word given a preceding context
    /// (oldest-first, at most `order()-1` tokens). Falls back through
    /// shorter contexts via Katz back-off; a context-less (unigram) lookup
    /// that still fails to find the word returns the model's `<unk>`
    /// log-probability.
    fn score_word(&self, word: Class, context: &[Class]) -> f64;

    /// Natural-log probability of `pattern` (assumed gap-free — skip-gram
    /// targets are scored one contiguous part at a time by the caller)
    /// given `history`. For each token position `i`, the
    /// context is built from up to `order()-1` tokens immediately preceding
    /// it, drawn first from `pattern[..i]` and, if that is not enough, from
    /// the tail of `history`.
    fn score(&self, pattern: &Pattern, history: Option<&Pattern>) -> f64 {
        let n = pattern.n();
        let needed = self.order().saturating_sub(1) as u32;
        let mut total = 0.0;
        for i in 0..n {
            let word = pattern
                .token_at(i)
                .expect("score() requires a gap-free pattern");
            let from_pattern = needed.min(i);
            let mut context = Vec::with_capacity(needed as usize);
            let still_needed = needed - from_pattern;
            if still_needed > 0 {
                if let Some(h) = history {
                    let hn = h.n();
                    let take = still_needed.min(hn);
                    for k in (hn - take)..hn {
                        context.push(h.token_at(k).expect("history must be gap-free"));
                    }
                }
            }
            for k in (i - from_pattern)..i {
                context.push(pattern.token_at(k).expect("score() requires a gap-free pattern"));
            }
            total += self.score_word(word, &context);
        }
        total
    }
}

/// Concrete, in-memory Katz back-off model: the classic "stupid-backoff
/// minus the stupid" representation used by ARPA-format models, stored as
/// natural logs at load time.
#[derive(Debug, Clone)]
pub struct NgramLanguageModel {
    order: usize,
    ngrams: HashMap<Vec<Class>, f64>,
    backoff: HashMap<Vec<Class>, f64>,
    unk_logprob: f64,
}

impl NgramLanguageModel {
    pub fn new(
        order: usize,
        ngrams: HashMap<Vec<Class>, f64>,
        backoff: HashMap<Vec<Class>, f64>,
        unk_logprob: f64,
    ) -> Self {
        NgramLanguageModel {
            order,
            ngrams,
            backoff,
            unk_logprob,
        }
    }

    pub fn unk_logprob(&self) -> f64 {
        self.unk_logprob
    }
}

impl LanguageModel for NgramLanguageModel {
    fn order(&self) -> usize {
        self.order
    }

    fn score_word(&self, word: Class, context: &[Class]) -> f64 {
        let mut key = context.to_vec();
        key.push(word);
        if let Some(&logprob) = self.ngrams.get(&key) {
            return logprob;
        }
        if context.is_empty() {
            return self.unk_logprob;
        }
        let backoff_weight = self.backoff.get(context).copied().unwrap_or(0.0);
        backoff_weight + self.score_word(word, &context[1..])
    }
}
