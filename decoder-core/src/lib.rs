//! colibri-decoder-core
//!
//! Stack-decoding search engine for phrase-based statistical machine
//! translation: Pattern representation, language model contract,
//! alignment-table lookup, per-decode source-fragment indexing, future-cost
//! estimation, the hypothesis arena, beam stacks, and the decoder driver.
//!
//! Public API:
//! - `Pattern` - integer-encoded source/target phrase, possibly with gaps
//! - `LanguageModel` - Katz back-off n-gram scoring contract
//! - `AlignmentTable` - source pattern -> translation option lookup
//! - `Decoder` - per-sentence stack-decoding search
//! - `Config` - search-width, pruning and feature-weight configuration

pub mod error;
pub mod pattern;
pub mod scoring;
pub mod lm;
pub mod alignment;
pub mod fragment;
pub mod futurecost;
pub mod hypothesis;
pub mod stack;
pub mod decoder;
pub mod config;

pub use alignment::{AlignmentTable, InMemoryAlignmentTable, TranslationOption};
pub use config::Config;
pub use decoder::{DecodeOutcome, DecodeStats, Decoder};
pub use error::{DecoderError, Result};
pub use fragment::{SourceFragment, SourceFragmentIndex};
pub use futurecost::FutureCostTable;
pub use hypothesis::{Coverage, HypothesisArena, HypothesisHandle};
pub use lm::{LanguageModel, NgramLanguageModel};
pub use pattern::{Class, Pattern, BEGIN_OF_SENTENCE, END_OF_SENTENCE, UNKNOWN_CLASS};
