//! Command-line driver for the stack-decoding phrase-based SMT engine.
//!
//! Reads one source sentence (whitespace-separated integer word classes) per
//! line on stdin, decodes it against an alignment table and language model
//! loaded from disk, and writes one translated sentence per line to stdout.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};

use colibri_decoder_core::{
    Class, Config, DecodeOutcome, Decoder, DecoderError, InMemoryAlignmentTable, LanguageModel,
    NgramLanguageModel, Pattern, UNKNOWN_CLASS,
};

#[derive(Parser, Debug)]
#[command(name = "colibri-decoder", about = "Stack-decoding phrase-based SMT engine")]
struct Args {
    /// Alignment-table file (whitespace/`|||`-delimited text).
    #[arg(short = 't', long = "table")]
    table: PathBuf,

    /// Language-model file (ARPA text).
    #[arg(short = 'l', long = "lm")]
    lm: PathBuf,

    /// Source class file. Only checked for existence, since mapping surface
    /// words to classes is the out-of-scope class encoder's job.
    #[arg(short = 'S', long = "source")]
    source: PathBuf,

    /// Target class file, same treatment as `--source`.
    #[arg(short = 'T', long = "target")]
    target: PathBuf,

    /// Stack size (histogram pruning width).
    #[arg(short = 's', long = "stack-size", default_value_t = 100)]
    stack_size: usize,

    /// Threshold-pruning factor; `1.0` disables threshold pruning.
    #[arg(short = 'p', long = "prune", default_value_t = 1.0)]
    prune: f64,

    /// Per-feature translation-score weight, repeatable (one per feature).
    #[arg(short = 'W', long = "tweight")]
    tweight: Vec<f64>,

    /// Language-model weight.
    #[arg(short = 'L', long = "lm-weight", default_value_t = 1.0)]
    lm_weight: f64,

    /// Distortion weight.
    #[arg(short = 'D', long = "distortion-weight", default_value_t = 1.0)]
    distortion_weight: f64,

    /// Distortion limit; unset means unconstrained reordering.
    #[arg(short = 'M', long = "distortion-limit")]
    distortion_limit: Option<u32>,

    /// Disable skip-gram (discontiguous) source patterns.
    #[arg(short = 'N', long = "no-skipgrams")]
    no_skipgrams: bool,

    /// Verbosity level.
    #[arg(short = 'v', long = "verbose", default_value_t = 0)]
    verbose: u8,

    /// Print per-sentence search diagnostics to stderr.
    #[arg(long)]
    stats: bool,

    /// Print aggregate search diagnostics across the whole run on exit.
    #[arg(long)]
    globalstats: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Decoder(e) => e.exit_code(),
            CliError::Io(_) => 2,
        }
    }
}

/// Parses an ARPA-text language model file: a `\data\` header, `ngram N=V`
/// count lines, then one `\N-grams:` section per order with `log10-prob
/// tokens [log10-backoff]` rows. Values are converted to natural log at
/// load time. Fails with `DataError` (exit 3) if no `<unk>` unigram is
/// present.
fn load_arpa_lm(path: &PathBuf) -> Result<NgramLanguageModel, DecoderError> {
    let file = File::open(path)
        .map_err(|e| DecoderError::Input(format!("cannot open LM file {}: {e}", path.display())))?;
    let reader = BufReader::new(file);

    let mut order = 0usize;
    let mut ngrams: HashMap<Vec<Class>, f64> = HashMap::new();
    let mut backoff: HashMap<Vec<Class>, f64> = HashMap::new();
    let mut in_data = false;
    let mut in_ngrams = false;

    for line in reader.lines() {
        let line = line.map_err(|e| DecoderError::Input(e.to_string()))?;
        let trimmed = line.trim();
        if trimmed == "\\data\\" {
            in_data = true;
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("\\") {
            if let Some(n_str) = rest.strip_suffix("-grams:") {
                order = order.max(n_str.parse().unwrap_or(order));
                in_data = false;
                in_ngrams = true;
                continue;
            }
        }
        if in_data {
            if let Some(rest) = trimmed.strip_prefix("ngram ") {
                if let Some((n_str, _)) = rest.split_once('=') {
                    order = order.max(n_str.trim().parse().unwrap_or(0));
                }
            }
            continue;
        }
        if in_ngrams && !trimmed.is_empty() {
            let fields: Vec<&str> = trimmed.split('\t').collect();
            if fields.len() < 2 {
                continue;
            }
            let log10_prob: f64 = fields[0]
                .parse()
                .map_err(|_| DecoderError::Data(format!("malformed probability in LM line: {trimmed}")))?;
            let tokens: Vec<Class> = fields[1]
                .split_whitespace()
                .map(parse_class_token)
                .collect();
            let logprob = log10_prob * std::f64::consts::LN_10;
            ngrams.insert(tokens.clone(), logprob);
            if fields.len() >= 3 {
                if let Ok(log10_backoff) = fields[2].parse::<f64>() {
                    backoff.insert(tokens, log10_backoff * std::f64::consts::LN_10);
                }
            }
        }
    }

    let unk_logprob = *ngrams
        .get(&vec![UNKNOWN_CLASS])
        .ok_or_else(|| DecoderError::Data("language model has no <unk> unigram entry".to_string()))?;

    if order == 0 {
        return Err(DecoderError::Data("language model declares no n-gram order".to_string()));
    }

    Ok(NgramLanguageModel::new(order, ngrams, backoff, unk_logprob))
}

fn parse_class_token(tok: &str) -> Class {
    if tok == "<unk>" {
        UNKNOWN_CLASS
    } else {
        tok.parse().unwrap_or(UNKNOWN_CLASS)
    }
}

/// Minimal whitespace/`|||`-delimited alignment-table text loader: each
/// non-empty line is `source tokens ||| target tokens ||| score0 score1 ...`.
/// This stands in for the out-of-scope Moses-format phrase-table converter,
/// sufficient to exercise the decoder end-to-end.
fn load_alignment_table(path: &PathBuf) -> Result<InMemoryAlignmentTable, DecoderError> {
    let file = File::open(path)
        .map_err(|e| DecoderError::Input(format!("cannot open table file {}: {e}", path.display())))?;
    let reader = BufReader::new(file);
    let mut table = InMemoryAlignmentTable::new();

    for line in reader.lines() {
        let line = line.map_err(|e| DecoderError::Input(e.to_string()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split("|||").map(str::trim).collect();
        if fields.len() < 3 {
            return Err(DecoderError::Input(format!(
                "malformed alignment-table line (expected 3 '|||'-separated fields): {line}"
            )));
        }
        let source = Pattern::from_tokens(
            &fields[0]
                .split_whitespace()
                .map(parse_class_token)
                .collect::<Vec<_>>(),
        );
        let target = Pattern::from_tokens(
            &fields[1]
                .split_whitespace()
                .map(parse_class_token)
                .collect::<Vec<_>>(),
        );
        let scores: Vec<f64> = fields[2]
            .split_whitespace()
            .map(|s| s.parse().unwrap_or(0.0))
            .collect();
        table.insert(source, vec![(target, scores)])?;
    }
    Ok(table)
}

fn run() -> Result<(), CliError> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if args.verbose > 0 { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();

    if !args.source.exists() {
        return Err(DecoderError::Input(format!("source class file not found: {}", args.source.display())).into());
    }
    if !args.target.exists() {
        return Err(DecoderError::Input(format!("target class file not found: {}", args.target.display())).into());
    }

    let table = load_alignment_table(&args.table)?;
    let lm: Arc<dyn LanguageModel> = Arc::new(load_arpa_lm(&args.lm)?);

    let t_weights = if args.tweight.is_empty() { vec![1.0] } else { args.tweight.clone() };
    let config = Config {
        stack_size: args.stack_size,
        prune_threshold: args.prune,
        t_weights,
        lm_weight: args.lm_weight,
        d_weight: args.distortion_weight,
        distortion_limit: args.distortion_limit,
        allow_skipgrams: !args.no_skipgrams,
        gappy_stack_penalty: 0.0,
        verbosity: args.verbose,
    };

    info!(stack_size = config.stack_size, "decoder configured");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut no_solution = false;
    let mut total_expansions = 0u64;
    let mut global_ngram_usage: HashMap<u32, (u64, u64)> = HashMap::new();

    for line in stdin.lock().lines() {
        let line = line?;
        let input: Vec<Class> = line.split_whitespace().map(parse_class_token).collect();
        let mut decoder = Decoder::new(input, &table, Arc::clone(&lm), config.clone())?;
        match decoder.decode()? {
            DecodeOutcome::Success(tokens) => {
                writeln!(out, "{}", render(&tokens))?;
            }
            DecodeOutcome::Fallback(tokens) => {
                warn!("sentence decoded via fallback, best partial derivation emitted");
                writeln!(out, "{}", render(&tokens))?;
            }
            DecodeOutcome::NoSolution => {
                warn!("sentence has no solution");
                no_solution = true;
            }
        }
        if args.stats {
            let stats = decoder.stats();
            eprintln!(
                "stats: expansions={} rejected(conflict={} distortion={} infertile={}) gaps={}",
                stats.expansions,
                stats.rejections_conflict,
                stats.rejections_distortion,
                stats.rejections_infertile,
                stats.gap_resolutions
            );
            eprintln!("stats: ngram usage by width (contiguous, skip-gram)");
            let mut widths: Vec<&u32> = stats.ngram_usage.keys().collect();
            widths.sort();
            for width in widths {
                let (contiguous, skipgram) = stats.ngram_usage[width];
                eprintln!("  width={width}: contiguous={contiguous} skip-gram={skipgram}");
            }
        }
        if args.globalstats {
            total_expansions += decoder.stats().expansions;
            for (&width, &(contiguous, skipgram)) in &decoder.stats().ngram_usage {
                let entry = global_ngram_usage.entry(width).or_insert((0, 0));
                entry.0 += contiguous;
                entry.1 += skipgram;
            }
        }
    }

    if args.globalstats {
        eprintln!("globalstats: total_expansions={total_expansions}");
        eprintln!("globalstats: ngram usage by width (contiguous, skip-gram)");
        let mut widths: Vec<&u32> = global_ngram_usage.keys().collect();
        widths.sort();
        for width in widths {
            let (contiguous, skipgram) = global_ngram_usage[width];
            eprintln!("  width={width}: contiguous={contiguous} skip-gram={skipgram}");
        }
    }

    if no_solution {
        std::process::exit(12);
    }
    Ok(())
}

fn render(tokens: &[Class]) -> String {
    tokens
        .iter()
        .map(|&c| if c == UNKNOWN_CLASS { "<unk>".to_string() } else { c.to_string() })
        .collect::<Vec<_>>()
        .join(" ")
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
