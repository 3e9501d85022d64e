//! EM trainer CLI for the `swalign` model family. Flags and exit-code
//! mapping per spec.md §6's CLI surface; the `Args` derive struct and
//! short-flag style are grounded on the teacher's `train/src/main.rs`.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use clap::Parser;

use swalign::corpus::SentencePairStore;
use swalign::errors::SwAlignError;
use swalign::models::{IncrHmmModel, Model};
use swalign::tables::TableFormat;
use swalign::trainer::{train_sent_pair_range, TrainingConfig};
use swalign::vocab::Vocabulary;

#[derive(Parser, Debug)]
#[clap(name = "swalign-train", about = "EM trainer for word-alignment models")]
struct Args {
    /// Source-language corpus, one sentence per line.
    #[clap(short = 's', long)]
    src: PathBuf,
    /// Target-language corpus, one sentence per line.
    #[clap(short = 't', long)]
    trg: PathBuf,
    /// Optional per-pair training weights, one float per line.
    #[clap(short = 'w', long)]
    weights: Option<PathBuf>,
    /// Number of EM iterations (for `incr-hmm`, the number of batch updates).
    #[clap(short = 'n', long, default_value = "5")]
    iterations: u64,
    /// Prefix written with `.lexnd`, `.hmm_alignd`, ... table files.
    #[clap(short = 'o', long = "output-prefix")]
    output_prefix: String,
    /// Model variant to train.
    #[clap(long, value_parser = ["ibm1", "ibm2", "hmm", "ibm3", "ibm4", "incr-hmm"])]
    model: String,
    /// Worker threads the batch trainer shards each chunk across.
    #[clap(long, default_value = "1")]
    num_threads: usize,
    /// Fertility cap for IBM3/IBM4.
    #[clap(long, default_value = "10")]
    max_fertility: u32,
    /// HMM/IBM3/IBM4 transition-table smoothing interpolation factor, used
    /// to seed hillclimbing's Viterbi alignment.
    #[clap(long)]
    alig_smooth: Option<f32>,
    /// HMM lexical-table smoothing interpolation factor.
    #[clap(long)]
    lex_smooth: Option<f32>,
    /// IBM4 distortion-table smoothing interpolation factor.
    #[clap(long)]
    distortion_smooth: Option<f32>,
    /// Emit verbosity-gated progress diagnostics on stderr.
    #[clap(long)]
    verbose: bool,
    /// On-disk table format.
    #[clap(long, value_parser = ["text", "binary"], default_value = "text")]
    format: String,
}

/// CLI-level error, carrying the spec.md §6 exit-code classification
/// (`1` argument, `2` I/O, `3` training) that `SwAlignError` itself doesn't
/// encode.
enum CliError {
    Argument(String),
    Io(String),
    Training(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Argument(_) => 1,
            Self::Io(_) => 2,
            Self::Training(_) => 3,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::Argument(m) | Self::Io(m) | Self::Training(m) => m,
        }
    }
}

impl From<SwAlignError> for CliError {
    fn from(e: SwAlignError) -> Self {
        match &e {
            SwAlignError::InvalidArgument(_) => Self::Argument(e.to_string()),
            SwAlignError::InvalidFormat(_)
            | SwAlignError::StdIo(_)
            | SwAlignError::ParseInt(_)
            | SwAlignError::ParseFloat(_)
            | SwAlignError::TryFromInt(_)
            | SwAlignError::BincodeDecode(_)
            | SwAlignError::BincodeEncode(_) => Self::Io(e.to_string()),
            SwAlignError::Numeric(_) | SwAlignError::Resource(_) | SwAlignError::Cancelled => {
                Self::Training(e.to_string())
            }
        }
    }
}

fn table_format(name: &str) -> TableFormat {
    match name {
        "binary" => TableFormat::Binary,
        _ => TableFormat::Text,
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let format = table_format(&args.format);
    let mut cfg = TrainingConfig::new()
        .num_threads(args.num_threads)
        .max_iter(args.iterations)
        .max_fertility(args.max_fertility)
        .verbose(args.verbose);
    if let Some(f) = args.alig_smooth {
        cfg = cfg.alig_smooth_interp_factor(f);
    }
    if let Some(f) = args.lex_smooth {
        cfg = cfg.lex_smooth_interp_factor(f);
    }
    if let Some(f) = args.distortion_smooth {
        cfg = cfg.distortion_smooth_factor(f);
    }

    let mut vocab = Vocabulary::new();
    let src_rdr = File::open(&args.src).map_err(SwAlignError::from)?;
    let trg_rdr = File::open(&args.trg).map_err(SwAlignError::from)?;
    let weights_rdr = args
        .weights
        .as_ref()
        .map(File::open)
        .transpose()
        .map_err(SwAlignError::from)?;
    let corpus = SentencePairStore::load(src_rdr, trg_rdr, weights_rdr, &mut vocab)?;

    if cfg.is_verbose() {
        eprintln!(
            "Loaded {} sentence pairs ({} skipped)",
            corpus.len(),
            corpus.skipped_count()
        );
    }

    let vocab_path = format!("{}.vocab", args.output_prefix);
    let vocab_wtr = File::create(&vocab_path).map_err(SwAlignError::from)?;
    vocab.print(vocab_wtr, format).map_err(CliError::from)?;

    if args.model == "incr-hmm" {
        run_incremental(&corpus, vocab.len(), &args, &cfg, format)
    } else {
        run_batch(&corpus, vocab.len(), &args, &cfg, format)
    }
}

fn run_batch(
    corpus: &SentencePairStore,
    vocab_size: usize,
    args: &Args,
    cfg: &TrainingConfig,
    format: TableFormat,
) -> Result<(), CliError> {
    let mut model = Model::new(&args.model, args.max_fertility)?;
    match &mut model {
        Model::Hmm(m) => {
            m.alig_smooth_interp_factor = cfg.get_alig_smooth_interp_factor();
            m.lex_smooth_interp_factor = cfg.get_lex_smooth_interp_factor();
        }
        Model::Ibm3(m) => m.set_alig_smooth_interp_factor(cfg.get_alig_smooth_interp_factor()),
        Model::Ibm4(m) => {
            m.set_alig_smooth_interp_factor(cfg.get_alig_smooth_interp_factor());
            m.set_distortion_smooth_factor(cfg.get_distortion_smooth_factor());
        }
        Model::Ibm1(_) | Model::Ibm2(_) => {}
    }
    let cancel = AtomicBool::new(false);

    for it in 0..cfg.get_max_iter() {
        if cfg.is_verbose() {
            eprintln!("- Starting iteration {it} ({})", model.name());
        }
        let ll = match &mut model {
            Model::Ibm1(m) => train_sent_pair_range(m, corpus, vocab_size, 0, corpus.len(), cfg, &cancel)?,
            Model::Ibm2(m) => train_sent_pair_range(m, corpus, vocab_size, 0, corpus.len(), cfg, &cancel)?,
            Model::Hmm(m) => train_sent_pair_range(m, corpus, vocab_size, 0, corpus.len(), cfg, &cancel)?,
            Model::Ibm3(m) => train_sent_pair_range(m, corpus, vocab_size, 0, corpus.len(), cfg, &cancel)?,
            Model::Ibm4(m) => train_sent_pair_range(m, corpus, vocab_size, 0, corpus.len(), cfg, &cancel)?,
        };
        if cfg.is_verbose() {
            eprintln!("- Iteration {it} log-likelihood: {ll}");
        }
    }

    model.save(&args.output_prefix, format)?;
    Ok(())
}

fn run_incremental(
    corpus: &SentencePairStore,
    vocab_size: usize,
    args: &Args,
    cfg: &TrainingConfig,
    format: TableFormat,
) -> Result<(), CliError> {
    let seed = Model::new("hmm", args.max_fertility)?;
    let Model::Hmm(mut hmm) = seed else {
        unreachable!("Model::new(\"hmm\", ..) always returns Model::Hmm");
    };
    hmm.alig_smooth_interp_factor = cfg.get_alig_smooth_interp_factor();
    hmm.lex_smooth_interp_factor = cfg.get_lex_smooth_interp_factor();
    let mut model = IncrHmmModel::new(hmm);

    let pairs: Vec<_> = corpus.iter().map(|(_, pair)| pair).collect();
    for it in 0..cfg.get_max_iter() {
        let ll = model.update_batch(vocab_size, &pairs)?;
        if cfg.is_verbose() {
            eprintln!("- Incremental batch {it} log-likelihood: {ll}");
        }
    }

    model.save(&args.output_prefix, format)?;
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("{}", e.message());
        std::process::exit(e.exit_code());
    }
}
