//! Scores a trained word-alignment model against a held-out corpus
//! (spec.md §6; SPEC_FULL.md §11). Loads the model's saved tables plus a
//! test corpus and prints, per sentence pair, its best alignment and
//! `getAlignmentLgProb` score; when a gold alignment file is supplied it
//! additionally reports precision/recall/F1 over alignment links, in the
//! teacher's `evaluate/src/main.rs` set-intersection style adapted from
//! token spans to alignment links.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use clap::Parser;

use swalign::corpus::SentencePairStore;
use swalign::errors::SwAlignError;
use swalign::models::{AlignmentModel, HmmModel, Ibm1Model, Ibm2Model, Ibm3Model, Ibm4Model, IncrHmmModel};
use swalign::tables::TableFormat;
use swalign::vocab::Vocabulary;
use swalign::wordclass::WordClassMap;

#[derive(Parser, Debug)]
#[clap(name = "swalign-eval", about = "Score a trained alignment model against a held-out corpus")]
struct Args {
    /// Source-language test corpus, one sentence per line.
    #[clap(short = 's', long)]
    src: PathBuf,
    /// Target-language test corpus, one sentence per line.
    #[clap(short = 't', long)]
    trg: PathBuf,
    /// Prefix the model's tables were saved under.
    #[clap(short = 'i', long = "model-prefix")]
    model_prefix: String,
    /// Vocabulary file written by `swalign-train` (`{output_prefix}.vocab`).
    /// Word indices are assignment-order-dependent, so scoring against the
    /// wrong vocabulary silently produces wrong alignments.
    #[clap(long)]
    vocab: PathBuf,
    /// Model variant to load.
    #[clap(long, value_parser = ["ibm1", "ibm2", "hmm", "ibm3", "ibm4", "incr-hmm"])]
    model: String,
    /// Fertility cap the IBM3/IBM4 tables were trained with.
    #[clap(long, default_value = "10")]
    max_fertility: u32,
    /// Word-class map the IBM4 tables were trained with, if any.
    #[clap(long)]
    classes: Option<PathBuf>,
    /// On-disk table format the model was saved in.
    #[clap(long, value_parser = ["text", "binary"], default_value = "text")]
    format: String,
    /// Optional gold alignment file (Pharaoh `i-j` link format, one line
    /// per sentence pair) to score precision/recall/F1 against.
    #[clap(short = 'g', long)]
    gold: Option<PathBuf>,
}

fn table_format(name: &str) -> TableFormat {
    match name {
        "binary" => TableFormat::Binary,
        _ => TableFormat::Text,
    }
}

enum LoadedModel {
    Ibm1(Ibm1Model),
    Ibm2(Ibm2Model),
    Hmm(HmmModel),
    Ibm3(Ibm3Model),
    Ibm4(Ibm4Model),
    IncrHmm(IncrHmmModel),
}

impl LoadedModel {
    fn best_alignment(&self, vocab_size: usize, pair: &swalign::corpus::SentencePair) -> (Vec<usize>, f32) {
        match self {
            Self::Ibm1(m) => m.best_alignment(vocab_size, pair),
            Self::Ibm2(m) => m.best_alignment(vocab_size, pair),
            Self::Hmm(m) => m.best_alignment(vocab_size, pair),
            Self::Ibm3(m) => m.best_alignment(vocab_size, pair),
            Self::Ibm4(m) => m.best_alignment(vocab_size, pair),
            Self::IncrHmm(m) => m.best_alignment(vocab_size, pair),
        }
    }

    fn score_alignment(&self, vocab_size: usize, pair: &swalign::corpus::SentencePair, alignment: &[usize]) -> f32 {
        match self {
            Self::Ibm1(m) => m.score_alignment(vocab_size, pair, alignment),
            Self::Ibm2(m) => m.score_alignment(vocab_size, pair, alignment),
            Self::Hmm(m) => m.score_alignment(vocab_size, pair, alignment),
            Self::Ibm3(m) => m.score_alignment(vocab_size, pair, alignment),
            Self::Ibm4(m) => m.score_alignment(vocab_size, pair, alignment),
            Self::IncrHmm(m) => m.hmm().score_alignment(vocab_size, pair, alignment),
        }
    }
}

fn load_model(args: &Args) -> Result<LoadedModel, SwAlignError> {
    let format = table_format(&args.format);
    match args.model.as_str() {
        "ibm1" => Ok(LoadedModel::Ibm1(Ibm1Model::load(&args.model_prefix, format)?)),
        "ibm2" => Ok(LoadedModel::Ibm2(Ibm2Model::load(&args.model_prefix, format)?)),
        "hmm" => Ok(LoadedModel::Hmm(HmmModel::load(&args.model_prefix, format)?)),
        "ibm3" => Ok(LoadedModel::Ibm3(Ibm3Model::load(&args.model_prefix, args.max_fertility, format)?)),
        "ibm4" => {
            let classes = match &args.classes {
                Some(path) => WordClassMap::load(BufReader::new(File::open(path)?))?,
                None => WordClassMap::new(),
            };
            Ok(LoadedModel::Ibm4(Ibm4Model::load(&args.model_prefix, args.max_fertility, classes, format)?))
        }
        "incr-hmm" => Ok(LoadedModel::IncrHmm(IncrHmmModel::load(&args.model_prefix, format)?)),
        other => Err(SwAlignError::from(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unknown model name `{other}`"),
        ))),
    }
}

/// Parses one Pharaoh-format gold line (`"0-0 1-2 2-1"`) into `(src, trg)`
/// index pairs.
fn parse_gold_line(line: &str) -> HashSet<(usize, usize)> {
    line.split_whitespace()
        .filter_map(|tok| {
            let (s, t) = tok.split_once('-')?;
            Some((s.parse().ok()?, t.parse().ok()?))
        })
        .collect()
}

/// Converts a `best_alignment` result (per-target-position source index,
/// `0` = null) into the same `(src, trg)` link set the gold file uses,
/// dropping null-aligned positions.
fn alignment_to_links(alignment: &[usize]) -> HashSet<(usize, usize)> {
    alignment
        .iter()
        .enumerate()
        .filter(|&(_, &src)| src != 0)
        .map(|(trg, &src)| (src - 1, trg))
        .collect()
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), SwAlignError> {
    let args = Args::parse();
    let model = load_model(&args)?;

    let mut vocab = Vocabulary::load(BufReader::new(File::open(&args.vocab)?), table_format(&args.format))?;
    let src_rdr = File::open(&args.src)?;
    let trg_rdr = File::open(&args.trg)?;
    let corpus = SentencePairStore::load(src_rdr, trg_rdr, None::<File>, &mut vocab)?;

    let mut gold_lines = match &args.gold {
        Some(path) => Some(BufReader::new(File::open(path)?).lines()),
        None => None,
    };

    let mut num_ref = 0usize;
    let mut num_sys = 0usize;
    let mut num_cor = 0usize;

    for (idx, pair) in corpus.iter() {
        let (alignment, _) = model.best_alignment(vocab.len(), pair);
        let score = model.score_alignment(vocab.len(), pair, &alignment);
        let rendered: Vec<String> = alignment
            .iter()
            .enumerate()
            .filter(|&(_, &src)| src != 0)
            .map(|(trg, &src)| format!("{}-{}", src - 1, trg))
            .collect();
        println!("{idx}\t{}\t{score:.6}", rendered.join(" "));

        if let Some(lines) = gold_lines.as_mut() {
            let gold_line = lines.next().ok_or_else(|| {
                SwAlignError::from(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "fewer gold lines than sentence pairs",
                ))
            })??;
            let gold_links = parse_gold_line(&gold_line);
            let sys_links = alignment_to_links(&alignment);
            num_ref += gold_links.len();
            num_sys += sys_links.len();
            num_cor += gold_links.intersection(&sys_links).count();
        }
    }

    if args.gold.is_some() {
        let precision = num_cor as f64 / num_sys as f64;
        let recall = num_cor as f64 / num_ref as f64;
        let f1 = 2.0 * precision * recall / (precision + recall);
        eprintln!("Precision = {precision}");
        eprintln!("Recall = {recall}");
        eprintln!("F1 = {f1}");
    }

    Ok(())
}
