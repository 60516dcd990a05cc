// rust/pipeline-cli/src/main.rs

//! Token Pipeline operator CLI
//!
//! Builds the input pipeline from a configuration file to inspect its
//! batches, prepares prediction input for a prompt, and writes record files
//! from plain token lists.
//!
//! # Usage
//!
//! ```bash
//! # Log the shapes of the first 4 training batches
//! tpipe inspect --config pipeline.toml --batches 4
//!
//! # Same for the eval split
//! tpipe inspect --config pipeline.toml --eval
//!
//! # Build the batch fed to the model for a prompt
//! tpipe predict-input --config pipeline.toml --text "Once upon a time"
//!
//! # Write one record per line of whitespace-separated token ids
//! tpipe write-records --input tokens.txt --out train_0.tfrecords --hash
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline_core::config::{PipelineConfig, Split};
use pipeline_core::record::{encode_record, masked_crc, TfRecordWriter};
use pipeline_core::{
    open_storage, prediction_input, Batch, BpeEncoder, InputPipeline, PipelineError, RawRecord,
    Token,
};

/// Token Pipeline operator CLI
#[derive(Parser, Debug)]
#[command(name = "tpipe")]
#[command(about = "Input pipeline tools for language model training")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the training or eval pipeline and log its first batches
    Inspect {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Read the eval globs instead of the train globs
        #[arg(long)]
        eval: bool,

        /// Number of batches to pull
        #[arg(short, long, default_value = "1")]
        batches: usize,
    },

    /// Encode a prompt and print the resulting batch shape
    PredictInput {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Prompt text
        #[arg(short, long)]
        text: String,
    },

    /// Write whitespace-separated token lines as a record file
    WriteRecords {
        /// Output record file
        #[arg(short, long)]
        out: PathBuf,

        /// Input file with one record per line
        #[arg(short, long)]
        input: PathBuf,

        /// Attach a content hash to each record
        #[arg(long)]
        hash: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match args.command {
        Command::Inspect {
            config,
            eval,
            batches,
        } => inspect(&config, eval, batches)?,
        Command::PredictInput { config, text } => predict_input(&config, &text)?,
        Command::WriteRecords { out, input, hash } => write_records(&input, &out, hash)?,
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<PipelineConfig, PipelineError> {
    let config = PipelineConfig::from_file(path)?.with_env_overrides();
    config.validate()?;
    tracing::info!(path = %path.display(), "loaded configuration");
    Ok(config)
}

fn inspect(config_path: &Path, eval: bool, batches: usize) -> Result<(), PipelineError> {
    let config = load_config(config_path)?;
    let split = if eval { Split::Eval } else { Split::Train };

    tracing::info!("Starting pipeline");
    tracing::info!("  Data path: {}", config.data_path);
    tracing::info!("  Sources: {}", config.datasets.len());
    tracing::info!("  Batch size: {}", config.batch_size);
    tracing::info!("  Context length: {}", config.n_ctx);
    tracing::info!("  Split: {:?}", split);

    let storage = open_storage(&config.storage)?;
    let pipeline = InputPipeline::generic_text(storage, &config, split)?;

    for (index, batch) in pipeline.take(batches).enumerate() {
        let batch = batch?;
        let (rows, cols) = batch.shape();
        let head = match &batch {
            Batch::Pairs { inputs, .. } => preview(inputs.row(0)),
            Batch::Sequences { tokens } => preview(tokens.row(0)),
        };
        tracing::info!(batch = index, rows, cols, first_tokens = ?head, "batch");
    }

    Ok(())
}

fn preview(row: Option<&[Token]>) -> Vec<Token> {
    row.map(|r| r.iter().take(8).copied().collect())
        .unwrap_or_default()
}

fn predict_input(config_path: &Path, text: &str) -> Result<(), PipelineError> {
    let config = load_config(config_path)?;
    let encoder_path = config
        .encoder_path
        .as_deref()
        .ok_or_else(|| PipelineError::config("encoder_path is required for predict-input"))?;

    let encoder = BpeEncoder::from_path(encoder_path)?;
    let matrix = prediction_input(&encoder, text, config.batch_size)?;

    let (rows, cols) = matrix.shape();
    tracing::info!(rows, cols, "built prediction input");
    println!("shape: [{rows}, {cols}]");
    println!("tokens: {:?}", matrix.row(0).unwrap_or_default());
    Ok(())
}

fn write_records(input: &Path, out: &Path, hash: bool) -> Result<(), PipelineError> {
    let reader = File::open(input)
        .map(BufReader::new)
        .map_err(|e| PipelineError::storage_with_source(input, "failed to open input", e))?;
    let file = File::create(out)
        .map_err(|e| PipelineError::storage_with_source(out, "failed to create output", e))?;
    let mut writer = TfRecordWriter::new(BufWriter::new(file));

    let mut written = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line =
            line.map_err(|e| PipelineError::storage_with_source(input, "failed to read input", e))?;
        let tokens = parse_token_line(&line).map_err(|message| {
            PipelineError::decode(input, format!("line {}: {message}", line_no + 1))
        })?;
        if tokens.is_empty() {
            continue;
        }

        let mut record = RawRecord::new(tokens);
        if hash {
            record = record.with_hash(format!("{:08x}", masked_crc(line.trim().as_bytes())));
        }
        writer
            .write_record(&encode_record(&record))
            .map_err(|e| PipelineError::storage_with_source(out, "failed to write record", e))?;
        written += 1;
    }

    writer
        .finish()
        .map_err(|e| PipelineError::storage_with_source(out, "failed to flush output", e))?;
    tracing::info!(records = written, path = %out.display(), "wrote record file");
    Ok(())
}

/// Parses whitespace-separated token ids.
fn parse_token_line(line: &str) -> Result<Vec<Token>, String> {
    line.split_whitespace()
        .map(|word| {
            word.parse::<Token>()
                .map_err(|e| format!("invalid token '{word}': {e}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_line() {
        assert_eq!(parse_token_line("1 2  50256\t7").unwrap(), vec![1, 2, 50256, 7]);
        assert!(parse_token_line("").unwrap().is_empty());
        assert!(parse_token_line("1 -2").unwrap_err().contains("invalid token '-2'"));
    }

    #[test]
    fn test_write_records_round_trip() {
        use pipeline_core::config::Datatype;
        use pipeline_core::record::{decode_record, TfRecordReader};

        let temp_dir = tempfile::TempDir::new().unwrap();
        let input = temp_dir.path().join("tokens.txt");
        let out = temp_dir.path().join("out.tfrecords");
        std::fs::write(&input, "10 11 12\n\n20 21\n").unwrap();

        write_records(&input, &out, true).unwrap();

        let frames = TfRecordReader::new(File::open(&out).unwrap(), true);
        let records: Vec<_> = frames
            .map(|f| decode_record(&f.unwrap(), Datatype::Sample).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tokens, vec![10, 11, 12]);
        assert_eq!(records[1].tokens, vec![20, 21]);
        assert!(records.iter().all(|r| r.hash.as_ref().is_some_and(|h| h.len() == 8)));
    }

    #[test]
    fn test_write_records_rejects_bad_token() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let input = temp_dir.path().join("tokens.txt");
        std::fs::write(&input, "1 2\n3 x\n").unwrap();

        let err = write_records(&input, &temp_dir.path().join("out.tfrecords"), false).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["tpipe", "inspect", "--config", "p.toml", "--eval"]).unwrap();
        match args.command {
            Command::Inspect { eval, batches, .. } => {
                assert!(eval);
                assert_eq!(batches, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
