use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chunk_cache::dataloader::info::print_dataset_info;
use chunk_cache::{
    ChunkCodec, DatasetWriter, ImageTransform, PrefetchingReader, Result, WriterConfig,
};

#[derive(Parser)]
#[command(name = "chunk_cache", about = "Chunked image datasets with prefetching reads")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a class-per-subdirectory image tree into chunks
    Build {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 1024)]
        chunk_size: usize,
        #[arg(long, default_value_t = 32)]
        width: u32,
        #[arg(long, default_value_t = 32)]
        height: u32,
        #[arg(long)]
        grayscale: bool,
        /// Expected number of images; the build fails if the tree disagrees
        #[arg(long)]
        count: Option<usize>,
        /// Sort class and file names for a reproducible label assignment
        #[arg(long)]
        sort: bool,
        /// Only pick up files with a known image extension instead of failing on them
        #[arg(long)]
        image_extensions_only: bool,
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Print the metadata of a chunked dataset
    Info {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        name: String,
    },
    /// Pull samples through the prefetching reader and report throughput
    Stream {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 10_000)]
        steps: usize,
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse().command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Build {
            source,
            out,
            name,
            chunk_size,
            width,
            height,
            grayscale,
            count,
            sort,
            image_extensions_only,
            threads,
        } => {
            let transform = ImageTransform::new(width, height).grayscale(grayscale);
            let defaults = WriterConfig::default();
            let config = WriterConfig {
                chunk_capacity: chunk_size,
                sample_shape: transform.sample_shape(),
                expected_count: count,
                sort_classes: sort,
                image_extensions_only,
                threads: threads.unwrap_or(defaults.threads),
            };

            let metadata = DatasetWriter::new(&source, transform, config)?.save(&out, &name)?;
            println!(
                "Wrote {} samples in {} chunks to {}",
                metadata.total_count,
                metadata.num_chunks(),
                out.display()
            );
        }
        Command::Info { dir, name } => {
            let (metadata, lookup) = ChunkCodec::new(&dir, &name).decode_metadata()?;
            print_dataset_info(&name, &metadata, &lookup);
        }
        Command::Stream {
            dir,
            name,
            steps,
            batch_size,
        } => stream(dir, &name, steps, batch_size)?,
    }
    Ok(())
}

fn stream(dir: PathBuf, name: &str, steps: usize, batch_size: Option<usize>) -> Result<()> {
    let mut reader = PrefetchingReader::open(&dir, name)?;
    let mut histogram: BTreeMap<i64, usize> = BTreeMap::new();
    let start = Instant::now();
    let mut pulled = 0usize;

    match batch_size {
        Some(batch_size) => {
            for batch in reader.iter()?.batches(batch_size)?.take(steps) {
                let batch = batch?;
                for &label in &batch.labels {
                    *histogram.entry(label).or_default() += 1;
                }
                pulled += batch.samples_in_batch();
            }
        }
        None => {
            for sample in reader.iter()?.take(steps) {
                *histogram.entry(sample?.label).or_default() += 1;
                pulled += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    println!("Streamed {} samples in {:?}", pulled, elapsed);
    println!(
        "  Throughput: {:.1} samples/s",
        pulled as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("  Passes over the dataset: {:.2}", pulled as f64 / reader.len() as f64);
    for (label, count) in histogram {
        let class = reader.labels().name(label).unwrap_or("?");
        println!("  {:>4} {:<24} {}", label, class, count);
    }
    Ok(())
}
