mod gate;
mod input;
mod logging;
mod pool;
mod primes;
mod segmented;
mod storage;
mod storage_uring;

use clap::{ArgAction, Parser, Subcommand};
use eyre::bail;
use std::path::PathBuf;
use std::time::Instant;

use primes::{Algorithm, SieveConfig};
use storage::OutputFormat;

#[derive(Parser)]
#[command(name = "psieve")]
#[command(about = "Parallel prime sieve - finds all primes up to a bound and saves them", long_about = None)]
struct Cli {
    #[arg(short, long, action = ArgAction::Count, global = true, help = "Increase log verbosity (-v, -vv, -vvv)")]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Find all prime numbers up to a given limit and write them to primes_<limit>.csv")]
    Primes {
        #[arg(help = "The upper limit to search for primes (prompted for when omitted)")]
        limit: Option<String>,
        #[arg(short, long, value_enum, default_value = "auto", help = "Sieve to use")]
        algorithm: Algorithm,
        #[arg(
            long,
            default_value_t = primes::DEFAULT_SEGMENTED_THRESHOLD,
            help = "Largest limit handled by the flat sieve when the algorithm is auto"
        )]
        threshold: u64,
        #[arg(short, long, help = "Maximum number of concurrent worker threads (default: CPU count)")]
        workers: Option<usize>,
        #[arg(
            short,
            long,
            help = "Save primes in binary format (8 bytes per prime, little-endian)"
        )]
        binary: bool,
        #[arg(long, help = "Write the output file through io_uring")]
        uring: bool,
        #[arg(short, long, default_value = ".", help = "Directory for the output file")]
        output_dir: PathBuf,
    },
    #[command(about = "Run the flat and segmented sieves on the same limit and compare them")]
    Compare {
        #[arg(help = "The upper limit to search for primes (prompted for when omitted)")]
        limit: Option<String>,
        #[arg(short, long, help = "Maximum number of concurrent worker threads (default: CPU count)")]
        workers: Option<usize>,
    },
}

fn sieve_config(workers: Option<usize>, threshold: u64) -> SieveConfig {
    SieveConfig {
        workers: workers.unwrap_or_else(primes::default_workers).max(1),
        threshold,
    }
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Primes {
            limit,
            algorithm,
            threshold,
            workers,
            binary,
            uring,
            output_dir,
        } => {
            let limit = input::resolve_limit(limit.as_deref())?;
            let config = sieve_config(workers, threshold);
            let chosen = algorithm.resolve(limit, config.threshold);

            log::info!(
                "finding primes up to {} ({} sieve, {} workers)",
                limit,
                chosen.name(),
                config.workers
            );

            let start = Instant::now();
            let primes = primes::find_primes(limit, chosen, &config);
            let duration = start.elapsed();

            let format = if binary {
                OutputFormat::Binary
            } else {
                OutputFormat::Text
            };
            let path = storage::output_path(&output_dir, limit, format);

            if uring {
                storage_uring::save_primes_uring(&path, &primes, format)?;
            } else {
                storage::save_primes(&path, &primes, format)?;
            }

            println!("Time taken: {:?}", duration);
            println!("Total: {} primes found", primes.len());
            println!("File '{}' has been successfully created", path.display());
        }
        Commands::Compare { limit, workers } => {
            let limit = input::resolve_limit(limit.as_deref())?;
            let config = sieve_config(workers, primes::DEFAULT_SEGMENTED_THRESHOLD);

            let start = Instant::now();
            let flat = primes::find_primes(limit, Algorithm::Flat, &config);
            let flat_time = start.elapsed();

            let start = Instant::now();
            let segmented = primes::find_primes(limit, Algorithm::Segmented, &config);
            let segmented_time = start.elapsed();

            println!("Flat sieve:      {} primes in {:?}", flat.len(), flat_time);
            println!("Segmented sieve: {} primes in {:?}", segmented.len(), segmented_time);

            if flat != segmented {
                let first_diff = flat
                    .iter()
                    .zip(&segmented)
                    .position(|(a, b)| a != b)
                    .unwrap_or(flat.len().min(segmented.len()));
                bail!(
                    "sieves disagree for limit {} at position {} (flat: {:?}, segmented: {:?})",
                    limit,
                    first_diff,
                    flat.get(first_diff),
                    segmented.get(first_diff)
                );
            }
            println!("Results identical");
        }
    }

    Ok(())
}
