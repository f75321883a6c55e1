use eyre::WrapErr;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// One decimal number per line
    Text,
    /// 8 bytes per prime, little-endian u64
    Binary,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Text => "csv",
            OutputFormat::Binary => "bin",
        }
    }
}

pub fn output_path(dir: &Path, limit: u64, format: OutputFormat) -> PathBuf {
    dir.join(format!("primes_{}.{}", limit, format.extension()))
}

/// Appends the encoding of `primes` to `out`.
pub fn encode_primes(primes: &[u64], format: OutputFormat, out: &mut Vec<u8>) {
    match format {
        OutputFormat::Text => {
            let mut itoa_buf = itoa::Buffer::new();
            for &prime in primes {
                out.extend_from_slice(itoa_buf.format(prime).as_bytes());
                out.push(b'\n');
            }
        }
        OutputFormat::Binary => {
            for &prime in primes {
                out.extend_from_slice(&prime.to_le_bytes());
            }
        }
    }
}

/// Creates (or truncates) `path` for writing primes.
pub fn create_output(path: &Path) -> eyre::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .wrap_err_with(|| format!("Error creating file '{}'", path.display()))
}

/// Writes `primes` to `path` through a buffered writer.
pub fn save_primes(path: &Path, primes: &[u64], format: OutputFormat) -> eyre::Result<()> {
    let file = create_output(path)?;
    let mut writer = BufWriter::with_capacity(256 * 1024, file);

    // Encode a batch at a time, then write once
    let mut batch = Vec::with_capacity(64 * 1024);
    for chunk in primes.chunks(4096) {
        batch.clear();
        encode_primes(chunk, format, &mut batch);
        writer
            .write_all(&batch)
            .wrap_err_with(|| format!("Error writing to file '{}'", path.display()))?;
    }

    writer
        .flush()
        .wrap_err_with(|| format!("Error flushing file '{}'", path.display()))?;

    log::info!("wrote {} primes to {}", primes.len(), path.display());
    Ok(())
}
