use eyre::{WrapErr, bail, eyre};
use std::io::{BufRead, Write};

pub const PROMPT: &str = "Enter the Range(int): ";

/// Parses a range bound: a decimal integer in `0..=u64::MAX`, surrounding
/// whitespace ignored.
pub fn parse_limit(text: &str) -> eyre::Result<u64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        bail!("no range given; expected a non-negative integer");
    }
    trimmed.parse::<u64>().map_err(|e| {
        eyre!(
            "invalid range '{}': {} (expected an integer between 0 and {})",
            trimmed,
            e,
            u64::MAX
        )
    })
}

/// Prompts on `output` and reads one line from `input`.
pub fn prompt_limit<R: BufRead, W: Write>(mut input: R, mut output: W) -> eyre::Result<u64> {
    output
        .write_all(PROMPT.as_bytes())
        .and_then(|_| output.flush())
        .wrap_err("writing prompt")?;

    let mut line = String::new();
    let read = input.read_line(&mut line).wrap_err("reading range from input")?;
    if read == 0 {
        bail!("input closed before a range was entered");
    }

    parse_limit(&line)
}

/// Uses `arg` when given, otherwise prompts on the terminal.
pub fn resolve_limit(arg: Option<&str>) -> eyre::Result<u64> {
    match arg {
        Some(text) => parse_limit(text),
        None => prompt_limit(std::io::stdin().lock(), std::io::stdout()),
    }
}
