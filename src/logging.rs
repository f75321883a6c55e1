use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};
use std::io::Write;

pub const LOG_ENV: &str = "PSIEVE_LOG";

struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = writeln!(
            std::io::stderr().lock(),
            "{} {:<5} {}: {}",
            Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

pub fn level_for(verbosity: u8, env: Option<&str>) -> LevelFilter {
    if let Some(level) = env.and_then(|value| value.trim().parse::<LevelFilter>().ok()) {
        return level;
    }
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Installs the stderr logger. A second call keeps the first logger.
pub fn init(verbosity: u8) {
    let env = std::env::var(LOG_ENV).ok();
    let level = level_for(verbosity, env.as_deref());
    if log::set_boxed_logger(Box::new(StderrLogger { level })).is_ok() {
        log::set_max_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for(0, None), LevelFilter::Warn);
        assert_eq!(level_for(1, None), LevelFilter::Info);
        assert_eq!(level_for(2, None), LevelFilter::Debug);
        assert_eq!(level_for(9, None), LevelFilter::Trace);
    }

    #[test]
    fn environment_overrides_flags() {
        assert_eq!(level_for(0, Some("debug")), LevelFilter::Debug);
        assert_eq!(level_for(3, Some("off")), LevelFilter::Off);
        assert_eq!(level_for(1, Some("nonsense")), LevelFilter::Info);
    }
}
