use log::{LevelFilter, Log, Metadata, Record};
use std::{sync::OnceLock, time::Instant};

/// Overrides the default max level (`error`, `warn`, `info`, `debug`,
/// `trace`, or `off`).
pub const LEVEL_ENV: &str = "ENVMON_LOG";

pub fn init() -> Result<(), log::SetLoggerError> {
    static LOGGER: OnceLock<Logger> = OnceLock::new();

    let logger = LOGGER.get_or_init(|| {
        #[cfg(debug_assertions)]
        let default_level = LevelFilter::Debug;
        #[cfg(not(debug_assertions))]
        let default_level = LevelFilter::Info;

        let max_level = std::env::var(LEVEL_ENV)
            .ok()
            .and_then(|level| level.parse().ok())
            .unwrap_or(default_level);
        Logger {
            max_level,
            start: Instant::now(),
        }
    });

    log::set_logger(logger)?;
    log::set_max_level(logger.max_level);
    Ok(())
}

#[derive(Debug)]
struct Logger {
    max_level: LevelFilter,
    start: Instant,
}

impl Logger {
    fn format(&self, record: &Record<'_>) -> String {
        static LEVEL_STRS: [&str; 5] = ["[x]", "[!]", "[i]", "[?]", "[.]"];
        let level = LEVEL_STRS[record.level() as usize - 1];
        let elapsed = self.start.elapsed().as_millis();
        format!("{level} {elapsed}ms {}: {}", record.target(), record.args())
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            println!("{}", self.format(record));
        }
    }

    fn flush(&self) {}
}
