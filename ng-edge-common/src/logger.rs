use ng_edge_error::EdgeResult;
use std::sync::{Arc, Mutex};
use tracing::{subscriber::set_global_default, Level};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    filter::DynFilterFn,
    fmt,
    layer::SubscriberExt,
    Layer, Registry,
};

/// Hub logger writing to the console and a daily-rolling file.
///
/// The level is shared behind a mutex so it can be adjusted at runtime
/// without rebuilding the subscriber stack.
pub struct Logger {
    level: Arc<Mutex<Level>>,
    _file_guard: Option<WorkerGuard>,
}

impl Logger {
    pub fn new(level: Option<Level>) -> Self {
        Logger {
            level: Arc::new(Mutex::new(level.unwrap_or(Level::INFO))),
            _file_guard: None,
        }
    }

    #[inline]
    /// Sets the new logging level.
    pub fn set_level(&self, new_level: Level) {
        let mut level = self.level.lock().unwrap();
        *level = new_level;
    }

    #[inline]
    /// Retrieves the current log level.
    pub fn get_level(&self) -> Level {
        *self.level.lock().unwrap()
    }

    /// Initializes the global subscriber.
    ///
    /// Console output and the rolling file share the same dynamic level
    /// filter; the file writer is non-blocking and its guard is held for
    /// the logger's lifetime.
    pub fn initialize(&mut self) -> EdgeResult<()> {
        let file_appender = rolling::daily("logs", "edge-hub.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        self._file_guard = Some(guard);

        let console_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| metadata.level() <= &*level.lock().unwrap())
        };

        let file_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| metadata.level() <= &*level.lock().unwrap())
        };

        let console_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_filter(console_filter);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(file_filter);

        let subscriber = Registry::default().with(console_layer).with(file_layer);

        set_global_default(subscriber).map_err(|_| "Failed to set logger")?;
        Ok(())
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_is_adjustable_at_runtime() {
        let logger = Logger::default();
        assert_eq!(logger.get_level(), Level::INFO);

        logger.set_level(Level::DEBUG);
        assert_eq!(logger.get_level(), Level::DEBUG);
    }
}
