use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Immutable switches carried by a [`Logger`].
#[derive(Debug, Clone, Default)]
pub struct LoggerConfig {
    pub info: bool,
    pub tracing: bool,
    /// Subsystems whose trace events are emitted. `"all"` enables every one.
    pub subsystems: HashSet<String>,
}

impl LoggerConfig {
    /// Parses a comma separated subsystem list such as `"repository,sync"`.
    pub fn with_trace(mut self, subsystems: &str) -> Self {
        self.subsystems = subsystems
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self.tracing = !self.subsystems.is_empty();
        self
    }

    pub fn with_info(mut self, enabled: bool) -> Self {
        self.info = enabled;
        self
    }
}

/// Logger handle passed to each component at construction.
///
/// Events go through `tracing`; the handle only decides whether an
/// info or per-subsystem trace event is emitted at all.
#[derive(Debug, Clone, Default)]
pub struct Logger {
    config: Arc<LoggerConfig>,
}

impl Logger {
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    pub fn trace_enabled(&self, subsystem: &str) -> bool {
        self.config.tracing
            && (self.config.subsystems.contains("all") || self.config.subsystems.contains(subsystem))
    }

    pub fn trace(&self, subsystem: &str, args: fmt::Arguments<'_>) {
        if self.trace_enabled(subsystem) {
            tracing::trace!(subsystem = subsystem, "{}", args);
        }
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        if self.config.info {
            tracing::info!("{}", args);
        }
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!("{}", args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!("{}", args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsystem_filter() {
        let logger = Logger::new(LoggerConfig::default().with_trace("repository, sync"));
        assert!(logger.trace_enabled("repository"));
        assert!(logger.trace_enabled("sync"));
        assert!(!logger.trace_enabled("packfile"));

        let all = Logger::new(LoggerConfig::default().with_trace("all"));
        assert!(all.trace_enabled("packfile"));

        let quiet = Logger::default();
        assert!(!quiet.trace_enabled("repository"));
    }

    #[test]
    fn test_clones_share_configuration() {
        let logger = Logger::new(LoggerConfig::default().with_info(true));
        let clone = logger.clone();
        assert!(Arc::ptr_eq(&logger.config, &clone.config));
        assert!(clone.config().info);
    }
}
