use std::sync::Once;

/// Used when neither the config nor `RUST_LOG` sets a filter. The GPU stack
/// is chatty at `info`.
pub const DEFAULT_FILTER: &str = "info,wgpu_core=warn,wgpu_hal=warn,naga=warn";

/// `env_filter` uses the `env_logger` syntax, e.g. `"jetrenderer=debug"`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
        }
    }
}

static INIT: Once = Once::new();

/// Installs the global logger. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = resolve_filter(config.env_filter, std::env::var("RUST_LOG").ok());

        env_logger::Builder::new()
            .parse_filters(&filter)
            .write_style(config.write_style)
            .init();

        log::debug!("logging initialized with `{filter}`");
    });
}

/// Explicit config wins over `RUST_LOG`, which wins over [`DEFAULT_FILTER`].
pub fn resolve_filter(configured: Option<String>, env: Option<String>) -> String {
    configured
        .or(env)
        .filter(|filter| !filter.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_precedence() {
        let from = |configured: Option<&str>, env: Option<&str>| {
            resolve_filter(configured.map(String::from), env.map(String::from))
        };

        assert_eq!(from(Some("debug"), Some("warn")), "debug");
        assert_eq!(from(None, Some("warn")), "warn");
        assert_eq!(from(None, None), DEFAULT_FILTER);
        assert_eq!(from(None, Some("  ")), DEFAULT_FILTER);
    }
}
