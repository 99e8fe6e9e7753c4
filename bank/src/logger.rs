//! Logger setup for the node binary.

use env_logger::{Builder, Env};

/// Install the global logger. `RUST_LOG` overrides `filter`.
///
/// Only the first call has an effect.
pub fn setup_with_default(filter: &str) {
    let _ = Builder::from_env(Env::new().default_filter_or(filter))
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_twice() {
        setup_with_default("debug");
        setup_with_default(crate::cli::DEFAULT_LOG_FILTER);
        log::info!("logger installed");
    }
}
