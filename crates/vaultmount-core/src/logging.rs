//! Process-wide logger setup.

use env_logger::{Builder, Env};

const LOG_ENV: &str = "VAULTMOUNT_LOG";

/// Initialise `env_logger` once. `VAULTMOUNT_LOG` wins over `RUST_LOG`, which wins over `default_level`.
///
/// Repeated calls are ignored.
pub fn init(default_level: &str) {
    let filter = std::env::var(LOG_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty());
    let env = Env::default().default_filter_or(default_level);
    let mut builder = Builder::from_env(env);
    if let Some(filter) = filter {
        builder.parse_filters(&filter);
    }
    builder.format_timestamp_secs();
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init("debug");
        init("info");
        log::debug!("logger initialised twice without panicking");
    }
}
