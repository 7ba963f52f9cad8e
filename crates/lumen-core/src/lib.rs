// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

/// Installs the process-wide fmt subscriber. `RUST_LOG` drives filtering;
/// without it only warnings and errors are printed.
pub fn init_tracing() {
    init_tracing_with("warn");
}

/// Same as [`init_tracing`] but with an explicit fallback directive used when
/// `RUST_LOG` is unset or invalid.
pub fn init_tracing_with(default_directive: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing_with("debug");
        init_tracing();
        tracing::info!("second init did not panic");
    }
}
