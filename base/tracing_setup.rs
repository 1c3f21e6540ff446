// This file is part of a random-access media source library.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Logic for setting up a `tracing` subscriber, following the teacher's
//! `base::tracing_setup`. The teacher additionally formats for systemd's
//! `<N>` log-level prefixes; this library has no daemon mode, so that part is
//! dropped in favor of `tracing_subscriber`'s default formatter plus an
//! `EnvFilter` driven by `FRAMEDEX_LOG` (falling back to `info`).

use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_DIRECTIVE: &str = "info";

/// Installs a process-wide `tracing` subscriber. Idempotent: safe to call more
/// than once (e.g. once per test), only the first call has effect.
pub fn install() {
    static INSTALLED: std::sync::Once = std::sync::Once::new();
    INSTALLED.call_once(|| {
        let filter = EnvFilter::try_from_env("FRAMEDEX_LOG")
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .finish();
        // Ignore the error: in tests, a previous call (or another crate's
        // `tracing_subscriber::fmt::init`) may have already installed one.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
