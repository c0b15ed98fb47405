//! Logging setup shared by the worker binary and embedding applications

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, with this crate at
/// `info` unless overridden. A second call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(
        "judge_engine=info"
            .parse()
            .unwrap_or_else(|_| LevelFilter::INFO.into()),
    );

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
