//! Global tracing setup shared by both binaries.
//!
//! Grounded on `utils::init_tracing`: an `EnvFilter` defaulting to
//! `info`, installed as the global subscriber once at process start.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub fn init() -> crate::Result<()> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_line_number(true)
            .with_file(true)
            .finish(),
    )
    .map_err(|e| crate::GovpnError::Fatal(format!("installing tracing subscriber: {e}")))?;
    Ok(())
}
