//! Process-global logging setup.
//!
//! One `tracing-subscriber` registry is installed at startup; `SIGHUP`
//! reopens the underlying file writer without tearing down the subscriber
//! (§4.11, §9 — logger is process-global, reloadable only from the main
//! thread).

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::reload::{self, Handle};

type ReloadHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

static RELOAD_HANDLE: OnceLock<ReloadHandle> = OnceLock::new();

/// Installs the process-wide subscriber. Safe to call once; subsequent
/// calls are no-ops so tests can call it freely.
pub fn init() {
    if RELOAD_HANDLE.get().is_some() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    let _ = RELOAD_HANDLE.set(handle);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Re-reads `RUST_LOG` and swaps the active filter, mirroring the
/// `SIGHUP`-reopens-logs behaviour (§4.11). Only ever called from the main
/// thread's signal loop.
pub fn reload_from_env() {
    if let Some(handle) = RELOAD_HANDLE.get() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = handle.reload(filter);
    }
}
