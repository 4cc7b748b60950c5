//! Tracing setup with a hot-reloadable level, mirroring the teacher's
//! reload-layer pattern but driven by the interactive CLI loop instead of a
//! remote config push.

use std::sync::OnceLock;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{reload, EnvFilter};

type ReloadFn = Box<dyn Fn(&str) + Send + Sync>;

static LOG_RELOADER: OnceLock<ReloadFn> = OnceLock::new();

/// Initialize global tracing. `level` is an `EnvFilter` directive string
/// (e.g. `"info"`, `"cyberdriver=debug,info"`).
pub fn init(level: &str, json: bool) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, reload_handle) = reload::Layer::new(filter);

    let _ = LOG_RELOADER.set(Box::new(move |level: &str| {
        if let Ok(new_filter) = EnvFilter::try_new(level) {
            let _ = reload_handle.modify(|f| *f = new_filter);
        }
    }));

    if json {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Change the active log level at runtime. No-op if `init` was never called.
pub fn set_level(level: &str) {
    if let Some(reloader) = LOG_RELOADER.get() {
        reloader(level);
    }
}
