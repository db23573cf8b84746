//! Change-gated classification of the active browser tab.
//!
//! Every tick the [`Orchestrator`] checks the tab's domain against an
//! allow-list, hashes a screenshot, and only when the screen has changed
//! enough runs OCR and the classifier over it. Hosts plug in screen capture,
//! tab inspection, OCR engines and the model through the traits in [`host`],
//! [`ocr`] and [`inference`].

pub mod allowlist;
pub mod capture;
pub mod db;
pub mod error;
pub mod host;
pub mod inference;
pub mod metrics;
pub mod ocr;
pub mod preprocess;
pub mod sensing;
pub mod settings;
pub mod tokenizer;
mod utils;

pub use error::{ScanError, ScanResult};
pub use sensing::{
    ClassificationResult, CycleReport, Orchestrator, ScanComponents, ScanController, ScanEvent,
    ScanState, TickOutcome,
};
pub use settings::{ScanSettings, SettingsStore};

/// Installs `env_logger` at Info unless `RUST_LOG` says otherwise. Safe to
/// call more than once.
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    if env_logger::Builder::from_env(env).try_init().is_ok() {
        log::info!("tabguard {} logging initialized", env!("CARGO_PKG_VERSION"));
    }
}
