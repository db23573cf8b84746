//! Interfaces the hosting environment (browser shell, extension runtime, test
//! harness) provides to the scanner.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::capture::Capture;
use crate::error::ScanResult;
use crate::sensing::{ClassificationResult, CycleReport, MaliciousDetails};

/// Grabs the visible content of the active tab.
#[async_trait]
pub trait ScreenSource: Send + Sync {
    /// Fails with `ScanError::CaptureUnavailable` when nothing can be captured
    /// (permission revoked, tab hidden, devtools focused).
    async fn capture_screen(&self) -> ScanResult<Capture>;
}

/// Resolves where the active tab currently points.
#[async_trait]
pub trait TabInspector: Send + Sync {
    /// Returns the active tab's URL or hostname, `None` for internal pages.
    async fn resolve_active_domain(&self) -> Option<String>;
}

/// Supplies the raw allow-list text (CSV, domain in the second field).
#[async_trait]
pub trait AllowListSource: Send + Sync {
    async fn load_allow_list_source(&self) -> Result<String>;
}

/// Shows the user-facing warning. Fire-and-forget; must not block the scanner.
pub trait WarningNotifier: Send + Sync {
    fn notify_malicious_detected(&self, details: MaliciousDetails);
}

/// Receives every emitted classification for display and logs.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn persist_result(&self, result: &ClassificationResult, report: &CycleReport)
        -> Result<()>;
}

/// Bundle of host handles owned by the orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    pub screen: Arc<dyn ScreenSource>,
    pub tab: Arc<dyn TabInspector>,
    pub allow_list: Arc<dyn AllowListSource>,
    pub notifier: Arc<dyn WarningNotifier>,
    pub sink: Arc<dyn ResultSink>,
}

/// Sink that drops results, for hosts that only consume `ScanEvent`s.
pub struct DiscardSink;

#[async_trait]
impl ResultSink for DiscardSink {
    async fn persist_result(&self, _result: &ClassificationResult, _report: &CycleReport) -> Result<()> {
        Ok(())
    }
}

/// Notifier that only logs; useful when no UI is attached.
pub struct LogNotifier;

impl WarningNotifier for LogNotifier {
    fn notify_malicious_detected(&self, details: MaliciousDetails) {
        log::warn!(
            "malicious content detected on {} at {}",
            details.domain.as_deref().unwrap_or("<unknown>"),
            details.scanned_at.to_rfc3339()
        );
    }
}
