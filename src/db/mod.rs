//! Scan result log in SQLite.
//!
//! The connection is opened and migrated on the caller's thread, then moved
//! to a thread of its own that serves typed requests in arrival order.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::host::{DiscardSink, ResultSink};
use crate::sensing::{ClassificationResult, CycleReport};
use crate::settings::ScanSettings;

mod helpers;
mod migrations;
mod models;
mod repositories;

pub use models::ScanRecord;

use repositories::scan_results;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Request {
    Insert {
        id: String,
        result: ClassificationResult,
        report: CycleReport,
        reply: Reply<()>,
    },
    Recent {
        limit: usize,
        reply: Reply<Vec<ScanRecord>>,
    },
}

struct Writer {
    requests: Option<mpsc::Sender<Request>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for Writer {
    fn drop(&mut self) {
        // closing the queue lets the thread finish what is already queued
        self.requests.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("result log thread panicked");
            }
        }
    }
}

#[derive(Clone)]
pub struct Database {
    writer: Arc<Writer>,
    path: Arc<PathBuf>,
}

impl Database {
    /// Opens (creating if needed) the result log at `path` and brings its
    /// schema up to date.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let mut conn = Connection::open(&path)
            .with_context(|| format!("failed to open result log {}", path.display()))?;
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!("result log stays in rollback-journal mode: {err}");
        }
        migrations::run_migrations(&mut conn)?;

        let (requests, queue) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("scan-results-db".into())
            .spawn(move || serve(conn, queue))
            .context("failed to spawn result log thread")?;

        info!("result log open at {}", path.display());
        Ok(Self {
            writer: Arc::new(Writer {
                requests: Some(requests),
                thread: Some(thread),
            }),
            path: Arc::new(path),
        })
    }

    /// The log at `settings.db_path`, or `None` when persistence is off.
    pub fn from_settings(settings: &ScanSettings) -> Result<Option<Self>> {
        settings.db_path.clone().map(Self::new).transpose()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores one emitted result with the report of the cycle that emitted
    /// it. Returns the generated row id.
    pub async fn insert_scan_result(
        &self,
        result: &ClassificationResult,
        report: &CycleReport,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.request(|reply| Request::Insert {
            id: id.clone(),
            result: result.clone(),
            report: report.clone(),
            reply,
        })
        .await?;
        Ok(id)
    }

    /// Most recently stored results first.
    pub async fn recent_results(&self, limit: usize) -> Result<Vec<ScanRecord>> {
        self.request(|reply| Request::Recent { limit, reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.writer
            .requests
            .as_ref()
            .context("result log is closed")?
            .send(build(reply))
            .map_err(|_| anyhow!("result log thread has exited"))?;
        response
            .await
            .map_err(|_| anyhow!("result log thread dropped the request"))?
    }
}

fn serve(conn: Connection, queue: mpsc::Receiver<Request>) {
    for request in queue {
        // a caller that stopped waiting is not an error
        match request {
            Request::Insert {
                id,
                result,
                report,
                reply,
            } => {
                let _ = reply.send(scan_results::insert(&conn, &id, &result, &report));
            }
            Request::Recent { limit, reply } => {
                let _ = reply.send(scan_results::recent(&conn, limit));
            }
        }
    }
    info!("result log closed");
}

#[async_trait]
impl ResultSink for Database {
    async fn persist_result(&self, result: &ClassificationResult, report: &CycleReport) -> Result<()> {
        self.insert_scan_result(result, report).await.map(|_| ())
    }
}

/// The sink a host gets from its settings: the SQLite log when `dbPath` is
/// set, otherwise one that drops every result.
pub fn result_sink(settings: &ScanSettings) -> Result<Arc<dyn ResultSink>> {
    Ok(match Database::from_settings(settings)? {
        Some(db) => Arc::new(db),
        None => Arc::new(DiscardSink),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::Label;
    use crate::sensing::{Method, ScanCase, StageTimings};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn result(label: Label, method: Method) -> ClassificationResult {
        ClassificationResult {
            label,
            method,
            domain: Some("example.org".into()),
            scanned_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            timings: StageTimings {
                hash_ms: Some(4),
                preprocess_ms: Some(30),
                ocr_ms: Some(410),
                tokenize_ms: Some(1),
                inference_ms: Some(95),
                total_ms: 540,
            },
        }
    }

    fn report(case: ScanCase, distance: Option<u32>, timings: StageTimings) -> CycleReport {
        CycleReport {
            case,
            distance,
            phash: Some("AAAAAAAAAAA=".into()),
            ocr_text: Some("verify your account".into()),
            timings,
            error: None,
        }
    }

    #[tokio::test]
    async fn stores_and_reads_back_newest_first() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("scans.db")).unwrap();

        let first = result(Label::Malicious, Method::Model);
        db.persist_result(&first, &report(ScanCase::NoPriorHash, None, first.timings))
            .await
            .unwrap();

        let reuse_timings = StageTimings {
            hash_ms: Some(3),
            total_ms: 5,
            ..Default::default()
        };
        let id = db
            .insert_scan_result(&first, &report(ScanCase::HashStable, Some(1), reuse_timings))
            .await
            .unwrap();

        let records = db.recent_results(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].scan_case, ScanCase::HashStable);
        assert_eq!(records[0].distance, Some(1));
        assert_eq!(records[0].timings, reuse_timings);

        assert_eq!(records[1].scan_case, ScanCase::NoPriorHash);
        assert_eq!(records[1].label, Label::Malicious);
        assert_eq!(records[1].scanned_at, first.scanned_at);

        assert_eq!(db.recent_results(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn results_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("scans.db");
        {
            let db = Database::new(path.clone()).unwrap();
            let whitelisted = result(Label::Benign, Method::Whitelist);
            db.insert_scan_result(
                &whitelisted,
                &CycleReport {
                    case: ScanCase::Whitelisted,
                    distance: None,
                    phash: None,
                    ocr_text: None,
                    timings: StageTimings {
                        total_ms: 2,
                        ..Default::default()
                    },
                    error: None,
                },
            )
            .await
            .unwrap();
        }

        let db = Database::new(path).unwrap();
        let records = db.recent_results(5).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].method, Method::Whitelist);
        assert_eq!(records[0].timings.hash_ms, None);
    }

    #[tokio::test]
    async fn clones_share_one_log() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("scans.db")).unwrap();
        let other = db.clone();
        let first = result(Label::Benign, Method::Model);
        other
            .insert_scan_result(&first, &report(ScanCase::NoPriorHash, None, first.timings))
            .await
            .unwrap();
        drop(other);
        assert_eq!(db.recent_results(5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn settings_path_opens_the_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("scans.db");

        assert!(Database::from_settings(&ScanSettings::default()).unwrap().is_none());

        let settings = ScanSettings {
            db_path: Some(path.clone()),
            ..Default::default()
        };
        let db = Database::from_settings(&settings).unwrap().unwrap();
        assert_eq!(db.path(), path.as_path());

        let sink = result_sink(&settings).unwrap();
        let first = result(Label::Benign, Method::Model);
        sink.persist_result(&first, &report(ScanCase::NoPriorHash, None, first.timings))
            .await
            .unwrap();
        assert_eq!(db.recent_results(5).await.unwrap().len(), 1);

        let discard = result_sink(&ScanSettings::default()).unwrap();
        assert!(discard
            .persist_result(&first, &report(ScanCase::NoPriorHash, None, first.timings))
            .await
            .is_ok());
    }
}
