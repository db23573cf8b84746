use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};

use crate::db::{
    helpers::{optional_u64, parse_case, parse_datetime, parse_label, parse_method, to_i64, to_u64},
    models::ScanRecord,
};
use crate::sensing::{ClassificationResult, CycleReport, StageTimings};

const COLUMNS: &str = "id, scanned_at, domain, label, method, scan_case, distance, phash, \
     ocr_text, hash_ms, preprocess_ms, ocr_ms, tokenize_ms, inference_ms, total_ms";

pub fn insert(
    conn: &Connection,
    id: &str,
    result: &ClassificationResult,
    report: &CycleReport,
) -> Result<()> {
    let timings = report.timings;
    let optional = |value: Option<u64>| value.map(to_i64).transpose();

    conn.execute(
        &format!(
            "INSERT INTO scan_results ({COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
        ),
        params![
            id,
            result.scanned_at.to_rfc3339(),
            result.domain,
            result.label.as_str(),
            result.method.as_str(),
            report.case.as_str(),
            report.distance,
            report.phash,
            report.ocr_text,
            optional(timings.hash_ms)?,
            optional(timings.preprocess_ms)?,
            optional(timings.ocr_ms)?,
            optional(timings.tokenize_ms)?,
            optional(timings.inference_ms)?,
            to_i64(timings.total_ms)?,
        ],
    )
    .with_context(|| format!("failed to store {} result", report.case.as_str()))?;
    Ok(())
}

pub fn recent(conn: &Connection, limit: usize) -> Result<Vec<ScanRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {COLUMNS} FROM scan_results ORDER BY rowid DESC LIMIT ?1"
    ))?;
    let mut rows = stmt.query(params![to_i64(limit as u64)?])?;

    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(read_record(row)?);
    }
    Ok(records)
}

fn read_record(row: &Row<'_>) -> Result<ScanRecord> {
    let millis = |index: usize, field: &str| -> Result<Option<u64>> { optional_u64(row.get(index)?, field) };

    Ok(ScanRecord {
        id: row.get(0)?,
        scanned_at: parse_datetime(&row.get::<_, String>(1)?, "scanned_at")?,
        domain: row.get(2)?,
        label: parse_label(&row.get::<_, String>(3)?)?,
        method: parse_method(&row.get::<_, String>(4)?)?,
        scan_case: parse_case(&row.get::<_, String>(5)?)?,
        distance: row.get(6)?,
        phash: row.get(7)?,
        ocr_text: row.get(8)?,
        timings: StageTimings {
            hash_ms: millis(9, "hash_ms")?,
            preprocess_ms: millis(10, "preprocess_ms")?,
            ocr_ms: millis(11, "ocr_ms")?,
            tokenize_ms: millis(12, "tokenize_ms")?,
            inference_ms: millis(13, "inference_ms")?,
            total_ms: to_u64(row.get(14)?, "total_ms")?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;
    use crate::inference::Label;
    use crate::sensing::{Method, ScanCase};
    use chrono::{TimeZone, Utc};

    fn migrated() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    fn error_cycle() -> (ClassificationResult, CycleReport) {
        let timings = StageTimings {
            hash_ms: Some(2),
            preprocess_ms: Some(12),
            ocr_ms: Some(300),
            tokenize_ms: Some(0),
            inference_ms: Some(7),
            total_ms: 330,
        };
        let result = ClassificationResult {
            label: Label::Error,
            method: Method::Model,
            domain: None,
            scanned_at: Utc.with_ymd_and_hms(2025, 6, 9, 8, 30, 0).unwrap(),
            timings,
        };
        let report = CycleReport {
            case: ScanCase::HashChanged,
            distance: Some(9),
            phash: None,
            ocr_text: Some(String::new()),
            timings,
            error: Some("session run failed".into()),
        };
        (result, report)
    }

    #[test]
    fn error_results_keep_every_column() {
        let conn = migrated();
        let (result, report) = error_cycle();
        insert(&conn, "row-1", &result, &report).unwrap();

        let records = recent(&conn, 10).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, "row-1");
        assert_eq!(record.label, Label::Error);
        assert_eq!(record.domain, None);
        assert_eq!(record.scan_case, ScanCase::HashChanged);
        assert_eq!(record.distance, Some(9));
        assert_eq!(record.ocr_text.as_deref(), Some(""));
        assert_eq!(record.timings, result.timings);
    }

    #[test]
    fn limit_caps_newest_rows() {
        let conn = migrated();
        let (result, report) = error_cycle();
        for id in ["a", "b", "c"] {
            insert(&conn, id, &result, &report).unwrap();
        }
        let ids: Vec<String> = recent(&conn, 2).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn unknown_method_fails_the_read() {
        let conn = migrated();
        let (result, report) = error_cycle();
        insert(&conn, "row-1", &result, &report).unwrap();
        conn.execute("UPDATE scan_results SET method = 'guess'", []).unwrap();
        assert!(recent(&conn, 1).is_err());
    }
}
