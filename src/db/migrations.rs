//! Schema versions are tracked in `user_version`. Each entry of
//! `MIGRATIONS` moves the schema up by exactly one version.

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use rusqlite::Connection;

/// Entry `i` upgrades a version-`i` schema to version `i + 1`.
const MIGRATIONS: &[&str] = &[include_str!("schemas/schema_v1.sql")];

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let latest = MIGRATIONS.len();
    let current = schema_version(conn)?;
    if current > latest {
        bail!("result log schema v{current} is newer than this build understands (v{latest})");
    }

    for (from, sql) in MIGRATIONS.iter().enumerate().skip(current) {
        let to = from + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply schema v{to}"))?;
        tx.pragma_update(None, "user_version", to as i64)?;
        tx.commit()
            .with_context(|| format!("failed to commit schema v{to}"))?;
        info!("result log schema at v{to}");
    }
    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<usize> {
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version")?;
    usize::try_from(version).map_err(|_| anyhow!("invalid user_version {version}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_log_reaches_latest_schema_once() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);

        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), MIGRATIONS.len());

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'scan_results'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }

    #[test]
    fn newer_schema_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", (MIGRATIONS.len() + 1) as i64)
            .unwrap();
        assert!(run_migrations(&mut conn).is_err());
    }
}
