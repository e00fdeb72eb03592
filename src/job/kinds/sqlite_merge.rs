// src/job/kinds/sqlite_merge.rs

//! Appending EnergyPlus SQLite outputs of consecutive run-period partitions.
//!
//! The first partition is copied as-is. Each following one is attached as
//! `merger` and its `Time`, `ReportData` and `ReportExtendedData` rows are
//! appended with their indices shifted past the destination's
//! (`max(dest) - min(src) + 1`). Design-day rows of later partitions are
//! duplicates of the first partition's and are skipped.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::errors::{Result, RunManagerError};

const DESIGN_DAY_FILTER: &str = "DayType IN ('WinterDesignDay', 'SummerDesignDay')";

/// Copy `parts[0]` to `out` and append the remaining partitions.
pub fn join_partitions(parts: &[PathBuf], out: &Path) -> Result<()> {
    let Some((first, rest)) = parts.split_first() else {
        return Err(RunManagerError::BadParam("no sqlite partitions to join".into()));
    };

    if out.exists() {
        std::fs::remove_file(out)?;
    }
    std::fs::copy(first, out)?;

    let mut conn = Connection::open(out)?;
    for part in rest {
        merge_into(&mut conn, part)?;
    }
    Ok(())
}

fn table_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool> {
    let sql = format!("SELECT 1 FROM {schema}.sqlite_master WHERE type = 'table' AND name = ?1");
    Ok(conn
        .query_row(&sql, params![table], |_| Ok(()))
        .optional()?
        .is_some())
}

fn columns(conn: &Connection, schema: &str, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA {schema}.table_info({table})"))?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(cols)
}

/// `max(main.col) - min(merger.col) + 1`, or 0 when either side is empty.
fn offset(conn: &Connection, table: &str, col: &str) -> Result<i64> {
    let sql = format!(
        "SELECT (SELECT MAX({col}) FROM main.{table}) - (SELECT MIN({col}) FROM merger.{table}) + 1"
    );
    let value: Option<i64> = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(value.unwrap_or(0).max(0))
}

/// Append one partition (see module docs) inside a single transaction.
fn merge_into(conn: &mut Connection, part: &Path) -> Result<()> {
    conn.execute("ATTACH DATABASE ?1 AS merger", params![part.to_string_lossy()])?;
    let merged = merge_attached(conn);
    conn.execute("DETACH DATABASE merger", [])?;
    merged?;
    info!(partition = ?part, "merged sqlite partition");
    Ok(())
}

fn merge_attached(conn: &mut Connection) -> Result<()> {
    let has = |t: &str| -> Result<bool> {
        Ok(table_exists(conn, "main", t)? && table_exists(conn, "merger", t)?)
    };
    let has_time = has("Time")?;
    let has_data = has("ReportData")?;
    let has_ext = has("ReportExtendedData")?;

    let skip_design_days = has_time && columns(conn, "merger", "Time")?.iter().any(|c| c == "DayType");

    // Offsets are computed before anything is inserted.
    let time_off = if has_time { offset(conn, "Time", "TimeIndex")? } else { 0 };
    let data_off = if has_data { offset(conn, "ReportData", "ReportDataIndex")? } else { 0 };
    let ext_off = if has_ext {
        offset(conn, "ReportExtendedData", "ReportExtendedDataIndex")?
    } else {
        0
    };
    debug!(time_off, data_off, ext_off, skip_design_days, "sqlite merge offsets");

    let kept_times = if skip_design_days {
        format!("SELECT TimeIndex FROM merger.Time WHERE NOT ({DESIGN_DAY_FILTER})")
    } else {
        "SELECT TimeIndex FROM merger.Time".to_string()
    };

    let tx = conn.transaction()?;

    if has_time {
        let select = shifted_select(&tx, "Time", &[("TimeIndex", time_off)])?;
        tx.execute(
            &format!("INSERT INTO main.Time {select} WHERE TimeIndex IN ({kept_times})"),
            [],
        )?;
    }

    if has_data {
        let select = shifted_select(
            &tx,
            "ReportData",
            &[("ReportDataIndex", data_off), ("TimeIndex", time_off)],
        )?;
        let filter = if has_time {
            format!(" WHERE TimeIndex IN ({kept_times})")
        } else {
            String::new()
        };
        tx.execute(&format!("INSERT INTO main.ReportData {select}{filter}"), [])?;
    }

    if has_ext {
        let select = shifted_select(
            &tx,
            "ReportExtendedData",
            &[("ReportExtendedDataIndex", ext_off), ("ReportDataIndex", data_off)],
        )?;
        let filter = if has_data && has_time {
            format!(
                " WHERE ReportDataIndex IN (SELECT ReportDataIndex FROM merger.ReportData WHERE TimeIndex IN ({kept_times}))"
            )
        } else {
            String::new()
        };
        tx.execute(&format!("INSERT INTO main.ReportExtendedData {select}{filter}"), [])?;
    }

    tx.commit()?;
    Ok(())
}

/// `SELECT <cols> FROM merger.<table>` with the given columns shifted.
fn shifted_select(conn: &Connection, table: &str, shifts: &[(&str, i64)]) -> Result<String> {
    let cols = columns(conn, "merger", table)?;
    let exprs: Vec<String> = cols
        .iter()
        .map(|c| match shifts.iter().find(|(name, _)| name.eq_ignore_ascii_case(c)) {
            Some((_, off)) => format!("{c} + {off}"),
            None => c.clone(),
        })
        .collect();
    Ok(format!(
        "SELECT {} FROM merger.{table}",
        exprs.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(path: &Path, first_time: i64, days: &[(&str, i64)]) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Time (TimeIndex INTEGER PRIMARY KEY, Month INTEGER, Day INTEGER, DayType TEXT);
             CREATE TABLE ReportData (ReportDataIndex INTEGER PRIMARY KEY, TimeIndex INTEGER, ReportDataDictionaryIndex INTEGER, Value REAL);
             CREATE TABLE ReportExtendedData (ReportExtendedDataIndex INTEGER PRIMARY KEY, ReportDataIndex INTEGER, MaxValue REAL);",
        )
        .unwrap();

        let mut t = first_time;
        let mut d = first_time * 10;
        for (day_type, rows) in days {
            conn.execute(
                "INSERT INTO Time VALUES (?1, 1, 1, ?2)",
                params![t, day_type],
            )
            .unwrap();
            for _ in 0..*rows {
                conn.execute(
                    "INSERT INTO ReportData VALUES (?1, ?2, 7, 1.5)",
                    params![d, t],
                )
                .unwrap();
                conn.execute(
                    "INSERT INTO ReportExtendedData (ReportDataIndex, MaxValue) VALUES (?1, 2.0)",
                    params![d],
                )
                .unwrap();
                d += 1;
            }
            t += 1;
        }
    }

    fn count(path: &Path, table: &str) -> i64 {
        let conn = Connection::open(path).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn joins_partitions_and_drops_repeated_design_days() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.sql");
        let b = dir.path().join("b.sql");
        partition(&a, 1, &[("WinterDesignDay", 2), ("Monday", 3)]);
        // Same index range as `a` on purpose: indices must be re-based.
        partition(&b, 1, &[("SummerDesignDay", 2), ("Tuesday", 4), ("Wednesday", 1)]);

        let out = dir.path().join("eplusout.sql");
        join_partitions(&[a.clone(), b.clone()], &out).unwrap();

        assert_eq!(count(&out, "Time"), 2 + 2);
        assert_eq!(count(&out, "ReportData"), (2 + 3) + (4 + 1));
        assert_eq!(count(&out, "ReportExtendedData"), (2 + 3) + (4 + 1));

        let conn = Connection::open(&out).unwrap();
        let orphans: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM ReportData WHERE TimeIndex NOT IN (SELECT TimeIndex FROM Time)",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn single_partition_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.sql");
        partition(&a, 1, &[("Monday", 2)]);
        let out = dir.path().join("out.sql");
        join_partitions(&[a], &out).unwrap();
        assert_eq!(count(&out, "ReportData"), 2);
    }
}
