// src/job/kinds/parallel.rs

//! Parallel EnergyPlus: split one idf by run period, join the partial
//! SQLite outputs back together.

use tracing::info;

use crate::errors::{Result, RunManagerError};
use crate::files::{FileInfo, Files};
use crate::idf;
use crate::job::context::RunContext;
use crate::job::kinds::energyplus::resolve_idf;
use crate::job::kinds::sqlite_merge;

pub const PARTITION_KEY_PREFIX: &str = "idf-partition-";

fn partitions(ctx: &RunContext) -> Result<usize> {
    let raw = ctx
        .params
        .get_single("numpartitions")
        .map_err(|_| RunManagerError::BadParam("missing 'numpartitions' parameter".into()))?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(RunManagerError::BadParam(format!(
            "'numpartitions' must be a positive integer, got '{raw}'"
        ))),
    }
}

pub fn start_split(ctx: &mut RunContext) -> Result<()> {
    let idf_file = resolve_idf(ctx)?;
    let n = partitions(ctx)?;
    ctx.track(idf_file.full_path.clone());
    for i in 0..n {
        ctx.add_expected_output(format!("partition-{i}.idf"));
    }
    Ok(())
}

/// Write `partition-<i>.idf`, one per contiguous slice of the run period.
pub fn run_split(ctx: &RunContext) -> Result<Files> {
    let idf_file = resolve_idf(ctx)?;
    let n = partitions(ctx)?;
    let text = std::fs::read_to_string(&idf_file.full_path)?;

    let periods = idf::run_period(&text)?.split(n)?;
    info!(job = %ctx.job_uuid(), requested = n, partitions = periods.len(), "splitting run period");

    let mut files = Files::new();
    for (i, period) in periods.iter().enumerate() {
        let path = ctx.out_path(format!("partition-{i}.idf"));
        std::fs::write(&path, idf::with_run_period(&text, period)?)?;

        let mut part = FileInfo::new(path, format!("{PARTITION_KEY_PREFIX}{i}"));
        for (source, target) in idf_file.required_files() {
            part.add_required_file(source.clone(), target.clone())?;
        }
        files.append(part);
    }
    Ok(files)
}

pub fn start_join(ctx: &mut RunContext) -> Result<()> {
    let parts = ctx.inputs.get_all_by_filename("eplusout.sql");
    if parts.is_empty() {
        return Err(RunManagerError::FileNotFound {
            criterion: "filename".into(),
            value: "eplusout.sql".into(),
        });
    }
    for part in parts.iter() {
        ctx.track(part.full_path.clone());
    }
    ctx.add_expected_output("eplusout.sql");
    Ok(())
}

/// Merge every `eplusout.sql` partition, in input order, into one database.
pub fn run_join(ctx: &RunContext) -> Result<Files> {
    let parts: Vec<_> = ctx
        .inputs
        .get_all_by_filename("eplusout.sql")
        .iter()
        .map(|f| f.full_path.clone())
        .collect();

    let out = ctx.out_path("eplusout.sql");
    sqlite_merge::join_partitions(&parts, &out)?;
    info!(job = %ctx.job_uuid(), partitions = parts.len(), "joined sqlite outputs");

    let mut files = Files::new();
    files.append(FileInfo::new(out, "sql"));
    Ok(files)
}
