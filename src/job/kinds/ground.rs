// src/job/kinds/ground.rs

//! Basement and Slab ground heat transfer preprocessors.
//!
//! Both tools read an idf describing the foundation and write
//! `EPObjects.TXT`; the end handler appends those objects to the original
//! idf so a following EnergyPlus job sees one complete `in.idf`.

use tracing::info;

use crate::errors::{Result, RunManagerError};
use crate::job::context::{RunContext, ToolStep};
use crate::job::error_info::ErrorInfo;
use crate::job::kinds::energyplus::{resolve_idf, stage_idd};
use crate::tools::ToolVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundKind {
    Basement,
    Slab,
}

impl GroundKind {
    pub fn tool(self) -> &'static str {
        match self {
            GroundKind::Basement => "basement",
            GroundKind::Slab => "slab",
        }
    }

    fn staged_idf(self) -> &'static str {
        match self {
            GroundKind::Basement => "BasementGHTIn.idf",
            GroundKind::Slab => "GHTIn.idf",
        }
    }

    fn idd(self) -> &'static str {
        match self {
            GroundKind::Basement => "BasementGHT.idd",
            GroundKind::Slab => "SlabGHT.idd",
        }
    }
}

const GENERATED: &str = "EPObjects.TXT";
const MERGED: &str = "in.idf";

pub fn start(kind: GroundKind, ctx: &mut RunContext) -> Result<()> {
    let idf_file = resolve_idf(ctx)?;
    let tool = ctx.tool(kind.tool(), &ToolVersion::any())?;

    ctx.add_required_file_info(&idf_file, kind.staged_idf());
    stage_idd(ctx, tool.tool_dir().join(kind.idd()));
    ctx.add_step(ToolStep::new(kind.tool(), ToolVersion::any()));
    ctx.add_expected_output(MERGED);
    ctx.copy_required_files(&idf_file, "idf", None);
    Ok(())
}

/// Concatenate the original idf and the generated objects into `in.idf`.
pub fn end(kind: GroundKind, ctx: &mut RunContext, info: &mut ErrorInfo) -> Result<()> {
    if info.has_failed() {
        return Ok(());
    }

    let generated = ctx.out_path(GENERATED);
    if !generated.exists() {
        info.fail(format!("{} did not produce {GENERATED}", kind.tool()));
        return Ok(());
    }

    let idf_file = resolve_idf(ctx)?;
    let mut text = std::fs::read_to_string(&idf_file.full_path).map_err(|e| {
        RunManagerError::BadParam(format!("reading {}: {e}", idf_file.full_path.display()))
    })?;
    text.push('\n');
    text.push_str(&std::fs::read_to_string(&generated)?);
    std::fs::write(ctx.out_path(MERGED), text)?;

    info!(job = %ctx.job_uuid(), tool = kind.tool(), "merged ground objects into in.idf");
    Ok(())
}
