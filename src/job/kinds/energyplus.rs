// src/job/kinds/energyplus.rs

//! EnergyPlus, ExpandObjects and ReadVars.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::errors::{Result, RunManagerError};
use crate::files::{FileInfo, Files};
use crate::idf;
use crate::job::context::{RunContext, ToolStep};
use crate::tools::ToolVersion;

pub const ENERGYPLUS: &str = "energyplus";
pub const EXPANDOBJECTS: &str = "expandobjects";
pub const READVARS: &str = "readvars";

const IDD: &str = "Energy+.idd";

/// The idf this job simulates: by `idf_key` when given, else the last one.
pub(crate) fn resolve_idf(ctx: &RunContext) -> Result<FileInfo> {
    let key = ctx.params.get_opt("idf_key");
    ctx.memoized("idf", |inputs: &Files| match &key {
        Some(k) => inputs.get_last_by_key(k),
        None => inputs.get_last_by_extension("idf"),
    })
}

/// Weather file: an input `epw`, else the idf's own `in.epw`, else the
/// idf's weather comment looked up in the `epwdir` parameter.
fn resolve_weather(ctx: &RunContext, idf_file: &FileInfo, idf_text: &str) -> Option<PathBuf> {
    if let Ok(epw) = ctx.inputs.get_last_by_extension("epw") {
        return Some(epw.full_path);
    }
    if let Some(source) = idf_file.required_file("in.epw") {
        return Some(source.to_path_buf());
    }
    let name = idf::weather_file_comment(idf_text)?;
    let dir = ctx.params.get_opt("epwdir")?;
    let path = PathBuf::from(dir).join(name);
    let path = if path.is_relative() {
        ctx.base_path.join(path)
    } else {
        path
    };
    path.exists().then_some(path)
}

fn read_idf(file: &FileInfo) -> Result<String> {
    std::fs::read_to_string(&file.full_path).map_err(|e| {
        RunManagerError::BadParam(format!(
            "unable to read idf {}: {e}",
            file.full_path.display()
        ))
    })
}

/// Stage `idf` as `in.idf` with its required files, except a weather file
/// that will be staged separately.
fn stage_idf(ctx: &mut RunContext, idf_file: &FileInfo, skip_weather: bool) {
    ctx.add_required_file(idf_file.full_path.clone(), "in.idf");
    for (source, target) in idf_file.required_files() {
        if skip_weather && target.as_os_str() == "in.epw" {
            continue;
        }
        ctx.add_required_file(source.clone(), target.clone());
    }
}

/// Stage the data dictionary shipped next to the tool, when there is one.
pub(crate) fn stage_idd(ctx: &mut RunContext, idd: PathBuf) {
    match idd.file_name().map(PathBuf::from) {
        Some(name) if idd.exists() => ctx.add_required_file(idd, name),
        _ => debug!(job = %ctx.job_uuid(), idd = ?idd, "no idd next to tool"),
    }
}

pub fn start_energyplus(ctx: &mut RunContext) -> Result<()> {
    let idf_file = resolve_idf(ctx)?;
    let text = read_idf(&idf_file)?;
    let version = idf::idf_version(&text).unwrap_or_else(ToolVersion::any);
    let tool = ctx.tool(ENERGYPLUS, &version)?;
    info!(job = %ctx.job_uuid(), idf = ?idf_file.full_path, %version, "energyplus");

    let weather = resolve_weather(ctx, &idf_file, &text);
    stage_idf(ctx, &idf_file, weather.is_some());
    if let Some(epw) = &weather {
        ctx.add_required_file(epw.clone(), "in.epw");
    } else {
        debug!(job = %ctx.job_uuid(), "no weather file; running design days only");
    }
    stage_idd(ctx, tool.tool_dir().join(IDD));

    if let Ok(expand) = ctx.tool(EXPANDOBJECTS, &version) {
        ctx.add_step(ToolStep::new(expand.name, version));
    }

    let mut step = ToolStep::new(ENERGYPLUS, version);
    if weather.is_some() {
        step = step.args(["-w", "in.epw"]);
    }
    ctx.add_step(step.args(["-d", ".", "in.idf"]));

    for name in ["eplusout.sql", "eplusout.err", "eplusout.eso"] {
        ctx.add_expected_output(name);
    }
    ctx.set_no_output_error();
    Ok(())
}

/// Switch EnergyPlus to `expanded.idf` when ExpandObjects produced one.
pub fn prepare_energyplus(ctx: &RunContext, step: &mut ToolStep) -> Result<()> {
    if step.tool != ENERGYPLUS || !ctx.out_path("expanded.idf").exists() {
        return Ok(());
    }
    if let Some(last) = step.args.last_mut() {
        debug!(job = %ctx.job_uuid(), "using expanded.idf");
        *last = "expanded.idf".to_string();
    }
    Ok(())
}

pub fn start_expand_objects(ctx: &mut RunContext) -> Result<()> {
    let idf_file = resolve_idf(ctx)?;
    let text = read_idf(&idf_file)?;
    let version = idf::idf_version(&text).unwrap_or_else(ToolVersion::any);
    let tool = ctx.tool(EXPANDOBJECTS, &version)?;

    stage_idf(ctx, &idf_file, false);
    stage_idd(ctx, tool.tool_dir().join(IDD));
    ctx.add_step(ToolStep::new(EXPANDOBJECTS, version));
    ctx.add_expected_output("expanded.idf");
    ctx.copy_required_files(&idf_file, "idf", None);
    Ok(())
}

pub fn start_readvars(ctx: &mut RunContext) -> Result<()> {
    let eso = ctx.memoized("eso", |inputs: &Files| inputs.get_last_by_extension("eso"))?;
    ctx.tool(READVARS, &ToolVersion::any())?;
    ctx.add_required_file(eso.full_path.clone(), "eplusout.eso");

    // Empty variable list: report every variable.
    std::fs::write(ctx.out_path("eplusout.rvi"), "eplusout.eso\neplusout.csv\n0\n")?;

    ctx.add_step(ToolStep::new(READVARS, ToolVersion::any()).args(["eplusout.rvi", "unlimited"]));
    ctx.add_expected_output("eplusout.csv");
    Ok(())
}
