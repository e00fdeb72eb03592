// src/job/kinds/translators.rs

//! Model/IDF translators and Dakota: one input staged under a fixed name,
//! one tool, one expected output.

use crate::errors::Result;
use crate::files::Files;
use crate::job::context::{RunContext, ToolStep};
use crate::tools::ToolVersion;

pub fn start_model_to_idf(ctx: &mut RunContext) -> Result<()> {
    let osm = ctx.memoized("osm", |inputs: &Files| inputs.get_last_by_extension("osm"))?;
    ctx.tool("modeltoidf", &ToolVersion::any())?;

    ctx.add_required_file_info(&osm, "in.osm");
    ctx.add_step(ToolStep::new("modeltoidf", ToolVersion::any()).args(["in.osm", "out.idf"]));
    ctx.add_expected_output("out.idf");
    ctx.copy_required_files(&osm, "idf", None);
    Ok(())
}

pub fn start_idf_to_model(ctx: &mut RunContext) -> Result<()> {
    let idf = ctx.memoized("idf", |inputs: &Files| inputs.get_last_by_extension("idf"))?;
    ctx.tool("idftomodel", &ToolVersion::any())?;

    ctx.add_required_file_info(&idf, "in.idf");
    ctx.add_step(ToolStep::new("idftomodel", ToolVersion::any()).args(["in.idf", "out.osm"]));
    ctx.add_expected_output("out.osm");
    ctx.copy_required_files(&idf, "osm", None);
    Ok(())
}

pub fn start_dakota(ctx: &mut RunContext) -> Result<()> {
    let input = ctx.memoized("in", |inputs: &Files| inputs.get_last_by_extension("in"))?;
    ctx.tool("dakota", &ToolVersion::any())?;

    ctx.add_required_file_info(&input, "dakota.in");
    ctx.add_step(
        ToolStep::new("dakota", ToolVersion::any()).args(["-i", "dakota.in", "-o", "dakota.out"]),
    );
    ctx.add_expected_output("dakota.out");
    Ok(())
}
