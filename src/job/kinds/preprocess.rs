// src/job/kinds/preprocess.rs

//! EnergyPlusPreProcess: make sure the idf asks for SQLite output.

use tracing::info;

use crate::errors::Result;
use crate::files::{FileInfo, Files};
use crate::idf;
use crate::job::context::RunContext;
use crate::job::kinds::energyplus::resolve_idf;

const SQLITE_OBJECT: &str = "\nOutput:SQLite,\n  SimpleAndTabular;        !- Option Type\n";

pub fn start(ctx: &mut RunContext) -> Result<()> {
    let idf_file = resolve_idf(ctx)?;
    ctx.track(idf_file.full_path.clone());
    ctx.add_expected_output("out.idf");
    Ok(())
}

pub fn run(ctx: &RunContext) -> Result<Files> {
    let idf_file = resolve_idf(ctx)?;
    let mut text = std::fs::read_to_string(&idf_file.full_path)?;

    if !idf::has_object(&text, "Output:SQLite") {
        info!(job = %ctx.job_uuid(), "adding Output:SQLite");
        text.push_str(SQLITE_OBJECT);
    }

    let out = ctx.out_path("out.idf");
    std::fs::write(&out, text)?;

    let mut produced = FileInfo::new(out, "idf");
    for (source, target) in idf_file.required_files() {
        produced.add_required_file(source.clone(), target.clone())?;
    }

    let mut files = Files::new();
    files.append(produced);
    Ok(files)
}
