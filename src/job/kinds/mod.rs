// src/job/kinds/mod.rs

//! Per-type behaviour, dispatched on [`JobKind`].
//!
//! Every kind supplies a start handler that resolves its inputs and declares
//! required files, tool steps and expected outputs on the [`RunContext`].
//! The optional hooks (`prepare_tool`, `run_internal`, `end_handler`,
//! `output_files`) default to doing nothing.

pub mod energyplus;
pub mod ground;
pub mod parallel;
pub mod preprocess;
pub mod ruby;
pub mod sqlite_merge;
pub mod translators;

use crate::errors::Result;
use crate::files::Files;
use crate::job::context::{RunContext, ToolStep};
use crate::job::error_info::ErrorInfo;
use crate::params::JobParams;
use crate::types::JobType;

pub use ground::GroundKind;
pub use ruby::{CopyRequiredRule, FileSelection, FileSource, RubyBundle, RubyInputFile, RubyJob};

/// Kind-specific data of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    Null,
    EnergyPlus,
    ExpandObjects,
    EnergyPlusPreProcess,
    ReadVars,
    Ground(GroundKind),
    /// Ruby and UserScript jobs; `bundles[0]` is the job's own script.
    Ruby(RubyJob),
    ModelToIdf,
    IdfToModel,
    Dakota,
    ParallelEnergyPlusSplit,
    ParallelEnergyPlusJoin,
}

impl JobKind {
    /// Kind for `job_type`, decoding whatever the type keeps in its params.
    pub fn for_type(job_type: JobType, params: &JobParams) -> Result<JobKind> {
        Ok(match job_type {
            JobType::Null => JobKind::Null,
            JobType::EnergyPlus => JobKind::EnergyPlus,
            JobType::ExpandObjects => JobKind::ExpandObjects,
            JobType::EnergyPlusPreProcess => JobKind::EnergyPlusPreProcess,
            JobType::ReadVars => JobKind::ReadVars,
            JobType::Basement => JobKind::Ground(GroundKind::Basement),
            JobType::Slab => JobKind::Ground(GroundKind::Slab),
            JobType::Ruby => JobKind::Ruby(RubyJob::from_params(params, false)),
            JobType::UserScript => JobKind::Ruby(RubyJob::from_params(params, true)),
            JobType::ModelToIdf => JobKind::ModelToIdf,
            JobType::IdfToModel => JobKind::IdfToModel,
            JobType::Dakota => JobKind::Dakota,
            JobType::ParallelEnergyPlusSplit => JobKind::ParallelEnergyPlusSplit,
            JobType::ParallelEnergyPlusJoin => JobKind::ParallelEnergyPlusJoin,
        })
    }
}

/// Kinds that do their work in-process instead of spawning tools.
pub fn is_internal(kind: &JobKind) -> bool {
    matches!(
        kind,
        JobKind::Null
            | JobKind::EnergyPlusPreProcess
            | JobKind::ParallelEnergyPlusSplit
            | JobKind::ParallelEnergyPlusJoin
    )
}

pub fn start_handler(kind: &JobKind, ctx: &mut RunContext) -> Result<()> {
    match kind {
        JobKind::Null => Ok(()),
        JobKind::EnergyPlus => energyplus::start_energyplus(ctx),
        JobKind::ExpandObjects => energyplus::start_expand_objects(ctx),
        JobKind::ReadVars => energyplus::start_readvars(ctx),
        JobKind::EnergyPlusPreProcess => preprocess::start(ctx),
        JobKind::Ground(g) => ground::start(*g, ctx),
        JobKind::Ruby(r) => ruby::start(r, ctx),
        JobKind::ModelToIdf => translators::start_model_to_idf(ctx),
        JobKind::IdfToModel => translators::start_idf_to_model(ctx),
        JobKind::Dakota => translators::start_dakota(ctx),
        JobKind::ParallelEnergyPlusSplit => parallel::start_split(ctx),
        JobKind::ParallelEnergyPlusJoin => parallel::start_join(ctx),
    }
}

/// Adjust a step right before its tool is launched.
pub fn prepare_tool(kind: &JobKind, ctx: &RunContext, step: &mut ToolStep) -> Result<()> {
    match kind {
        JobKind::EnergyPlus => energyplus::prepare_energyplus(ctx, step),
        _ => Ok(()),
    }
}

/// Work of an internal kind; runs on a blocking thread.
pub fn run_internal(kind: &JobKind, ctx: &RunContext) -> Result<Files> {
    match kind {
        JobKind::EnergyPlusPreProcess => preprocess::run(ctx),
        JobKind::ParallelEnergyPlusSplit => parallel::run_split(ctx),
        JobKind::ParallelEnergyPlusJoin => parallel::run_join(ctx),
        _ => Ok(Files::new()),
    }
}

/// Post-processing after the last tool.
pub fn end_handler(kind: &JobKind, ctx: &mut RunContext, info: &mut ErrorInfo) -> Result<()> {
    match kind {
        JobKind::Ground(g) => ground::end(*g, ctx, info),
        _ => Ok(()),
    }
}

/// Kind-specific tagging of the files a run produced.
pub fn output_files(kind: &JobKind, ctx: &RunContext, files: Files) -> Files {
    match kind {
        JobKind::Ruby(r) => ruby::output_files(r, ctx, files),
        _ => files,
    }
}
