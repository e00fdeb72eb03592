// src/job/kinds/ruby.rs

//! Ruby and UserScript jobs.
//!
//! A Ruby job's configuration travels in its params (`ruby_scriptfile`,
//! `ruby_scriptparameters`, `ruby_inputfiles`, ...). After merging, each
//! original job becomes one bundle under `merged_ruby_jobs/<i>`; bundles
//! run one after another from a generated driver script, bundle `i` in
//! `mergedjob-<i>/`, and each bundle after the first takes its inputs from
//! the previous bundle's directory.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{MergeJobError, Result, RunManagerError};
use crate::files::{FileInfo, Files};
use crate::job::context::{RunContext, ToolStep};
use crate::job::error_info::merged_index;
use crate::params::{JobParam, JobParams};
use crate::tools::ToolVersion;

pub const RUBY: &str = "ruby";
const DRIVER_SCRIPT: &str = "merged_jobs.rb";
const DRIVER_PLAN: &str = "merged_jobs.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSelection {
    Last,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSource {
    /// Files of the parent job.
    Parent,
    /// Every file visible to the job.
    All,
}

impl FromStr for FileSelection {
    type Err = RunManagerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "last" => Ok(FileSelection::Last),
            "all" => Ok(FileSelection::All),
            other => Err(RunManagerError::BadParam(format!("unknown file selection '{other}'"))),
        }
    }
}

impl FromStr for FileSource {
    type Err = RunManagerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "parent" => Ok(FileSource::Parent),
            "all" => Ok(FileSource::All),
            other => Err(RunManagerError::BadParam(format!("unknown file source '{other}'"))),
        }
    }
}

impl FileSelection {
    fn value_name(self) -> &'static str {
        match self {
            FileSelection::Last => "Last",
            FileSelection::All => "All",
        }
    }
}

impl FileSource {
    fn value_name(self) -> &'static str {
        match self {
            FileSource::Parent => "Parent",
            FileSource::All => "All",
        }
    }
}

/// Input files matching `regex` staged as `stage_as`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RubyInputFile {
    pub selection: FileSelection,
    pub source: FileSource,
    pub regex: String,
    pub stage_as: String,
}

/// Outputs with `out_ext` inherit the required files of the last input with
/// `in_ext` (only the one staged as `filename`, unless it is empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequiredRule {
    pub in_ext: String,
    pub out_ext: String,
    pub filename: String,
}

/// One script invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RubyBundle {
    pub script: Option<PathBuf>,
    pub script_params: Vec<String>,
    pub tool_params: Vec<String>,
    pub required_files: Vec<(PathBuf, PathBuf)>,
    pub input_files: Vec<RubyInputFile>,
    pub copy_required: Vec<CopyRequiredRule>,
    pub original_uuid: Option<Uuid>,
}

impl RubyBundle {
    /// Decode the `ruby_*` params; malformed entries are skipped.
    pub fn from_params(params: &JobParams) -> RubyBundle {
        let mut bundle = RubyBundle {
            script: params.get_opt("ruby_scriptfile").map(PathBuf::from),
            script_params: params.get_values("ruby_scriptparameters"),
            tool_params: params.get_values("ruby_toolparameters"),
            original_uuid: params
                .get_opt("original_job_uuid")
                .and_then(|u| Uuid::parse_str(&u).ok()),
            ..Default::default()
        };

        if let Ok(list) = params.get("ruby_inputfiles") {
            for sel in &list.children {
                match decode_input_file(sel) {
                    Some(f) => bundle.input_files.push(f),
                    None => warn!(value = %sel.value, "skipping malformed ruby_inputfiles entry"),
                }
            }
        }

        if let Ok(list) = params.get("ruby_copyrequired") {
            for rule in &list.children {
                let Some(out) = rule.children.first() else {
                    warn!(value = %rule.value, "skipping malformed ruby_copyrequired entry");
                    continue;
                };
                bundle.copy_required.push(CopyRequiredRule {
                    in_ext: rule.value.clone(),
                    out_ext: out.value.clone(),
                    filename: out.children.first().map(|f| f.value.clone()).unwrap_or_default(),
                });
            }
        }

        if let Ok(list) = params.get("ruby_requiredfiles") {
            for req in &list.children {
                let Some(dest) = req.children.first() else {
                    continue;
                };
                let dest = PathBuf::from(&dest.value);
                if !bundle.required_files.iter().any(|(_, d)| *d == dest) {
                    bundle.required_files.push((PathBuf::from(&req.value), dest));
                }
            }
        }

        bundle
    }

    pub fn to_params(&self, user_script: bool) -> JobParams {
        let mut params = JobParams::new();
        params.append(JobParam::with_children(
            "ruby_scriptparameters",
            self.script_params.iter().map(JobParam::new).collect(),
        ));

        let inputs = self
            .input_files
            .iter()
            .map(|f| {
                JobParam::with_children(
                    f.selection.value_name(),
                    vec![JobParam::with_children(
                        f.source.value_name(),
                        vec![JobParam::with_children(
                            f.regex.clone(),
                            vec![JobParam::new(f.stage_as.clone())],
                        )],
                    )],
                )
            })
            .collect();
        params.append(JobParam::with_children("ruby_inputfiles", inputs));

        params.append(JobParam::with_children(
            "ruby_toolparameters",
            self.tool_params.iter().map(JobParam::new).collect(),
        ));

        let rules = self
            .copy_required
            .iter()
            .map(|r| {
                JobParam::with_children(
                    r.in_ext.clone(),
                    vec![JobParam::with_children(
                        r.out_ext.clone(),
                        vec![JobParam::new(r.filename.clone())],
                    )],
                )
            })
            .collect();
        params.append(JobParam::with_children("ruby_copyrequired", rules));

        let required = self
            .required_files
            .iter()
            .map(|(s, d)| {
                JobParam::with_children(
                    s.display().to_string(),
                    vec![JobParam::new(d.display().to_string())],
                )
            })
            .collect();
        params.append(JobParam::with_children("ruby_requiredfiles", required));

        if let Some(uuid) = self.original_uuid {
            params.append_value("original_job_uuid", uuid.to_string());
        }
        params.append_value("ruby_isuserscriptjob", if user_script { "true" } else { "false" });
        if let Some(script) = &self.script {
            params.append_value("ruby_scriptfile", script.display().to_string());
        }
        params
    }
}

fn decode_input_file(sel: &JobParam) -> Option<RubyInputFile> {
    let source = sel.children.first()?;
    let regex = source.children.first()?;
    let stage_as = regex.children.first()?;
    Some(RubyInputFile {
        selection: sel.value.parse().ok()?,
        source: source.value.parse().ok()?,
        regex: regex.value.clone(),
        stage_as: stage_as.value.clone(),
    })
}

/// Every `ruby_*` key, so they can be replaced when re-encoding.
const RUBY_KEYS: [&str; 8] = [
    "merged_ruby_jobs",
    "ruby_scriptparameters",
    "ruby_inputfiles",
    "ruby_toolparameters",
    "ruby_copyrequired",
    "ruby_requiredfiles",
    "ruby_isuserscriptjob",
    "ruby_scriptfile",
];

/// A Ruby job: one bundle, or several after merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RubyJob {
    pub bundles: Vec<RubyBundle>,
    pub user_script: bool,
}

impl RubyJob {
    pub fn from_params(params: &JobParams, user_script: bool) -> RubyJob {
        let bundles = match params.get("merged_ruby_jobs") {
            Ok(merged) => {
                let merged = merged.child_params();
                (0..)
                    .map_while(|i: usize| merged.get(&i.to_string()).ok().map(JobParam::child_params))
                    .map(|p| RubyBundle::from_params(&p))
                    .collect()
            }
            Err(_) => vec![RubyBundle::from_params(params)],
        };
        RubyJob {
            bundles,
            user_script,
        }
    }

    pub fn is_merged(&self) -> bool {
        self.bundles.len() > 1
    }

    fn first(&self) -> Option<&RubyBundle> {
        self.bundles.first()
    }

    pub fn copy_required(&self) -> &[CopyRequiredRule] {
        self.first().map(|b| b.copy_required.as_slice()).unwrap_or_default()
    }

    pub fn tool_params(&self) -> &[String] {
        self.first().map(|b| b.tool_params.as_slice()).unwrap_or_default()
    }

    /// Replace the `ruby_*` entries of `params` with this job's encoding.
    pub fn encode_into(&self, params: &mut JobParams) {
        for key in RUBY_KEYS {
            params.remove(key);
        }
        params.remove("original_job_uuid");

        match self.bundles.as_slice() {
            [single] => params.extend(&single.to_params(self.user_script)),
            bundles => {
                let children = bundles
                    .iter()
                    .enumerate()
                    .map(|(i, b)| {
                        JobParam::with_children(
                            i.to_string(),
                            b.to_params(self.user_script).params().to_vec(),
                        )
                    })
                    .collect();
                params.append(JobParam::with_children("merged_ruby_jobs", children));
                params.append_value(
                    "ruby_isuserscriptjob",
                    if self.user_script { "true" } else { "false" },
                );
            }
        }
    }

    /// Fold `child` into `self`.
    ///
    /// Scripts must share the copy-required policy and interpreter flags,
    /// and every input of the child must come from its parent, which after
    /// merging is the previous bundle.
    pub fn merge(&mut self, child: &RubyJob, child_script: Option<PathBuf>) -> std::result::Result<(), MergeJobError> {
        if self.user_script != child.user_script {
            return Err(MergeJobError::new("Ruby and UserScript jobs cannot be merged"));
        }
        if self.copy_required() != child.copy_required() {
            return Err(MergeJobError::new("copy required files policies differ"));
        }
        if self.tool_params() != child.tool_params() {
            return Err(MergeJobError::new("ruby tool parameters differ"));
        }
        if child
            .bundles
            .iter()
            .flat_map(|b| &b.input_files)
            .any(|f| f.source != FileSource::Parent)
        {
            return Err(MergeJobError::new("child selects inputs outside of its parent"));
        }

        let mut incoming = child.bundles.clone();
        if let Some(first) = incoming.first_mut() {
            if first.script.is_none() {
                first.script = child_script;
            }
            if first.script.is_none() {
                return Err(MergeJobError::new("child has no script file"));
            }
        }
        self.bundles.extend(incoming);
        Ok(())
    }
}

#[derive(Serialize)]
struct DriverEntry {
    dir: String,
    script: String,
    args: Vec<String>,
    inputs: Vec<(String, String)>,
}

const DRIVER_SOURCE: &str = r##"require 'fileutils'
require 'json'

root = Dir.pwd
jobs = JSON.parse(File.read(File.join(root, 'merged_jobs.json')))
status = 0

jobs.each_with_index do |job, i|
  dir = File.join(root, job['dir'])
  FileUtils.mkdir_p(dir)

  if i > 0
    prev = File.join(root, jobs[i - 1]['dir'])
    job['inputs'].each do |pattern, stage_as|
      re = Regexp.new(pattern)
      match = Dir.glob(File.join(prev, '**', '*')).select { |f| File.file?(f) && f =~ re }.last
      if match
        FileUtils.mkdir_p(File.dirname(File.join(dir, stage_as)))
        FileUtils.cp(match, File.join(dir, stage_as))
      end
    end
  end

  Dir.chdir(dir) do
    begin
      ARGV.replace(job['args'])
      load File.join(root, job['script'])
    rescue SystemExit => e
      status = e.status unless e.success?
    rescue Exception => e
      $stderr.puts "#{job['dir']}: #{e.class}: #{e.message}"
      status = 1
    end
  end

  break if status != 0
end

exit status
"##;

pub fn start(job: &RubyJob, ctx: &mut RunContext) -> Result<()> {
    let Some(first) = job.first() else {
        return Err(RunManagerError::BadParam("ruby job has no script".into()));
    };
    ctx.tool(RUBY, &ToolVersion::any())?;

    let mut args = first.tool_params.clone();

    if job.is_merged() {
        let mut plan = Vec::with_capacity(job.bundles.len());
        for (i, bundle) in job.bundles.iter().enumerate() {
            let dir = format!("mergedjob-{i}");
            let script = stage_bundle(ctx, bundle, i, Path::new(&dir))?;
            plan.push(DriverEntry {
                dir,
                script,
                args: bundle.script_params.clone(),
                inputs: bundle
                    .input_files
                    .iter()
                    .map(|f| (f.regex.clone(), f.stage_as.clone()))
                    .collect(),
            });
        }
        let plan = serde_json::to_string_pretty(&plan)?;
        std::fs::write(ctx.out_path(DRIVER_PLAN), plan)?;
        std::fs::write(ctx.out_path(DRIVER_SCRIPT), DRIVER_SOURCE)?;
        info!(job = %ctx.job_uuid(), bundles = job.bundles.len(), "running merged ruby jobs");
        args.push(DRIVER_SCRIPT.to_string());
    } else {
        let script = stage_bundle(ctx, first, 0, Path::new(""))?;
        args.push(script);
        args.extend(first.script_params.iter().cloned());
    }

    for rule in &first.copy_required {
        match ctx.inputs.get_last_by_extension(&rule.in_ext) {
            Ok(source) => {
                let target = (!rule.filename.is_empty()).then(|| PathBuf::from(&rule.filename));
                ctx.copy_required_files(&source, rule.out_ext.clone(), target);
            }
            Err(_) => debug!(job = %ctx.job_uuid(), ext = %rule.in_ext, "no input to copy required files from"),
        }
    }

    ctx.add_step(ToolStep::new(RUBY, ToolVersion::any()).args(args));
    Ok(())
}

/// Stage one bundle under `dir`; returns the script path relative to `dir`.
fn stage_bundle(ctx: &mut RunContext, bundle: &RubyBundle, index: usize, dir: &Path) -> Result<String> {
    let script = match &bundle.script {
        Some(path) => {
            let path = if path.is_relative() && !ctx.base_path.as_os_str().is_empty() {
                ctx.base_path.join(path)
            } else {
                path.clone()
            };
            // Prefer the input entry for the script: it carries required files.
            ctx.inputs
                .iter()
                .rev()
                .find(|f| f.full_path == path)
                .cloned()
                .unwrap_or_else(|| FileInfo::new(path, "rb"))
        }
        None if index == 0 => ctx.memoized("rb", |inputs: &Files| inputs.get_last_by_extension("rb"))?,
        None => {
            return Err(RunManagerError::BadParam(format!(
                "merged ruby job {index} has no script"
            )));
        }
    };

    let script_name = script.filename.clone();
    ctx.add_required_file_info(&script, dir.join(&script_name));

    for (source, target) in &bundle.required_files {
        ctx.add_required_file(source.clone(), dir.join(target));
    }

    // Later bundles get their inputs from the previous bundle at run time.
    if index == 0 {
        for input in &bundle.input_files {
            let re = Regex::new(&input.regex).map_err(|e| {
                RunManagerError::BadParam(format!("bad input file regex '{}': {e}", input.regex))
            })?;
            let pool = match input.source {
                FileSource::Parent => ctx.parent_files(),
                FileSource::All => ctx.inputs.clone(),
            };
            match input.selection {
                FileSelection::Last => {
                    let file = pool.get_last_by_regex(&re)?;
                    ctx.add_required_file_info(&file, dir.join(&input.stage_as));
                }
                FileSelection::All => {
                    for file in pool.get_all_by_regex(&re).iter() {
                        ctx.add_required_file_info(file, dir.join(&input.stage_as).join(&file.filename));
                    }
                }
            }
        }
    }

    Ok(dir.join(script_name).to_string_lossy().replace('\\', "/"))
}

/// Order outputs so the last merged bundle's files are found first by
/// `get_last_*` lookups.
pub fn output_files(_job: &RubyJob, _ctx: &RunContext, files: Files) -> Files {
    let mut files: Vec<FileInfo> = files.into_iter().collect();
    files.sort_by_key(|f| merged_index(&f.full_path).map_or(0, |i| i + 1));
    files.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(script: &str) -> RubyBundle {
        RubyBundle {
            script: Some(PathBuf::from(script)),
            script_params: vec!["--verbose".into()],
            input_files: vec![RubyInputFile {
                selection: FileSelection::Last,
                source: FileSource::Parent,
                regex: r".*\.osm".into(),
                stage_as: "in.osm".into(),
            }],
            copy_required: vec![CopyRequiredRule {
                in_ext: "osm".into(),
                out_ext: "osm".into(),
                filename: "in.epw".into(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn bundle_survives_param_encoding() {
        let mut b = bundle("measure.rb");
        b.required_files.push((PathBuf::from("/lib/helper.rb"), PathBuf::from("helper.rb")));
        b.original_uuid = Some(Uuid::new_v4());

        let decoded = RubyBundle::from_params(&b.to_params(false));
        assert_eq!(decoded, b);
    }

    #[test]
    fn merged_jobs_encode_as_indexed_bundles() {
        let mut job = RubyJob {
            bundles: vec![bundle("a.rb")],
            user_script: false,
        };
        job.merge(
            &RubyJob {
                bundles: vec![bundle("b.rb")],
                user_script: false,
            },
            None,
        )
        .unwrap();

        let mut params = JobParams::new();
        params.append_value("outdir", "/tmp");
        job.encode_into(&mut params);

        assert!(params.has("outdir"));
        let merged = params.get("merged_ruby_jobs").unwrap();
        assert_eq!(merged.children.len(), 2);
        assert_eq!(merged.children[1].value, "1");

        let back = RubyJob::from_params(&params, false);
        assert_eq!(back, job);
    }

    #[test]
    fn merge_requires_same_copy_policy() {
        let mut parent = RubyJob {
            bundles: vec![bundle("a.rb")],
            user_script: false,
        };
        let mut other = bundle("b.rb");
        other.copy_required.clear();
        let err = parent
            .merge(
                &RubyJob {
                    bundles: vec![other],
                    user_script: false,
                },
                None,
            )
            .unwrap_err();
        assert!(err.0.contains("copy required"));
        assert_eq!(parent.bundles.len(), 1);
    }
}
