// src/params.rs

//! Hierarchical job parameters.
//!
//! A parameter is a value with ordered children, so `outdir = "/tmp/run"` is
//! stored as `JobParam { value: "outdir", children: [JobParam("/tmp/run")] }`.
//! Lookups are last-match-wins, which lets a child job override a value it
//! inherited from its parent simply by appending.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RunManagerError};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobParam {
    pub value: String,
    #[serde(default)]
    pub children: Vec<JobParam>,
}

impl JobParam {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(value: impl Into<String>, children: Vec<JobParam>) -> Self {
        Self {
            value: value.into(),
            children,
        }
    }

    /// The children of this parameter, viewed as their own parameter list.
    pub fn child_params(&self) -> JobParams {
        JobParams {
            params: self.children.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobParams {
    params: Vec<JobParam>,
}

impl JobParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_params(params: Vec<JobParam>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &[JobParam] {
        &self.params
    }

    pub fn append(&mut self, param: JobParam) {
        self.params.push(param);
    }

    /// Append `key` with a single child `value`.
    pub fn append_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.params
            .push(JobParam::with_children(key, vec![JobParam::new(value)]));
    }

    /// Append `key` with one child per value.
    pub fn append_values<I, S>(&mut self, key: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let children = values.into_iter().map(JobParam::new).collect();
        self.params.push(JobParam::with_children(key, children));
    }

    pub fn extend(&mut self, other: &JobParams) {
        self.params.extend(other.params.iter().cloned());
    }

    pub fn has(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.value == name)
    }

    /// Last parameter named `name`.
    pub fn get(&self, name: &str) -> Result<&JobParam> {
        self.params
            .iter()
            .rev()
            .find(|p| p.value == name)
            .ok_or_else(|| RunManagerError::ParamNotFound(name.to_string()))
    }

    /// First child value of the last parameter named `name`.
    pub fn get_single(&self, name: &str) -> Result<String> {
        let param = self.get(name)?;
        param
            .children
            .first()
            .map(|c| c.value.clone())
            .ok_or_else(|| RunManagerError::BadParam(format!("parameter '{name}' has no value")))
    }

    /// Like [`get_single`](Self::get_single) but `None` when absent.
    pub fn get_opt(&self, name: &str) -> Option<String> {
        self.get_single(name).ok()
    }

    /// Child values of the last parameter named `name`, or empty.
    pub fn get_values(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|p| p.children.iter().map(|c| c.value.clone()).collect())
            .unwrap_or_default()
    }

    /// Remove every parameter named `name`.
    pub fn remove(&mut self, name: &str) {
        self.params.retain(|p| p.value != name);
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_match_wins() {
        let mut params = JobParams::new();
        params.append_value("outdir", "/a");
        params.append_value("epwdir", "/w");
        params.append_value("outdir", "/b");
        assert_eq!(params.get_single("outdir").unwrap(), "/b");
        assert_eq!(params.get_single("epwdir").unwrap(), "/w");
    }

    #[test]
    fn missing_param_is_an_error() {
        let params = JobParams::new();
        assert!(matches!(
            params.get("nope"),
            Err(RunManagerError::ParamNotFound(_))
        ));
        assert!(params.get_values("nope").is_empty());
    }

    #[test]
    fn remove_drops_all_occurrences() {
        let mut params = JobParams::new();
        params.append_value("x", "1");
        params.append_value("x", "2");
        params.append_values("y", ["a", "b"]);
        params.remove("x");
        assert!(!params.has("x"));
        assert_eq!(params.get_values("y"), ["a", "b"]);
    }
}
