// src/tools.rs

//! External tool descriptors and the registry jobs resolve them from.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RunManagerError};

/// `major.minor.patch.build`, each part optional.
///
/// A partially specified version acts as a prefix when matching: `8.1`
/// matches `8.1.0.009` but not `8.2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ToolVersion {
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub patch: Option<u32>,
    pub build: Option<u32>,
}

impl ToolVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self {
            major: Some(major),
            minor: Some(minor),
            patch: None,
            build: None,
        }
    }

    /// Any version.
    pub fn any() -> Self {
        Self::default()
    }

    fn parts(&self) -> [Option<u32>; 4] {
        [self.major, self.minor, self.patch, self.build]
    }

    /// True if every component specified in `requested` equals ours.
    pub fn matches(&self, requested: &ToolVersion) -> bool {
        self.parts()
            .iter()
            .zip(requested.parts().iter())
            .all(|(have, want)| want.is_none() || have == want)
    }

    pub fn is_empty(&self) -> bool {
        self.parts().iter().all(Option::is_none)
    }
}

impl PartialOrd for ToolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ToolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Option ordering puts None before Some, so a missing part sorts low.
        self.parts().cmp(&other.parts())
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .parts()
            .iter()
            .map_while(|p| p.map(|v| v.to_string()))
            .collect();
        if parts.is_empty() {
            f.write_str("any")
        } else {
            f.write_str(&parts.join("."))
        }
    }
}

impl FromStr for ToolVersion {
    type Err = RunManagerError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "any" {
            return Ok(ToolVersion::any());
        }

        let mut parts = [None; 4];
        for (i, piece) in trimmed.split('.').enumerate() {
            if i >= 4 {
                return Err(RunManagerError::BadParam(format!(
                    "tool version has too many components: {s}"
                )));
            }
            let value = piece.trim().parse::<u32>().map_err(|_| {
                RunManagerError::BadParam(format!("invalid tool version component '{piece}' in {s}"))
            })?;
            parts[i] = Some(value);
        }

        Ok(ToolVersion {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
            build: parts[3],
        })
    }
}

/// One external executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: ToolVersion,
    pub local_bin_path: PathBuf,
    #[serde(default)]
    pub remote_executable: bool,
    /// Regex for output files the tool leaves behind that cleanup may delete.
    #[serde(default)]
    pub out_file_filter: Option<String>,
}

impl ToolInfo {
    pub fn new(name: impl Into<String>, version: ToolVersion, local_bin_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version,
            local_bin_path: local_bin_path.into(),
            remote_executable: false,
            out_file_filter: None,
        }
    }

    /// Directory holding the executable, used for helper lookup and `PATH`.
    pub fn tool_dir(&self) -> &Path {
        self.local_bin_path.parent().unwrap_or_else(|| Path::new(""))
    }
}

/// Registry of available tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tools {
    tools: Vec<ToolInfo>,
}

impl Tools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, tool: ToolInfo) {
        self.tools.push(tool);
    }

    pub fn extend(&mut self, other: &Tools) {
        self.tools.extend(other.tools.iter().cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolInfo> {
        self.tools.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Newest tool called `name` whose version matches the requested prefix.
    pub fn get_tool(&self, name: &str, version: &ToolVersion) -> Result<ToolInfo> {
        self.tools
            .iter()
            .filter(|t| t.name.eq_ignore_ascii_case(name) && t.version.matches(version))
            .max_by(|a, b| a.version.cmp(&b.version))
            .cloned()
            .ok_or_else(|| RunManagerError::ToolNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    pub fn get_all_by_name(&self, name: &str) -> Tools {
        Tools {
            tools: self
                .tools
                .iter()
                .filter(|t| t.name.eq_ignore_ascii_case(name))
                .cloned()
                .collect(),
        }
    }
}

impl FromIterator<ToolInfo> for Tools {
    fn from_iter<T: IntoIterator<Item = ToolInfo>>(iter: T) -> Self {
        Tools {
            tools: iter.into_iter().collect(),
        }
    }
}
