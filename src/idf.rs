// src/idf.rs

//! The few pieces of IDF text the engine needs to read or rewrite.
//!
//! Everything else about IDF files is opaque: the version token (tool
//! selection), the weather-file comment (weather discovery), the
//! `Output:SQLite` object (preprocessing) and the `RunPeriod` object
//! (parallel partitioning).

use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;

use crate::errors::{Result, RunManagerError};
use crate::tools::ToolVersion;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*version\s*,\s*([0-9]+(?:\.[0-9]+)*)\s*;").expect("valid regex")
});

static WEATHER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*!\s*weather\s*file\s*[:=]\s*(\S+\.epw)\s*$").expect("valid regex")
});

static RUNPERIOD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*runperiod\s*,").expect("valid regex"));

/// Schema version declared by the `Version` object, if any.
pub fn idf_version(text: &str) -> Option<ToolVersion> {
    let caps = VERSION_RE.captures(text)?;
    caps.get(1)?.as_str().parse().ok()
}

/// Weather file named in a `! Weather File: foo.epw` comment.
pub fn weather_file_comment(text: &str) -> Option<String> {
    WEATHER_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether an object of class `class` is present (case-insensitive).
pub fn has_object(text: &str, class: &str) -> bool {
    text.lines()
        .map(strip_comment)
        .any(|line| {
            let line = line.trim_start();
            match (line.get(..class.len()), line.get(class.len()..)) {
                (Some(head), Some(rest)) => {
                    head.eq_ignore_ascii_case(class) && rest.trim_start().starts_with([',', ';'])
                }
                _ => false,
            }
        })
}

/// Begin/end of a simulation run period in a non-leap year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPeriod {
    pub begin_month: u32,
    pub begin_day: u32,
    pub end_month: u32,
    pub end_day: u32,
}

impl RunPeriod {
    fn begin(&self) -> Result<NaiveDate> {
        date(self.begin_month, self.begin_day)
    }

    fn end(&self) -> Result<NaiveDate> {
        date(self.end_month, self.end_day)
    }

    pub fn days(&self) -> Result<i64> {
        Ok((self.end()? - self.begin()?).num_days() + 1)
    }

    /// Split into at most `n` contiguous, non-overlapping periods.
    pub fn split(&self, n: usize) -> Result<Vec<RunPeriod>> {
        if n == 0 {
            return Err(RunManagerError::BadParam(
                "number of partitions must be >= 1".to_string(),
            ));
        }
        let begin = self.begin()?;
        let total = self.days()?;
        if total <= 0 {
            return Err(RunManagerError::BadParam(
                "run period ends before it begins".to_string(),
            ));
        }

        let n = (n as i64).min(total);
        let base = total / n;
        let extra = total % n;

        let mut out = Vec::with_capacity(n as usize);
        let mut start = begin;
        for i in 0..n {
            let len = base + if i < extra { 1 } else { 0 };
            let stop = start + Duration::days(len - 1);
            out.push(RunPeriod {
                begin_month: start.month(),
                begin_day: start.day(),
                end_month: stop.month(),
                end_day: stop.day(),
            });
            start = stop + Duration::days(1);
        }
        Ok(out)
    }
}

fn date(month: u32, day: u32) -> Result<NaiveDate> {
    // 2013 is not a leap year, matching the default simulation calendar.
    NaiveDate::from_ymd_opt(2013, month, day).ok_or_else(|| {
        RunManagerError::BadParam(format!("invalid run period date {month}/{day}"))
    })
}

/// Location of the `RunPeriod` object in the text and its parsed fields.
struct RunPeriodObject {
    start: usize,
    end: usize,
    fields: Vec<String>,
}

fn find_run_period(text: &str) -> Result<RunPeriodObject> {
    let m = RUNPERIOD_RE
        .find(text)
        .ok_or_else(|| RunManagerError::BadParam("idf has no RunPeriod object".to_string()))?;

    // Start of the line holding the class name.
    let start = text[..m.end()].rfind('\n').map(|i| i + 1).unwrap_or(0);

    let mut body = String::new();
    let mut end = None;
    let mut offset = start;
    for line in text[start..].split_inclusive('\n') {
        let code = strip_comment(line);
        if let Some(pos) = code.find(';') {
            body.push_str(&code[..pos]);
            end = Some(offset + line.len());
            break;
        }
        body.push_str(code);
        offset += line.len();
    }

    let end = end.ok_or_else(|| {
        RunManagerError::BadParam("RunPeriod object is not terminated".to_string())
    })?;

    let fields = body.split(',').map(|f| f.trim().to_string()).collect();
    Ok(RunPeriodObject { start, end, fields })
}

/// Parse the run period of the first `RunPeriod` object.
pub fn run_period(text: &str) -> Result<RunPeriod> {
    let obj = find_run_period(text)?;
    let field = |i: usize| -> Result<u32> {
        obj.fields
            .get(i)
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| RunManagerError::BadParam(format!("RunPeriod field {i} is missing or invalid")))
    };
    // Fields: class, name, begin month, begin day, end month, end day, ...
    Ok(RunPeriod {
        begin_month: field(2)?,
        begin_day: field(3)?,
        end_month: field(4)?,
        end_day: field(5)?,
    })
}

/// Return `text` with its `RunPeriod` dates replaced by `period`.
pub fn with_run_period(text: &str, period: &RunPeriod) -> Result<String> {
    let mut obj = find_run_period(text)?;
    if obj.fields.len() < 6 {
        return Err(RunManagerError::BadParam(
            "RunPeriod object has too few fields".to_string(),
        ));
    }
    obj.fields[2] = period.begin_month.to_string();
    obj.fields[3] = period.begin_day.to_string();
    obj.fields[4] = period.end_month.to_string();
    obj.fields[5] = period.end_day.to_string();

    let mut rendered = String::new();
    rendered.push_str(&obj.fields[0]);
    rendered.push(',');
    let last = obj.fields.len() - 1;
    for (i, f) in obj.fields.iter().enumerate().skip(1) {
        rendered.push_str("\n    ");
        rendered.push_str(f);
        rendered.push(if i == last { ';' } else { ',' });
    }
    rendered.push('\n');

    let mut out = String::with_capacity(text.len() + 16);
    out.push_str(&text[..obj.start]);
    out.push_str(&rendered);
    out.push_str(&text[obj.end..]);
    Ok(out)
}

fn strip_comment(line: &str) -> &str {
    match line.find('!') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDF: &str = "\
! Weather File: Chicago_OHare.epw
Version,8.1;

RunPeriod,   ! comment with ; in it
    Annual,  !- Name
    1,       !- Begin Month
    1,       !- Begin Day
    12,      !- End Month
    31,      !- End Day
    UseWeatherFile;

Output:SQLite,SimpleAndTabular;
";

    #[test]
    fn reads_metadata() {
        assert_eq!(idf_version(IDF), Some(ToolVersion::new(8, 1)));
        assert_eq!(weather_file_comment(IDF).as_deref(), Some("Chicago_OHare.epw"));
        assert!(has_object(IDF, "Output:SQLite"));
        assert!(!has_object(IDF, "Output:Variable"));
    }

    #[test]
    fn splits_the_year_into_contiguous_periods() {
        let rp = run_period(IDF).unwrap();
        assert_eq!(rp.days().unwrap(), 365);

        let parts = rp.split(4).unwrap();
        assert_eq!(parts.len(), 4);
        let total: i64 = parts.iter().map(|p| p.days().unwrap()).sum();
        assert_eq!(total, 365);
        assert_eq!((parts[0].begin_month, parts[0].begin_day), (1, 1));
        assert_eq!((parts[3].end_month, parts[3].end_day), (12, 31));
    }

    #[test]
    fn rewrites_run_period_in_place() {
        let period = RunPeriod { begin_month: 7, begin_day: 1, end_month: 7, end_day: 31 };
        let rewritten = with_run_period(IDF, &period).unwrap();
        assert_eq!(run_period(&rewritten).unwrap(), period);
        assert!(rewritten.contains("Output:SQLite"));
        assert!(rewritten.starts_with("! Weather File"));
    }
}
