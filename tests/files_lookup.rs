// tests/files_lookup.rs

use proptest::prelude::*;
use regex::Regex;

use runmanager::files::{FileInfo, Files};

const EXTENSIONS: &[&str] = &["idf", "IDF", "osm", "sql", "epw"];

/// Non-existent paths are fine here: lookups never touch the disk.
fn file_strategy() -> impl Strategy<Value = FileInfo> {
    (0..4usize, 0..EXTENSIONS.len(), 0..3usize).prop_map(|(dir, ext, key)| {
        FileInfo::new(
            format!("/nowhere/d{dir}/in.{}", EXTENSIONS[ext]),
            format!("key{key}"),
        )
    })
}

fn files_strategy() -> impl Strategy<Value = Vec<FileInfo>> {
    proptest::collection::vec(file_strategy(), 0..12)
}

proptest! {
    #[test]
    fn last_by_key_is_the_last_appended_match(entries in files_strategy(), key in 0..3usize) {
        let files: Files = entries.iter().cloned().collect();
        let key = format!("key{key}");

        let expected = entries.iter().rev().find(|f| f.key == key);
        match (files.get_last_by_key(&key), expected) {
            (Ok(found), Some(want)) => prop_assert_eq!(&found, want),
            (Err(_), None) => {}
            (got, want) => prop_assert!(false, "got {:?}, wanted {:?}", got, want),
        }
    }

    #[test]
    fn extension_lookup_ignores_case_and_leading_dot(entries in files_strategy()) {
        let files: Files = entries.iter().cloned().collect();
        let all = files.get_all_by_extension(".IDF");

        let expected: Vec<&FileInfo> = entries
            .iter()
            .filter(|f| f.full_path.to_string_lossy().to_lowercase().ends_with(".idf"))
            .collect();
        prop_assert_eq!(all.len(), expected.len());
        for (got, want) in all.iter().zip(expected) {
            prop_assert_eq!(got, want);
        }
        let last = files.get_last_by_extension("idf").ok();
        prop_assert_eq!(last.as_ref(), all.files().last());
    }

    #[test]
    fn dedup_keeps_first_occurrences_in_order(entries in files_strategy()) {
        let files: Files = entries.iter().cloned().collect();
        let deduped = files.dedup();

        let mut seen: Vec<FileInfo> = Vec::new();
        for f in &entries {
            if !seen.contains(f) {
                seen.push(f.clone());
            }
        }
        prop_assert_eq!(deduped.files(), seen.as_slice());
        prop_assert_eq!(deduped.dedup(), deduped);
    }
}

#[test]
fn missing_lookups_name_the_criterion() {
    let files = Files::new();
    let err = files.get_last_by_filename("eplusout.sql").unwrap_err();
    assert!(err.to_string().contains("filename 'eplusout.sql'"));
    assert!(files.get_all_by_key("idf").is_empty());
}

#[test]
fn regex_lookup_matches_the_full_path() {
    let files: Files = [
        FileInfo::from_path("/runs/a/eplusout.sql"),
        FileInfo::from_path("/runs/b/eplusout.sql"),
        FileInfo::from_path("/runs/b/eplusout.err"),
    ]
    .into_iter()
    .collect();

    let re = Regex::new(r"/b/.*\.sql$").unwrap();
    let found = files.get_last_by_regex(&re).unwrap();
    assert_eq!(found.full_path.to_str(), Some("/runs/b/eplusout.sql"));
    assert_eq!(files.get_all_by_regex(&Regex::new("eplusout").unwrap()).len(), 3);
}

#[test]
fn relative_entries_are_completed_against_a_base() {
    let mut files = Files::new();
    files.append(FileInfo::from_path("model/in.osm"));
    files.append(FileInfo::from_path("/abs/weather.epw"));

    let done = files.complete(std::path::Path::new("/project"));
    let paths: Vec<_> = done.iter().map(|f| f.full_path.clone()).collect();
    assert_eq!(
        paths,
        [
            std::path::PathBuf::from("/project/model/in.osm"),
            std::path::PathBuf::from("/abs/weather.epw"),
        ]
    );
    assert_eq!(done.get_last_by_extension("osm").unwrap().key, "osm");
}
