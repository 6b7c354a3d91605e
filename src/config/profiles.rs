//! Local AWS profile discovery and the region catalogue

use crate::error::{IdcError, Result};
use directories::BaseDirs;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Commercial regions offered on the region screen
pub const REGIONS: &[&str] = &[
    "af-south-1",
    "ap-east-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ca-central-1",
    "eu-central-1",
    "eu-central-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-north-1",
    "eu-south-1",
    "eu-south-2",
    "il-central-1",
    "me-central-1",
    "me-south-1",
    "sa-east-1",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
];

/// `~/.aws/config` and `~/.aws/credentials`
pub fn default_profile_files() -> Result<Vec<PathBuf>> {
    let base = BaseDirs::new()
        .ok_or_else(|| IdcError::Config("Failed to determine home directory".into()))?;
    let aws_dir = base.home_dir().join(".aws");
    Ok(vec![aws_dir.join("config"), aws_dir.join("credentials")])
}

/// Sorted, de-duplicated profile names; missing files contribute nothing
pub fn load_profiles_from(paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut profiles = BTreeSet::new();
    for path in paths {
        match read_profile_file(path) {
            Ok(names) => profiles.extend(names),
            Err(IdcError::Io(e)) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(profiles.into_iter().collect())
}

fn read_profile_file(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(parse_profile_sections(&contents))
}

/// Section headers of an INI-style AWS file, with `profile ` prefixes removed
pub fn parse_profile_sections(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(|line| line.strip_prefix('[')?.strip_suffix(']'))
        .map(|name| {
            let name = name.trim();
            name.strip_prefix("profile ").unwrap_or(name).to_string()
        })
        .filter(|name| !name.is_empty())
        .collect()
}
