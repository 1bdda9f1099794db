use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::error::{RosError, RosResult};

/// sibling path used while a file is being written
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// sibling path holding a fetched file that does not cover its request
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// Write the bytes produced by `write_fn` next to `path`, then rename over it.
/// Readers never observe a partially written file.
pub fn write_atomically<F>(path: &Path, write_fn: F) -> RosResult<()>
where
    F: FnOnce(&mut fs::File) -> RosResult<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = temp_path(path);
    let result = fs::File::create(&tmp)
        .map_err(RosError::from)
        .and_then(|mut file| {
            write_fn(&mut file)?;
            file.flush()?;
            file.sync_all()?;
            Ok(())
        });
    if let Err(err) = result {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Decode CF time units such as `hours since 1900-01-01 00:00:00`
/// into the size of one unit and the reference instant.
pub fn parse_time_units(units: &str) -> RosResult<(Duration, DateTime<Utc>)> {
    let bad = || RosError::format("time units", format!("unsupported time units '{}'", units));
    let (unit, reference) = units.split_once(" since ").ok_or_else(bad)?;
    let step = match unit.trim() {
        "seconds" | "second" | "s" => Duration::seconds(1),
        "minutes" | "minute" => Duration::minutes(1),
        "hours" | "hour" | "h" => Duration::hours(1),
        "days" | "day" | "d" => Duration::days(1),
        _ => return Err(bad()),
    };
    let reference = reference.trim().trim_end_matches('Z').trim_end_matches(" UTC");
    let parsed = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(reference, fmt).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(reference, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(bad)?;
    Ok((step, parsed.and_utc()))
}
