use std::fmt::Display;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use roscube::{modules::cache::merge::TableSlice, ErrorReport, RosError};

#[derive(Debug)]
pub struct CliError {
    msg: String,
    report: Option<ErrorReport>,
}

impl CliError {
    /// structured form printed on failure
    pub fn report(&self) -> ErrorReport {
        self.report.clone().unwrap_or_else(|| ErrorReport {
            kind: "Config".into(),
            message: self.msg.clone(),
        })
    }
}

impl From<String> for CliError {
    fn from(msg: String) -> Self {
        CliError { msg, report: None }
    }
}

impl From<&str> for CliError {
    fn from(msg: &str) -> Self {
        CliError {
            msg: msg.into(),
            report: None,
        }
    }
}

impl From<RosError> for CliError {
    fn from(err: RosError) -> Self {
        CliError {
            msg: err.to_string(),
            report: Some(ErrorReport::from(&err)),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg)
    }
}

/// One output line: position, duration, then every column in slice order
type SliceRecord = (f32, f32, u32, Vec<Option<f32>>);

/// Write the slice rows holding any value, after a header naming the columns.
/// Missing values are left empty.
pub fn write_slice<W: Write>(slice: &TableSlice, writer: &mut csv::Writer<W>) -> csv::Result<usize> {
    let header = ["latitude", "longitude", "duration"]
        .into_iter()
        .chain(slice.columns.keys().map(|k| k.as_str()));
    writer.write_record(header)?;

    let rows = slice.rows();
    for (lat, lon, duration, values) in &rows {
        let record: SliceRecord = (
            *lat,
            *lon,
            *duration,
            values.iter().map(|v| if v.is_nan() { None } else { Some(*v) }).collect(),
        );
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(rows.len())
}

pub fn write_csv(slice: &TableSlice, path: &Path) -> Result<usize, CliError> {
    let file = File::create(path)
        .map_err(|err| format!("Cannot create output file {}: {}", path.display(), err))?;
    let mut writer = csv::Writer::from_writer(file);
    write_slice(slice, &mut writer).map_err(|err| CliError::from(format!("Cannot write {}: {}", path.display(), err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ndarray::Array3;
    use roscube::models::grid::{BoundingBox, SpatialGrid};
    use std::collections::BTreeMap;

    fn slice() -> TableSlice {
        let grid = SpatialGrid::new(&BoundingBox::new(41.0, -9.0, 40.0, -9.0).unwrap(), 1.0).unwrap();
        let mut rate = Array3::from_elem((2, 1, 1), f32::NAN);
        rate[[0, 0, 0]] = 1.5;
        let mut wind = Array3::from_elem((2, 1, 1), f32::NAN);
        wind[[0, 0, 0]] = 12.0;
        wind[[1, 0, 0]] = 8.25;
        TableSlice {
            start_time: Utc.with_ymd_and_hms(2023, 8, 15, 14, 0, 0).unwrap(),
            offset: 0,
            grid,
            durations: vec![1],
            columns: BTreeMap::from([
                ("rate, \"m/h\"".to_string(), rate),
                ("wv100_kh".to_string(), wind),
            ]),
        }
    }

    #[test]
    fn column_names_are_quoted_and_missing_values_left_empty() {
        let mut writer = csv::Writer::from_writer(vec![]);
        let written = write_slice(&slice(), &mut writer).unwrap();
        assert_eq!(written, 2);
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "latitude,longitude,duration,\"rate, \"\"m/h\"\"\",wv100_kh");
        assert_eq!(lines[1], "41.0,-9.0,1,1.5,12.0");
        assert_eq!(lines[2], "40.0,-9.0,1,,8.25");
    }

    #[test]
    fn output_reads_back_with_the_same_shape() {
        let mut writer = csv::Writer::from_writer(vec![]);
        write_slice(&slice(), &mut writer).unwrap();
        let bytes = writer.into_inner().unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        assert_eq!(reader.headers().unwrap().len(), 5);
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[1][3], "");
    }
}
