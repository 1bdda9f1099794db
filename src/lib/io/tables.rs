//! `.rct` table files: a gzip stream holding the `RCT1` magic, the length of a
//! JSON header (u32, little endian), the header, then one block of little
//! endian f32 values per column in C order.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use chrono::{DateTime, Utc};
use libflate::gzip::{Decoder, Encoder};
use log::debug;
use ndarray::{Array3, Array5};
use serde_derive::{Deserialize, Serialize};

use crate::{
    error::{RosError, RosResult},
    io::helpers::write_atomically,
    models::{
        grid::SpatialGrid,
        table::{CacheTable, HourlyStore},
    },
    version::{TABLE_FORMAT, VERSION},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TableKind {
    Cache,
    Hourly,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableHeader {
    kind: TableKind,
    writer: String,
    lats: Vec<f32>,
    lons: Vec<f32>,
    times: Vec<DateTime<Utc>>,
    #[serde(default)]
    durations: Vec<u32>,
    #[serde(default)]
    offsets: Vec<u32>,
    columns: Vec<String>,
}

fn write_values<'a, W, I>(writer: &mut W, values: I) -> io::Result<()>
where
    W: Write,
    I: Iterator<Item = &'a f32>,
{
    for value in values {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

fn read_values<R: Read>(reader: &mut R, len: usize) -> io::Result<Vec<f32>> {
    let mut buffer: Vec<u8> = vec![0; len * 4];
    reader.read_exact(&mut buffer)?;
    Ok(buffer
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn write_table<F>(path: &Path, header: &TableHeader, write_columns: F) -> RosResult<()>
where
    F: FnOnce(&mut Encoder<BufWriter<&mut File>>) -> io::Result<()>,
{
    let header_bytes =
        serde_json::to_vec(header).map_err(|err| RosError::format(path.display().to_string(), err))?;
    write_atomically(path, |file| {
        let mut encoder = Encoder::new(BufWriter::new(file))?;
        encoder.write_all(TABLE_FORMAT.as_bytes())?;
        encoder.write_all(&(header_bytes.len() as u32).to_le_bytes())?;
        encoder.write_all(&header_bytes)?;
        write_columns(&mut encoder)?;
        let mut inner = encoder.finish().into_result()?;
        inner.flush()?;
        Ok(())
    })
}

fn read_header<R: Read>(decoder: &mut R, origin: &str) -> RosResult<TableHeader> {
    let mut magic = [0u8; 4];
    decoder.read_exact(&mut magic)?;
    if magic != TABLE_FORMAT.as_bytes() {
        return Err(RosError::format(origin, "not a cache table file"));
    }
    let mut len = [0u8; 4];
    decoder.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    let mut header = vec![0u8; len];
    decoder.read_exact(&mut header)?;
    serde_json::from_slice(&header).map_err(|err| RosError::format(origin, err))
}

fn open_table(path: &Path) -> RosResult<(Decoder<BufReader<File>>, TableHeader)> {
    let origin = path.display().to_string();
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?;
    let header = read_header(&mut decoder, &origin)?;
    Ok((decoder, header))
}

pub fn write_cache_table(path: &Path, table: &CacheTable) -> RosResult<()> {
    table.validate()?;
    let header = TableHeader {
        kind: TableKind::Cache,
        writer: VERSION.to_string(),
        lats: table.grid.lats().to_vec(),
        lons: table.grid.lons().to_vec(),
        times: table.start_times.clone(),
        durations: table.durations.clone(),
        offsets: table.offsets.clone(),
        columns: table.column_names(),
    };
    debug!(
        "[RCT] writing cache table {:?} with {} columns to {}",
        table.dim(),
        table.columns.len(),
        path.display()
    );
    write_table(path, &header, |encoder| {
        for data in table.columns.values() {
            write_values(encoder, data.iter())?;
        }
        Ok(())
    })
}

pub fn read_cache_table(path: &Path) -> RosResult<CacheTable> {
    let origin = path.display().to_string();
    let (mut decoder, header) = open_table(path)?;
    if header.kind != TableKind::Cache {
        return Err(RosError::format(&origin, "file holds an hourly store"));
    }
    let grid = SpatialGrid::from_coords(header.lats, header.lons)?;
    let (rows, cols) = grid.shape();
    let dim = (
        header.times.len(),
        rows,
        cols,
        header.durations.len(),
        header.offsets.len(),
    );
    let len = dim.0 * dim.1 * dim.2 * dim.3 * dim.4;

    let mut columns = BTreeMap::new();
    for name in header.columns {
        let values = read_values(&mut decoder, len)?;
        let data = Array5::from_shape_vec(dim, values).map_err(|err| RosError::format(&origin, err))?;
        columns.insert(name, data);
    }
    let table = CacheTable {
        start_times: header.times,
        grid,
        durations: header.durations,
        offsets: header.offsets,
        columns,
    };
    table.validate()?;
    Ok(table)
}

pub fn write_hourly_store(path: &Path, store: &HourlyStore) -> RosResult<()> {
    store.validate()?;
    let header = TableHeader {
        kind: TableKind::Hourly,
        writer: VERSION.to_string(),
        lats: store.grid.lats().to_vec(),
        lons: store.grid.lons().to_vec(),
        times: store.times.clone(),
        durations: vec![],
        offsets: vec![],
        columns: store.variables.keys().cloned().collect(),
    };
    write_table(path, &header, |encoder| {
        for data in store.variables.values() {
            write_values(encoder, data.iter())?;
        }
        Ok(())
    })
}

pub fn read_hourly_store(path: &Path) -> RosResult<HourlyStore> {
    let origin = path.display().to_string();
    let (mut decoder, header) = open_table(path)?;
    if header.kind != TableKind::Hourly {
        return Err(RosError::format(&origin, "file holds a cache table"));
    }
    let grid = SpatialGrid::from_coords(header.lats, header.lons)?;
    let (rows, cols) = grid.shape();
    let dim = (header.times.len(), rows, cols);

    let mut variables = BTreeMap::new();
    for name in header.columns {
        let values = read_values(&mut decoder, dim.0 * dim.1 * dim.2)?;
        let data = Array3::from_shape_vec(dim, values).map_err(|err| RosError::format(&origin, err))?;
        variables.insert(name, data);
    }
    let store = HourlyStore {
        times: header.times,
        grid,
        variables,
    };
    store.validate()?;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::grid::BoundingBox;
    use chrono::TimeZone;

    fn tmp_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("roscube-tables-{}-{}", std::process::id(), name))
    }

    #[test]
    fn cache_table_survives_a_write_read_cycle_with_missing_cells() {
        let grid = SpatialGrid::new(&BoundingBox::new(41.0, -9.0, 40.0, -8.0).unwrap(), 0.5).unwrap();
        let t0 = Utc.with_ymd_and_hms(2023, 8, 15, 14, 0, 0).unwrap();
        let mut table = CacheTable::filled(
            vec![t0],
            grid,
            vec![1, 2, 3],
            vec![0],
            &["predictions".to_string(), "wv100_kh".to_string()],
        );
        table.columns.get_mut("predictions").unwrap()[[0, 1, 2, 1, 0]] = 4.25;

        let path = tmp_file("cache.rct");
        write_cache_table(&path, &table).unwrap();
        let back = read_cache_table(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(back.start_times, table.start_times);
        assert_eq!(back.durations, vec![1, 2, 3]);
        assert!(back.grid.matches(&table.grid));
        let p = &back.columns["predictions"];
        assert_eq!(p[[0, 1, 2, 1, 0]], 4.25);
        assert!(p[[0, 0, 0, 0, 0]].is_nan());
    }

    #[test]
    fn hourly_file_is_not_read_as_cache_table() {
        let grid = SpatialGrid::new(&BoundingBox::new(41.0, -9.0, 40.0, -8.0).unwrap(), 1.0).unwrap();
        let store = HourlyStore::empty(grid);
        let path = tmp_file("hourly.rct");
        write_hourly_store(&path, &store).unwrap();
        assert!(read_cache_table(&path).is_err());
        assert!(read_hourly_store(&path).unwrap().is_empty());
        std::fs::remove_file(&path).unwrap();
    }
}
