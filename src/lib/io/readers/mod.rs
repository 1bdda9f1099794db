pub mod json;
#[cfg(feature = "netcdf")]
pub mod netcdf;
pub mod prelude;

use crate::error::RosResult;

use prelude::{DatasetReader, SourceFormat};

pub fn reader_for(format: SourceFormat) -> RosResult<Box<dyn DatasetReader>> {
    match format {
        SourceFormat::Json => Ok(Box::new(json::JsonDatasetReader)),
        #[cfg(feature = "netcdf")]
        SourceFormat::NetCdf => Ok(Box::new(self::netcdf::NetCdfDatasetReader)),
        #[cfg(not(feature = "netcdf"))]
        SourceFormat::NetCdf => Err(crate::error::RosError::Config(
            "NetCDF sources need the crate built with the `netcdf` feature".into(),
        )),
    }
}
