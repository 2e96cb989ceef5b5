use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::params::FileFormat;

/// Values along a coordinate.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinateValues {
    Numeric(Vec<f64>),
    Labels(Vec<String>),
}

impl CoordinateValues {
    /// Numeric when every label parses as a number.
    pub fn from_labels(labels: Vec<String>) -> Self {
        let parsed: Option<Vec<f64>> = labels.iter().map(|l| l.trim().parse().ok()).collect();
        match parsed {
            Some(v) => CoordinateValues::Numeric(v),
            None => CoordinateValues::Labels(labels),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CoordinateValues::Numeric(v) => v.len(),
            CoordinateValues::Labels(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coordinate {
    pub dims: Vec<String>,
    pub values: CoordinateValues,
}

/// Labelled n-dimensional array, values stored row-major, missing as `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
    pub attrs: BTreeMap<String, String>,
}

impl DataArray {
    /// Value at a multi-dimensional index.
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut flat = 0usize;
        for (i, n) in index.iter().zip(&self.shape) {
            if i >= n {
                return None;
            }
            flat = flat * n + i;
        }
        self.values.get(flat).copied()
    }
}

/// Parsed contents of a downloaded file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub attrs: BTreeMap<String, String>,
    pub coords: BTreeMap<String, Coordinate>,
    pub data_vars: BTreeMap<String, DataArray>,
}

impl Dataset {
    pub fn coord(&self, name: &str) -> Option<&Coordinate> {
        self.coords.get(name)
    }

    pub fn var(&self, name: &str) -> Option<&DataArray> {
        self.data_vars.get(name)
    }

    /// Length of dimension `name`, taken from any array or coordinate using it.
    pub fn dim_len(&self, name: &str) -> Option<usize> {
        for arr in self.data_vars.values() {
            if let Some(i) = arr.dims.iter().position(|d| d == name) {
                return Some(arr.shape[i]);
            }
        }
        self.coords
            .values()
            .find(|c| c.dims.len() == 1 && c.dims[0] == name)
            .map(|c| c.values.len())
    }
}

/// Parses a file previously fetched in `format`.
pub fn load(path: &Path, format: FileFormat) -> Result<Dataset> {
    match format {
        FileFormat::CptV10 => crate::cpt::read(path),
        FileFormat::NetCdf => load_netcdf(path),
    }
}

#[cfg(feature = "netcdf")]
fn load_netcdf(path: &Path) -> Result<Dataset> {
    crate::nc::read(path)
}

#[cfg(not(feature = "netcdf"))]
fn load_netcdf(_path: &Path) -> Result<Dataset> {
    Err(crate::error::Error::FormatUnavailable(format!(
        "{} (enable the `netcdf` feature)",
        FileFormat::NetCdf
    )))
}
