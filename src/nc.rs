//! NetCDF reader (`data.nc`), enabled by the `netcdf` feature.
//!
//! Time axes are left as the raw numbers stored in the file.

use std::collections::BTreeMap;
use std::path::Path;

use netcdf::AttributeValue;
use tracing::debug;

use crate::dataset::{Coordinate, CoordinateValues, DataArray, Dataset};
use crate::error::Result;

fn attribute_text(value: AttributeValue) -> String {
    match value {
        AttributeValue::Str(s) => s,
        AttributeValue::Strs(v) => v.join(", "),
        AttributeValue::Double(x) => x.to_string(),
        AttributeValue::Float(x) => x.to_string(),
        AttributeValue::Int(x) => x.to_string(),
        AttributeValue::Short(x) => x.to_string(),
        AttributeValue::Doubles(v) => join_numbers(&v),
        AttributeValue::Floats(v) => join_numbers(&v),
        AttributeValue::Ints(v) => join_numbers(&v),
        other => format!("{other:?}"),
    }
}

fn join_numbers<T: ToString>(v: &[T]) -> String {
    v.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn attributes<'a>(
    attrs: impl Iterator<Item = netcdf::Attribute<'a>>,
) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for attr in attrs {
        out.insert(attr.name().to_string(), attribute_text(attr.value()?));
    }
    Ok(out)
}

pub fn read(path: &Path) -> Result<Dataset> {
    let file = netcdf::open(path)?;
    let mut ds = Dataset {
        attrs: attributes(file.attributes())?,
        ..Dataset::default()
    };

    for var in file.variables() {
        let name = var.name();
        let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        let values: Vec<f64> = var.get_values::<f64, _>(..)?;

        if dims.len() == 1 && dims[0] == name {
            ds.coords.insert(
                name,
                Coordinate {
                    dims,
                    values: CoordinateValues::Numeric(values),
                },
            );
            continue;
        }

        let mut attrs = attributes(var.attributes())?;
        let fill = attrs
            .get("missing_value")
            .or_else(|| attrs.get("_FillValue"))
            .and_then(|v| v.parse::<f64>().ok());
        let values = match fill {
            Some(f) => values
                .into_iter()
                .map(|v| if v == f { f64::NAN } else { v })
                .collect(),
            None => values,
        };
        attrs.remove("_FillValue");
        ds.data_vars.insert(
            name,
            DataArray {
                dims,
                shape,
                values,
                attrs,
            },
        );
    }

    debug!(path = %path.display(), vars = ds.data_vars.len(), "opened netcdf file");
    Ok(ds)
}

#[cfg(all(test, feature = "netcdf"))]
mod tests {
    use super::*;

    fn write_sample(path: &Path) -> Result<()> {
        let mut file = netcdf::create(path)?;
        file.add_attribute("title", "CMAP precipitation")?;
        file.add_dimension("Y", 2)?;
        file.add_dimension("X", 3)?;

        {
            let mut y = file.add_variable::<f64>("Y", &["Y"])?;
            y.put_attribute("units", "degree_north")?;
            y.put_values(&[5.0, 7.5], ..)?;
        }
        {
            let mut x = file.add_variable::<f64>("X", &["X"])?;
            x.put_values(&[-10.0, -7.5, -5.0], ..)?;
        }
        {
            let mut prcp = file.add_variable::<f64>("prcp", &["Y", "X"])?;
            prcp.put_attribute("units", "mm/day")?;
            prcp.put_attribute("_FillValue", -999.0f64)?;
            prcp.put_values(&[1.0, -999.0, 3.0, 4.0, 5.0, -999.0], ..)?;
        }
        Ok(())
    }

    #[test]
    fn reads_coordinates_and_masks_fill_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.nc");
        write_sample(&path).unwrap();

        let ds = read(&path).unwrap();
        assert_eq!(ds.attrs.get("title").map(String::as_str), Some("CMAP precipitation"));

        let x = ds.coord("X").unwrap();
        assert_eq!(x.dims, vec!["X"]);
        assert_eq!(x.values, CoordinateValues::Numeric(vec![-10.0, -7.5, -5.0]));
        assert_eq!(ds.coord("Y").unwrap().values.len(), 2);
        assert!(ds.var("X").is_none());

        let prcp = ds.var("prcp").unwrap();
        assert_eq!(prcp.dims, vec!["Y", "X"]);
        assert_eq!(prcp.shape, vec![2, 3]);
        assert_eq!(prcp.get(&[0, 0]), Some(1.0));
        assert_eq!(prcp.get(&[1, 1]), Some(5.0));
        assert!(prcp.get(&[0, 1]).unwrap().is_nan());
        assert!(prcp.get(&[1, 2]).unwrap().is_nan());
        assert_eq!(prcp.attrs.get("units").map(String::as_str), Some("mm/day"));
        assert!(!prcp.attrs.contains_key("_FillValue"));
    }
}
