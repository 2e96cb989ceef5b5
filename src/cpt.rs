//! Reader for the CPT v10 tab-separated exchange format (`cptv10.tsv`).
//!
//! A file is a preamble (`xmlns:cpt=...`, `cpt:nfields=N`) followed by
//! blocks. Each block opens with a tag line such as
//!
//! ```text
//! cpt:field=prcp, cpt:T=1982-07/09, cpt:nrow=2, cpt:ncol=3, cpt:row=Y, cpt:col=X, cpt:units=mm, cpt:missing=-999
//! ```
//!
//! then a column header line, optional `cpt:X`/`cpt:Y` lines giving station
//! coordinates along the columns, and `nrow` data lines of a row label
//! followed by `ncol` values.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::dataset::{Coordinate, CoordinateValues, DataArray, Dataset};
use crate::error::{Error, Result};

const STRUCTURAL_TAGS: [&str; 5] = ["field", "nrow", "ncol", "row", "col"];

pub fn read(path: &Path) -> Result<Dataset> {
    let text = fs::read_to_string(path)?;
    let ds = parse(&text)?;
    debug!(path = %path.display(), vars = ds.data_vars.len(), "parsed cpt file");
    Ok(ds)
}

#[derive(Debug)]
struct Block {
    line: usize,
    tags: Vec<(String, String)>,
    columns: Vec<String>,
    aux: Vec<(String, Vec<String>)>,
    rows: Vec<String>,
    values: Vec<f64>,
}

impl Block {
    fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn required(&self, key: &str) -> Result<&str> {
        self.tag(key).ok_or_else(|| {
            Error::Parse(format!("line {}: missing cpt:{key}", self.line))
        })
    }
}

fn is_tag_line(line: &str) -> bool {
    line.starts_with("cpt:") && line.split('\t').next().is_some_and(|f| f.contains('='))
}

fn parse_tags(line: &str) -> Vec<(String, String)> {
    line.split(',')
        .filter_map(|part| {
            let part = part.trim();
            let part = part.strip_prefix("cpt:").unwrap_or(part);
            part.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Cells of a tab-separated line, ignoring trailing empty cells.
fn cells(line: &str) -> Vec<&str> {
    let mut cells: Vec<&str> = line.split('\t').collect();
    while cells.len() > 1 && cells.last().is_some_and(|c| c.trim().is_empty()) {
        cells.pop();
    }
    cells
}

fn parse_count(block: &Block, key: &str) -> Result<usize> {
    let raw = block.required(key)?;
    raw.parse().map_err(|_| {
        Error::Parse(format!("line {}: invalid cpt:{key}={raw}", block.line))
    })
}

pub fn parse(text: &str) -> Result<Dataset> {
    let mut ds = Dataset::default();
    let mut blocks: Vec<Block> = Vec::new();

    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty())
        .peekable();

    while let Some((lineno, line)) = lines.next() {
        if line.starts_with("xmlns") {
            if let Some((k, v)) = line.split_once('=') {
                ds.attrs.insert(k.trim().to_string(), v.trim().to_string());
            }
            continue;
        }
        if !is_tag_line(line) {
            return Err(Error::Parse(format!(
                "line {lineno}: expected a cpt:field tag line"
            )));
        }

        let tags = parse_tags(line);
        if !tags.iter().any(|(k, _)| k == "field") {
            // preamble tags such as cpt:nfields
            for (k, v) in tags {
                ds.attrs.insert(k, v);
            }
            continue;
        }

        let mut block = Block {
            line: lineno,
            tags,
            columns: Vec::new(),
            aux: Vec::new(),
            rows: Vec::new(),
            values: Vec::new(),
        };
        let nrow = parse_count(&block, "nrow")?;
        let ncol = parse_count(&block, "ncol")?;
        block.required("row")?;
        block.required("col")?;
        let missing: Option<f64> = match block.tag("missing") {
            Some(m) => Some(m.parse().map_err(|_| {
                Error::Parse(format!("line {lineno}: invalid cpt:missing={m}"))
            })?),
            None => None,
        };

        let Some((hline, header)) = lines.next() else {
            return Err(Error::Parse(format!(
                "line {lineno}: block ends before its column header"
            )));
        };
        let header = cells(header);
        block.columns = header.iter().skip(1).map(|c| c.trim().to_string()).collect();
        if block.columns.len() != ncol {
            return Err(Error::Parse(format!(
                "line {hline}: expected {ncol} column labels, found {}",
                block.columns.len()
            )));
        }

        while let Some(&(aline, aux)) = lines.peek() {
            if !aux.starts_with("cpt:") || is_tag_line(aux) {
                break;
            }
            lines.next();
            let c = cells(aux);
            let name = c[0].trim_start_matches("cpt:").trim().to_string();
            let vals: Vec<String> = c.iter().skip(1).map(|v| v.trim().to_string()).collect();
            if vals.len() != ncol {
                return Err(Error::Parse(format!(
                    "line {aline}: expected {ncol} values for cpt:{name}, found {}",
                    vals.len()
                )));
            }
            block.aux.push((name, vals));
        }

        block.values.reserve(nrow * ncol);
        for _ in 0..nrow {
            let Some((dline, data)) = lines.next() else {
                return Err(Error::Parse(format!(
                    "line {lineno}: expected {nrow} data rows, file ended after {}",
                    block.rows.len()
                )));
            };
            if is_tag_line(data) {
                return Err(Error::Parse(format!(
                    "line {dline}: expected {nrow} data rows, found {}",
                    block.rows.len()
                )));
            }
            let c = cells(data);
            if c.len() != ncol + 1 {
                return Err(Error::Parse(format!(
                    "line {dline}: expected {ncol} values, found {}",
                    c.len().saturating_sub(1)
                )));
            }
            block.rows.push(c[0].trim().to_string());
            for raw in &c[1..] {
                let v: f64 = raw.trim().parse().map_err(|_| {
                    Error::Parse(format!("line {dline}: invalid value {raw:?}"))
                })?;
                block
                    .values
                    .push(if missing == Some(v) { f64::NAN } else { v });
            }
        }

        blocks.push(block);
    }

    if blocks.is_empty() {
        return Err(Error::Parse("no cpt:field blocks found".into()));
    }

    let mut order: Vec<String> = Vec::new();
    let mut by_field: BTreeMap<String, Vec<Block>> = BTreeMap::new();
    for b in blocks {
        let field = b.required("field")?.to_string();
        if !by_field.contains_key(&field) {
            order.push(field.clone());
        }
        by_field.entry(field).or_default().push(b);
    }

    for field in order {
        let group = by_field.remove(&field).unwrap_or_default();
        assemble_field(&mut ds, &field, group)?;
    }
    Ok(ds)
}

fn assemble_field(ds: &mut Dataset, field: &str, blocks: Vec<Block>) -> Result<()> {
    let first = &blocks[0];
    let row_dim = first.required("row")?.to_string();
    let col_dim = first.required("col")?.to_string();
    let nrow = first.rows.len();
    let ncol = first.columns.len();

    for b in &blocks[1..] {
        if b.tag("row") != first.tag("row")
            || b.tag("col") != first.tag("col")
            || b.rows.len() != nrow
            || b.columns != first.columns
        {
            return Err(Error::Parse(format!(
                "line {}: block layout differs from the first {field} block (line {})",
                b.line, first.line
            )));
        }
    }

    let mut varying: Vec<String> = Vec::new();
    let mut attrs: BTreeMap<String, String> = BTreeMap::new();
    for (key, value) in &first.tags {
        if STRUCTURAL_TAGS.contains(&key.as_str()) {
            continue;
        }
        let varies = blocks.iter().any(|b| b.tag(key) != Some(value.as_str()));
        if varies {
            varying.push(key.clone());
        } else if key == "missing" {
            attrs.insert("missing_value".to_string(), value.clone());
        } else {
            attrs.insert(key.clone(), value.clone());
        }
    }

    // A varying tag fixed by an existing dimension (`S` alongside `T` in
    // hindcast files) is a coordinate along it; the rest become leading
    // dimensions. `T` is considered first.
    let mut candidates = varying.clone();
    candidates.sort_by_key(|k| k != "T");
    let mut stack_keys: Vec<String> = Vec::new();
    let mut dependents: Vec<(String, usize)> = Vec::new();
    for key in candidates {
        match stack_keys.iter().position(|dim| determined_by(&blocks, &key, dim)) {
            Some(k) => dependents.push((key, k)),
            None => stack_keys.push(key),
        }
    }
    let dim_order: Vec<String> = varying
        .iter()
        .filter(|k| stack_keys.contains(*k))
        .cloned()
        .collect();
    let dependents: Vec<(String, String)> = dependents
        .into_iter()
        .map(|(key, k)| (key, stack_keys[k].clone()))
        .collect();
    let stack_keys = dim_order;

    let mut levels: Vec<Vec<String>> = vec![Vec::new(); stack_keys.len()];
    for b in &blocks {
        for (k, key) in stack_keys.iter().enumerate() {
            let v = b.required(key)?.to_string();
            if !levels[k].contains(&v) {
                levels[k].push(v);
            }
        }
    }
    let combos: usize = levels.iter().map(Vec::len).product();
    if combos != blocks.len() {
        return Err(Error::Parse(format!(
            "{field}: {} blocks do not form a complete grid over {stack_keys:?}",
            blocks.len()
        )));
    }

    let plane = nrow * ncol;
    let mut values = vec![f64::NAN; combos * plane];
    let mut filled = vec![false; combos];
    for b in &blocks {
        let mut slot = 0usize;
        for (k, key) in stack_keys.iter().enumerate() {
            let v = b.required(key)?;
            let pos = levels[k].iter().position(|l| l == v).unwrap_or(0);
            slot = slot * levels[k].len() + pos;
        }
        if filled[slot] {
            return Err(Error::Parse(format!(
                "line {}: duplicate {field} block",
                b.line
            )));
        }
        filled[slot] = true;
        values[slot * plane..(slot + 1) * plane].copy_from_slice(&b.values);
    }

    let mut dims = stack_keys.clone();
    dims.push(row_dim.clone());
    dims.push(col_dim.clone());
    let mut shape: Vec<usize> = levels.iter().map(Vec::len).collect();
    shape.push(nrow);
    shape.push(ncol);

    for (key, dim) in &dependents {
        let k = stack_keys.iter().position(|d| d == dim).unwrap_or(0);
        let labels = levels[k]
            .iter()
            .map(|level| {
                blocks
                    .iter()
                    .find(|b| b.tag(dim) == Some(level.as_str()))
                    .and_then(|b| b.tag(key))
                    .unwrap_or_default()
                    .to_string()
            })
            .collect();
        ds.coords.entry(key.clone()).or_insert(Coordinate {
            dims: vec![dim.clone()],
            values: CoordinateValues::from_labels(labels),
        });
    }
    for (key, level) in stack_keys.iter().zip(levels) {
        ds.coords.entry(key.clone()).or_insert(Coordinate {
            dims: vec![key.clone()],
            values: CoordinateValues::from_labels(level),
        });
    }
    ds.coords.entry(row_dim.clone()).or_insert(Coordinate {
        dims: vec![row_dim.clone()],
        values: CoordinateValues::from_labels(first.rows.clone()),
    });
    ds.coords.entry(col_dim.clone()).or_insert(Coordinate {
        dims: vec![col_dim.clone()],
        values: CoordinateValues::from_labels(first.columns.clone()),
    });
    for (name, vals) in &first.aux {
        ds.coords.entry(name.clone()).or_insert(Coordinate {
            dims: vec![col_dim.clone()],
            values: CoordinateValues::from_labels(vals.clone()),
        });
    }

    ds.data_vars.insert(
        field.to_string(),
        DataArray {
            dims,
            shape,
            values,
            attrs,
        },
    );
    Ok(())
}

/// Whether every block sharing a `dim` value also shares its `key` value.
fn determined_by(blocks: &[Block], key: &str, dim: &str) -> bool {
    let mut seen: BTreeMap<Option<&str>, Option<&str>> = BTreeMap::new();
    blocks
        .iter()
        .all(|b| *seen.entry(b.tag(dim)).or_insert(b.tag(key)) == b.tag(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRIDDED: &str = "xmlns:cpt=http://iri.columbia.edu/CPT/v10/\n\
cpt:nfields=1\n\
cpt:field=prcp, cpt:T=1982-07/09, cpt:nrow=2, cpt:ncol=3, cpt:row=Y, cpt:col=X, cpt:units=mm, cpt:missing=-999.\n\
\t10.0\t11.0\t12.0\n\
5.0\t1.0\t2.0\t3.0\n\
4.0\t4.0\t-999.\t6.0\n\
cpt:field=prcp, cpt:T=1983-07/09, cpt:nrow=2, cpt:ncol=3, cpt:row=Y, cpt:col=X, cpt:units=mm, cpt:missing=-999.\n\
\t10.0\t11.0\t12.0\n\
5.0\t7.0\t8.0\t9.0\n\
4.0\t10.0\t11.0\t12.0\n";

    #[test]
    fn parses_gridded_blocks_stacked_on_t() {
        let ds = parse(GRIDDED).unwrap();
        assert_eq!(
            ds.attrs.get("xmlns:cpt").map(String::as_str),
            Some("http://iri.columbia.edu/CPT/v10/")
        );
        assert_eq!(ds.attrs.get("nfields").map(String::as_str), Some("1"));

        let prcp = ds.var("prcp").unwrap();
        assert_eq!(prcp.dims, vec!["T", "Y", "X"]);
        assert_eq!(prcp.shape, vec![2, 2, 3]);
        assert_eq!(prcp.get(&[0, 0, 0]), Some(1.0));
        assert_eq!(prcp.get(&[1, 1, 2]), Some(12.0));
        assert!(prcp.get(&[0, 1, 1]).unwrap().is_nan());
        assert_eq!(prcp.attrs.get("units").map(String::as_str), Some("mm"));
        assert_eq!(prcp.attrs.get("missing_value").map(String::as_str), Some("-999."));

        assert_eq!(
            ds.coord("T").unwrap().values,
            CoordinateValues::Labels(vec!["1982-07/09".into(), "1983-07/09".into()])
        );
        assert_eq!(
            ds.coord("X").unwrap().values,
            CoordinateValues::Numeric(vec![10.0, 11.0, 12.0])
        );
        assert_eq!(ds.dim_len("Y"), Some(2));
    }

    #[test]
    fn parses_station_layout() {
        let text = "xmlns:cpt=http://iri.columbia.edu/CPT/v10/\n\
cpt:nfields=1\n\
cpt:field=rain, cpt:nrow=2, cpt:ncol=2, cpt:row=T, cpt:col=station, cpt:units=mm\n\
\tAccra\tKumasi\n\
cpt:Y\t5.6\t6.7\n\
cpt:X\t-0.2\t-1.6\n\
1991-06/08\t300.5\t410.0\n\
1992-06/08\t280.0\t390.25\n";
        let ds = parse(text).unwrap();
        let rain = ds.var("rain").unwrap();
        assert_eq!(rain.dims, vec!["T", "station"]);
        assert_eq!(rain.get(&[1, 1]), Some(390.25));
        assert_eq!(
            ds.coord("station").unwrap().values,
            CoordinateValues::Labels(vec!["Accra".into(), "Kumasi".into()])
        );
        let y = ds.coord("Y").unwrap();
        assert_eq!(y.dims, vec!["station"]);
        assert_eq!(y.values, CoordinateValues::Numeric(vec![5.6, 6.7]));
    }

    #[test]
    fn rejects_html_error_pages() {
        let err = parse("<html><body>Error 500</body></html>\n").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn rejects_short_rows_and_truncation() {
        let short = "cpt:field=a, cpt:nrow=1, cpt:ncol=2, cpt:row=Y, cpt:col=X\n\t1\t2\n0\t5.0\n";
        assert!(parse(short).is_err());
        let truncated = "cpt:field=a, cpt:nrow=2, cpt:ncol=1, cpt:row=Y, cpt:col=X\n\t1\n0\t5.0\n";
        assert!(parse(truncated).is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn rejects_incomplete_stack() {
        let text = "cpt:field=a, cpt:T=1, cpt:M=1, cpt:nrow=1, cpt:ncol=1, cpt:row=Y, cpt:col=X\n\t1\n0\t5.0\n\
cpt:field=a, cpt:T=1, cpt:M=2, cpt:nrow=1, cpt:ncol=1, cpt:row=Y, cpt:col=X\n\t1\n0\t6.0\n\
cpt:field=a, cpt:T=2, cpt:M=1, cpt:nrow=1, cpt:ncol=1, cpt:row=Y, cpt:col=X\n\t1\n0\t7.0\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn issue_dates_follow_target_periods() {
        let text = "xmlns:cpt=http://iri.columbia.edu/CPT/v10/\n\
cpt:nfields=1\n\
cpt:field=prec, cpt:L=1.5 months, cpt:S=1991-05-01T00:00, cpt:T=1991-06/08, cpt:nrow=1, cpt:ncol=2, cpt:row=Y, cpt:col=X, cpt:units=mm/day, cpt:missing=-999\n\
\t-10.0\t-9.0\n\
7.5\t1.0\t2.0\n\
cpt:field=prec, cpt:L=1.5 months, cpt:S=1992-05-01T00:00, cpt:T=1992-06/08, cpt:nrow=1, cpt:ncol=2, cpt:row=Y, cpt:col=X, cpt:units=mm/day, cpt:missing=-999\n\
\t-10.0\t-9.0\n\
7.5\t3.0\t4.0\n";
        let ds = parse(text).unwrap();
        let prec = ds.var("prec").unwrap();
        assert_eq!(prec.dims, vec!["T", "Y", "X"]);
        assert_eq!(prec.shape, vec![2, 1, 2]);
        assert_eq!(prec.get(&[1, 0, 1]), Some(4.0));
        assert_eq!(prec.attrs.get("L").map(String::as_str), Some("1.5 months"));

        let s = ds.coord("S").unwrap();
        assert_eq!(s.dims, vec!["T"]);
        assert_eq!(
            s.values,
            CoordinateValues::Labels(vec!["1991-05-01T00:00".into(), "1992-05-01T00:00".into()])
        );
        assert_eq!(ds.dim_len("T"), Some(2));
    }

    #[test]
    fn independent_tags_still_form_a_grid() {
        let block = |c: &str, t: &str, v: f64| {
            format!("cpt:field=p, cpt:C={c}, cpt:T={t}, cpt:nrow=1, cpt:ncol=1, cpt:row=Y, cpt:col=X\n\t1\n0\t{v}\n")
        };
        let text = [
            block("1", "2001", 1.0),
            block("2", "2001", 2.0),
            block("1", "2002", 3.0),
            block("2", "2002", 4.0),
        ]
        .concat();
        let p = parse(&text).unwrap().data_vars.remove("p").unwrap();
        assert_eq!(p.dims, vec!["C", "T", "Y", "X"]);
        assert_eq!(p.get(&[1, 0, 0, 0]), Some(2.0));
        assert_eq!(p.get(&[0, 1, 0, 0]), Some(3.0));
    }
}
