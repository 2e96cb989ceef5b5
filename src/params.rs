use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};

/// Dynamically typed value bound to a template name.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDateTime),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Date(_) => "datetime",
            Value::Map(_) => "dict",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness as used by `if`/`else`, `and`, `or` and `not`.
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Date(_) => true,
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Parse a user-provided string into a best-effort [`Value`].
    ///
    /// Meant for command-line or config inputs where everything starts as text:
    /// - `"True"` / `"False"` -> `Bool`
    /// - `"1982"` -> `Int`, `"1.5"` -> `Float`
    /// - `"2022-05-01"` or `"2022-05-01 12:00:00"` -> `Date`
    /// - otherwise `Str`
    pub fn parse_auto(s: &str) -> Self {
        let t = s.trim();
        match t {
            "True" | "true" => return Value::Bool(true),
            "False" | "false" => return Value::Bool(false),
            _ => {}
        }
        if let Ok(n) = t.parse::<i64>() {
            return Value::Int(n);
        }
        if let Ok(x) = t.parse::<f64>() {
            return Value::Float(x);
        }
        if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
            return d.into();
        }
        if let Ok(d) = NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S") {
            return Value::Date(d);
        }
        Value::Str(s.to_string())
    }

    /// Quoted rendering used inside maps (`{'east': 90}`).
    fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            other => other.to_string(),
        }
    }
}

pub(crate) fn format_float(x: f64) -> String {
    if x.is_nan() {
        "nan".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else {
        // Shortest round-trip digits; scientific outside [1e-4, 1e16).
        let sci = format!("{x:e}");
        let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        let exp: i32 = exp.parse().unwrap_or(0);
        if x != 0.0 && !(-4..16).contains(&exp) {
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        } else {
            let plain = format!("{x}");
            if plain.contains('.') { plain } else { format!("{plain}.0") }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Str(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
            Value::Map(m) => {
                f.write_str("{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "'{k}': {}", v.repr())?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Str(value.clone())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value as f64)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value.and_time(chrono::NaiveTime::MIN))
    }
}

impl From<Extent> for Value {
    fn from(value: Extent) -> Self {
        Value::Map(BTreeMap::from([
            ("east".to_string(), Value::Float(value.east)),
            ("north".to_string(), Value::Float(value.north)),
            ("south".to_string(), Value::Float(value.south)),
            ("west".to_string(), Value::Float(value.west)),
        ]))
    }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Value {
    fn from(value: BTreeMap<String, V>) -> Self {
        Value::Map(value.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Spatial bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Extent {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }
}

/// Accepted values of the `filetype` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// `cptv10.tsv`
    CptV10,
    /// `data.nc`
    NetCdf,
}

impl FileFormat {
    pub const ALL: [FileFormat; 2] = [FileFormat::CptV10, FileFormat::NetCdf];

    pub fn tag(self) -> &'static str {
        match self {
            FileFormat::CptV10 => "cptv10.tsv",
            FileFormat::NetCdf => "data.nc",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.tag() == tag)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Download parameters (keyword/value pairs) substituted into URL templates.
///
/// The mapping is open: any key may be set, and only the keys a template
/// actually references need to be present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    inner: BTreeMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create parameters from `(key, value)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut p = Self::new();
        for (k, v) in pairs {
            p.inner.insert(k.into(), v.into());
        }
        p
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inner.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn filetype(self, format: FileFormat) -> Self {
        self.set("filetype", format.tag())
    }

    pub fn fdate(self, date: impl Into<Value>) -> Self {
        self.set("fdate", date)
    }

    pub fn first_year(self, year: i32) -> Self {
        self.set("first_year", year)
    }

    pub fn final_year(self, year: i32) -> Self {
        self.set("final_year", year)
    }

    pub fn predictor_extent(self, extent: Extent) -> Self {
        self.set("predictor_extent", extent)
    }

    pub fn predictand_extent(self, extent: Extent) -> Self {
        self.set("predictand_extent", extent)
    }

    pub fn lead_low(self, months: f64) -> Self {
        self.set("lead_low", months)
    }

    pub fn lead_high(self, months: f64) -> Self {
        self.set("lead_high", months)
    }

    pub fn target(self, target: &str) -> Self {
        self.set("target", target)
    }

    pub fn pressure(self, level: impl Into<Value>) -> Self {
        self.set("pressure", level)
    }

    pub fn ensemblemean(self, enabled: bool) -> Self {
        self.set("ensemblemean", enabled)
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.inner.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "'{k}': {}", v.repr())?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_render_like_upstream() {
        assert_eq!(Value::Int(1982).to_string(), "1982");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(1e-5).to_string(), "1e-05");
        assert_eq!(Value::Float(0.0001).to_string(), "0.0001");
        assert_eq!(Value::Float(1e16).to_string(), "1e+16");
        assert_eq!(Value::Float(-2.5e-7).to_string(), "-2.5e-07");
        assert_eq!(Value::Float(1e15).to_string(), "1000000000000000.0");
        assert_eq!(Value::Float(90.0).to_string(), "90.0");
        assert_eq!(Value::Float(-12.25).to_string(), "-12.25");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::None.to_string(), "None");

        let d = NaiveDate::from_ymd_opt(2022, 5, 1).unwrap();
        assert_eq!(Value::from(d).to_string(), "2022-05-01 00:00:00");
    }

    #[test]
    fn parse_auto_detects_types() {
        assert_eq!(Value::parse_auto("1982"), Value::Int(1982));
        assert_eq!(Value::parse_auto(" 1.5 "), Value::Float(1.5));
        assert_eq!(Value::parse_auto("False"), Value::Bool(false));
        assert_eq!(Value::parse_auto("Jul-Sep"), Value::Str("Jul-Sep".into()));
        assert_eq!(
            Value::parse_auto("2022-05-01"),
            Value::from(NaiveDate::from_ymd_opt(2022, 5, 1).unwrap())
        );
    }

    #[test]
    fn extent_renders_as_dict() {
        let v = Value::from(Extent::new(10.0, -5.0, 40.0, 20.5));
        assert_eq!(
            v.to_string(),
            "{'east': 40.0, 'north': 10.0, 'south': -5.0, 'west': 20.5}"
        );
    }

    #[test]
    fn builder_sets_recognized_keys() {
        let p = Params::new()
            .filetype(FileFormat::CptV10)
            .first_year(1982)
            .final_year(2018)
            .lead_low(1.5)
            .ensemblemean(false);
        assert_eq!(p.get("filetype"), Some(&Value::Str("cptv10.tsv".into())));
        assert_eq!(p.get("first_year"), Some(&Value::Int(1982)));
        assert_eq!(p.get("lead_low"), Some(&Value::Float(1.5)));
        assert_eq!(p.get("ensemblemean"), Some(&Value::Bool(false)));
        assert_eq!(p.len(), 5);
    }

    #[test]
    fn file_format_tags() {
        assert_eq!(FileFormat::from_tag("data.nc"), Some(FileFormat::NetCdf));
        assert_eq!(FileFormat::from_tag("cptv10.tsv"), Some(FileFormat::CptV10));
        assert_eq!(FileFormat::from_tag("bogus"), None);
    }

    #[test]
    fn params_display_quotes_strings() {
        let p = Params::from_pairs([("a", Value::from("x")), ("b", Value::from(2))]);
        assert_eq!(p.to_string(), "{'a': 'x', 'b': 2}");
    }
}
