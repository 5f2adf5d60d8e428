//! Material configuration strings and their canonical cache keys.
//!
//! A configuration string names a material and optionally overrides a fixed set of
//! parameters, e.g. `"Al_sg225.ncmat;temp=300K;dcutoff=0.5"`. Parsing validates every
//! parameter against its declared domain, and [`MatCfg::canonical`] renders a
//! deterministic string that is insensitive to parameter order, whitespace and
//! parameters explicitly set to their documented default.

use itertools::Itertools;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default material temperature in kelvin.
pub const DEFAULT_TEMPERATURE_K: f64 = 293.15;

const CELSIUS_OFFSET_K: f64 = 273.15;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigSyntaxError {
    #[error("Configuration string is missing a material reference")]
    MissingMaterial,

    #[error("Malformed configuration segment '{0}' (expected name=value)")]
    MalformedSegment(String),

    #[error("Unknown configuration parameter '{0}'")]
    UnknownParameter(String),

    #[error("Invalid value '{value}' for parameter '{param}'")]
    InvalidValue { param: &'static str, value: String },

    #[error("Value '{value}' for parameter '{param}' is outside its domain ({domain})")]
    OutOfDomain {
        param: &'static str,
        value: String,
        domain: &'static str,
    },

    #[error("Parameter '{param}' is given twice with different values ('{first}' and '{second}')")]
    Duplicate {
        param: &'static str,
        first: String,
        second: String,
    },

    #[error("Conflicting parameters: {0}")]
    Conflict(String),
}

/// Every parameter a configuration may carry.
///
/// Variants are declared in lexicographic order of their names, so the derived
/// `Ord` is the canonical ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Param {
    AbsnFactory,
    DCutoff,
    DCutoffUp,
    InfoFactory,
    PackFact,
    ScatFactory,
    Temp,
}

impl Param {
    pub const ALL: [Param; 7] = [
        Param::AbsnFactory,
        Param::DCutoff,
        Param::DCutoffUp,
        Param::InfoFactory,
        Param::PackFact,
        Param::ScatFactory,
        Param::Temp,
    ];

    /// Parameters that influence the structural [`Info`](crate::core::material::Info) object.
    pub const INFO: [Param; 4] = [
        Param::DCutoff,
        Param::DCutoffUp,
        Param::InfoFactory,
        Param::Temp,
    ];

    /// Parameters that influence a scattering calculator.
    pub const SCATTER: [Param; 6] = [
        Param::DCutoff,
        Param::DCutoffUp,
        Param::InfoFactory,
        Param::PackFact,
        Param::ScatFactory,
        Param::Temp,
    ];

    /// Parameters that influence an absorption calculator.
    pub const ABSORPTION: [Param; 2] = [Param::AbsnFactory, Param::InfoFactory];

    pub fn name(self) -> &'static str {
        match self {
            Param::AbsnFactory => "absnfactory",
            Param::DCutoff => "dcutoff",
            Param::DCutoffUp => "dcutoffup",
            Param::InfoFactory => "infofactory",
            Param::PackFact => "packfact",
            Param::ScatFactory => "scatfactory",
            Param::Temp => "temp",
        }
    }

    fn lookup(name: &str) -> Option<Self> {
        let lowered = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|p| p.name() == lowered)
    }

    fn default_value(self) -> Value {
        match self {
            Param::Temp => Value::Number(DEFAULT_TEMPERATURE_K),
            Param::DCutoff => Value::Number(0.0),
            Param::DCutoffUp => Value::Number(f64::INFINITY),
            Param::PackFact => Value::Number(1.0),
            Param::InfoFactory | Param::ScatFactory | Param::AbsnFactory => {
                Value::Name(String::new())
            }
        }
    }

    fn parse_value(self, raw: &str) -> Result<Value, ConfigSyntaxError> {
        let invalid = || ConfigSyntaxError::InvalidValue {
            param: self.name(),
            value: raw.to_string(),
        };
        let out_of_domain = |domain: &'static str| ConfigSyntaxError::OutOfDomain {
            param: self.name(),
            value: raw.to_string(),
            domain,
        };

        match self {
            Param::Temp => {
                let (number, offset) = if let Some(v) = raw.strip_suffix(['K', 'k']) {
                    (v, 0.0)
                } else if let Some(v) = raw.strip_suffix(['C', 'c']) {
                    (v, CELSIUS_OFFSET_K)
                } else {
                    (raw, 0.0)
                };
                let kelvin = parse_f64(number.trim()).ok_or_else(invalid)? + offset;
                if kelvin > 0.0 && kelvin <= 1e5 {
                    Ok(Value::Number(kelvin))
                } else {
                    Err(out_of_domain("0 < T <= 1e5 kelvin"))
                }
            }
            Param::DCutoff => {
                let d = parse_f64(raw).ok_or_else(invalid)?;
                if d == -1.0 || d == 0.0 || (1e-3..=1e5).contains(&d) {
                    Ok(Value::Number(d))
                } else {
                    Err(out_of_domain("-1, 0 or 1e-3 <= d <= 1e5 Aa"))
                }
            }
            Param::DCutoffUp => {
                let d = parse_f64(raw).ok_or_else(invalid)?;
                if d > 0.0 {
                    Ok(Value::Number(d))
                } else {
                    Err(out_of_domain("d > 0 Aa"))
                }
            }
            Param::PackFact => {
                let p = parse_f64(raw).ok_or_else(invalid)?;
                if p > 0.0 && p <= 1.0 {
                    Ok(Value::Number(p))
                } else {
                    Err(out_of_domain("0 < packfact <= 1"))
                }
            }
            Param::InfoFactory | Param::ScatFactory | Param::AbsnFactory => {
                if raw
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    Ok(Value::Name(raw.to_ascii_lowercase()))
                } else {
                    Err(invalid())
                }
            }
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn parse_f64(raw: &str) -> Option<f64> {
    let v = f64::from_str(raw).ok()?;
    // -0 and 0 must share one rendering.
    Some(if v == 0.0 { 0.0 } else { v })
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Number(f64),
    Name(String),
}

impl Value {
    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            Value::Name(_) => None,
        }
    }

    fn as_name(&self) -> Option<&str> {
        match self {
            Value::Name(s) => Some(s.as_str()),
            Value::Number(_) => None,
        }
    }

    fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::Name(a), Value::Name(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Shortest representation that round-trips to the same bits.
            Value::Number(v) => write!(f, "{}", v),
            Value::Name(s) => f.write_str(s),
        }
    }
}

/// The canonical identity of a configuration (or of a projection of one).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parsed, validated material configuration.
///
/// Only parameters that differ from their documented default are stored, so two
/// configurations compare equal exactly when their canonical keys do.
#[derive(Debug, Clone, PartialEq)]
pub struct MatCfg {
    material: String,
    params: BTreeMap<Param, Value>,
}

impl MatCfg {
    pub fn parse(raw: &str) -> Result<Self, ConfigSyntaxError> {
        let mut segments = raw.split(';').map(str::trim);
        let material = segments.next().unwrap_or_default();
        if material.is_empty() || material.contains('=') {
            return Err(ConfigSyntaxError::MissingMaterial);
        }

        let mut cfg = Self {
            material: material.to_string(),
            params: BTreeMap::new(),
        };
        let mut seen: BTreeMap<Param, (String, Value)> = BTreeMap::new();

        for segment in segments.filter(|s| !s.is_empty()) {
            let (name, raw_value) = segment
                .split_once('=')
                .map(|(n, v)| (n.trim(), v.trim()))
                .ok_or_else(|| ConfigSyntaxError::MalformedSegment(segment.to_string()))?;
            let param = Param::lookup(name)
                .ok_or_else(|| ConfigSyntaxError::UnknownParameter(name.to_string()))?;
            let value = param.parse_value(raw_value)?;

            match seen.entry(param) {
                Entry::Occupied(previous) => {
                    let (first, first_value) = previous.get();
                    if !first_value.is_identical(&value) {
                        return Err(ConfigSyntaxError::Duplicate {
                            param: param.name(),
                            first: first.clone(),
                            second: raw_value.to_string(),
                        });
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert((raw_value.to_string(), value.clone()));
                    cfg.store(param, value);
                }
            }
        }

        cfg.check_consistency()?;
        Ok(cfg)
    }

    /// Returns a copy with `param` overridden by `raw_value`.
    pub fn with(&self, param: Param, raw_value: &str) -> Result<Self, ConfigSyntaxError> {
        let mut cfg = self.clone();
        let value = param.parse_value(raw_value.trim())?;
        cfg.params.remove(&param);
        cfg.store(param, value);
        cfg.check_consistency()?;
        Ok(cfg)
    }

    fn store(&mut self, param: Param, value: Value) {
        if !value.is_identical(&param.default_value()) {
            self.params.insert(param, value);
        }
    }

    fn check_consistency(&self) -> Result<(), ConfigSyntaxError> {
        let (lo, hi) = (self.dcutoff(), self.dcutoffup());
        if lo > 0.0 && hi <= lo {
            return Err(ConfigSyntaxError::Conflict(format!(
                "dcutoffup ({}) must exceed dcutoff ({})",
                hi, lo
            )));
        }
        Ok(())
    }

    fn number(&self, param: Param) -> f64 {
        self.params
            .get(&param)
            .and_then(Value::as_number)
            .or_else(|| param.default_value().as_number())
            .unwrap_or_default()
    }

    fn name_of(&self, param: Param) -> Option<&str> {
        self.params.get(&param).and_then(Value::as_name)
    }

    pub fn material(&self) -> &str {
        &self.material
    }

    /// The file extension of the material reference, lowercased.
    pub fn extension(&self) -> Option<String> {
        let file_name = self.material.rsplit(['/', '\\']).next()?;
        let (stem, ext) = file_name.rsplit_once('.')?;
        (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }

    pub fn temperature(&self) -> f64 {
        self.number(Param::Temp)
    }

    pub fn dcutoff(&self) -> f64 {
        self.number(Param::DCutoff)
    }

    pub fn dcutoffup(&self) -> f64 {
        self.number(Param::DCutoffUp)
    }

    pub fn packfact(&self) -> f64 {
        self.number(Param::PackFact)
    }

    pub fn info_factory(&self) -> Option<&str> {
        self.name_of(Param::InfoFactory)
    }

    pub fn scat_factory(&self) -> Option<&str> {
        self.name_of(Param::ScatFactory)
    }

    pub fn absn_factory(&self) -> Option<&str> {
        self.name_of(Param::AbsnFactory)
    }

    pub fn is_set(&self, param: Param) -> bool {
        self.params.contains_key(&param)
    }

    pub fn canonical(&self) -> CacheKey {
        self.render(|_| true)
    }

    /// Projects the configuration onto `keep`, dropping every other parameter.
    pub fn narrow_key(&self, keep: &[Param]) -> CacheKey {
        self.render(|p| keep.contains(&p))
    }

    /// A copy in which every parameter outside `keep` is reset to its default.
    ///
    /// `self.project(keep).canonical() == self.narrow_key(keep)`.
    pub fn project(&self, keep: &[Param]) -> MatCfg {
        MatCfg {
            material: self.material.clone(),
            params: self
                .params
                .iter()
                .filter(|(p, _)| keep.contains(p))
                .map(|(p, v)| (*p, v.clone()))
                .collect(),
        }
    }

    fn render(&self, include: impl Fn(Param) -> bool) -> CacheKey {
        let params = self
            .params
            .iter()
            .filter(|(p, _)| include(**p))
            .map(|(p, v)| format!("{}={}", p, v));
        CacheKey(
            std::iter::once(self.material.clone())
                .chain(params)
                .join(";"),
        )
    }
}

impl FromStr for MatCfg {
    type Err = ConfigSyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MatCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// Parses `raw` and returns its canonical key.
pub fn canonicalize(raw: &str) -> Result<CacheKey, ConfigSyntaxError> {
    MatCfg::parse(raw).map(|cfg| cfg.canonical())
}
