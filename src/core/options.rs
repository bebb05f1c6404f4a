//! Schema-driven sanitizer for the untrusted `options` object of a render
//! request.
//!
//! The schema is declared once in the render configuration. Only keys that
//! appear in the schema ever reach the renderer; everything else is dropped
//! without complaint.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Declared type of a render option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum OptionType {
    #[serde(alias = "number")]
    Number,
    #[serde(alias = "boolean", alias = "bool")]
    Boolean,
    #[serde(alias = "string")]
    String,
}

/// Inclusive numeric bounds. Either side may be left open.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Boundaries {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// Key substitution for boolean options: the option key is replaced by one of
/// these depending on the input value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeTo {
    #[serde(rename = "true", alias = "trueKey")]
    pub true_key: String,
    #[serde(rename = "false", alias = "falseKey")]
    pub false_key: String,
}

/// One entry of the option schema.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AllowedOptionSpec {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: OptionType,
    #[serde(default)]
    pub boundaries: Option<Boundaries>,
    #[serde(default, rename = "changeTo")]
    pub change_to: Option<ChangeTo>,
}

impl AllowedOptionSpec {
    pub fn number(key: &str) -> Self {
        Self {
            key: key.to_string(),
            kind: OptionType::Number,
            boundaries: None,
            change_to: None,
        }
    }

    pub fn boolean(key: &str) -> Self {
        Self {
            key: key.to_string(),
            kind: OptionType::Boolean,
            boundaries: None,
            change_to: None,
        }
    }

    pub fn string(key: &str) -> Self {
        Self {
            key: key.to_string(),
            kind: OptionType::String,
            boundaries: None,
            change_to: None,
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.boundaries = Some(Boundaries { min, max });
        self
    }

    pub fn with_change_to(mut self, true_key: &str, false_key: &str) -> Self {
        self.change_to = Some(ChangeTo {
            true_key: true_key.to_string(),
            false_key: false_key.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing URL")]
    MissingUrl,

    #[error("URL must be an absolute http(s) URL")]
    InvalidUrl,

    #[error("Format '{0}' must be alphanumeric")]
    InvalidFormat(String),

    #[error("Options must be a valid JSON object: {0}")]
    MalformedOptions(String),

    #[error("Option '{key}' must be a number")]
    NotANumber { key: String },

    #[error("Option '{key}' must not be smaller than {min}")]
    BelowMinimum { key: String, min: String },

    #[error("Option '{key}' must not be larger than {max}")]
    AboveMaximum { key: String, max: String },
}

/// A sanitized option value, tagged by the schema type it was validated
/// against.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Number(f64),
    /// Presence flag: the key alone carries the meaning.
    Flag,
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Number(n) => f.write_str(&format_number(*n)),
            OptionValue::Flag => Ok(()),
            OptionValue::Text(s) => f.write_str(s),
        }
    }
}

/// Validated options in schema order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedOptions {
    entries: Vec<(String, OptionValue)>,
}

impl ValidatedOptions {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Stringified value for `key`; presence flags yield `""`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Discrete renderer arguments: `--key` followed by the value unless the
    /// option is a presence flag.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.entries.len() * 2);
        for (key, value) in &self.entries {
            args.push(format!("--{}", key));
            if !matches!(value, OptionValue::Flag) {
                args.push(value.to_string());
            }
        }
        args
    }

    /// Flat option string used for the human-readable command line, e.g.
    /// `--width 800 --quiet `.
    pub fn to_options_string(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            match value {
                OptionValue::Flag => out.push_str(&format!("--{} ", key)),
                other => out.push_str(&format!("--{} {} ", key, other)),
            }
        }
        out
    }

    fn push(&mut self, key: String, value: OptionValue) {
        self.entries.push((key, value));
    }
}

impl Serialize for ValidatedOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, &value.to_string())?;
        }
        map.end()
    }
}

/// Parse the raw `options` parameter. An empty string counts as `{}`.
pub fn parse_raw_options(raw: &str) -> Result<Map<String, JsonValue>, ValidationError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(other) => Err(ValidationError::MalformedOptions(format!(
            "expected an object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ValidationError::MalformedOptions(e.to_string())),
    }
}

/// Validate `raw` against `schema`, walking the schema in order and failing
/// on the first violated constraint.
pub fn validate(
    raw: &Map<String, JsonValue>,
    schema: &[AllowedOptionSpec],
) -> Result<ValidatedOptions, ValidationError> {
    let mut validated = ValidatedOptions::default();

    for spec in schema {
        let Some(value) = raw.get(&spec.key) else {
            continue;
        };

        match spec.kind {
            OptionType::Number => {
                let number = parse_number(value).ok_or_else(|| ValidationError::NotANumber {
                    key: spec.key.clone(),
                })?;
                if let Some(bounds) = &spec.boundaries {
                    check_bounds(&spec.key, number, bounds)?;
                }
                validated.push(spec.key.clone(), OptionValue::Number(number));
            }
            OptionType::Boolean => match &spec.change_to {
                Some(change_to) => {
                    let key = if is_truthy(value) {
                        &change_to.true_key
                    } else {
                        &change_to.false_key
                    };
                    validated.push(key.clone(), OptionValue::Flag);
                }
                None => {
                    if !is_false_literal(value) {
                        validated.push(spec.key.clone(), OptionValue::Flag);
                    }
                }
            },
            OptionType::String => {
                let text = match value {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                validated.push(spec.key.clone(), OptionValue::Text(text));
            }
        }
    }

    Ok(validated)
}

fn check_bounds(key: &str, number: f64, bounds: &Boundaries) -> Result<(), ValidationError> {
    if let Some(min) = bounds.min {
        if number < min {
            return Err(ValidationError::BelowMinimum {
                key: key.to_string(),
                min: format_number(min),
            });
        }
    }
    if let Some(max) = bounds.max {
        if number > max {
            return Err(ValidationError::AboveMaximum {
                key: key.to_string(),
                max: format_number(max),
            });
        }
    }
    Ok(())
}

fn parse_number(value: &JsonValue) -> Option<f64> {
    let number = match value {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Null => false,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !matches!(s.trim(), "" | "0" | "false"),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

fn is_false_literal(value: &JsonValue) -> bool {
    matches!(value, JsonValue::String(s) if s == "false")
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Integral values print without a fractional part (`800`, not `800.0`).
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
