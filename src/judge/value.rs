use std::collections::BTreeMap;
use std::fmt;

use serde_json as json;

/// A declared parameter or return type from a problem signature.
///
/// Type strings follow Python typing spellings and are matched
/// case-insensitively: `int`, `float`, `str`, `bool`, `any`,
/// `list[T]`, `set[T]`, `dict[str, T]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Float,
    Str,
    Bool,
    Any,
    List(Box<ParamType>),
    Set(Box<ParamType>),
    Dict(Box<ParamType>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoercionError {
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("cannot coerce {value} to {ty}")]
    Mismatch { ty: String, value: String },
}

impl ParamType {
    pub fn parse(raw: &str) -> Result<Self, CoercionError> {
        let s = raw.trim();
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "int" | "integer" => return Ok(Self::Int),
            "float" | "double" => return Ok(Self::Float),
            "str" | "string" => return Ok(Self::Str),
            "bool" | "boolean" => return Ok(Self::Bool),
            "any" | "" => return Ok(Self::Any),
            _ => {}
        }

        if let Some(inner) = strip_generic(&lower, "list") {
            return Ok(Self::List(Box::new(Self::parse(inner)?)));
        }
        if let Some(inner) = strip_generic(&lower, "set") {
            return Ok(Self::Set(Box::new(Self::parse(inner)?)));
        }
        if let Some(inner) = strip_generic(&lower, "dict") {
            // Keys are always strings in the JSON test-case encoding, so only
            // the value type is carried.
            let value_ty = match inner.split_once(',') {
                Some((_key, value)) => value,
                None => inner,
            };
            return Ok(Self::Dict(Box::new(Self::parse(value_ty)?)));
        }

        Err(CoercionError::UnknownType(s.to_string()))
    }

    fn name(&self) -> String {
        match self {
            Self::Int => "int".into(),
            Self::Float => "float".into(),
            Self::Str => "str".into(),
            Self::Bool => "bool".into(),
            Self::Any => "any".into(),
            Self::List(t) => format!("list[{}]", t.name()),
            Self::Set(t) => format!("set[{}]", t.name()),
            Self::Dict(t) => format!("dict[str, {}]", t.name()),
        }
    }
}

fn strip_generic<'a>(s: &'a str, head: &str) -> Option<&'a str> {
    let rest = s.strip_prefix(head)?.trim_start();
    rest.strip_prefix('[')?.strip_suffix(']')
}

/// Tagged runtime value for test-case inputs and outputs.
///
/// Both the expected output and the program's actual output are coerced into
/// this model before comparison, so equality is structural rather than
/// textual. `Set` values are kept order-insensitive by sorting elements into
/// a canonical order at coercion time.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Coerce a JSON literal to the declared type.
    pub fn coerce(ty: &ParamType, raw: &json::Value) -> Result<Self, CoercionError> {
        let mismatch = || CoercionError::Mismatch {
            ty: ty.name(),
            value: raw.to_string(),
        };

        match ty {
            ParamType::Any => Ok(Self::from_json(raw)),
            ParamType::Int => match raw {
                json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Ok(Self::Int(i))
                    } else {
                        // Tolerate whole-valued floats the way JSON often
                        // round-trips them (3.0 for 3).
                        match n.as_f64() {
                            Some(f) if f.fract() == 0.0 => Ok(Self::Int(f as i64)),
                            _ => Err(mismatch()),
                        }
                    }
                }
                _ => Err(mismatch()),
            },
            ParamType::Float => raw.as_f64().map(Self::Float).ok_or_else(mismatch),
            ParamType::Str => match raw {
                json::Value::String(s) => Ok(Self::Str(s.clone())),
                _ => Err(mismatch()),
            },
            ParamType::Bool => raw.as_bool().map(Self::Bool).ok_or_else(mismatch),
            ParamType::List(elem) => match raw {
                json::Value::Array(items) => items
                    .iter()
                    .map(|item| Self::coerce(elem, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::List),
                _ => Err(mismatch()),
            },
            ParamType::Set(elem) => match raw {
                json::Value::Array(items) => {
                    let mut values = items
                        .iter()
                        .map(|item| Self::coerce(elem, item))
                        .collect::<Result<Vec<_>, _>>()?;
                    values.sort_by(|a, b| a.canonical().cmp(&b.canonical()));
                    Ok(Self::List(values))
                }
                _ => Err(mismatch()),
            },
            ParamType::Dict(value_ty) => match raw {
                json::Value::Object(entries) => entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::coerce(value_ty, v)?)))
                    .collect::<Result<BTreeMap<_, _>, _>>()
                    .map(Self::Map),
                _ => Err(mismatch()),
            },
        }
    }

    /// Untyped conversion, used for `any`-typed slots and for echoing raw
    /// inputs back in verdicts.
    pub fn from_json(raw: &json::Value) -> Self {
        match raw {
            json::Value::Null => Self::Null,
            json::Value::Bool(b) => Self::Bool(*b),
            json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            json::Value::String(s) => Self::Str(s.clone()),
            json::Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            json::Value::Object(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> json::Value {
        match self {
            Self::Null => json::Value::Null,
            Self::Bool(b) => json::Value::Bool(*b),
            Self::Int(i) => json::Value::from(*i),
            Self::Float(f) => json::Number::from_f64(*f)
                .map(json::Value::Number)
                .unwrap_or(json::Value::Null),
            Self::Str(s) => json::Value::String(s.clone()),
            Self::List(items) => json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(entries) => json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Compact canonical text form, used on the wire and for set ordering.
    pub fn canonical(&self) -> String {
        self.to_json().to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
