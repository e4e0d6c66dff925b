//! Values exchanged with the host.
//!
//! Every argument and every reply crossing the foreign call boundary is a
//! `HostValue`. "Absent" on the script side is `HostValue::Null`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Value types that can cross the bridge (must be serializable)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum HostValue {
    /// Null / absent value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (f64 for JS compatibility)
    Number(f64),
    /// String value
    String(String),
    /// Array of values
    Array(Vec<HostValue>),
    /// Object/map of values
    Object(HashMap<String, HostValue>),
}

impl HostValue {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as a non-negative integer, if the number is integral
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            HostValue::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= u64::MAX as f64 => {
                Some(*n as u64)
            }
            _ => None,
        }
    }

    /// Get as a signed integer, if the number is integral
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HostValue::Number(n)
                if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 =>
            {
                Some(*n as i64)
            }
            _ => None,
        }
    }

    /// Get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&Vec<HostValue>> {
        match self {
            HostValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as object
    pub fn as_object(&self) -> Option<&HashMap<String, HostValue>> {
        match self {
            HostValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Map `Null` to `None`
    pub fn into_option(self) -> Option<HostValue> {
        match self {
            HostValue::Null => None,
            other => Some(other),
        }
    }
}

impl fmt::Display for HostValue {
    /// Stringifies the way script code would (`String(value)`)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => write!(f, "null"),
            HostValue::Bool(b) => write!(f, "{}", b),
            HostValue::Number(n) => fmt_number(*n, f),
            HostValue::String(s) => write!(f, "{}", s),
            HostValue::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            HostValue::Object(_) => write!(f, "[object Object]"),
        }
    }
}

/// Script number formatting: plain decimal inside `[1e-6, 1e21)`, exponent
/// form with an explicit sign outside it.
fn fmt_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.is_nan() {
        return write!(f, "NaN");
    }
    if n.is_infinite() {
        return write!(f, "{}", if n > 0.0 { "Infinity" } else { "-Infinity" });
    }
    if n == 0.0 {
        // Covers -0 as well
        return write!(f, "0");
    }

    let magnitude = n.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return write!(f, "{}", n);
    }

    let exp = format!("{:e}", n);
    match exp.split_once('e') {
        Some((mantissa, power)) if !power.starts_with('-') => write!(f, "{}e+{}", mantissa, power),
        _ => write!(f, "{}", exp),
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        HostValue::Number(n as f64)
    }
}

impl From<u64> for HostValue {
    fn from(n: u64) -> Self {
        HostValue::Number(n as f64)
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(HostValue::Null)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(v: Vec<T>) -> Self {
        HostValue::Array(v.into_iter().map(Into::into).collect())
    }
}
