//! Tagged value type shared by properties and live signal data.
//!
//! A [`Value`] is a scalar or fixed-length vector of one [`ValueType`]. The
//! only zero-length value is [`Value::NULL`]; every other kind carries at
//! least one element. Values are plain data: cloning is a deep copy and
//! mutation means building a new value.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::pattern::wildcard_match;
use super::Timetag;
use crate::{Error, Result};

// ============================================================================
// ValueType
// ============================================================================

/// The element kind of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Null,
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Time,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Int32 => "int32",
            ValueType::Int64 => "int64",
            ValueType::Float32 => "float32",
            ValueType::Float64 => "float64",
            ValueType::String => "string",
            ValueType::Time => "time",
        }
    }

    /// Single-character OSC type tag.
    pub fn type_tag(self) -> char {
        match self {
            ValueType::Null => 'N',
            ValueType::Bool => 'b',
            ValueType::Int32 => 'i',
            ValueType::Int64 => 'h',
            ValueType::Float32 => 'f',
            ValueType::Float64 => 'd',
            ValueType::String => 's',
            ValueType::Time => 't',
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Int32 | ValueType::Int64 | ValueType::Float32 | ValueType::Float64)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ValueType {
    type Err = Error;

    /// Accepts both the long names and the OSC type tags.
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "null" | "N" => ValueType::Null,
            "bool" | "b" | "T" | "F" => ValueType::Bool,
            "int32" | "int" | "i" => ValueType::Int32,
            "int64" | "h" => ValueType::Int64,
            "float32" | "float" | "f" => ValueType::Float32,
            "float64" | "double" | "d" => ValueType::Float64,
            "string" | "s" => ValueType::String,
            "time" | "t" => ValueType::Time,
            _ => return Err(Error::Parse { input: s.to_owned(), target: "value type".into() }),
        })
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Untyped-at-construction payload. Validated into a [`Value`] by
/// [`Value::new`] / [`Value::from_payload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Payload {
    Null,
    Bool(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    String(Vec<String>),
    Time(Vec<Timetag>),
}

impl Payload {
    pub fn kind(&self) -> ValueType {
        match self {
            Payload::Null => ValueType::Null,
            Payload::Bool(_) => ValueType::Bool,
            Payload::Int32(_) => ValueType::Int32,
            Payload::Int64(_) => ValueType::Int64,
            Payload::Float32(_) => ValueType::Float32,
            Payload::Float64(_) => ValueType::Float64,
            Payload::String(_) => ValueType::String,
            Payload::Time(_) => ValueType::Time,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Null => 0,
            Payload::Bool(v) => v.len(),
            Payload::Int32(v) => v.len(),
            Payload::Int64(v) => v.len(),
            Payload::Float32(v) => v.len(),
            Payload::Float64(v) => v.len(),
            Payload::String(v) => v.len(),
            Payload::Time(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Value
// ============================================================================

/// A validated, immutable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Payload", into = "Payload")]
pub struct Value {
    payload: Payload,
}

/// One element of a value, borrowed.
#[derive(Debug, Clone, Copy)]
enum Elem<'a> {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Str(&'a str),
    Time(Timetag),
}

impl Value {
    pub const NULL: Value = Value { payload: Payload::Null };

    /// Build a value of `kind` from `payload`.
    ///
    /// Fails with `TypeMismatch` if the payload holds a different kind, or
    /// if a non-null kind is given zero elements.
    pub fn new(kind: ValueType, payload: Payload) -> Result<Self> {
        if payload.kind() != kind {
            return Err(Error::TypeMismatch {
                expected: kind.to_string(),
                got: payload.kind().to_string(),
            });
        }
        Self::from_payload(payload)
    }

    /// Validate a payload, inferring the kind.
    pub fn from_payload(payload: Payload) -> Result<Self> {
        if payload.kind() != ValueType::Null && payload.is_empty() {
            return Err(Error::TypeMismatch {
                expected: format!("{} of length >= 1", payload.kind()),
                got: "empty payload".into(),
            });
        }
        Ok(Self { payload })
    }

    pub fn kind(&self) -> ValueType {
        self.payload.kind()
    }

    /// Vector length; 0 only for null.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.payload, Payload::Null)
    }

    pub fn is_null(&self) -> bool {
        self.is_empty()
    }

    pub fn is_numeric(&self) -> bool {
        self.kind().is_numeric()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    // ------------------------------------------------------------------------
    // Scalar extraction (first element, lenient numeric widening)
    // ------------------------------------------------------------------------

    pub fn as_bool(&self) -> Option<bool> {
        match &self.payload {
            Payload::Bool(v) => v.first().copied(),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match &self.payload {
            Payload::Int32(v) => v.first().copied(),
            _ => None,
        }
    }

    /// Integer view of the first element (Int32 widens).
    pub fn as_i64(&self) -> Option<i64> {
        match &self.payload {
            Payload::Int32(v) => v.first().map(|i| *i as i64),
            Payload::Int64(v) => v.first().copied(),
            _ => None,
        }
    }

    /// Floating view of the first numeric element.
    pub fn as_f64(&self) -> Option<f64> {
        match &self.payload {
            Payload::Int32(v) => v.first().map(|i| *i as f64),
            Payload::Int64(v) => v.first().map(|i| *i as f64),
            Payload::Float32(v) => v.first().map(|f| *f as f64),
            Payload::Float64(v) => v.first().copied(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::String(v) => v.first().map(String::as_str),
            _ => None,
        }
    }

    pub fn as_strs(&self) -> Option<&[String]> {
        match &self.payload {
            Payload::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64s(&self) -> Option<Vec<i64>> {
        match &self.payload {
            Payload::Int32(v) => Some(v.iter().map(|i| *i as i64).collect()),
            Payload::Int64(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<Timetag> {
        match &self.payload {
            Payload::Time(v) => v.first().copied(),
            _ => None,
        }
    }

    fn elems(&self) -> Vec<Elem<'_>> {
        match &self.payload {
            Payload::Null => Vec::new(),
            Payload::Bool(v) => v.iter().map(|x| Elem::Bool(*x)).collect(),
            Payload::Int32(v) => v.iter().map(|x| Elem::Int32(*x)).collect(),
            Payload::Int64(v) => v.iter().map(|x| Elem::Int64(*x)).collect(),
            Payload::Float32(v) => v.iter().map(|x| Elem::Float32(*x)).collect(),
            Payload::Float64(v) => v.iter().map(|x| Elem::Float64(*x)).collect(),
            Payload::String(v) => v.iter().map(|x| Elem::Str(x)).collect(),
            Payload::Time(v) => v.iter().map(|x| Elem::Time(*x)).collect(),
        }
    }

    // ------------------------------------------------------------------------
    // Coercion
    // ------------------------------------------------------------------------

    /// Return a copy converted to `target`.
    ///
    /// Numeric narrowing truncates toward zero; anything-to-bool is `!= 0`;
    /// strings parse and format in canonical decimal. Null, and Time to or
    /// from anything but floats, fail with `TypeMismatch`.
    pub fn coerce(&self, target: ValueType) -> Result<Value> {
        let from = self.kind();
        if from == target {
            return Ok(self.clone());
        }
        let mismatch = || Error::TypeMismatch { expected: target.to_string(), got: from.to_string() };
        if from == ValueType::Null || target == ValueType::Null {
            return Err(mismatch());
        }

        let elems = self.elems();
        let payload = match target {
            ValueType::Bool => Payload::Bool(convert(&elems, |e| match e {
                Elem::Bool(b) => Ok(b),
                Elem::Int32(i) => Ok(i != 0),
                Elem::Int64(i) => Ok(i != 0),
                Elem::Float32(f) => Ok(f != 0.0),
                Elem::Float64(f) => Ok(f != 0.0),
                Elem::Str("true") => Ok(true),
                Elem::Str("false") => Ok(false),
                Elem::Str(s) => Err(parse_error(s, target)),
                Elem::Time(_) => Err(mismatch()),
            })?),
            ValueType::Int32 => Payload::Int32(convert(&elems, |e| match e {
                Elem::Bool(b) => Ok(b as i32),
                Elem::Int32(i) => Ok(i),
                Elem::Int64(i) => Ok(i as i32),
                Elem::Float32(f) => Ok(f as i32),
                Elem::Float64(f) => Ok(f as i32),
                Elem::Str(s) => s.trim().parse().map_err(|_| parse_error(s, target)),
                Elem::Time(_) => Err(mismatch()),
            })?),
            ValueType::Int64 => Payload::Int64(convert(&elems, |e| match e {
                Elem::Bool(b) => Ok(b as i64),
                Elem::Int32(i) => Ok(i as i64),
                Elem::Int64(i) => Ok(i),
                Elem::Float32(f) => Ok(f as i64),
                Elem::Float64(f) => Ok(f as i64),
                Elem::Str(s) => s.trim().parse().map_err(|_| parse_error(s, target)),
                Elem::Time(_) => Err(mismatch()),
            })?),
            ValueType::Float32 => Payload::Float32(convert(&elems, |e| match e {
                Elem::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
                Elem::Int32(i) => Ok(i as f32),
                Elem::Int64(i) => Ok(i as f32),
                Elem::Float32(f) => Ok(f),
                Elem::Float64(f) => Ok(f as f32),
                Elem::Str(s) => s.trim().parse().map_err(|_| parse_error(s, target)),
                Elem::Time(t) => Ok(t.as_secs_f64() as f32),
            })?),
            ValueType::Float64 => Payload::Float64(convert(&elems, |e| match e {
                Elem::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
                Elem::Int32(i) => Ok(i as f64),
                Elem::Int64(i) => Ok(i as f64),
                Elem::Float32(f) => Ok(f as f64),
                Elem::Float64(f) => Ok(f),
                Elem::Str(s) => s.trim().parse().map_err(|_| parse_error(s, target)),
                Elem::Time(t) => Ok(t.as_secs_f64()),
            })?),
            ValueType::String => Payload::String(convert(&elems, |e| match e {
                Elem::Bool(b) => Ok(b.to_string()),
                Elem::Int32(i) => Ok(i.to_string()),
                Elem::Int64(i) => Ok(i.to_string()),
                Elem::Float32(f) => Ok(f.to_string()),
                Elem::Float64(f) => Ok(f.to_string()),
                Elem::Str(s) => Ok(s.to_owned()),
                Elem::Time(_) => Err(mismatch()),
            })?),
            ValueType::Time => Payload::Time(convert(&elems, |e| match e {
                Elem::Float32(f) => Ok(Timetag::from_secs_f64(f as f64)),
                Elem::Float64(f) => Ok(Timetag::from_secs_f64(f)),
                Elem::Time(t) => Ok(t),
                _ => Err(mismatch()),
            })?),
            ValueType::Null => unreachable!("handled above"),
        };
        Ok(Value { payload })
    }

    // ------------------------------------------------------------------------
    // Comparison
    // ------------------------------------------------------------------------

    /// Element-wise lexicographic comparison of two values of the same kind.
    /// Returns `None` for differing kinds, null, or unordered floats.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if self.kind() != other.kind() || self.is_null() {
            return None;
        }
        let (a, b) = (self.elems(), other.elems());
        for (x, y) in a.iter().zip(b.iter()) {
            let ord = match (x, y) {
                (Elem::Bool(x), Elem::Bool(y)) => x.cmp(y),
                (Elem::Int32(x), Elem::Int32(y)) => x.cmp(y),
                (Elem::Int64(x), Elem::Int64(y)) => x.cmp(y),
                (Elem::Float32(x), Elem::Float32(y)) => x.partial_cmp(y)?,
                (Elem::Float64(x), Elem::Float64(y)) => x.partial_cmp(y)?,
                (Elem::Str(x), Elem::Str(y)) => x.cmp(y),
                (Elem::Time(x), Elem::Time(y)) => x.cmp(y),
                _ => return None,
            };
            if ord != Ordering::Equal {
                return Some(ord);
            }
        }
        Some(a.len().cmp(&b.len()))
    }

    /// Equality where string elements of `pattern` may contain `*` wildcards.
    pub fn matches(&self, pattern: &Value) -> bool {
        match (&self.payload, &pattern.payload) {
            (Payload::String(s), Payload::String(p)) => {
                s.len() == p.len() && s.iter().zip(p).all(|(s, p)| wildcard_match(p, s))
            }
            _ => self.compare(pattern) == Some(Ordering::Equal),
        }
    }
}

fn convert<'a, T>(elems: &[Elem<'a>], f: impl Fn(Elem<'a>) -> Result<T>) -> Result<Vec<T>> {
    elems.iter().map(|e| f(*e)).collect()
}

fn parse_error(input: &str, target: ValueType) -> Error {
    Error::Parse { input: input.to_owned(), target: target.to_string() }
}

impl TryFrom<Payload> for Value {
    type Error = Error;

    fn try_from(payload: Payload) -> Result<Self> {
        Value::from_payload(payload)
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        v.payload
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::NULL
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

macro_rules! value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self { Value { payload: Payload::$variant(vec![v]) } }
            }

            /// An empty vector becomes [`Value::NULL`].
            impl From<Vec<$t>> for Value {
                fn from(v: Vec<$t>) -> Self {
                    if v.is_empty() { Value::NULL } else { Value { payload: Payload::$variant(v) } }
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    Timetag => Time,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::from(v.to_owned())
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::from(v.into_iter().map(str::to_owned).collect::<Vec<_>>())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::NULL)
    }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "null");
        }
        let elems = self.elems();
        if elems.len() > 1 {
            write!(f, "[")?;
        }
        for (i, e) in elems.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match e {
                Elem::Bool(b) => write!(f, "{b}")?,
                Elem::Int32(v) => write!(f, "{v}")?,
                Elem::Int64(v) => write!(f, "{v}")?,
                Elem::Float32(v) => write!(f, "{v}")?,
                Elem::Float64(v) => write!(f, "{v}")?,
                Elem::Str(s) => write!(f, "\"{}\"", s.replace('"', "\\\""))?,
                Elem::Time(t) => write!(f, "{t}")?,
            }
        }
        if elems.len() > 1 {
            write!(f, "]")?;
        }
        Ok(())
    }
}

// ============================================================================
// TimedValue
// ============================================================================

/// A value together with the network time it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    pub value: Value,
    pub time: Timetag,
}

impl TimedValue {
    pub fn new(value: Value, time: Timetag) -> Self {
        Self { value, time }
    }
}
