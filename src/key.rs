//! Cache key derivation from argument lists.
//!
//! An argument list is anything `Serialize`; a tuple is treated as an ordered
//! list of arguments and any other value as a single argument. Primitives are
//! written directly, structured arguments as canonical JSON with object keys
//! sorted, so `{a:1,b:2}` and `{b:2,a:1}` produce the same key. No hashing is
//! involved. Non-finite floats have no canonical text and are rejected.
//!
//! ```
//! use flight_cache::key::KeyCodec;
//!
//! let key = KeyCodec::encode(&("projects", 2026, 10)).unwrap();
//! assert_eq!(key.as_str(), "projects|2026|10");
//!
//! let empty = KeyCodec::encode(&()).unwrap();
//! assert_eq!(empty.as_str(), "default");
//! ```

use crate::error::{Error, Result};
use serde::ser::{self, Serialize};
use serde_json::Value;
use std::fmt;

/// Key used for an empty argument list.
pub const DEFAULT_KEY: &str = "default";

/// Separator between argument parts.
pub const PART_SEPARATOR: char = '|';

/// A cache key derived from an argument list.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already-encoded key.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        CacheKey(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Deterministic argument-list serializer.
pub struct KeyCodec;

impl KeyCodec {
    /// Encode an argument list into a cache key.
    ///
    /// # Errors
    ///
    /// Returns `Error::SerializationError` when an argument cannot be
    /// represented canonically, for example a map with non-string keys or a
    /// NaN or infinite float.
    pub fn encode<A: Serialize + ?Sized>(args: &A) -> Result<CacheKey> {
        // serde_json would write these as `null`
        args.serialize(FiniteFloats).map_err(|e| {
            Error::SerializationError(format!("cannot derive cache key: {}", e))
        })?;

        let value = serde_json::to_value(args).map_err(|e| {
            Error::SerializationError(format!("cannot derive cache key: {}", e))
        })?;

        let parts = match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .iter()
                .map(encode_part)
                .collect::<Result<Vec<_>>>()?,
            other => vec![encode_part(&other)?],
        };

        if parts.is_empty() {
            return Ok(CacheKey(DEFAULT_KEY.to_string()));
        }

        Ok(CacheKey(parts.join(&PART_SEPARATOR.to_string())))
    }

    /// Build the `namespace/key` label used in logs and metrics.
    pub fn label(namespace: &str, key: &CacheKey) -> String {
        format!("{}/{}", namespace, key)
    }
}

fn encode_part(value: &Value) -> Result<String> {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(_) | Value::Object(_) => {
            let mut out = String::new();
            write_canonical(value, &mut out)?;
            out
        }
    };
    Ok(escape(&raw))
}

/// Write `value` as JSON with object keys in sorted order.
fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k)?);
                out.push(':');
                write_canonical(v, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// Serializer that walks a value only to reject non-finite floats.
struct FiniteFloats;

#[derive(Debug)]
struct NonFinite(String);

impl fmt::Display for NonFinite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NonFinite {}

impl ser::Error for NonFinite {
    fn custom<M: fmt::Display>(msg: M) -> Self {
        NonFinite(msg.to_string())
    }
}

type Walk = std::result::Result<(), NonFinite>;

macro_rules! accept {
    ($($method:ident($ty:ty)),* $(,)?) => {
        $(
            fn $method(self, _v: $ty) -> Walk {
                Ok(())
            }
        )*
    };
}

impl ser::Serializer for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept!(
        serialize_bool(bool),
        serialize_i8(i8),
        serialize_i16(i16),
        serialize_i32(i32),
        serialize_i64(i64),
        serialize_i128(i128),
        serialize_u8(u8),
        serialize_u16(u16),
        serialize_u32(u32),
        serialize_u64(u64),
        serialize_u128(u128),
        serialize_char(char),
        serialize_str(&str),
        serialize_bytes(&[u8]),
    );

    fn serialize_f32(self, v: f32) -> Walk {
        self.serialize_f64(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Walk {
        if v.is_finite() {
            Ok(())
        } else {
            Err(NonFinite(format!("non-finite float {}", v)))
        }
    }

    fn serialize_none(self) -> Walk {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Walk {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Walk {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Walk {
        Ok(())
    }

    fn serialize_unit_variant(self, _name: &'static str, _index: u32, _variant: &'static str) -> Walk {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(self, _name: &'static str, value: &T) -> Walk {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Walk {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> std::result::Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> std::result::Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> std::result::Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> std::result::Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> std::result::Result<Self, NonFinite> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self, NonFinite> {
        Ok(self)
    }
}

impl ser::SerializeSeq for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Walk {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Walk {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Walk {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Walk {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Walk {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Walk {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Walk {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Walk {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Walk {
        key.serialize(FiniteFloats)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Walk {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Walk {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _key: &'static str, value: &T) -> Walk {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Walk {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteFloats {
    type Ok = ();
    type Error = NonFinite;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, _key: &'static str, value: &T) -> Walk {
        value.serialize(FiniteFloats)
    }

    fn end(self) -> Walk {
        Ok(())
    }
}

fn escape(raw: &str) -> String {
    if !raw.contains(['\\', PART_SEPARATOR]) {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len() + 2);
    for c in raw.chars() {
        if c == '\\' || c == PART_SEPARATOR {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
