//! Codec - key / value のシリアライズ
//!
//! # 役割
//! - `encode_key`: canonical key 用。決定的（object の key はソート済み、空白なし）
//! - `encode_value` / `decode_value`: CompletedTask.value の保存と復元
//!
//! JSON は NaN / Infinity を `null` に潰してしまうため、事前に走査して拒否する。

use serde::de::DeserializeOwned;
use serde::ser::{self, Serialize};

use crate::domain::errors::CodecError;

/// Codec は TaskPool が使うシリアライズ形式
///
/// key と value の両方を同じ Codec で扱う。
pub trait Codec: Send + Sync + 'static {
    fn encode_key<T: Serialize + ?Sized>(&self, key: &T) -> Result<String, CodecError>;

    fn encode_value<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, CodecError>;

    fn decode_value<T: DeserializeOwned>(&self, raw: &str) -> Result<T, CodecError>;
}

/// serde_json ベースの Codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode_key<T: Serialize + ?Sized>(&self, key: &T) -> Result<String, CodecError> {
        reject_non_finite(key)?;
        // Value の Map は BTreeMap なので key 順が固定される
        let value = serde_json::to_value(key)?;
        Ok(value.to_string())
    }

    fn encode_value<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, CodecError> {
        reject_non_finite(value)?;
        Ok(serde_json::to_string(value)?)
    }

    fn decode_value<T: DeserializeOwned>(&self, raw: &str) -> Result<T, CodecError> {
        Ok(serde_json::from_str(raw)?)
    }
}

fn reject_non_finite<T: Serialize + ?Sized>(value: &T) -> Result<(), CodecError> {
    value.serialize(FiniteCheck)
}

impl ser::Error for CodecError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        CodecError::Json(<serde_json::Error as ser::Error>::custom(msg))
    }
}

/// Walks a value and fails on the first NaN / ±Infinity.
struct FiniteCheck;

macro_rules! accept {
    ($($method:ident: $ty:ty),* $(,)?) => {
        $(
            fn $method(self, _v: $ty) -> Result<(), CodecError> {
                Ok(())
            }
        )*
    };
}

impl ser::Serializer for FiniteCheck {
    type Ok = ();
    type Error = CodecError;

    type SerializeSeq = FiniteCheck;
    type SerializeTuple = FiniteCheck;
    type SerializeTupleStruct = FiniteCheck;
    type SerializeTupleVariant = FiniteCheck;
    type SerializeMap = FiniteCheck;
    type SerializeStruct = FiniteCheck;
    type SerializeStructVariant = FiniteCheck;

    accept!(
        serialize_bool: bool,
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_i128: i128,
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64,
        serialize_u128: u128,
        serialize_char: char,
        serialize_str: &str,
        serialize_bytes: &[u8],
        serialize_unit_struct: &'static str,
    );

    fn serialize_f32(self, v: f32) -> Result<(), CodecError> {
        check_float(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<(), CodecError> {
        check_float(v)
    }

    fn serialize_none(self) -> Result<(), CodecError> {
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), CodecError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), CodecError> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<FiniteCheck, CodecError> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<FiniteCheck, CodecError> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<FiniteCheck, CodecError> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<FiniteCheck, CodecError> {
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<FiniteCheck, CodecError> {
        Ok(self)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<FiniteCheck, CodecError> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<FiniteCheck, CodecError> {
        Ok(self)
    }
}

fn check_float(v: f64) -> Result<(), CodecError> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(CodecError::NonFiniteNumber(v.to_string()))
    }
}

impl ser::SerializeSeq for FiniteCheck {
    type Ok = ();
    type Error = CodecError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl ser::SerializeTuple for FiniteCheck {
    type Ok = ();
    type Error = CodecError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for FiniteCheck {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for FiniteCheck {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl ser::SerializeMap for FiniteCheck {
    type Ok = ();
    type Error = CodecError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), CodecError> {
        key.serialize(FiniteCheck)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteCheck {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteCheck {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        value.serialize(FiniteCheck)
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SlowOutput {
        id: String,
        name: String,
        other_id: i64,
        score: Option<f64>,
    }

    #[test]
    fn value_roundtrip() {
        let out = SlowOutput {
            id: "7".into(),
            name: "seven".into(),
            other_id: 7,
            score: Some(0.5),
        };
        let raw = JsonCodec.encode_value(&out).unwrap();
        let back: SlowOutput = JsonCodec.decode_value(&raw).unwrap();
        assert_eq!(back, out);
    }

    #[test]
    fn nested_non_finite_is_rejected() {
        let out = SlowOutput {
            id: "7".into(),
            name: "seven".into(),
            other_id: 7,
            score: Some(f64::INFINITY),
        };
        assert!(matches!(
            JsonCodec.encode_value(&out),
            Err(CodecError::NonFiniteNumber(_))
        ));
        assert!(matches!(
            JsonCodec.encode_key(&vec![1.0_f32, f32::NAN]),
            Err(CodecError::NonFiniteNumber(_))
        ));
    }

    #[test]
    fn key_encoding_is_compact_and_sorted() {
        let key = serde_json::json!({"b": 1, "a": [true, null]});
        assert_eq!(JsonCodec.encode_key(&key).unwrap(), r#"{"a":[true,null],"b":1}"#);
    }

    #[test]
    fn decode_reports_bad_payload() {
        let err = JsonCodec.decode_value::<SlowOutput>("{not json").unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
    }
}
