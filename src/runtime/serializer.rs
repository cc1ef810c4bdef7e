use crate::error::TemplateError;
use crate::runtime::value::Value;
use indexmap::IndexMap;
use serde::Serialize;
use serde::ser::{self, Error as _};

type Out = std::result::Result<Value, TemplateError>;

/// 把任意 `Serialize` 拷贝为运行时 [`Value`]。
///
/// 枚举按外部标记表示：单元变体为字符串，其余为 `{变体名: 内容}`。
pub struct ValueSerializer;

macro_rules! lossless_int {
    ($($method:ident: $ty:ty),*) => {
        $(fn $method(self, v: $ty) -> Out {
            Ok(Value::Int(i64::from(v)))
        })*
    };
}

fn tagged(variant: &str, inner: Value) -> Value {
    let mut map = IndexMap::with_capacity(1);
    map.insert(variant.to_string(), inner);
    Value::Map(map)
}

impl ser::Serializer for ValueSerializer {
    type Ok = Value;
    type Error = TemplateError;
    type SerializeSeq = ListSerializer;
    type SerializeTuple = ListSerializer;
    type SerializeTupleStruct = ListSerializer;
    type SerializeTupleVariant = ListSerializer;
    type SerializeMap = MapSerializer;
    type SerializeStruct = MapSerializer;
    type SerializeStructVariant = MapSerializer;

    lossless_int!(serialize_i8: i8, serialize_i16: i16, serialize_i32: i32, serialize_i64: i64,
        serialize_u8: u8, serialize_u16: u16, serialize_u32: u32);

    fn serialize_u64(self, v: u64) -> Out {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| TemplateError::custom(format!("integer {} out of range", v)))
    }

    fn serialize_bool(self, v: bool) -> Out {
        Ok(Value::Bool(v))
    }

    fn serialize_f32(self, v: f32) -> Out {
        Ok(Value::Float(f64::from(v)))
    }

    fn serialize_f64(self, v: f64) -> Out {
        Ok(Value::Float(v))
    }

    fn serialize_char(self, v: char) -> Out {
        Ok(Value::Str(v.into()))
    }

    fn serialize_str(self, v: &str) -> Out {
        Ok(Value::Str(v.into()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Out {
        Ok(Value::List(v.iter().map(|b| Value::Int(i64::from(*b))).collect()))
    }

    fn serialize_none(self) -> Out {
        Ok(Value::Null)
    }

    fn serialize_unit(self) -> Out {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Out {
        Ok(Value::Null)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Out {
        value.serialize(self)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(self, _name: &'static str, value: &T) -> Out {
        value.serialize(self)
    }

    fn serialize_unit_variant(self, _name: &'static str, _index: u32, variant: &'static str) -> Out {
        Ok(Value::Str(variant.into()))
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Out {
        Ok(tagged(variant, value.serialize(ValueSerializer)?))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<ListSerializer, TemplateError> {
        Ok(ListSerializer::new(len.unwrap_or(0), None))
    }

    fn serialize_tuple(self, len: usize) -> Result<ListSerializer, TemplateError> {
        Ok(ListSerializer::new(len, None))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<ListSerializer, TemplateError> {
        Ok(ListSerializer::new(len, None))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<ListSerializer, TemplateError> {
        Ok(ListSerializer::new(len, Some(variant)))
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapSerializer, TemplateError> {
        Ok(MapSerializer::new(len.unwrap_or(0), None))
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<MapSerializer, TemplateError> {
        Ok(MapSerializer::new(len, None))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<MapSerializer, TemplateError> {
        Ok(MapSerializer::new(len, Some(variant)))
    }
}

pub struct ListSerializer {
    items: Vec<Value>,
    variant: Option<&'static str>,
}

impl ListSerializer {
    fn new(len: usize, variant: Option<&'static str>) -> Self {
        Self {
            items: Vec::with_capacity(len),
            variant,
        }
    }

    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), TemplateError> {
        self.items.push(value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn finish(self) -> Out {
        let list = Value::List(self.items);
        Ok(match self.variant {
            Some(variant) => tagged(variant, list),
            None => list,
        })
    }
}

macro_rules! list_like {
    ($($trait:ident::$method:ident),*) => {
        $(impl ser::$trait for ListSerializer {
            type Ok = Value;
            type Error = TemplateError;

            fn $method<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), TemplateError> {
                self.push(value)
            }

            fn end(self) -> Out {
                self.finish()
            }
        })*
    };
}

list_like!(
    SerializeSeq::serialize_element,
    SerializeTuple::serialize_element,
    SerializeTupleStruct::serialize_field,
    SerializeTupleVariant::serialize_field
);

pub struct MapSerializer {
    entries: IndexMap<String, Value>,
    pending_key: Option<String>,
    variant: Option<&'static str>,
}

impl MapSerializer {
    fn new(len: usize, variant: Option<&'static str>) -> Self {
        Self {
            entries: IndexMap::with_capacity(len),
            pending_key: None,
            variant,
        }
    }

    fn finish(self) -> Out {
        let map = Value::Map(self.entries);
        Ok(match self.variant {
            Some(variant) => tagged(variant, map),
            None => map,
        })
    }
}

impl ser::SerializeMap for MapSerializer {
    type Ok = Value;
    type Error = TemplateError;

    /// 字符串、整数与布尔键会转为字符串键
    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), TemplateError> {
        let key = match key.serialize(ValueSerializer)? {
            Value::Str(s) => s,
            scalar @ (Value::Int(_) | Value::Bool(_)) => scalar.to_string(),
            other => {
                return Err(TemplateError::custom(format!(
                    "map keys must be strings, got {}",
                    other.type_name()
                )));
            }
        };
        self.pending_key = Some(key);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), TemplateError> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| TemplateError::custom("map value without a key"))?;
        self.entries.insert(key, value.serialize(ValueSerializer)?);
        Ok(())
    }

    fn end(self) -> Out {
        self.finish()
    }
}

macro_rules! struct_like {
    ($($trait:ident),*) => {
        $(impl ser::$trait for MapSerializer {
            type Ok = Value;
            type Error = TemplateError;

            fn serialize_field<T: ?Sized + Serialize>(
                &mut self,
                key: &'static str,
                value: &T,
            ) -> Result<(), TemplateError> {
                self.entries.insert(key.to_string(), value.serialize(ValueSerializer)?);
                Ok(())
            }

            fn end(self) -> Out {
                self.finish()
            }
        })*
    };
}

struct_like!(SerializeStruct, SerializeStructVariant);

#[cfg(test)]
mod tests {
    use crate::runtime::value::{Value, to_value};
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    enum Shape {
        Empty,
        Circle(f64),
        Rect { w: i32, h: i32 },
    }

    #[test]
    fn test_unit_is_null() {
        assert_eq!(to_value(&()).unwrap(), Value::Null);
        assert_eq!(to_value(&None::<i32>).unwrap(), Value::Null);
    }

    #[test]
    fn test_tuple_and_integer_keys() {
        let v = to_value(&(1, "hello")).unwrap();
        assert_eq!(v, Value::List(vec![Value::Int(1), Value::from("hello")]));

        let mut m = BTreeMap::new();
        m.insert(2, "b");
        m.insert(1, "a");
        let v = to_value(&m).unwrap();
        assert_eq!(v.member("1"), Value::from("a"));
    }

    #[test]
    fn test_enum_variants_are_tagged() {
        assert_eq!(to_value(&Shape::Empty).unwrap(), Value::from("Empty"));
        let circle = to_value(&Shape::Circle(1.5)).unwrap();
        assert_eq!(circle.member("Circle"), Value::Float(1.5));
        let rect = to_value(&Shape::Rect { w: 2, h: 3 }).unwrap();
        assert_eq!(rect.member("Rect").member("h"), Value::Int(3));
    }

    #[test]
    fn test_u64_overflow() {
        assert!(to_value(&u64::MAX).is_err());
        assert_eq!(to_value(&7u64).unwrap(), Value::Int(7));
    }
}
