//! JSON-in-a-column wrapper.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::ToSql;
use serde::de::value::{
  BoolDeserializer, F64Deserializer, I64Deserializer, MapAccessDeserializer,
  SeqAccessDeserializer, StrDeserializer, U64Deserializer, UnitDeserializer,
};
use serde::de::{self, DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Stores `T` as JSON text in a single column.
///
/// As a query argument it binds the JSON text of `T`. As a field of a decoded
/// row it accepts TEXT or BLOB holding JSON; any other column type is a scan
/// error. Elsewhere it is transparent in both directions, so a printed row
/// parses back: strings are first tried as JSON text, then as `T` itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
  pub fn new(value: T) -> Self {
    Self(value)
  }

  pub fn into_inner(self) -> T {
    self.0
  }
}

impl<T> Deref for Json<T> {
  type Target = T;

  fn deref(&self) -> &T {
    &self.0
  }
}

impl<T> DerefMut for Json<T> {
  fn deref_mut(&mut self) -> &mut T {
    &mut self.0
  }
}

impl<T> From<T> for Json<T> {
  fn from(value: T) -> Self {
    Self(value)
  }
}

impl<T: Serialize> ToSql for Json<T> {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    let text = serde_json::to_string(&self.0)
      .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    Ok(ToSqlOutput::Owned(Value::Text(text)))
  }
}

impl<T: DeserializeOwned> FromSql for Json<T> {
  fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
    match value {
      ValueRef::Text(raw) | ValueRef::Blob(raw) => serde_json::from_slice(raw)
        .map(Json)
        .map_err(|e| FromSqlError::Other(Box::new(e))),
      _ => Err(FromSqlError::InvalidType),
    }
  }
}

impl<T: Serialize> Serialize for Json<T> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    self.0.serialize(serializer)
  }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Json<T> {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    deserializer.deserialize_any(JsonVisitor(PhantomData))
  }
}

struct JsonVisitor<T>(PhantomData<T>);

impl<'de, T: DeserializeOwned> Visitor<'de> for JsonVisitor<T> {
  type Value = Json<T>;

  fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("JSON text, JSON bytes or a plain value")
  }

  fn visit_str<E: de::Error>(self, v: &str) -> Result<Json<T>, E> {
    match serde_json::from_str(v) {
      Ok(value) => Ok(Json(value)),
      Err(err) => T::deserialize(StrDeserializer::<E>::new(v))
        .map(Json)
        .map_err(|_| E::custom(err)),
    }
  }

  fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Json<T>, E> {
    serde_json::from_slice(v).map(Json).map_err(E::custom)
  }

  fn visit_bool<E: de::Error>(self, v: bool) -> Result<Json<T>, E> {
    T::deserialize(BoolDeserializer::<E>::new(v)).map(Json)
  }

  fn visit_i64<E: de::Error>(self, v: i64) -> Result<Json<T>, E> {
    T::deserialize(I64Deserializer::<E>::new(v)).map(Json)
  }

  fn visit_u64<E: de::Error>(self, v: u64) -> Result<Json<T>, E> {
    T::deserialize(U64Deserializer::<E>::new(v)).map(Json)
  }

  fn visit_f64<E: de::Error>(self, v: f64) -> Result<Json<T>, E> {
    T::deserialize(F64Deserializer::<E>::new(v)).map(Json)
  }

  fn visit_unit<E: de::Error>(self) -> Result<Json<T>, E> {
    T::deserialize(UnitDeserializer::<E>::new()).map(Json)
  }

  fn visit_none<E: de::Error>(self) -> Result<Json<T>, E> {
    self.visit_unit()
  }

  fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Json<T>, D::Error> {
    T::deserialize(deserializer).map(Json)
  }

  fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<Json<T>, A::Error> {
    T::deserialize(SeqAccessDeserializer::new(seq)).map(Json)
  }

  fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Json<T>, A::Error> {
    T::deserialize(MapAccessDeserializer::new(map)).map(Json)
  }
}
