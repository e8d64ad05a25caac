//! Type-directed decoding of rows into serde types.
//!
//! - Structs: columns map to fields by name. Every column needs a field;
//!   fields without a column must be optional or have a serde default.
//! - Scalars and newtypes: the row must have exactly one column.
//! - Tuples and sequences: columns by position.
//!
//! Column values coerce the way SQLite stores them: INTEGER decodes into
//! bools (0 is false) and floats, NULL into `None` or `()`, TEXT into unit
//! enum variants, BLOB into `Vec<u8>`.

use rusqlite::types::Value;
use serde::de::value::{BorrowedStrDeserializer, SeqDeserializer, StrDeserializer};
use serde::de::{
  DeserializeOwned, DeserializeSeed, Deserializer, IntoDeserializer, MapAccess, Visitor,
};
use serde::forward_to_deserialize_any;

use crate::db::Row;
use crate::error::ScanError;

/// Decode one row into `T`.
pub fn from_row<T: DeserializeOwned>(row: &Row) -> Result<T, ScanError> {
  T::deserialize(RowDeserializer { row })
}

fn kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "NULL",
    Value::Integer(_) => "INTEGER",
    Value::Real(_) => "REAL",
    Value::Text(_) => "TEXT",
    Value::Blob(_) => "BLOB",
  }
}

struct RowDeserializer<'de> {
  row: &'de Row,
}

impl<'de> RowDeserializer<'de> {
  fn single(&self) -> Result<ValueDeserializer<'de>, ScanError> {
    match (self.row.columns(), self.row.values()) {
      ([_], [value]) => Ok(ValueDeserializer { value }),
      (columns, _) => Err(ScanError::new(format!(
        "expected a single column, got {}",
        columns.len()
      ))),
    }
  }

  fn in_single_column(&self, err: ScanError) -> ScanError {
    match self.row.columns() {
      [column] => err.in_column(column),
      _ => err,
    }
  }

  fn columns(&self) -> Columns<'de> {
    Columns {
      row: self.row,
      index: 0,
    }
  }

  fn positions(&self) -> SeqDeserializer<std::vec::IntoIter<ValueDeserializer<'de>>, ScanError> {
    let values: Vec<_> = self
      .row
      .values()
      .iter()
      .map(|value| ValueDeserializer { value })
      .collect();
    SeqDeserializer::new(values.into_iter())
  }
}

macro_rules! forward_to_single_column {
  ($($method:ident)*) => {
    $(
      fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ScanError> {
        let value = self.single()?;
        value.$method(visitor).map_err(|e| self.in_single_column(e))
      }
    )*
  };
}

impl<'de> Deserializer<'de> for RowDeserializer<'de> {
  type Error = ScanError;

  fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ScanError> {
    visitor.visit_map(self.columns())
  }

  forward_to_single_column! {
    deserialize_bool deserialize_i8 deserialize_i16 deserialize_i32 deserialize_i64
    deserialize_i128 deserialize_u8 deserialize_u16 deserialize_u32 deserialize_u64
    deserialize_u128 deserialize_f32 deserialize_f64 deserialize_char deserialize_str
    deserialize_string deserialize_bytes deserialize_byte_buf deserialize_unit
    deserialize_identifier
  }

  fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ScanError> {
    if self.row.len() == 1 {
      let value = self.single()?;
      value
        .deserialize_option(visitor)
        .map_err(|e| self.in_single_column(e))
    } else {
      visitor.visit_some(self)
    }
  }

  fn deserialize_unit_struct<V: Visitor<'de>>(
    self,
    _name: &'static str,
    visitor: V,
  ) -> Result<V::Value, ScanError> {
    self.deserialize_unit(visitor)
  }

  fn deserialize_newtype_struct<V: Visitor<'de>>(
    self,
    _name: &'static str,
    visitor: V,
  ) -> Result<V::Value, ScanError> {
    visitor.visit_newtype_struct(self)
  }

  fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ScanError> {
    self.positions().deserialize_any(visitor)
  }

  fn deserialize_tuple<V: Visitor<'de>>(
    self,
    _len: usize,
    visitor: V,
  ) -> Result<V::Value, ScanError> {
    self.positions().deserialize_any(visitor)
  }

  fn deserialize_tuple_struct<V: Visitor<'de>>(
    self,
    _name: &'static str,
    _len: usize,
    visitor: V,
  ) -> Result<V::Value, ScanError> {
    self.positions().deserialize_any(visitor)
  }

  fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ScanError> {
    visitor.visit_map(self.columns())
  }

  fn deserialize_struct<V: Visitor<'de>>(
    self,
    name: &'static str,
    fields: &'static [&'static str],
    visitor: V,
  ) -> Result<V::Value, ScanError> {
    let unmatched = self
      .row
      .columns()
      .iter()
      .find(|column| !fields.iter().any(|field| *field == column.as_str()));
    if let Some(column) = unmatched {
      return Err(ScanError::new(format!(
        "missing destination name {} in {}",
        column, name
      )));
    }
    visitor.visit_map(self.columns())
  }

  fn deserialize_enum<V: Visitor<'de>>(
    self,
    name: &'static str,
    variants: &'static [&'static str],
    visitor: V,
  ) -> Result<V::Value, ScanError> {
    let value = self.single()?;
    value
      .deserialize_enum(name, variants, visitor)
      .map_err(|e| self.in_single_column(e))
  }

  fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ScanError> {
    visitor.visit_unit()
  }
}

/// Walks a row as a map of column name to value.
struct Columns<'de> {
  row: &'de Row,
  index: usize,
}

impl<'de> MapAccess<'de> for Columns<'de> {
  type Error = ScanError;

  fn next_key_seed<K: DeserializeSeed<'de>>(
    &mut self,
    seed: K,
  ) -> Result<Option<K::Value>, ScanError> {
    match self.row.columns().get(self.index) {
      Some(column) => seed
        .deserialize(BorrowedStrDeserializer::<ScanError>::new(column.as_str()))
        .map(Some),
      None => Ok(None),
    }
  }

  fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, ScanError> {
    let index = self.index;
    self.index += 1;
    let (Some(column), Some(value)) = (self.row.columns().get(index), self.row.get(index)) else {
      return Err(ScanError::new("value requested past the last column"));
    };
    seed
      .deserialize(ValueDeserializer { value })
      .map_err(|e| e.in_column(column))
  }

  fn size_hint(&self) -> Option<usize> {
    Some(self.row.len().saturating_sub(self.index))
  }
}

#[derive(Clone, Copy)]
struct ValueDeserializer<'de> {
  value: &'de Value,
}

impl<'de> IntoDeserializer<'de, ScanError> for ValueDeserializer<'de> {
  type Deserializer = Self;

  fn into_deserializer(self) -> Self {
    self
  }
}

impl<'de> Deserializer<'de> for ValueDeserializer<'de> {
  type Error = ScanError;

  fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ScanError> {
    match self.value {
      Value::Null => visitor.visit_unit(),
      Value::Integer(i) => visitor.visit_i64(*i),
      Value::Real(f) => visitor.visit_f64(*f),
      Value::Text(s) => visitor.visit_borrowed_str(s),
      Value::Blob(b) => visitor.visit_borrowed_bytes(b),
    }
  }

  fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ScanError> {
    match self.value {
      Value::Integer(i) => visitor.visit_bool(*i != 0),
      _ => self.deserialize_any(visitor),
    }
  }

  fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ScanError> {
    match self.value {
      Value::Null => visitor.visit_none(),
      _ => visitor.visit_some(self),
    }
  }

  fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ScanError> {
    match self.value {
      Value::Text(s) => visitor.visit_borrowed_bytes(s.as_bytes()),
      _ => self.deserialize_any(visitor),
    }
  }

  fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ScanError> {
    self.deserialize_bytes(visitor)
  }

  fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, ScanError> {
    match self.value {
      Value::Blob(b) => SeqDeserializer::<_, ScanError>::new(b.iter().copied()).deserialize_any(visitor),
      _ => self.deserialize_any(visitor),
    }
  }

  fn deserialize_newtype_struct<V: Visitor<'de>>(
    self,
    _name: &'static str,
    visitor: V,
  ) -> Result<V::Value, ScanError> {
    visitor.visit_newtype_struct(self)
  }

  fn deserialize_enum<V: Visitor<'de>>(
    self,
    name: &'static str,
    _variants: &'static [&'static str],
    visitor: V,
  ) -> Result<V::Value, ScanError> {
    match self.value {
      Value::Text(s) => {
        let variant: StrDeserializer<'_, ScanError> = s.as_str().into_deserializer();
        visitor.visit_enum(variant)
      }
      other => Err(ScanError::new(format!(
        "cannot decode {} as enum {}",
        kind(other),
        name
      ))),
    }
  }

  forward_to_deserialize_any! {
    i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
    unit unit_struct tuple tuple_struct map struct identifier ignored_any
  }
}
