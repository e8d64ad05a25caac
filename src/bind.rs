//! Turning caller arguments into owned query parameters.

use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::ToSql;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::error::{Error, Result};

/// Convert borrowed rusqlite parameters into owned values that a lazy factory
/// can keep. See also [`args!`](crate::args).
pub fn bind(params: &[&dyn ToSql]) -> Result<Vec<Value>> {
  params
    .iter()
    .enumerate()
    .map(|(index, param)| {
      let output = param
        .to_sql()
        .map_err(|e| Error::StatementPrep(format!("argument {}: {}", index + 1, e)))?;
      match output {
        ToSqlOutput::Borrowed(value) => Ok(Value::from(value)),
        ToSqlOutput::Owned(value) => Ok(value),
        #[allow(unreachable_patterns)]
        _ => Err(Error::StatementPrep(format!(
          "argument {}: unsupported parameter kind",
          index + 1
        ))),
      }
    })
    .collect()
}

/// Build an owned argument list from anything implementing `rusqlite::ToSql`.
///
/// ```ignore
/// let args = args![42, "Demo", None::<String>]?;
/// ```
#[macro_export]
macro_rules! args {
  () => {
    ::std::result::Result::<::std::vec::Vec<$crate::Value>, $crate::Error>::Ok(::std::vec::Vec::new())
  };
  ($($arg:expr),+ $(,)?) => {
    $crate::bind::bind(&[$(&$arg as &dyn $crate::ToSql),+])
  };
}

/// Compile a query with `:name` placeholders into positional form, taking the
/// values from `params` (a struct or map).
///
/// - `:name.field` looks into nested objects.
/// - `::` is an escaped literal `:`.
/// - Placeholders inside single-quoted literals are left alone.
pub fn bind_named<P>(sql: &str, params: &P) -> Result<(String, Vec<Value>)>
where
  P: Serialize + ?Sized,
{
  let params = match serde_json::to_value(params) {
    Ok(JsonValue::Object(map)) => map,
    Ok(other) => {
      return Err(Error::StatementPrep(format!(
        "unsupported argument type {}, expected a struct or map",
        json_kind(&other)
      )))
    }
    Err(e) => return Err(Error::StatementPrep(e.to_string())),
  };

  let mut query = String::with_capacity(sql.len());
  let mut args = Vec::new();
  let mut chars = sql.chars().peekable();
  let mut in_literal = false;

  while let Some(c) = chars.next() {
    if in_literal {
      in_literal = c != '\'';
      query.push(c);
      continue;
    }
    match c {
      '\'' => {
        in_literal = true;
        query.push(c);
      }
      ':' if chars.peek() == Some(&':') => {
        chars.next();
        query.push(':');
      }
      ':' if chars.peek().is_some_and(|n| n.is_alphanumeric() || *n == '_') => {
        let mut name = String::new();
        while let Some(&n) = chars.peek() {
          if n.is_alphanumeric() || n == '_' || n == '.' {
            name.push(n);
            chars.next();
          } else {
            break;
          }
        }
        let value = lookup(&params, &name)
          .ok_or_else(|| Error::StatementPrep(format!("could not find name {}", name)))?;
        args.push(to_sql_value(value));
        query.push('?');
      }
      _ => query.push(c),
    }
  }

  Ok((query, args))
}

fn lookup<'a>(params: &'a Map<String, JsonValue>, name: &str) -> Option<&'a JsonValue> {
  let mut parts = name.split('.');
  let mut current = params.get(parts.next()?)?;
  for part in parts {
    current = current.as_object()?.get(part)?;
  }
  Some(current)
}

fn to_sql_value(value: &JsonValue) -> Value {
  match value {
    JsonValue::Null => Value::Null,
    JsonValue::Bool(b) => Value::Integer(i64::from(*b)),
    JsonValue::Number(n) => match n.as_i64() {
      Some(i) => Value::Integer(i),
      None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
    },
    JsonValue::String(s) => Value::Text(s.clone()),
    JsonValue::Array(_) | JsonValue::Object(_) => Value::Text(value.to_string()),
  }
}

fn json_kind(value: &JsonValue) -> &'static str {
  match value {
    JsonValue::Null => "null",
    JsonValue::Bool(_) => "bool",
    JsonValue::Number(_) => "number",
    JsonValue::String(_) => "string",
    JsonValue::Array(_) => "array",
    JsonValue::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use super::*;

  #[derive(Serialize)]
  struct Filter {
    title: String,
    year: i32,
    active: bool,
    tags: Vec<String>,
    author: Author,
  }

  #[derive(Serialize)]
  struct Author {
    name: String,
  }

  fn filter() -> Filter {
    Filter {
      title: "Demo".into(),
      year: 2022,
      active: true,
      tags: vec!["go".into()],
      author: Author {
        name: "reddec".into(),
      },
    }
  }

  #[test]
  fn test_named_to_positional() {
    let (sql, args) = bind_named(
      "SELECT * FROM book WHERE title = :title AND year >= :year",
      &filter(),
    )
    .unwrap();
    assert_eq!(sql, "SELECT * FROM book WHERE title = ? AND year >= ?");
    assert_eq!(args, vec![Value::Text("Demo".into()), Value::Integer(2022)]);
  }

  #[test]
  fn test_named_value_conversions() {
    let (_, args) = bind_named("SELECT :active, :tags, :author.name", &filter()).unwrap();
    assert_eq!(
      args,
      vec![
        Value::Integer(1),
        Value::Text(r#"["go"]"#.into()),
        Value::Text("reddec".into()),
      ]
    );
  }

  #[test]
  fn test_repeated_name_binds_twice() {
    let (sql, args) = bind_named("SELECT :year, :year", &filter()).unwrap();
    assert_eq!(sql, "SELECT ?, ?");
    assert_eq!(args.len(), 2);
  }

  #[test]
  fn test_escapes_and_literals_untouched() {
    let (sql, args) = bind_named(
      "SELECT '10:30', 'it''s :title', x::text FROM t WHERE a = :year",
      &filter(),
    )
    .unwrap();
    assert_eq!(sql, "SELECT '10:30', 'it''s :title', x:text FROM t WHERE a = ?");
    assert_eq!(args, vec![Value::Integer(2022)]);
  }

  #[test]
  fn test_missing_name() {
    let err = bind_named("SELECT :isbn", &filter()).unwrap_err();
    assert!(matches!(err, Error::StatementPrep(ref m) if m.contains("isbn")));
  }

  #[test]
  fn test_params_must_be_a_map() {
    let err = bind_named("SELECT :x", &42).unwrap_err();
    assert!(matches!(err, Error::StatementPrep(_)));

    let mut map = BTreeMap::new();
    map.insert("x", 1.5);
    let (_, args) = bind_named("SELECT :x", &map).unwrap();
    assert_eq!(args, vec![Value::Real(1.5)]);
  }

  #[test]
  fn test_bind_positional() {
    let args = crate::args![7, "Demo", None::<String>, 2.5].unwrap();
    assert_eq!(
      args,
      vec![
        Value::Integer(7),
        Value::Text("Demo".into()),
        Value::Null,
        Value::Real(2.5),
      ]
    );
    assert!(crate::args![].unwrap().is_empty());
  }
}
