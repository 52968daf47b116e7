use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

use crate::model::Instance;

/// A value on its way into a state tree.
///
/// Plain JSON covers most writes; the other variants carry what JSON
/// cannot: timestamps, live instances, and composites that mix those in.
#[derive(Debug, Clone)]
pub enum Input {
    Value(Value),
    Date(DateTime<Utc>),
    Model(Instance),
    Record(IndexMap<String, Input>),
    List(Vec<Input>),
}

impl Input {
    pub const NULL: Input = Input::Value(Value::Null);

    pub fn record<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Input>,
    {
        Input::Record(
            fields
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Input>,
    {
        Input::List(items.into_iter().map(Into::into).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Input::Value(Value::Null))
    }

    /// Field map of a record-like input, with JSON objects lifted field by field.
    pub(crate) fn into_fields(self) -> Result<IndexMap<String, Input>, Self> {
        match self {
            Input::Record(fields) => Ok(fields),
            Input::Value(Value::Object(map)) => Ok(map
                .into_iter()
                .map(|(key, value)| (key, Input::Value(value)))
                .collect()),
            other => Err(other),
        }
    }
}

impl Default for Input {
    fn default() -> Self {
        Input::NULL
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Value(value)
    }
}

impl From<Instance> for Input {
    fn from(instance: Instance) -> Self {
        Input::Model(instance)
    }
}

impl From<&Instance> for Input {
    fn from(instance: &Instance) -> Self {
        Input::Model(instance.clone())
    }
}

impl From<DateTime<Utc>> for Input {
    fn from(date: DateTime<Utc>) -> Self {
        Input::Date(date)
    }
}

impl<T: Into<Input>> From<Option<T>> for Input {
    fn from(value: Option<T>) -> Self {
        value.map_or(Input::NULL, Into::into)
    }
}

impl<T: Into<Input>> From<Vec<T>> for Input {
    fn from(items: Vec<T>) -> Self {
        Input::list(items)
    }
}

macro_rules! scalar_input {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Input {
                fn from(value: $ty) -> Self {
                    Input::Value(Value::from(value))
                }
            }
        )*
    };
}

scalar_input!(&str, String, bool, i32, i64, u32, u64, f64);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_objects_lift_into_fields() {
        let fields = Input::from(json!({"a": 1, "b": [true]}))
            .into_fields()
            .unwrap();
        assert_eq!(fields.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert!(matches!(fields["b"], Input::Value(Value::Array(_))));

        assert!(Input::from(3).into_fields().is_err());
        assert!(Input::list([1, 2]).into_fields().is_err());
    }

    #[test]
    fn options_map_none_to_null() {
        assert!(Input::from(None::<&str>).is_null());
        assert!(matches!(Input::from(Some("x")), Input::Value(Value::String(s)) if s == "x"));
    }
}
