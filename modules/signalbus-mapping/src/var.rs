//! Argument schema types.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// The shape a single argument is coerced into.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Kind {
    /// Accepted as-is.
    Any,
    String,
    Int,
    Float,
    Bool,
    /// RFC3339 string, naive datetime (read in the caller's timezone), or unix seconds.
    /// Always emitted as an RFC3339 string.
    Timestamp,
    Array { of: Box<Kind> },
    Map { fields: Vars },
}

impl Kind {
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Kind::Any => "any",
            Kind::String => "string",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Bool => "bool",
            Kind::Timestamp => "timestamp",
            Kind::Array { .. } => "array",
            Kind::Map { .. } => "map",
        }
    }
}

/// One declared argument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Var {
    pub kind: Kind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
}

impl Var {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            text: String::new(),
        }
    }

    pub fn any() -> Self {
        Self::new(Kind::Any)
    }

    pub fn string() -> Self {
        Self::new(Kind::String)
    }

    pub fn int() -> Self {
        Self::new(Kind::Int)
    }

    pub fn float() -> Self {
        Self::new(Kind::Float)
    }

    pub fn bool() -> Self {
        Self::new(Kind::Bool)
    }

    pub fn timestamp() -> Self {
        Self::new(Kind::Timestamp)
    }

    pub fn array(of: Kind) -> Self {
        Self::new(Kind::Array { of: Box::new(of) })
    }

    pub fn map(fields: Vars) -> Self {
        Self::new(Kind::Map { fields })
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Value used when the argument is absent or null. Inserted verbatim.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

/// Ordered argument schema. Declaration order is preserved for mapping and
/// for the serialized catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vars(Vec<(String, Var)>);

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an argument. A repeated name replaces the earlier declaration in place.
    pub fn with(mut self, name: impl Into<String>, var: Var) -> Self {
        self.insert(name, var);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, var: Var) {
        let name = name.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = var,
            None => self.0.push((name, var)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Var> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Var)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Var)> for Vars {
    fn from_iter<I: IntoIterator<Item = (K, Var)>>(iter: I) -> Self {
        let mut vars = Vars::new();
        for (name, var) in iter {
            vars.insert(name, var);
        }
        vars
    }
}

impl Serialize for Vars {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, var) in &self.0 {
            map.serialize_entry(name, var)?;
        }
        map.end()
    }
}
