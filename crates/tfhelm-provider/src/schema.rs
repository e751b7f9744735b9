//! Attribute schemas for the provider and its resources
//!
//! A [`Schema`] declares typed attributes with required/optional/computed
//! flags, static defaults and environment fallbacks. Nested blocks are
//! lists of objects with their own schema; env fallbacks inside a block only
//! apply when the block itself is present in the configuration.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ProviderError, Result};

/// Attribute value type
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    #[default]
    String,
    Bool,
    Int,
    List(Box<AttrType>),
    Map,
    Block(Box<Schema>),
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// One attribute of a schema
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Attribute {
    #[serde(rename = "type")]
    pub ty: AttrType,
    #[serde(skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub optional: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub computed: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub force_new: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub sensitive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Environment variables consulted in order before `default`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Attribute {
    pub fn required(ty: AttrType) -> Self {
        Self {
            ty,
            required: true,
            ..Default::default()
        }
    }

    pub fn optional(ty: AttrType) -> Self {
        Self {
            ty,
            optional: true,
            ..Default::default()
        }
    }

    /// Set by the provider only
    pub fn computed(ty: AttrType) -> Self {
        Self {
            ty,
            computed: true,
            ..Default::default()
        }
    }

    /// An optional block holding at most `max_items` objects
    pub fn block(schema: Schema, max_items: usize) -> Self {
        Self {
            ty: AttrType::Block(Box::new(schema)),
            optional: true,
            max_items: Some(max_items),
            ..Default::default()
        }
    }

    /// An optional block repeated any number of times
    pub fn block_list(schema: Schema) -> Self {
        Self {
            ty: AttrType::Block(Box::new(schema)),
            optional: true,
            ..Default::default()
        }
    }

    /// A block only the provider writes
    pub fn computed_block(schema: Schema) -> Self {
        Self {
            ty: AttrType::Block(Box::new(schema)),
            computed: true,
            max_items: Some(1),
            ..Default::default()
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_env(mut self, vars: &[&str]) -> Self {
        self.env = vars.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Optional, and filled in by the provider when left unset
    pub fn also_computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attribute only the provider writes
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }

    /// Default value: the first non-empty env var, else the static default
    pub fn default_value(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Option<Value>> {
        for var in &self.env {
            if let Some(raw) = lookup(var).filter(|v| !v.is_empty()) {
                return parse_env_value(&self.ty, var, &raw).map(Some);
            }
        }
        Ok(self.default.clone())
    }
}

fn parse_env_value(ty: &AttrType, var: &str, raw: &str) -> Result<Value> {
    match ty {
        AttrType::Bool => parse_bool(raw).map(Value::Bool).ok_or_else(|| {
            ProviderError::config(format!("{}: invalid boolean value {:?}", var, raw))
        }),
        AttrType::Int => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|e| ProviderError::config(format!("{}: {}", var, e))),
        _ => Ok(Value::String(raw.to_string())),
    }
}

/// Boolean spellings accepted from the environment
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Process environment lookup
pub fn process_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Attributes of a provider or resource
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Schema {
    pub attributes: BTreeMap<String, Attribute>,
}

/// Outcome of comparing two states
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Attributes whose value changed
    pub changed: Vec<String>,
    /// Changed attributes that force replacement
    pub requires_replace: Vec<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn requires_replace(&self) -> bool {
        !self.requires_replace.is_empty()
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attr(mut self, name: &str, attribute: Attribute) -> Self {
        self.attributes.insert(name.to_string(), attribute);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Fill defaults and check required attributes
    ///
    /// `context` names the provider or resource in error messages.
    pub fn apply_defaults(
        &self,
        context: &str,
        config: &Value,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Map<String, Value>> {
        let input = match config {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(ProviderError::schema(
                    context,
                    format!("expected an object, got {}", other),
                ));
            }
        };
        let mut out = input.clone();

        for (name, attr) in &self.attributes {
            match (present(input.get(name)), &attr.ty) {
                (Some(value), AttrType::Block(inner)) => {
                    let items = match value {
                        Value::Array(items) => items.clone(),
                        Value::Object(_) => vec![value.clone()],
                        other => {
                            return Err(ProviderError::schema(
                                context,
                                format!("{}: expected a block, got {}", name, other),
                            ));
                        }
                    };
                    if let Some(max) = attr.max_items {
                        if items.len() > max {
                            return Err(ProviderError::schema(
                                context,
                                format!("{}: at most {} block(s) allowed", name, max),
                            ));
                        }
                    }
                    let nested = format!("{}.{}", context, name);
                    let resolved = items
                        .iter()
                        .map(|item| inner.apply_defaults(&nested, item, lookup).map(Value::Object))
                        .collect::<Result<Vec<_>>>()?;
                    out.insert(name.clone(), Value::Array(resolved));
                }
                (Some(_), _) => {}
                (None, AttrType::Block(_)) => {}
                (None, _) => {
                    if let Some(value) = attr.default_value(lookup)? {
                        out.insert(name.clone(), value);
                    } else if attr.required {
                        return Err(ProviderError::schema(
                            context,
                            format!("required attribute {:?} is missing", name),
                        ));
                    }
                }
            }
        }

        Ok(out)
    }

    /// Compare prior and proposed state over the configurable attributes
    ///
    /// An optional+computed attribute absent from `proposed` keeps its prior
    /// value and is not a change.
    pub fn diff(&self, prior: &Map<String, Value>, proposed: &Map<String, Value>) -> Diff {
        let mut diff = Diff::default();
        for (name, attr) in &self.attributes {
            if attr.is_computed_only() {
                continue;
            }
            let before = present(prior.get(name));
            let after = present(proposed.get(name));
            if after.is_none() && attr.computed {
                continue;
            }
            if before != after {
                diff.changed.push(name.clone());
                if attr.force_new {
                    diff.requires_replace.push(name.clone());
                }
            }
        }
        diff
    }
}

/// Everything the provider serves
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderSchema {
    pub provider: Schema,
    pub resources: BTreeMap<String, Schema>,
}
