//! Resource data access
//!
//! [`ResourceData`] wraps one object of attribute values plus an optional
//! prior object, and resolves dotted paths such as `kubernetes.0.host`
//! where numeric segments index into lists.

use serde_json::{Map, Value};

use crate::error::{ProviderError, Result};

/// Attribute values of one provider or resource instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceData {
    resource: String,
    values: Map<String, Value>,
    prior: Option<Map<String, Value>>,
}

fn lookup<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = root.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            Value::Object(map) => map.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Whether a value is the zero value of its type
fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

impl ResourceData {
    pub fn new(resource: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            resource: resource.into(),
            values,
            prior: None,
        }
    }

    /// Attach the previous state, used by [`has_change`](Self::has_change)
    pub fn with_prior(mut self, prior: Map<String, Value>) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Value at `path`, `None` when unset
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.values, path).filter(|v| !v.is_null())
    }

    /// Value at `path` when set to something other than its zero value
    pub fn get_ok(&self, path: &str) -> Option<&Value> {
        self.get(path).filter(|v| !is_zero(v))
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Non-empty string at `path`
    pub fn get_str_ok(&self, path: &str) -> Option<&str> {
        self.get_str(path).filter(|s| !s.is_empty())
    }

    /// String at `path`, empty when unset
    pub fn string(&self, path: &str) -> String {
        self.get_str(path).unwrap_or_default().to_string()
    }

    pub fn get_bool(&self, path: &str) -> bool {
        self.get(path).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get_i64(&self, path: &str) -> i64 {
        self.get(path).and_then(Value::as_i64).unwrap_or_default()
    }

    /// Strings in the list at `path`
    pub fn get_strings(&self, path: &str) -> Vec<String> {
        self.get(path)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// String attribute that must be set
    pub fn require_str(&self, path: &str) -> Result<&str> {
        self.get_str_ok(path).ok_or_else(|| {
            ProviderError::schema(&self.resource, format!("{:?} must be set", path))
        })
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn id(&self) -> Option<&str> {
        self.get_str_ok("id")
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.values.insert("id".to_string(), Value::String(id.into()));
    }

    /// Mark the instance as gone
    pub fn clear_id(&mut self) {
        self.values.remove("id");
    }

    /// Whether `key` differs from the prior state
    pub fn has_change(&self, key: &str) -> bool {
        match &self.prior {
            Some(prior) => lookup(prior, key).filter(|v| !v.is_null()) != self.get(key),
            None => self.get(key).is_some(),
        }
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_values(self) -> Map<String, Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> ResourceData {
        ResourceData::new("test", value.as_object().unwrap().clone())
    }

    #[test]
    fn test_dotted_paths() {
        let d = data(json!({
            "host": "",
            "kubernetes": [{"host": "https://k8s", "insecure": false, "exec": [{"args": ["a"]}]}],
        }));
        assert_eq!(d.get_str("kubernetes.0.host"), Some("https://k8s"));
        assert_eq!(d.get_strings("kubernetes.0.exec.0.args"), vec!["a"]);
        assert!(d.get("kubernetes.1.host").is_none());
        assert!(d.get("kubernetes.x").is_none());
    }

    #[test]
    fn test_get_ok_skips_zero_values() {
        let d = data(json!({"host": "", "insecure": false, "timeout": 0, "name": "web"}));
        assert!(d.get("host").is_some());
        assert!(d.get_ok("host").is_none());
        assert!(d.get_ok("insecure").is_none());
        assert!(d.get_ok("timeout").is_none());
        assert_eq!(d.get_ok("name"), Some(&json!("web")));
    }

    #[test]
    fn test_id_lifecycle() {
        let mut d = data(json!({}));
        assert!(d.id().is_none());
        d.set_id("stable");
        assert_eq!(d.id(), Some("stable"));
        d.clear_id();
        assert!(d.id().is_none());
    }

    #[test]
    fn test_has_change() {
        let prior = json!({"url": "https://a", "name": "x"});
        let d = data(json!({"url": "https://b", "name": "x"}))
            .with_prior(prior.as_object().unwrap().clone());
        assert!(d.has_change("url"));
        assert!(!d.has_change("name"));
    }

    #[test]
    fn test_require_str() {
        let d = data(json!({"name": ""}));
        assert!(d.require_str("name").is_err());
    }
}
