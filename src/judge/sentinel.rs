use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::sandbox::protocol::SyntheticResponse;

pub type SentinelPredicate = Box<dyn Fn(&SyntheticResponse) -> bool + Send + Sync>;

/// Named expectations that stand in for literal response bodies
///
/// Catalog entries for API challenges sometimes describe a response
/// (`"Array of products"`) instead of spelling it out; a registered predicate
/// decides those cases.
pub struct SentinelRegistry {
    predicates: HashMap<String, SentinelPredicate>,
}

impl SentinelRegistry {
    pub fn empty() -> Self {
        Self {
            predicates: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&SyntheticResponse) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Box::new(predicate));
    }

    /// Returns `Some(verdict)` when `expected` names a registered sentinel
    pub fn evaluate(&self, expected: &str, response: &SyntheticResponse) -> Option<bool> {
        self.predicates
            .get(expected.trim())
            .map(|predicate| predicate(response))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.predicates.keys().map(String::as_str)
    }
}

impl Default for SentinelRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("Array of products", |response| {
            response
                .body
                .as_ref()
                .and_then(Value::as_array)
                .is_some_and(|items| items.len() >= 2)
        });
        registry.register("Product with id 1", |response| {
            response.body.as_ref().is_some_and(|body| {
                body.get("id").and_then(Value::as_f64) == Some(1.0)
                    && is_truthy(body.get("name"))
                    && is_truthy(body.get("price"))
            })
        });
        registry.register("201 Created response", |response| {
            response.status == 201
                && response.body.as_ref().is_some_and(|body| {
                    is_truthy(body.get("id"))
                        && is_truthy(body.get("name"))
                        && is_truthy(body.get("price"))
                })
        });
        registry
    }
}

impl fmt::Debug for SentinelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("SentinelRegistry")
            .field("names", &names)
            .finish()
    }
}

/// JavaScript truthiness of a JSON field
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16, body: Value) -> SyntheticResponse {
        SyntheticResponse {
            status,
            body: Some(body),
            text: None,
        }
    }

    #[test]
    fn test_array_of_products() {
        let registry = SentinelRegistry::default();
        let two = response(200, json!([{"id": 1}, {"id": 2}]));
        let one = response(200, json!([{"id": 1}]));
        assert_eq!(registry.evaluate("Array of products", &two), Some(true));
        assert_eq!(registry.evaluate("Array of products", &one), Some(false));
    }

    #[test]
    fn test_product_with_id_1() {
        let registry = SentinelRegistry::default();
        let good = response(200, json!({"id": 1, "name": "Product 1", "price": 100}));
        let free = response(200, json!({"id": 1, "name": "Product 1", "price": 0}));
        let other = response(200, json!({"id": 2, "name": "Product 2", "price": 200}));
        assert_eq!(registry.evaluate("Product with id 1", &good), Some(true));
        assert_eq!(registry.evaluate("Product with id 1", &free), Some(false));
        assert_eq!(registry.evaluate("Product with id 1", &other), Some(false));
    }

    #[test]
    fn test_created_response_checks_status() {
        let registry = SentinelRegistry::default();
        let body = json!({"id": 3, "name": "New Product", "price": 300});
        assert_eq!(
            registry.evaluate("201 Created response", &response(201, body.clone())),
            Some(true)
        );
        assert_eq!(
            registry.evaluate("201 Created response", &response(200, body)),
            Some(false)
        );
    }

    #[test]
    fn test_unknown_and_custom_sentinels() {
        let mut registry = SentinelRegistry::empty();
        let ok = response(200, json!({"ok": true}));
        assert_eq!(registry.evaluate("Array of products", &ok), None);

        registry.register("Acknowledged", |r| r.status == 200);
        assert_eq!(registry.evaluate(" Acknowledged ", &ok), Some(true));
    }
}
