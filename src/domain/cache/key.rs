//! Stable cache key construction
//!
//! Two consumers asking for the same resource with the same parameters must
//! land on the same key, so components are kept in a sorted map and rendered
//! in order regardless of how they were added.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use serde_json::Value;

/// Trait for generating cache keys from resource parameters
pub trait CacheKeyGenerator: Send + Sync + Debug {
    /// Generates a cache key from the given parameters
    fn generate(&self, params: &CacheKeyParams) -> String;

    /// Generates a key with a namespace prefix
    fn generate_with_namespace(&self, namespace: &str, params: &CacheKeyParams) -> String {
        format!("{}:{}", namespace, self.generate(params))
    }
}

/// Parameters a cache key is derived from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheKeyParams {
    /// Logical resource (e.g. `articles`, `article/42`, `tags`)
    pub resource: String,
    /// Query parameters, sorted by name
    pub components: BTreeMap<String, String>,
}

impl CacheKeyParams {
    /// Creates key parameters for a resource
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            components: BTreeMap::new(),
        }
    }

    /// Adds a parameter to the key
    pub fn with_component(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.components.insert(key.into(), value.to_string());
        self
    }

    /// Adds a parameter only when it is present
    pub fn with_optional_component<V: ToString>(
        self,
        key: impl Into<String>,
        value: Option<V>,
    ) -> Self {
        match value {
            Some(value) => self.with_component(key, value),
            None => self,
        }
    }

    /// Builds key parameters from a serializable parameter struct
    ///
    /// Top-level object fields become components; `null` fields are skipped
    /// so `Option::None` and an absent field produce the same key. Any other
    /// shape is stored as a single `params` component.
    pub fn from_serializable<T: Serialize>(
        resource: impl Into<String>,
        params: &T,
    ) -> Result<Self, serde_json::Error> {
        let mut key = Self::new(resource);

        match serde_json::to_value(params)? {
            Value::Object(fields) => {
                for (name, value) in fields {
                    match value {
                        Value::Null => {}
                        Value::String(s) => {
                            key.components.insert(name, s);
                        }
                        other => {
                            key.components.insert(name, other.to_string());
                        }
                    }
                }
            }
            Value::Null => {}
            other => {
                key.components.insert("params".to_string(), other.to_string());
            }
        }

        Ok(key)
    }
}

/// Default key generator: `resource:name=value:...`, optionally hashed
#[derive(Debug, Clone, Default)]
pub struct DefaultKeyGenerator {
    /// Whether to use short hash keys (16 hex chars) or readable keys
    use_short_hash: bool,
}

impl DefaultKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator that produces short hash keys
    pub fn with_short_hash(mut self) -> Self {
        self.use_short_hash = true;
        self
    }

    fn hash_string(input: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        input.hash(&mut hasher);
        hasher.finish()
    }
}

impl CacheKeyGenerator for DefaultKeyGenerator {
    fn generate(&self, params: &CacheKeyParams) -> String {
        let mut parts = vec![params.resource.clone()];

        for (k, v) in &params.components {
            parts.push(format!("{}={}", k, v));
        }

        let combined = parts.join(":");

        if self.use_short_hash {
            format!("{:016x}", Self::hash_string(&combined))
        } else {
            combined
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_params_new() {
        let params = CacheKeyParams::new("articles");
        assert_eq!(params.resource, "articles");
        assert!(params.components.is_empty());
    }

    #[test]
    fn test_default_key_generator() {
        let generator = DefaultKeyGenerator::new();
        let params = CacheKeyParams::new("articles")
            .with_component("page", 1)
            .with_component("category", "rust");

        assert_eq!(generator.generate(&params), "articles:category=rust:page=1");
    }

    #[test]
    fn test_component_order_does_not_matter() {
        let generator = DefaultKeyGenerator::new();

        let first = CacheKeyParams::new("articles")
            .with_component("tag", "async")
            .with_component("page", 2);
        let second = CacheKeyParams::new("articles")
            .with_component("page", 2)
            .with_component("tag", "async");

        assert_eq!(generator.generate(&first), generator.generate(&second));
    }

    #[test]
    fn test_optional_component_skipped() {
        let generator = DefaultKeyGenerator::new();
        let params = CacheKeyParams::new("comments")
            .with_optional_component("article", Some(42))
            .with_optional_component("parent", None::<u32>);

        assert_eq!(generator.generate(&params), "comments:article=42");
    }

    #[test]
    fn test_short_hash_is_stable() {
        let generator = DefaultKeyGenerator::new().with_short_hash();
        let params = CacheKeyParams::new("tags").with_component("q", "ru");

        let key = generator.generate(&params);
        assert_eq!(key.len(), 16);
        assert_eq!(key, generator.generate(&params.clone()));
    }

    #[test]
    fn test_generate_with_namespace() {
        let generator = DefaultKeyGenerator::new();
        let params = CacheKeyParams::new("unread");

        let key = generator.generate_with_namespace("notifications", &params);
        assert_eq!(key, "notifications:unread");
    }

    #[test]
    fn test_from_serializable() {
        #[derive(Serialize)]
        struct ArticleListParams {
            page: u32,
            category: Option<String>,
            search: Option<String>,
        }

        let params = CacheKeyParams::from_serializable(
            "articles",
            &ArticleListParams {
                page: 3,
                category: Some("release-notes".to_string()),
                search: None,
            },
        )
        .unwrap();

        let key = DefaultKeyGenerator::new().generate(&params);
        assert_eq!(key, "articles:category=release-notes:page=3");
    }

    #[test]
    fn test_from_serializable_scalar() {
        let params = CacheKeyParams::from_serializable("article", &42).unwrap();
        assert_eq!(params.components.get("params"), Some(&"42".to_string()));
    }
}
