//! Entity mapping seam
//!
//! The cache only needs three things from a mapped entity: the collection it
//! lives in, its identifier and its materialized fields. [`Document`] is a
//! ready-made implementation for callers that already hold field maps.

use crate::cache::{CacheKey, EntityFields};
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Anything the cache can key and materialize
pub trait Entity {
    /// Collection (or collection path) the entity is stored in
    fn collection(&self) -> &str;

    /// Unique identifier inside the collection, `None` if not assigned yet
    fn identifier(&self) -> Option<&str>;

    /// Field-name to value map stored in the cache
    fn fields(&self) -> EntityFields;
}

impl<T: Entity + ?Sized> Entity for &T {
    fn collection(&self) -> &str {
        (**self).collection()
    }

    fn identifier(&self) -> Option<&str> {
        (**self).identifier()
    }

    fn fields(&self) -> EntityFields {
        (**self).fields()
    }
}

/// Derive the cache key of an entity
pub fn cache_key<E: Entity + ?Sized>(entity: &E) -> Result<CacheKey> {
    let id = entity.identifier().ok_or_else(|| CacheError::InvalidIdentity {
        collection: entity.collection().to_string(),
        reason: "missing identifier".to_string(),
    })?;
    CacheKey::new(entity.collection(), id)
}

/// Generic document: collection, optional id and a field map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub collection: String,
    pub id: Option<String>,
    #[serde(default)]
    pub fields: EntityFields,
}

impl Document {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: Some(id.into()),
            fields: EntityFields::new(),
        }
    }

    /// Document whose identifier is not assigned yet
    pub fn without_id(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: None,
            fields: EntityFields::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl Entity for Document {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn identifier(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn fields(&self) -> EntityFields {
        self.fields.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Car {
        id: String,
        make: String,
    }

    impl Entity for Car {
        fn collection(&self) -> &str {
            "cars"
        }

        fn identifier(&self) -> Option<&str> {
            Some(&self.id)
        }

        fn fields(&self) -> EntityFields {
            let mut fields = EntityFields::new();
            fields.insert("make".to_string(), json!(self.make));
            fields
        }
    }

    #[test]
    fn test_cache_key_for_custom_entity() {
        let car = Car {
            id: "MyCar".to_string(),
            make: "Toyota".to_string(),
        };

        assert_eq!(cache_key(&car).unwrap().as_str(), "cars/MyCar");
        assert_eq!(car.fields()["make"], json!("Toyota"));
    }

    #[test]
    fn test_missing_identifier() {
        let doc = Document::without_id("cars");
        let err = cache_key(&doc).unwrap_err();
        assert!(matches!(err, CacheError::InvalidIdentity { .. }));
    }

    #[test]
    fn test_document_fields() {
        let mut doc = Document::new("cars", "1").with_field("make", "Toyota");
        doc.set("year", 2020);

        assert_eq!(doc.get("make"), Some(&json!("Toyota")));
        assert_eq!(doc.fields().len(), 2);
        assert_eq!(cache_key(&&doc).unwrap(), CacheKey::new("cars", "1").unwrap());
    }
}
