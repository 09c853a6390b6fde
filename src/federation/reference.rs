//! Entity references: the representations sent to `_entities`

use serde_json::{Map, Value};

/// An entity as another service knows it: its type, key fields and the
/// fields the target service requires
#[derive(Debug, Clone, PartialEq)]
pub struct EntityReference {
    pub service: String,
    pub type_name: String,
    pub fields: Map<String, Value>,
}

impl EntityReference {
    /// Build a reference by reading `fields` off a fetched object
    ///
    /// `fields` pairs each field name with the response key it was fetched
    /// under. Fails with the name of the first field the object lacks.
    pub fn from_object(
        service: &str,
        type_name: &str,
        object: &Map<String, Value>,
        fields: &[(String, String)],
    ) -> Result<Self, String> {
        let mut values = Map::new();
        for (name, response_key) in fields {
            match object.get(response_key) {
                Some(value) => {
                    values.insert(name.clone(), value.clone());
                }
                None => return Err(name.clone()),
            }
        }
        Ok(Self {
            service: service.to_string(),
            type_name: type_name.to_string(),
            fields: values,
        })
    }

    /// `{ "__typename": ..., key fields..., required fields... }`
    pub fn representation(&self) -> Value {
        let mut representation = Map::new();
        representation.insert("__typename".to_string(), Value::String(self.type_name.clone()));
        for (name, value) in &self.fields {
            representation.insert(name.clone(), value.clone());
        }
        Value::Object(representation)
    }
}
