//! EIP-712 typed-data canonicalization
//!
//! A provider produces a document with exactly four top-level keys:
//! `types`, `primaryType`, `domain` and `message`. Object keys are emitted in
//! lexicographic order at every depth so the same payload always serializes
//! to the same bytes, which some wallets require to reproduce the hash.
//!
//! ```rust,ignore
//! use wallet_broker_core::typed_data::{DomainTypedData, TypedDataProvider, TypedStruct};
//!
//! let provider = DomainTypedData::new("dYdX", 1, Some("1.0"))
//!     .with_message(TypedStruct::new("dYdX").field("action", "string", "dYdX Onboarding"));
//! let payload = provider.typed_data_string().expect("valid");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Type name of the domain struct
pub const EIP712_DOMAIN: &str = "EIP712Domain";

/// One entry of a type's definition list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A named struct type with its field definitions and values
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypedStruct {
    pub type_name: String,
    pub fields: Vec<TypeField>,
    pub data: Map<String, Value>,
}

impl TypedStruct {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
            data: Map::new(),
        }
    }

    /// Declare a field and set its value
    pub fn field(mut self, name: &str, kind: &str, value: impl Into<Value>) -> Self {
        self.fields.push(TypeField {
            name: name.to_string(),
            kind: kind.to_string(),
        });
        self.data.insert(name.to_string(), value.into());
        self
    }

    /// Declare a field without a value
    pub fn declare(mut self, name: &str, kind: &str) -> Self {
        self.fields.push(TypeField {
            name: name.to_string(),
            kind: kind.to_string(),
        });
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.data.insert(name.to_string(), value.into());
    }

    /// Every declared field has a value
    pub fn is_valid(&self) -> bool {
        self.fields
            .iter()
            .all(|field| self.data.contains_key(&field.name))
    }

    fn definitions(&self) -> Value {
        Value::Array(
            self.fields
                .iter()
                .map(|field| {
                    let mut entry = Map::new();
                    entry.insert("name".into(), Value::String(field.name.clone()));
                    entry.insert("type".into(), Value::String(field.kind.clone()));
                    Value::Object(entry)
                })
                .collect(),
        )
    }
}

/// The `EIP712Domain` struct: `name`, optional `version`, `chainId`
pub fn eip712_domain(name: &str, chain_id: u64, version: Option<&str>) -> TypedStruct {
    let domain = TypedStruct::new(EIP712_DOMAIN).field("name", "string", name);
    let domain = match version {
        Some(version) => domain.field("version", "string", version),
        None => domain,
    };
    domain.field("chainId", "uint256", chain_id)
}

/// Source of a typed-data signing payload
pub trait TypedDataProvider: Send + Sync {
    /// The document, or `None` if any declared field lacks a value
    fn typed_data(&self) -> Option<Value>;

    /// Canonical serialization of [`typed_data`](Self::typed_data)
    fn typed_data_string(&self) -> Option<String> {
        self.typed_data().map(|value| canonical_string(&value))
    }
}

/// Domain plus a single message struct
#[derive(Debug, Clone, PartialEq)]
pub struct DomainTypedData {
    pub domain: TypedStruct,
    pub message: Option<TypedStruct>,
}

impl DomainTypedData {
    pub fn new(name: &str, chain_id: u64, version: Option<&str>) -> Self {
        Self {
            domain: eip712_domain(name, chain_id, version),
            message: None,
        }
    }

    pub fn with_message(mut self, message: TypedStruct) -> Self {
        self.message = Some(message);
        self
    }
}

impl TypedDataProvider for DomainTypedData {
    fn typed_data(&self) -> Option<Value> {
        let message = self.message.as_ref()?;
        if !self.domain.is_valid() || !message.is_valid() {
            return None;
        }

        let mut types = Map::new();
        types.insert(self.domain.type_name.clone(), self.domain.definitions());
        types.insert(message.type_name.clone(), message.definitions());

        let mut document = Map::new();
        document.insert("types".into(), Value::Object(types));
        document.insert("primaryType".into(), Value::String(message.type_name.clone()));
        document.insert("domain".into(), Value::Object(self.domain.data.clone()));
        document.insert("message".into(), Value::Object(message.data.clone()));
        Some(canonicalize(&Value::Object(document)))
    }
}

/// Rebuild `value` with object keys in lexicographic order at every depth.
///
/// Keys are re-inserted in sorted order so the result is sorted whether or
/// not `serde_json` preserves insertion order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&object[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compact serialization of the canonical form
pub fn canonical_string(value: &Value) -> String {
    canonicalize(value).to_string()
}
