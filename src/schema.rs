//! Node type registry.
//!
//! Every node source declares a `type`. The registry maps each type
//! identifier to a [`NodeSchema`] (its node kind plus the fields it accepts)
//! and turns a parser's [`RawNode`] into a [`DraftNode`] with typed field
//! values. The registry is built once at startup and is read-only afterwards.
//!
//! ```
//! use sitegraph::schema::{FieldType, NodeKind, NodeSchema, TypeRegistry};
//!
//! let registry = TypeRegistry::builder()
//!     .register(
//!         "page",
//!         NodeSchema::new(NodeKind::Nested)
//!             .required("title", FieldType::Text)
//!             .optional("hero", FieldType::Image),
//!     )
//!     .build()
//!     .unwrap();
//! assert!(registry.get("page").is_some());
//! ```

use crate::node::{DraftFile, DraftMarkdown, DraftNode, DraftReference, DraftValue};
use crate::parse::RawNode;
use crate::path::Slug;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Unknown node type `{0}`")]
    UnknownType(String),
    #[error("Node type `{0}` registered twice")]
    DuplicateType(String),
    #[error("Unknown field `{field}` for node type `{type_id}`")]
    UnknownField { type_id: String, field: String },
    #[error("Missing required field `{field}` for node type `{type_id}`")]
    MissingField { type_id: String, field: String },
    #[error("Field `{field}` expects {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: &'static str,
    },
    #[error("Field `{field}`: {message}")]
    InvalidValue { field: String, message: String },
}

/// Structural variant of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Plain content; may be a single file inside its parent's directory.
    Leaf,
    /// Content with ordered children.
    Branch,
    /// Content that must live in its own directory (usually because it has
    /// colocated assets).
    Nested,
}

impl NodeKind {
    pub fn accepts_children(self) -> bool {
        matches!(self, NodeKind::Branch)
    }

    pub fn requires_directory(self) -> bool {
        matches!(self, NodeKind::Branch | NodeKind::Nested)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Leaf => "leaf",
            NodeKind::Branch => "branch",
            NodeKind::Nested => "nested",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Bool,
    Integer,
    Float,
    Slug,
    Markdown,
    Reference,
    File,
    Image,
    List(Box<FieldType>),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Text => f.write_str("text"),
            FieldType::Bool => f.write_str("bool"),
            FieldType::Integer => f.write_str("integer"),
            FieldType::Float => f.write_str("float"),
            FieldType::Slug => f.write_str("slug"),
            FieldType::Markdown => f.write_str("markdown"),
            FieldType::Reference => f.write_str("content reference"),
            FieldType::File => f.write_str("file"),
            FieldType::Image => f.write_str("image"),
            FieldType::List(inner) => write!(f, "list of {inner}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSchema {
    pub kind: NodeKind,
    pub fields: Vec<FieldSpec>,
}

impl NodeSchema {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            fields: Vec::new(),
        }
    }

    pub fn required(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            field_type,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            field_type,
            required: false,
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Default)]
pub struct TypeRegistryBuilder {
    types: Vec<(String, NodeSchema)>,
}

impl TypeRegistryBuilder {
    pub fn register(mut self, type_id: &str, schema: NodeSchema) -> Self {
        self.types.push((type_id.to_string(), schema));
        self
    }

    pub fn build(self) -> Result<TypeRegistry, SchemaError> {
        let mut types = HashMap::with_capacity(self.types.len());
        for (type_id, schema) in self.types {
            if types.contains_key(&type_id) {
                return Err(SchemaError::DuplicateType(type_id));
            }
            types.insert(type_id, schema);
        }
        Ok(TypeRegistry { types })
    }
}

/// Explicit mapping from type identifier to node schema.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, NodeSchema>,
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    /// General-purpose website schemas used by the CLI.
    pub fn standard() -> Self {
        let link_list = || FieldType::List(Box::new(FieldType::Reference));
        let mut types = HashMap::new();
        types.insert(
            "website".to_string(),
            NodeSchema::new(NodeKind::Branch)
                .required("title", FieldType::Text)
                .optional("logo", FieldType::Image)
                .optional("navigation", link_list())
                .optional("body", FieldType::Markdown),
        );
        types.insert(
            "section".to_string(),
            NodeSchema::new(NodeKind::Branch)
                .required("title", FieldType::Text)
                .optional("slug", FieldType::Slug)
                .optional("index", FieldType::Reference)
                .optional("body", FieldType::Markdown),
        );
        types.insert(
            "page".to_string(),
            NodeSchema::new(NodeKind::Nested)
                .required("title", FieldType::Text)
                .optional("slug", FieldType::Slug)
                .optional("hero", FieldType::Image)
                .optional("attachments", FieldType::List(Box::new(FieldType::File)))
                .optional("related", link_list())
                .optional("redirect", FieldType::Reference)
                .optional("body", FieldType::Markdown),
        );
        types.insert(
            "article".to_string(),
            NodeSchema::new(NodeKind::Leaf)
                .required("title", FieldType::Text)
                .optional("slug", FieldType::Slug)
                .optional("date", FieldType::Text)
                .optional("draft", FieldType::Bool)
                .optional("related", link_list())
                .optional("body", FieldType::Markdown),
        );
        types.insert(
            "image-page".to_string(),
            NodeSchema::new(NodeKind::Nested)
                .required("title", FieldType::Text)
                .required("image", FieldType::Image)
                .optional("width", FieldType::Integer)
                .optional("height", FieldType::Integer)
                .optional("caption", FieldType::Markdown),
        );
        Self { types }
    }

    pub fn get(&self, type_id: &str) -> Option<&NodeSchema> {
        self.types.get(type_id)
    }

    pub fn schema(&self, type_id: &str) -> Result<&NodeSchema, SchemaError> {
        self.get(type_id)
            .ok_or_else(|| SchemaError::UnknownType(type_id.to_string()))
    }

    /// Check a raw node against its schema and build the draft node.
    pub fn build_draft(&self, raw: RawNode) -> Result<DraftNode, SchemaError> {
        let schema = self.schema(&raw.type_id)?;

        for key in raw.properties.keys() {
            if schema.field(key).is_none() {
                return Err(SchemaError::UnknownField {
                    type_id: raw.type_id.clone(),
                    field: key.clone(),
                });
            }
        }

        let mut properties = raw.properties;
        let mut fields = BTreeMap::new();
        for spec in &schema.fields {
            match properties.remove(&spec.name) {
                Some(value) => {
                    let draft = convert(&spec.name, &spec.field_type, value)?;
                    fields.insert(spec.name.clone(), draft);
                }
                None if spec.required => {
                    return Err(SchemaError::MissingField {
                        type_id: raw.type_id,
                        field: spec.name.clone(),
                    });
                }
                None => {}
            }
        }

        Ok(DraftNode {
            type_id: raw.type_id,
            kind: schema.kind,
            fields,
        })
    }
}

fn convert(
    field: &str,
    expected: &FieldType,
    value: toml::Value,
) -> Result<DraftValue, SchemaError> {
    let mismatch = |value: &toml::Value| SchemaError::TypeMismatch {
        field: field.to_string(),
        expected: expected.clone(),
        found: value.type_str(),
    };

    match (expected, value) {
        (FieldType::Text, toml::Value::String(s)) => Ok(DraftValue::Text(s)),
        (FieldType::Bool, toml::Value::Boolean(b)) => Ok(DraftValue::Bool(b)),
        (FieldType::Integer, toml::Value::Integer(i)) => Ok(DraftValue::Integer(i)),
        (FieldType::Float, toml::Value::Float(f)) => Ok(DraftValue::Float(f)),
        (FieldType::Float, toml::Value::Integer(i)) => Ok(DraftValue::Float(i as f64)),
        (FieldType::Slug, toml::Value::String(s)) => Slug::new(s)
            .map(DraftValue::Slug)
            .map_err(|e| SchemaError::InvalidValue {
                field: field.to_string(),
                message: e.to_string(),
            }),
        (FieldType::Markdown, toml::Value::String(s)) => {
            Ok(DraftValue::Markdown(DraftMarkdown(s)))
        }
        (FieldType::Reference, toml::Value::String(s)) => {
            Ok(DraftValue::Reference(DraftReference(s)))
        }
        (FieldType::File, toml::Value::String(s)) => Ok(DraftValue::File(DraftFile(s))),
        (FieldType::Image, toml::Value::String(s)) => Ok(DraftValue::Image(DraftFile(s))),
        (FieldType::List(inner), toml::Value::Array(items)) => items
            .into_iter()
            .map(|item| convert(field, inner, item))
            .collect::<Result<Vec<_>, _>>()
            .map(DraftValue::List),
        (_, other) => Err(mismatch(&other)),
    }
}
