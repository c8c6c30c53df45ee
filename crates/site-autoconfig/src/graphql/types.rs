//! GraphQL introspection response types.
//!
//! These types represent the subset of the `__schema` document requested by
//! [`INTROSPECTION_QUERY`](super::introspect::INTROSPECTION_QUERY).

use serde::{Deserialize, Serialize};

/// Top-level response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    #[serde(default)]
    pub data: Option<IntrospectionData>,
    #[serde(default)]
    pub errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionData {
    #[serde(rename = "__schema")]
    pub schema: SchemaDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDoc {
    #[serde(default)]
    pub query_type: Option<NamedRef>,
    pub types: Vec<FullType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedRef {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
    List,
    NonNull,
    #[serde(other)]
    Other,
}

/// A named type with its fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullType {
    pub kind: TypeKind,
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<FieldDef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub args: Vec<InputValue>,
    #[serde(rename = "type")]
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputValue {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    #[serde(default)]
    pub default_value: Option<String>,
}

/// Possibly wrapped (list / non-null) type reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypeRef {
    pub kind: TypeKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub of_type: Option<Box<TypeRef>>,
}

impl TypeRef {
    /// Name of the innermost named type
    pub fn base_name(&self) -> Option<&str> {
        match &self.of_type {
            Some(inner) => inner.base_name(),
            None => self.name.as_deref(),
        }
    }

    /// Kind of the innermost named type
    pub fn base_kind(&self) -> TypeKind {
        match &self.of_type {
            Some(inner) => inner.base_kind(),
            None => self.kind,
        }
    }

    pub fn is_list(&self) -> bool {
        self.kind == TypeKind::List || self.of_type.as_ref().map(|t| t.is_list()).unwrap_or(false)
    }

    pub fn is_non_null(&self) -> bool {
        self.kind == TypeKind::NonNull
    }

    /// Render in SDL notation (`[Show!]!`)
    pub fn render(&self) -> String {
        match (self.kind, &self.of_type) {
            (TypeKind::NonNull, Some(inner)) => format!("{}!", inner.render()),
            (TypeKind::List, Some(inner)) => format!("[{}]", inner.render()),
            _ => self.name.clone().unwrap_or_default(),
        }
    }
}
