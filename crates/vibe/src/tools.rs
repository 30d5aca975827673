//! The tool subsystem: user-defined, AI-callable native wrappers.
//!
//! A `tool` declaration compiles to a registration: a JSON-schema-like
//! parameter list built from the declared types, descriptions attached from
//! `@param` decorators, and an executor (the declaration's host-language
//! escape). Tools are offered to AI models through a model declaration's
//! `tools` list; calling one from user code is a runtime error.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    ast::{BaseType, HostEscape, ToolDecl, TypeAnnotation},
    error::{EngineError, RunResult},
    modules::ImportedName,
};

/// A registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParamSchema>,
    /// Display form of the declared return type, if any.
    pub return_type: Option<String>,
    /// The host-language escape the embedder runs to execute the tool.
    pub executor: HostEscape,
}

impl ToolSpec {
    /// Renders the tool as a JSON-schema-like object for AI provider adapters.
    #[must_use]
    pub fn schema_json(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for param in &self.params {
            let mut schema = param.schema.to_json();
            if let (Some(doc), serde_json::Value::Object(obj)) = (&param.description, &mut schema) {
                obj.insert("description".to_owned(), json!(doc));
            }
            properties.insert(param.name.clone(), schema);
        }
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": self.params.iter().map(|p| p.name.clone()).collect::<Vec<_>>(),
            },
        })
    }
}

/// One parameter of a tool schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParamSchema {
    pub name: String,
    pub schema: SchemaType,
    pub description: Option<String>,
}

/// Schema shapes derivable from declared parameter types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchemaType {
    Text,
    Number,
    Boolean,
    Json,
    Array(Box<SchemaType>),
    /// An opaque reference to a type imported from a host module.
    Imported { name: String, source: Option<String> },
}

impl SchemaType {
    fn from_annotation(ty: &TypeAnnotation, imported_names: &ahash::AHashMap<String, ImportedName>) -> Self {
        let base = match &ty.base {
            BaseType::Text | BaseType::Prompt => Self::Text,
            BaseType::Number => Self::Number,
            BaseType::Boolean => Self::Boolean,
            BaseType::Json => Self::Json,
            BaseType::Named(name) => Self::Imported {
                name: name.clone(),
                source: imported_names.get(name).map(|i| i.source_path.clone()),
            },
        };
        (0..ty.array_depth).fold(base, |inner, _| Self::Array(Box::new(inner)))
    }

    /// JSON-schema fragment for this shape.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Text => json!({"type": "string"}),
            Self::Number => json!({"type": "number"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Json => json!({"type": "object"}),
            Self::Array(inner) => json!({"type": "array", "items": inner.to_json()}),
            Self::Imported { name, source } => match source {
                Some(source) => json!({"$ref": format!("{source}#{name}")}),
                None => json!({"$ref": name}),
            },
        }
    }
}

/// Builds a registration from a `tool` declaration.
///
/// `@param` decorators naming an unknown parameter are rejected; a duplicate
/// `@param` keeps the first description.
pub fn build_tool_spec(
    decl: &ToolDecl,
    imported_names: &ahash::AHashMap<String, ImportedName>,
) -> RunResult<ToolSpec> {
    for (param_name, _) in &decl.param_docs {
        if !decl.params.iter().any(|p| &p.name == param_name) {
            return Err(EngineError::semantic(format!(
                "Tool '{}' documents unknown parameter '{param_name}'",
                decl.name
            )));
        }
    }
    let params = decl
        .params
        .iter()
        .map(|param| {
            let schema = param.ty.as_ref().map_or(SchemaType::Text, |ty| {
                SchemaType::from_annotation(ty, imported_names)
            });
            let description = decl
                .param_docs
                .iter()
                .find(|(name, _)| name == &param.name)
                .map(|(_, doc)| doc.clone());
            ToolParamSchema {
                name: param.name.clone(),
                schema,
                description,
            }
        })
        .collect();
    Ok(ToolSpec {
        name: decl.name.clone(),
        description: decl.description.clone(),
        params,
        return_type: decl.return_type.as_ref().map(ToString::to_string),
        executor: decl.body.clone(),
    })
}
