//! Turning upstream introspection responses into schemas.
//!
//! The JSON payload is rendered to SDL and run through the validating
//! parser, so an upstream schema is held to the same standard as one read
//! from disk.

use std::fmt::Write;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::SchemaError;
use crate::fanout::async_map_reduce;
use crate::graphql::Request;
use crate::introspection::INTROSPECTION_QUERY;
use crate::introspection::INTROSPECTION_QUERY_NAME;
use crate::services::Queryer;

const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

/// Fetches the schema of each upstream service.
#[async_trait]
pub trait RemoteSchemaIntrospector: Send + Sync {
    async fn introspect(
        &self,
        urls: &[Arc<str>],
    ) -> Result<Vec<apollo_compiler::Schema>, SchemaError>;
}

type QueryerFactory = dyn Fn(Arc<str>) -> Arc<dyn Queryer> + Send + Sync;

/// Issues the introspection query against every upstream concurrently.
/// Any single failure aborts startup.
pub struct ParallelRemoteIntrospector {
    factory: Arc<QueryerFactory>,
}

impl ParallelRemoteIntrospector {
    pub fn new(factory: Arc<QueryerFactory>) -> Self {
        ParallelRemoteIntrospector { factory }
    }
}

#[async_trait]
impl RemoteSchemaIntrospector for ParallelRemoteIntrospector {
    async fn introspect(
        &self,
        urls: &[Arc<str>],
    ) -> Result<Vec<apollo_compiler::Schema>, SchemaError> {
        async_map_reduce(
            urls.to_vec(),
            Vec::with_capacity(urls.len()),
            |url| {
                let queryer = (self.factory)(url.clone());
                async move { introspect_one(queryer.as_ref(), &url).await }
            },
            |mut acc, schema| {
                acc.push(schema);
                acc
            },
        )
        .await
        .map_err(|mut errors| errors.remove(0))
    }
}

async fn introspect_one(
    queryer: &dyn Queryer,
    url: &str,
) -> Result<apollo_compiler::Schema, SchemaError> {
    let error = |reason: String| SchemaError::Introspection {
        url: url.to_string(),
        reason,
    };

    let mut responses = queryer
        .query(vec![Request::new(INTROSPECTION_QUERY)
            .with_operation_name(INTROSPECTION_QUERY_NAME)])
        .await
        .map_err(|fetch_error| error(fetch_error.to_string()))?;
    if responses.is_empty() {
        return Err(error("empty introspection response".to_string()));
    }

    let data = responses.remove(0);
    let schema_value = data
        .get("__schema")
        .cloned()
        .ok_or_else(|| error("could not find the root query".to_string()))?;
    let schema: IntrospectionSchema = serde_json_bytes::from_value(schema_value)
        .map_err(|parse_error| error(parse_error.to_string()))?;

    let sdl = schema_to_sdl(&schema);
    tracing::debug!(url, bytes = sdl.len(), "introspected upstream schema");

    apollo_compiler::Schema::parse_and_validate(&sdl, "introspected.graphql")
        .map(|valid| valid.into_inner())
        .map_err(|invalid| {
            error(
                invalid
                    .errors
                    .iter()
                    .map(|diagnostic| diagnostic.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IntrospectionSchema {
    query_type: Option<NamedRef>,
    mutation_type: Option<NamedRef>,
    subscription_type: Option<NamedRef>,
    #[serde(default)]
    types: Vec<IntrospectionType>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionType {
    kind: String,
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    fields: Option<Vec<IntrospectionField>>,
    #[serde(default)]
    input_fields: Option<Vec<IntrospectionInputValue>>,
    #[serde(default)]
    interfaces: Option<Vec<TypeRef>>,
    #[serde(default)]
    enum_values: Option<Vec<IntrospectionEnumValue>>,
    #[serde(default)]
    possible_types: Option<Vec<TypeRef>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionField {
    name: String,
    description: Option<String>,
    #[serde(default)]
    args: Vec<IntrospectionInputValue>,
    #[serde(rename = "type")]
    ty: TypeRef,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionInputValue {
    name: String,
    description: Option<String>,
    #[serde(rename = "type")]
    ty: TypeRef,
    default_value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntrospectionEnumValue {
    name: String,
    description: Option<String>,
    #[serde(default)]
    is_deprecated: bool,
    deprecation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeRef {
    kind: String,
    name: Option<String>,
    of_type: Option<Box<TypeRef>>,
}

impl TypeRef {
    fn render(&self) -> String {
        match (self.kind.as_str(), &self.of_type) {
            ("NON_NULL", Some(inner)) => format!("{}!", inner.render()),
            ("LIST", Some(inner)) => format!("[{}]", inner.render()),
            _ => self.name.clone().unwrap_or_default(),
        }
    }
}

fn schema_to_sdl(schema: &IntrospectionSchema) -> String {
    let mut sdl = String::new();

    let query = schema.query_type.as_ref().map(|t| t.name.as_str());
    let mutation = schema.mutation_type.as_ref().map(|t| t.name.as_str());
    let subscription = schema.subscription_type.as_ref().map(|t| t.name.as_str());

    // the schema block is only required for non-default root names
    let default_roots = query.unwrap_or("Query") == "Query"
        && mutation.unwrap_or("Mutation") == "Mutation"
        && subscription.unwrap_or("Subscription") == "Subscription";
    if !default_roots {
        sdl.push_str("schema {\n");
        if let Some(name) = query {
            let _ = writeln!(sdl, "\tquery: {name}");
        }
        if let Some(name) = mutation {
            let _ = writeln!(sdl, "\tmutation: {name}");
        }
        if let Some(name) = subscription {
            let _ = writeln!(sdl, "\tsubscription: {name}");
        }
        sdl.push_str("}\n");
    }

    for ty in &schema.types {
        let Some(name) = ty.name.as_deref() else {
            continue;
        };
        if name.starts_with("__") || BUILTIN_SCALARS.contains(&name) {
            continue;
        }

        write_description(&mut sdl, ty.description.as_deref(), "");
        match ty.kind.as_str() {
            "SCALAR" => {
                let _ = writeln!(sdl, "scalar {name}");
            }
            "OBJECT" | "INTERFACE" => {
                let keyword = if ty.kind == "OBJECT" { "type" } else { "interface" };
                let _ = write!(sdl, "{keyword} {name}");
                if let Some(interfaces) = &ty.interfaces {
                    let names: Vec<&str> = interfaces
                        .iter()
                        .filter_map(|interface| interface.name.as_deref())
                        .collect();
                    if !names.is_empty() {
                        let _ = write!(sdl, " implements {}", names.join(" & "));
                    }
                }
                sdl.push_str(" {\n");
                for field in ty.fields.as_deref().unwrap_or_default() {
                    write_description(&mut sdl, field.description.as_deref(), "\t");
                    let _ = write!(sdl, "\t{}", field.name);
                    write_arguments(&mut sdl, &field.args);
                    let _ = write!(sdl, ": {}", field.ty.render());
                    write_deprecation(&mut sdl, field.is_deprecated, field.deprecation_reason.as_deref());
                    sdl.push('\n');
                }
                sdl.push_str("}\n");
            }
            "UNION" => {
                let members: Vec<&str> = ty
                    .possible_types
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|member| member.name.as_deref())
                    .collect();
                let _ = writeln!(sdl, "union {name} = {}", members.join(" | "));
            }
            "ENUM" => {
                let _ = writeln!(sdl, "enum {name} {{");
                for value in ty.enum_values.as_deref().unwrap_or_default() {
                    write_description(&mut sdl, value.description.as_deref(), "\t");
                    let _ = write!(sdl, "\t{}", value.name);
                    write_deprecation(&mut sdl, value.is_deprecated, value.deprecation_reason.as_deref());
                    sdl.push('\n');
                }
                sdl.push_str("}\n");
            }
            "INPUT_OBJECT" => {
                let _ = writeln!(sdl, "input {name} {{");
                for field in ty.input_fields.as_deref().unwrap_or_default() {
                    write_description(&mut sdl, field.description.as_deref(), "\t");
                    let _ = write!(sdl, "\t{}: {}", field.name, field.ty.render());
                    if let Some(default) = &field.default_value {
                        let _ = write!(sdl, " = {default}");
                    }
                    sdl.push('\n');
                }
                sdl.push_str("}\n");
            }
            _ => {}
        }
        sdl.push('\n');
    }

    sdl
}

fn write_description(sdl: &mut String, description: Option<&str>, indent: &str) {
    let Some(description) = description else {
        return;
    };
    if description.is_empty() {
        return;
    }
    let escaped = description.replace("\"\"\"", "\\\"\"\"");
    let _ = writeln!(sdl, "{indent}\"\"\"{escaped}\"\"\"");
}

fn write_arguments(sdl: &mut String, args: &[IntrospectionInputValue]) {
    if args.is_empty() {
        return;
    }
    sdl.push('(');
    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            sdl.push_str(", ");
        }
        let _ = write!(sdl, "{}: {}", arg.name, arg.ty.render());
        if let Some(default) = &arg.default_value {
            let _ = write!(sdl, " = {default}");
        }
    }
    sdl.push(')');
}

fn write_deprecation(sdl: &mut String, is_deprecated: bool, reason: Option<&str>) {
    if !is_deprecated {
        return;
    }
    match reason {
        Some(reason) => {
            let escaped = reason.replace('"', "\\\"");
            let _ = write!(sdl, " @deprecated(reason: \"{escaped}\")");
        }
        None => sdl.push_str(" @deprecated"),
    }
}

/// Introspects with one [`crate::services::HttpQueryer`] per upstream.
pub(crate) fn default_introspector() -> ParallelRemoteIntrospector {
    ParallelRemoteIntrospector::new(Arc::new(|url: Arc<str>| {
        Arc::new(crate::services::HttpQueryer::new(url, 1)) as Arc<dyn Queryer>
    }))
}
