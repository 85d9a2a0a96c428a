//! Compilation of OpenAPI documents into operation tables and validators.

use super::{LoneSpec, OperationSpec, ParamKind, ParameterSpec, Resolver, SpecFile};
use crate::error::ApiError;
use http::Method;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

const METHODS: [&str; 7] = ["get", "put", "post", "delete", "patch", "head", "options"];

/// Media types advertised by the document's shared `Ok`/`Ok_all`/`Created`
/// response components.
pub fn get_mime_types(doc: &Value) -> Vec<String> {
    let mut out = Vec::new();
    for key in ["Ok_all", "Ok", "Created"] {
        if let Some(content) = doc
            .pointer(&format!("/components/responses/{key}/content"))
            .and_then(Value::as_object)
        {
            for mime in content.keys() {
                if !out.contains(mime) {
                    out.push(mime.clone());
                }
            }
        }
    }
    out
}

/// Pick the schema for a request/response content map, preferring the
/// document's advertised media types, then plain JSON.
fn content_schema(content: &Map<String, Value>, media_types: &[String]) -> Option<Value> {
    for mime in media_types {
        if let Some(schema) = content.get(mime).and_then(|m| m.get("schema")) {
            return Some(schema.clone());
        }
    }
    if let Some(schema) = content.get("application/json").and_then(|m| m.get("schema")) {
        return Some(schema.clone());
    }
    content
        .values()
        .next()
        .and_then(|m| m.get("schema"))
        .cloned()
}

fn extract_parameters(
    item: &Value,
    action: &Value,
    resolver: &Resolver,
) -> (Vec<ParameterSpec>, Vec<ParameterSpec>) {
    let mut path_params = Vec::new();
    let mut query_params = Vec::new();
    let sources = [item.get("parameters"), action.get("parameters")];
    for params in sources.into_iter().flatten() {
        let Some(list) = params.as_array() else {
            continue;
        };
        for raw in list {
            let mut param = raw.clone();
            resolver.expand(&mut param);
            let Some(name) = param.get("name").and_then(Value::as_str) else {
                continue;
            };
            let location = param.get("in").and_then(Value::as_str).unwrap_or("query");
            let required = param
                .get("required")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let schema = param.get("schema").cloned().unwrap_or(json!({}));
            let kind = schema
                .get("type")
                .and_then(Value::as_str)
                .and_then(ParamKind::from_schema_type)
                .unwrap_or(ParamKind::String);
            let spec = ParameterSpec {
                name: name.to_string(),
                required,
                kind,
                schema,
            };
            match location {
                "path" => path_params.push(spec),
                "query" => query_params.push(spec),
                other => {
                    debug!(name = %name, location = %other, "ignoring parameter location");
                }
            }
        }
    }
    (path_params, query_params)
}

/// Compose the input validator schema over `{path, query, body}` with
/// `additionalProperties: false` and explicit `required`.
pub fn generate_schema_obj(
    path_params: &[ParameterSpec],
    query_params: &[ParameterSpec],
    body_schema: Option<&Value>,
    body_required: bool,
) -> Value {
    let mut required: Vec<Value> = Vec::new();
    let mut properties = Map::new();

    let section = |params: &[ParameterSpec]| -> (Value, bool) {
        let mut props = Map::new();
        let mut req: Vec<Value> = Vec::new();
        for p in params {
            props.insert(p.name.clone(), p.schema.clone());
            if p.required {
                req.push(Value::String(p.name.clone()));
            }
        }
        let any_required = !req.is_empty();
        (
            json!({
                "type": "object",
                "properties": props,
                "additionalProperties": false,
                "required": req,
            }),
            any_required,
        )
    };

    if !path_params.is_empty() {
        let (obj, any_required) = section(path_params);
        properties.insert("path".to_string(), obj);
        if any_required {
            required.push(Value::String("path".to_string()));
        }
    }
    if !query_params.is_empty() {
        let (obj, any_required) = section(query_params);
        properties.insert("query".to_string(), obj);
        if any_required {
            required.push(Value::String("query".to_string()));
        }
    }
    if let Some(schema) = body_schema {
        properties.insert("body".to_string(), schema.clone());
        if body_required {
            required.push(Value::String("body".to_string()));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "additionalProperties": false,
        "required": required,
    })
}

/// Map the family's named response keys onto status-code strings.
fn status_key(key: &str) -> String {
    match key {
        "Ok" | "Ok_all" => "200".to_string(),
        "Created" => "201".to_string(),
        other => other.to_string(),
    }
}

/// Compose the response validator schema, keyed by status-code string.
pub fn generate_resp_obj(responses: &Value, media_types: &[String]) -> Value {
    let mut properties = Map::new();
    if let Some(map) = responses.as_object() {
        for (key, resp) in map {
            let schema = resp
                .get("content")
                .and_then(Value::as_object)
                .and_then(|content| content_schema(content, media_types));
            properties.insert(status_key(key), schema.unwrap_or_else(|| resp.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "additionalProperties": false,
    })
}

/// Build every operation of one lone document.
pub fn build_operations(
    doc: &Value,
    resolver: &Resolver,
    file: &SpecFile,
    media_types: &[String],
) -> anyhow::Result<Vec<OperationSpec>> {
    let mut out = Vec::new();
    let Some(paths) = doc.get("paths").and_then(Value::as_object) else {
        return Ok(out);
    };
    for (path, item) in paths {
        for method_str in METHODS {
            let Some(action) = item.get(method_str) else {
                continue;
            };
            let method: Method = match method_str.to_uppercase().parse() {
                Ok(m) => m,
                Err(_) => continue,
            };
            let Some(operation_id) = action.get("operationId").and_then(Value::as_str) else {
                warn!(path = %path, method = %method_str, "operation without operationId, skipped");
                continue;
            };

            let (path_params, query_params) = extract_parameters(item, action, resolver);

            let mut body_required = false;
            let mut body_schema = None;
            if let Some(request_body) = action.get("requestBody") {
                let mut rb = request_body.clone();
                resolver.expand(&mut rb);
                body_required = rb
                    .get("required")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                body_schema = rb
                    .get("content")
                    .and_then(Value::as_object)
                    .and_then(|content| content_schema(content, media_types))
                    .map(|mut schema| {
                        if let Value::Object(_) = schema {
                            resolver.expand(&mut schema);
                        }
                        schema
                    });
            }

            let mut responses = action.get("responses").cloned().unwrap_or(json!({}));
            resolver.expand(&mut responses);

            let input_schema = generate_schema_obj(
                &path_params,
                &query_params,
                body_schema.as_ref(),
                body_required,
            );
            let response_schema = generate_resp_obj(&responses, media_types);

            let mut param_types = HashMap::new();
            for p in path_params.iter().chain(query_params.iter()) {
                param_types.insert(p.name.clone(), p.kind);
            }

            out.push(OperationSpec {
                lone: file.lone.clone(),
                version: file.version.clone(),
                major_version: file.major_version.clone(),
                method,
                path_pattern: path.clone(),
                operation_id: operation_id.to_string(),
                path_params,
                query_params,
                param_types,
                request_body_schema: body_schema,
                request_body_required: body_required,
                input_schema,
                response_schema,
                media_types: media_types.to_vec(),
            });
        }
    }
    Ok(out)
}

/// Compiled draft-04 validators for one operation.
pub struct OperationValidators {
    pub input: jsonschema::Validator,
    pub response: jsonschema::Validator,
}

pub fn compile_operation(op: &OperationSpec) -> anyhow::Result<OperationValidators> {
    let build = |schema: &Value| {
        jsonschema::options()
            .with_draft(jsonschema::Draft::Draft4)
            .build(schema)
            .map_err(|e| anyhow::anyhow!("schema for {} does not compile: {e}", op.operation_id))
    };
    Ok(OperationValidators {
        input: build(&op.input_schema)?,
        response: build(&op.response_schema)?,
    })
}

/// Shape a validation failure the way the surfaces report it.
pub fn schema_error(validator: &jsonschema::Validator, instance: &Value) -> Option<Value> {
    let errors: Vec<Value> = validator
        .iter_errors(instance)
        .map(|e| {
            json!({
                "errmsg": e.to_string(),
                "schema_path": e.schema_path().to_string(),
                "instance_path": e.instance_path().to_string(),
            })
        })
        .collect();
    if errors.is_empty() {
        None
    } else if errors.len() == 1 {
        errors.into_iter().next()
    } else {
        Some(Value::Array(errors))
    }
}

/// Deserialize a query value per `form`/non-exploded style.
///
/// Objects arrive as CSV with alternating keys and values; arrays as CSV;
/// scalars coerce per the declared type.
pub fn decode_query_value(data: &str, kind: ParamKind) -> Result<Value, ApiError> {
    let invalid = || ApiError::new(format!("Invalid query value:{data}"), 400);
    match kind {
        ParamKind::Object => {
            let parts: Vec<&str> = data.split(',').collect();
            let mut obj = Map::new();
            for pair in parts.chunks(2) {
                if let [k, v] = pair {
                    obj.insert(k.to_string(), Value::String(v.to_string()));
                }
            }
            Ok(Value::Object(obj))
        }
        ParamKind::Array => Ok(Value::Array(
            data.split(',')
                .map(|s| Value::String(s.to_string()))
                .collect(),
        )),
        ParamKind::String => Ok(Value::String(data.to_string())),
        ParamKind::Integer => data
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid()),
        ParamKind::Number => data
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| invalid()),
        ParamKind::Boolean => crate::util::str_to_bool(data)
            .map(Value::from)
            .map_err(|_| invalid()),
    }
}

/// Deserialize a path value per `simple`/exploded style.
///
/// Values arrive percent-encoded; objects as `k1=v1,k2=v2`.
pub fn decode_path_value(data: &str, kind: ParamKind) -> Result<Value, ApiError> {
    let invalid = || ApiError::new(format!("Invalid path value:{data}"), 400);
    let decoded = urlencoding::decode(data)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| data.to_string());
    match kind {
        ParamKind::Object => {
            let mut obj = Map::new();
            for pair in decoded.split(',') {
                let (k, v) = pair.split_once('=').ok_or_else(invalid)?;
                obj.insert(k.to_string(), Value::String(v.to_string()));
            }
            Ok(Value::Object(obj))
        }
        ParamKind::Array => Ok(Value::Array(
            decoded
                .split(',')
                .map(|s| Value::String(s.to_string()))
                .collect(),
        )),
        ParamKind::Integer => decoded
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid()),
        ParamKind::Number => decoded
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| invalid()),
        _ => Ok(Value::String(decoded)),
    }
}

/// Serialize a value for a query string per `form`/non-exploded style.
pub fn encode_query_value(key: &str, value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(format!("{key}={s}")),
        Value::Number(n) => Some(format!("{key}={n}")),
        Value::Bool(b) => Some(format!("{key}={b}")),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            Some(format!("{key}={}", parts.join(",")))
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => format!("{k},{s}"),
                    other => format!("{k},{other}"),
                })
                .collect();
            Some(format!("{key}={}", parts.join(",")))
        }
        Value::Null => None,
    }
}

/// `LoneSpec` helpers for locating an operation by operation id.
impl LoneSpec {
    pub fn operation_by_id(&self, operation_id: &str) -> Option<&OperationSpec> {
        self.operations
            .iter()
            .find(|op| op.operation_id == operation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, kind: ParamKind, required: bool) -> ParameterSpec {
        let ty = match kind {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        };
        ParameterSpec {
            name: name.to_string(),
            required,
            kind,
            schema: json!({"type": ty}),
        }
    }

    #[test]
    fn test_schema_obj_shape() {
        let schema = generate_schema_obj(
            &[param("primary_key", ParamKind::String, true)],
            &[param("_cursor", ParamKind::String, false)],
            Some(&json!({"type": "object"})),
            true,
        );
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(schema["required"], json!(["path", "body"]));
        assert_eq!(
            schema["properties"]["path"]["required"],
            json!(["primary_key"])
        );
        assert_eq!(
            schema["properties"]["query"]["required"],
            json!([] as [&str; 0])
        );
    }

    #[test]
    fn test_resp_obj_maps_named_statuses() {
        let responses = json!({
            "Ok": { "content": { "application/json": { "schema": { "type": "object" } } } },
            "Created": { "content": { "application/json": { "schema": { "type": "object" } } } },
            "404": { "description": "missing" },
        });
        let resp = generate_resp_obj(&responses, &["application/json".to_string()]);
        assert!(resp["properties"].get("200").is_some());
        assert!(resp["properties"].get("201").is_some());
        assert!(resp["properties"].get("404").is_some());
    }

    #[test]
    fn test_input_validation_rejects_extra_properties() {
        let op_schema = generate_schema_obj(
            &[param("primary_key", ParamKind::String, true)],
            &[],
            None,
            false,
        );
        let validator = jsonschema::options()
            .with_draft(jsonschema::Draft::Draft4)
            .build(&op_schema)
            .unwrap();
        assert!(validator
            .iter_errors(&json!({"path": {"primary_key": "x"}}))
            .next()
            .is_none());
        assert!(validator
            .iter_errors(&json!({"path": {"primary_key": "x"}, "bogus": 1}))
            .next()
            .is_some());
    }

    #[test]
    fn test_decode_query_values() {
        assert_eq!(
            decode_query_value("a,1,b,2", ParamKind::Object).unwrap(),
            json!({"a": "1", "b": "2"})
        );
        assert_eq!(
            decode_query_value("x,y", ParamKind::Array).unwrap(),
            json!(["x", "y"])
        );
        assert_eq!(decode_query_value("5", ParamKind::Integer).unwrap(), json!(5));
        assert_eq!(
            decode_query_value("2.5", ParamKind::Number).unwrap(),
            json!(2.5)
        );
        assert!(decode_query_value("five", ParamKind::Integer).is_err());
    }

    #[test]
    fn test_decode_path_values() {
        assert_eq!(
            decode_path_value("k1=v1,k2=v2", ParamKind::Object).unwrap(),
            json!({"k1": "v1", "k2": "v2"})
        );
        assert_eq!(
            decode_path_value("a%2Fb", ParamKind::String).unwrap(),
            json!("a/b")
        );
        assert_eq!(decode_path_value("7", ParamKind::Integer).unwrap(), json!(7));
    }

    #[test]
    fn test_encode_query_value() {
        assert_eq!(
            encode_query_value("k", &json!("v")).unwrap(),
            "k=v".to_string()
        );
        assert_eq!(
            encode_query_value("k", &json!(["a", "b"])).unwrap(),
            "k=a,b".to_string()
        );
        assert_eq!(
            encode_query_value("k", &json!({"a": "1"})).unwrap(),
            "k=a,1".to_string()
        );
        assert_eq!(encode_query_value("k", &Value::Null), None);
    }

    #[test]
    fn test_build_operations_end_to_end() {
        let doc = json!({
            "openapi": "3.0.0",
            "info": { "title": "foo", "version": "3.0.0" },
            "components": {
                "schemas": { "Foo": { "type": "object" } },
                "responses": {
                    "Ok": { "content": { "application/json": { "schema": { "type": "object" } } } }
                },
                "parameters": {
                    "PrimaryKey": {
                        "name": "primary_key",
                        "in": "path",
                        "required": true,
                        "schema": { "type": "string" }
                    }
                }
            },
            "paths": {
                "/foo/{primary_key}": {
                    "put": {
                        "operationId": "update_foo",
                        "parameters": [ { "$ref": "#/components/parameters/PrimaryKey" } ],
                        "requestBody": {
                            "required": true,
                            "content": { "application/json": {
                                "schema": { "$ref": "#/components/schemas/Foo" }
                            } }
                        },
                        "responses": {
                            "Ok": { "content": { "application/json": {
                                "schema": { "type": "object" }
                            } } }
                        }
                    }
                }
            }
        });
        let file = SpecFile {
            lone: "foo".to_string(),
            version: "v3.0.0".to_string(),
            major_version: "v3".to_string(),
            file_name: "vnd.acme_infra.foo.v3.0.0".to_string(),
            path: std::path::PathBuf::from("/dev/null"),
        };
        let resolver = Resolver::new(std::env::temp_dir(), doc.clone());
        let media = get_mime_types(&doc);
        let ops = build_operations(&doc, &resolver, &file, &media).unwrap();
        assert_eq!(ops.len(), 1);
        let op = &ops[0];
        assert_eq!(op.operation_id, "update_foo");
        assert_eq!(op.method, Method::PUT);
        assert!(op.request_body_required);
        assert_eq!(op.path_params.len(), 1);
        assert_eq!(op.param_kind("primary_key"), Some(ParamKind::String));
        let validators = compile_operation(op).unwrap();
        assert!(schema_error(
            &validators.input,
            &json!({"path": {"primary_key": "x"}, "body": {}})
        )
        .is_none());
        assert!(schema_error(&validators.input, &json!({"path": {}})).is_some());
    }
}
