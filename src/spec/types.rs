use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// JSON-schema scalar/compound kinds the parameter tables understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    pub fn from_schema_type(ty: &str) -> Option<ParamKind> {
        match ty {
            "string" => Some(ParamKind::String),
            "integer" => Some(ParamKind::Integer),
            "number" => Some(ParamKind::Number),
            "boolean" => Some(ParamKind::Boolean),
            "array" => Some(ParamKind::Array),
            "object" => Some(ParamKind::Object),
            _ => None,
        }
    }
}

/// Concrete route segment type a path parameter is matched as.
///
/// The converter table is `{integer→int, number→float, string→string,
/// object→string}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Int,
    Float,
    Str,
}

impl From<ParamKind> for SegmentKind {
    fn from(kind: ParamKind) -> Self {
        match kind {
            ParamKind::Integer => SegmentKind::Int,
            ParamKind::Number => SegmentKind::Float,
            _ => SegmentKind::Str,
        }
    }
}

/// One resolved path or query parameter.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub name: String,
    pub required: bool,
    pub kind: ParamKind,
    pub schema: Value,
}

/// Everything the runtime needs for one `(path, method)` operation.
///
/// Built once at startup; read-only afterwards.
#[derive(Debug, Clone)]
pub struct OperationSpec {
    pub lone: String,
    /// Full version string as it appears in the file name, e.g. `v3.0.1`.
    pub version: String,
    /// Major version segment, e.g. `v3`.
    pub major_version: String,
    pub method: Method,
    /// OpenAPI path template, e.g. `/foo/{primary_key}`.
    pub path_pattern: String,
    pub operation_id: String,
    pub path_params: Vec<ParameterSpec>,
    pub query_params: Vec<ParameterSpec>,
    /// `(name → kind)` over both path and query parameters.
    pub param_types: HashMap<String, ParamKind>,
    pub request_body_schema: Option<Value>,
    pub request_body_required: bool,
    /// Input validator schema over `{path, query, body}`.
    pub input_schema: Value,
    /// Response validator schema keyed by status-code string.
    pub response_schema: Value,
    /// Media types this operation's responses advertise.
    pub media_types: Vec<String>,
}

impl OperationSpec {
    pub fn param_kind(&self, name: &str) -> Option<ParamKind> {
        self.param_types.get(name).copied()
    }
}

/// One lone's compiled OpenAPI document.
#[derive(Debug, Clone)]
pub struct LoneSpec {
    pub lone: String,
    pub version: String,
    pub major_version: String,
    pub file_name: String,
    pub file_path: PathBuf,
    pub media_types: Vec<String>,
    /// Component schema names; sub-path pieces matching one of these are
    /// treated as schema parts when building request paths.
    pub schema_names: Vec<String>,
    /// Shared component parameter names; the client serializes matching
    /// input keys onto collection-GET query strings.
    pub parameter_names: Vec<String>,
    pub operations: Vec<OperationSpec>,
}

impl LoneSpec {
    pub fn operation(&self, path_pattern: &str, method: &Method) -> Option<&OperationSpec> {
        self.operations
            .iter()
            .find(|op| op.path_pattern == path_pattern && &op.method == method)
    }

    /// Vendor media type for this document, e.g.
    /// `application/vnd.acme_infra.foo.v3.0.1+json`.
    pub fn vendor_mime(&self, family: &str, suffix: &str) -> String {
        let flat = family.replace('/', "_");
        format!(
            "application/vnd.{}.{}.{}+{}",
            flat, self.lone, self.version, suffix
        )
    }
}
