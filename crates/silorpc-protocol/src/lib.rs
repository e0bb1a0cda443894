//! Wire-level types shared by RPC callers and callees.
//!
//! Everything a remote silo sees on the wire is defined here: the request and
//! response envelopes, the path scheme, and the signature header tokens. The
//! dispatch machinery lives in `silorpc-core`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// HTTP `Authorization` scheme carried on every RPC request.
pub const SIGNATURE_SCHEME: &str = "Rpcsignature";

/// Version token prefixed to every signature tag. Unknown versions are
/// rejected by verifiers, never ignored.
pub const SIGNATURE_VERSION: &str = "rpc0";

/// Content type for RPC request and response bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

/// Route for a `(service key, method name)` pair. The same string is the
/// signing input prefix and the server-side route match key, so both sides
/// must derive it from this function.
pub fn rpc_path(service_key: &str, method_name: &str) -> String {
    format!("/rpc/{}/{}", service_key, method_name)
}

/// Outbound call body: `{"meta": {}, "args": {...}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RequestEnvelope {
    /// Reserved for future use.
    #[serde(default)]
    pub meta: serde_json::Map<String, Value>,
    #[serde(default)]
    pub args: serde_json::Map<String, Value>,
}

/// Response body: `{"meta": {}, "value": <result-or-null>}`.
///
/// `value` is always present on the wire; `None` serializes as JSON null and
/// is the only legal payload for void methods.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub meta: serde_json::Map<String, Value>,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Error payload returned by the inbound endpoint on 4xx/5xx.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorBody {
    pub status: u16,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
