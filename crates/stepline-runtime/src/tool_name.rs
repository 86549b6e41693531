//! Mapping between model-facing function names and tool payloads
//!
//! Tools are exposed to the model as `<identifier>____<apiName>[____<type>]`.

use std::collections::BTreeMap;

use serde_json::Value;
use stepline_core::{MessageToolCall, ToolCallPayload};

pub const TOOL_NAME_SEPARATOR: &str = "____";

const DEFAULT_TOOL_TYPE: &str = "default";

#[derive(Debug, Clone, Copy, Default)]
pub struct ToolNameResolver;

impl ToolNameResolver {
    /// Function name the model should use for `payload`
    pub fn encode(payload: &ToolCallPayload) -> String {
        let mut name = format!(
            "{}{TOOL_NAME_SEPARATOR}{}",
            payload.identifier, payload.api_name
        );
        if payload.kind != DEFAULT_TOOL_TYPE {
            name.push_str(TOOL_NAME_SEPARATOR);
            name.push_str(&payload.kind);
        }
        name
    }

    /// Resolve one raw call
    ///
    /// When the name carries no type segment, the manifest entry's `type` is
    /// used if present.
    pub fn resolve_one(
        call: &MessageToolCall,
        manifests: &BTreeMap<String, Value>,
    ) -> ToolCallPayload {
        let mut parts = call.function.name.split(TOOL_NAME_SEPARATOR);
        let identifier = parts.next().unwrap_or_default().to_string();
        let (identifier, api_name) = match parts.next() {
            Some(api) => (identifier, api.to_string()),
            None => (identifier.clone(), identifier),
        };

        let kind = parts
            .next()
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| {
                manifests
                    .get(&identifier)
                    .and_then(|m| m.get("type"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| DEFAULT_TOOL_TYPE.to_string());

        ToolCallPayload {
            kind,
            ..ToolCallPayload::new(&call.id, identifier, api_name, &call.function.arguments)
        }
    }

    pub fn resolve(
        calls: &[MessageToolCall],
        manifests: &BTreeMap<String, Value>,
    ) -> Vec<ToolCallPayload> {
        calls
            .iter()
            .map(|call| Self::resolve_one(call, manifests))
            .collect()
    }

    /// Raw call equivalent of a resolved payload
    pub fn to_call(payload: &ToolCallPayload) -> MessageToolCall {
        MessageToolCall::new(&payload.id, Self::encode(payload), &payload.arguments)
    }
}
