use std::collections::HashSet;

use agtrace_types::is_file_modifying_tool;
use serde_json::Value;

/// One recovered tool invocation, before it is attached to a session/message
/// (spec.md §4.C). Only file-modifying tools ever reach this shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedToolCall {
    pub tool_name: String,
    pub file_path: Option<String>,
    pub payload: String,
}

/// Recover every file-modifying tool call from one assistant message's
/// content blocks, deduplicating across the two recovery strategies.
///
/// `content` is the raw JSON value of `message.content`: either a list of
/// blocks (the common case) or a bare string (treated as a single text
/// block, so only the free-text scan applies).
pub fn extract_tool_calls(content: &Value) -> Vec<ExtractedToolCall> {
    let mut seen: HashSet<(String, Option<String>)> = HashSet::new();
    let mut calls = Vec::new();

    let mut push = |call: ExtractedToolCall| {
        let key = (call.tool_name.clone(), call.file_path.clone());
        if seen.insert(key) {
            calls.push(call);
        }
    };

    match content {
        Value::Array(blocks) => {
            for block in blocks {
                if let Some(call) = from_structured_block(block) {
                    push(call);
                }
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    for call in from_invoke_markers(text) {
                        push(call);
                    }
                }
                if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                    for call in from_invoke_markers(text) {
                        push(call);
                    }
                }
            }
        }
        Value::String(text) => {
            for call in from_invoke_markers(text) {
                push(call);
            }
        }
        _ => {}
    }

    calls
}

/// Shape (a): `{type: "tool_use", name: T, input: {file_path?, ...}}`,
/// possibly nested one level under a `tool_result` wrapper's `content` field.
fn from_structured_block(block: &Value) -> Option<ExtractedToolCall> {
    let block_type = block.get("type").and_then(Value::as_str)?;

    let tool_use = if block_type == "tool_use" {
        block
    } else if block_type == "tool_result" {
        block.get("content").and_then(|c| {
            if c.get("type").and_then(Value::as_str) == Some("tool_use") {
                Some(c)
            } else {
                None
            }
        })?
    } else {
        return None;
    };

    let name = tool_use.get("name").and_then(Value::as_str)?;
    if !is_file_modifying_tool(name) {
        return None;
    }

    let input = tool_use.get("input").cloned().unwrap_or(Value::Null);
    let file_path = input
        .get("file_path")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(ExtractedToolCall {
        tool_name: name.to_ascii_lowercase(),
        file_path,
        payload: input.to_string(),
    })
}

/// Shape (b): `<invoke name="T">...<parameter name="K">V</parameter>...</invoke>`
/// markers recovered by textual scan rather than a general XML parse, per
/// spec.md §4.C.
fn from_invoke_markers(text: &str) -> Vec<ExtractedToolCall> {
    let mut calls = Vec::new();
    let mut cursor = 0;

    while let Some(start) = text[cursor..].find("<invoke") {
        let invoke_start = cursor + start;
        let Some(tag_end_rel) = text[invoke_start..].find('>') else {
            break;
        };
        let tag_end = invoke_start + tag_end_rel;

        let Some(close_rel) = text[tag_end..].find("</invoke>") else {
            break;
        };
        let body_start = tag_end + 1;
        let body_end = tag_end + close_rel;
        let invoke_end = body_end + "</invoke>".len();

        let open_tag = &text[invoke_start..=tag_end];
        if let Some(name) = extract_attr(open_tag, "name") {
            if is_file_modifying_tool(&name) {
                let body = &text[body_start..body_end];
                let params = extract_parameters(body);
                let file_path = params
                    .iter()
                    .find(|(k, _)| k == "file_path")
                    .map(|(_, v)| v.clone());
                let payload = serde_json::to_string(&params.into_iter().collect::<serde_json::Map<_, _>>())
                    .unwrap_or_default();

                calls.push(ExtractedToolCall {
                    tool_name: name.to_ascii_lowercase(),
                    file_path,
                    payload,
                });
            }
        }

        cursor = invoke_end;
    }

    calls
}

fn extract_attr(tag: &str, attr: &str) -> Option<String> {
    let needle = format!("{}=\"", attr);
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_string())
}

fn extract_parameters(body: &str) -> Vec<(String, Value)> {
    let mut params = Vec::new();
    let mut cursor = 0;

    while let Some(start) = body[cursor..].find("<parameter") {
        let param_start = cursor + start;
        let Some(tag_end_rel) = body[param_start..].find('>') else {
            break;
        };
        let tag_end = param_start + tag_end_rel;

        let Some(close_rel) = body[tag_end..].find("</parameter>") else {
            break;
        };
        let value_start = tag_end + 1;
        let value_end = tag_end + close_rel;
        let param_end = value_end + "</parameter>".len();

        let open_tag = &body[param_start..=tag_end];
        if let Some(name) = extract_attr(open_tag, "name") {
            let value = body[value_start..value_end].trim().to_string();
            params.push((name, Value::String(value)));
        }

        cursor = param_end;
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_tool_use_for_edit_is_extracted() {
        let content = serde_json::json!([
            {"type": "text", "text": "editing now"},
            {"type": "tool_use", "name": "Edit", "input": {"file_path": "/a.rs", "old_string": "x"}}
        ]);
        let calls = extract_tool_calls(&content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "edit");
        assert_eq!(calls[0].file_path.as_deref(), Some("/a.rs"));
    }

    #[test]
    fn non_file_modifying_tool_is_discarded() {
        let content = serde_json::json!([
            {"type": "tool_use", "name": "Bash", "input": {"command": "ls"}}
        ]);
        assert!(extract_tool_calls(&content).is_empty());
    }

    #[test]
    fn free_text_invoke_markers_are_recovered() {
        let content = serde_json::json!([
            {"type": "text", "text": "<invoke name=\"Write\"><parameter name=\"file_path\">/b.rs</parameter><parameter name=\"content\">hi</parameter></invoke>"}
        ]);
        let calls = extract_tool_calls(&content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "write");
        assert_eq!(calls[0].file_path.as_deref(), Some("/b.rs"));
    }

    #[test]
    fn duplicate_emissions_for_same_tool_and_file_are_suppressed() {
        let content = serde_json::json!([
            {"type": "tool_use", "name": "Edit", "input": {"file_path": "/a.rs"}},
            {"type": "text", "text": "<invoke name=\"Edit\"><parameter name=\"file_path\">/a.rs</parameter></invoke>"}
        ]);
        assert_eq!(extract_tool_calls(&content).len(), 1);
    }
}
