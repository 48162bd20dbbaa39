//! Conversion of raw tool results into content parts.
//!
//! Tool results come from untrusted servers and can be any JSON value. [sanitize_tool_result]
//! is total: every input maps to at least one part and nothing here returns an error.

use serde_json::{
    Map,
    Value,
};

use crate::agent::llm::types::ContentPart;

/// Strings longer than this many characters are checked against the base64 heuristic.
pub const DEFAULT_BASE64_THRESHOLD: usize = 512;

/// Filename given to base64 blobs with no other identifying information.
pub const BINARY_FILENAME: &str = "binary_data";

const OCTET_STREAM: &str = "application/octet-stream";

/// Minimum share of base64 alphabet characters for a string to be treated as binary.
const BASE64_ALPHABET_RATIO: f64 = 0.9;

/// Sanitizes a tool result into content parts, preserving the order of nested values.
pub fn sanitize_tool_result(result: &Value, base64_threshold: usize) -> Vec<ContentPart> {
    let parts = sanitize_value(result, base64_threshold);
    if parts.is_empty() {
        return vec![ContentPart::text(to_json_string(result))];
    }
    parts
}

fn sanitize_value(value: &Value, threshold: usize) -> Vec<ContentPart> {
    match value {
        Value::String(s) => vec![sanitize_string(s, threshold)],
        Value::Array(values) => values.iter().flat_map(|v| sanitize_value(v, threshold)).collect(),
        Value::Object(map) => match sanitize_object(map, threshold) {
            Some(parts) => parts,
            None => vec![ContentPart::text(to_json_string(value))],
        },
        Value::Null | Value::Bool(_) | Value::Number(_) => vec![ContentPart::text(to_json_string(value))],
    }
}

fn sanitize_string(s: &str, threshold: usize) -> ContentPart {
    if let Some((mime_type, payload)) = parse_data_uri(s) {
        return binary_part(payload, mime_type, None);
    }
    if looks_like_base64(s, threshold) {
        return ContentPart::file(s.trim(), OCTET_STREAM, Some(BINARY_FILENAME.to_string()));
    }
    ContentPart::text(s)
}

/// Maps recognizable object shapes to parts. Returns [None] for anything else.
fn sanitize_object(map: &Map<String, Value>, threshold: usize) -> Option<Vec<ContentPart>> {
    let str_field = |key: &str| map.get(key).and_then(Value::as_str);
    let mime_type = str_field("mimeType").or_else(|| str_field("mime_type"));

    match str_field("type") {
        Some("text") => {
            if let Some(text) = str_field("text") {
                return Some(vec![sanitize_string(text, threshold)]);
            }
        },
        Some("image") => {
            let data = str_field("image").or_else(|| str_field("data"))?;
            return Some(vec![image_part(data, mime_type)]);
        },
        Some("file" | "audio") => {
            let data = str_field("data")?;
            let filename = str_field("filename").or_else(|| str_field("name")).map(str::to_string);
            return Some(vec![data_part(data, mime_type, filename)]);
        },
        Some("resource") => {
            let resource = map.get("resource").and_then(Value::as_object)?;
            return Some(vec![resource_part(resource)]);
        },
        _ => (),
    }

    // MCP tools/call result
    if let Some(Value::Array(content)) = map.get("content") {
        if !content.is_empty() {
            return Some(sanitize_value(&Value::Array(content.clone()), threshold));
        }
        if let Some(structured) = map.get("structuredContent") {
            return Some(vec![ContentPart::text(to_json_string(structured))]);
        }
    }

    if let Some(image) = str_field("image") {
        return Some(vec![image_part(image, mime_type)]);
    }
    if let (Some(data), Some(_)) = (str_field("data"), mime_type) {
        let filename = str_field("filename").map(str::to_string);
        return Some(vec![data_part(data, mime_type, filename)]);
    }
    None
}

fn resource_part(resource: &Map<String, Value>) -> ContentPart {
    let str_field = |key: &str| resource.get(key).and_then(Value::as_str);
    if let Some(text) = str_field("text") {
        return ContentPart::text(text);
    }
    match str_field("blob") {
        Some(blob) => {
            let filename = str_field("uri")
                .and_then(|uri| uri.rsplit('/').next())
                .filter(|name| !name.is_empty())
                .map(str::to_string);
            binary_part(blob, str_field("mimeType").unwrap_or(OCTET_STREAM), filename)
        },
        None => ContentPart::text(to_json_string(&Value::Object(resource.clone()))),
    }
}

fn image_part(data: &str, mime_type: Option<&str>) -> ContentPart {
    match parse_data_uri(data) {
        Some((uri_mime, payload)) => ContentPart::image(payload, mime_type.unwrap_or(uri_mime)),
        None => ContentPart::image(data, mime_type.unwrap_or("image/png")),
    }
}

fn data_part(data: &str, mime_type: Option<&str>, filename: Option<String>) -> ContentPart {
    match parse_data_uri(data) {
        Some((uri_mime, payload)) => binary_part(payload, mime_type.unwrap_or(uri_mime), filename),
        None => binary_part(data, mime_type.unwrap_or(OCTET_STREAM), filename),
    }
}

fn binary_part(payload: &str, mime_type: &str, filename: Option<String>) -> ContentPart {
    if mime_type.to_ascii_lowercase().starts_with("image/") {
        ContentPart::image(payload, mime_type)
    } else {
        let filename = filename.unwrap_or_else(|| format!("file.{}", extension_for(mime_type)));
        ContentPart::file(payload, mime_type, Some(filename))
    }
}

/// Splits `data:<mime>;base64,<payload>` into its mime type and payload.
///
/// An empty mime type is reported as `application/octet-stream`.
pub fn parse_data_uri(s: &str) -> Option<(&str, &str)> {
    let rest = s.trim().strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    let mime_type = mime_type.split(';').next().unwrap_or_default();
    Some((if mime_type.is_empty() { OCTET_STREAM } else { mime_type }, payload))
}

/// Heuristic for raw base64 payloads: long, almost entirely base64 alphabet, a multiple of four
/// characters, and at most two padding characters.
pub fn looks_like_base64(s: &str, threshold: usize) -> bool {
    let s = s.trim();
    if s.len() <= threshold || s.len() % 4 != 0 {
        return false;
    }
    let padding = s.bytes().filter(|b| *b == b'=').count();
    if padding > 2 {
        return false;
    }
    let alphabet = s
        .bytes()
        .filter(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
        .count();
    alphabet as f64 / s.len() as f64 >= BASE64_ALPHABET_RATIO
}

fn extension_for(mime_type: &str) -> String {
    let mime_type = mime_type.to_ascii_lowercase();
    let ext = match mime_type.as_str() {
        "application/pdf" => "pdf",
        "application/json" => "json",
        "application/zip" => "zip",
        "text/plain" => "txt",
        "text/markdown" => "md",
        "text/csv" => "csv",
        "text/html" => "html",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        OCTET_STREAM => "bin",
        other => {
            let subtype = other.rsplit('/').next().unwrap_or_default();
            let subtype: String = subtype
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
            return if subtype.is_empty() { "bin".to_string() } else { subtype };
        },
    };
    ext.to_string()
}

fn to_json_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| format!("{other}")),
    }
}
