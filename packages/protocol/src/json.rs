//! Opportunistic parsing of JSON-text fields.
//!
//! Some message fields carry JSON encoded as text, and some carry plain text. Parsing is only
//! attempted when the text starts the way a JSON value would, so plain strings cost nothing.

use serde_json::Value;


/// Whether the text starts like a JSON value.
pub fn looks_like_json(text: &str) -> bool {
    let text = text.trim_start();
    match text.chars().next() {
        Some('{' | '[' | '"' | '-' | '0'..='9') => true,
        Some('t') => text.starts_with("true"),
        Some('f') => text.starts_with("false"),
        Some('n') => text.starts_with("null"),
        _ => false,
    }
}

/// Parse the text as JSON if it looks like JSON and parses. Otherwise, keep it as a string.
pub fn parse_opportunistic(text: String) -> Value {
    if looks_like_json(&text) {
        match serde_json::from_str(&text) {
            Ok(value) => return value,
            Err(e) => trace!(%e, "json-looking text field failed to parse, keeping as string"),
        }
    }
    Value::String(text)
}


#[test]
fn test_parse_opportunistic() {
    use serde_json::json;

    assert_eq!(parse_opportunistic(r#"{"chunkSize": 16}"#.into()), json!({ "chunkSize": 16 }));
    assert_eq!(parse_opportunistic("[1, 2]".into()), json!([1, 2]));
    assert_eq!(parse_opportunistic("-4.5".into()), json!(-4.5));
    assert_eq!(parse_opportunistic("true".into()), json!(true));
    assert_eq!(parse_opportunistic("null".into()), Value::Null);
    assert_eq!(parse_opportunistic("hello".into()), json!("hello"));
    assert_eq!(parse_opportunistic("truely not json".into()), json!("truely not json"));
    assert_eq!(parse_opportunistic("{broken".into()), json!("{broken"));
    assert_eq!(parse_opportunistic(String::new()), json!(""));
}
