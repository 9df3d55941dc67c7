//! Narrow JSON field extraction over raw text.
//!
//! Registration payloads and the persisted registration file are scanned
//! directly for named fields instead of going through a full parser. The
//! supported shapes are deliberately limited to what those documents use:
//! string/number leaves, one level of object nesting, and flat arrays of
//! strings. Malformed or truncated input degrades to "field absent" (empty
//! string, caller default, or empty vec) — it never produces an error.

/// Extract the value of `key` as a string.
///
/// Finds the first occurrence of the quoted key and parses the value after
/// its colon. Quoted values are returned between the quotes without
/// unescaping (an escape is a `\` plus one character, consumed as a pair).
/// Unquoted values (bare numbers, booleans) are returned as the trimmed
/// token up to the next `,`, `}` or newline.
pub fn string_field(json: &str, key: &str) -> String {
    let bytes = json.as_bytes();
    let Some(mut pos) = find_key(json, key) else {
        return String::new();
    };
    pos = match json[pos..].find(':') {
        Some(i) => pos + i,
        None => return String::new(),
    };

    while pos < bytes.len() && matches!(bytes[pos], b' ' | b':' | b'\t') {
        pos += 1;
    }
    if pos >= bytes.len() {
        return String::new();
    }

    if bytes[pos] != b'"' {
        // Bare token: number or boolean
        let mut end = pos;
        while end < bytes.len() && !matches!(bytes[end], b',' | b'}' | b'\n') {
            end += 1;
        }
        return json[pos..end].trim_matches([' ', '\t']).to_string();
    }

    pos += 1; // skip opening quote
    let mut end = pos;
    while end < bytes.len() && bytes[end] != b'"' && bytes[end] != b'\n' {
        if bytes[end] == b'\\' && end + 1 < bytes.len() {
            end += 2;
        } else {
            end += 1;
        }
    }
    if end >= bytes.len() || bytes[end] != b'"' {
        return String::new();
    }

    String::from_utf8_lossy(&bytes[pos..end]).into_owned()
}

/// Extract the value of `key` as an integer, or `default` when the field is
/// absent or not numeric.
pub fn int_field(json: &str, key: &str, default: i64) -> i64 {
    let value = string_field(json, key);
    if value.is_empty() {
        return default;
    }
    value.parse().unwrap_or(default)
}

/// Extract the nested object value of `key`, braces included.
///
/// Returns the substring from the `{` following the key up to its
/// brace-matched closing `}`, or an empty string when unmatched.
pub fn object_field(json: &str, key: &str) -> String {
    let bytes = json.as_bytes();
    let Some(pos) = find_key(json, key) else {
        return String::new();
    };
    let start = match json[pos..].find('{') {
        Some(i) => pos + i,
        None => return String::new(),
    };

    let mut depth = 0usize;
    for i in start..bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return json[start..=i].to_string();
                }
            }
            _ => {}
        }
    }
    String::new()
}

/// Extract the value of `key` as an array of strings.
///
/// Scans between the `[` following the key and the next `]` (no nested
/// arrays) and collects quoted elements separated by commas/whitespace,
/// stopping at the first element that is not a quoted string.
pub fn string_array_field(json: &str, key: &str) -> Vec<String> {
    let mut result = Vec::new();
    let Some(pos) = find_key(json, key) else {
        return result;
    };
    let open = match json[pos..].find('[') {
        Some(i) => pos + i + 1,
        None => return result,
    };
    let close = match json[open..].find(']') {
        Some(i) => open + i,
        None => return result,
    };

    let bytes = json.as_bytes();
    let mut i = open;
    while i < close {
        while i < close && matches!(bytes[i], b' ' | b',' | b'\t' | b'\n') {
            i += 1;
        }
        if i >= close {
            break;
        }
        if bytes[i] != b'"' {
            break;
        }
        i += 1; // skip opening quote
        let elem_start = i;
        while i < close && bytes[i] != b'"' {
            if bytes[i] == b'\\' && i + 1 < close {
                i += 2;
            } else {
                i += 1;
            }
        }
        if i >= close {
            break;
        }
        result.push(String::from_utf8_lossy(&bytes[elem_start..i]).into_owned());
        i += 1; // skip closing quote
    }
    result
}

/// Escape a string for embedding in a JSON string literal.
pub fn escape_json(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Locate the first occurrence of `key` as a quoted JSON key.
fn find_key(json: &str, key: &str) -> Option<usize> {
    json.find(&format!("\"{}\"", key))
}
