//! Extraction of JSON or SQL payloads from oracle completions, which may or
//! may not arrive wrapped in markdown code fences.

use serde::de::DeserializeOwned;

/// Strips an optional leading ```` ```lang ```` line and trailing ```` ``` ````
/// from a completion, returning the inner payload. Content without fences is
/// returned trimmed and unchanged.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }

    // Drop the opening fence line (``` or ```json / ```sql etc.)
    let body = match trimmed.find('\n') {
        Some(pos) => &trimmed[pos + 1..],
        None => return trimmed,
    };

    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Parses a completion as `T`, tolerating fence wrapping. Leading prose before
/// a JSON object or array is skipped as a last resort.
pub fn extract_json<T: DeserializeOwned>(raw: &str) -> Result<T, serde_json::Error> {
    let payload = strip_code_fence(raw);
    match serde_json::from_str(payload) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            // Some completions prefix the JSON with commentary. Retry from the
            // first opening bracket through the matching last one.
            let start = payload.find(['{', '[']);
            let end = payload.rfind(['}', ']']);
            if let (Some(start), Some(end)) = (start, end) {
                if start < end {
                    return serde_json::from_str(&payload[start..=end]);
                }
            }
            Err(first_err)
        }
    }
}

/// Pulls a SQL statement out of a repair completion. Fenced content wins;
/// otherwise the first line starting with a SQL keyword (and everything up to
/// its terminating semicolon) is used; otherwise the whole completion.
pub fn extract_sql(raw: &str) -> String {
    let unfenced = strip_code_fence(raw);
    if raw.trim().starts_with("```") {
        return unfenced.to_string();
    }

    let keywords = ["SELECT", "WITH"];
    let lines: Vec<&str> = unfenced.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let upper = line.trim().to_uppercase();
        if keywords.iter().any(|kw| upper.starts_with(kw)) {
            let mut sql = line.trim().to_string();
            if !sql.ends_with(';') {
                for next in &lines[i + 1..] {
                    let next = next.trim();
                    if next.starts_with("```") {
                        break;
                    }
                    sql.push(' ');
                    sql.push_str(next);
                    if next.ends_with(';') {
                        break;
                    }
                }
            }
            return sql;
        }
    }

    unfenced.to_string()
}
