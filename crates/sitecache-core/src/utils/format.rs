/// Number of leading characters of a secret that may appear in logs
const REDACTED_PREFIX_LEN: usize = 8;

/// Render a secret (session handle, bearer token, cache key) for logs.
/// Only a short prefix is kept so log lines can still be correlated.
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(REDACTED_PREFIX_LEN).collect();
    format!("{}...", prefix)
}

/// Truncate a response body so error messages stay readable,
/// noting how large the original body was.
pub fn truncate_body(body: &str, max_len: usize) -> String {
    if body.len() <= max_len {
        return body.to_string();
    }
    let mut end = max_len;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_keeps_prefix_only() {
        assert_eq!(
            redact("3f2a9c1e-0000-4000-8000-123456789abc"),
            "3f2a9c1e..."
        );
        assert_eq!(redact("abc"), "abc...");
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let body = "é".repeat(10); // 20 bytes
        let truncated = truncate_body(&body, 5);
        assert!(truncated.starts_with("éé..."));
        assert!(truncated.ends_with("(truncated, 20 total bytes)"));
        assert_eq!(truncate_body("short", 500), "short");
    }
}
