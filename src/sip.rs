/// Extract the value of a SIP header from raw message text.
///
/// Matching is case-insensitive on the header name; the first occurrence
/// wins. Only full-form names are matched here; compact forms are handled
/// by the dedicated helpers below.
pub fn header_value(payload: &str, name: &str) -> Option<String> {
    let prefix = format!("{}:", name.to_lowercase());
    for line in payload.lines() {
        if line.to_lowercase().starts_with(&prefix) {
            return Some(line[prefix.len()..].trim().to_string());
        }
    }
    None
}

/// Call-ID of the message, accepting the compact `i` form.
pub fn call_id(payload: &str) -> Option<String> {
    header_value(payload, "Call-ID").or_else(|| header_value(payload, "i"))
}

/// Pull `user@host` out of a From/To header value such as
/// `"Alice" <sip:alice@10.0.0.1:5060>;tag=x`.
pub fn uri_address(header: &str) -> Option<String> {
    let start = header.find("sip:").or_else(|| header.find("sips:"))?;
    let rest = &header[start..];
    let rest = rest.split_once(':').map(|(_, r)| r).unwrap_or(rest);
    let end = rest
        .find(|c: char| c == '>' || c == ';' || c.is_whitespace())
        .unwrap_or(rest.len());
    let mut addr = &rest[..end];
    if let Some(at) = addr.find('@') {
        // drop a trailing port from the host part
        if let Some(colon) = addr[at..].find(':') {
            addr = &addr[..at + colon];
        }
    }
    if addr.is_empty() {
        None
    } else {
        Some(addr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id() {
        let msg = "INVITE sip:test@example.com SIP/2.0\r\nCall-ID: leg-test-123\r\n";
        assert_eq!(call_id(msg), Some("leg-test-123".to_string()));

        let msg2 = "INVITE sip:test@example.com SIP/2.0\r\ni: compact-form-id\r\n";
        assert_eq!(call_id(msg2), Some("compact-form-id".to_string()));

        assert_eq!(call_id("OPTIONS sip:x SIP/2.0\r\n"), None);
    }

    #[test]
    fn test_header_value() {
        let msg = "INVITE sip:b@h SIP/2.0\r\nX-Call-ID: other-leg\r\nFrom: <sip:a@h>;tag=1\r\n";
        assert_eq!(header_value(msg, "X-Call-ID"), Some("other-leg".to_string()));
        assert_eq!(header_value(msg, "x-call-id"), Some("other-leg".to_string()));
        assert_eq!(header_value(msg, "To"), None);
    }

    #[test]
    fn test_uri_address() {
        assert_eq!(
            uri_address("\"Alice\" <sip:alice@10.0.0.1:5060>;tag=x"),
            Some("alice@10.0.0.1".to_string())
        );
        assert_eq!(uri_address("sip:bob@example.com"), Some("bob@example.com".to_string()));
        assert_eq!(uri_address("tel:+123456"), None);
    }
}
