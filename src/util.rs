//! Small helpers shared by the HTTP backends.

/// Percent-encode every byte except the RFC 3986 unreserved set
/// (`A-Z a-z 0-9 - _ . ~`). Suitable for a single path segment or a query
/// component.
pub fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_characters_are_escaped() {
        assert_eq!(uri_encode("2023/05"), "2023%2F05");
        assert_eq!(uri_encode("a b+c"), "a%20b%2Bc");
        assert_eq!(uri_encode("ABC-123_x.~"), "ABC-123_x.~");
        assert_eq!(uri_encode("é"), "%C3%A9");
    }
}
