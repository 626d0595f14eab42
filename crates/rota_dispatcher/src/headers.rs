/// Hop-by-hop headers stripped before forwarding a request to an upstream
/// proxy, and before returning its response to the client.
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// The `Via` token Rota adds to every forwarded request, identifying itself
/// to the upstream without revealing the originating client's identity.
pub const VIA_TOKEN: &str = "1.1 rota";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_hop_by_hop_headers_case_insensitively() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("PROXY-AUTHORIZATION"));
        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("host"));
    }
}
