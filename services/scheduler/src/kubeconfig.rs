//! Rewrites the bootstrap client configuration for external consumers.

use crate::framework::ServerEndpoint;

/// Address the server writes into its own client configuration.
pub const LOOPBACK_API: &str = "127.0.0.1:6443";

/// Point `raw` at the server's external endpoint instead of loopback.
pub fn rewrite_kubeconfig(raw: &str, endpoint: &ServerEndpoint) -> String {
    raw.replace(
        LOOPBACK_API,
        &format!("{}:{}", endpoint.hostname, endpoint.api_port),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_every_occurrence() {
        let raw = "clusters:\n- cluster:\n    server: https://127.0.0.1:6443\n  name: default\n# 127.0.0.1:6443\n";
        let endpoint = ServerEndpoint {
            hostname: "k3s.example".to_string(),
            api_port: 31443,
            bootstrap_port: 31080,
        };
        let out = rewrite_kubeconfig(raw, &endpoint);
        assert!(!out.contains("127.0.0.1"));
        assert_eq!(out.matches("k3s.example:31443").count(), 2);
    }

    #[test]
    fn test_other_addresses_untouched() {
        let endpoint = ServerEndpoint {
            hostname: "h".to_string(),
            api_port: 1,
            bootstrap_port: 2,
        };
        assert_eq!(
            rewrite_kubeconfig("server: https://10.0.0.1:6443", &endpoint),
            "server: https://10.0.0.1:6443"
        );
    }
}
