//! Failure classification from `ssh` output
//!
//! `ssh` has no structured error output, so this is a best-effort heuristic
//! over its human-readable messages. It drives the diagnostic shown to the
//! operator, never the retry policy: every category is retried with the same
//! backoff. If `ssh` changes its wording, a genuine auth or port failure falls
//! back to [`Category::GenericError`].

use std::fmt;

/// Exit code `ssh` uses for connection and authentication failures
pub const AUTH_FAILURE_EXIT_CODE: i32 = 255;

/// Failure category of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    None,
    GenericError,
    PortError,
    AuthError,
}

impl Category {
    /// Auth and port failures abort the grace probe
    pub fn is_terminal(&self) -> bool {
        matches!(self, Category::AuthError | Category::PortError)
    }

    /// Operator guidance for this category
    pub fn remediation(&self) -> &'static str {
        match self {
            Category::None => "",
            Category::AuthError => {
                "check that the key file exists, is readable only by you (chmod 600), \
                 and that its public key is in the remote authorized_keys"
            }
            Category::PortError => {
                "the port is already in use; free it or change local_port/remote_port"
            }
            Category::GenericError => {
                "check network connectivity, the host name and the known_hosts entry"
            }
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Category::None => "none",
            Category::GenericError => "generic_error",
            Category::PortError => "port_error",
            Category::AuthError => "auth_error",
        };
        f.write_str(label)
    }
}

/// Result of classifying an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    /// Marker that decided the category, if the decision came from the text
    pub marker: Option<&'static str>,
}

impl Classification {
    pub const HEALTHY: Classification = Classification {
        category: Category::None,
        marker: None,
    };
}

const AUTH_MARKERS: &[&str] = &[
    "permission denied",
    "authentication failed",
    "too many authentication failures",
    "no supported authentication methods",
    "unprotected private key file",
    "bad permissions",
    "no such identity",
    "load key",
];

const PORT_MARKERS: &[&str] = &[
    "address already in use",
    "remote port forwarding failed",
    "cannot listen to port",
    "could not request local forwarding",
    "cannot assign requested address",
];

const GENERIC_MARKERS: &[&str] = &[
    "connection refused",
    "could not resolve hostname",
    "name or service not known",
    "host key verification failed",
    "connection timed out",
    "operation timed out",
    "no route to host",
    "network is unreachable",
    "connection closed by",
    "broken pipe",
];

fn longest_match(haystack: &str, markers: &[&'static str]) -> Option<&'static str> {
    markers
        .iter()
        .copied()
        .filter(|marker| haystack.contains(marker))
        .max_by_key(|marker| marker.len())
}

/// Classify accumulated output and, when the process has exited, its exit code.
///
/// The most specific category wins when several markers match
/// (auth > port > generic); text markers take precedence over the exit code.
pub fn classify(output: &str, exit_code: Option<i32>) -> Classification {
    let text = output.to_lowercase();

    let by_text = [
        (Category::AuthError, AUTH_MARKERS),
        (Category::PortError, PORT_MARKERS),
        (Category::GenericError, GENERIC_MARKERS),
    ]
    .into_iter()
    .find_map(|(category, markers)| {
        longest_match(&text, markers).map(|marker| Classification {
            category,
            marker: Some(marker),
        })
    });

    if let Some(found) = by_text {
        return found;
    }

    let category = match exit_code {
        None | Some(0) => Category::None,
        Some(AUTH_FAILURE_EXIT_CODE) => Category::AuthError,
        Some(_) => Category::GenericError,
    };

    Classification {
        category,
        marker: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_is_auth() {
        let result = classify("deploy@bastion: Permission denied (publickey).", None);
        assert_eq!(result.category, Category::AuthError);
        assert_eq!(result.marker, Some("permission denied"));
    }

    #[test]
    fn test_address_in_use_is_port() {
        let result = classify(
            "bind [127.0.0.1]:5432: Address already in use\nbind: Address already in use",
            None,
        );
        assert_eq!(result.category, Category::PortError);
    }

    #[test]
    fn test_remote_forwarding_failed_is_port() {
        let result = classify(
            "Error: remote port forwarding failed for listen port 8080",
            Some(255),
        );
        assert_eq!(result.category, Category::PortError);
    }

    #[test]
    fn test_connection_refused_is_generic() {
        let result = classify(
            "ssh: connect to host bastion port 22: Connection refused",
            None,
        );
        assert_eq!(result.category, Category::GenericError);
        assert_eq!(result.marker, Some("connection refused"));
    }

    #[test]
    fn test_auth_beats_generic_markers() {
        let output = "Permission denied (publickey).\nConnection closed by 10.0.0.1 port 22";
        assert_eq!(classify(output, Some(255)).category, Category::AuthError);
    }

    #[test]
    fn test_unprotected_key_warning_is_auth() {
        let output = "WARNING: UNPROTECTED PRIVATE KEY FILE!\nPermissions 0644 for 'id_rsa' are too open.";
        assert_eq!(classify(output, None).category, Category::AuthError);
    }

    #[test]
    fn test_exit_code_fallbacks() {
        assert_eq!(classify("", Some(0)), Classification::HEALTHY);
        assert_eq!(classify("", None), Classification::HEALTHY);
        assert_eq!(classify("", Some(255)).category, Category::AuthError);
        assert_eq!(classify("", Some(1)).category, Category::GenericError);
        assert_eq!(classify("", Some(-1)).category, Category::GenericError);
    }

    #[test]
    fn test_unknown_wording_degrades_to_generic() {
        let result = classify("kex_exchange_identification: read: reset", Some(1));
        assert_eq!(result.category, Category::GenericError);
        assert_eq!(result.marker, None);
    }

    #[test]
    fn test_benign_output_is_healthy() {
        let output = "Warning: Permanently added 'bastion' (ED25519) to the list of known hosts.";
        assert_eq!(classify(output, None).category, Category::None);
    }

    #[test]
    fn test_terminal_categories() {
        assert!(Category::AuthError.is_terminal());
        assert!(Category::PortError.is_terminal());
        assert!(!Category::GenericError.is_terminal());
        assert!(!Category::None.is_terminal());
    }
}
