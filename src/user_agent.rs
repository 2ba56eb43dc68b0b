//! Shared User-Agent string for all hub traffic.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/hubfetch/hubfetch";

/// Default User-Agent for hub requests (identifies the tool and version).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("hubfetch/{version} (+{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_version_and_url() {
        let ua = default_user_agent();
        assert!(ua.contains(PROJECT_UA_URL), "UA must contain project URL: {ua}");
        assert_eq!(
            env!("CARGO_PKG_VERSION"),
            ua.strip_prefix("hubfetch/")
                .and_then(|s| s.split(' ').next())
                .expect("UA has version"),
        );
    }
}
