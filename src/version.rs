//! Version information.

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent sent by the CLI: `huginn/{version}`.
pub fn user_agent() -> String {
    format!("huginn/{PKG_VERSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_contains_pkg_version() {
        let agent = user_agent();
        assert!(
            agent.ends_with(PKG_VERSION),
            "user agent should end with pkg version"
        );
    }
}
