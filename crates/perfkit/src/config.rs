//! Client configuration (ambient: the spec leaves these as transport
//! policy, §6).

use std::path::PathBuf;

/// Bus service name, object path root, and subscription socket directory
/// used to reach an agent.
///
/// These are plain fields with a `Default` matching the reference
/// deployment chosen in DESIGN.md, not a file-based config layer — the
/// spec has no durable configuration surface to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Well-known bus service name the agent is reached at.
    pub service_name: String,
    /// Object path root prefixed to every handle's path (§6).
    pub object_root: String,
    /// Directory the subscription endpoint's socket is created under.
    pub socket_dir: PathBuf,
}

impl ClientConfig {
    pub fn new(service_name: impl Into<String>, object_root: impl Into<String>) -> Self {
        ClientConfig {
            service_name: service_name.into(),
            object_root: object_root.into(),
            socket_dir: std::env::temp_dir(),
        }
    }

    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    /// Path to the local subscription socket for a given process id.
    pub fn subscription_socket_path(&self, pid: u32) -> PathBuf {
        self.socket_dir.join(format!("perfkit-{pid}.socket"))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::new("org.perfkit.Agent", "/org/perfkit/Agent")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_deployment() {
        let config = ClientConfig::default();
        assert_eq!(config.service_name, "org.perfkit.Agent");
        assert_eq!(config.object_root, "/org/perfkit/Agent");
    }

    #[test]
    fn subscription_socket_path_embeds_pid() {
        let config = ClientConfig::default().with_socket_dir("/tmp");
        assert_eq!(
            config.subscription_socket_path(42),
            PathBuf::from("/tmp/perfkit-42.socket")
        );
    }
}
