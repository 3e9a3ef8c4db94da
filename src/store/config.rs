use std::time::Duration;

/// Store endpoint and scope configuration
///
/// Built once at startup and shared read-only by every component.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Store host
    pub host: String,

    /// Store port
    pub port: u16,

    /// Namespace all keys live in
    pub namespace: String,

    /// Set (table-like grouping) within the namespace
    pub set: String,

    /// Username for authentication
    pub username: String,

    /// Password for authentication
    pub password: String,

    /// Use the alternate service addresses advertised by the cluster
    pub services_alternate: bool,

    // The three settings below tune a networked client's connection pool
    // and are not used by the in-process backend.

    /// Login / connect timeout
    pub connect_timeout: Duration,

    /// Size of the client's per-node connection queue
    pub connection_queue_size: usize,

    /// Connections opened eagerly per node
    pub min_connections_per_node: usize,
}

impl StoreConfig {
    /// Create a new store configuration
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            namespace: "bar".to_string(),
            set: "myset".to_string(),
            username: username.to_string(),
            password: password.to_string(),
            services_alternate: false,
            connect_timeout: Duration::from_secs(2),
            connection_queue_size: 3000,
            min_connections_per_node: 300,
        }
    }

    /// Set the host
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the namespace
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Set the set name
    pub fn set(mut self, set: &str) -> Self {
        self.set = set.to_string();
        self
    }

    pub fn services_alternate(mut self, enabled: bool) -> Self {
        self.services_alternate = enabled;
        self
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn connection_queue_size(mut self, size: usize) -> Self {
        self.connection_queue_size = size;
        self
    }

    pub fn min_connections_per_node(mut self, min: usize) -> Self {
        self.min_connections_per_node = min;
        self
    }

    /// Convert to a loggable endpoint string
    pub fn to_url(&self) -> String {
        format!(
            "kv://{}:{}@{}:{}/{}/{}",
            self.username,
            "***", // Don't expose password
            self.host,
            self.port,
            self.namespace,
            self.set
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("Host cannot be empty".to_string());
        }

        if self.port == 0 {
            return Err("Port must be > 0".to_string());
        }

        if self.namespace.is_empty() {
            return Err("Namespace cannot be empty".to_string());
        }

        if self.username.is_empty() {
            return Err("Username cannot be empty".to_string());
        }

        if self.password.is_empty() {
            return Err("Password cannot be empty".to_string());
        }

        if self.min_connections_per_node > self.connection_queue_size {
            return Err(
                "min_connections_per_node cannot exceed connection_queue_size".to_string(),
            );
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new("data", "data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.username, "data");
        assert_eq!(config.namespace, "bar");
        assert_eq!(config.set, "myset");
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_builder_pattern() {
        let config = StoreConfig::new("user", "pass")
            .host("kv.example.com")
            .port(3100)
            .namespace("test")
            .set("events")
            .services_alternate(true);

        assert_eq!(config.host, "kv.example.com");
        assert_eq!(config.port, 3100);
        assert_eq!(config.namespace, "test");
        assert_eq!(config.set, "events");
        assert!(config.services_alternate);
    }

    #[test]
    fn test_validate() {
        assert!(StoreConfig::new("user", "pass").validate().is_ok());
        assert!(StoreConfig::new("", "pass").validate().is_err());
        assert!(StoreConfig::new("user", "pass").namespace("").validate().is_err());
        assert!(StoreConfig::new("user", "pass").port(0).validate().is_err());

        let invalid_queue = StoreConfig::new("user", "pass")
            .connection_queue_size(10)
            .min_connections_per_node(20);
        assert!(invalid_queue.validate().is_err());
    }

    #[test]
    fn test_to_url_hides_password() {
        let config = StoreConfig::new("alice", "secret123").host("example.com");

        let url = config.to_url();
        assert!(!url.contains("secret123"));
        assert!(url.contains("***"));
        assert!(url.ends_with("/bar/myset"));
    }
}
