pub mod schema;

pub use schema::{AgentsConfig, BackendConfig, Config, GatewayConfig, HttpConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexported_config_default_is_constructible() {
        let config = Config::default();

        assert!(!config.backend.endpoint.is_empty());
        assert!(!config.agents.ums_endpoint.is_empty());
        assert!(config.gateway.port > 0);
    }
}
