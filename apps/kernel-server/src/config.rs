// apps/kernel-server/src/config.rs
// Purpose: Environment-derived process configuration, read once at
// boot and threaded through main rather than read ad hoc.
// Architecture: Application Boot
// Dependencies: std::env

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: Option<String>,
    pub save_frequency: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let port = env::var("KERNEL_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        let redis_url = env::var("REDIS_URL").ok().filter(|s| !s.is_empty());
        let save_frequency = env::var("SAVE_FREQUENCY")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5);
        Config {
            port,
            redis_url,
            save_frequency,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_uses_configured_port() {
        let config = Config {
            port: 4242,
            redis_url: None,
            save_frequency: 5,
        };
        assert_eq!(config.bind_addr(), "0.0.0.0:4242");
    }
}
