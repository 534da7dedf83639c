//! Node configuration
//!
//! Loaded from a JSON file; the host and port can be overridden from the
//! command line. When no signing secret is configured a fresh identity is
//! generated at startup, which is fine for development but means the node's
//! address changes on every restart.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use types::identity::{Keypair, MultiAddress};

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    18514
}

fn default_max_connections() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Hex-encoded 32-byte signing seed.
    #[serde(default)]
    pub secret: Option<String>,

    /// Seed nodes pinged at startup.
    #[serde(default)]
    pub bootstrap: Vec<MultiAddress>,

    /// Subscriber cap for every fan-out the node owns.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secret: None,
            bootstrap: Vec::new(),
            max_connections: default_max_connections(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config at {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("cannot parse config at {}", path.display()))?;
        Ok(config)
    }

    /// The node identity: the configured seed, or a fresh one.
    pub fn keypair(&self) -> anyhow::Result<Keypair> {
        match &self.secret {
            None => Ok(Keypair::generate()),
            Some(secret) => {
                let raw = hex::decode(secret.trim_start_matches("0x"))
                    .context("config secret is not hex")?;
                let seed: [u8; 32] = raw
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("config secret must be 32 bytes"))?;
                Ok(Keypair::from_seed(seed))
            }
        }
    }
}
