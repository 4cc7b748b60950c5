//! CLI configuration and the small on-disk fingerprint file.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the agent verifies the cloud host's TLS certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TlsTrust {
    /// Pinned webpki roots shipped with the binary (default).
    Default,
    /// Use the OS trust store.
    SystemStore,
    /// `--no-ssl-verify`: accept any certificate. Never the default.
    NoVerify,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "cyberdriver", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Connect the tunnel to a cloud controller and keep it alive.
    Join(JoinArgs),
    /// Run only the local HTTP surface (no tunnel).
    Start(StartArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct JoinArgs {
    /// Shared secret presented to the cloud controller.
    #[arg(long, env = "CYBERDRIVER_SECRET")]
    pub secret: String,

    /// Cloud controller base URL.
    #[arg(
        long,
        env = "CYBERDRIVER_HOST",
        default_value = "https://api.cyberdesk.io"
    )]
    pub host: String,

    /// Local port the HTTP surface listens on.
    #[arg(long, env = "CYBERDRIVER_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Enable the idle-driven synthetic-activity worker.
    #[arg(long, env = "CYBERDRIVER_KEEPALIVE", default_value_t = false)]
    pub keepalive: bool,

    /// Minutes of remote inactivity before a keepalive action runs.
    #[arg(long, default_value_t = 3.0)]
    pub keepalive_threshold_minutes: f64,

    /// Keepalive click X coordinate. Unset uses the bottom-left heuristic.
    #[arg(long)]
    pub keepalive_click_x: Option<i32>,

    /// Keepalive click Y coordinate. Unset uses the bottom-left heuristic.
    #[arg(long)]
    pub keepalive_click_y: Option<i32>,

    /// Announce this agent as a keepalive delegate for another machine id.
    #[arg(long)]
    pub register_as_keepalive_for: Option<String>,

    /// Read `enable`/`disable`/`status`/`quit` commands from stdin.
    #[arg(long, default_value_t = false)]
    pub interactive: bool,

    /// Use the OS trust store instead of the pinned webpki roots.
    #[arg(
        long,
        env = "CYBERDRIVER_USE_SYSTEM_CERTS",
        default_value_t = false,
        conflicts_with = "no_ssl_verify"
    )]
    pub use_system_certs: bool,

    /// Path to a custom CA bundle (PEM).
    #[arg(long, env = "CYBERDRIVER_CA_FILE")]
    pub ca_file: Option<PathBuf>,

    /// Disable TLS certificate verification. Dangerous; testing only.
    #[arg(long, default_value_t = false)]
    pub no_ssl_verify: bool,

    /// Maximum tunnel frame body size, in bytes.
    #[arg(long, default_value_t = 64 << 20)]
    pub max_frame_bytes: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct StartArgs {
    /// Local port the HTTP surface listens on.
    #[arg(long, env = "CYBERDRIVER_PORT", default_value_t = 3000)]
    pub port: u16,
}

impl JoinArgs {
    /// Resolve the effective TLS trust policy. `--no-ssl-verify` always wins
    /// when passed explicitly; otherwise `CYBERDRIVER_SSL_VERIFY` can still
    /// force no-verify by being set to a falsy value (§6 Environment
    /// variables) — note the polarity flip: the env var spells "verify",
    /// the CLI flag and `TlsTrust::NoVerify` spell "don't verify".
    pub fn tls_trust(&self) -> TlsTrust {
        if self.no_ssl_verify || env_var_is_falsy("CYBERDRIVER_SSL_VERIFY") {
            TlsTrust::NoVerify
        } else if self.use_system_certs {
            TlsTrust::SystemStore
        } else {
            TlsTrust::Default
        }
    }

    /// Validate the parsed arguments, independent of clap's own checks.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.secret.trim().is_empty() {
            anyhow::bail!("--secret must not be empty");
        }
        if self.keepalive_threshold_minutes <= 0.0 {
            anyhow::bail!("--keepalive-threshold-minutes must be positive");
        }
        if self.ca_file.is_some() && self.use_system_certs {
            anyhow::bail!("--ca-file and --use-system-certs are mutually exclusive");
        }
        Ok(())
    }
}

/// `true` only when `name` is set and spells an explicit "false"/"0"/"no"
/// (case-insensitive). Unset, unparseable, or truthy values are not falsy.
fn env_var_is_falsy(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"),
        Err(_) => false,
    }
}

/// Persisted on-disk document: `<config-dir>/.cyberdriver/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    pub fingerprint: Uuid,
}

impl ConfigFile {
    /// Default location: `<user config dir>/.cyberdriver/config.json`.
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("no config dir for platform"))?;
        Ok(base.join(".cyberdriver").join("config.json"))
    }

    /// Load the config file, creating it with a fresh fingerprint if absent.
    pub fn load_or_init(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            return Ok(serde_json::from_str(&content)?);
        }

        let fresh = Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            fingerprint: Uuid::new_v4(),
        };
        fresh.save(path)?;
        Ok(fresh)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_init_creates_stable_fingerprint() {
        let dir = std::env::temp_dir().join(format!("cyberdriver-test-{}", Uuid::new_v4()));
        let path = dir.join("config.json");

        let first = ConfigFile::load_or_init(&path).unwrap();
        let second = ConfigFile::load_or_init(&path).unwrap();
        assert_eq!(first.fingerprint, second.fingerprint);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn join_args_reject_empty_secret() {
        let args = JoinArgs {
            secret: "  ".to_string(),
            host: "https://example.com".to_string(),
            port: 3000,
            keepalive: false,
            keepalive_threshold_minutes: 3.0,
            keepalive_click_x: None,
            keepalive_click_y: None,
            register_as_keepalive_for: None,
            interactive: false,
            use_system_certs: false,
            ca_file: None,
            no_ssl_verify: false,
            max_frame_bytes: 64 << 20,
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn env_var_is_falsy_recognizes_common_spellings() {
        std::env::set_var("CYBERDRIVER_TEST_SSL_VERIFY_A", "false");
        assert!(env_var_is_falsy("CYBERDRIVER_TEST_SSL_VERIFY_A"));
        std::env::remove_var("CYBERDRIVER_TEST_SSL_VERIFY_A");

        std::env::set_var("CYBERDRIVER_TEST_SSL_VERIFY_B", "TRUE");
        assert!(!env_var_is_falsy("CYBERDRIVER_TEST_SSL_VERIFY_B"));
        std::env::remove_var("CYBERDRIVER_TEST_SSL_VERIFY_B");

        assert!(!env_var_is_falsy("CYBERDRIVER_TEST_SSL_VERIFY_UNSET"));
    }
}
