//! Layered application configuration.
//!
//! Precedence, lowest first: built-in defaults, the TOML config file,
//! `DSVIEW_*` environment variables, then command-line flags.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::backend::BackendType;
use crate::core::models::JobTemplate;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "DSVIEW_CONFIG";
const ENV_PREFIX: &str = "DSVIEW_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deadline CLI executable
    pub deadline_bin: String,
    pub backend: BackendType,
    /// Job bundle directory for the software listing job
    pub bundle_path: PathBuf,
    /// Conda channel passed to the bundle as `CondaChannel`
    pub conda_channel: String,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    pub log_settle_secs: u64,
    /// Per-call limits on the Deadline CLI
    pub submit_timeout_secs: u64,
    pub status_timeout_secs: u64,
    pub logs_timeout_secs: u64,
    pub connection_timeout_secs: u64,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            deadline_bin: "deadline".to_string(),
            backend: BackendType::Deadline,
            bundle_path: PathBuf::from("list_software"),
            conda_channel: "deadline-cloud".to_string(),
            poll_interval_secs: 5,
            timeout_secs: 300,
            log_settle_secs: 5,
            submit_timeout_secs: 120,
            status_timeout_secs: 60,
            logs_timeout_secs: 60,
            connection_timeout_secs: 30,
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Defaults, config file and environment. Callers merge CLI flags on top
    /// and finish with [`AppConfig::from_figment`].
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = config_file_path() {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load the effective config, with `cli_args` (serialized clap flags that
    /// skip unset options) taking precedence over everything else.
    pub fn new<T: Serialize>(cli_args: Option<&T>) -> Result<Self> {
        let mut figment = Self::figment();
        if let Some(args) = cli_args {
            figment = figment.merge(Serialized::defaults(args));
        }
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment
            .extract()
            .context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.deadline_bin.trim().is_empty() {
            bail!("deadline_bin cannot be empty");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than 0");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be greater than 0");
        }
        for (name, value) in [
            ("submit_timeout_secs", self.submit_timeout_secs),
            ("status_timeout_secs", self.status_timeout_secs),
            ("logs_timeout_secs", self.logs_timeout_secs),
        ] {
            if value == 0 {
                bail!("{} must be greater than 0", name);
            }
        }
        if self.conda_channel.trim().is_empty() {
            bail!("conda_channel cannot be empty");
        }
        Ok(())
    }

    /// The listing job, parameterised with `channel`.
    pub fn template(&self, channel: &str) -> JobTemplate {
        JobTemplate::new(self.bundle_path.clone()).with_parameter("CondaChannel", channel)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

/// `$DSVIEW_CONFIG`, else `~/.config/dsview/config.toml`.
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("dsview")
            .join("config.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.timeout_secs, 300);
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let mut config = AppConfig::default();
        config.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[derive(Serialize)]
    struct Flags {
        #[serde(skip_serializing_if = "Option::is_none")]
        poll_interval_secs: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_timeout_secs: Option<u64>,
    }

    #[test]
    fn file_then_env_then_cli() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "dsview.toml",
                r#"
                    conda_channel = "studio"
                    timeout_secs = 120
                    status_timeout_secs = 15
                    backend = "simulated"
                "#,
            )?;
            jail.set_env(CONFIG_PATH_ENV, "dsview.toml");
            jail.set_env("DSVIEW_TIMEOUT_SECS", "90");

            let config = AppConfig::new(Some(&Flags {
                poll_interval_secs: Some(2),
                status_timeout_secs: None,
            }))
            .map_err(|e| e.to_string())?;

            assert_eq!(config.conda_channel, "studio");
            assert_eq!(config.backend, BackendType::Simulated);
            assert_eq!(config.timeout_secs, 90);
            assert_eq!(config.poll_interval_secs, 2);
            // Unset flags leave the file value alone.
            assert_eq!(config.status_timeout_secs, 15);
            Ok(())
        });
    }

    #[test]
    fn config_file_env_names_the_file() {
        figment::Jail::expect_with(|jail| {
            jail.set_env(CONFIG_PATH_ENV, "/etc/dsview/custom.toml");
            assert_eq!(
                config_file_path(),
                Some(PathBuf::from("/etc/dsview/custom.toml"))
            );
            Ok(())
        });
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env(CONFIG_PATH_ENV, "does-not-exist.toml");

            let config = AppConfig::new(None::<&Flags>).map_err(|e| e.to_string())?;
            assert_eq!(config, AppConfig::default());
            Ok(())
        });
    }

    #[test]
    fn invalid_file_value_is_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("dsview.toml", "status_timeout_secs = 0")?;
            jail.set_env(CONFIG_PATH_ENV, "dsview.toml");

            let err = AppConfig::new(None::<&Flags>).unwrap_err();
            assert!(err.to_string().contains("status_timeout_secs"));
            Ok(())
        });
    }

    #[test]
    fn template_carries_channel() {
        let template = AppConfig::default().template("conda-forge");
        assert_eq!(
            template.parameters,
            vec![("CondaChannel".to_string(), "conda-forge".to_string())]
        );
    }

    #[test]
    fn toml_round_trip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
