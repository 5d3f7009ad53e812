//! Configuration loading via `ortho-config`.
//!
//! Four structures are merged from defaults, an optional `s3ftp.toml` and
//! the environment. Nothing is read from the command line here; clap owns
//! the arguments. Every value is validated before the host is touched.

use std::fmt;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::mirror::{RcloneConf, RcloneTarget, SyncMode, SyncModeError};
use crate::provision::{DEFAULT_USERS_GROUP, ProvisionLayout};
use crate::schedule::{Cadence, CadenceError};
use crate::system::{AccountTools, NOLOGIN_SHELL};
use crate::users::{UserSpec, UserSpecError, parse_users, validate_charset};

const APP_NAME: &str = "s3ftp";
const CONFIG_FILE: &str = "s3ftp.toml";

/// Declared SFTP accounts.
#[derive(Clone, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SFTP",
    discovery(
        app_name = "s3ftp",
        env_var = "S3FTP_CONFIG_PATH",
        config_file_name = "s3ftp.toml",
        dotfile_name = ".s3ftp.toml",
        project_file_name = "s3ftp.toml"
    )
)]
pub struct SftpConfig {
    /// `user:password[:ro]` entries separated by commas.
    #[ortho_config(default = String::new())]
    pub users: String,
}

impl fmt::Debug for SftpConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SftpConfig")
            .field("users", &"<redacted>")
            .finish()
    }
}

/// S3 remote used by the mirror.
#[derive(Clone, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "S3",
    discovery(
        app_name = "s3ftp",
        env_var = "S3FTP_CONFIG_PATH",
        config_file_name = "s3ftp.toml",
        dotfile_name = ".s3ftp.toml",
        project_file_name = "s3ftp.toml"
    )
)]
pub struct S3Config {
    /// Access key id.
    #[ortho_config(default = String::new())]
    pub access_key_id: String,
    /// Secret access key.
    #[ortho_config(default = String::new())]
    pub secret_access_key: String,
    /// Bucket region.
    #[ortho_config(default = String::new())]
    pub region: String,
    /// S3-compatible endpoint URL.
    #[ortho_config(default = String::new())]
    pub endpoint: String,
    /// Bucket mirrored into the home root.
    #[ortho_config(default = String::new())]
    pub bucket: String,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("S3Config")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Raw sync cadence and direction.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SYNC",
    discovery(
        app_name = "s3ftp",
        env_var = "S3FTP_CONFIG_PATH",
        config_file_name = "s3ftp.toml",
        dotfile_name = ".s3ftp.toml",
        project_file_name = "s3ftp.toml"
    )
)]
pub struct SyncSettings {
    /// Duration such as `5m`, or a cron expression with 5 to 7 fields.
    #[ortho_config(default = String::new())]
    pub interval: String,
    /// `sync` or `bisync`.
    #[ortho_config(default = String::new())]
    pub mode: String,
}

/// Host paths and binaries; every field has a default.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "S3FTP",
    discovery(
        app_name = "s3ftp",
        env_var = "S3FTP_CONFIG_PATH",
        config_file_name = "s3ftp.toml",
        dotfile_name = ".s3ftp.toml",
        project_file_name = "s3ftp.toml"
    )
)]
pub struct RuntimeConfig {
    /// SSH daemon binary.
    #[ortho_config(default = "/usr/sbin/sshd".to_owned())]
    pub sshd_bin: String,
    /// Host key generator.
    #[ortho_config(default = "ssh-keygen".to_owned())]
    pub ssh_keygen_bin: String,
    /// Mirror tool binary.
    #[ortho_config(default = "rclone".to_owned())]
    pub rclone_bin: String,
    /// Parent of every chroot root; also the mirrored tree.
    #[ortho_config(default = "/home".to_owned())]
    pub home_root: String,
    /// Daemon configuration file.
    #[ortho_config(default = "/etc/ssh/sshd_config".to_owned())]
    pub sshd_config_path: String,
    /// Mirror tool configuration file.
    #[ortho_config(default = "/root/.config/rclone/rclone.conf".to_owned())]
    pub rclone_config_path: String,
    /// Marker written after a successful provisioning pass.
    #[ortho_config(default = "/.s3ftp-executed".to_owned())]
    pub marker_path: String,
    /// Group tagging provisioned accounts.
    #[ortho_config(default = DEFAULT_USERS_GROUP.to_owned())]
    pub users_group: String,
    /// Skip reset and provisioning when the marker is present.
    #[ortho_config(default = false)]
    pub skip_if_provisioned: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sshd_bin: String::from("/usr/sbin/sshd"),
            ssh_keygen_bin: String::from("ssh-keygen"),
            rclone_bin: String::from("rclone"),
            home_root: String::from("/home"),
            sshd_config_path: String::from("/etc/ssh/sshd_config"),
            rclone_config_path: String::from("/root/.config/rclone/rclone.conf"),
            marker_path: String::from("/.s3ftp-executed"),
            users_group: String::from(DEFAULT_USERS_GROUP),
            skip_if_provisioned: false,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised for an invalid user list.
    #[error(transparent)]
    Users(#[from] UserSpecError),
    /// Raised for an invalid cadence.
    #[error(transparent)]
    Cadence(#[from] CadenceError),
    /// Raised for an invalid sync mode.
    #[error(transparent)]
    Mode(#[from] SyncModeError),
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE}",
            metadata.description, metadata.env_var, metadata.toml_key
        )));
    }
    Ok(())
}

fn load_error(err: impl fmt::Display) -> ConfigError {
    ConfigError::Parse(err.to_string())
}

impl SftpConfig {
    /// Loads the user list from files and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from(APP_NAME)]).map_err(load_error)
    }

    /// Validates and parses the user list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when unset, otherwise the
    /// [`UserSpecError`] raised by the charset check or the parser.
    pub fn user_specs(&self) -> Result<Vec<UserSpec>, ConfigError> {
        require_field(
            &self.users,
            &FieldMetadata::new("SFTP user list", "SFTP_USERS", "users"),
        )?;
        validate_charset(&self.users)?;
        Ok(parse_users(&self.users)?)
    }
}

impl S3Config {
    /// Loads the S3 remote from files and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from(APP_NAME)]).map_err(load_error)
    }

    /// Requires every field to be non-blank.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first blank field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (
                &self.access_key_id,
                FieldMetadata::new("S3 access key id", "S3_ACCESS_KEY_ID", "access_key_id"),
            ),
            (
                &self.secret_access_key,
                FieldMetadata::new(
                    "S3 secret access key",
                    "S3_SECRET_ACCESS_KEY",
                    "secret_access_key",
                ),
            ),
            (
                &self.region,
                FieldMetadata::new("S3 region", "S3_REGION", "region"),
            ),
            (
                &self.endpoint,
                FieldMetadata::new("S3 endpoint", "S3_ENDPOINT", "endpoint"),
            ),
            (
                &self.bucket,
                FieldMetadata::new("S3 bucket", "S3_BUCKET", "bucket"),
            ),
        ];
        for (value, metadata) in &fields {
            require_field(value, metadata)?;
        }
        Ok(())
    }

    /// Remote definition written to `rclone.conf`.
    #[must_use]
    pub fn rclone_conf(&self) -> RcloneConf {
        RcloneConf {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

/// Validated cadence and direction of the sync loop.
#[derive(Clone, Debug)]
pub struct SyncPolicy {
    /// When passes run.
    pub cadence: Cadence,
    /// Direction of each pass.
    pub mode: SyncMode,
}

impl SyncSettings {
    /// Loads the sync settings from files and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from(APP_NAME)]).map_err(load_error)
    }

    /// Parses the cadence and mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for blank values, or the
    /// [`CadenceError`] / [`SyncModeError`] raised while parsing.
    pub fn policy(&self) -> Result<SyncPolicy, ConfigError> {
        require_field(
            &self.interval,
            &FieldMetadata::new("sync interval", "SYNC_INTERVAL", "interval"),
        )?;
        require_field(
            &self.mode,
            &FieldMetadata::new("sync mode", "SYNC_MODE", "mode"),
        )?;
        Ok(SyncPolicy {
            cadence: self.interval.parse()?,
            mode: self.mode.parse()?,
        })
    }
}

impl RuntimeConfig {
    /// Loads host settings from files and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from(APP_NAME)]).map_err(load_error)
    }

    /// Paths and names used by the provisioner.
    #[must_use]
    pub fn layout(&self) -> ProvisionLayout {
        ProvisionLayout {
            home_root: Utf8PathBuf::from(&self.home_root),
            sshd_config_path: Utf8PathBuf::from(&self.sshd_config_path),
            marker_path: Utf8PathBuf::from(&self.marker_path),
            users_group: self.users_group.clone(),
            shell: String::from(NOLOGIN_SHELL),
        }
    }

    /// Account tools pointed at the configured key generator.
    #[must_use]
    pub fn account_tools(&self) -> AccountTools {
        AccountTools {
            ssh_keygen_bin: self.ssh_keygen_bin.clone(),
            ..AccountTools::default()
        }
    }

    /// Where `rclone` mirrors `bucket` to.
    #[must_use]
    pub fn rclone_target(&self, bucket: &str, mode: SyncMode) -> RcloneTarget {
        RcloneTarget {
            rclone_bin: self.rclone_bin.clone(),
            config_path: Utf8PathBuf::from(&self.rclone_config_path),
            bucket: bucket.to_owned(),
            local_root: Utf8PathBuf::from(&self.home_root),
            mode,
        }
    }
}

/// Everything `serve` needs, validated.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Accounts to provision, in declaration order.
    pub users: Vec<UserSpec>,
    /// S3 remote.
    pub s3: S3Config,
    /// Sync loop policy.
    pub policy: SyncPolicy,
    /// Host paths and binaries.
    pub runtime: RuntimeConfig,
}

impl Settings {
    /// Loads and validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] raised while loading or validating.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_parts(
            &SftpConfig::load_without_cli_args()?,
            S3Config::load_without_cli_args()?,
            &SyncSettings::load_without_cli_args()?,
            RuntimeConfig::load_without_cli_args()?,
        )
    }

    /// Validates already loaded sections.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] raised while validating.
    pub fn from_parts(
        sftp: &SftpConfig,
        s3: S3Config,
        sync: &SyncSettings,
        runtime: RuntimeConfig,
    ) -> Result<Self, ConfigError> {
        let users = sftp.user_specs()?;
        s3.validate()?;
        let policy = sync.policy()?;
        Ok(Self {
            users,
            s3,
            policy,
            runtime,
        })
    }

    /// `rclone` target for the configured bucket and mode.
    #[must_use]
    pub fn rclone_target(&self) -> RcloneTarget {
        self.runtime.rclone_target(&self.s3.bucket, self.policy.mode)
    }
}
