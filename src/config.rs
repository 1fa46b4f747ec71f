use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RewriteError};
use crate::finalize::FinalizePolicy;
use crate::model::{Identity, TargetIdentity};

const APP_DIR: &str = "git-history-rewrite";
const REPO_FILE: &str = ".git-history-rewrite.toml";
const ENV_PREFIX: &str = "GIT_HISTORY_REWRITE_";

/// Static configuration for a run. Nothing here is prompted for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub finalize: FinalizeConfig,

    #[serde(default)]
    pub bulk: BulkConfig,
}

/// Target identity. Committer fields fall back to the author's.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Ref namespace under `refs/heads/` for lightweight backups
    #[serde(default = "default_backup_prefix")]
    pub prefix: String,

    /// Appended to the repository directory name for full copies
    #[serde(default = "default_copy_suffix")]
    pub copy_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Remote used when the branch has no upstream
    #[serde(default = "default_remote")]
    pub remote: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeConfig {
    #[serde(default)]
    pub default_policy: FinalizePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Above this many commits a sequential whole-history run suggests `--fast`
    #[serde(default = "default_size_hint")]
    pub size_hint: usize,
}

fn default_backup_prefix() -> String {
    "backup/rewrite".to_string()
}

fn default_copy_suffix() -> String {
    ".rewrite-backup".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_size_hint() -> usize {
    10_000
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            prefix: default_backup_prefix(),
            copy_suffix: default_copy_suffix(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
        }
    }
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            default_policy: FinalizePolicy::default(),
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            size_hint: default_size_hint(),
        }
    }
}

impl Config {
    /// Layers defaults, the user config file, the repository config file,
    /// an explicit file and finally `GIT_HISTORY_REWRITE_*` variables.
    pub fn figment(repo_root: Option<&Path>, explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if let Some(dir) = dirs::config_dir() {
            figment = figment.merge(Toml::file(dir.join(APP_DIR).join("config.toml")));
        }
        if let Some(root) = repo_root {
            figment = figment.merge(Toml::file(root.join(REPO_FILE)));
        }
        if let Some(path) = explicit {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads defaults, then the user file, the repository file, `explicit`
    /// and the environment, later layers winning.
    ///
    /// # Errors
    ///
    /// Fails when `explicit` is missing or any layer does not parse.
    pub fn load(repo_root: Option<&Path>, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(RewriteError::Config {
                    message: format!("config file {} does not exist", path.display()),
                });
            }
        }

        let config: Config = Self::figment(repo_root, explicit)
            .extract()
            .map_err(|e| RewriteError::Config {
                message: e.to_string(),
            })?;
        log::debug!("loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Resolves the target identity, using `fallback` (typically the
    /// repository's `user.name`/`user.email`) for missing author fields.
    pub fn target_identity(&self, fallback: Option<Identity>) -> Result<TargetIdentity> {
        let cfg = &self.identity;

        let author = match (&cfg.author_name, &cfg.author_email) {
            (Some(name), Some(email)) => Identity::new(name, email)?,
            (name, email) => {
                let fallback = fallback.ok_or_else(|| RewriteError::Config {
                    message: "no target identity: set identity.author_name and identity.author_email"
                        .to_string(),
                })?;
                log::info!("using git user config for missing identity fields: {}", fallback);
                Identity::new(
                    name.as_deref().unwrap_or(&fallback.name),
                    email.as_deref().unwrap_or(&fallback.email),
                )?
            }
        };

        let committer = Identity::new(
            cfg.committer_name.as_deref().unwrap_or(&author.name),
            cfg.committer_email.as_deref().unwrap_or(&author.email),
        )?;

        Ok(TargetIdentity { author, committer })
    }
}
