use serde::Deserialize;
use std::collections::HashSet;
use std::{env, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub users: Vec<UserConfig>,
    pub parents: Vec<ParentConfig>,
    #[serde(default)]
    pub kids: Vec<KidConfig>,
    #[serde(default)]
    pub rewards: Vec<RewardConfig>,
    pub dev_cors_origin: Option<String>,
    pub listen_port: Option<u16>,
}

/// A parent login. `username` is matched against `ParentConfig::auth_id`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub password_hash: String, // bcrypt hash
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParentConfig {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub auth_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KidConfig {
    pub id: i32,
    pub parent_id: i32,
    pub name: String,
    /// Starting balance; only applied when the kid is first created.
    #[serde(default)]
    pub currency: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardConfig {
    pub id: i32,
    pub name: String,
    pub cost: i32,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Yaml(e) => write!(f, "YAML error: {}", e),
            ConfigError::Invalid(m) => write!(f, "invalid config: {}", m),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        ConfigError::Yaml(value)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |m: String| Err(ConfigError::Invalid(m));

        if self.jwt_secret.trim().is_empty() {
            return invalid("jwt_secret must not be empty".into());
        }

        let mut usernames = HashSet::new();
        for u in &self.users {
            if !usernames.insert(u.username.as_str()) {
                return invalid(format!("duplicate user: {}", u.username));
            }
        }

        let mut parent_ids = HashSet::new();
        let mut auth_ids = HashSet::new();
        for p in &self.parents {
            if !parent_ids.insert(p.id) {
                return invalid(format!("duplicate parent id: {}", p.id));
            }
            if !auth_ids.insert(p.auth_id.as_str()) {
                return invalid(format!("duplicate parent auth_id: {}", p.auth_id));
            }
        }

        let mut kid_ids = HashSet::new();
        for k in &self.kids {
            if !kid_ids.insert(k.id) {
                return invalid(format!("duplicate kid id: {}", k.id));
            }
            if !parent_ids.contains(&k.parent_id) {
                return invalid(format!(
                    "kid {} references unknown parent {}",
                    k.id, k.parent_id
                ));
            }
            if k.currency < 0 {
                return invalid(format!("kid {} has negative currency", k.id));
            }
        }

        let mut reward_ids = HashSet::new();
        for r in &self.rewards {
            if !reward_ids.insert(r.id) {
                return invalid(format!("duplicate reward id: {}", r.id));
            }
            if r.cost < 1 {
                return invalid(format!("reward {} must cost at least 1", r.id));
            }
        }
        Ok(())
    }
}
