use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::authz::PatternMode;
use crate::middleware::AuthType;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub authz: Authz,
    #[serde(default)]
    pub enforcement: Enforcement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authz {
    /// Model definition file (request/policy/role definitions, effect, matcher)
    pub model_path: PathBuf,
    /// Comma-separated policy file. Without it the enforcer starts empty and
    /// reload/save are unavailable.
    pub policy_path: Option<PathBuf>,
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,
    #[serde(default)]
    pub pattern_mode: PatternMode,
}

fn default_case_sensitive() -> bool {
    true
}

/// Request enforcement for the served routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enforcement {
    #[serde(default = "default_enforcement_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub auth_type: AuthType,
    /// Paths served without a decision, e.g. `/healthz`
    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<String>,
}

fn default_enforcement_enabled() -> bool {
    false
}

fn default_skip_paths() -> Vec<String> {
    vec!["/healthz".to_string()]
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8180,
        }
    }
}

impl Default for Authz {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("policies/model.conf"),
            policy_path: None,
            case_sensitive: default_case_sensitive(),
            pattern_mode: PatternMode::default(),
        }
    }
}

impl Default for Enforcement {
    fn default() -> Self {
        Self {
            enabled: default_enforcement_enabled(),
            auth_type: AuthType::default(),
            skip_paths: default_skip_paths(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default(
                "authz.model_path",
                Authz::default().model_path.to_string_lossy().to_string(),
            )
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: GATEHOUSE__SERVER__PORT=9090, etc.
        builder = builder.add_source(
            config::Environment::with_prefix("GATEHOUSE")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("enforcement.skip_paths"),
        );

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        // Normalize policy paths to be relative to current dir
        if s.authz.model_path.is_relative() {
            s.authz.model_path = std::env::current_dir()
                .into_diagnostic()?
                .join(&s.authz.model_path);
        }
        if let Some(policy_path) = s.authz.policy_path.as_mut() {
            if policy_path.is_relative() {
                *policy_path = std::env::current_dir().into_diagnostic()?.join(&*policy_path);
            }
        }

        Ok(s)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
