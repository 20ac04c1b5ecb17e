use crate::error::{ProxyError, Result};
use crate::providers::ProviderPreset;
use crate::translate::{ConversionDefaults, Converter, Dialect, RouteTable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub upstream: UpstreamConfig,
    /// Client model id -> upstream model id.
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub defaults: ConversionDefaults,
    #[serde(default)]
    pub conversion: ConversionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<Dialect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Cross-dialect pairs to refuse, written `"from->to"`.
    #[serde(default)]
    pub deny: Vec<String>,
}

fn default_port() -> u16 {
    4222
}

const FALLBACK_API_KEY_ENV: &str = "API_KEY";

impl ProxyConfig {
    /// Config for a named preset with everything else defaulted.
    pub fn for_upstream(name: &str) -> Self {
        Self {
            port: default_port(),
            upstream: UpstreamConfig {
                name: name.to_string(),
                dialect: None,
                base_url: None,
                api_key_env: None,
            },
            models: HashMap::new(),
            defaults: ConversionDefaults::default(),
            conversion: ConversionConfig::default(),
        }
    }

    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(ProxyError::config(format!(
            "No config file found. Searched: {}. Create one from config.example.toml",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    fn preset(&self) -> Option<&'static ProviderPreset> {
        ProviderPreset::from_name(&self.upstream.name)
    }

    /// Resolve the effective base URL (config override or preset default).
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.upstream.base_url {
            return Ok(url.clone());
        }

        let preset = self.preset().ok_or_else(|| {
            ProxyError::config(format!(
                "Unknown upstream '{}' and no base_url configured. Known upstreams: {}",
                self.upstream.name,
                ProviderPreset::names().join(", ")
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    /// The dialect the upstream speaks: explicit setting, else the preset's.
    pub fn upstream_dialect(&self) -> Result<Dialect> {
        if let Some(dialect) = self.upstream.dialect {
            return Ok(dialect);
        }
        self.preset().map(|p| p.dialect).ok_or_else(|| {
            ProxyError::config(format!(
                "Unknown upstream '{}'; set upstream.dialect to openai, anthropic or gemini",
                self.upstream.name
            ))
        })
    }

    pub fn api_key_env(&self) -> &str {
        match (&self.upstream.api_key_env, self.preset()) {
            (Some(env), _) => env,
            (None, Some(preset)) => preset.default_api_key_env,
            (None, None) => FALLBACK_API_KEY_ENV,
        }
    }

    /// Resolve the API key from the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        let env = self.api_key_env();
        std::env::var(env).map_err(|_| {
            ProxyError::config(format!(
                "Environment variable '{env}' not set. Set it with your upstream API key."
            ))
        })
    }

    pub fn route_table(&self) -> Result<RouteTable> {
        RouteTable::complete_except(&self.conversion.deny).map_err(ProxyError::config)
    }

    pub fn converter(&self) -> Result<Converter> {
        Ok(Converter::new(self.route_table()?, self.defaults.clone()))
    }
}

/// Upstream model id for a client model id. Unmapped ids pass through.
pub fn map_model<'a>(models: &'a HashMap<String, String>, model: &'a str) -> &'a str {
    models.get(model).map_or(model, String::as_str)
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("dialect-proxy.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("dialect-proxy")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("dialect-proxy").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("dialect-proxy").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".dialect-proxy.toml"));
    }

    paths
}

/// Human-readable list for `--show-config-paths`.
pub fn describe_search_paths() -> Vec<String> {
    config_search_paths()
        .iter()
        .map(|p| p.display().to_string())
        .collect()
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
