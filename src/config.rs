use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Overrides the stored endpoint URL when set and non-empty.
pub const ENDPOINT_ENV: &str = "RAPORD_ENDPOINT";

pub const MIN_REFRESH_INTERVAL_MS: u64 = 1000;
pub const MIN_HTTP_TIMEOUT_MS: u64 = 1000;

/// School values printed when the endpoint has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FallbackSchool {
    pub name: String,
    pub address: String,
    pub year: String,
    pub report_date: String,
    pub place: String,
}

impl Default for FallbackSchool {
    fn default() -> Self {
        Self {
            name: "UPT SD NEGERI 2 BATANG".to_string(),
            address: "Desa Bungeng, Kecamatan Batang".to_string(),
            year: "2023/2024".to_string(),
            report_date: "23 Desember 2023".to_string(),
            place: "Bungeng".to_string(),
        }
    }
}

/// Workspace settings. Missing keys in stored JSON take their defaults, so
/// older workspaces keep loading as fields are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub endpoint: String,
    pub http_timeout_ms: u64,
    pub auto_refresh: bool,
    pub refresh_interval_ms: u64,
    /// Relative to the workspace unless absolute.
    pub reports_dir: String,
    pub semester: String,
    pub phase: String,
    pub fallback_school: FallbackSchool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            http_timeout_ms: 30_000,
            auto_refresh: true,
            refresh_interval_ms: 5000,
            reports_dir: "reports".to_string(),
            semester: "1".to_string(),
            phase: "C".to_string(),
            fallback_school: FallbackSchool::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl Settings {
    /// The endpoint actually used: the environment override, else the
    /// stored value. `None` when neither is set.
    pub fn effective_endpoint(&self) -> Option<String> {
        let from_env = std::env::var(ENDPOINT_ENV).ok();
        pick_endpoint(from_env.as_deref(), &self.endpoint)
    }

    /// Merges a partial camelCase object over the current values.
    pub fn apply_patch(&self, patch: &Value) -> Result<Settings, ConfigError> {
        let Some(patch_obj) = patch.as_object() else {
            return Err(ConfigError {
                field: "settings",
                message: "settings patch must be an object".to_string(),
            });
        };
        let mut merged = serde_json::to_value(self).map_err(|e| ConfigError {
            field: "settings",
            message: e.to_string(),
        })?;
        if let Some(obj) = merged.as_object_mut() {
            for (k, v) in patch_obj {
                match (obj.get_mut(k), v) {
                    (Some(Value::Object(current)), Value::Object(incoming)) => {
                        for (ik, iv) in incoming {
                            current.insert(ik.clone(), iv.clone());
                        }
                    }
                    _ => {
                        obj.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        let next: Settings = serde_json::from_value(merged).map_err(|e| ConfigError {
            field: "settings",
            message: e.to_string(),
        })?;
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_ms < MIN_REFRESH_INTERVAL_MS {
            return Err(ConfigError {
                field: "refreshIntervalMs",
                message: format!("must be at least {} ms", MIN_REFRESH_INTERVAL_MS),
            });
        }
        if self.http_timeout_ms < MIN_HTTP_TIMEOUT_MS {
            return Err(ConfigError {
                field: "httpTimeoutMs",
                message: format!("must be at least {} ms", MIN_HTTP_TIMEOUT_MS),
            });
        }
        if self.reports_dir.trim().is_empty() {
            return Err(ConfigError {
                field: "reportsDir",
                message: "must not be empty".to_string(),
            });
        }
        let endpoint = self.endpoint.trim();
        if !endpoint.is_empty()
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(ConfigError {
                field: "endpoint",
                message: "must be an http(s) URL".to_string(),
            });
        }
        Ok(())
    }
}

fn pick_endpoint(from_env: Option<&str>, stored: &str) -> Option<String> {
    from_env
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| Some(stored.trim()).filter(|s| !s.is_empty()))
        .map(str::to_string)
}
