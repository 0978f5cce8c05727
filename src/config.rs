use std::time::Duration;

use serde::Deserialize;

/// Built-in development secret. Rejected when `security.production` is set.
pub const DEV_CSRF_SECRET: &str = "wachposten-dev-secret-change-me";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Gates HSTS, `upgrade-insecure-requests` and the external audit sink.
    pub production: bool,
    pub csrf_secret: String,
    pub csrf_expiry_secs: u64,
    /// Bearer token for `/admin/*`. Admin routes are refused when unset.
    pub admin_token: Option<String>,
    pub max_body_bytes: usize,
}

/// Limits for one named rate-limit policy.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct PolicyLimits {
    pub max_attempts: u32,
    pub window_secs: u64,
    pub block_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    pub login: PolicyLimits,
    pub api: PolicyLimits,
    pub mutation: PolicyLimits,
    pub sensitive: PolicyLimits,
    pub blacklist_secs: u64,
    pub escalation_factor: u32,
    pub cleanup_interval_secs: u64,
    pub eviction_margin_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub capacity: usize,
    /// Minimum gap between two audited rejections of the same blacklisted IP.
    pub blacklisted_report_secs: u64,
}

impl AuditConfig {
    pub fn blacklisted_report_interval(&self) -> Duration {
        Duration::from_secs(self.blacklisted_report_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub rate_limits: RateLimitSettings,
    pub audit: AuditConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        let defaults: &str = include_str!("../config/default.toml");
        match ::config::Config::builder()
            .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

impl RateLimitSettings {
    pub fn blacklist_duration(&self) -> Duration {
        Duration::from_secs(self.blacklist_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn eviction_margin(&self) -> Duration {
        Duration::from_secs(self.eviction_margin_secs)
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let defaults: &str = include_str!("../config/default.toml");
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
        // Optional local file: wachposten.toml (in CWD)
        .add_source(::config::File::with_name("wachposten").required(false));

    if let Ok(custom_path) = std::env::var("WACHPOSTEN_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    builder = builder.add_source(::config::Environment::with_prefix("WACHPOSTEN").separator("__"));

    // Conventional unprefixed variables win over everything else
    if let Ok(secret) = std::env::var("CSRF_SECRET") {
        if !secret.is_empty() {
            builder = builder.set_override("security.csrf_secret", secret)?;
        }
    }
    if std::env::var("APP_ENV").map(|v| v.eq_ignore_ascii_case("production")).unwrap_or(false) {
        builder = builder.set_override("security.production", true)?;
    }

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    // Security
    if cfg.security.csrf_secret.trim().is_empty() {
        return Err(anyhow::anyhow!("security.csrf_secret must not be empty"));
    }
    if cfg.security.csrf_secret == DEV_CSRF_SECRET {
        if cfg.security.production {
            return Err(anyhow::anyhow!(
                "security.csrf_secret is the development default; set CSRF_SECRET in production"
            ));
        }
        tracing::warn!("Using the development CSRF secret - set CSRF_SECRET before deploying");
    }
    if cfg.security.csrf_expiry_secs == 0 {
        return Err(anyhow::anyhow!("security.csrf_expiry_secs must be > 0"));
    }
    if cfg.security.max_body_bytes == 0 {
        return Err(anyhow::anyhow!("security.max_body_bytes must be > 0"));
    }

    // Rate limits
    let rl = &cfg.rate_limits;
    for (name, limits) in [
        ("login", &rl.login),
        ("api", &rl.api),
        ("mutation", &rl.mutation),
        ("sensitive", &rl.sensitive),
    ] {
        if limits.max_attempts == 0 {
            return Err(anyhow::anyhow!("rate_limits.{}.max_attempts must be > 0", name));
        }
        if limits.window_secs == 0 {
            return Err(anyhow::anyhow!("rate_limits.{}.window_secs must be > 0", name));
        }
    }
    if rl.escalation_factor == 0 {
        return Err(anyhow::anyhow!("rate_limits.escalation_factor must be > 0"));
    }
    if rl.cleanup_interval_secs == 0 {
        return Err(anyhow::anyhow!("rate_limits.cleanup_interval_secs must be > 0"));
    }

    // Audit
    if cfg.audit.capacity == 0 {
        return Err(anyhow::anyhow!("audit.capacity must be > 0"));
    }
    if cfg.audit.blacklisted_report_secs == 0 {
        return Err(anyhow::anyhow!("audit.blacklisted_report_secs must be > 0"));
    }

    Ok(())
}
