#[cfg(test)]
mod tests {
    use crate::config::{self, AppConfig, PolicyLimits, DEV_CSRF_SECRET};
    use lazy_static::lazy_static;
    use std::env;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    lazy_static! {
        // Tests that touch process environment run one at a time
        static ref ENV_LOCK: Mutex<()> = Mutex::new(());
    }

    fn write_temp_config(content: &str) -> NamedTempFile {
        let temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        fs::write(temp_file.path(), content).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert!(!config.security.production);
        assert_eq!(config.security.csrf_secret, DEV_CSRF_SECRET);
        assert_eq!(config.security.csrf_expiry_secs, 3600);
        assert!(config.security.admin_token.is_none());
        assert_eq!(config.audit.capacity, 10_000);
        assert_eq!(config.audit.blacklisted_report_secs, 60);

        let rl = &config.rate_limits;
        assert_eq!(rl.login, PolicyLimits { max_attempts: 5, window_secs: 900, block_secs: 1800 });
        assert_eq!(rl.api, PolicyLimits { max_attempts: 100, window_secs: 60, block_secs: 300 });
        assert_eq!(rl.mutation, PolicyLimits { max_attempts: 30, window_secs: 60, block_secs: 600 });
        assert_eq!(rl.sensitive, PolicyLimits { max_attempts: 3, window_secs: 3600, block_secs: 86_400 });
        assert_eq!(rl.blacklist_secs, 86_400);
        assert_eq!(rl.escalation_factor, 3);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(config::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = AppConfig::default();
        cfg.server.port = 0;
        assert!(config::validate(&cfg).unwrap_err().to_string().contains("invalid server.port"));

        let mut cfg = AppConfig::default();
        cfg.rate_limits.login.max_attempts = 0;
        assert!(config::validate(&cfg).unwrap_err().to_string().contains("rate_limits.login.max_attempts"));

        let mut cfg = AppConfig::default();
        cfg.rate_limits.sensitive.window_secs = 0;
        assert!(config::validate(&cfg).unwrap_err().to_string().contains("rate_limits.sensitive.window_secs"));

        let mut cfg = AppConfig::default();
        cfg.audit.capacity = 0;
        assert!(config::validate(&cfg).is_err());

        let mut cfg = AppConfig::default();
        cfg.audit.blacklisted_report_secs = 0;
        assert!(config::validate(&cfg).unwrap_err().to_string().contains("audit.blacklisted_report_secs"));

        let mut cfg = AppConfig::default();
        cfg.security.csrf_secret = "   ".to_string();
        assert!(config::validate(&cfg).is_err());

        let mut cfg = AppConfig::default();
        cfg.security.csrf_expiry_secs = 0;
        assert!(config::validate(&cfg).is_err());
    }

    #[test]
    fn test_dev_secret_rejected_in_production() {
        let mut cfg = AppConfig::default();
        cfg.security.production = true;
        let err = config::validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("CSRF_SECRET"));

        cfg.security.csrf_secret = "a-real-production-secret".to_string();
        assert!(config::validate(&cfg).is_ok());
    }

    #[test]
    fn test_valid_config_does_not_error() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        assert!(config::load().is_ok());
    }

    #[test]
    fn test_invalid_server_port() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("WACHPOSTEN__SERVER__PORT", "0");
        let result = config::load();
        env::remove_var("WACHPOSTEN__SERVER__PORT");
        assert!(result.unwrap_err().to_string().contains("invalid server.port"));
    }

    #[test]
    fn test_config_from_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let temp_file = write_temp_config(
            r#"
[server]
host = "0.0.0.0"
port = 9000

[security]
admin_token = "file-token"

[rate_limits.login]
max_attempts = 10
window_secs = 60
block_secs = 120

[audit]
capacity = 50
"#,
        );
        env::set_var("WACHPOSTEN_CONFIG", temp_file.path().to_str().unwrap());
        let config = config::load();
        env::remove_var("WACHPOSTEN_CONFIG");
        let config = config.unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.security.admin_token.as_deref(), Some("file-token"));
        assert_eq!(config.rate_limits.login.max_attempts, 10);
        // Untouched sections keep their defaults
        assert_eq!(config.rate_limits.api.max_attempts, 100);
        assert_eq!(config.audit.capacity, 50);
        assert_eq!(config.audit.blacklisted_report_secs, 60);
    }

    #[test]
    fn test_config_priority() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let temp_file = write_temp_config("[server]\nport = 7000\n");
        env::set_var("WACHPOSTEN_CONFIG", temp_file.path().to_str().unwrap());
        env::set_var("WACHPOSTEN__SERVER__PORT", "8888");

        let config = config::load();
        env::remove_var("WACHPOSTEN_CONFIG");
        env::remove_var("WACHPOSTEN__SERVER__PORT");

        // Environment variable should override file config
        assert_eq!(config.unwrap().server.port, 8888);
    }

    #[test]
    fn test_csrf_secret_and_app_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        env::set_var("APP_ENV", "production");
        let without_secret = config::load();
        env::set_var("CSRF_SECRET", "from-the-environment");
        let with_secret = config::load();
        env::remove_var("APP_ENV");
        env::remove_var("CSRF_SECRET");

        assert!(without_secret.is_err());
        let config = with_secret.unwrap();
        assert!(config.security.production);
        assert_eq!(config.security.csrf_secret, "from-the-environment");
    }

    #[test]
    fn test_rate_limit_durations() {
        let rl = AppConfig::default().rate_limits;
        assert_eq!(rl.blacklist_duration().as_secs(), 86_400);
        assert_eq!(rl.cleanup_interval().as_secs(), 300);
        assert_eq!(rl.eviction_margin().as_secs(), 3600);
    }
}
