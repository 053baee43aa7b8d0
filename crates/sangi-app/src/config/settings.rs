//! Settings parser for .sangi/config.toml

use std::path::{Path, PathBuf};

use sangi_core::prelude::*;
use sangi_link::Credentials;

use super::types::Settings;

const CONFIG_FILENAME: &str = "config.toml";
const SANGI_DIR: &str = ".sangi";

// ─────────────────────────────────────────────────────────────────────────────
// Settings Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load settings from `.sangi/config.toml` under `project_path`, then apply
/// environment overrides.
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(project_path: &Path) -> Settings {
    let mut settings = read_settings_file(&project_path.join(SANGI_DIR).join(CONFIG_FILENAME));
    apply_env_overrides(&mut settings);
    settings
}

/// Load settings from a file the user named explicitly, then apply
/// environment overrides.
///
/// Unlike [`load_settings`], a missing or unparsable file is an error.
pub fn load_settings_from(config_path: &Path) -> Result<Settings> {
    if !config_path.exists() {
        return Err(Error::ConfigNotFound {
            path: config_path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    let mut settings: Settings = toml::from_str(&content).map_err(|e| Error::ConfigInvalid {
        path: config_path.to_path_buf(),
        message: e.to_string(),
    })?;
    debug!("Loaded settings from {:?}", config_path);
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn read_settings_file(config_path: &Path) -> Settings {
    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment Overrides
// ─────────────────────────────────────────────────────────────────────────────

/// Apply `SANGI_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides_with(settings, |key| std::env::var(key).ok());
}

/// Apply overrides using `lookup` for variable values. Empty values count as
/// unset.
///
/// Credentials are read from `SANGI_AWS_*` first, then the standard `AWS_*`
/// names. Both an access key and a secret are required; a lone half is
/// ignored with a warning.
pub fn apply_overrides_with<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
    let get_either = |primary: &str, fallback: &str| get(primary).or_else(|| get(fallback));

    if let Some(endpoint) = get("SANGI_MQTT_ENDPOINT") {
        debug!("Broker endpoint overridden from environment");
        settings.broker.endpoint = endpoint;
    }
    if let Some(prefix) = get("SANGI_CLIENT_ID_PREFIX") {
        settings.broker.client_id_prefix = prefix;
    }
    if let Some(region) = get_either("SANGI_AWS_REGION", "AWS_REGION") {
        settings.broker.region = region;
    }

    let access_key = get_either("SANGI_AWS_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID");
    let secret_key = get_either("SANGI_AWS_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY");
    let session_token = get_either("SANGI_AWS_SESSION_TOKEN", "AWS_SESSION_TOKEN");

    match (access_key, secret_key) {
        (Some(access_key), Some(secret_key)) => {
            debug!("Using AWS credentials from environment");
            settings.broker.credentials =
                Some(Credentials::new(access_key, secret_key, session_token));
        }
        (Some(_), None) | (None, Some(_)) => {
            warn!("Ignoring incomplete AWS credentials (need both access key and secret)");
        }
        (None, None) => {}
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Init Directory
// ─────────────────────────────────────────────────────────────────────────────

/// Create `.sangi/config.toml` with commented defaults if missing.
///
/// Returns the config file path. Existing files are left untouched.
pub fn init_config_dir(project_path: &Path) -> Result<PathBuf> {
    let sangi_dir = project_path.join(SANGI_DIR);

    if !sangi_dir.exists() {
        std::fs::create_dir_all(&sangi_dir).context("Failed to create .sangi directory")?;
        info!("Created .sangi directory");
    }

    let config_path = sangi_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        std::fs::write(&config_path, generate_default_config())
            .context("Failed to write config.toml")?;
        info!("Created default config.toml");
    }

    Ok(config_path)
}

pub fn generate_default_config() -> String {
    r#"# Sangi Console Configuration
#
# AWS credentials are never read from this file. Set SANGI_AWS_ACCESS_KEY_ID,
# SANGI_AWS_SECRET_ACCESS_KEY and optionally SANGI_AWS_SESSION_TOKEN (or the
# standard AWS_* variables) instead.

[broker]
endpoint = "wss://localhost:8883"   # SANGI_MQTT_ENDPOINT
client_id_prefix = "sangi-web"      # SANGI_CLIENT_ID_PREFIX
region = "us-east-1"                # SANGI_AWS_REGION
keep_alive_secs = 60                # 0 disables keep-alive pings
connect_timeout_ms = 4000
signature_expires_secs = 300

[simulator]
connect_delay_ms = 500
telemetry_interval_ms = 5000
log_interval_min_ms = 1000
log_interval_max_ms = 3000
emotion_change_probability = 0.3
echo_delay_ms = 100
# seed = 42                         # Uncomment for reproducible runs
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_load_settings_defaults() {
        let temp = tempdir().unwrap();
        let settings = read_settings_file(&temp.path().join(".sangi/config.toml"));

        assert_eq!(settings.broker.endpoint, "wss://localhost:8883");
        assert_eq!(settings.broker.connect_timeout_ms, 4000);
        assert_eq!(settings.simulator.echo_delay_ms, 100);
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let sangi_dir = temp.path().join(".sangi");
        std::fs::create_dir_all(&sangi_dir).unwrap();

        let config = r#"
[broker]
endpoint = "wss://abc-ats.iot.eu-west-1.amazonaws.com/mqtt"
region = "eu-west-1"

[simulator]
telemetry_interval_ms = 1000
seed = 7
"#;
        std::fs::write(sangi_dir.join("config.toml"), config).unwrap();

        let settings = read_settings_file(&sangi_dir.join("config.toml"));

        assert_eq!(
            settings.broker.endpoint,
            "wss://abc-ats.iot.eu-west-1.amazonaws.com/mqtt"
        );
        assert_eq!(settings.broker.region, "eu-west-1");
        // Unset fields keep their defaults
        assert_eq!(settings.broker.client_id_prefix, "sangi-web");
        assert_eq!(settings.simulator.telemetry_interval_ms, 1000);
        assert_eq!(settings.simulator.seed, Some(7));
        assert_eq!(settings.simulator.log_interval_max_ms, 3000);
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "not valid toml {{{{").unwrap();

        let settings = read_settings_file(&path);
        assert_eq!(settings.broker.region, "us-east-1");
    }

    #[test]
    fn test_load_settings_wrong_type_falls_back() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[broker]\nkeep_alive_secs = \"soon\"\n").unwrap();

        let settings = read_settings_file(&path);
        assert_eq!(settings.broker.keep_alive_secs, 60);
    }

    #[test]
    fn test_load_settings_from_explicit_path() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("robot.toml");
        std::fs::write(&path, "[simulator]\nseed = 3\n").unwrap();

        let settings = load_settings_from(&path).unwrap();
        assert_eq!(settings.simulator.seed, Some(3));
    }

    #[test]
    fn test_load_settings_from_missing_is_fatal() {
        let temp = tempdir().unwrap();
        let err = load_settings_from(&temp.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_load_settings_from_invalid_is_fatal() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("robot.toml");
        std::fs::write(&path, "not valid toml {{{{").unwrap();

        let err = load_settings_from(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_init_config_dir() {
        let temp = tempdir().unwrap();

        let path = init_config_dir(temp.path()).unwrap();

        assert_eq!(path, temp.path().join(".sangi/config.toml"));
        assert!(path.exists());
    }

    #[test]
    fn test_init_config_dir_keeps_existing() {
        let temp = tempdir().unwrap();
        let sangi_dir = temp.path().join(".sangi");
        std::fs::create_dir_all(&sangi_dir).unwrap();
        std::fs::write(sangi_dir.join("config.toml"), "[broker]\nregion = \"ap-south-1\"\n")
            .unwrap();

        let path = init_config_dir(temp.path()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("ap-south-1"));
    }

    #[test]
    fn test_default_config_parses_to_defaults() {
        let settings: Settings = toml::from_str(&generate_default_config()).unwrap();
        let defaults = Settings::default();
        assert_eq!(settings.broker.endpoint, defaults.broker.endpoint);
        assert_eq!(settings.broker.keep_alive_secs, defaults.broker.keep_alive_secs);
        assert_eq!(settings.simulator, defaults.simulator);
    }

    #[test]
    fn test_overrides_broker_fields() {
        let mut settings = Settings::default();
        apply_overrides_with(
            &mut settings,
            lookup_from(&[
                ("SANGI_MQTT_ENDPOINT", "wss://broker.example/mqtt"),
                ("SANGI_CLIENT_ID_PREFIX", "desk"),
                ("AWS_REGION", "eu-central-1"),
            ]),
        );
        assert_eq!(settings.broker.endpoint, "wss://broker.example/mqtt");
        assert_eq!(settings.broker.client_id_prefix, "desk");
        assert_eq!(settings.broker.region, "eu-central-1");
        assert!(settings.broker.credentials.is_none());
    }

    #[test]
    fn test_overrides_prefer_sangi_names() {
        let mut settings = Settings::default();
        apply_overrides_with(
            &mut settings,
            lookup_from(&[
                ("SANGI_AWS_REGION", "us-west-2"),
                ("AWS_REGION", "eu-central-1"),
                ("SANGI_AWS_ACCESS_KEY_ID", "SANGIKEY"),
                ("AWS_ACCESS_KEY_ID", "AWSKEY"),
                ("AWS_SECRET_ACCESS_KEY", "secret"),
                ("AWS_SESSION_TOKEN", "token"),
            ]),
        );
        assert_eq!(settings.broker.region, "us-west-2");
        let creds = settings.broker.credentials.unwrap();
        assert_eq!(creds.access_key_id, "SANGIKEY");
        assert_eq!(creds.secret_access_key, "secret");
        assert_eq!(creds.session_token.as_deref(), Some("token"));
    }

    #[test]
    fn test_incomplete_credentials_ignored() {
        let mut settings = Settings::default();
        apply_overrides_with(
            &mut settings,
            lookup_from(&[("SANGI_AWS_ACCESS_KEY_ID", "AKID")]),
        );
        assert!(settings.broker.credentials.is_none());
    }

    #[test]
    fn test_empty_values_ignored() {
        let mut settings = Settings::default();
        apply_overrides_with(
            &mut settings,
            lookup_from(&[("SANGI_MQTT_ENDPOINT", "  "), ("SANGI_AWS_REGION", "")]),
        );
        assert_eq!(settings.broker.endpoint, "wss://localhost:8883");
        assert_eq!(settings.broker.region, "us-east-1");
    }

    #[test]
    #[serial]
    fn test_load_settings_reads_process_env() {
        let temp = tempdir().unwrap();
        std::env::set_var("SANGI_MQTT_ENDPOINT", "wss://env.example/mqtt");
        let settings = load_settings(temp.path());
        std::env::remove_var("SANGI_MQTT_ENDPOINT");

        assert_eq!(settings.broker.endpoint, "wss://env.example/mqtt");
    }
}
