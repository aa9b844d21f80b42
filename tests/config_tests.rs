use ondevice_ai::agent::ProviderKind;
use ondevice_ai::config::AppConfig;
use ondevice_ai::permissions::PermissionSnapshot;
use ondevice_ai::test_utils::env_lock;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const OVERRIDE_VARS: [&str; 8] = [
    "ONDEVICE_PROVIDER",
    "ONDEVICE_MODEL",
    "ONDEVICE_API_KEY_SOURCE",
    "ONDEVICE_TEMPERATURE",
    "ONDEVICE_LOG_LEVEL",
    "ONDEVICE_DB_PATH",
    "ONDEVICE_MAX_ITERATIONS",
    "ONDEVICE_TIMEOUT_MS",
];

fn clear_overrides() {
    for var in OVERRIDE_VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

#[test]
fn test_load_valid_basic_config() {
    let fixture_path = PathBuf::from("tests/fixtures/config/valid_basic.toml");
    let config = AppConfig::load_from_file(&fixture_path).unwrap();

    assert_eq!(config.model.provider, "openai");
    assert_eq!(config.model.temperature, 0.8);
    assert_eq!(config.embeddings.dimensions, Some(64));
    assert_eq!(config.logging.level, "debug");
    // Unset sections fall back to defaults.
    assert_eq!(config.agent.max_iterations, 5);
    assert_eq!(config.agent.timeout_ms, 45_000);
    assert_eq!(config.agent.retry_attempts, 2);
    assert_eq!(config.rag.context_count, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_multi_provider_config() {
    let fixture_path = PathBuf::from("tests/fixtures/config/valid_multi_provider.toml");
    let config = AppConfig::load_from_file(&fixture_path).unwrap();

    assert!(config.validate().is_ok());
    assert_eq!(config.agent.max_iterations, 3);
    assert_eq!(
        config.agent.system_prompt.as_deref(),
        Some("You are a calendar assistant.")
    );
    assert_eq!(config.rag.context_count, 4);
    assert_eq!(config.preferred_rag_provider(), Some(ProviderKind::Grok));
    assert_eq!(config.rag.providers.len(), 2);
    assert_eq!(
        config.rag.providers["grok"].model_name.as_deref(),
        Some("grok-3-mini")
    );

    // First matching rule wins: the explicit deny shadows the wildcard allow.
    assert!(config.permissions.is_granted("calendar.read"));
    assert!(!config.permissions.is_granted("calendar.write"));
    assert!(!config.permissions.is_granted("contacts.read"));
}

#[test]
fn test_invalid_fixtures_fail_validation() {
    for fixture in [
        "invalid_provider.toml",
        "invalid_temperature.toml",
        "invalid_agent_bounds.toml",
        "invalid_rag_provider.toml",
    ] {
        let path = PathBuf::from("tests/fixtures/config").join(fixture);
        let config = AppConfig::load_from_file(&path).unwrap();
        assert!(
            config.validate().is_err(),
            "{} should not validate",
            fixture
        );
    }
}

#[test]
fn test_validation_rejects_degenerate_values() {
    let mut config = AppConfig::default();
    assert!(config.validate().is_ok());

    config.agent.timeout_ms = 0;
    assert!(config.validate().is_err());
    config.agent.timeout_ms = 1000;

    config.embeddings.dimensions = Some(0);
    assert!(config.validate().is_err());
    config.embeddings.dimensions = None;

    config.retry.max_attempts = 0;
    assert!(config.validate().is_err());
    config.retry.max_attempts = 1;

    config.logging.level = "loud".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_missing_file_is_created_from_default() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("nested").join("ondevice-ai.config.toml");

    let config = AppConfig::load_from_file(&config_path).unwrap();

    assert!(config_path.exists());
    assert_eq!(config.model.provider, "mock");
    assert_eq!(config.embeddings.provider, "hash");
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_env_override_precedence() {
    let _guard = env_lock().lock().unwrap();
    clear_overrides();

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[model]
provider = "openai"
temperature = 0.8

[logging]
level = "info"
"#,
    )
    .unwrap();

    unsafe {
        env::set_var("ONDEVICE_PROVIDER", "anthropic");
        env::set_var("ONDEVICE_TEMPERATURE", "0.5");
        env::set_var("ONDEVICE_LOG_LEVEL", "debug");
        env::set_var("ONDEVICE_MAX_ITERATIONS", "2");
        env::set_var("ONDEVICE_TIMEOUT_MS", "1500");
    }

    let mut config = AppConfig::load_from_file(&config_path).unwrap();
    config.apply_env_overrides();

    assert_eq!(config.model.provider, "anthropic");
    assert_eq!(config.model.temperature, 0.5);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.agent.max_iterations, 2);
    assert_eq!(config.agent.timeout_ms, 1500);

    clear_overrides();
}

#[test]
#[serial]
fn test_unparseable_overrides_are_ignored() {
    let _guard = env_lock().lock().unwrap();
    clear_overrides();

    unsafe {
        env::set_var("ONDEVICE_TEMPERATURE", "warm");
        env::set_var("ONDEVICE_MAX_ITERATIONS", "-1");
        env::set_var("ONDEVICE_DB_PATH", "/tmp/override.duckdb");
    }

    let mut config = AppConfig::default();
    config.apply_env_overrides();

    assert_eq!(config.model.temperature, 0.7);
    assert_eq!(config.agent.max_iterations, 5);
    assert_eq!(config.database.path, PathBuf::from("/tmp/override.duckdb"));

    clear_overrides();
}

#[test]
fn test_config_summary() {
    let config = AppConfig::default();
    let summary = config.summary();

    assert!(summary.contains("Configuration loaded:"));
    assert!(summary.contains("Model Provider: mock"));
    assert!(summary.contains("Agent: max 5 iterations, 45000 ms timeout, 2 parse retries"));
    assert!(summary.contains("Logging Level: info"));
}
