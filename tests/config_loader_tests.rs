use marketsync::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const CRYPTO_KEY: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

const MANAGED_VARS: &[&str] = &[
    "MARKETSYNC_PROFILE",
    "MARKETSYNC_API_BIND_ADDR",
    "MARKETSYNC_LOG_LEVEL",
    "MARKETSYNC_CRYPTO_KEY",
    "MARKETSYNC_OPERATOR_TOKEN",
    "MARKETSYNC_OPERATOR_TOKENS",
    "MARKETSYNC_CRON_SECRET",
    "MARKETSYNC_SYNC_PAGES_PER_CHUNK",
    "MARKETSYNC_SYNC_WRITE_BATCH_LIMIT",
    "MARKETSYNC_PROXY_URLS",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for var in MANAGED_VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

/// Clears managed variables and sets the two secrets every profile needs.
fn base_env() {
    clear_env();
    unsafe {
        env::set_var("MARKETSYNC_CRYPTO_KEY", CRYPTO_KEY);
        env::set_var("MARKETSYNC_OPERATOR_TOKEN", "operator-token");
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

fn loader(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(dir.path().to_path_buf())
}

#[test]
fn loads_defaults_when_no_env_files_present() {
    let _guard = env_guard();
    base_env();
    let dir = TempDir::new().unwrap();

    let cfg = loader(&dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.operator_tokens, vec!["operator-token".to_string()]);
    assert_eq!(cfg.crypto_key.as_ref().map(Vec::len), Some(32));
    assert_eq!(cfg.sync.pages_per_chunk, 5);
    assert_eq!(cfg.sync.write_batch_limit, 500);
    assert!(cfg.cron_secret.is_none());
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    base_env();
    let dir = TempDir::new().unwrap();

    write_env_file(&dir, ".env", "MARKETSYNC_API_BIND_ADDR=127.0.0.1:3000\n");
    // Profile is selected by .env.local before the profile files load
    write_env_file(
        &dir,
        ".env.local",
        "MARKETSYNC_PROFILE=test\nMARKETSYNC_API_BIND_ADDR=127.0.0.1:4000\n",
    );
    write_env_file(&dir, ".env.test", "MARKETSYNC_API_BIND_ADDR=192.168.0.10:5000\n");
    write_env_file(
        &dir,
        ".env.test.local",
        "MARKETSYNC_API_BIND_ADDR=10.0.0.5:6000\nMARKETSYNC_LOG_LEVEL=debug\n",
    );

    let cfg = loader(&dir).load().expect("layered config loads");
    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.log_level, "debug");
    clear_env();
}

#[test]
fn process_env_overrides_files() {
    let _guard = env_guard();
    base_env();
    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        "MARKETSYNC_API_BIND_ADDR=127.0.0.1:3000\nMARKETSYNC_OPERATOR_TOKENS=file-a,file-b\n",
    );

    unsafe {
        env::set_var("MARKETSYNC_API_BIND_ADDR", "127.0.0.1:9000");
        env::set_var("MARKETSYNC_OPERATOR_TOKENS", "env-a, env-b ,");
    }

    let cfg = loader(&dir).load().expect("config loads");
    assert_eq!(cfg.api_bind_addr, "127.0.0.1:9000");
    assert_eq!(
        cfg.operator_tokens,
        vec!["env-a".to_string(), "env-b".to_string()]
    );
    clear_env();
}

#[test]
fn invalid_bind_addr_is_rejected() {
    let _guard = env_guard();
    base_env();
    let dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("MARKETSYNC_API_BIND_ADDR", "not-an-addr");
    }

    let err = loader(&dir).load().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBindAddr { .. }));
    clear_env();
}

#[test]
fn sync_settings_are_parsed_and_validated() {
    let _guard = env_guard();
    base_env();
    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        "MARKETSYNC_SYNC_PAGES_PER_CHUNK=2\nMARKETSYNC_PROXY_URLS=http://user:pw@proxy.local:3128\n",
    );

    let cfg = loader(&dir).load().expect("config loads");
    assert_eq!(cfg.sync.pages_per_chunk, 2);
    assert_eq!(cfg.proxy.urls.len(), 1);
    let redacted = cfg.redacted_json().expect("redacted json");
    assert!(!redacted.contains("pw@"));

    unsafe {
        env::set_var("MARKETSYNC_SYNC_WRITE_BATCH_LIMIT", "501");
    }
    let err = loader(&dir).load().unwrap_err();
    assert!(matches!(
        err,
        ConfigError::InvalidWriteBatchLimit { value: 501 }
    ));
    clear_env();
}

#[test]
fn missing_secrets_are_reported() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();

    let err = loader(&dir).load().unwrap_err();
    assert!(matches!(err, ConfigError::MissingCryptoKey));

    unsafe {
        env::set_var("MARKETSYNC_CRYPTO_KEY", CRYPTO_KEY);
    }
    let err = loader(&dir).load().unwrap_err();
    assert!(matches!(err, ConfigError::MissingOperatorTokens));

    unsafe {
        env::set_var("MARKETSYNC_CRYPTO_KEY", "c2hvcnQ=");
        env::set_var("MARKETSYNC_OPERATOR_TOKEN", "operator-token");
    }
    let err = loader(&dir).load().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidCryptoKeyLength { length: 5 }));
    clear_env();
}

#[test]
fn production_requires_cron_secret() {
    let _guard = env_guard();
    base_env();
    let dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("MARKETSYNC_PROFILE", "prod");
    }

    let err = loader(&dir).load().unwrap_err();
    assert!(matches!(err, ConfigError::MissingCronSecret));

    unsafe {
        env::set_var("MARKETSYNC_CRON_SECRET", "cron-secret");
    }
    let cfg = loader(&dir).load().expect("prod config loads with cron secret");
    assert_eq!(cfg.profile, "prod");
    assert_eq!(cfg.cron_secret.as_deref(), Some("cron-secret"));
    clear_env();
}
