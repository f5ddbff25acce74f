use std::sync::Mutex;
use std::time::Duration;

use workq::config::{Config, StoreKind};

/// Environment variables are process-global; run these one at a time.
static ENV: Mutex<()> = Mutex::new(());

const VARS: &[&str] = &[
    "STORE",
    "DATABASE_URL",
    "REDIS_URL",
    "REDIS_PREFIX",
    "WORKERS",
    "QUEUE_CAPACITY",
    "RETRY_MAX_ATTEMPTS",
    "RETRY_BASE_MS",
    "RETRY_FACTOR",
    "RETRY_MAX_MS",
    "RETRY_JITTER",
];

fn clear_env() {
    for var in VARS {
        unsafe { std::env::remove_var(var) };
    }
}

#[test]
fn config_defaults_to_memory_store() {
    let _lock = ENV.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let config = Config::from_env().unwrap();
    assert_eq!(config.store, StoreKind::Memory);
    assert_eq!(config.redis_prefix, "workq");
    assert_eq!(config.engine.workers, 8);
    assert_eq!(config.engine.retry.max_attempts, 5);
    assert!(!config.log_level.is_empty());
}

#[test]
fn config_reads_engine_overrides() {
    let _lock = ENV.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    unsafe {
        std::env::set_var("WORKERS", "3");
        std::env::set_var("QUEUE_CAPACITY", "16");
        std::env::set_var("RETRY_MAX_ATTEMPTS", "7");
        std::env::set_var("RETRY_BASE_MS", "25");
        std::env::set_var("RETRY_JITTER", "false");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.engine.workers, 3);
    assert_eq!(config.engine.capacity, 16);
    assert_eq!(config.engine.retry.max_attempts, 7);
    assert_eq!(config.engine.retry.base_backoff, Duration::from_millis(25));
    assert!(!config.engine.retry.jitter);

    clear_env();
}

#[test]
fn config_fails_without_backend_url() {
    let _lock = ENV.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    unsafe { std::env::set_var("STORE", "postgres") };
    assert!(Config::from_env().is_err());

    unsafe { std::env::set_var("STORE", "redis") };
    assert!(Config::from_env().is_err());

    unsafe { std::env::set_var("REDIS_URL", "redis://localhost:6379") };
    let config = Config::from_env().unwrap();
    assert_eq!(config.store, StoreKind::Redis);

    clear_env();
}

#[test]
fn config_rejects_malformed_numbers() {
    let _lock = ENV.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    unsafe { std::env::set_var("WORKERS", "lots") };
    assert!(Config::from_env().is_err());

    clear_env();
}
