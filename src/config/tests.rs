use clap::Parser;

use super::*;

#[test]
fn defaults_resolve_without_any_input() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(
        settings.cache.memory_limit.get(),
        DEFAULT_CACHE_MEMORY_LIMIT
    );
    assert_eq!(
        settings.breaker.failure_threshold.get(),
        DEFAULT_BREAKER_FAILURE_THRESHOLD
    );
    assert_eq!(
        settings.retry.max_attempts.get(),
        DEFAULT_RETRY_MAX_ATTEMPTS
    );
    assert!(settings.retry.jitter);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_port_is_rejected_with_its_key() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(0);

    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "server.port"),
        other => panic!("expected invalid server.port, got {other:?}"),
    }
}

#[test]
fn zero_breaker_threshold_is_rejected() {
    let mut raw = RawSettings::default();
    raw.breaker.failure_threshold = Some(0);

    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "breaker.failure_threshold"),
        other => panic!("expected invalid breaker.failure_threshold, got {other:?}"),
    }
}

#[test]
fn retry_max_delay_must_cover_base_delay() {
    let mut raw = RawSettings::default();
    raw.retry.base_delay_ms = Some(500);
    raw.retry.max_delay_ms = Some(100);

    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "retry.max_delay_ms"),
        other => panic!("expected invalid retry.max_delay_ms, got {other:?}"),
    }
}

#[test]
fn sub_one_backoff_multiplier_is_rejected() {
    let mut raw = RawSettings::default();
    raw.retry.backoff_multiplier = Some(0.5);

    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "retry.backoff_multiplier"),
        other => panic!("expected invalid retry.backoff_multiplier, got {other:?}"),
    }
}

#[test]
fn store_url_includes_password_when_present() {
    let mut raw = RawSettings::default();
    raw.store.password = Some("hunter2".to_string());
    raw.store.db = Some(3);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(
        settings.store.connection_url(),
        "redis://:hunter2@127.0.0.1:6379/3"
    );
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["voltgate"]);
    assert!(args.command.is_none());
}

#[test]
fn parse_serve_arguments() {
    let args = CliArgs::parse_from([
        "voltgate",
        "serve",
        "--server-port",
        "9090",
        "--store-host",
        "cache.internal",
        "--rate-limit-max-requests",
        "240",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_port, Some(9090));
            assert_eq!(
                serve.overrides.store_host.as_deref(),
                Some("cache.internal")
            );
            assert_eq!(serve.overrides.rate_limit_max_requests, Some(240));
        }
    }
}
