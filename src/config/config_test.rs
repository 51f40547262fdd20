use std::time::Duration;

use serial_test::serial;
use temp_env::with_vars;

use super::*;
use crate::Chain;
use crate::Network;

fn cleanup_all_plane_env_vars() {
    for (key, _) in std::env::vars() {
        if key.starts_with("LNPLANE__") || key == CONFIG_PATH_ENV {
            std::env::remove_var(&key);
        }
    }
}

const NODE_TOML: &str = r#"
    [[nodes]]
    name = "alpha"
    public_key = "02aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
    grpc_address = "https://127.0.0.1:10009"
    tls_cert_path = "/tmp/alpha/tls.cert"
    macaroon_path = "/tmp/alpha/admin.macaroon"
    network = "regtest"
"#;

#[test]
#[serial]
fn test_default_settings_should_carry_hardcoded_values() {
    let settings = Settings::default();

    assert_eq!(settings.supervisor.tick_interval(), Duration::from_secs(1));
    assert_eq!(settings.importer.freshness_window(), Duration::from_secs(70));
    assert_eq!(settings.cache.inactive_grace(), Duration::from_secs(15));
    assert_eq!(settings.gateway.max_concurrency, 2);
    assert_eq!(settings.gateway.min_time_lock_delta, 18);
    assert_eq!(settings.gateway.policy_rate_limit_count, 2);
    assert_eq!(settings.rebalancer.history_prune_every, 100);
    assert_eq!(settings.maintenance.query_spacing_in_ms, 200);
    assert!(settings.nodes.is_empty());
    assert!(settings.validate().is_ok());
}

#[test]
#[serial]
fn test_load_should_merge_environment_overrides() {
    cleanup_all_plane_env_vars();
    with_vars(
        vec![
            ("LNPLANE__GATEWAY__MAX_CONCURRENCY", Some("4")),
            ("LNPLANE__BUS__SUBSCRIBER_BUFFER", Some("64")),
        ],
        || {
            let settings = Settings::load(None).unwrap();

            assert_eq!(settings.gateway.max_concurrency, 4);
            assert_eq!(settings.bus.subscriber_buffer, 64);
        },
    );
}

#[test]
#[serial]
fn test_load_should_merge_file_settings() {
    cleanup_all_plane_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("plane.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
            [app]
            db_dir = "/tmp/lnplane/db"

            [workers]
            forwards_page_size = 100
            {NODE_TOML}
            "#
        ),
    )
    .unwrap();

    let settings = Settings::load(Some(config_path.to_str().unwrap())).unwrap();

    assert_eq!(settings.app.db_dir.to_str(), Some("/tmp/lnplane/db"));
    assert_eq!(settings.workers.forwards_page_size, 100);
    assert_eq!(settings.nodes.len(), 1);
    let node = &settings.nodes[0];
    assert_eq!(node.name, "alpha");
    assert_eq!(node.network, Network::Regtest);
    assert!(node.enabled);
    assert!(node.streams.forwards);
}

#[test]
#[serial]
fn test_environment_should_win_over_file() {
    cleanup_all_plane_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("plane.toml");
    std::fs::write(&config_path, "[gateway]\nmax_concurrency = 3\n").unwrap();

    with_vars(
        vec![
            (CONFIG_PATH_ENV, Some(config_path.to_str().unwrap())),
            ("LNPLANE__GATEWAY__MAX_CONCURRENCY", Some("5")),
        ],
        || {
            let settings = Settings::load(None).unwrap();
            assert_eq!(settings.gateway.max_concurrency, 5);
        },
    );
}

#[test]
#[serial]
fn test_missing_explicit_file_should_fail() {
    cleanup_all_plane_env_vars();
    assert!(Settings::load(Some("/definitely/not/here.toml")).is_err());
}

#[test]
fn test_duplicate_node_keys_are_rejected() {
    let settings: Settings = config::Config::builder()
        .add_source(config::File::from_str(
            &format!("{NODE_TOML}{NODE_TOML}"),
            config::FileFormat::Toml,
        ))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap();

    let err = settings.validate().unwrap_err();
    assert!(err.to_string().contains("more than once"));
}

#[test]
fn test_zero_concurrency_is_rejected() {
    let mut settings = Settings::default();
    settings.gateway.max_concurrency = 0;
    assert!(settings.validate().is_err());
}

#[test]
fn test_node_address_must_be_http() {
    let node = NodeConnectionConfig {
        name: "beta".to_string(),
        public_key: "03".repeat(33),
        grpc_address: "127.0.0.1:10009".to_string(),
        tls_cert_path: "/tmp/tls.cert".into(),
        macaroon_path: "/tmp/admin.macaroon".into(),
        chain: Chain::Bitcoin,
        network: Network::Mainnet,
        enabled: true,
        streams: StreamFlags::default(),
        import_historic_forwards: false,
        ping_system: PING_SYSTEM_AMBOSS,
    };

    assert!(node.validate().is_err());
    assert!(node.pings(PING_SYSTEM_AMBOSS));
    assert!(!node.pings(PING_SYSTEM_VECTOR));
}

#[test]
fn test_backoff_doubles_until_capped() {
    let policy = BackoffPolicy {
        base_delay_ms: 1_000,
        max_delay_ms: 5_000,
    };

    assert_eq!(policy.delay_for(0), Duration::ZERO);
    assert_eq!(policy.delay_for(1), Duration::from_secs(1));
    assert_eq!(policy.delay_for(2), Duration::from_secs(2));
    assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    assert_eq!(policy.delay_for(4), Duration::from_secs(5));
    assert_eq!(policy.delay_for(40), Duration::from_secs(5));
}
