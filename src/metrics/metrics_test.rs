use super::*;

fn create_test_registry() -> Registry {
    let registry = Registry::new_custom(Some("lnplane".to_string()), None).unwrap();
    register_custom_metrics(&registry);
    registry
}

#[test]
fn test_custom_registry() {
    let registry = create_test_registry();

    GATEWAY_REQUESTS
        .with_label_values(&["routing_policy", "rate_limited"])
        .inc();
    let metrics = &registry.gather();
    assert!(!metrics.is_empty());

    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();
    assert!(
        metric_names.contains(&"lnplane_gateway_requests"),
        "Missing lnplane_gateway_requests"
    );
}

#[test]
fn test_counter_increment() {
    REBALANCE_ATTEMPTS.with_label_values(&["test_counter"]).inc();
    REBALANCE_ATTEMPTS.with_label_values(&["test_counter"]).inc();

    let value = REBALANCE_ATTEMPTS.with_label_values(&["test_counter"]).get();
    assert_eq!(value, 2, "Counter should increment correctly");
}

#[test]
fn test_metrics_body_contains_registered_series() {
    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));
    SUPERVISOR_RESTARTS.with_label_values(&["ForwardStream"]).inc();

    let body = metrics_body();
    assert!(body.contains("supervisor_restarts"));
}
