use chrono::Duration;
use chrono::Utc;

use super::*;
use crate::PolicyField;
use crate::RoutingPolicy;
use crate::RoutingPolicyRecord;

fn record(
    fee_rate: i64,
    disabled: bool,
) -> RoutingPolicyRecord {
    RoutingPolicyRecord {
        node_id: 1,
        channel_id: 2,
        announcing_node_id: 1,
        outbound: true,
        policy: RoutingPolicy {
            disabled,
            fee_rate_milli_msat: fee_rate,
            ..Default::default()
        },
        ts: Utc::now(),
    }
}

#[test]
fn test_field_changes_counts_consecutive_differences() {
    let history = vec![
        record(10, false),
        record(20, false),
        record(20, true),
        record(30, false),
    ];

    let counts = field_changes(&history);

    assert_eq!(counts.get(&PolicyField::FeeRateMilliMsat), Some(&2));
    assert_eq!(counts.get(&PolicyField::Disabled), Some(&2));
    assert_eq!(counts.get(&PolicyField::TimeLockDelta), None);
}

#[test]
fn test_single_row_has_no_changes() {
    assert!(field_changes(&[record(10, false)]).is_empty());
}

fn an_hour_ago() -> chrono::DateTime<Utc> {
    Utc::now() - Duration::hours(1)
}

#[test]
fn test_reserve_rejects_once_limit_is_reached() {
    let ledger = ChangeLedger::default();
    let fee = vec![PolicyField::FeeBaseMsat];

    ledger.reserve(1, 2, fee.clone(), &[0], an_hour_ago(), 2).unwrap().keep();
    ledger.reserve(1, 2, fee.clone(), &[0], an_hour_ago(), 2).unwrap().keep();
    let err = ledger.reserve(1, 2, fee.clone(), &[0], an_hour_ago(), 2).unwrap_err();

    assert_eq!(err, (PolicyField::FeeBaseMsat, 2));
    assert!(ledger.reserve(1, 3, fee, &[0], an_hour_ago(), 2).is_ok());
}

#[test]
fn test_dropped_reservation_frees_its_slot() {
    let ledger = ChangeLedger::default();
    let fee = vec![PolicyField::FeeRateMilliMsat];

    let held = ledger.reserve(1, 2, fee.clone(), &[0], an_hour_ago(), 1).unwrap();
    assert!(ledger.reserve(1, 2, fee.clone(), &[0], an_hour_ago(), 1).is_err());
    drop(held);

    assert!(ledger.reserve(1, 2, fee, &[0], an_hour_ago(), 1).is_ok());
}

#[test]
fn test_kept_reservation_counts_only_inside_window() {
    let ledger = ChangeLedger::default();
    let fields = vec![PolicyField::FeeBaseMsat, PolicyField::Disabled];
    ledger.reserve(1, 2, fields, &[0, 0], an_hour_ago(), 1).unwrap().keep();

    let disabled = vec![PolicyField::Disabled];
    assert_eq!(
        ledger.reserve(1, 2, disabled.clone(), &[0], an_hour_ago(), 1).unwrap_err(),
        (PolicyField::Disabled, 1)
    );
    let later = Utc::now() + Duration::minutes(5);
    assert!(ledger.reserve(1, 2, disabled, &[0], later, 1).is_ok());
}

#[test]
fn test_reserve_honors_persisted_counts() {
    let ledger = ChangeLedger::default();
    let fields = vec![PolicyField::TimeLockDelta, PolicyField::MaxHtlcMsat];

    let err = ledger.reserve(1, 2, fields.clone(), &[0, 3], an_hour_ago(), 3).unwrap_err();

    assert_eq!(err, (PolicyField::MaxHtlcMsat, 3));
    assert!(ledger.reserve(1, 2, fields, &[2, 2], an_hour_ago(), 3).is_ok());
}
