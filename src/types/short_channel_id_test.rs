use super::*;

#[test]
fn test_known_channel_converts_both_ways() {
    // 770000x1234x1
    let packed = (770_000u64 << 40) | (1_234u64 << 16) | 1;
    assert_eq!(lnd_to_short_channel_id(packed), "770000x1234x1");
    assert_eq!(short_channel_id_to_lnd("770000x1234x1").unwrap(), packed);
}

#[test]
fn test_text_survives_numeric_round_trip_at_the_bounds() {
    for text in [
        "0x0x0",
        "1x1x1",
        "16777215x16777215x65535",
        "500000x0x65535",
        "1x16777215x0",
    ] {
        let numeric = short_channel_id_to_lnd(text).unwrap();
        assert_eq!(lnd_to_short_channel_id(numeric), text);
    }
}

#[test]
fn test_out_of_range_components_are_rejected() {
    assert!(short_channel_id_to_lnd("16777216x0x0").is_err());
    assert!(short_channel_id_to_lnd("0x16777216x0").is_err());
    assert!(short_channel_id_to_lnd("0x0x65536").is_err());
    assert!(ShortChannelId::new(1 << 24, 0, 0).is_err());
}

#[test]
fn test_malformed_text_is_rejected() {
    for text in ["", "1x2", "1x2x3x4", "ax1x1", "1:2:3", "-1x0x0"] {
        assert!(short_channel_id_to_lnd(text).is_err(), "{text} should fail");
    }
}

#[test]
fn test_channel_point_parses_and_prints() {
    let txid = "ab".repeat(32);
    let point: ChannelPoint = format!("{txid}:3").parse().unwrap();
    assert_eq!(point.funding_output_index, 3);
    assert_eq!(point.to_string(), format!("{txid}:3"));

    assert!("nocolon".parse::<ChannelPoint>().is_err());
    assert!(format!("{txid}:x").parse::<ChannelPoint>().is_err());
}

#[test]
fn test_channel_point_from_bytes_reverses_byte_order() {
    let mut bytes = vec![0u8; 32];
    bytes[0] = 0x01;
    let point = ChannelPoint::from_txid_bytes(&bytes, 0).unwrap();
    assert!(point.funding_transaction_hash.ends_with("01"));
    assert!(ChannelPoint::from_txid_bytes(&[1, 2, 3], 0).is_err());
}
