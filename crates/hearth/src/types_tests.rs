// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn parse_object_key_splits_type_and_serial() {
    assert_eq!(parse_object_key("device.02AA01AC"), ("device", "02AA01AC"));
    assert_eq!(parse_object_key("shared.02AA01AC"), ("shared", "02AA01AC"));
}

#[test]
fn parse_object_key_without_dot() {
    assert_eq!(parse_object_key("device"), ("device", ""));
}

#[test]
fn parse_object_key_keeps_extra_dots_in_serial() {
    assert_eq!(parse_object_key("structure.a.b"), ("structure", "a.b"));
}

#[test]
fn wire_object_preserves_field_order() {
    let obj = DeviceObject {
        serial: "AAA".into(),
        object_key: "device.AAA".into(),
        object_revision: 7,
        object_timestamp: 1234,
        value: json!({"x": 1}),
        updated_at: 1234,
    };
    let wire = WireObject::from(&obj);
    let rendered = serde_json::to_string(&wire).expect("serialize");

    let rev = rendered.find("object_revision").expect("revision field");
    let ts = rendered.find("object_timestamp").expect("timestamp field");
    let key = rendered.find("object_key").expect("key field");
    let value = rendered.find("value").expect("value field");
    assert!(rev < ts && ts < key && key < value, "field order drifted: {rendered}");
    assert!(!rendered.contains("serial"));
}

#[test]
fn epoch_ms_is_plausible() {
    // 2020-01-01 in millis.
    assert!(epoch_ms() > 1_577_836_800_000);
}
