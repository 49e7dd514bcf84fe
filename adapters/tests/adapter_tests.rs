// SPDX-License-Identifier: AGPL-3.0-or-later
//! Construction and decoding behavior across the vendor adapters.

use solarwatch_adapters::growatt::{self, GrowattClient};
use solarwatch_adapters::kstar::{self, KstarClient};
use solarwatch_adapters::solarman::{self, SolarmanClient, TimeType};

#[test]
fn growatt_client_construction() {
    assert!(GrowattClient::new("operator", "token-123").is_ok());
    assert!(GrowattClient::with_base_url("operator", "token-123", "http://localhost:8080/").is_ok());
}

#[test]
fn growatt_status_and_type_tables() {
    assert_eq!(growatt::parse_device_type(1), "INVERTER");
    assert_eq!(growatt::parse_device_type(4), "MAX");
    assert_eq!(growatt::inverter_status_label(-1), "Disconnect");
    assert_eq!(growatt::inverter_status_label(1), "Online");
}

#[test]
fn kstar_client_hashes_its_password_up_front() {
    assert!(KstarClient::new("operator", "secret").is_ok());
    assert_eq!(
        kstar::encode_password("password"),
        "5F4DCC3B5AA765D61D8327DEB882CF99"
    );
}

#[test]
fn solarman_client_and_time_types() {
    assert!(SolarmanClient::new("op@example.com", "secret", "app-id", "app-secret").is_ok());
    assert_eq!(
        solarman::hash_password("password"),
        "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
    );

    let ts = 1_785_628_800; // 2026-08-02T00:00:00Z
    assert_eq!(TimeType::Day.build(ts), "2026-08-02");
    assert_eq!(TimeType::Month.build(ts), "2026-08");
    assert_eq!(TimeType::Year.build(ts), "2026");
}

#[test]
fn huawei_envelope_failure_is_typed() {
    let raw = r#"{"success": false, "failCode": 305, "message": "USER_MUST_RELOGIN"}"#;
    let envelope: solarwatch_adapters::huawei::Envelope<Vec<solarwatch_adapters::huawei::Plant>> =
        serde_json::from_str(raw).unwrap();
    assert!(!envelope.success);
    assert_eq!(envelope.fail_code, 305);
    assert!(envelope.data.is_none());
}

#[test]
fn huawei_plant_list_decodes_station_fields() {
    let raw = r#"{
        "success": true,
        "failCode": 0,
        "data": [
            {"stationCode": "NE=101", "stationName": "NMA001-SS-3P-25kW", "stationAddr": "Korat", "capacity": 0.025}
        ]
    }"#;
    let envelope: solarwatch_adapters::huawei::Envelope<Vec<solarwatch_adapters::huawei::Plant>> =
        serde_json::from_str(raw).unwrap();
    let plants = envelope.data.unwrap();
    assert_eq!(plants[0].code.as_deref(), Some("NE=101"));
    assert_eq!(plants[0].capacity, Some(0.025));
}

#[test]
fn solarman_plant_list_page_decodes() {
    let raw = r#"{
        "total": 1,
        "stationList": [{
            "id": 7, "name": "STN007-PEA-3P-40kW",
            "locationLat": 13.75, "locationLng": 100.5,
            "locationAddress": "Bangkok", "installedCapacity": 40.0,
            "createdDate": 1600000000.0
        }]
    }"#;
    let page: solarwatch_adapters::solarman::PlantListResponse = serde_json::from_str(raw).unwrap();
    assert_eq!(page.total, Some(1));
    assert_eq!(page.station_list[0].id, Some(7));
    assert_eq!(page.station_list[0].installed_capacity, Some(40.0));
}
