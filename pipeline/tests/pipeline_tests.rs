// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cross-module pipeline behavior: rollup precedence, name grammar, and
//! the document/channel seam between producers and the writer.

use chrono::{TimeZone, Utc};
use solarwatch_data::models::{PlantItem, SiteRegionMapping, DATA_TYPE_PLANT};
use solarwatch_pipeline::event::{event_channel, site_item_of, CollectEvent, Document};
use solarwatch_pipeline::{add_space, parse_plant_id, parse_site_id, rollup_status, StatusRollup};

fn statuses(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[test]
fn rollup_precedence_is_alarm_then_offline_then_online() {
    assert_eq!(rollup_status(&statuses(&["ONLINE", "OFFLINE", "ALARM"])), "ALARM");
    assert_eq!(rollup_status(&statuses(&["ONLINE", "OFFLINE"])), "OFFLINE");
    assert_eq!(rollup_status(&statuses(&["ONLINE", "ONLINE"])), "ONLINE");
    assert_eq!(rollup_status(&[]), "OFFLINE");
}

#[test]
fn streaming_and_counting_rollups_agree_on_vendor_status_sets() {
    let vendor_observations: &[&[&str]] = &[
        &["ONLINE", "STAND BY"],
        &["FAILURE", "OFFLINE", "ONLINE"],
        &["OFFLINE", "OFFLINE"],
        &["ALARM"],
    ];

    for observations in vendor_observations {
        let mut streaming = StatusRollup::new();
        for status in *observations {
            // The streaming variant only sees canonical statuses; anything
            // alerting arrives pre-mapped to ALARM.
            let canonical = match *status {
                "ONLINE" | "OFFLINE" => *status,
                _ => "ALARM",
            };
            streaming.observe(canonical);
        }
        assert_eq!(
            streaming.finish(),
            rollup_status(&statuses(observations)),
            "{observations:?}"
        );
    }
}

#[test]
fn plant_name_grammar_feeds_site_lookup() {
    let mappings = vec![SiteRegionMapping {
        id: 1,
        code: "NMA001".to_string(),
        city_name: "Nakhon Ratchasima".to_string(),
        city_code: "NMA".to_string(),
        area: "Northeast".to_string(),
    }];

    let identity = parse_plant_id("NMA001-SS-3P-25kW Substation A");
    let (city_name, city_code, area) = parse_site_id(&mappings, &identity.site_id);
    assert_eq!(city_name, "Nakhon Ratchasima");
    assert_eq!(city_code, "NMA");
    assert_eq!(area, "Northeast");

    // Unparseable names degrade to blanks and the job carries on.
    let unparsed = parse_plant_id("Warehouse rooftop (legacy)");
    assert_eq!(unparsed.site_id, "");
    let (city_name, city_code, area) = parse_site_id(&mappings, &unparsed.site_id);
    assert_eq!((city_name.as_str(), city_code.as_str(), area.as_str()), ("", "", ""));

    assert_eq!(add_space("SumPerformanceLow"), "Sum Performance Low");
}

#[test]
fn plant_documents_serialize_flat_for_the_bulk_writer() {
    let plant = PlantItem {
        timestamp: Utc.with_ymd_and_hms(2026, 8, 2, 7, 16, 0).unwrap(),
        vendor_type: "KSTAR".to_string(),
        data_type: DATA_TYPE_PLANT.to_string(),
        name: Some("NMA001-SS-3P-10kW".to_string()),
        plant_status: Some("ONLINE".to_string()),
        owner: "true".to_string(),
        ..Default::default()
    };

    let value = serde_json::to_value(Document::Plant(plant.clone())).unwrap();
    // Untagged: no enum wrapper, the writer sees the document itself.
    assert_eq!(value["data_type"], "PLANT");
    assert_eq!(value["vendor_type"], "KSTAR");
    assert!(value.get("Plant").is_none());

    let site = site_item_of(&plant, "true");
    assert_eq!(site.vendor_type, "KSTAR");
    assert_eq!(site.plant_status.as_deref(), Some("ONLINE"));
    assert_eq!(site.name, plant.name);
}

#[tokio::test]
async fn channel_preserves_traversal_order_per_credential() {
    let (tx, mut rx) = event_channel();

    let producer = tokio::spawn(async move {
        for i in 0..5 {
            let mut plant = PlantItem::default();
            plant.id = Some(i.to_string());
            tx.send(CollectEvent::Document(Document::Plant(plant)))
                .await
                .unwrap();
        }
    });

    let mut seen = Vec::new();
    while let Some(event) = rx.recv().await {
        if let CollectEvent::Document(Document::Plant(plant)) = event {
            seen.push(plant.id.unwrap_or_default());
        }
    }
    producer.await.unwrap();

    assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
}
