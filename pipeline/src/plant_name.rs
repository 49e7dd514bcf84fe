// SPDX-License-Identifier: AGPL-3.0-or-later
//! Plant display-name grammar and site-region lookup.
//!
//! Fleet convention names every plant `<SITE>-<NODE>-<PHASE>[-<kW>]` in the
//! leading token, e.g. `NMA001-SS-3P-12.5kW Korat substation`: a site id of
//! an alphabetic prefix plus digits, a node type, an AC phase of `1P` or
//! `3P` and an optional capacity in kWp. A name outside the convention
//! parses to the empty identity and the poller carries on with blanks.

use solarwatch_data::models::{PlantIdentity, SiteRegionMapping};

pub fn parse_plant_id(name: &str) -> PlantIdentity {
    let token = name.split_whitespace().next().unwrap_or_default();
    let segments: Vec<&str> = token.split('-').collect();
    if segments.len() < 3 {
        return PlantIdentity::default();
    }

    let site_id = segments[0];
    let prefix_len = site_id.chars().take_while(|c| c.is_ascii_alphabetic()).count();
    let digits = &site_id[prefix_len..];
    if prefix_len == 0 || digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return PlantIdentity::default();
    }

    let node_type = segments[1];
    if node_type.is_empty() || !node_type.chars().all(|c| c.is_ascii_alphanumeric()) {
        return PlantIdentity::default();
    }

    let ac_phase = segments[2];
    if ac_phase != "1P" && ac_phase != "3P" {
        return PlantIdentity::default();
    }

    let capacity = segments
        .get(3)
        .and_then(|s| s.strip_suffix("kWp").or_else(|| s.strip_suffix("kW")))
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    PlantIdentity {
        site_id: site_id.to_string(),
        node_type: node_type.to_string(),
        ac_phase: ac_phase.to_string(),
        capacity,
    }
}

/// Looks up (city name, city code, area) for a SiteID. An unknown SiteID
/// yields empty strings, never an error.
pub fn parse_site_id(mappings: &[SiteRegionMapping], site_id: &str) -> (String, String, String) {
    mappings
        .iter()
        .find(|m| m.code == site_id)
        .map(|m| (m.city_name.clone(), m.city_code.clone(), m.area.clone()))
        .unwrap_or_default()
}

/// `PerformanceLow` -> `Performance Low`.
pub fn add_space(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(code: &str, city_name: &str, city_code: &str, area: &str) -> SiteRegionMapping {
        SiteRegionMapping {
            id: 0,
            code: code.to_string(),
            city_name: city_name.to_string(),
            city_code: city_code.to_string(),
            area: area.to_string(),
        }
    }

    #[test]
    fn parses_conventional_names() {
        let id = parse_plant_id("NMA001-SS-3P-12.5kW Korat substation");
        assert_eq!(id.site_id, "NMA001");
        assert_eq!(id.node_type, "SS");
        assert_eq!(id.ac_phase, "3P");
        assert_eq!(id.capacity, 12.5);

        let no_capacity = parse_plant_id("BKK042-PEA-1P");
        assert_eq!(no_capacity.site_id, "BKK042");
        assert_eq!(no_capacity.capacity, 0.0);
    }

    #[test]
    fn unconventional_names_yield_empty_identity() {
        assert_eq!(parse_plant_id("Rooftop Demo Site"), PlantIdentity::default());
        assert_eq!(parse_plant_id(""), PlantIdentity::default());
        assert_eq!(parse_plant_id("NMA001-SS-5P"), PlantIdentity::default());
        assert_eq!(parse_plant_id("123-SS-3P"), PlantIdentity::default());
    }

    #[test]
    fn site_lookup_falls_back_to_blanks() {
        let mappings = vec![
            mapping("NMA001", "Nakhon Ratchasima", "NMA", "Northeast"),
            mapping("BKK042", "Bangkok", "BKK", "Central"),
        ];

        let (city, code, area) = parse_site_id(&mappings, "BKK042");
        assert_eq!((city.as_str(), code.as_str(), area.as_str()), ("Bangkok", "BKK", "Central"));

        let unknown = parse_site_id(&mappings, "XYZ999");
        assert_eq!(unknown, (String::new(), String::new(), String::new()));
    }

    #[test]
    fn add_space_splits_camel_case() {
        assert_eq!(add_space("PerformanceLow"), "Performance Low");
        assert_eq!(add_space("SumPerformanceLow"), "Sum Performance Low");
    }
}
