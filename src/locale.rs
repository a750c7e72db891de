//! Per-country language and UTC offset tables
//!
//! Loaded from a JSON array of zone entries:
//! `[{"countryCode": "VN", "zoneName": "Asia/Ho_Chi_Minh", "gmtOffset": 25200, "languages": "vi,en,fr"}]`

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

const EUROPEAN_COUNTRY_CODES: &[&str] = &[
    "AL", "AD", "AT", "BY", "BE", "BA", "BG", "HR", "CY", "CZ", "DK", "EE", "FI", "FR", "DE",
    "GR", "HU", "IS", "IE", "IT", "LV", "LI", "LT", "LU", "MT", "MD", "MC", "ME", "NL", "MK",
    "NO", "PL", "PT", "RO", "RU", "SM", "RS", "SK", "SI", "ES", "SE", "CH", "UA", "GB", "VA",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneEntry {
    pub country_code: String,
    pub zone_name: String,
    /// Seconds east of UTC
    pub gmt_offset: i64,
    pub languages: String,
}

#[derive(Debug, Clone, Default)]
pub struct CountryData {
    languages: HashMap<String, String>,
    zone_offsets: HashMap<String, i64>,
    country_offsets: HashMap<String, Vec<i64>>,
}

impl CountryData {
    /// Load the table, falling back to an empty one if the file is missing or malformed
    pub fn load_or_empty(path: &str) -> Self {
        if !Path::new(path).exists() {
            warn!("Country data not found at: {}", path);
            return Self::default();
        }
        match Self::load(path) {
            Ok(data) => {
                info!("Country data loaded: {} zones", data.zone_offsets.len());
                data
            }
            Err(e) => {
                warn!("Failed to load country data: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
        let entries: Vec<ZoneEntry> = serde_json::from_str(&raw).with_context(|| format!("parsing {}", path))?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ZoneEntry>) -> Self {
        let mut data = Self::default();
        for entry in entries {
            let code = entry.country_code.to_uppercase();
            data.languages.entry(code.clone()).or_insert(entry.languages);
            data.zone_offsets.insert(entry.zone_name, entry.gmt_offset);
            data.country_offsets.entry(code).or_default().push(entry.gmt_offset);
        }
        data
    }

    /// Spoken languages for the country, always including `en`
    pub fn languages(&self, country_code: Option<&str>) -> String {
        let languages = country_code
            .and_then(|cc| self.languages.get(&cc.to_uppercase()))
            .map(String::as_str)
            .unwrap_or("en");

        if languages.split(',').any(|lang| lang.trim() == "en") {
            languages.to_string()
        } else {
            format!("en,{}", languages)
        }
    }

    /// Offset in minutes: the zone's own offset, else the country's first zone, else 0
    pub fn utc_offset_minutes(&self, country_code: Option<&str>, time_zone: Option<&str>) -> i64 {
        let (Some(cc), Some(zone)) = (country_code, time_zone) else {
            return 0;
        };

        let seconds = self
            .zone_offsets
            .get(zone)
            .copied()
            .or_else(|| {
                self.country_offsets
                    .get(&cc.to_uppercase())
                    .and_then(|offsets| offsets.first().copied())
            })
            .unwrap_or(0);
        seconds.div_euclid(60)
    }
}

/// Whether the country code is in the European set
pub fn in_eu(country_code: Option<&str>) -> bool {
    country_code.is_some_and(|cc| EUROPEAN_COUNTRY_CODES.contains(&cc.to_uppercase().as_str()))
}
