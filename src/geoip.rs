//! GeoIP lookup module using MaxMind GeoLite2 database

use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// GeoIP lookup result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoLocation {
    pub country_code: Option<String>,
    pub time_zone: Option<String>,
}

/// GeoIP reader wrapper
pub struct GeoIp {
    reader: Option<Reader<Vec<u8>>>,
}

impl GeoIp {
    /// Create a new GeoIP instance, loading the database if available
    pub fn new(database_path: &str) -> Self {
        let path = Path::new(database_path);

        if !path.exists() {
            warn!("GeoIP database not found at: {}", database_path);
            warn!("Download GeoLite2-City.mmdb from MaxMind and place it at: {}", database_path);
            return Self::disabled();
        }

        match Reader::open_readfile(path) {
            Ok(reader) => {
                info!("GeoIP database loaded: {}", database_path);
                Self { reader: Some(reader) }
            }
            Err(e) => {
                warn!("Failed to load GeoIP database: {}", e);
                Self::disabled()
            }
        }
    }

    /// Instance that never resolves anything
    pub fn disabled() -> Self {
        Self { reader: None }
    }

    /// Look up an IP address and return location info
    pub fn lookup(&self, ip: IpAddr) -> Option<GeoLocation> {
        let reader = self.reader.as_ref()?;

        if is_unroutable(&ip) {
            return None;
        }

        let city: geoip2::City = match reader.lookup(ip) {
            Ok(city) => city,
            Err(e) => {
                tracing::debug!("GeoIP lookup failed for {}: {}", ip, e);
                return None;
            }
        };

        let country_code = city
            .country
            .as_ref()
            .and_then(|c| c.iso_code)
            .map(str::to_string);
        let time_zone = city
            .location
            .as_ref()
            .and_then(|l| l.time_zone)
            .map(str::to_string);

        Some(GeoLocation { country_code, time_zone })
    }

    /// Check if the GeoIP database is loaded
    pub fn is_available(&self) -> bool {
        self.reader.is_some()
    }
}

/// Addresses no GeoIP database can place: private, loopback, link-local and similar
fn is_unroutable(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

/// Thread-safe GeoIP wrapper
pub type SharedGeoIp = Arc<GeoIp>;
