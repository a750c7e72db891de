//! ipwatch - IP dedup gate, device heartbeat registry and proxy country rotation

pub mod config;
pub mod country;
pub mod db;
pub mod error;
pub mod geoip;
pub mod jobs;
pub mod locale;
pub mod notify;
pub mod web;
