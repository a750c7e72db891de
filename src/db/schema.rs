//! Database schema definitions

// Ungrouped ledger used by /check
pub const CREATE_IP_LOGS: &str = r#"
CREATE TABLE IF NOT EXISTS ip_logs (
    ip TEXT PRIMARY KEY,
    last_checked BIGINT NOT NULL      -- unix millis
)
"#;

// Grouped ledger used by /ip and /ipinfo. No group is stored as ''.
pub const CREATE_IP_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS ip_records (
    ip TEXT NOT NULL,
    group_id TEXT NOT NULL DEFAULT '',
    last_checked BIGINT NOT NULL,     -- unix millis
    PRIMARY KEY (ip, group_id)
)
"#;

pub const CREATE_STATS: &str = r#"
CREATE TABLE IF NOT EXISTS stats (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    allow INTEGER NOT NULL DEFAULT 0,
    not_allow INTEGER NOT NULL DEFAULT 0,
    fresh INTEGER NOT NULL DEFAULT 0,
    duplicate INTEGER NOT NULL DEFAULT 0,
    last_delete TEXT
)
"#;

pub const SEED_STATS: &str = "INSERT OR IGNORE INTO stats (id) VALUES (1)";

pub const CREATE_DEVICES: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY,
    ip TEXT,
    country_code TEXT,
    ram_total INTEGER NOT NULL DEFAULT 0,
    ram_used INTEGER NOT NULL DEFAULT 0,
    cpu_percent REAL NOT NULL DEFAULT 0,
    description TEXT,
    last_update INTEGER,              -- unix seconds
    counter1 INTEGER NOT NULL DEFAULT 0,
    counter2 INTEGER NOT NULL DEFAULT 0,
    counter3 INTEGER NOT NULL DEFAULT 0,
    counter4 INTEGER NOT NULL DEFAULT 0,
    counter5 INTEGER NOT NULL DEFAULT 0,
    runtime INTEGER NOT NULL DEFAULT 0,
    restart BOOLEAN NOT NULL DEFAULT FALSE,
    threads_active INTEGER NOT NULL DEFAULT 0,
    threads_total INTEGER NOT NULL DEFAULT 0,
    bytes_sent INTEGER NOT NULL DEFAULT 0,
    bytes_received INTEGER NOT NULL DEFAULT 0
)
"#;

// For the janitor's age scans
pub const CREATE_INDEX_IP_LOGS_CHECKED: &str =
    "CREATE INDEX IF NOT EXISTS idx_ip_logs_checked ON ip_logs(last_checked)";

pub const CREATE_INDEX_IP_RECORDS_CHECKED: &str =
    "CREATE INDEX IF NOT EXISTS idx_ip_records_checked ON ip_records(last_checked)";

// For the offline sweep
pub const CREATE_INDEX_DEVICES_UPDATE: &str =
    "CREATE INDEX IF NOT EXISTS idx_devices_last_update ON devices(last_update)";
