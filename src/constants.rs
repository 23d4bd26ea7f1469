// =============================================================================
// Deployment Health
// =============================================================================

/// Response time below which the application counts as healthy (2s)
pub const HEALTHY_RESPONSE_TIME_MS: u64 = 2_000;

/// Minutes after a deployment during which an unreachable web server is
/// assumed to still be installing
pub const INSTALL_GRACE_MINUTES: f64 = 5.0;

/// Default interval between health polls of one deployment
pub const DEFAULT_HEALTH_POLL_INTERVAL_SECS: u64 = 30;

/// Default timeout for the HTTP reachability probe
pub const DEFAULT_HTTP_PROBE_TIMEOUT_SECS: u64 = 10;

/// Current version of the structured deployment event schema
pub const DEPLOYMENT_EVENT_VERSION: u32 = 1;

/// Maximum number of log lines kept on a deployment record
pub const MAX_DEPLOYMENT_LOG_LINES: usize = 500;

/// Maximum age of a signed request timestamp in seconds (5 minutes)
/// Prevents replay of deployment events
pub const MAX_TIMESTAMP_AGE_SECS: i64 = 300;

// =============================================================================
// Security Monitor
// =============================================================================

/// Failed logins inside the window that trigger an alert
pub const DEFAULT_FAILED_LOGIN_THRESHOLD: u32 = 5;

/// Events from a single IP inside the window that trigger an alert
pub const DEFAULT_IP_EVENT_THRESHOLD: u32 = 10;

/// Window the security monitor looks back over
pub const DEFAULT_SECURITY_WINDOW_MINUTES: i64 = 60;

/// Maximum number of security logs returned by the listing endpoint
pub const MAX_SECURITY_LOGS_LISTED: usize = 200;

// =============================================================================
// Consent
// =============================================================================

/// Maximum consent submissions per hour per visitor
pub const MAX_CONSENTS_PER_HOUR: u32 = 5;

/// Maximum consent submissions per day per visitor
pub const MAX_CONSENTS_PER_DAY: u32 = 20;

/// Default lifetime of a stored consent choice
pub const DEFAULT_CONSENT_EXPIRY_DAYS: u32 = 365;

// =============================================================================
// Layout Documents
// =============================================================================

/// Maximum serialized size of one layout document (256 KiB)
pub const MAX_LAYOUT_DOCUMENT_BYTES: usize = 262_144;

/// Maximum length of a layout document id
pub const MAX_LAYOUT_ID_LEN: usize = 64;

// =============================================================================
// Error Messages
// =============================================================================

/// Error message for timestamp validation failure
pub const ERR_INVALID_TIMESTAMP: &str = "Timestamp too old or in the future";

/// Error message for an invalid layout id
pub const ERR_INVALID_LAYOUT_ID: &str =
    "Layout id must be 1-64 characters of letters, digits, '-' or '_'";
