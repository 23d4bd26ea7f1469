use redb::TableDefinition;

/// Every table maps a string key to a bincode-encoded record
pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Deployments table: deployment_id -> DeploymentRecord
pub const DEPLOYMENTS: RecordTable = TableDefinition::new("deployments");

/// Deployment events: deployment_id -> Vec<DeploymentEvent>
pub const DEPLOYMENT_EVENTS: RecordTable = TableDefinition::new("deployment_events");

/// Security logs: time-ordered key -> SecurityLog
pub const SECURITY_LOGS: RecordTable = TableDefinition::new("security_logs");

/// Singleton settings rows: setting name -> settings record
pub const SETTINGS: RecordTable = TableDefinition::new("settings");

/// Cookie categories: category_id -> CookieCategory
pub const COOKIE_CATEGORIES: RecordTable = TableDefinition::new("cookie_categories");

/// Consent logs: time-ordered key -> ConsentLog
pub const CONSENT_LOGS: RecordTable = TableDefinition::new("consent_logs");

/// Rate limits table: visitor_hash -> RateLimitRecord
pub const RATE_LIMITS: RecordTable = TableDefinition::new("rate_limits");

/// Layout documents: "<kind>/<id>" -> LayoutRecord
pub const LAYOUTS: RecordTable = TableDefinition::new("layouts");

/// All tables, created on first run
pub const ALL: [RecordTable; 8] = [
    DEPLOYMENTS,
    DEPLOYMENT_EVENTS,
    SECURITY_LOGS,
    SETTINGS,
    COOKIE_CATEGORIES,
    CONSENT_LOGS,
    RATE_LIMITS,
    LAYOUTS,
];

/// Key of the security settings row in [`SETTINGS`]
pub const SECURITY_SETTINGS_KEY: &str = "security";

/// Key of the cookie banner settings row in [`SETTINGS`]
pub const COOKIE_SETTINGS_KEY: &str = "cookie_banner";
