pub mod admin;
pub mod consent;
pub mod deployments;
pub mod health;
pub mod layouts;
pub mod security;
pub mod validation;

pub use admin::admin_stats;
pub use consent::{
    consent_stats, delete_category, get_cookie_settings, list_categories, record_consent,
    update_cookie_settings, upsert_category,
};
pub use deployments::{
    create_deployment, delete_deployment, get_deployment, get_health, get_progress,
    list_deployments, record_event, run_action, start_monitoring, stop_monitoring,
};
pub use health::health_check;
pub use layouts::{delete_layout, get_layout, list_layouts, put_layout};
pub use security::{
    get_security_settings, list_security_logs, record_security_log, run_monitor,
    update_security_settings,
};
pub use validation::{timestamp_to_rfc3339, validate_signed_request};
