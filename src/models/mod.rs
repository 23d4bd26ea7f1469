pub mod consent;
pub mod deployment;
pub mod layout;
pub mod rate_limit;
pub mod security_log;

pub use consent::{ConsentChoice, ConsentLog, ConsentStats, CookieCategory, CookieSettings};
pub use deployment::{Deployment, DeploymentStatus};
pub use layout::{LayoutKind, LayoutRecord};
pub use rate_limit::{ConsentLimits, RateLimitRecord};
pub use security_log::{SecurityLog, SecuritySettings};
