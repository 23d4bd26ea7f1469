//! Deployment progress from structured status events.
//!
//! The deployment backend reports each step as a versioned
//! [`DeploymentEvent`]. Progress is derived from the recorded events only;
//! free-text logs from older agents go through [`events_from_legacy_log`]
//! first.

use serde::{Deserialize, Serialize};

use crate::constants::DEPLOYMENT_EVENT_VERSION;
use crate::models::Deployment;

/// Deployment steps, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStep {
    InstanceCreated,
    SecurityGroupConfigured,
    SsmAgentReady,
    PackagesInstalled,
    WebServerStarted,
    ApplicationDeployed,
}

impl DeploymentStep {
    pub const ALL: [DeploymentStep; 6] = [
        DeploymentStep::InstanceCreated,
        DeploymentStep::SecurityGroupConfigured,
        DeploymentStep::SsmAgentReady,
        DeploymentStep::PackagesInstalled,
        DeploymentStep::WebServerStarted,
        DeploymentStep::ApplicationDeployed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DeploymentStep::InstanceCreated => "Create EC2 instance",
            DeploymentStep::SecurityGroupConfigured => "Configure security group",
            DeploymentStep::SsmAgentReady => "Wait for SSM agent",
            DeploymentStep::PackagesInstalled => "Install packages",
            DeploymentStep::WebServerStarted => "Start web server",
            DeploymentStep::ApplicationDeployed => "Deploy application",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Started,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub version: u32,
    pub step: DeploymentStep,
    pub outcome: EventOutcome,
    #[serde(default)]
    pub message: String,
    /// Unix timestamp (seconds) reported by the emitter
    pub at: i64,
    /// Set by `instance_created` once the cloud instance exists
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
}

impl DeploymentEvent {
    pub fn new(step: DeploymentStep, outcome: EventOutcome, message: impl Into<String>, at: i64) -> Self {
        Self {
            version: DEPLOYMENT_EVENT_VERSION,
            step,
            outcome,
            message: message.into(),
            at,
            instance_id: None,
            public_ip: None,
        }
    }

    /// Reject events from schema versions this server does not understand
    pub fn validate(&self) -> Result<(), String> {
        if self.version != DEPLOYMENT_EVENT_VERSION {
            return Err(format!(
                "Unsupported event version {} (expected {})",
                self.version, DEPLOYMENT_EVENT_VERSION
            ));
        }
        if self.message.len() > 2_000 {
            return Err("Event message too long".to_string());
        }
        Ok(())
    }

    /// One-line rendering appended to the deployment log
    pub fn log_line(&self) -> String {
        let mark = match self.outcome {
            EventOutcome::Started => "…",
            EventOutcome::Succeeded => "✓",
            EventOutcome::Failed => "✗",
        };
        if self.message.is_empty() {
            format!("{} {}", mark, self.step.label())
        } else {
            format!("{} {}: {}", mark, self.step.label(), self.message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProgress {
    pub step: DeploymentStep,
    pub label: String,
    pub state: StepState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentProgress {
    pub steps: Vec<StepProgress>,
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
    /// First step that has not completed, if any
    pub current_step: Option<DeploymentStep>,
    pub failed: bool,
}

/// Fold events into per-step state. Later events for a step override
/// earlier ones, so a retried step can recover from a failure.
pub fn compute_progress(events: &[DeploymentEvent]) -> DeploymentProgress {
    let mut states = [StepState::Pending; 6];

    for event in events {
        let index = event.step as usize;
        states[index] = match event.outcome {
            EventOutcome::Started => StepState::Running,
            EventOutcome::Succeeded => StepState::Completed,
            EventOutcome::Failed => StepState::Failed,
        };
    }

    let steps: Vec<StepProgress> = DeploymentStep::ALL
        .iter()
        .zip(states.iter())
        .map(|(&step, &state)| StepProgress {
            step,
            label: step.label().to_string(),
            state,
        })
        .collect();

    let total = steps.len();
    let completed = steps.iter().filter(|s| s.state == StepState::Completed).count();
    let current_step = steps
        .iter()
        .find(|s| s.state != StepState::Completed)
        .map(|s| s.step);
    let failed = steps.iter().any(|s| s.state == StepState::Failed);

    DeploymentProgress {
        steps,
        completed,
        total,
        percent: (completed * 100 / total) as u8,
        current_step,
        failed,
    }
}

/// Markers printed by agents that predate structured events
const LEGACY_MARKERS: [(&str, DeploymentStep); 6] = [
    ("✓ Instance created successfully", DeploymentStep::InstanceCreated),
    ("✓ Security group configured", DeploymentStep::SecurityGroupConfigured),
    ("✓ SSM agent is online", DeploymentStep::SsmAgentReady),
    ("✓ Packages installed", DeploymentStep::PackagesInstalled),
    ("✓ Web server started", DeploymentStep::WebServerStarted),
    ("✓ Deployment completed successfully", DeploymentStep::ApplicationDeployed),
];

/// First `i-…` token on a line that is a well-formed instance id
fn instance_id_in(line: &str) -> Option<String> {
    line.split(|c: char| c.is_whitespace() || "()[],;:".contains(c))
        .map(|token| token.trim_end_matches('.'))
        .find(|token| Deployment::validate_instance_id(token))
        .map(str::to_string)
}

/// Convert prose log output into structured events.
///
/// Success markers map one-to-one onto steps. A line starting with `✗` or
/// `ERROR` is recorded as a failure of the first step that is not completed,
/// counting both `prior` events and earlier lines of this chunk. Agents send
/// their log in pieces, so `prior` must hold everything already recorded.
pub fn events_from_legacy_log(log: &str, at: i64, prior: &[DeploymentEvent]) -> Vec<DeploymentEvent> {
    let mut completed = [false; 6];
    for state in compute_progress(prior).steps {
        completed[state.step as usize] = state.state == StepState::Completed;
    }

    let mut events = Vec::new();
    for line in log.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some((_, step)) = LEGACY_MARKERS.iter().find(|(marker, _)| line.contains(marker)) {
            completed[*step as usize] = true;
            let mut event = DeploymentEvent::new(*step, EventOutcome::Succeeded, line, at);
            event.instance_id = instance_id_in(line);
            events.push(event);
            continue;
        }

        if line.starts_with('✗') || line.starts_with("ERROR") {
            let step = DeploymentStep::ALL
                .iter()
                .copied()
                .find(|s| !completed[*s as usize])
                .unwrap_or(DeploymentStep::ApplicationDeployed);
            events.push(DeploymentEvent::new(step, EventOutcome::Failed, line, at));
        }
    }

    events
}
