//! Client for the serverless functions that front AWS.
//!
//! Every function takes a JSON body and answers with either
//! `{ "success": true, ... }` or `{ "error": "..." }`.

use serde_json::Value;
use std::str::FromStr;

use crate::error::{AppError, Result};

pub const FN_INSTANCE_STATUS: &str = "aws-instance-status";
pub const FN_SSM_DEPLOY: &str = "aws-ssm-deploy";
pub const FN_UNBLOCK_HTTP: &str = "aws-unblock-http";
pub const FN_SSH_DIAGNOSTIC: &str = "aws-ssh-diagnostic";
pub const FN_PACKAGE_DEPLOY: &str = "auto-package-deploy";

/// Operator actions that map onto a serverless function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentAction {
    Deploy,
    UnblockHttp,
    SshDiagnostic,
    PackageDeploy,
}

impl DeploymentAction {
    pub fn function_name(self) -> &'static str {
        match self {
            DeploymentAction::Deploy => FN_SSM_DEPLOY,
            DeploymentAction::UnblockHttp => FN_UNBLOCK_HTTP,
            DeploymentAction::SshDiagnostic => FN_SSH_DIAGNOSTIC,
            DeploymentAction::PackageDeploy => FN_PACKAGE_DEPLOY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentAction::Deploy => "deploy",
            DeploymentAction::UnblockHttp => "unblock-http",
            DeploymentAction::SshDiagnostic => "ssh-diagnostic",
            DeploymentAction::PackageDeploy => "package-deploy",
        }
    }
}

impl FromStr for DeploymentAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(DeploymentAction::Deploy),
            "unblock-http" => Ok(DeploymentAction::UnblockHttp),
            "ssh-diagnostic" => Ok(DeploymentAction::SshDiagnostic),
            "package-deploy" => Ok(DeploymentAction::PackageDeploy),
            other => Err(format!("Unknown deployment action: {}", other)),
        }
    }
}

#[derive(Clone)]
pub struct FunctionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl FunctionClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    /// Invoke a function and unwrap its response envelope
    pub async fn invoke(&self, name: &str, body: &Value) -> Result<Value> {
        let mut request = self.client.post(self.url_for(name)).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(function = %name, "Invoking function");
        let response = request.send().await?;
        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() && payload.get("error").is_none() {
            return Err(AppError::Function {
                function: name.to_string(),
                message: format!("HTTP {}", status),
            });
        }

        unwrap_envelope(name, payload)
    }
}

/// Turn a `{ success, ... } | { error }` envelope into a Result
pub fn unwrap_envelope(function: &str, payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(AppError::Function {
            function: function.to_string(),
            message,
        });
    }

    match payload.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(payload),
        Some(false) => Err(AppError::Function {
            function: function.to_string(),
            message: payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("function reported failure")
                .to_string(),
        }),
        None => Err(AppError::Function {
            function: function.to_string(),
            message: "malformed response".to_string(),
        }),
    }
}
