//! Subprocess client for the cloud CLI.

use crate::{Error, Result};
use serde_json::Value;
use std::process::Command;

/// Executes a control-plane command and returns its parsed JSON output.
///
/// `Ok(None)` means the command targeted a resource that does not exist;
/// any other failure is an error at the call site.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    fn run(&self, args: &[String]) -> Result<Option<Value>>;
}

/// Client for the `az` CLI. Constructed once at startup with an
/// authenticated session and passed by reference thereafter.
pub struct AzureCli {
    subscription_id: String,
    subscription_name: String,
}

impl AzureCli {
    /// Authenticate and resolve the default subscription. Falls back to an
    /// interactive login when no cached credentials exist.
    pub fn connect() -> Result<Self> {
        if !Self::is_authenticated()? {
            Self::login()?;
        }

        let subscriptions = invoke(&["account".to_string(), "list".to_string()])?
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        let default = subscriptions
            .iter()
            .find(|s| s["isDefault"].as_bool().unwrap_or(false))
            .ok_or_else(|| Error::Auth("no default subscription".to_string()))?;

        let client = Self {
            subscription_id: default["id"].as_str().unwrap_or_default().to_string(),
            subscription_name: default["name"].as_str().unwrap_or_default().to_string(),
        };
        tracing::info!(
            subscription = %client.subscription_name,
            id = %client.subscription_id,
            "using default subscription"
        );
        Ok(client)
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn subscription_name(&self) -> &str {
        &self.subscription_name
    }

    /// `account list` returns an empty list for unauthenticated sessions.
    fn is_authenticated() -> Result<bool> {
        let accounts = invoke(&["account".to_string(), "list".to_string()])?;
        Ok(matches!(accounts, Some(Value::Array(ref a)) if !a.is_empty()))
    }

    /// Interactive login; stdio is inherited so the device-code prompt is
    /// visible to the operator.
    fn login() -> Result<()> {
        let status = Command::new("az")
            .arg("login")
            .status()
            .map_err(|e| Error::Auth(format!("failed to spawn az login: {}", e)))?;
        if !status.success() {
            return Err(Error::Auth("login did not complete".to_string()));
        }
        Ok(())
    }
}

impl CommandRunner for AzureCli {
    fn run(&self, args: &[String]) -> Result<Option<Value>> {
        invoke(args)
    }
}

fn invoke(args: &[String]) -> Result<Option<Value>> {
    let output = Command::new("az")
        .args(args)
        .args(["--output", "json"])
        .output()
        .map_err(|e| Error::Cloud(format!("failed to spawn az: {}", e)))?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(trimmed)?))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_found(&stderr) {
            Ok(None)
        } else {
            Err(Error::Cloud(format!(
                "az {}: {}",
                args.join(" "),
                stderr.trim()
            )))
        }
    }
}

/// Absence is an answer, not an error: `show`/`delete` against a missing
/// resource surfaces as `None` so callers can branch on existence.
fn is_not_found(stderr: &str) -> bool {
    stderr.contains("ResourceNotFound")
        || stderr.contains("ResourceGroupNotFound")
        || stderr.contains("NotFound")
        || stderr.contains("could not be found")
        || stderr.contains("does not exist")
}
