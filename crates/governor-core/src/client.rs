//! Typed client façade
//!
//! Every call checks its permission, assigns a fresh request id, opens an
//! ephemeral reply channel, sends the command and waits for the correlated
//! reply under a deadline. A timeout fails the call locally but never
//! cancels the worker; the dropped reply channel makes any late reply
//! undeliverable.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use governor_registry::Changeset;

use crate::bus::MessageBus;
use crate::config::DEFAULT_REPLY_TIMEOUT;
use crate::permissions::{Permission, PermissionChecker};
use crate::protocol::{
    CommandEnvelope, Detail, OperationKind, OptionsMap, ReplyEnvelope, StateReport, COMMAND_TOPIC,
};
use crate::{Error, Result};

/// Result of `request_changes` / `request_version`.
#[derive(Debug, Clone)]
pub struct ChangeOutcome {
    pub version: Option<String>,
    pub message: Option<String>,
    pub details: Vec<Detail>,
    pub changeset: Option<Value>,
}

/// Result of `request_upload` / `request_download`.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub version: Option<String>,
    pub stats: Option<Value>,
    pub message: Option<String>,
    pub details: Vec<Detail>,
    pub changeset: Option<Value>,
}

impl From<ReplyEnvelope> for ChangeOutcome {
    fn from(reply: ReplyEnvelope) -> Self {
        Self {
            version: reply.version,
            message: reply.message,
            details: reply.details,
            changeset: reply.changeset,
        }
    }
}

impl From<ReplyEnvelope> for SyncOutcome {
    fn from(reply: ReplyEnvelope) -> Self {
        Self {
            version: reply.version,
            stats: reply.stats,
            message: reply.message,
            details: reply.details,
            changeset: reply.changeset,
        }
    }
}

/// Client for the governance command topic.
pub struct GovernanceClient {
    bus: Arc<dyn MessageBus>,
    permissions: Arc<dyn PermissionChecker>,
    user_id: Option<String>,
    timeout: Duration,
}

impl GovernanceClient {
    pub fn new(bus: Arc<dyn MessageBus>, permissions: Arc<dyn PermissionChecker>) -> Self {
        Self {
            bus,
            permissions,
            user_id: None,
            timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// Set the caller identity sent with every command.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Override the reply deadline (default 600 s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Report coordinator and registry status. Never blocked by an
    /// in-flight operation.
    pub async fn get_state(&self) -> Result<StateReport> {
        let reply = self
            .call(OperationKind::GetState, Permission::Read, |_| {})
            .await?;
        let reply = require_success(reply)?;
        let state = reply
            .state
            .ok_or_else(|| Error::rejected("Reply carried no state", Vec::new()))?;
        Ok(serde_json::from_value(state)?)
    }

    /// Submit a changeset through the change pipeline.
    ///
    /// Accepts anything convertible to a [`Changeset`] — including
    /// [`governor_registry::ChangesetBuilder`], whose queued operations are
    /// extracted for transport.
    pub async fn request_changes(
        &self,
        changes: impl Into<Changeset>,
        options: Option<OptionsMap>,
    ) -> Result<ChangeOutcome> {
        let changeset = changes.into();
        let ops = match serde_json::to_value(&changeset)? {
            Value::Array(ops) => ops,
            _ => Vec::new(),
        };
        self.request_raw_changes(ops, options).await
    }

    /// Submit a raw operation list, shape-checking before forwarding.
    pub async fn request_raw_changes(
        &self,
        ops: Vec<Value>,
        options: Option<OptionsMap>,
    ) -> Result<ChangeOutcome> {
        for (index, op) in ops.iter().enumerate() {
            if !op.is_object() || op.get("kind").and_then(Value::as_str).is_none() {
                return Err(Error::rejected(
                    format!("Operation {index} is not a valid change operation"),
                    Vec::new(),
                ));
            }
        }

        let reply = self
            .call(OperationKind::ApplyChanges, Permission::Write, move |env| {
                env.changeset = Some(ops);
                env.options = options.unwrap_or_default();
            })
            .await?;
        Ok(require_success(reply)?.into())
    }

    /// Re-apply a historical registry version.
    pub async fn request_version(
        &self,
        version_id: impl Into<String>,
        options: Option<OptionsMap>,
    ) -> Result<ChangeOutcome> {
        let version_id = version_id.into();
        let reply = self
            .call(OperationKind::ApplyVersion, Permission::Version, move |env| {
                env.version_id = Some(version_id);
                env.options = options.unwrap_or_default();
            })
            .await?;
        Ok(require_success(reply)?.into())
    }

    /// Materialize the registry to the sync directory.
    pub async fn request_download(&self, options: Option<OptionsMap>) -> Result<SyncOutcome> {
        let reply = self
            .call(OperationKind::Download, Permission::Sync, move |env| {
                env.options = options.unwrap_or_default();
            })
            .await?;
        Ok(require_success(reply)?.into())
    }

    /// Scan the sync directory and apply the resulting changeset.
    pub async fn request_upload(&self, options: Option<OptionsMap>) -> Result<SyncOutcome> {
        let reply = self
            .call(OperationKind::Upload, Permission::Sync, move |env| {
                env.options = options.unwrap_or_default();
            })
            .await?;
        Ok(require_success(reply)?.into())
    }

    async fn call(
        &self,
        operation: OperationKind,
        permission: Permission,
        fill: impl FnOnce(&mut CommandEnvelope),
    ) -> Result<ReplyEnvelope> {
        if !self.permissions.allows(self.user_id.as_deref(), permission) {
            return Err(Error::PermissionDenied {
                user: self
                    .user_id
                    .clone()
                    .unwrap_or_else(|| "anonymous".to_string()),
                permission: permission.to_string(),
            });
        }

        let request_id = Uuid::new_v4().to_string();
        let (respond_to, mut replies) = self.bus.open_reply_channel()?;
        let mut envelope = CommandEnvelope {
            id: request_id.clone(),
            operation: operation.as_str().to_string(),
            respond_to: respond_to.clone(),
            user_id: self.user_id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            changeset: None,
            version_id: None,
            options: OptionsMap::new(),
        };
        fill(&mut envelope);

        if let Err(e) = self
            .bus
            .send(COMMAND_TOPIC, serde_json::to_value(&envelope)?)
        {
            self.bus.close(&respond_to);
            return Err(e);
        }

        let outcome = tokio::time::timeout(self.timeout, replies.recv()).await;
        self.bus.close(&respond_to);

        match outcome {
            Err(_) => Err(Error::Timeout {
                seconds: self.timeout.as_secs(),
            }),
            Ok(None) => Err(Error::ReplyDropped),
            Ok(Some(message)) => {
                let reply: ReplyEnvelope = serde_json::from_value(message)?;
                if reply.request_id != request_id {
                    return Err(Error::Correlation {
                        expected: request_id,
                        got: reply.request_id,
                    });
                }
                Ok(reply)
            }
        }
    }
}

fn require_success(reply: ReplyEnvelope) -> Result<ReplyEnvelope> {
    if reply.success {
        Ok(reply)
    } else {
        let message = reply
            .message
            .clone()
            .or_else(|| reply.error.clone())
            .unwrap_or_else(|| "Operation failed".to_string());
        Err(Error::Rejected {
            message,
            details: reply.details,
        })
    }
}
