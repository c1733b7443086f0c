//! Message bus seam
//!
//! The real transport is an external collaborator; the governance service
//! only needs named point-to-point channels (commands and replies) plus
//! fire-and-forget broadcast topics (version events). [`MemoryBus`] is the
//! in-process tokio implementation used by tests and embedded deployments.
//!
//! Sends never suspend: the coordinator's handlers stay non-blocking, and
//! a send to a channel whose receiver is gone simply fails, which is how a
//! late reply to a timed-out client gets discarded.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::{Error, Result};

/// Named channels plus broadcast topics.
pub trait MessageBus: Send + Sync {
    /// Deliver a message to a named channel. Fails when the channel does
    /// not exist or its receiver is gone.
    fn send(&self, channel: &str, message: Value) -> Result<()>;

    /// Open (or replace) a named channel and receive its messages.
    fn subscribe(&self, channel: &str) -> Result<UnboundedReceiver<Value>>;

    /// Open a uniquely named ephemeral channel for a single reply.
    fn open_reply_channel(&self) -> Result<(String, UnboundedReceiver<Value>)>;

    /// Drop a named channel; subsequent sends to it fail.
    fn close(&self, channel: &str);

    /// Broadcast an event to a topic. Succeeds with zero subscribers.
    fn publish(&self, topic: &str, event: &str, payload: Value) -> Result<()>;

    /// Observe a broadcast topic.
    fn watch(&self, topic: &str) -> Result<UnboundedReceiver<Value>>;
}

/// In-process bus backed by unbounded tokio channels.
#[derive(Default)]
pub struct MemoryBus {
    channels: Mutex<HashMap<String, UnboundedSender<Value>>>,
    topics: Mutex<HashMap<String, Vec<UnboundedSender<Value>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageBus for MemoryBus {
    fn send(&self, channel: &str, message: Value) -> Result<()> {
        let mut channels = self.channels.lock().expect("bus lock poisoned");
        let Some(sender) = channels.get(channel) else {
            return Err(Error::ChannelClosed {
                channel: channel.to_string(),
            });
        };
        if sender.send(message).is_err() {
            // Receiver dropped; prune the stale entry
            channels.remove(channel);
            return Err(Error::ChannelClosed {
                channel: channel.to_string(),
            });
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<UnboundedReceiver<Value>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .expect("bus lock poisoned")
            .insert(channel.to_string(), tx);
        Ok(rx)
    }

    fn open_reply_channel(&self) -> Result<(String, UnboundedReceiver<Value>)> {
        let name = format!("reply:{}", uuid::Uuid::new_v4());
        let rx = self.subscribe(&name)?;
        Ok((name, rx))
    }

    fn close(&self, channel: &str) {
        self.channels
            .lock()
            .expect("bus lock poisoned")
            .remove(channel);
    }

    fn publish(&self, topic: &str, event: &str, payload: Value) -> Result<()> {
        let message = serde_json::json!({ "event": event, "payload": payload });
        let mut topics = self.topics.lock().expect("bus lock poisoned");
        let Some(subscribers) = topics.get_mut(topic) else {
            debug!(topic, event, "no subscribers for event");
            return Ok(());
        };
        subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        Ok(())
    }

    fn watch(&self, topic: &str) -> Result<UnboundedReceiver<Value>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .expect("bus lock poisoned")
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
