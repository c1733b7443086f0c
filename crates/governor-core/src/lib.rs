//! Registry governance service: coordinator, change pipeline and client
//!
//! A single-writer coordinator mediates every mutation of the versioned
//! entry registry. Clients submit commands over the governance command
//! topic; the coordinator serializes them, spawns monitored workers, runs
//! the configured processor chain before every apply, fans applied
//! changesets out to listeners, and broadcasts version-change events.
//!
//! # Architecture
//!
//! ```text
//!  GovernanceClient ──command topic──▶ Coordinator ──spawn──▶ workers
//!        ▲                                │                 (upload /
//!        └────────reply channel───────────┤                  download /
//!                                         │                  pipeline)
//!                            version events on wippy.central
//! ```
//!
//! The entry store, message bus transport, permission model and worker
//! runtime are external collaborators behind the [`Registry`],
//! [`bus::MessageBus`], [`permissions::PermissionChecker`] and
//! [`worker::ProcessHost`] seams; in-process implementations back tests
//! and embedded deployments.
//!
//! [`Registry`]: governor_registry::Registry

pub mod bus;
pub mod client;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod extensions;
pub mod logging;
pub mod permissions;
pub mod pipeline;
pub mod protocol;
pub mod state;
pub mod worker;

pub use bus::{MemoryBus, MessageBus};
pub use client::{ChangeOutcome, GovernanceClient, SyncOutcome};
pub use config::GovernorConfig;
pub use context::{PipelineContext, StepResult};
pub use coordinator::{start, Coordinator};
pub use error::{Error, Result};
pub use events::VersionEvent;
pub use extensions::{
    ExtensionHandler, HandlerRegistry, LISTENER_META_TYPE, PROCESSOR_META_TYPE,
};
pub use permissions::{AllowAll, GrantList, Permission, PermissionChecker};
pub use pipeline::{ChangePipeline, PipelineInput, PipelineResult};
pub use protocol::{
    CommandEnvelope, Detail, OperationKind, OptionsMap, ReplyEnvelope, StateReport,
    COMMAND_TOPIC, EVENT_TOPIC, VERSION_EVENT,
};
pub use worker::{ProcessHost, WorkerExit, WorkerJob};
