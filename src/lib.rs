//! # aika-cloning
//!
//! A Rust-native coordination layer for multi-agent systems supporting single-threaded and
//! multi-threaded optimistic execution, built on discrete event simulation principles from
//! the 1980s-90s time-warp literature. On top of the scheduler, GVT engine, and rollback
//! machinery sits a clone/branch director: at a registered GVT hook, a logical process that
//! recorded a non-deterministic decision can have its whole simulation state forked across
//! two processing elements, each resuming along a different branch of the decision.
//!
//! ## Architecture
//!
//! - [`st`] - single-threaded discrete event simulation, the serial reference scheduler
//! - [`mt::hybrid`] - multi-threaded optimistic synchronization: `Galaxy` (GVT), `Planet`
//!   (per-PE scheduler), and the clone/branch `director`
//! - [`agents`] - agent traits and execution contexts
//! - [`objects`] - core simulation data structures: events, messages, anti-messages
//! - [`rng`] - per-LP reversible RNG stream
//! - [`models`] - the two example model clients: HighLife and grid search

use mesocarp::MesoError;
use thiserror::Error;

pub mod agents;
pub mod models;
pub mod mt;
pub mod objects;
pub mod rng;
pub mod st;

pub mod prelude {
    pub use crate::agents::{Agent, AgentSupport, PlanetContext, ThreadedAgent, WorldContext};
    pub use crate::mt::SynchMode;
    pub use crate::objects::{Action, AntiMsg, Decision, Event, Msg};
    pub use crate::rng::RngStream;
    pub use crate::AikaError;
    pub use bytemuck::{Pod, Zeroable};
}

/// Error enum for provide feedback on simulation errors
#[derive(Debug, Error)]
pub enum AikaError {
    #[error(
        "Attempted to process an event whos execution timestamp doesn't match simulation time."
    )]
    TimeTravel,
    #[error("Terminal time stamp hit, no more scheduling allowed.")]
    PastTerminal,
    #[error("Maximum number of agents already specified. If you want to add more agents, you need to configure the GVT to support more.")]
    MaximumAgentsAllowed,
    #[error("Cannot start parallel simulation, not all specified agents have been configured or provided.")]
    NotAllAgentsRegistered,
    #[error("Thread panicked!")]
    ThreadPanic,
    #[error("Mail delivered to the wrong address, fire the mail man.")]
    MismatchedDeliveryAddress,
    #[error("Error found when utilizing `mesocarp`: {0}.")]
    MesoError(#[from] MesoError),
    #[error("Local clocks on a `Planet` were out of sync.")]
    ClockSyncIssue,
    #[error("Invalid world ID: {0}")]
    InvalidWorldId(usize),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("handler on agent {agent} emitted an event {dt} ticks out, below the configured lookahead of {lookahead}")]
    LookaheadViolation {
        agent: usize,
        dt: u64,
        lookahead: u64,
    },
    #[error("world {0} attempted to clone while a prior clone's divergence had not yet reached end-time")]
    CloneInProgress(usize),
    #[error("clone director found no idle destination world for world {0}'s decision; advancing along first choice only")]
    NoCloneDestination(usize),
    #[error("grid file error: {0}")]
    GridParseError(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
