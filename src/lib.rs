//! Backend of an activity-tracking AI assistant.
//!
//! The interesting part is the real-time coordination layer: independently
//! scheduled producers (activity sampler, screen capture, speech
//! transcription, workflow synthesis) multiplexed through one event bus into
//! an ordered, resumable stream served over SSE, with per-producer lifecycle
//! discipline.

pub mod analysis;
pub mod bus;
pub mod capture;
pub mod client;
pub mod error;
pub mod sampler;
pub mod server;
pub mod settings;
pub mod state;
pub mod storage;
pub mod transcribe;
pub mod workflow;

pub use error::{Result, TraqError};
pub use state::{AppContext, Backends};
