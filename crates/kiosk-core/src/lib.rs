//! Orchestration layer for a kiosk device-management agent.
//!
//! [`KioskAgent`] owns a [`CapabilityGate`] around one [`CapabilityProvider`]
//! and builds the acquisition pipeline, the power schedule contract, the
//! audio/brightness normalizer and the event multiplexer on top of it.

pub mod agent;
pub mod audio;
pub mod error;
pub mod events;
pub mod gate;
pub mod normalize;
pub mod pipeline;
pub mod provider;
pub mod schedule;
pub mod state;
pub mod topic;
pub mod types;

#[cfg(test)]
mod testing;

pub use agent::{AgentOptions, KioskAgent};
pub use audio::AudioNormalizer;
pub use error::{KioskError, LaunchFailure, ProviderError, ProviderResult, Remediation};
pub use events::EventMultiplexer;
pub use gate::CapabilityGate;
pub use pipeline::Pipeline;
pub use provider::{CapabilityProvider, NullProvider, ProviderChannels, ProviderEmitters};
pub use schedule::{PowerSchedule, ScheduleOutcome};
pub use state::{DeviceSnapshot, PipelineState};
pub use topic::{Observer, ObserverRef, Topic};
pub use types::*;
