//! Domain layer for series-forwarder.
//!
//! Contains the canonical types shared across all modules:
//! - `Observation`: a raw reading as delivered by the source feed
//! - `Sample`: a validated numeric reading
//! - `BufferEntry`: a sample plus its buffering priority
//! - `Priority`: stream importance used by the priority strategy

pub mod priority;
pub mod sample;

pub use priority::Priority;
pub use sample::{BufferEntry, Observation, RawValue, Sample};
