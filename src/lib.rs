//! Loss-aware sample acquisition core for embedded IQ capture devices
//!
//! `iqrec` is the capture core of an embedded recorder: a hardware transfer
//! engine deposits samples into a fixed memory arena at a constant rate, a
//! double-buffer hand-off exposes completed buffers to a polled consumer, and
//! a tick loop appends them to an output sink while counting every buffer the
//! consumer was too slow to drain. Recording sessions are supervised by a
//! small per-instance state machine that can be started and stopped from any
//! context, including interrupt handlers.
//!
//! # Features
//! - Fixed-budget arena partitioning with equal buffering time per recorder
//! - Double-buffer slot hand-off with an explicit, counted overrun policy
//! - Dual-lane capture with per-interval source synchronization
//! - Chained hardware block-transfer jobs (lane interleaving) with a single
//!   completion callback
//! - Idle/Recording/Stopping lifecycle gated through interrupt-safe request
//!   flags
//! - WAV and raw-file sinks for hosted builds
//!
//! # Crate feature flags
//! - `wav-sink` (default): WAV container output via the optional `hound` dep
//!
//! # Quick start
//! ```
//! use iqrec::acquisition::{BufferHalf, SlotIndex, TransferEngine};
//! use iqrec::recorder::{RecorderBank, RecorderConfig, RecorderSpec};
//! use iqrec::sink::MemorySink;
//!
//! // Hardware seam: a transfer engine that never delivers anything.
//! struct IdleEngine;
//! impl TransferEngine for IdleEngine {
//!     fn program_next_target(&mut self, _half: BufferHalf, _slot: SlotIndex) {}
//!     fn start(&mut self) {}
//!     fn stop(&mut self) {}
//! }
//!
//! # fn main() -> iqrec::Result<()> {
//! let config = RecorderConfig::new("demo", 2, 48_000).slot_samples(4_096);
//! let spec = RecorderSpec::new(config, Box::new(IdleEngine), Box::new(MemorySink::new()));
//! let mut bank = RecorderBank::new(1 << 20, vec![spec])?;
//!
//! bank.request_start(0); // interrupt-safe; consumed by the next tick
//! bank.tick()?;
//!
//! let status = bank.query(0).unwrap();
//! println!("{}: {:?}", status.config.name, status.state);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod acquisition; // Double-buffer hand-off between hardware and consumer
pub mod arena; // Fixed-budget slot memory plan
pub mod pipeline; // Chained hardware block-transfer jobs
pub mod recorder; // Instance lifecycle, bank registry, tick loop
pub mod sink; // Output sinks

/// Error types for recorder core operations
#[derive(thiserror::Error, Debug)]
pub enum RecorderError {
    /// Boot-time memory plan or recorder configuration problem
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transfer engine reported a fault; its internal state is no longer
    /// trusted and the whole system must halt
    #[error("Transfer engine fault: {0}")]
    TransferFault(TransferFault),
}

impl From<TransferFault> for RecorderError {
    fn from(fault: TransferFault) -> Self {
        RecorderError::TransferFault(fault)
    }
}

/// Result type for recorder core operations
pub type Result<T> = std::result::Result<T, RecorderError>;

// Public API exports
pub use acquisition::{
    AcquisitionChannel, BufferHalf, LaneSource, SlotIndex, SlotStatus, SourceSet, TransferEngine,
    TransferEvents, TransferFault,
};
pub use arena::BufferArena;
pub use pipeline::{
    interleave_steps, BlockEngine, InterleaveJob, SoftwareBlockEngine, TransferPipeline,
    TransferStep,
};
pub use recorder::{
    InstanceStatus, RecorderBank, RecorderConfig, RecorderInstance, RecorderSpec, RecorderState,
    StopReason,
};
pub use sink::{MemorySink, RawFileSink, RecorderSink, SinkError};
#[cfg(feature = "wav-sink")]
pub use sink::WavFileSink;
