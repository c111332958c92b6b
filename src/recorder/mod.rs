//! Recorder instances and their lifecycle
//!
//! A recorder instance ties together one acquisition channel, one transfer
//! engine, one output sink and an optional per-slot interleave transform.
//! Its lifecycle is a three-state machine (Idle, Recording, Stopping) with
//! Stopping strictly transient: a stop request or a sink failure closes the
//! sink and settles back to Idle within the same pass. Start and stop are
//! requested through interrupt-safe flags on the [`RecorderBank`] and acted
//! on once per tick.
//!
//! Counters follow the session: received samples count what actually reached
//! the sink, dropped samples count what the engine overwrote because the
//! consumer fell behind. Both survive until the next session starts so the
//! final status of a finished capture stays queryable.

mod bank;

pub use bank::{RecorderBank, RecorderSpec, MAX_INSTANCES};

use serde::{Deserialize, Serialize};

use crate::acquisition::{
    AcquisitionChannel, BufferHalf, LaneSource, SlotIndex, TransferEngine, TransferEvents,
    TransferFault,
};
use crate::arena::BufferArena;
use crate::pipeline::InterleaveJob;
use crate::sink::RecorderSink;
use crate::{RecorderError, Result};

/// Default slot capacity in samples per lane
pub const DEFAULT_SLOT_SAMPLES: usize = 32_768;

/// Default ceiling on slots per recorder
pub const DEFAULT_MAX_SLOTS: usize = 256;

fn default_slot_samples() -> usize {
    DEFAULT_SLOT_SAMPLES
}

fn default_max_slots() -> usize {
    DEFAULT_MAX_SLOTS
}

/// Static description of one recorder instance.
///
/// Supplied at startup and never changed afterwards; the arena partition,
/// the channel geometry and the sink format all derive from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Display name, also used in log lines
    pub name: String,
    /// Bytes per sample on the input side, per lane
    pub input_bytes_per_sample: usize,
    /// True when two synchronized sources each fill a lane plane per slot
    #[serde(default)]
    pub dual_lane: bool,
    /// Output channel count
    pub output_channels: u16,
    /// Output bits per sample
    pub output_bits_per_sample: u16,
    /// Output sample rate in Hz
    pub output_sample_rate: u32,
    /// Slot capacity in samples per lane
    #[serde(default = "default_slot_samples")]
    pub slot_samples: usize,
    /// Ceiling on slots assigned to this recorder
    #[serde(default = "default_max_slots")]
    pub max_slots: usize,
}

impl RecorderConfig {
    /// Creates a single-lane, mono, 16-bit config with default slot sizing.
    pub fn new(name: &str, input_bytes_per_sample: usize, output_sample_rate: u32) -> Self {
        RecorderConfig {
            name: name.to_string(),
            input_bytes_per_sample,
            dual_lane: false,
            output_channels: 1,
            output_bits_per_sample: 16,
            output_sample_rate,
            slot_samples: DEFAULT_SLOT_SAMPLES,
            max_slots: DEFAULT_MAX_SLOTS,
        }
    }

    /// The baseband IQ capture class: two synchronized 16-bit lanes at
    /// 650 026 Hz, written out as a stereo pair.
    pub fn baseband_iq() -> Self {
        RecorderConfig {
            name: "Baseband".to_string(),
            input_bytes_per_sample: 2,
            dual_lane: true,
            output_channels: 2,
            output_bits_per_sample: 16,
            output_sample_rate: 650_026,
            slot_samples: DEFAULT_SLOT_SAMPLES,
            max_slots: DEFAULT_MAX_SLOTS,
        }
    }

    /// Sets the slot capacity in samples per lane
    pub fn slot_samples(mut self, samples: usize) -> Self {
        self.slot_samples = samples;
        self
    }

    /// Sets the per-recorder slot ceiling
    pub fn max_slots(mut self, max: usize) -> Self {
        self.max_slots = max;
        self
    }

    /// Marks the input as two synchronized lanes
    pub fn dual_lane(mut self) -> Self {
        self.dual_lane = true;
        self
    }

    /// Sets the output channel count and bit depth
    pub fn output_format(mut self, channels: u16, bits_per_sample: u16) -> Self {
        self.output_channels = channels;
        self.output_bits_per_sample = bits_per_sample;
        self
    }

    /// 2 for dual-lane input, 1 otherwise
    #[inline]
    pub fn lane_factor(&self) -> usize {
        if self.dual_lane {
            2
        } else {
            1
        }
    }

    /// Slot size in bytes, covering all lane planes
    #[inline]
    pub fn slot_bytes(&self) -> usize {
        self.slot_samples * self.input_bytes_per_sample * self.lane_factor()
    }

    /// Input consumption in bytes per second across all lanes
    #[inline]
    pub fn bytes_per_second(&self) -> u64 {
        (self.input_bytes_per_sample * self.lane_factor()) as u64
            * u64::from(self.output_sample_rate)
    }

    /// Checks the config for values the capture core cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.input_bytes_per_sample == 0
            || self.output_sample_rate == 0
            || self.slot_samples == 0
            || self.max_slots == 0
        {
            return Err(RecorderError::Config(format!(
                "recorder {}: zero-valued field in configuration",
                self.name
            )));
        }
        if self.output_channels == 0
            || self.output_bits_per_sample == 0
            || self.output_bits_per_sample % 8 != 0
        {
            return Err(RecorderError::Config(format!(
                "recorder {}: unusable output format",
                self.name
            )));
        }
        Ok(())
    }
}

/// Lifecycle state of one recorder instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Not recording; start requests are honored
    Idle,
    /// Capturing; completed slots are drained to the sink every tick
    Recording,
    /// Transient: closing the sink on the way back to Idle
    Stopping,
}

/// Why a recording session ended; passed to the sink on close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Explicit stop request
    Requested,
    /// The sink failed a write or the session was cut short by I/O
    IoError,
}

/// Read-only snapshot of one instance for status display
#[derive(Debug, Clone)]
pub struct InstanceStatus {
    /// The instance's static configuration
    pub config: RecorderConfig,
    /// Current lifecycle state
    pub state: RecorderState,
    /// Samples written to the sink this session
    pub received_samples: u64,
    /// Samples lost to overruns this session
    pub dropped_samples: u64,
}

/// One recorder: channel, engine, sink and lifecycle state.
///
/// Constructed by [`RecorderBank::new`]; event shims reach it through
/// [`RecorderBank::instance_mut`] and the [`TransferEvents`] impl.
pub struct RecorderInstance {
    index: usize,
    config: RecorderConfig,
    state: RecorderState,
    channel: AcquisitionChannel,
    engine: Box<dyn TransferEngine + Send>,
    sink: Box<dyn RecorderSink + Send>,
    interleave: Option<InterleaveJob>,
    /// Slot whose interleave job is in flight across tick passes
    pending_transform: Option<SlotIndex>,
    received_samples: u64,
}

impl RecorderInstance {
    pub(crate) fn new(
        index: usize,
        config: RecorderConfig,
        channel: AcquisitionChannel,
        engine: Box<dyn TransferEngine + Send>,
        sink: Box<dyn RecorderSink + Send>,
        interleave: Option<InterleaveJob>,
    ) -> Self {
        RecorderInstance {
            index,
            config,
            state: RecorderState::Idle,
            channel,
            engine,
            sink,
            interleave,
            pending_transform: None,
            received_samples: 0,
        }
    }

    /// The instance's static configuration
    #[inline]
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Current lifecycle state
    #[inline]
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Samples written to the sink this session
    #[inline]
    pub fn received_samples(&self) -> u64 {
        self.received_samples
    }

    /// Samples lost to overruns this session, at slot granularity
    #[inline]
    pub fn dropped_samples(&self) -> u64 {
        self.channel.dropped_slots() * self.config.slot_samples as u64
    }

    /// The instance's acquisition channel
    #[inline]
    pub fn channel(&self) -> &AcquisitionChannel {
        &self.channel
    }

    /// Snapshot for status display
    pub fn status(&self) -> InstanceStatus {
        InstanceStatus {
            config: self.config.clone(),
            state: self.state,
            received_samples: self.received_samples,
            dropped_samples: self.dropped_samples(),
        }
    }

    /// Terminal fault from the engine or the transform offload, if any
    pub fn fault(&self) -> Option<TransferFault> {
        self.channel
            .fault()
            .or_else(|| self.interleave.as_ref().and_then(|job| job.fault()))
    }

    /// Begins a session: opens the sink, resets counters, arms the channel
    /// and starts the engine. A start while already recording is ignored.
    pub(crate) fn start(&mut self) {
        if self.state != RecorderState::Idle {
            return;
        }

        if let Err(err) = self.sink.open(self.index, &self.config) {
            log::warn!("recorder {}: sink open failed: {err}", self.config.name);
            return;
        }

        self.received_samples = 0;
        self.pending_transform = None;
        self.channel.arm(self.engine.as_mut());
        self.engine.start();
        self.state = RecorderState::Recording;
        log::info!("recorder {}: session started", self.config.name);
    }

    /// Ends a session: stops the engine, closes the sink with `reason` and
    /// settles to Idle. Counters stay readable until the next start.
    pub(crate) fn stop(&mut self, reason: StopReason) {
        if self.state != RecorderState::Recording {
            return;
        }

        self.state = RecorderState::Stopping;
        self.engine.stop();
        if let Err(err) = self.sink.close(reason) {
            log::warn!("recorder {}: sink close failed: {err}", self.config.name);
        }
        self.state = RecorderState::Idle;
        log::info!(
            "recorder {}: session ended ({reason:?}), {} samples captured, {} dropped",
            self.config.name,
            self.received_samples,
            self.dropped_samples()
        );
    }

    /// Drains every slot that is ready this pass.
    pub(crate) fn tick(&mut self, arena: &BufferArena) {
        while self.state == RecorderState::Recording {
            let slot = match self.pending_transform {
                Some(slot) => slot,
                None => match self.channel.try_take() {
                    Some(slot) => slot,
                    None => break,
                },
            };
            if !self.process_slot(arena, slot) {
                break;
            }
        }
    }

    /// Transforms (if configured) and writes one slot. Returns false when
    /// the pass must yield: transform still in flight, or the sink failed
    /// and the session was stopped.
    fn process_slot(&mut self, arena: &BufferArena, slot: SlotIndex) -> bool {
        let src = arena.slot(self.index, slot);

        let write_result = match &mut self.interleave {
            Some(job) => {
                if self.pending_transform.is_none() {
                    let started = job.begin(src);
                    debug_assert!(started, "interleave job already in flight");
                    self.pending_transform = Some(slot);
                }
                if !job.service(src) {
                    // Offload engine still busy; resume on the next pass.
                    return false;
                }
                self.pending_transform = None;
                self.sink.write(job.staged())
            }
            None => self.sink.write(src),
        };

        match write_result {
            Ok(()) => {
                self.received_samples += self.config.slot_samples as u64;
                self.channel.release(slot);
                true
            }
            Err(err) => {
                log::warn!("recorder {}: sink write failed: {err}", self.config.name);
                self.stop(StopReason::IoError);
                false
            }
        }
    }
}

impl TransferEvents for RecorderInstance {
    fn on_half_complete(&mut self, half: BufferHalf) {
        if self.state == RecorderState::Recording {
            self.channel.half_complete(self.engine.as_mut(), half);
        }
    }

    fn on_full_complete(&mut self, source: LaneSource) {
        if self.state == RecorderState::Recording {
            self.channel.full_complete(source);
        }
    }

    fn on_error(&mut self, fault: TransferFault) {
        self.channel.record_fault(fault);
    }
}
