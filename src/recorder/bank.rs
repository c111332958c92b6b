//! Fixed-capacity registry of recorder instances
//!
//! The bank owns the arena, every instance, and the interrupt-safe request
//! flags. `tick` is the single cooperative entry point: it surfaces engine
//! faults, drains start/stop requests, then lets every recording instance
//! flush its completed slots. Nothing here blocks except the sink writes
//! made on behalf of the instances.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::acquisition::{AcquisitionChannel, SourceSet, TransferEngine};
use crate::arena::BufferArena;
use crate::pipeline::{BlockEngine, InterleaveJob};
use crate::recorder::{InstanceStatus, RecorderConfig, RecorderInstance, StopReason};
use crate::sink::RecorderSink;
use crate::{RecorderError, Result};

/// Ceiling on recorder instances per bank; one request-flag bit each
pub const MAX_INSTANCES: usize = 16;

/// Everything needed to build one recorder instance
pub struct RecorderSpec {
    /// Static configuration
    pub config: RecorderConfig,
    /// Transfer engine feeding the instance's channel
    pub engine: Box<dyn TransferEngine + Send>,
    /// Output sink for the instance's sessions
    pub sink: Box<dyn RecorderSink + Send>,
    /// Block engine for the per-slot lane interleave, if wanted
    pub interleave: Option<Box<dyn BlockEngine + Send>>,
}

impl RecorderSpec {
    /// Creates a spec without a per-slot transform
    pub fn new(
        config: RecorderConfig,
        engine: Box<dyn TransferEngine + Send>,
        sink: Box<dyn RecorderSink + Send>,
    ) -> Self {
        RecorderSpec {
            config,
            engine,
            sink,
            interleave: None,
        }
    }

    /// Adds a block engine that interleaves the two lane planes of every
    /// slot before it is written out
    pub fn with_interleave(mut self, engine: Box<dyn BlockEngine + Send>) -> Self {
        self.interleave = Some(engine);
        self
    }
}

/// All recorder instances plus their shared arena and request flags.
///
/// Built once at startup; the instance set never changes afterwards.
/// `request_start`/`request_stop` are safe from any context including
/// interrupt handlers; they only touch an atomic word that the next
/// `tick` drains.
pub struct RecorderBank {
    instances: Vec<RecorderInstance>,
    arena: BufferArena,
    start_flags: AtomicU32,
    stop_flags: AtomicU32,
}

impl std::fmt::Debug for RecorderBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecorderBank")
            .field("instances", &self.instances.len())
            .field("arena", &self.arena)
            .field("start_flags", &self.start_flags)
            .field("stop_flags", &self.stop_flags)
            .finish()
    }
}

impl RecorderBank {
    /// Partitions `budget_bytes` across the specs and builds every instance.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Config`] if the spec list is empty or over
    /// [`MAX_INSTANCES`], if the arena partition fails, if a recorder ends
    /// up with fewer than the two slots double buffering needs, or if an
    /// interleave transform is requested for single-lane input.
    pub fn new(budget_bytes: usize, specs: Vec<RecorderSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(RecorderError::Config("no recorders configured".into()));
        }
        if specs.len() > MAX_INSTANCES {
            return Err(RecorderError::Config(format!(
                "{} recorders exceed the ceiling of {MAX_INSTANCES}",
                specs.len()
            )));
        }

        let configs: Vec<RecorderConfig> = specs.iter().map(|s| s.config.clone()).collect();
        let arena = BufferArena::partition(budget_bytes, &configs)?;

        let mut instances = Vec::with_capacity(specs.len());
        for (index, spec) in specs.into_iter().enumerate() {
            let slot_count = arena.assignment(index).slot_count;
            if slot_count < 2 {
                return Err(RecorderError::Config(format!(
                    "recorder {}: double buffering needs at least two slots, got {slot_count}",
                    spec.config.name
                )));
            }
            if spec.interleave.is_some() && !spec.config.dual_lane {
                return Err(RecorderError::Config(format!(
                    "recorder {}: interleave transform requires dual-lane input",
                    spec.config.name
                )));
            }

            let sources = if spec.config.dual_lane {
                SourceSet::A | SourceSet::B
            } else {
                SourceSet::A
            };
            let channel = AcquisitionChannel::new(slot_count, sources);
            let interleave = spec.interleave.map(|engine| {
                InterleaveJob::new(
                    engine,
                    spec.config.slot_samples,
                    spec.config.input_bytes_per_sample,
                )
            });

            instances.push(RecorderInstance::new(
                index,
                spec.config,
                channel,
                spec.engine,
                spec.sink,
                interleave,
            ));
        }

        Ok(RecorderBank {
            instances,
            arena,
            start_flags: AtomicU32::new(0),
            stop_flags: AtomicU32::new(0),
        })
    }

    /// Requests that the recorder at `index` begin a session. Interrupt
    /// safe; out-of-range indices are ignored.
    pub fn request_start(&self, index: usize) {
        if index < self.instances.len() {
            self.start_flags.fetch_or(1 << index, Ordering::AcqRel);
        }
    }

    /// Requests that the recorder at `index` end its session. Interrupt
    /// safe; out-of-range indices are ignored.
    pub fn request_stop(&self, index: usize) {
        if index < self.instances.len() {
            self.stop_flags.fetch_or(1 << index, Ordering::AcqRel);
        }
    }

    /// One cooperative pass: surface faults, act on pending requests, then
    /// drain completed slots for every recording instance.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::TransferFault`] if any engine has reported
    /// a fault; the caller must treat this as a full halt.
    pub fn tick(&mut self) -> Result<()> {
        for instance in &self.instances {
            if let Some(fault) = instance.fault() {
                return Err(fault.into());
            }
        }

        let start = self.start_flags.swap(0, Ordering::AcqRel);
        let stop = self.stop_flags.swap(0, Ordering::AcqRel);
        for index in 0..self.instances.len() {
            if start & (1 << index) != 0 {
                self.instances[index].start();
            }
            if stop & (1 << index) != 0 {
                self.instances[index].stop(StopReason::Requested);
            }
        }

        let arena = &self.arena;
        for instance in &mut self.instances {
            instance.tick(arena);
        }
        Ok(())
    }

    /// Read-only snapshot of the instance at `index`
    pub fn query(&self, index: usize) -> Option<InstanceStatus> {
        self.instances.get(index).map(RecorderInstance::status)
    }

    /// Number of recorder instances
    #[inline]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// True if the bank holds no instances (never the case after `new`)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// The instance at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[inline]
    pub fn instance(&self, index: usize) -> &RecorderInstance {
        &self.instances[index]
    }

    /// The instance at `index`, for routing engine events.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[inline]
    pub fn instance_mut(&mut self, index: usize) -> &mut RecorderInstance {
        &mut self.instances[index]
    }

    /// The shared slot arena
    #[inline]
    pub fn arena(&self) -> &BufferArena {
        &self.arena
    }

    /// The shared slot arena, writable (hardware shims fill slots here)
    #[inline]
    pub fn arena_mut(&mut self) -> &mut BufferArena {
        &mut self.arena
    }
}
