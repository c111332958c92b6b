//! Fixed-budget slot memory plan
//!
//! All capture memory comes out of one contiguous budget sized at boot. The
//! budget is split so that every recorder instance buffers the same number
//! of whole seconds: aggregate consumption across all recorders divides the
//! budget into a common buffering duration, and each recorder receives that
//! duration's worth of fixed-size slots. The plan is computed once; nothing
//! is ever reallocated or resized afterwards.
//!
//! An over-subscribed plan is a boot-time configuration error. There is no
//! runtime recovery from a memory plan that does not fit.

use crate::recorder::RecorderConfig;
use crate::{RecorderError, Result};

/// Byte range assigned to one recorder instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// Byte offset of the instance's first slot
    pub base: usize,
    /// Number of slots
    pub slot_count: usize,
    /// Size of each slot in bytes
    pub slot_bytes: usize,
}

impl Assignment {
    /// Total bytes covered by this assignment
    #[inline]
    pub fn bytes(&self) -> usize {
        self.slot_count * self.slot_bytes
    }
}

/// Slot memory for every recorder instance, partitioned once at startup.
///
/// The arena exclusively owns the backing storage; channels and the tick
/// loop refer to slots by `(recorder, slot)` index and borrow the bytes only
/// for the duration of a fill or a sink write.
#[derive(Debug)]
pub struct BufferArena {
    storage: Box<[u8]>,
    assignments: Vec<Assignment>,
    buffer_seconds: u64,
}

impl BufferArena {
    /// Partitions `budget_bytes` across `configs`.
    ///
    /// Every recorder gets `budget / aggregate bytes-per-second` whole
    /// seconds of buffering, rounded down to complete slots. Slot memory is
    /// zeroed on allocation.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Config`] if a recorder's slot count would be
    /// zero or exceed its configured ceiling, or if the computed byte ranges
    /// exceed the budget.
    pub fn partition(budget_bytes: usize, configs: &[RecorderConfig]) -> Result<Self> {
        let total_bps: u64 = configs.iter().map(|c| c.bytes_per_second()).sum();
        if total_bps == 0 {
            return Err(RecorderError::Config(
                "memory plan needs at least one recorder with a nonzero rate".into(),
            ));
        }

        let buffer_seconds = budget_bytes as u64 / total_bps;

        let mut assignments = Vec::with_capacity(configs.len());
        let mut offset = 0usize;
        for config in configs {
            config.validate()?;

            let buffer_samples = buffer_seconds * u64::from(config.output_sample_rate);
            let slot_count =
                (buffer_samples / config.slot_samples as u64 / config.lane_factor() as u64) as usize;
            if slot_count == 0 {
                return Err(RecorderError::Config(format!(
                    "recorder {}: budget of {budget_bytes} bytes yields no complete slot",
                    config.name
                )));
            }
            if slot_count > config.max_slots {
                return Err(RecorderError::Config(format!(
                    "recorder {}: {slot_count} slots exceed the ceiling of {}",
                    config.name, config.max_slots
                )));
            }

            let slot_bytes = config.slot_bytes();
            let end = offset + slot_count * slot_bytes;
            if end > budget_bytes {
                return Err(RecorderError::Config(format!(
                    "memory plan overruns the budget: {end} > {budget_bytes} bytes"
                )));
            }

            assignments.push(Assignment {
                base: offset,
                slot_count,
                slot_bytes,
            });
            offset = end;
        }

        log::info!(
            "arena: {} bytes across {} recorder(s), {buffer_seconds}s of buffering each",
            budget_bytes,
            assignments.len()
        );

        Ok(BufferArena {
            storage: vec![0u8; budget_bytes].into_boxed_slice(),
            assignments,
            buffer_seconds,
        })
    }

    /// Total budget in bytes
    #[inline]
    pub fn budget(&self) -> usize {
        self.storage.len()
    }

    /// Whole seconds of buffering every recorder receives
    #[inline]
    pub fn buffer_seconds(&self) -> u64 {
        self.buffer_seconds
    }

    /// Number of recorder assignments
    #[inline]
    pub fn recorder_count(&self) -> usize {
        self.assignments.len()
    }

    /// Assignment for `recorder`
    ///
    /// # Panics
    ///
    /// Panics if `recorder` is out of range.
    #[inline]
    pub fn assignment(&self, recorder: usize) -> Assignment {
        self.assignments[recorder]
    }

    /// Borrows one slot's bytes read-only.
    ///
    /// # Panics
    ///
    /// Panics if `recorder` or `slot` is out of range.
    pub fn slot(&self, recorder: usize, slot: usize) -> &[u8] {
        let a = self.assignments[recorder];
        assert!(slot < a.slot_count, "slot {slot} out of range");
        let start = a.base + slot * a.slot_bytes;
        &self.storage[start..start + a.slot_bytes]
    }

    /// Borrows one slot's bytes for writing.
    ///
    /// # Panics
    ///
    /// Panics if `recorder` or `slot` is out of range.
    pub fn slot_mut(&mut self, recorder: usize, slot: usize) -> &mut [u8] {
        let a = self.assignments[recorder];
        assert!(slot < a.slot_count, "slot {slot} out of range");
        let start = a.base + slot * a.slot_bytes;
        &mut self.storage[start..start + a.slot_bytes]
    }
}
