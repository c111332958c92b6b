//! Double-buffer hand-off between a hardware transfer engine and the
//! polled consumer
//!
//! The transfer engine fills one slot while the previously filled slot is
//! exposed to software. At every half-interval boundary the channel decides
//! which slot the engine targets next: the slot after the current one if the
//! consumer has drained it, or the current one again (overwriting in place)
//! if the consumer has fallen behind. That decision is latched exactly once
//! per interval and is always taken before the engine's inactive target
//! register is reprogrammed, so a slot is never written by hardware while it
//! is readable by software.
//!
//! Overruns are not errors: they are counted and recording continues. A
//! fault reported by the engine is terminal for the whole system because the
//! engine's internal pointers can no longer be trusted.

use std::fmt;

/// Index of a slot within one channel's slot table
pub type SlotIndex = usize;

/// Ownership state of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Free for the engine to target
    Available,
    /// Currently targeted by the engine; software must not read it
    Filling,
    /// Completed by the engine; read-only until released by the consumer
    Full,
}

/// One half of the engine's double-buffer register pair.
///
/// Hardware with M0AR/M1AR-style bank registers maps these directly; the
/// channel itself only passes the half through to the engine so it knows
/// which register to reprogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferHalf {
    /// First bank register
    First,
    /// Second bank register
    Second,
}

/// Identity of one hardware completion source.
///
/// Dual-lane capture runs two synchronized sources whose completion
/// interrupts may service in either order; a slot interval is finished only
/// once every configured source has reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneSource {
    /// Primary lane
    A,
    /// Secondary lane (dual-lane configurations only)
    B,
}

bitflags::bitflags! {
    /// Set of lane sources, one bit per source
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SourceSet: u8 {
        /// Primary lane
        const A = 0b01;
        /// Secondary lane
        const B = 0b10;
    }
}

impl From<LaneSource> for SourceSet {
    fn from(source: LaneSource) -> Self {
        match source {
            LaneSource::A => SourceSet::A,
            LaneSource::B => SourceSet::B,
        }
    }
}

/// Fault reported by a transfer engine.
///
/// All variants are terminal: once the engine has signalled any of these its
/// internal state is unknown and no further transfers may be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFault {
    /// The engine aborted a transfer mid-flight
    Transfer,
    /// The engine's internal FIFO over- or underran
    Fifo,
    /// The engine rejected its programmed configuration
    Config,
}

impl fmt::Display for TransferFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferFault::Transfer => write!(f, "transfer aborted"),
            TransferFault::Fifo => write!(f, "FIFO over/underrun"),
            TransferFault::Config => write!(f, "configuration rejected"),
        }
    }
}

/// Hardware seam: the continuous transfer engine feeding one channel.
///
/// Implementations wrap the real double-buffered engine (a DMA stream pair,
/// a serial audio interface, a simulation). The channel programs targets and
/// gates the run state through this trait; completion events travel the
/// other way via [`TransferEvents`].
pub trait TransferEngine {
    /// Program the inactive bank register for `half` to point at `slot`.
    ///
    /// Called from the half-complete handler, before the engine switches
    /// banks. Dual-lane engines program the matching register on both lanes.
    fn program_next_target(&mut self, half: BufferHalf, slot: SlotIndex);

    /// Begin continuous transfers.
    fn start(&mut self);

    /// Stop continuous transfers. In-flight intervals are abandoned, not
    /// drained.
    fn stop(&mut self);
}

/// Entry points for hardware completion events.
///
/// Implemented per recorder instance; interrupt shims route each engine
/// event here. Handlers must complete quickly and never block.
pub trait TransferEvents {
    /// The engine crossed the midpoint of the current interval; `half` is
    /// the bank register that is now safe to reprogram.
    fn on_half_complete(&mut self, half: BufferHalf);

    /// `source` finished writing the current interval.
    fn on_full_complete(&mut self, source: LaneSource);

    /// The engine reported a fault. Terminal; see [`TransferFault`].
    fn on_error(&mut self, fault: TransferFault);
}

/// Outcome of the once-per-interval overrun decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    /// Advance into the next slot
    Keep,
    /// Consumer too slow; overwrite the current slot in place
    Drop,
}

/// Double-buffer hand-off channel for one recorder instance.
///
/// Holds an index-based view of the instance's slots (the arena owns the
/// memory) and moves each slot through Available → Filling → Full →
/// Available. The engine side runs from interrupt context via
/// [`half_complete`](Self::half_complete) and
/// [`full_complete`](Self::full_complete); the consumer side polls
/// [`try_take`](Self::try_take) and returns slots with
/// [`release`](Self::release).
#[derive(Debug)]
pub struct AcquisitionChannel {
    /// Per-slot ownership state
    status: Vec<SlotStatus>,
    /// Slot currently targeted by the engine
    current: SlotIndex,
    /// Slot chosen for the engine's next interval
    next: SlotIndex,
    /// Keep/drop decision for the interval in flight; latched at the half
    /// event, consumed at the full event
    decision: Option<Decision>,
    /// Sources that must report before an interval commits
    expected: SourceSet,
    /// Sources that have reported for the interval in flight
    reported: SourceSet,
    /// Consumer cursor; advances in completion order
    cursor: SlotIndex,
    /// Slots committed to the consumer
    received_slots: u64,
    /// Slots overwritten because the consumer fell behind
    dropped_slots: u64,
    /// Engine fault, if one has been reported
    fault: Option<TransferFault>,
}

impl AcquisitionChannel {
    /// Creates a channel over `slot_count` slots fed by `sources`.
    ///
    /// # Panics
    ///
    /// Panics if `slot_count` is below 2 (double buffering needs a slot to
    /// fill and a slot to expose) or if `sources` is empty.
    pub fn new(slot_count: usize, sources: SourceSet) -> Self {
        assert!(slot_count >= 2, "channel needs at least two slots");
        assert!(!sources.is_empty(), "channel needs at least one source");

        AcquisitionChannel {
            status: vec![SlotStatus::Available; slot_count],
            current: 0,
            next: 0,
            decision: None,
            expected: sources,
            reported: SourceSet::empty(),
            cursor: 0,
            received_slots: 0,
            dropped_slots: 0,
            fault: None,
        }
    }

    /// Resets the hand-off state and programs the engine's initial targets.
    ///
    /// Both bank registers are programmed before the caller starts the
    /// engine, mirroring the power-on sequence of double-buffered DMA: bank
    /// one gets slot 0, bank two gets slot 1.
    pub fn arm(&mut self, engine: &mut dyn TransferEngine) {
        for status in &mut self.status {
            *status = SlotStatus::Available;
        }
        self.current = 0;
        self.next = 0;
        self.decision = None;
        self.reported = SourceSet::empty();
        self.cursor = 0;
        self.received_slots = 0;
        self.dropped_slots = 0;
        self.status[0] = SlotStatus::Filling;

        engine.program_next_target(BufferHalf::First, 0);
        engine.program_next_target(BufferHalf::Second, 1);
    }

    /// Half-interval event: latch the keep/drop decision and reprogram the
    /// engine's inactive bank register.
    ///
    /// The decision is taken at most once per interval; a second half event
    /// for the same interval (dual-lane engines can deliver one per lane)
    /// reuses the latched choice so both lanes target the same slot.
    pub fn half_complete(&mut self, engine: &mut dyn TransferEngine, half: BufferHalf) {
        if self.decision.is_none() {
            let after = (self.current + 1) % self.status.len();
            if self.status[after] == SlotStatus::Available {
                self.decision = Some(Decision::Keep);
                self.next = after;
            } else {
                // Consumer hasn't drained the slot we'd advance into; keep
                // overwriting the current one while the file catches up.
                self.decision = Some(Decision::Drop);
                self.next = self.current;
            }
        }

        engine.program_next_target(half, self.next);
    }

    /// Full-interval event from `source`: commit or drop the interval.
    ///
    /// With two configured sources nothing happens until both have
    /// reported; completion interrupts may service in either order.
    pub fn full_complete(&mut self, source: LaneSource) {
        self.reported.insert(source.into());
        if !self.reported.contains(self.expected) {
            return;
        }

        // A completion with no latched decision means the half event never
        // ran for this interval; the slot contents cannot be trusted.
        match self.decision.take() {
            Some(Decision::Keep) => {
                self.status[self.current] = SlotStatus::Full;
                self.current = self.next;
                self.status[self.current] = SlotStatus::Filling;
                self.received_slots += 1;
            }
            Some(Decision::Drop) | None => {
                self.dropped_slots += 1;
            }
        }

        self.reported = SourceSet::empty();
    }

    /// Records an engine fault. All further use of this channel's data is
    /// void; the next tick pass surfaces the fault and halts the system.
    pub fn record_fault(&mut self, fault: TransferFault) {
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
    }

    /// Returns the oldest completed slot not yet handed out, in completion
    /// order, or `None` if nothing is pending.
    pub fn try_take(&mut self) -> Option<SlotIndex> {
        if self.status[self.cursor] == SlotStatus::Full {
            let index = self.cursor;
            self.cursor = (self.cursor + 1) % self.status.len();
            Some(index)
        } else {
            None
        }
    }

    /// Returns a slot taken with [`try_take`](Self::try_take) to the engine.
    ///
    /// Must be called exactly once per successful `try_take`, and only after
    /// every read of the slot's memory is finished.
    pub fn release(&mut self, index: SlotIndex) {
        debug_assert_eq!(self.status[index], SlotStatus::Full);
        self.status[index] = SlotStatus::Available;
    }

    /// Number of slots in this channel
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.status.len()
    }

    /// Slot currently targeted by the engine
    #[inline]
    pub fn current_target(&self) -> SlotIndex {
        self.current
    }

    /// Slots committed to the consumer since the last arm
    #[inline]
    pub fn received_slots(&self) -> u64 {
        self.received_slots
    }

    /// Slots overwritten because the consumer fell behind since the last arm
    #[inline]
    pub fn dropped_slots(&self) -> u64 {
        self.dropped_slots
    }

    /// Engine fault, if one has been reported
    #[inline]
    pub fn fault(&self) -> Option<TransferFault> {
        self.fault
    }

    /// Ownership state of `index` (used by the tick loop and tests)
    #[inline]
    pub fn slot_status(&self, index: SlotIndex) -> SlotStatus {
        self.status[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test engine that records every programmed target
    struct RecordingEngine {
        programmed: Vec<(BufferHalf, SlotIndex)>,
    }

    impl RecordingEngine {
        fn new() -> Self {
            RecordingEngine {
                programmed: Vec::new(),
            }
        }

        fn last_target(&self) -> SlotIndex {
            self.programmed.last().expect("no target programmed").1
        }
    }

    impl TransferEngine for RecordingEngine {
        fn program_next_target(&mut self, half: BufferHalf, slot: SlotIndex) {
            self.programmed.push((half, slot));
        }

        fn start(&mut self) {}

        fn stop(&mut self) {}
    }

    fn halves() -> impl Iterator<Item = BufferHalf> {
        [BufferHalf::Second, BufferHalf::First].into_iter().cycle()
    }

    /// Drive one interval: half event, then full event on every source.
    fn drive_interval(
        channel: &mut AcquisitionChannel,
        engine: &mut RecordingEngine,
        half: BufferHalf,
        sources: SourceSet,
    ) {
        channel.half_complete(engine, half);
        if sources.contains(SourceSet::A) {
            channel.full_complete(LaneSource::A);
        }
        if sources.contains(SourceSet::B) {
            channel.full_complete(LaneSource::B);
        }
    }

    #[test]
    fn test_arm_programs_both_banks() {
        let mut channel = AcquisitionChannel::new(4, SourceSet::A);
        let mut engine = RecordingEngine::new();

        channel.arm(&mut engine);

        assert_eq!(
            engine.programmed,
            vec![(BufferHalf::First, 0), (BufferHalf::Second, 1)]
        );
        assert_eq!(channel.slot_status(0), SlotStatus::Filling);
        assert_eq!(channel.slot_status(1), SlotStatus::Available);
    }

    #[test]
    fn test_fifo_order_across_completions() {
        let mut channel = AcquisitionChannel::new(4, SourceSet::A);
        let mut engine = RecordingEngine::new();
        channel.arm(&mut engine);

        let mut half = halves();
        for _ in 0..3 {
            drive_interval(&mut channel, &mut engine, half.next().unwrap(), SourceSet::A);
        }

        assert_eq!(channel.try_take(), Some(0));
        assert_eq!(channel.try_take(), Some(1));
        assert_eq!(channel.try_take(), Some(2));
        assert_eq!(channel.try_take(), None);
        assert_eq!(channel.received_slots(), 3);
        assert_eq!(channel.dropped_slots(), 0);
    }

    #[test]
    fn test_drop_counting_with_stalled_consumer() {
        // Two slots and no consumer: the first fill lands, every later
        // interval targets the same occupied slot and is dropped.
        let mut channel = AcquisitionChannel::new(2, SourceSet::A);
        let mut engine = RecordingEngine::new();
        channel.arm(&mut engine);

        let mut half = halves();
        let events = 10;
        for _ in 0..events {
            drive_interval(&mut channel, &mut engine, half.next().unwrap(), SourceSet::A);
        }

        assert_eq!(channel.dropped_slots(), events - 1);
        assert_eq!(channel.received_slots(), 1);
    }

    #[test]
    fn test_drop_recovers_after_release() {
        let mut channel = AcquisitionChannel::new(2, SourceSet::A);
        let mut engine = RecordingEngine::new();
        channel.arm(&mut engine);

        let mut half = halves();
        drive_interval(&mut channel, &mut engine, half.next().unwrap(), SourceSet::A);
        drive_interval(&mut channel, &mut engine, half.next().unwrap(), SourceSet::A);
        assert_eq!(channel.dropped_slots(), 1);

        // Consumer catches up; the next interval advances again.
        let taken = channel.try_take().unwrap();
        channel.release(taken);
        drive_interval(&mut channel, &mut engine, half.next().unwrap(), SourceSet::A);

        assert_eq!(channel.dropped_slots(), 1);
        assert_eq!(channel.received_slots(), 2);
        assert_eq!(channel.try_take(), Some(1));
    }

    #[test]
    fn test_decision_latched_once_per_interval() {
        let mut channel = AcquisitionChannel::new(4, SourceSet::A | SourceSet::B);
        let mut engine = RecordingEngine::new();
        channel.arm(&mut engine);

        // Both lanes hit the half boundary; the second reprogram must reuse
        // the first decision even though slot states are unchanged.
        channel.half_complete(&mut engine, BufferHalf::Second);
        let first_choice = engine.last_target();
        channel.half_complete(&mut engine, BufferHalf::Second);
        assert_eq!(engine.last_target(), first_choice);
    }

    #[test]
    fn test_dual_source_waits_for_both_lanes() {
        let mut channel = AcquisitionChannel::new(4, SourceSet::A | SourceSet::B);
        let mut engine = RecordingEngine::new();
        channel.arm(&mut engine);

        channel.half_complete(&mut engine, BufferHalf::Second);
        channel.full_complete(LaneSource::A);

        // One lane reported; nothing is visible yet.
        assert_eq!(channel.try_take(), None);
        assert_eq!(channel.received_slots(), 0);

        channel.full_complete(LaneSource::B);
        assert_eq!(channel.try_take(), Some(0));
        assert_eq!(channel.received_slots(), 1);
    }

    #[test]
    fn test_dual_source_order_is_irrelevant() {
        let mut channel = AcquisitionChannel::new(4, SourceSet::A | SourceSet::B);
        let mut engine = RecordingEngine::new();
        channel.arm(&mut engine);

        channel.half_complete(&mut engine, BufferHalf::Second);
        channel.full_complete(LaneSource::B);
        channel.full_complete(LaneSource::A);

        assert_eq!(channel.received_slots(), 1);
    }

    #[test]
    fn test_no_slot_visible_before_completion() {
        let mut channel = AcquisitionChannel::new(4, SourceSet::A);
        let mut engine = RecordingEngine::new();
        channel.arm(&mut engine);

        assert_eq!(channel.try_take(), None);
        channel.half_complete(&mut engine, BufferHalf::Second);
        assert_eq!(channel.try_take(), None);
        channel.full_complete(LaneSource::A);
        assert_eq!(channel.try_take(), Some(0));
    }

    #[test]
    fn test_full_slot_never_retargeted() {
        let mut channel = AcquisitionChannel::new(3, SourceSet::A);
        let mut engine = RecordingEngine::new();
        channel.arm(&mut engine);

        let mut half = halves();
        for _ in 0..8 {
            let h = half.next().unwrap();
            channel.half_complete(&mut engine, h);
            let target = engine.last_target();
            assert_ne!(
                channel.slot_status(target),
                SlotStatus::Full,
                "engine was pointed at an undrained slot"
            );
            channel.full_complete(LaneSource::A);
        }
    }

    #[test]
    fn test_completion_without_half_event_drops() {
        let mut channel = AcquisitionChannel::new(4, SourceSet::A);
        let mut engine = RecordingEngine::new();
        channel.arm(&mut engine);

        channel.full_complete(LaneSource::A);

        assert_eq!(channel.received_slots(), 0);
        assert_eq!(channel.dropped_slots(), 1);
        assert_eq!(channel.try_take(), None);
    }

    #[test]
    fn test_rearm_resets_counters_and_cursor() {
        let mut channel = AcquisitionChannel::new(2, SourceSet::A);
        let mut engine = RecordingEngine::new();
        channel.arm(&mut engine);

        let mut half = halves();
        for _ in 0..4 {
            drive_interval(&mut channel, &mut engine, half.next().unwrap(), SourceSet::A);
        }
        assert!(channel.dropped_slots() > 0);

        channel.arm(&mut engine);
        assert_eq!(channel.received_slots(), 0);
        assert_eq!(channel.dropped_slots(), 0);
        assert_eq!(channel.try_take(), None);
    }

    #[test]
    fn test_fault_is_sticky() {
        let mut channel = AcquisitionChannel::new(2, SourceSet::A);
        channel.record_fault(TransferFault::Fifo);
        channel.record_fault(TransferFault::Transfer);
        assert_eq!(channel.fault(), Some(TransferFault::Fifo));
    }

    #[test]
    #[should_panic(expected = "at least two slots")]
    fn test_single_slot_channel_panics() {
        AcquisitionChannel::new(1, SourceSet::A);
    }
}
