//! Chained hardware block-transfer jobs
//!
//! A block engine (a 2D-DMA unit on real hardware, a plain CPU loop in
//! hosted builds) moves elements between two memory regions with a
//! programmable stride. This module sequences several such steps into one
//! job: each step is programmed as the previous one completes, and a single
//! completion callback runs after the last step, synchronously from the
//! event handler. At most one job is in flight at a time; there is no queue.
//!
//! The recorder uses this to interleave the two lane planes of a just-filled
//! slot into one output stream, but the executor itself knows nothing about
//! slots; the UI layer drives the same contract for display composition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::acquisition::TransferFault;

/// One block-transfer step, in element units.
///
/// Strides count elements *skipped* after each transfer, matching the
/// offset-register convention of line-oriented DMA engines: a stride of 0
/// moves a contiguous run, a stride of 1 touches every other element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStep {
    /// Source offset in elements
    pub src: usize,
    /// Destination offset in elements
    pub dst: usize,
    /// Number of element transfers
    pub transfers: usize,
    /// Elements skipped after each transfer on the source side
    pub src_stride: usize,
    /// Elements skipped after each transfer on the destination side
    pub dst_stride: usize,
}

/// Hardware seam: the engine that executes one step at a time.
///
/// `start_step` programs the engine and kicks it off; completion is
/// observed by polling, which on real hardware reads (and clears) the
/// transfer-complete interrupt flag.
pub trait BlockEngine {
    /// Program the engine with `step` over the given regions and start it.
    fn start_step(&mut self, src: &[u8], dst: &mut [u8], step: &TransferStep);

    /// Returns true exactly once after the programmed step has completed.
    fn poll_complete(&mut self) -> bool;
}

/// Builds the two-pass plan that merges lane planes into one interleaved
/// output: plane A lands on even elements, plane B on odd.
///
/// Offsets are element offsets within the source and destination regions;
/// `samples` is the per-lane element count.
pub fn interleave_steps(
    plane_a: usize,
    plane_b: usize,
    dst: usize,
    samples: usize,
) -> [TransferStep; 2] {
    [
        TransferStep {
            src: plane_a,
            dst,
            transfers: samples,
            src_stride: 0,
            dst_stride: 1,
        },
        TransferStep {
            src: plane_b,
            dst: dst + 1,
            transfers: samples,
            src_stride: 0,
            dst_stride: 1,
        },
    ]
}

type CompletionFn = Box<dyn FnOnce() + Send>;

/// Linear job executor over a [`BlockEngine`].
///
/// Owns no memory and no engine; the caller passes both into every event so
/// the same executor can serve different regions job by job.
pub struct TransferPipeline {
    steps: Vec<TransferStep>,
    index: usize,
    on_complete: Option<CompletionFn>,
    busy: bool,
    fault: Option<TransferFault>,
}

impl TransferPipeline {
    /// Creates an idle executor
    pub fn new() -> Self {
        TransferPipeline {
            steps: Vec::new(),
            index: 0,
            on_complete: None,
            busy: false,
            fault: None,
        }
    }

    /// Starts a job, programming the first step immediately.
    ///
    /// Returns false and performs no work if a job is already in flight or
    /// `steps` is empty.
    pub fn begin(
        &mut self,
        engine: &mut dyn BlockEngine,
        src: &[u8],
        dst: &mut [u8],
        steps: &[TransferStep],
        on_complete: impl FnOnce() + Send + 'static,
    ) -> bool {
        if self.busy || steps.is_empty() {
            return false;
        }

        self.steps.clear();
        self.steps.extend_from_slice(steps);
        self.index = 0;
        self.on_complete = Some(Box::new(on_complete));
        self.busy = true;

        engine.start_step(src, dst, &self.steps[0]);
        true
    }

    /// Step-completion event: program the next step, or finish the job and
    /// run the completion callback.
    pub fn step_complete(&mut self, engine: &mut dyn BlockEngine, src: &[u8], dst: &mut [u8]) {
        if !self.busy {
            return;
        }

        self.index += 1;
        if self.index >= self.steps.len() {
            self.busy = false;
            if let Some(callback) = self.on_complete.take() {
                callback();
            }
        } else {
            engine.start_step(src, dst, &self.steps[self.index]);
        }
    }

    /// Engine fault event. The job is abandoned and the fault latched;
    /// the completion callback never runs.
    pub fn step_error(&mut self, fault: TransferFault) {
        self.busy = false;
        self.on_complete = None;
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
    }

    /// Polls the engine and advances through as many completed steps as it
    /// reports. Returns true once the job is idle.
    pub fn service(&mut self, engine: &mut dyn BlockEngine, src: &[u8], dst: &mut [u8]) -> bool {
        while self.busy {
            if engine.poll_complete() {
                self.step_complete(engine, src, dst);
            } else {
                return false;
            }
        }
        true
    }

    /// True while a job is in flight
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Engine fault, if one has been reported
    #[inline]
    pub fn fault(&self) -> Option<TransferFault> {
        self.fault
    }
}

impl Default for TransferPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Block engine that runs every step on the CPU, completing synchronously.
///
/// Stands in for the 2D-DMA engine in hosted builds and tests. Element
/// width is fixed at construction.
#[derive(Debug)]
pub struct SoftwareBlockEngine {
    elem_bytes: usize,
    pending: bool,
}

impl SoftwareBlockEngine {
    /// Creates an engine moving `elem_bytes`-wide elements.
    ///
    /// # Panics
    ///
    /// Panics if `elem_bytes` is zero.
    pub fn new(elem_bytes: usize) -> Self {
        assert!(elem_bytes > 0, "element width must be nonzero");
        SoftwareBlockEngine {
            elem_bytes,
            pending: false,
        }
    }
}

impl BlockEngine for SoftwareBlockEngine {
    fn start_step(&mut self, src: &[u8], dst: &mut [u8], step: &TransferStep) {
        let e = self.elem_bytes;
        for i in 0..step.transfers {
            let s = (step.src + i * (1 + step.src_stride)) * e;
            let d = (step.dst + i * (1 + step.dst_stride)) * e;
            dst[d..d + e].copy_from_slice(&src[s..s + e]);
        }
        self.pending = true;
    }

    fn poll_complete(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}

/// Per-slot interleave transform: pipeline, engine and staging buffer bound
/// together for one recorder instance.
///
/// `begin` kicks off the two-pass interleave of a dual-lane slot into the
/// staging buffer; `service` drives the engine until the staged output is
/// ready. With a synchronous engine one `service` call finishes the job;
/// with real offload hardware the tick loop simply services again on its
/// next pass.
pub struct InterleaveJob {
    pipeline: TransferPipeline,
    engine: Box<dyn BlockEngine + Send>,
    staging: Box<[u8]>,
    samples: usize,
    done: Arc<AtomicBool>,
}

impl InterleaveJob {
    /// Creates a transform for slots of `samples` elements per lane, each
    /// element `elem_bytes` wide.
    pub fn new(engine: Box<dyn BlockEngine + Send>, samples: usize, elem_bytes: usize) -> Self {
        InterleaveJob {
            pipeline: TransferPipeline::new(),
            engine,
            staging: vec![0u8; samples * elem_bytes * 2].into_boxed_slice(),
            samples,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts interleaving `src` (plane A followed by plane B) into the
    /// staging buffer. Returns false if a job is already in flight.
    pub fn begin(&mut self, src: &[u8]) -> bool {
        let steps = interleave_steps(0, self.samples, 0, self.samples);
        self.done.store(false, Ordering::Release);
        let done = Arc::clone(&self.done);
        self.pipeline.begin(self.engine.as_mut(), src, &mut self.staging, &steps, move || {
            done.store(true, Ordering::Release);
        })
    }

    /// Drives the engine; returns true once the staged output is ready.
    pub fn service(&mut self, src: &[u8]) -> bool {
        self.pipeline
            .service(self.engine.as_mut(), src, &mut self.staging);
        self.done.load(Ordering::Acquire)
    }

    /// The interleaved output of the last completed job
    #[inline]
    pub fn staged(&self) -> &[u8] {
        &self.staging
    }

    /// Engine fault, if one has been reported
    #[inline]
    pub fn fault(&self) -> Option<TransferFault> {
        self.pipeline.fault()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Engine that records programmed steps and completes one per poll
    struct ScriptedEngine {
        started: Vec<TransferStep>,
        completions: usize,
    }

    impl ScriptedEngine {
        fn new() -> Self {
            ScriptedEngine {
                started: Vec::new(),
                completions: 0,
            }
        }
    }

    impl BlockEngine for ScriptedEngine {
        fn start_step(&mut self, _src: &[u8], _dst: &mut [u8], step: &TransferStep) {
            self.started.push(*step);
            self.completions += 1;
        }

        fn poll_complete(&mut self) -> bool {
            if self.completions > 0 {
                self.completions -= 1;
                true
            } else {
                false
            }
        }
    }

    fn step(src: usize, dst: usize, transfers: usize) -> TransferStep {
        TransferStep {
            src,
            dst,
            transfers,
            src_stride: 0,
            dst_stride: 0,
        }
    }

    #[test]
    fn test_steps_run_in_order() {
        let mut pipeline = TransferPipeline::new();
        let mut engine = ScriptedEngine::new();
        let src = [0u8; 8];
        let mut dst = [0u8; 8];

        let steps = [step(0, 0, 2), step(2, 2, 2), step(4, 4, 2)];
        assert!(pipeline.begin(&mut engine, &src, &mut dst, &steps, || {}));
        assert!(pipeline.service(&mut engine, &src, &mut dst));

        assert_eq!(engine.started, steps);
        assert!(!pipeline.is_busy());
    }

    #[test]
    fn test_second_begin_rejected_while_busy() {
        let mut pipeline = TransferPipeline::new();
        let mut engine = ScriptedEngine::new();
        let src = [0u8; 8];
        let mut dst = [0u8; 8];

        assert!(pipeline.begin(&mut engine, &src, &mut dst, &[step(0, 0, 1)], || {}));
        assert!(!pipeline.begin(&mut engine, &src, &mut dst, &[step(0, 0, 1)], || {}));

        assert!(pipeline.service(&mut engine, &src, &mut dst));
        assert!(pipeline.begin(&mut engine, &src, &mut dst, &[step(0, 0, 1)], || {}));
    }

    #[test]
    fn test_empty_job_rejected() {
        let mut pipeline = TransferPipeline::new();
        let mut engine = ScriptedEngine::new();
        let src = [0u8; 8];
        let mut dst = [0u8; 8];

        assert!(!pipeline.begin(&mut engine, &src, &mut dst, &[], || {}));
        assert!(!pipeline.is_busy());
    }

    #[test]
    fn test_completion_callback_fires_once_after_last_step() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut pipeline = TransferPipeline::new();
        let mut engine = ScriptedEngine::new();
        let src = [0u8; 8];
        let mut dst = [0u8; 8];

        let counter = Arc::clone(&fired);
        pipeline.begin(&mut engine, &src, &mut dst, &[step(0, 0, 1), step(1, 1, 1)], move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(pipeline.service(&mut engine, &src, &mut dst));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Spurious events after completion change nothing.
        pipeline.step_complete(&mut engine, &src, &mut dst);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fault_abandons_job() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut pipeline = TransferPipeline::new();
        let mut engine = ScriptedEngine::new();
        let src = [0u8; 8];
        let mut dst = [0u8; 8];

        let counter = Arc::clone(&fired);
        pipeline.begin(&mut engine, &src, &mut dst, &[step(0, 0, 1), step(1, 1, 1)], move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        pipeline.step_error(TransferFault::Transfer);

        assert!(!pipeline.is_busy());
        assert_eq!(pipeline.fault(), Some(TransferFault::Transfer));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_software_engine_strided_copy() {
        let mut engine = SoftwareBlockEngine::new(2);
        let src: Vec<u8> = vec![1, 0, 2, 0, 3, 0];
        let mut dst = vec![0u8; 12];

        // Contiguous source, every other destination element.
        engine.start_step(
            &src,
            &mut dst,
            &TransferStep {
                src: 0,
                dst: 0,
                transfers: 3,
                src_stride: 0,
                dst_stride: 1,
            },
        );
        assert!(engine.poll_complete());
        assert!(!engine.poll_complete());
        assert_eq!(dst, vec![1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]);
    }

    #[test]
    fn test_interleave_job_merges_planes() {
        // Plane A: 1,2,3  Plane B: 4,5,6  (u16 little-endian)
        let mut src = Vec::new();
        for v in [1u16, 2, 3, 4, 5, 6] {
            src.extend_from_slice(&v.to_le_bytes());
        }

        let mut job = InterleaveJob::new(Box::new(SoftwareBlockEngine::new(2)), 3, 2);
        assert!(job.begin(&src));
        assert!(job.service(&src));

        let staged: Vec<u16> = job
            .staged()
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(staged, vec![1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_interleave_job_with_deferred_engine() {
        /// Engine that needs one extra poll per step before reporting done
        struct SlowEngine {
            inner: SoftwareBlockEngine,
            ticks: usize,
        }

        impl BlockEngine for SlowEngine {
            fn start_step(&mut self, src: &[u8], dst: &mut [u8], step: &TransferStep) {
                self.inner.start_step(src, dst, step);
                self.ticks = 1;
            }

            fn poll_complete(&mut self) -> bool {
                if self.ticks > 0 {
                    self.ticks -= 1;
                    return false;
                }
                self.inner.poll_complete()
            }
        }

        let mut src = Vec::new();
        for v in [7u16, 8, 9, 10] {
            src.extend_from_slice(&v.to_le_bytes());
        }

        let engine = SlowEngine {
            inner: SoftwareBlockEngine::new(2),
            ticks: 0,
        };
        let mut job = InterleaveJob::new(Box::new(engine), 2, 2);

        assert!(job.begin(&src));
        assert!(!job.service(&src)); // step one still "in flight"
        assert!(!job.service(&src)); // step two programmed, not yet complete
        assert!(job.service(&src));

        let staged: Vec<u16> = job
            .staged()
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(staged, vec![7, 9, 8, 10]);
    }
}
