//! Hosted capture demo
//!
//! Runs the recorder core against a simulated transfer engine: a producer
//! thread stands in for the interrupt context, filling slots with a
//! generated tone at the configured cadence and delivering half/full
//! completion events, while the main thread ticks the bank and reports live
//! status. The capture lands in a WAV file (or a raw byte stream when built
//! without the `wav-sink` feature).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;

use iqrec::acquisition::{BufferHalf, LaneSource, SlotIndex, TransferEngine, TransferEvents};
use iqrec::pipeline::SoftwareBlockEngine;
use iqrec::recorder::{RecorderBank, RecorderConfig, RecorderSpec};
use iqrec::sink::RecorderSink;

/// Capture memory budget, sized like the SDRAM bank of the real device
const ARENA_BUDGET: usize = 8 * 1024 * 1024;

/// Tone frequency written into the simulated capture
const TONE_HZ: f32 = 1_000.0;

struct Options {
    output: PathBuf,
    seconds: u64,
    config: Option<PathBuf>,
}

fn print_usage() {
    println!("Usage: iqrec [OPTIONS] [OUTPUT]");
    println!();
    println!("Simulated capture run of the recorder core.");
    println!();
    println!("Options:");
    println!("  --seconds <N>    capture duration (default 5)");
    println!("  --config <FILE>  recorder configuration as JSON");
    println!("                   (default: the baseband IQ class)");
    println!("  --help           show this help");
}

fn parse_args() -> Result<Options> {
    let mut options = Options {
        output: PathBuf::from("capture.wav"),
        seconds: 5,
        config: None,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--seconds" => {
                let value = args.next().context("--seconds needs a value")?;
                options.seconds = value.parse().context("--seconds needs a number")?;
            }
            "--config" => {
                let value = args.next().context("--config needs a path")?;
                options.config = Some(PathBuf::from(value));
            }
            flag if flag.starts_with('-') => bail!("unknown option {flag}"),
            output => options.output = PathBuf::from(output),
        }
    }
    Ok(options)
}

fn load_config(options: &Options) -> Result<RecorderConfig> {
    let config = match &options.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => RecorderConfig::baseband_iq(),
    };
    config.validate()?;
    Ok(config)
}

fn make_sink(path: &Path) -> Box<dyn RecorderSink + Send> {
    #[cfg(feature = "wav-sink")]
    return Box::new(iqrec::sink::WavFileSink::new(path));
    #[cfg(not(feature = "wav-sink"))]
    return Box::new(iqrec::sink::RawFileSink::new(path));
}

/// Register file of the simulated engine, shared with the producer thread
#[derive(Debug)]
struct SimState {
    targets: [SlotIndex; 2],
    running: bool,
}

/// Transfer engine whose "hardware" is the producer thread
#[derive(Clone)]
struct SimulatedEngine {
    state: Arc<Mutex<SimState>>,
}

impl TransferEngine for SimulatedEngine {
    fn program_next_target(&mut self, half: BufferHalf, slot: SlotIndex) {
        let bank = match half {
            BufferHalf::First => 0,
            BufferHalf::Second => 1,
        };
        self.state.lock().targets[bank] = slot;
    }

    fn start(&mut self) {
        self.state.lock().running = true;
    }

    fn stop(&mut self) {
        self.state.lock().running = false;
    }
}

/// Fills one slot with generated data: a quadrature tone for 16-bit
/// dual-lane configs, a plain tone or byte ramp otherwise.
fn fill_slot(slot: &mut [u8], config: &RecorderConfig, phase: &mut f32) {
    if config.input_bytes_per_sample != 2 {
        for (offset, byte) in slot.iter_mut().enumerate() {
            *byte = offset as u8;
        }
        return;
    }

    let step = std::f32::consts::TAU * TONE_HZ / config.output_sample_rate as f32;
    if config.dual_lane {
        let plane_bytes = slot.len() / 2;
        let (plane_i, plane_q) = slot.split_at_mut(plane_bytes);
        for k in 0..config.slot_samples {
            let (sin, cos) = (*phase + step * k as f32).sin_cos();
            let i = (sin * 12_000.0) as i16;
            let q = (cos * 12_000.0) as i16;
            plane_i[k * 2..k * 2 + 2].copy_from_slice(&i.to_le_bytes());
            plane_q[k * 2..k * 2 + 2].copy_from_slice(&q.to_le_bytes());
        }
    } else {
        for k in 0..config.slot_samples {
            let sample = ((*phase + step * k as f32).sin() * 12_000.0) as i16;
            slot[k * 2..k * 2 + 2].copy_from_slice(&sample.to_le_bytes());
        }
    }
    *phase = (*phase + step * config.slot_samples as f32) % std::f32::consts::TAU;
}

/// The simulated interrupt context: once per slot interval, fill the
/// engine's active target and deliver the completion events.
fn run_producer(
    bank: Arc<Mutex<RecorderBank>>,
    engine_state: Arc<Mutex<SimState>>,
    halt: Arc<AtomicBool>,
    config: RecorderConfig,
) {
    let interval =
        Duration::from_secs_f64(config.slot_samples as f64 / f64::from(config.output_sample_rate));
    let mut active = 0usize;
    let mut phase = 0.0f32;

    while !halt.load(Ordering::Relaxed) {
        thread::sleep(interval);

        let (running, target) = {
            let state = engine_state.lock();
            (state.running, state.targets[active])
        };
        if !running {
            active = 0;
            continue;
        }

        let mut bank = bank.lock();
        fill_slot(bank.arena_mut().slot_mut(0, target), &config, &mut phase);

        let inactive = if active == 0 {
            BufferHalf::Second
        } else {
            BufferHalf::First
        };
        let instance = bank.instance_mut(0);
        instance.on_half_complete(inactive);
        instance.on_full_complete(LaneSource::A);
        if config.dual_lane {
            instance.on_full_complete(LaneSource::B);
        }
        drop(bank);

        active ^= 1;
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let options = parse_args()?;
    let config = load_config(&options)?;

    let engine_state = Arc::new(Mutex::new(SimState {
        targets: [0, 1],
        running: false,
    }));
    let engine = SimulatedEngine {
        state: Arc::clone(&engine_state),
    };

    let mut spec = RecorderSpec::new(config.clone(), Box::new(engine), make_sink(&options.output));
    if config.dual_lane {
        spec = spec.with_interleave(Box::new(SoftwareBlockEngine::new(
            config.input_bytes_per_sample,
        )));
    }

    let bank = Arc::new(Mutex::new(RecorderBank::new(ARENA_BUDGET, vec![spec])?));
    println!(
        "{}: {} Hz, {} channel(s), {}s of slot memory",
        config.name,
        config.output_sample_rate,
        config.output_channels,
        bank.lock().arena().buffer_seconds()
    );

    let halt = Arc::new(AtomicBool::new(false));
    let producer = {
        let bank = Arc::clone(&bank);
        let halt = Arc::clone(&halt);
        let config = config.clone();
        thread::spawn(move || run_producer(bank, engine_state, halt, config))
    };

    bank.lock().request_start(0);

    let deadline = Instant::now() + Duration::from_secs(options.seconds);
    let mut last_report = Instant::now();
    while Instant::now() < deadline {
        bank.lock().tick()?;

        if last_report.elapsed() >= Duration::from_secs(1) {
            if let Some(status) = bank.lock().query(0) {
                println!(
                    "{}: {:?}, {} samples captured, {} dropped",
                    status.config.name, status.state, status.received_samples, status.dropped_samples
                );
            }
            last_report = Instant::now();
        }
        thread::sleep(Duration::from_millis(5));
    }

    bank.lock().request_stop(0);
    bank.lock().tick()?;
    halt.store(true, Ordering::Relaxed);
    if producer.join().is_err() {
        bail!("producer thread panicked");
    }

    let status = bank.lock().query(0).context("recorder vanished")?;
    println!(
        "done: {} samples captured, {} dropped, output in {}",
        status.received_samples,
        status.dropped_samples,
        options.output.display()
    );
    Ok(())
}
