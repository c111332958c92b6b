//! WAV container sink
//!
//! Wraps a recording session in a PCM WAV file via `hound`. The header's
//! format fields come straight from the recorder's output configuration;
//! sample data passes through verbatim as little-endian 16-bit PCM. RIFF
//! stores chunk sizes as `u32`, so the sink refuses writes that would push
//! the data chunk past that range rather than finalize a corrupt header.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use super::{RecorderSink, SinkError};
use crate::recorder::{RecorderConfig, StopReason};

/// Data-chunk ceiling: u32 chunk size minus the fixed header overhead
const DATA_BYTE_CEILING: u64 = u32::MAX as u64 - 44;

/// Sink that writes each session as a 16-bit PCM WAV file.
pub struct WavFileSink {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    data_bytes: u64,
}

impl WavFileSink {
    /// Creates a sink that will write to `path`. The file is created when a
    /// session opens.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        WavFileSink {
            path: path.into(),
            writer: None,
            data_bytes: 0,
        }
    }
}

impl RecorderSink for WavFileSink {
    fn open(&mut self, _index: usize, config: &RecorderConfig) -> Result<(), SinkError> {
        if config.output_bits_per_sample != 16 {
            return Err(SinkError::Unavailable(format!(
                "WAV sink handles 16-bit output only, config says {}",
                config.output_bits_per_sample
            )));
        }

        let spec = hound::WavSpec {
            channels: config.output_channels,
            sample_rate: config.output_sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&self.path, spec)
            .map_err(|e| SinkError::Unavailable(format!("failed to create WAV file: {e}")))?;

        self.writer = Some(writer);
        self.data_bytes = 0;
        log::info!(
            "wav sink: {} capturing to {}",
            config.name,
            self.path.display()
        );
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::Unavailable("no session open".into()))?;

        if bytes.len() % 2 != 0 {
            return Err(SinkError::Unavailable(
                "sample stream not 16-bit aligned".into(),
            ));
        }
        if self.data_bytes + bytes.len() as u64 > DATA_BYTE_CEILING {
            return Err(SinkError::Unavailable(
                "WAV data chunk would exceed the RIFF size limit".into(),
            ));
        }

        for pair in bytes.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            writer
                .write_sample(sample)
                .map_err(|e| SinkError::Unavailable(format!("failed to write sample: {e}")))?;
        }
        self.data_bytes += bytes.len() as u64;
        Ok(())
    }

    fn close(&mut self, reason: StopReason) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| SinkError::Unavailable(format!("failed to finalize WAV file: {e}")))?;
        }
        log::info!(
            "wav sink: {} closed ({reason:?}), {} data bytes",
            self.path.display(),
            self.data_bytes
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_config() -> RecorderConfig {
        RecorderConfig::new("iq", 2, 650_026).output_format(2, 16)
    }

    #[test]
    fn test_wav_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.wav");
        let mut sink = WavFileSink::new(&path);

        let samples: Vec<i16> = vec![0, 1000, -1000, i16::MAX, i16::MIN, 7];
        let mut bytes = Vec::new();
        for s in &samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }

        sink.open(0, &stereo_config()).unwrap();
        sink.write(&bytes).unwrap();
        sink.close(StopReason::Requested).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 650_026);
        assert_eq!(spec.bits_per_sample, 16);

        let back: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(back, samples);
    }

    #[test]
    fn test_wav_rejects_non_16_bit_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = WavFileSink::new(dir.path().join("bad.wav"));
        let config = RecorderConfig::new("wide", 4, 48_000).output_format(1, 32);
        assert!(sink.open(0, &config).is_err());
    }

    #[test]
    fn test_wav_rejects_unaligned_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = WavFileSink::new(dir.path().join("odd.wav"));
        sink.open(0, &stereo_config()).unwrap();
        assert!(sink.write(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_wav_rejects_write_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = WavFileSink::new(dir.path().join("never.wav"));
        assert!(sink.write(&[0, 0]).is_err());
    }
}
