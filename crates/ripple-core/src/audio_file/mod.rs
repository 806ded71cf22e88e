//! Audio sample loading
//!
//! Decodes a file into normalized mono samples plus its sample rate.
//!
//! Decoders are tried in order:
//!
//! 1. `WavDecoder` - native RIFF/RF64 reader, always available
//! 2. `SymphoniaDecoder` - compressed formats, only with the `symphonia` feature
//!
//! A file no decoder can handle fails with `DecodeUnavailable`; a file a
//! decoder recognizes but cannot read fails with `DecodeFailed`.

mod wav;
#[cfg(feature = "symphonia")]
mod compressed;

pub use wav::{AudioFileError, SampleEncoding, WavDecoder, WavFormat, WavReader};
#[cfg(feature = "symphonia")]
pub use compressed::SymphoniaDecoder;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{EngineError, EngineResult};

/// Number of leading bytes handed to `AudioDecoder::accepts`
const HEADER_LEN: usize = 12;

/// Decoded audio, already down-mixed to mono
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count of the source before down-mixing
    pub channels: u16,
}

impl DecodedAudio {
    /// Duration in milliseconds (rounded down)
    pub fn duration_ms(&self) -> u64 {
        duration_ms(self.samples.len(), self.sample_rate)
    }
}

/// Duration of `frames` mono samples at `sample_rate`, in milliseconds
pub fn duration_ms(frames: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (frames as u64 * 1000) / sample_rate as u64
}

/// Down-mix interleaved samples to mono by channel averaging
///
/// Output is clamped to [-1.0, 1.0]. A trailing partial frame is dropped.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.iter().map(|s| s.clamp(-1.0, 1.0)).collect();
    }

    let scale = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| (frame.iter().sum::<f32>() * scale).clamp(-1.0, 1.0))
        .collect()
}

// =============================================================================
// Decoder Strategy
// =============================================================================

/// A way of turning a file into mono samples
pub trait AudioDecoder: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Whether this decoder wants to try the file
    ///
    /// `header` holds up to the first 12 bytes of the file.
    fn accepts(&self, path: &Path, header: &[u8]) -> bool;

    /// Decode the whole file
    fn decode(&self, path: &Path) -> EngineResult<DecodedAudio>;
}

/// Ordered set of decoders selected once at startup
pub struct AudioLoader {
    decoders: Vec<Box<dyn AudioDecoder>>,
}

impl AudioLoader {
    /// Loader with every decoder compiled into this build
    pub fn detect() -> Self {
        #[allow(unused_mut)]
        let mut decoders: Vec<Box<dyn AudioDecoder>> = vec![Box::new(WavDecoder)];

        #[cfg(feature = "symphonia")]
        decoders.push(Box::new(SymphoniaDecoder));

        let loader = Self { decoders };
        log::info!("[LOADER] Decoders available: {:?}", loader.decoder_names());
        loader
    }

    /// Loader with an explicit decoder list
    pub fn with_decoders(decoders: Vec<Box<dyn AudioDecoder>>) -> Self {
        Self { decoders }
    }

    pub fn decoder_names(&self) -> Vec<&'static str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }

    /// Decode `path` with the first decoder that can handle it
    ///
    /// A decoder that reports `DecodeUnavailable` (e.g. a WAV with an
    /// unsupported encoding) hands the file on to the next one.
    pub fn load(&self, path: &Path) -> EngineResult<DecodedAudio> {
        let header = read_header(path)?;
        let mut last_unavailable: Option<EngineError> = None;

        for decoder in self.decoders.iter().filter(|d| d.accepts(path, &header)) {
            log::debug!("[LOADER] Trying {} for {:?}", decoder.name(), path);
            match decoder.decode(path) {
                Ok(audio) => {
                    log::debug!(
                        "[LOADER] {} decoded {:?}: {} frames @ {} Hz, {} ch",
                        decoder.name(),
                        path,
                        audio.samples.len(),
                        audio.sample_rate,
                        audio.channels
                    );
                    return Ok(audio);
                }
                Err(e @ EngineError::DecodeUnavailable { .. }) => {
                    log::debug!("[LOADER] {} cannot handle {:?}: {}", decoder.name(), path, e);
                    last_unavailable = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_unavailable.unwrap_or_else(|| EngineError::DecodeUnavailable {
            path: path.to_path_buf(),
            reason: format!(
                "unsupported format '{}' (decoders: {})",
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("unknown"),
                self.decoder_names().join(", ")
            ),
        }))
    }
}

impl Default for AudioLoader {
    fn default() -> Self {
        Self::detect()
    }
}

fn read_header(path: &Path) -> EngineResult<Vec<u8>> {
    let file = File::open(path).map_err(|e| EngineError::DecodeFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64)
        .read_to_end(&mut header)
        .map_err(|e| EngineError::DecodeFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(header)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! WAV fixtures shared by tests across the crate

    use std::path::{Path, PathBuf};

    /// Write a 16-bit mono sine WAV and return its path
    pub fn write_sine_wav(dir: &Path, name: &str, sample_rate: u32, frames: usize) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let value = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
            writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::write_sine_wav;

    struct RejectAll;

    impl AudioDecoder for RejectAll {
        fn name(&self) -> &'static str {
            "reject"
        }
        fn accepts(&self, _path: &Path, _header: &[u8]) -> bool {
            false
        }
        fn decode(&self, _path: &Path) -> EngineResult<DecodedAudio> {
            unreachable!()
        }
    }

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = [1.0, 0.0, -0.5, -0.5, 0.25, 0.75];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![0.5, -0.5, 0.5]);
    }

    #[test]
    fn test_downmix_drops_partial_frame_and_clamps() {
        let mono = downmix_to_mono(&[1.5, -2.0, 0.5], 1);
        assert_eq!(mono, vec![1.0, -1.0, 0.5]);
        assert_eq!(downmix_to_mono(&[0.2, 0.4, 0.6], 2), vec![0.3]);
    }

    #[test]
    fn test_duration_ms() {
        assert_eq!(duration_ms(44100, 44100), 1000);
        assert_eq!(duration_ms(22050, 44100), 500);
        assert_eq!(duration_ms(100, 0), 0);
    }

    #[test]
    fn test_missing_file_is_decode_failed() {
        let loader = AudioLoader::detect();
        let err = loader.load(Path::new("/nonexistent/clip.wav")).unwrap_err();
        assert!(matches!(err, EngineError::DecodeFailed { .. }));
    }

    #[test]
    fn test_no_accepting_decoder_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "a.wav", 8000, 100);

        let loader = AudioLoader::with_decoders(vec![Box::new(RejectAll)]);
        let err = loader.load(&path).unwrap_err();
        assert!(matches!(err, EngineError::DecodeUnavailable { .. }));
    }

    #[test]
    fn test_loads_wav_natively() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "tone.wav", 8000, 8000);

        let audio = AudioLoader::detect().load(&path).unwrap();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.samples.len(), 8000);
        assert_eq!(audio.duration_ms(), 1000);
        assert!(audio.samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_wav_only_loader_rejects_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, b"ID3\x04\x00\x00\x00\x00\x00\x00garbage").unwrap();

        let loader = AudioLoader::with_decoders(vec![Box::new(WavDecoder)]);
        let err = loader.load(&path).unwrap_err();
        assert!(matches!(err, EngineError::DecodeUnavailable { .. }));
    }
}
