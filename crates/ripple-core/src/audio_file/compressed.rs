//! Compressed format decoding via symphonia
//!
//! Claims every file and lets the symphonia probe decide. A failed probe
//! means the format is not compiled in (`DecodeUnavailable`); errors after
//! a successful probe mean the file is damaged (`DecodeFailed`).

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{downmix_to_mono, AudioDecoder, DecodedAudio};
use crate::error::{EngineError, EngineResult};

/// Decoder for MP3/FLAC/OGG/AAC and anything else symphonia was built with
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn accepts(&self, _path: &Path, _header: &[u8]) -> bool {
        true
    }

    fn decode(&self, path: &Path) -> EngineResult<DecodedAudio> {
        let unavailable = |reason: String| EngineError::DecodeUnavailable {
            path: path.to_path_buf(),
            reason,
        };
        let failed = |reason: String| EngineError::DecodeFailed {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| failed(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| unavailable(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| unavailable("no audio track found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| failed("unknown sample rate".to_string()))?;
        let mut channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| unavailable(e.to_string()))?;

        let mut interleaved: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut decoded_packets = 0usize;
        let mut skipped_packets = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    if decoded_packets == 0 {
                        return Err(failed(e.to_string()));
                    }
                    log::warn!("[LOADER] Stopping at unreadable packet in {:?}: {}", path, e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    skipped_packets += 1;
                    log::debug!("[LOADER] Skipping corrupt packet in {:?}: {}", path, e);
                    continue;
                }
                Err(e) => return Err(failed(e.to_string())),
            };

            let spec = *decoded.spec();
            channels = spec.channels.count() as u16;

            let needs_alloc = sample_buf
                .as_ref()
                .map(|buf| buf.capacity() < decoded.capacity() * spec.channels.count())
                .unwrap_or(true);
            if needs_alloc {
                sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }

            if let Some(ref mut buf) = sample_buf {
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
            decoded_packets += 1;
        }

        if decoded_packets == 0 && skipped_packets > 0 {
            return Err(failed(format!("all {} packets were corrupt", skipped_packets)));
        }
        if skipped_packets > 0 {
            log::warn!("[LOADER] Skipped {} corrupt packets in {:?}", skipped_packets, path);
        }

        let channels = channels.max(1);
        Ok(DecodedAudio {
            samples: downmix_to_mono(&interleaved, channels as usize),
            sample_rate,
            channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::test_support::write_sine_wav;

    #[test]
    fn test_decodes_wav_through_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sine_wav(dir.path(), "tone.wav", 8000, 4000);

        let audio = SymphoniaDecoder.decode(&path).unwrap();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.samples.len(), 4000);
    }

    #[test]
    fn test_unknown_bytes_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.xyz");
        std::fs::write(&path, vec![0x5Au8; 4096]).unwrap();

        let err = SymphoniaDecoder.decode(&path).unwrap_err();
        assert!(matches!(err, EngineError::DecodeUnavailable { .. }));
    }
}
