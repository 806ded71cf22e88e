//! RIFF/RF64 WAV reader
//!
//! Handles PCM (8/16/24/32-bit), IEEE float (32/64-bit) and
//! WAVE_FORMAT_EXTENSIBLE files with any channel count. RF64 files carry
//! their real data size in a `ds64` chunk.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;

use super::{downmix_to_mono, AudioDecoder, DecodedAudio};
use crate::error::{EngineError, EngineResult};

const FORMAT_PCM: u16 = 0x0001;
const FORMAT_IEEE_FLOAT: u16 = 0x0003;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// RF64 placeholder in 32-bit size fields
const RF64_SIZE_PLACEHOLDER: u32 = 0xFFFF_FFFF;

/// WAV parsing errors
#[derive(Debug, Clone, Error)]
pub enum AudioFileError {
    /// File not found or couldn't be read
    #[error("IO error: {0}")]
    IoError(String),
    /// Not a RIFF/WAVE container
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    /// Valid WAV, but an encoding this reader does not handle
    #[error("Unsupported encoding: format tag {format_tag:#06x}, {bits_per_sample} bits")]
    UnsupportedEncoding { format_tag: u16, bits_per_sample: u16 },
    /// Missing required chunk
    #[error("Missing required chunk: {0}")]
    MissingChunk(&'static str),
    /// Header fields that contradict each other or are truncated
    #[error("File corrupted: {0}")]
    Corrupted(String),
}

impl From<std::io::Error> for AudioFileError {
    fn from(e: std::io::Error) -> Self {
        AudioFileError::IoError(e.to_string())
    }
}

impl AudioFileError {
    /// Map onto the engine taxonomy
    ///
    /// Unsupported encodings are "unavailable" so another decoder can try;
    /// everything else means the file itself is bad.
    fn into_engine_error(self, path: &Path) -> EngineError {
        match self {
            AudioFileError::UnsupportedEncoding { .. } => EngineError::DecodeUnavailable {
                path: path.to_path_buf(),
                reason: self.to_string(),
            },
            other => EngineError::DecodeFailed {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        }
    }
}

/// How one sample is stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// Unsigned 8-bit, 128 = silence
    U8,
    I16,
    I24,
    I32,
    F32,
    F64,
}

impl SampleEncoding {
    pub fn bytes(&self) -> usize {
        match self {
            SampleEncoding::U8 => 1,
            SampleEncoding::I16 => 2,
            SampleEncoding::I24 => 3,
            SampleEncoding::I32 | SampleEncoding::F32 => 4,
            SampleEncoding::F64 => 8,
        }
    }

    /// Decode one little-endian sample to f32
    ///
    /// `b` must hold at least `self.bytes()` bytes.
    #[inline]
    fn read(&self, b: &[u8]) -> f32 {
        match self {
            SampleEncoding::U8 => (b[0] as f32 - 128.0) / 128.0,
            SampleEncoding::I16 => i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0,
            SampleEncoding::I24 => {
                // Place the 3 bytes in the top of an i32 and shift back to sign-extend
                let v = i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8;
                v as f32 / 8_388_608.0
            }
            SampleEncoding::I32 => {
                i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0
            }
            SampleEncoding::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            SampleEncoding::F64 => {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
            }
        }
    }
}

/// Contents of the fmt chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavFormat {
    /// Effective format tag (sub-format for EXTENSIBLE files)
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Bytes per frame across all channels
    pub block_align: u16,
}

impl WavFormat {
    /// Sample encoding implied by tag + bit depth
    pub fn encoding(&self) -> Result<SampleEncoding, AudioFileError> {
        let encoding = match (self.format_tag, self.bits_per_sample) {
            (FORMAT_PCM, 8) => SampleEncoding::U8,
            (FORMAT_PCM, 16) => SampleEncoding::I16,
            (FORMAT_PCM, 24) => SampleEncoding::I24,
            (FORMAT_PCM, 32) => SampleEncoding::I32,
            (FORMAT_IEEE_FLOAT, 32) => SampleEncoding::F32,
            (FORMAT_IEEE_FLOAT, 64) => SampleEncoding::F64,
            (format_tag, bits_per_sample) => {
                return Err(AudioFileError::UnsupportedEncoding {
                    format_tag,
                    bits_per_sample,
                })
            }
        };
        Ok(encoding)
    }

    /// Reject headers that cannot describe real audio
    fn validate(&self) -> Result<SampleEncoding, AudioFileError> {
        if self.channels == 0 {
            return Err(AudioFileError::Corrupted("zero channels".into()));
        }
        if self.sample_rate == 0 {
            return Err(AudioFileError::Corrupted("zero sample rate".into()));
        }
        let encoding = self.encoding()?;
        let min_align = encoding.bytes() * self.channels as usize;
        if (self.block_align as usize) < min_align {
            return Err(AudioFileError::Corrupted(format!(
                "block align {} smaller than {} channels x {} bytes",
                self.block_align,
                self.channels,
                encoding.bytes()
            )));
        }
        Ok(encoding)
    }
}

/// WAV/RF64 file reader
pub struct WavReader {
    reader: BufReader<File>,
    format: WavFormat,
    encoding: SampleEncoding,
    data_offset: u64,
    data_size: u64,
}

impl WavReader {
    /// Open a file and parse its header chunks
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AudioFileError> {
        let file = File::open(path.as_ref())?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut riff_header = [0u8; 12];
        reader
            .read_exact(&mut riff_header)
            .map_err(|_| AudioFileError::InvalidFormat("file shorter than RIFF header".into()))?;

        let is_rf64 = match &riff_header[0..4] {
            b"RIFF" => false,
            b"RF64" => true,
            _ => return Err(AudioFileError::InvalidFormat("Not a RIFF/RF64 file".into())),
        };
        if &riff_header[8..12] != b"WAVE" {
            return Err(AudioFileError::InvalidFormat("Not a WAVE file".into()));
        }

        let mut format: Option<WavFormat> = None;
        let mut data_offset: Option<u64> = None;
        let mut data_size: Option<u64> = None;
        let mut ds64_data_size: Option<u64> = None;

        loop {
            let mut chunk_header = [0u8; 8];
            if reader.read_exact(&mut chunk_header).is_err() {
                break;
            }
            let chunk_id = [chunk_header[0], chunk_header[1], chunk_header[2], chunk_header[3]];
            let chunk_size = u32::from_le_bytes([
                chunk_header[4],
                chunk_header[5],
                chunk_header[6],
                chunk_header[7],
            ]);

            match &chunk_id {
                b"ds64" if is_rf64 => {
                    let body = read_chunk_body(&mut reader, chunk_size)?;
                    if body.len() >= 16 {
                        let mut size = [0u8; 8];
                        size.copy_from_slice(&body[8..16]);
                        ds64_data_size = Some(u64::from_le_bytes(size));
                    }
                }
                b"fmt " => {
                    let body = read_chunk_body(&mut reader, chunk_size)?;
                    format = Some(parse_fmt_chunk(&body)?);
                }
                b"data" => {
                    let offset = reader.stream_position()?;
                    let declared = match ds64_data_size {
                        Some(size) if chunk_size == RF64_SIZE_PLACEHOLDER => size,
                        _ => chunk_size as u64,
                    };
                    // Streaming writers leave the size unset; take whatever is on disk
                    let available = file_len.saturating_sub(offset);
                    let size = if declared > available {
                        log::warn!(
                            "[WAV] data chunk declares {} bytes but only {} remain, reading what is present",
                            declared,
                            available
                        );
                        available
                    } else {
                        declared
                    };

                    data_offset = Some(offset);
                    data_size = Some(size);

                    // Keep walking only if metadata chunks can follow
                    if offset + size >= file_len {
                        break;
                    }
                    reader.seek(SeekFrom::Start(offset + size + (size % 2)))?;
                    continue;
                }
                _ => {
                    reader.seek(SeekFrom::Current(chunk_size as i64))?;
                }
            }

            if chunk_size % 2 != 0 {
                reader.seek(SeekFrom::Current(1))?;
            }
        }

        let format = format.ok_or(AudioFileError::MissingChunk("fmt"))?;
        let data_offset = data_offset.ok_or(AudioFileError::MissingChunk("data"))?;
        let data_size = data_size.ok_or(AudioFileError::MissingChunk("data"))?;
        let encoding = format.validate()?;

        Ok(Self {
            reader,
            format,
            encoding,
            data_offset,
            data_size,
        })
    }

    pub fn format(&self) -> &WavFormat {
        &self.format
    }

    /// Number of complete frames in the data chunk
    pub fn frame_count(&self) -> u64 {
        self.data_size / self.format.block_align as u64
    }

    /// Read every frame and down-mix to mono
    pub fn read_mono(&mut self) -> Result<Vec<f32>, AudioFileError> {
        self.reader.seek(SeekFrom::Start(self.data_offset))?;

        let frame_bytes = self.format.block_align as usize;
        let usable = self.frame_count() as usize * frame_bytes;
        let mut data = Vec::with_capacity(usable);
        (&mut self.reader)
            .take(usable as u64)
            .read_to_end(&mut data)?;
        // Drop a trailing partial frame if the file was cut mid-read
        data.truncate(data.len() / frame_bytes * frame_bytes);

        let channels = self.format.channels as usize;
        let sample_bytes = self.encoding.bytes();
        let encoding = self.encoding;

        if channels == 1 {
            return Ok(data
                .chunks_exact(frame_bytes)
                .map(|frame| encoding.read(frame).clamp(-1.0, 1.0))
                .collect());
        }

        let mut interleaved = Vec::with_capacity(data.len() / frame_bytes * channels);
        for frame in data.chunks_exact(frame_bytes) {
            for ch in 0..channels {
                interleaved.push(encoding.read(&frame[ch * sample_bytes..]));
            }
        }
        Ok(downmix_to_mono(&interleaved, channels))
    }
}

fn read_chunk_body(reader: &mut BufReader<File>, size: u32) -> Result<Vec<u8>, AudioFileError> {
    let mut body = vec![0u8; size as usize];
    reader
        .read_exact(&mut body)
        .map_err(|_| AudioFileError::Corrupted("chunk extends past end of file".into()))?;
    Ok(body)
}

fn parse_fmt_chunk(body: &[u8]) -> Result<WavFormat, AudioFileError> {
    if body.len() < 16 {
        return Err(AudioFileError::Corrupted("fmt chunk too small".into()));
    }

    let mut format_tag = u16::from_le_bytes([body[0], body[1]]);
    let channels = u16::from_le_bytes([body[2], body[3]]);
    let sample_rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    let block_align = u16::from_le_bytes([body[12], body[13]]);
    let bits_per_sample = u16::from_le_bytes([body[14], body[15]]);

    if format_tag == FORMAT_EXTENSIBLE {
        // cbSize(2) validBits(2) channelMask(4) then the sub-format GUID
        if body.len() < 26 {
            return Err(AudioFileError::Corrupted("extensible fmt chunk too small".into()));
        }
        format_tag = u16::from_le_bytes([body[24], body[25]]);
    }

    Ok(WavFormat {
        format_tag,
        channels,
        sample_rate,
        bits_per_sample,
        block_align,
    })
}

// =============================================================================
// Decoder
// =============================================================================

/// Native WAV decoder, always compiled in
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn name(&self) -> &'static str {
        "wav"
    }

    fn accepts(&self, path: &Path, header: &[u8]) -> bool {
        if header.len() >= 12 {
            return matches!(&header[0..4], b"RIFF" | b"RF64") && &header[8..12] == b"WAVE";
        }
        // Too short to sniff; claim it by extension so the error is "failed", not "unavailable"
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("wav") || e.eq_ignore_ascii_case("wave"))
            .unwrap_or(false)
    }

    fn decode(&self, path: &Path) -> EngineResult<DecodedAudio> {
        let mut reader = WavReader::open(path).map_err(|e| e.into_engine_error(path))?;
        let samples = reader.read_mono().map_err(|e| e.into_engine_error(path))?;
        let format = reader.format();

        Ok(DecodedAudio {
            samples,
            sample_rate: format.sample_rate,
            channels: format.channels,
        })
    }
}
