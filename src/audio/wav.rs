//! Canonical WAV codec for in-memory byte buffers
//!
//! The parser walks RIFF chunks by id instead of assuming the 44-byte canonical
//! layout, so files with `LIST`/`fact` chunks or a `data` chunk ahead of `fmt `
//! still parse. hound's reader requires `fmt ` first, so parsing stays here;
//! encoding goes through hound.
//!
//! All multi-byte fields are little-endian.

use crate::error::{Result, SeparationError};
use crate::types::StereoBuffer;
use std::io::Cursor;
use tracing::{debug, warn};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Sample encoding for [`encode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    /// 32-bit IEEE float, amplitude preserved exactly
    Float32,
    /// 16-bit signed integer, clamped to [-1, 1] and rounded
    Int16,
}

impl BitDepth {
    fn bits(self) -> u16 {
        match self {
            BitDepth::Float32 => 32,
            BitDepth::Int16 => 16,
        }
    }
}

/// Contents of the `fmt ` chunk that matter for decoding
#[derive(Debug, Clone, Copy)]
struct FmtChunk {
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn parse_fmt(body: &[u8]) -> Result<FmtChunk> {
    if body.len() < 16 {
        return Err(SeparationError::format_error(format!(
            "fmt chunk too short ({} bytes, need 16)",
            body.len()
        )));
    }

    let mut format_tag = read_u16(body, 0);
    if format_tag == WAVE_FORMAT_EXTENSIBLE {
        // cbSize(2) validBits(2) channelMask(4) then the sub-format GUID,
        // whose first two bytes carry the real format tag
        if body.len() < 40 {
            return Err(SeparationError::format_error(
                "WAVE_FORMAT_EXTENSIBLE fmt chunk is missing its sub-format",
            ));
        }
        format_tag = read_u16(body, 24);
    }

    Ok(FmtChunk {
        format_tag,
        channels: read_u16(body, 2),
        sample_rate: read_u32(body, 4),
        bits_per_sample: read_u16(body, 14),
    })
}

/// Parse a RIFF/WAVE byte buffer into a stereo waveform
///
/// Mono input is duplicated to both channels.
pub fn parse(bytes: &[u8]) -> Result<StereoBuffer> {
    if bytes.len() < 12 {
        return Err(SeparationError::format_error(format!(
            "buffer too short for a RIFF header ({} bytes)",
            bytes.len()
        )));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(SeparationError::format_error("not a RIFF/WAVE buffer"));
    }

    let mut fmt: Option<FmtChunk> = None;
    let mut data: Option<&[u8]> = None;
    let mut offset = 12usize;

    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = read_u32(bytes, offset + 4) as usize;
        let body_start = offset + 8;
        let declared_end = body_start.saturating_add(size);
        let body_end = declared_end.min(bytes.len());
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => fmt = Some(parse_fmt(body)?),
            b"data" => {
                if declared_end > bytes.len() {
                    warn!(
                        "WAV data chunk declares {} bytes but only {} are present, truncating",
                        size,
                        body.len()
                    );
                }
                data = Some(body);
            }
            other => {
                debug!(
                    "Skipping WAV chunk '{}' ({} bytes)",
                    String::from_utf8_lossy(other),
                    size
                );
            }
        }

        // Chunks are word aligned: odd sizes carry one pad byte
        offset = match declared_end.checked_add(size & 1) {
            Some(next) => next,
            None => break,
        };
    }

    let fmt = fmt.ok_or_else(|| SeparationError::format_error("missing fmt chunk"))?;
    let data = data.ok_or_else(|| SeparationError::format_error("missing data chunk"))?;

    if fmt.sample_rate == 0 {
        return Err(SeparationError::format_error("sample rate is zero"));
    }

    let channels = match fmt.channels {
        1 | 2 => fmt.channels as usize,
        n => {
            return Err(SeparationError::format_error(format!(
                "unsupported channel count {} (expected mono or stereo)",
                n
            )))
        }
    };

    let samples: Vec<f32> = match (fmt.format_tag, fmt.bits_per_sample) {
        (WAVE_FORMAT_IEEE_FLOAT, 32) => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        (WAVE_FORMAT_PCM, 16) => data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
        (tag, bits) => {
            return Err(SeparationError::format_error(format!(
                "unsupported encoding (format tag {:#06x}, {} bits per sample)",
                tag, bits
            )))
        }
    };

    // Drop a trailing partial frame, if any
    let whole = samples.len() - samples.len() % channels;
    let samples = &samples[..whole];

    let buffer = if channels == 1 {
        StereoBuffer::new(samples.to_vec(), samples.to_vec(), fmt.sample_rate)
    } else {
        StereoBuffer::from_interleaved(samples, fmt.sample_rate)
    };

    debug!(
        "Parsed WAV: {} frames @ {}Hz, {} channel(s), {} bits",
        buffer.len(),
        fmt.sample_rate,
        channels,
        fmt.bits_per_sample
    );

    Ok(buffer)
}

/// Encode a stereo waveform as WAV bytes
///
/// The header layout is hound's; [`parse`] reads both its plain and
/// extensible `fmt ` chunks.
pub fn encode(buffer: &StereoBuffer, depth: BitDepth) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: buffer.sample_rate,
        bits_per_sample: depth.bits(),
        sample_format: match depth {
            BitDepth::Float32 => hound::SampleFormat::Float,
            BitDepth::Int16 => hound::SampleFormat::Int,
        },
    };

    let mut output = Vec::new();
    let mut writer = hound::WavWriter::new(Cursor::new(&mut output), spec)
        .map_err(|e| SeparationError::encode_error(format!("Failed to start WAV: {}", e)))?;

    for (&l, &r) in buffer.left.iter().zip(buffer.right.iter()) {
        let written = match depth {
            BitDepth::Float32 => writer.write_sample(l).and_then(|_| writer.write_sample(r)),
            BitDepth::Int16 => writer
                .write_sample(quantize_i16(l))
                .and_then(|_| writer.write_sample(quantize_i16(r))),
        };
        written.map_err(|e| SeparationError::encode_error(format!("Failed to write sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| SeparationError::encode_error(format!("Failed to finalize WAV: {}", e)))?;
    Ok(output)
}

fn quantize_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}
