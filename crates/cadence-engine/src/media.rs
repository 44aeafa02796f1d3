//! Decoding audio files into engine-resident sample buffers.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Symphonia(#[from] SymphoniaError),
    #[error("no supported audio tracks found in source")]
    NoSupportedTracks,
    #[error("source contains no audio")]
    Empty,
}

/// Planar `f32` audio at its native sample rate. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAudio {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl StoredAudio {
    /// Pads shorter channels with silence so every channel has equal length.
    pub fn new(sample_rate: u32, mut channels: Vec<Vec<f32>>) -> Result<Self, DecodeError> {
        let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        if sample_rate == 0 || channels.is_empty() || frames == 0 {
            return Err(DecodeError::Empty);
        }
        for channel in &mut channels {
            channel.resize(frames, 0.0);
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Length in samples per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Left/right pair; mono sources feed both sides.
    pub(crate) fn stereo(&self) -> (&[f32], &[f32]) {
        let left = &self.channels[0];
        let right = self.channels.get(1).unwrap_or(left);
        (left, right)
    }
}

/// The "decode clip from path" collaborator.
pub trait Decoder: Send {
    fn decode(&self, path: &Path) -> Result<StoredAudio, DecodeError>;
}

/// Decodes anything symphonia's default registry understands.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for SymphoniaDecoder {
    fn decode(&self, path: &Path) -> Result<StoredAudio, DecodeError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let mut format = probed.format;
        let (codec_params, track_id) = {
            let track = format.default_track().ok_or(DecodeError::NoSupportedTracks)?;
            (track.codec_params.clone(), track.id)
        };
        let mut decoder =
            symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

        let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
        let mut channel_data: Vec<Vec<f32>> = codec_params
            .channels
            .map(|channels| vec![Vec::new(); channels.count()])
            .unwrap_or_default();
        let mut sample_buffer: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(err) => return Err(err.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(err)) => {
                    tracing::warn!(path = %path.display(), %err, "skipping undecodable packet");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let spec = *decoded.spec();
            sample_rate = spec.rate;
            let channel_count = spec.channels.count();
            if channel_data.len() < channel_count {
                channel_data.resize(channel_count, Vec::new());
            }

            match decoded {
                AudioBufferRef::F32(buffer) => {
                    for (index, channel) in channel_data.iter_mut().enumerate().take(channel_count)
                    {
                        channel.extend_from_slice(buffer.chan(index));
                    }
                }
                other => {
                    let buf = sample_buffer.get_or_insert_with(|| {
                        SampleBuffer::<f32>::new(other.capacity() as u64, spec)
                    });
                    buf.copy_interleaved_ref(other);
                    let samples = buf.samples();
                    for (index, channel) in channel_data.iter_mut().enumerate().take(channel_count)
                    {
                        channel.extend(samples[index..].iter().step_by(channel_count).copied());
                    }
                }
            }
        }

        StoredAudio::new(sample_rate, channel_data)
    }
}
