use super::{
    render_interleaved, AudioBackend, AudioStream, BackendError, DeviceId, DeviceInfo,
    OutputConfigRange, Result, SampleFormat, StreamConfig,
};
use cadence_rt::{mark_realtime_thread, CallbackHandle};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};

/// Frames rendered per chunk when the device format is not `f32`.
const CONVERSION_CHUNK_FRAMES: usize = 1024;

pub struct CpalBackend {
    host: cpal::Host,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }
}

fn backend_err(err: impl std::fmt::Display) -> BackendError {
    BackendError::Backend(err.to_string())
}

fn to_cpal_format(format: SampleFormat) -> cpal::SampleFormat {
    match format {
        SampleFormat::I8 => cpal::SampleFormat::I8,
        SampleFormat::I16 => cpal::SampleFormat::I16,
        SampleFormat::I32 => cpal::SampleFormat::I32,
        SampleFormat::I64 => cpal::SampleFormat::I64,
        SampleFormat::U8 => cpal::SampleFormat::U8,
        SampleFormat::U16 => cpal::SampleFormat::U16,
        SampleFormat::U32 => cpal::SampleFormat::U32,
        SampleFormat::U64 => cpal::SampleFormat::U64,
        SampleFormat::F32 => cpal::SampleFormat::F32,
        SampleFormat::F64 => cpal::SampleFormat::F64,
    }
}

fn from_cpal_format(format: cpal::SampleFormat) -> Option<SampleFormat> {
    SampleFormat::ALL
        .into_iter()
        .find(|candidate| to_cpal_format(*candidate) == format)
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve_device(&self, device: &DeviceId) -> Result<cpal::Device> {
        if device.is_default() {
            return self
                .host
                .default_output_device()
                .ok_or_else(|| BackendError::DeviceNotFound("default output".into()));
        }
        let devices = self.host.output_devices().map_err(backend_err)?;
        for dev in devices {
            if let Ok(name) = dev.name() {
                if name == device.0 {
                    return Ok(dev);
                }
            }
        }
        Err(BackendError::DeviceNotFound(device.0.clone()))
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let default_output = self
            .host
            .default_output_device()
            .and_then(|device| device.name().ok())
            .unwrap_or_default();
        let devices = self.host.output_devices().map_err(backend_err)?;
        Ok(devices
            .map(|device| {
                let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
                DeviceInfo {
                    id: DeviceId(name.clone()),
                    is_default_output: name == default_output,
                    name,
                }
            })
            .collect())
    }

    fn default_output(&self) -> Result<DeviceId> {
        self.host
            .default_output_device()
            .and_then(|device| device.name().ok())
            .map(DeviceId)
            .ok_or_else(|| BackendError::Backend("no default output device".into()))
    }

    fn output_config_ranges(&self, device: &DeviceId) -> Result<Vec<OutputConfigRange>> {
        let device = self.resolve_device(device)?;
        let supported = device.supported_output_configs().map_err(backend_err)?;
        Ok(supported
            .filter_map(|range| {
                let sample_format = from_cpal_format(range.sample_format())?;
                let buffer_size = match range.buffer_size() {
                    cpal::SupportedBufferSize::Range { min, max } => Some(*min..=*max),
                    cpal::SupportedBufferSize::Unknown => None,
                };
                Some(OutputConfigRange {
                    channels: range.channels(),
                    sample_format,
                    sample_rate: range.min_sample_rate().0..=range.max_sample_rate().0,
                    buffer_size,
                })
            })
            .collect())
    }

    fn open_output_stream(
        &self,
        device: &DeviceId,
        config: &StreamConfig,
        callback: CallbackHandle,
    ) -> Result<Box<dyn AudioStream>> {
        let device = self.resolve_device(device)?;
        let stream_config = cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: match config.buffer_size {
                Some(frames) => cpal::BufferSize::Fixed(frames),
                None => cpal::BufferSize::Default,
            },
        };
        let stream = match config.sample_format {
            SampleFormat::F32 => build_f32_stream(&device, &stream_config, callback)?,
            SampleFormat::I8 => build_converting_stream::<i8>(&device, &stream_config, callback)?,
            SampleFormat::I16 => build_converting_stream::<i16>(&device, &stream_config, callback)?,
            SampleFormat::I32 => build_converting_stream::<i32>(&device, &stream_config, callback)?,
            SampleFormat::I64 => build_converting_stream::<i64>(&device, &stream_config, callback)?,
            SampleFormat::U8 => build_converting_stream::<u8>(&device, &stream_config, callback)?,
            SampleFormat::U16 => build_converting_stream::<u16>(&device, &stream_config, callback)?,
            SampleFormat::U32 => build_converting_stream::<u32>(&device, &stream_config, callback)?,
            SampleFormat::U64 => build_converting_stream::<u64>(&device, &stream_config, callback)?,
            SampleFormat::F64 => build_converting_stream::<f64>(&device, &stream_config, callback)?,
        };
        tracing::info!(%config, "opened cpal output stream");
        Ok(Box::new(CpalStream { stream }))
    }
}

fn build_f32_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    callback: CallbackHandle,
) -> Result<cpal::Stream> {
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                mark_realtime_thread();
                render_interleaved(&callback, data, channels, sample_rate);
            },
            move |err| {
                tracing::error!(?err, "cpal output stream error");
            },
            None,
        )
        .map_err(backend_err)
}

fn build_converting_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    callback: CallbackHandle,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = (config.channels as usize).max(1);
    let sample_rate = config.sample_rate.0;
    let mut scratch = vec![0.0f32; CONVERSION_CHUNK_FRAMES * channels];
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mark_realtime_thread();
                for chunk in data.chunks_mut(scratch.len()) {
                    let staged = &mut scratch[..chunk.len()];
                    render_interleaved(&callback, staged, channels, sample_rate);
                    for (out, sample) in chunk.iter_mut().zip(staged.iter()) {
                        *out = T::from_sample(*sample);
                    }
                }
            },
            move |err| {
                tracing::error!(?err, "cpal output stream error");
            },
            None,
        )
        .map_err(backend_err)
}

struct CpalStream {
    stream: cpal::Stream,
}

// cpal::Stream is !Send on some hosts; the engine only touches it from the
// thread that owns the engine.
unsafe impl Send for CpalStream {}

impl AudioStream for CpalStream {
    fn start(&self) -> Result<()> {
        self.stream.play().map_err(backend_err)
    }

    fn stop(&self) -> Result<()> {
        self.stream.pause().map_err(backend_err)
    }
}
