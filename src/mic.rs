//! Real-microphone amplitude source (cargo feature `mic`). cpal streams are
//! not `Send`, so the stream lives on its own thread and the poll side only
//! reads an atomic peak holder.

use crate::log_debug;
use crate::sampler::AmplitudeSource;
use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Recorder amplitude units top out at the 16-bit sample ceiling.
const AMPLITUDE_FULL_SCALE: f32 = 32_767.0;

/// Polled view of the loudest sample heard since the previous poll, in the
/// same 0..=32767 units the dispatcher's threshold is expressed in.
pub struct MicAmplitudeSource {
    peak: Arc<AtomicU32>,
    shutdown: Arc<AtomicBool>,
    device_name: String,
}

impl MicAmplitudeSource {
    /// Open the named input device (or the system default) and start
    /// capturing. Fails if the device is missing or its format is unusable.
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let peak = Arc::new(AtomicU32::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();
        let requested = device_name.map(str::to_string);
        let peak_for_stream = Arc::clone(&peak);
        let shutdown_for_stream = Arc::clone(&shutdown);

        thread::spawn(move || {
            match build_stream(requested.as_deref(), peak_for_stream) {
                Ok((stream, name)) => {
                    let _ = ready_tx.send(Ok(name));
                    while !shutdown_for_stream.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(50));
                    }
                    drop(stream);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            }
        });

        let device_name = ready_rx
            .recv()
            .map_err(|_| anyhow!("microphone capture thread exited before reporting readiness"))??;
        Ok(Self {
            peak,
            shutdown,
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl Drop for MicAmplitudeSource {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl AmplitudeSource for MicAmplitudeSource {
    fn current_amplitude(&self) -> u32 {
        self.peak.swap(0, Ordering::SeqCst)
    }
}

fn build_stream(
    requested: Option<&str>,
    peak: Arc<AtomicU32>,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = match requested {
        Some(name) => host
            .input_devices()
            .context("failed to enumerate input devices")?
            .find(|device| device.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("input device `{name}` not found"))?,
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("no default input device available"))?,
    };
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let config = device
        .default_input_config()
        .context("failed to query default input config")?;

    let err_fn = |err| log_debug(&format!("mic|stream_error|{err}"));
    let stream = match config.sample_format() {
        SampleFormat::F32 => {
            let stream_config: cpal::StreamConfig = config.into();
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| store_peak_f32(data, &peak),
                err_fn,
                None,
            )?
        }
        SampleFormat::I16 => {
            let stream_config: cpal::StreamConfig = config.into();
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| store_peak_i16(data, &peak),
                err_fn,
                None,
            )?
        }
        other => bail!("unsupported input sample format {other:?}"),
    };
    stream.play().context("failed to start microphone stream")?;
    Ok((stream, name))
}

fn store_peak_f32(samples: &[f32], peak: &AtomicU32) {
    let frame_peak = samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max);
    let scaled = (frame_peak * AMPLITUDE_FULL_SCALE).min(AMPLITUDE_FULL_SCALE) as u32;
    peak.fetch_max(scaled, Ordering::SeqCst);
}

fn store_peak_i16(samples: &[i16], peak: &AtomicU32) {
    let frame_peak = samples
        .iter()
        .map(|s| u32::from(s.unsigned_abs()))
        .max()
        .unwrap_or(0);
    peak.fetch_max(frame_peak, Ordering::SeqCst);
}
