//! # Audio Capture Module
//!
//! Real-time microphone capture built on CPAL (Cross-Platform Audio
//! Library). This module owns device enumeration and the capture session:
//! one live input stream feeding a rolling analysis window that the
//! detection loop snapshots once per cycle. A session binds exactly one
//! device to one stream; reselecting a device means closing the old
//! session before opening the new one.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::TunerError;

/// Number of samples in the analysis window handed to each detection cycle.
///
/// Larger windows buy frequency resolution at the cost of latency; 2048
/// samples is ~46ms at 44.1kHz. Fixed for the life of a session.
pub const WINDOW_SIZE: usize = 2048;

/// Preferred capture sample rate in Hz; the closest supported rate wins.
const TARGET_SAMPLE_RATE: u32 = 44_100;

/// One selectable audio input device.
///
/// CPAL identifies devices by name; the name is stable for the life of
/// the process and doubles as the opaque id used to open a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub label: String,
}

/// Enumerates the host's audio input devices.
///
/// May be called again at any time to refresh the list, e.g. after
/// plugging in an interface. Devices whose name cannot be read are
/// skipped.
pub fn input_devices() -> Result<Vec<DeviceDescriptor>, TunerError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| TunerError::DeviceUnavailable(e.to_string()))?;
    Ok(devices
        .filter_map(|device| device.name().ok())
        .map(|name| DeviceDescriptor {
            id: name.clone(),
            label: name,
        })
        .collect())
}

/// A fixed-length frame of samples copied out of the rolling window,
/// together with the stream's sample rate.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Rolling window of the most recent [`WINDOW_SIZE`] mono samples.
///
/// The capture callback pushes from the audio thread; the detection loop
/// snapshots from its own thread. The window starts zero-filled, so early
/// snapshots read as silence instead of blocking until audio arrives.
#[derive(Debug, Clone)]
pub struct SharedWindow {
    samples: Arc<Mutex<VecDeque<f32>>>,
}

impl SharedWindow {
    pub fn new() -> Self {
        SharedWindow {
            samples: Arc::new(Mutex::new(VecDeque::from(vec![0.0; WINDOW_SIZE]))),
        }
    }

    /// Appends freshly captured samples, discarding the oldest overflow.
    pub fn push(&self, new_samples: &[f32]) {
        let mut window = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        window.extend(new_samples.iter().copied());
        let excess = window.len().saturating_sub(WINDOW_SIZE);
        window.drain(..excess);
    }

    /// Non-blocking copy of the current window, oldest sample first.
    pub fn snapshot(&self) -> Vec<f32> {
        let window = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        window.iter().copied().collect()
    }
}

impl Default for SharedWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// One live capture session: a playing input stream filling a rolling
/// window, bound to a single device.
///
/// [`CaptureSession::close`] consumes the session; dropping it pauses and
/// releases the stream on every path, so no capture resource can outlive
/// its session.
pub struct CaptureSession {
    device: DeviceDescriptor,
    window: SharedWindow,
    sample_rate: u32,
    stream: cpal::Stream,
}

impl CaptureSession {
    /// Opens a capture session on the named device, or on the host default
    /// (falling back to the first enumerated input) when `device_id` is
    /// `None`.
    pub fn open(device_id: Option<&str>) -> Result<CaptureSession> {
        let host = cpal::default_host();
        let device = match device_id {
            Some(id) => host
                .input_devices()
                .context("enumerating input devices")?
                .find(|d| d.name().map(|n| n == id).unwrap_or(false))
                .ok_or_else(|| anyhow!("input device {id:?} not found"))?,
            None => host
                .default_input_device()
                .or_else(|| {
                    host.input_devices()
                        .ok()
                        .and_then(|mut devices| devices.next())
                })
                .ok_or_else(|| anyhow!("no input device available"))?,
        };
        let name = device.name().context("reading device name")?;

        let configs = device
            .supported_input_configs()
            .with_context(|| format!("querying input formats of {name:?}"))?
            .collect::<Vec<_>>();
        let range = pick_input_config(configs)
            .ok_or_else(|| anyhow!("no supported f32 input format on {name:?}"))?;
        let sample_rate = cpal::SampleRate(
            TARGET_SAMPLE_RATE.clamp(range.min_sample_rate().0, range.max_sample_rate().0),
        );
        let config: cpal::StreamConfig = range.with_sample_rate(sample_rate).into();
        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;

        let window = SharedWindow::new();
        let callback_window = window.clone();
        let mut mono = Vec::new();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if channels <= 1 {
                        callback_window.push(data);
                    } else {
                        // Downmix interleaved channels by averaging each frame.
                        mono.clear();
                        mono.extend(
                            data.chunks_exact(channels)
                                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
                        );
                        callback_window.push(&mono);
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
            .with_context(|| format!("opening input stream on {name:?}"))?;
        stream.play().context("starting input stream")?;

        info!(device = %name, sample_rate, "capture session open");
        Ok(CaptureSession {
            device: DeviceDescriptor {
                id: name.clone(),
                label: name,
            },
            window,
            sample_rate,
            stream,
        })
    }

    /// The device this session is bound to.
    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Effective sample rate of the stream in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Copies the most recent analysis window out of the stream.
    pub fn snapshot(&self) -> AudioFrame {
        AudioFrame {
            samples: self.window.snapshot(),
            sample_rate: self.sample_rate,
        }
    }

    /// Stops the stream and releases the capture resources.
    pub fn close(self) {
        // Teardown happens in Drop so error paths release the device too.
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            warn!(device = %self.device.id, "error pausing stream on close: {e}");
        }
        info!(device = %self.device.id, "capture session closed");
    }
}

/// Picks the best input config range: f32 samples, fewest channels,
/// sample rate range closest to [`TARGET_SAMPLE_RATE`].
fn pick_input_config(
    configs: Vec<SupportedStreamConfigRange>,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let reachable =
                TARGET_SAMPLE_RATE.clamp(c.min_sample_rate().0, c.max_sample_rate().0);
            (c.channels(), TARGET_SAMPLE_RATE.abs_diff(reachable))
        })
}
