//! Audio Handler - Mikrofon Capture und Playback
//!
//! Verwendet cpal für Cross-Platform Audio I/O. Aufgenommenes Audio wird
//! auf 8 kHz mono gebracht und in den Capture-Buffer geschrieben, der
//! Transport füllt den Playback-Buffer mit dekodiertem Remote-Audio.

use super::media::{AudioBuffer, MediaCapture, MediaError, MediaSource, MediaTap};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate auf der Leitung (PCMU)
pub const SAMPLE_RATE: u32 = 8000;

/// Bevorzugte Sample Rate der Geräte
const DEVICE_SAMPLE_RATE: u32 = 48000;

/// Frame Size in Samples (20ms @ 8kHz = 160 samples)
pub const FRAME_SIZE: usize = 160;

pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Buffer Size für Audio-Ring-Buffer (500ms)
const RING_BUFFER_SIZE: usize = FRAME_SIZE * 25;

// ============================================================================
// AUDIO HANDLER
// ============================================================================

/// Handler für Audio Input/Output eines Anrufs
pub struct AudioHandler {
    input_device: Option<Device>,
    output_device: Option<Device>,
    // Streams werden in Option gehalten und bei stop() gedroppt
    input_stream: Option<Stream>,
    output_stream: Option<Stream>,

    capture_buffer: AudioBuffer,
    playback_buffer: AudioBuffer,

    is_muted: Arc<Mutex<bool>>,

    /// Audio Level (0.0 - 1.0) für Visualisierung
    input_level: Arc<Mutex<f32>>,
    output_level: Arc<Mutex<f32>>,
}

// AudioHandler ist nicht automatisch Send wegen Stream.
// Die Streams werden nur über &mut self angefasst.
unsafe impl Send for AudioHandler {}

impl AudioHandler {
    /// Erstellt einen neuen AudioHandler mit den Standardgeräten
    pub fn new() -> Result<Self, MediaError> {
        let host = cpal::default_host();

        let input_device = host.default_input_device();
        let output_device = host.default_output_device();

        if input_device.is_none() {
            return Err(MediaError::AccessDenied(
                "No audio input device found".to_string(),
            ));
        }
        if output_device.is_none() {
            tracing::warn!("No audio output device found");
        }

        Ok(Self {
            input_device,
            output_device,
            input_stream: None,
            output_stream: None,
            capture_buffer: AudioBuffer::with_capacity(RING_BUFFER_SIZE),
            playback_buffer: AudioBuffer::with_capacity(RING_BUFFER_SIZE),
            is_muted: Arc::new(Mutex::new(false)),
            input_level: Arc::new(Mutex::new(0.0)),
            output_level: Arc::new(Mutex::new(0.0)),
        })
    }

    /// Öffnet Mikrofon und Lautsprecher
    ///
    /// Ohne Mikrofon gibt es keinen Anruf; ein fehlender Lautsprecher wird
    /// nur geloggt.
    pub fn open() -> Result<Self, MediaError> {
        let mut handler = Self::new()?;
        handler.start_capture()?;
        if let Err(e) = handler.start_playback() {
            tracing::warn!("Audio playback unavailable: {}", e);
        }
        Ok(handler)
    }

    /// Startet Audio Capture (Mikrofon)
    pub fn start_capture(&mut self) -> Result<(), MediaError> {
        let device = self
            .input_device
            .as_ref()
            .ok_or_else(|| MediaError::AccessDenied("No audio input device found".to_string()))?;

        let config = Self::find_best_input_config(device)?;

        tracing::info!(
            "Starting audio capture: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let capture_buffer = self.capture_buffer.clone();
        let is_muted = Arc::clone(&self.is_muted);
        let input_level = Arc::clone(&self.input_level);
        let mut resampler = LinearResampler::new(config.sample_rate.0, SAMPLE_RATE);
        let channels = usize::from(config.channels);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix(data, channels);
                    *input_level.lock() = rms(&mono).min(1.0);

                    if *is_muted.lock() {
                        return;
                    }

                    let samples = resampler.process(&mono);
                    capture_buffer.push_slice(&samples);
                },
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| MediaError::AccessDenied(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MediaError::AccessDenied(e.to_string()))?;

        self.input_stream = Some(stream);
        Ok(())
    }

    /// Startet Audio Playback (Lautsprecher)
    pub fn start_playback(&mut self) -> Result<(), MediaError> {
        let device = self
            .output_device
            .as_ref()
            .ok_or_else(|| MediaError::Device("No audio output device found".to_string()))?;

        let config = Self::find_best_output_config(device)?;

        tracing::info!(
            "Starting audio playback: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let playback_buffer = self.playback_buffer.clone();
        let output_level = Arc::clone(&self.output_level);
        let step = SAMPLE_RATE as f32 / config.sample_rate.0 as f32;
        let channels = usize::from(config.channels).max(1);
        let mut position = 1.0f32;
        let mut current = 0.0f32;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut level_sum = 0.0f32;
                    let mut frames = 0usize;

                    // Mono auf alle Kanäle, Sample-and-Hold Resampling
                    for frame in data.chunks_mut(channels) {
                        position += step;
                        while position >= 1.0 {
                            current = playback_buffer.pop().unwrap_or(0.0);
                            position -= 1.0;
                        }
                        frame.iter_mut().for_each(|s| *s = current);
                        level_sum += current.abs();
                        frames += 1;
                    }

                    if frames > 0 {
                        *output_level.lock() = (level_sum / frames as f32).min(1.0);
                    }
                },
                |err| {
                    tracing::error!("Audio playback error: {}", err);
                },
                None,
            )
            .map_err(|e| MediaError::Device(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MediaError::Device(e.to_string()))?;

        self.output_stream = Some(stream);
        Ok(())
    }

    /// Findet die beste Input-Konfiguration
    fn find_best_input_config(device: &Device) -> Result<StreamConfig, MediaError> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| MediaError::AccessDenied(e.to_string()))?;

        Self::select_best_config(configs.collect())
    }

    /// Findet die beste Output-Konfiguration
    fn find_best_output_config(device: &Device) -> Result<StreamConfig, MediaError> {
        let configs = device
            .supported_output_configs()
            .map_err(|e| MediaError::Device(e.to_string()))?;

        Self::select_best_config(configs.collect())
    }

    /// Wählt die beste Konfiguration aus einer Liste
    fn select_best_config(
        configs: Vec<SupportedStreamConfigRange>,
    ) -> Result<StreamConfig, MediaError> {
        // Priorität: 48kHz > andere, F32 > andere
        let target_rate = cpal::SampleRate(DEVICE_SAMPLE_RATE);

        for config in &configs {
            if config.min_sample_rate() <= target_rate
                && config.max_sample_rate() >= target_rate
                && config.sample_format() == SampleFormat::F32
            {
                return Ok(config.clone().with_sample_rate(target_rate).into());
            }
        }

        for config in &configs {
            if config.sample_format() == SampleFormat::F32 {
                return Ok(config.clone().with_max_sample_rate().into());
            }
        }

        if let Some(config) = configs.first() {
            return Ok(config.clone().with_max_sample_rate().into());
        }

        Err(MediaError::Device(
            "No suitable audio configuration found".to_string(),
        ))
    }
}

impl MediaCapture for AudioHandler {
    fn set_muted(&self, muted: bool) {
        *self.is_muted.lock() = muted;
        tracing::debug!("Audio muted: {}", muted);
    }

    fn tap(&self) -> MediaTap {
        MediaTap {
            capture: self.capture_buffer.clone(),
            playback: self.playback_buffer.clone(),
        }
    }

    fn levels(&self) -> (f32, f32) {
        (*self.input_level.lock(), *self.output_level.lock())
    }

    fn stop(&mut self) {
        self.input_stream = None;
        self.output_stream = None;
        tracing::info!("Audio streams stopped");
    }
}

// ============================================================================
// MEDIA SOURCE
// ============================================================================

/// Liefert AudioHandler für die Standardgeräte
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMediaSource;

#[async_trait]
impl MediaSource for CpalMediaSource {
    async fn acquire(&self) -> Result<Box<dyn MediaCapture>, MediaError> {
        // Geräte-Enumeration kann blockieren
        let handler = tokio::task::spawn_blocking(AudioHandler::open)
            .await
            .map_err(|e| MediaError::Device(e.to_string()))??;
        Ok(Box::new(handler))
    }
}

/// Repräsentiert ein Audio-Gerät
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub name: String,
    pub is_default: bool,
}

/// Gibt alle verfügbaren Audio-Geräte zurück (input, output)
pub fn list_devices() -> Result<(Vec<AudioDevice>, Vec<AudioDevice>), MediaError> {
    let host = cpal::default_host();

    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let to_devices = |devices: Vec<Device>, default: &Option<String>| -> Vec<AudioDevice> {
        devices
            .into_iter()
            .filter_map(|d| {
                d.name().ok().map(|name| AudioDevice {
                    is_default: Some(&name) == default.as_ref(),
                    name,
                })
            })
            .collect()
    };

    let inputs: Vec<Device> = host
        .input_devices()
        .map_err(|e| MediaError::Device(e.to_string()))?
        .collect();
    let outputs: Vec<Device> = host
        .output_devices()
        .map_err(|e| MediaError::Device(e.to_string()))?
        .collect();

    Ok((
        to_devices(inputs, &default_input),
        to_devices(outputs, &default_output),
    ))
}

// ============================================================================
// DSP HELPERS
// ============================================================================

/// Mittelt interleavte Kanäle zu mono
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-Resampling über Callback-Grenzen hinweg
///
/// Position und letztes Sample bleiben zwischen den Aufrufen erhalten, damit
/// keine Bruchteile verloren gehen.
struct LinearResampler {
    /// Quell-Samples pro Ziel-Sample
    step: f64,
    /// Position des nächsten Ziel-Samples relativ zum aktuellen Chunk;
    /// -1 bezeichnet das letzte Sample des vorherigen Chunks
    position: f64,
    last: f32,
}

impl LinearResampler {
    fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            step: f64::from(source_rate) / f64::from(target_rate.max(1)),
            position: 0.0,
            last: 0.0,
        }
    }

    fn process(&mut self, data: &[f32]) -> Vec<f32> {
        let Some(&tail) = data.last() else {
            return Vec::new();
        };

        let len = data.len() as f64;
        let sample = |index: isize| -> f32 {
            if index < 0 {
                self.last
            } else {
                data[index as usize]
            }
        };

        let mut out = Vec::with_capacity((len / self.step) as usize + 1);
        let mut position = self.position;
        while position < len - 1.0 {
            let index = position.floor();
            let frac = (position - index) as f32;
            let s1 = sample(index as isize);
            let s2 = sample(index as isize + 1);
            out.push(s1 + (s2 - s1) * frac);
            position += self.step;
        }

        self.position = position - len;
        self.last = tail;
        out
    }
}

/// RMS-Pegel
fn rms(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    (data.iter().map(|s| s * s).sum::<f32>() / data.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.25, -0.25], 1), vec![0.25, -0.25]);
    }

    #[test]
    fn resample_48k_to_8k_keeps_one_in_six() {
        let data: Vec<f32> = (0..960).map(|i| i as f32).collect();
        let mut resampler = LinearResampler::new(48000, SAMPLE_RATE);
        let out = resampler.process(&data);

        assert_eq!(out.len(), FRAME_SIZE);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 6.0).abs() < 1e-3);
        assert!((out[FRAME_SIZE - 1] - 954.0).abs() < 1e-2);
        assert!(resampler.process(&[]).is_empty());
    }

    #[test]
    fn resampler_keeps_rate_over_odd_chunks() {
        let chunks = [1024usize, 441, 512, 7, 999, 160, 1];

        for rate in [48000u32, 44100, 16000] {
            let mut resampler = LinearResampler::new(rate, SAMPLE_RATE);
            let mut total_in = 0usize;
            let mut total_out = 0usize;

            for round in 0..50 {
                for size in chunks {
                    let chunk = vec![0.1f32; size + round % 3];
                    total_in += chunk.len();
                    total_out += resampler.process(&chunk).len();
                }
            }

            let expected = total_in as f64 * f64::from(SAMPLE_RATE) / f64::from(rate);
            assert!(
                (total_out as f64 - expected).abs() <= 1.0,
                "rate {rate}: {total_out} samples, expected {expected}"
            );
        }
    }

    #[test]
    fn resampler_is_continuous_across_chunks() {
        let ramp: Vec<f32> = (0..3000).map(|i| i as f32).collect();
        let mut resampler = LinearResampler::new(48000, SAMPLE_RATE);

        let mut out = Vec::new();
        for chunk in ramp.chunks(1021) {
            out.extend(resampler.process(chunk));
        }

        for (i, sample) in out.iter().enumerate() {
            assert!(
                (sample - (i * 6) as f32).abs() < 1e-2,
                "sample {i} is {sample}"
            );
        }
    }

    #[test]
    fn rms_of_constant_signal() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }
}
