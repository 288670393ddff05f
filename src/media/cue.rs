//! Audio Cues - Klingelton während des Verbindungsaufbaus
//!
//! Mit dem Feature `native-audio` spielt [`RingbackTone`] einen Freiton
//! über cpal. Ohne Feature steht nur [`SilentCue`] zur Verfügung.

use std::sync::atomic::{AtomicBool, Ordering};

/// Platzhalter-Ton, bis Medien laufen.
///
/// `start()` und `stop()` müssen idempotent sein.
pub trait AudioCue: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn is_playing(&self) -> bool;
}

// ============================================================================
// SILENT CUE
// ============================================================================

/// Cue ohne Ton, merkt sich nur den Zustand
#[derive(Debug, Default)]
pub struct SilentCue {
    playing: AtomicBool,
}

impl SilentCue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioCue for SilentCue {
    fn start(&self) {
        self.playing.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

#[cfg(feature = "native-audio")]
pub use native::{CueError, RingbackTone};

#[cfg(feature = "native-audio")]
mod native {
    use super::AudioCue;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, Stream};
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use thiserror::Error;

    /// Freiton: 440 Hz + 480 Hz, 2 s an, 4 s aus
    const TONE_A: f32 = 440.0;
    const TONE_B: f32 = 480.0;
    const CADENCE_ON_SECS: f32 = 2.0;
    const CADENCE_PERIOD_SECS: f32 = 6.0;
    const AMPLITUDE: f32 = 0.1;

    #[derive(Error, Debug)]
    pub enum CueError {
        #[error("No audio output device found")]
        NoOutputDevice,

        #[error("Unsupported audio configuration: {0}")]
        UnsupportedConfig(String),

        #[error("Failed to build audio stream: {0}")]
        StreamBuildError(String),

        #[error("Failed to start audio stream: {0}")]
        StreamPlayError(String),
    }

    /// Freiton über das Standard-Ausgabegerät.
    ///
    /// cpal-Streams sind nicht `Send`, deshalb lebt der Stream auf einem
    /// eigenen Thread, der bis zum Stop-Signal wartet.
    #[derive(Default)]
    pub struct RingbackTone {
        control: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl RingbackTone {
        pub fn new() -> Self {
            Self::default()
        }

        fn build_stream() -> Result<Stream, CueError> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or(CueError::NoOutputDevice)?;

            let supported = device
                .default_output_config()
                .map_err(|e| CueError::UnsupportedConfig(e.to_string()))?;
            if supported.sample_format() != SampleFormat::F32 {
                return Err(CueError::UnsupportedConfig(format!(
                    "sample format {:?}",
                    supported.sample_format()
                )));
            }

            let config: cpal::StreamConfig = supported.config();
            let sample_rate = config.sample_rate.0 as f32;
            let channels = config.channels as usize;
            let mut clock: u64 = 0;

            tracing::debug!(
                "Ringback tone: {} Hz, {} channel(s)",
                config.sample_rate.0,
                channels
            );

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let t = clock as f32 / sample_rate;
                            clock = clock.wrapping_add(1);

                            let sample = if t % CADENCE_PERIOD_SECS < CADENCE_ON_SECS {
                                let two_pi = 2.0 * std::f32::consts::PI;
                                AMPLITUDE
                                    * ((two_pi * TONE_A * t).sin() + (two_pi * TONE_B * t).sin())
                                    / 2.0
                            } else {
                                0.0
                            };

                            for s in frame.iter_mut() {
                                *s = sample;
                            }
                        }
                    },
                    |err| {
                        tracing::error!("Ringback playback error: {}", err);
                    },
                    None,
                )
                .map_err(|e| CueError::StreamBuildError(e.to_string()))
        }
    }

    impl AudioCue for RingbackTone {
        fn start(&self) {
            let mut control = self.control.lock();
            if control.is_some() {
                return;
            }

            let (stop_tx, stop_rx) = mpsc::channel::<()>();
            std::thread::spawn(move || {
                let stream = match Self::build_stream() {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::warn!("Ringback tone unavailable: {}", e);
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    tracing::warn!("{}", CueError::StreamPlayError(e.to_string()));
                    return;
                }
                // Blockiert bis stop() sendet oder der Sender fällt
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("Ringback tone stopped");
            });

            *control = Some(stop_tx);
        }

        fn stop(&self) {
            if let Some(stop_tx) = self.control.lock().take() {
                let _ = stop_tx.send(());
            }
        }

        fn is_playing(&self) -> bool {
            self.control.lock().is_some()
        }
    }

    impl Drop for RingbackTone {
        fn drop(&mut self) {
            self.stop();
        }
    }
}
