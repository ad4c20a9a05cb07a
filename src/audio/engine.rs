//! Audio device sink: drives the [`Mixer`] from a cpal output stream.
//!
//! The stream is built and kept alive on a dedicated `audio-output` thread,
//! since cpal streams are not `Send` on every platform. The mixer is moved
//! into the data callback; decks stay reachable from the control side
//! through their `Arc`s.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use log::{error, info, warn};

use crate::audio::device::is_supported_format;
use crate::audio::mixer::Mixer;
use crate::error::AudioError;
use crate::models::AudioBlock;

/// What the running stream was opened with
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub device_name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: String,
    pub block_size: usize,
}

pub struct OutputEngine {
    info: StreamInfo,
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    stream_errors: Arc<AtomicU64>,
}

impl OutputEngine {
    /// Open `device` with its default configuration and start pulling from `mixer`.
    ///
    /// The mixer must render at the device's channel count.
    pub fn start(device: Device, mut mixer: Mixer, block_size: usize) -> Result<Self, AudioError> {
        let device_name = device.name()
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to get device name: {}", e)))?;
        let default_config = device.default_output_config()
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to get default config: {}", e)))?;

        let sample_format = default_config.sample_format();
        if !is_supported_format(sample_format) {
            return Err(AudioError::UnsupportedSampleFormat {
                format: format!("{:?}", sample_format),
            });
        }

        let config: StreamConfig = default_config.config();
        if config.channels != mixer.channels() {
            return Err(AudioError::InitializationFailed(format!(
                "Mixer renders {} channels but '{}' expects {}",
                mixer.channels(),
                device_name,
                config.channels
            )));
        }

        let block_size = block_size.max(1);
        mixer.prepare(config.sample_rate.0, block_size);

        let info = StreamInfo {
            device_name,
            sample_rate: config.sample_rate.0,
            channels: config.channels,
            sample_format: format!("{:?}", sample_format),
            block_size,
        };

        let stream_errors = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let errors = Arc::clone(&stream_errors);
        let decks = mixer.decks().to_vec();

        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match sample_format {
                    SampleFormat::I16 => create_stream::<i16>(&device, &config, mixer, block_size, errors),
                    SampleFormat::U16 => create_stream::<u16>(&device, &config, mixer, block_size, errors),
                    _ => create_stream::<f32>(&device, &config, mixer, block_size, errors),
                };
                let stream = match stream.and_then(|stream| {
                    stream.play()
                        .map_err(|e| AudioError::StreamError(format!("Failed to start output stream: {}", e)))?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until stop() or the engine is dropped
                let _ = shutdown_rx.recv();
                let _ = stream.pause();
                drop(stream);
                for deck in &decks {
                    deck.release();
                }
            })
            .map_err(|e| AudioError::InitializationFailed(format!("Failed to create audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(AudioError::InitializationFailed("Audio thread exited during startup".to_string()));
            }
        }

        info!(
            "Output stream started on '{}': {} Hz, {} channels, {}, {} frame blocks",
            info.device_name, info.sample_rate, info.channels, info.sample_format, info.block_size
        );

        Ok(Self {
            info,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            stream_errors,
        })
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Errors reported by the device since the stream started
    pub fn stream_errors(&self) -> u64 {
        self.stream_errors.load(Ordering::Relaxed)
    }

    /// Stop the stream and join the audio thread
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Audio output thread panicked");
            }
            info!("Output stream on '{}' stopped", self.info.device_name);
        }
    }
}

impl Drop for OutputEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn create_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut mixer: Mixer,
    block_size: usize,
    errors: Arc<AtomicU64>,
) -> Result<Stream, AudioError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = config.channels as usize;
    let mut block = AudioBlock::with_capacity(config.channels, block_size);

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            // Render in chunks of at most block_size frames so buffers never grow
            for chunk in data.chunks_mut(block_size * channels) {
                let frames = chunk.len() / channels;
                mixer.pull_block(&mut block, frames);
                for (dst, &src) in chunk.iter_mut().zip(block.samples()) {
                    *dst = T::from_sample(src);
                }
            }
        },
        move |err| {
            if errors.fetch_add(1, Ordering::Relaxed) == 0 {
                warn!("Audio stream error: {}", err);
            }
        },
        None,
    )
    .map_err(|e| AudioError::StreamError(format!("Failed to build output stream: {}", e)))
}
