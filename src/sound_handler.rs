//! SoundHandler (component D): background-loaded, gapless playlist
//! source feeding the audio thread silence when nothing is queued.
//!
//! Grounded on `original_source/pybinsim/soundhandler.py`. The file-loader
//! thread polls a "new file requested" flag at roughly 20 Hz
//! (`time.sleep(0.05)` in the original) and decodes the next file into an
//! internal ring buffer while the audio thread drains blocks from it,
//! never blocking on I/O itself.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::SourceError;

/// How often the loader thread checks for a pending file-change request.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

struct DecodedSound {
    channels: Vec<Vec<f32>>,
}

impl DecodedSound {
    fn silence(num_channels: usize, frames: usize) -> Self {
        Self {
            channels: vec![vec![0.0f32; frames]; num_channels.max(1)],
        }
    }

    fn len(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }
}

fn decode_wav(path: &Path, expected_sample_rate: u32) -> Result<DecodedSound, SourceError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| SourceError::Decode(path.to_path_buf(), e.to_string()))?;
    let spec = reader.spec();
    if spec.sample_rate != expected_sample_rate {
        return Err(SourceError::SampleRateMismatch {
            path: path.to_path_buf(),
            file_rate: spec.sample_rate,
            engine_rate: expected_sample_rate,
        });
    }
    let num_channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| SourceError::Decode(path.to_path_buf(), e.to_string()))?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_val))
                .collect::<Result<_, _>>()
                .map_err(|e| SourceError::Decode(path.to_path_buf(), e.to_string()))?
        }
    };

    let mut channels = vec![Vec::with_capacity(samples.len() / num_channels.max(1)); num_channels.max(1)];
    for frame in samples.chunks(num_channels.max(1)) {
        for (ch, sample) in frame.iter().enumerate() {
            channels[ch].push(*sample);
        }
    }

    Ok(DecodedSound { channels })
}

/// Shared mutable state between the loader thread and the public handle.
struct Shared {
    playlist: Vec<PathBuf>,
    playlist_index: usize,
    current: Option<DecodedSound>,
    read_position: usize,
    loop_sound: bool,
    new_file_requested: bool,
    last_error: Option<SourceError>,
}

/// Double-buffered playlist player with a background decode thread.
///
/// A single handler decodes one (possibly multichannel) source at a time —
/// `max_channels` is only a cap (`maxChannels` from config, §6), matching
/// the original's single `SoundHandler` feeding `N` convolvers rather than
/// one handler per convolver.
pub struct SoundHandler {
    shared: Arc<Mutex<Shared>>,
    running: Arc<AtomicBool>,
    loader: Option<JoinHandle<()>>,
    max_channels: usize,
}

impl SoundHandler {
    /// `playlist_spec` is the `soundfile` config value: file paths joined
    /// by `#`, matching `request_new_sound_file`'s split in the original.
    /// `max_channels` caps how many of a decoded file's channels are kept
    /// (extras are dropped with a warning); it is not the channel count
    /// itself, which tracks whatever is actually decoded. `sampling_rate`
    /// is the engine's configured `samplingRate` (§6); every decoded file
    /// must match it exactly, mirroring `soundhandler.py`'s `assert fs ==
    /// self.fs`.
    pub fn new(playlist_spec: &str, max_channels: usize, loop_sound: bool, sampling_rate: u32) -> Self {
        let playlist: Vec<PathBuf> = playlist_spec
            .split('#')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();

        let shared = Arc::new(Mutex::new(Shared {
            playlist,
            playlist_index: 0,
            current: None,
            read_position: 0,
            loop_sound,
            new_file_requested: true,
            last_error: None,
        }));
        let running = Arc::new(AtomicBool::new(true));

        let loader = {
            let shared = Arc::clone(&shared);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("binsim-file-loader".into())
                .spawn(move || Self::run_loader(shared, running, max_channels, sampling_rate))
                .expect("failed to spawn file loader thread")
        };

        Self {
            shared,
            running,
            loader: Some(loader),
            max_channels: max_channels.max(1),
        }
    }

    fn run_loader(shared: Arc<Mutex<Shared>>, running: Arc<AtomicBool>, max_channels: usize, sampling_rate: u32) {
        let max_channels = max_channels.max(1);
        while running.load(Ordering::Acquire) {
            let next_path = {
                let mut state = shared.lock().unwrap();
                if !state.new_file_requested || state.playlist.is_empty() {
                    None
                } else {
                    let path = state.playlist[state.playlist_index % state.playlist.len()].clone();
                    state.new_file_requested = false;
                    Some(path)
                }
            };

            if let Some(path) = next_path {
                match decode_wav(&path, sampling_rate) {
                    Ok(mut sound) => {
                        if sound.channels.len() > max_channels {
                            tracing::warn!(
                                path = %path.display(),
                                decoded = sound.channels.len(),
                                max_channels,
                                "source has more channels than maxChannels, dropping extras"
                            );
                            sound.channels.truncate(max_channels);
                        }
                        let mut state = shared.lock().unwrap();
                        state.current = Some(sound);
                        state.read_position = 0;
                    }
                    Err(err) => {
                        tracing::error!(path = %path.display(), error = %err, "failed to decode sound file");
                        let mut state = shared.lock().unwrap();
                        state.current = Some(DecodedSound::silence(1, 4096));
                        state.read_position = 0;
                        state.last_error = Some(err);
                    }
                }
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Replaces the playlist and requests an immediate reload, as
    /// `request_new_sound_file` does in the original.
    pub fn request_new_sound_file(&self, playlist_spec: &str) {
        let playlist: Vec<PathBuf> = playlist_spec
            .split('#')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        let mut state = self.shared.lock().unwrap();
        state.playlist = playlist;
        state.playlist_index = 0;
        state.new_file_requested = true;
    }

    /// Advances to the next playlist entry, or wraps to the start if
    /// `loop_sound` is set; otherwise leaves the index pinned at the end
    /// and the handler begins emitting silence.
    fn request_next_sound_file(&self) {
        let mut state = self.shared.lock().unwrap();
        if state.playlist.is_empty() {
            return;
        }
        if state.playlist_index + 1 < state.playlist.len() {
            state.playlist_index += 1;
            state.new_file_requested = true;
        } else if state.loop_sound {
            state.playlist_index = 0;
            state.new_file_requested = true;
        }
        // else: playlist exhausted and not looping, stay silent.
    }

    /// Pulls `block_size` samples per channel of whatever is currently
    /// active, returning one `block_size`-sample vector per channel
    /// (§4.D: "buffer_read() → block of shape (C_active, B)"). Returns a
    /// single silent channel whenever nothing has finished decoding yet,
    /// mirroring `buffer_add_silence`; the caller reads the active
    /// channel count straight off the returned block's length, so the two
    /// can never disagree about which block boundary they apply to.
    pub fn read_block(&self, block_size: usize) -> Vec<Vec<f32>> {
        let mut state = self.shared.lock().unwrap();
        let Some(sound) = state.current.as_ref() else {
            return vec![vec![0.0f32; block_size]; 1];
        };

        let num_channels = sound.channels.len().max(1);
        let available = sound.len().saturating_sub(state.read_position);
        let mut out = vec![vec![0.0f32; block_size]; num_channels];
        let to_copy = available.min(block_size);

        for (ch, out_channel) in out.iter_mut().enumerate() {
            if let Some(src) = sound.channels.get(ch).or_else(|| sound.channels.first()) {
                out_channel[..to_copy].copy_from_slice(&src[state.read_position..state.read_position + to_copy]);
            }
        }
        state.read_position += to_copy;

        let exhausted = state.read_position >= sound.len();
        drop(state);
        if exhausted {
            self.request_next_sound_file();
        }
        out
    }

    /// Upper bound (`maxChannels`) on how many channels any decoded
    /// source will present; the actual active count for a given block is
    /// `read_block(..).len()`.
    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// Signals the loader thread to stop and joins it.
    pub fn close(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.loader.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SoundHandler {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.loader.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_wav(path: &Path, samples: &[f32]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn wait_until_loaded(handler: &SoundHandler, block_size: usize) -> Vec<Vec<f32>> {
        for _ in 0..100 {
            let block = handler.read_block(block_size);
            if block[0].iter().any(|s| *s != 0.0) {
                return block;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        handler.read_block(block_size)
    }

    #[test]
    fn emits_silence_before_first_file_is_decoded() {
        let handler = SoundHandler::new("", 1, false, 44100);
        let block = handler.read_block(64);
        assert!(block[0].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn plays_back_decoded_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, &[1.0, 0.5, -0.5, -1.0]);

        let handler = SoundHandler::new(path.to_str().unwrap(), 1, false, 44100);
        let block = wait_until_loaded(&handler, 4);
        assert_eq!(block[0], vec![1.0, 0.5, -0.5, -1.0]);
        handler.close();
    }

    #[test]
    fn non_looping_playlist_falls_silent_after_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_wav(&path, &[1.0, 1.0]);

        let handler = SoundHandler::new(path.to_str().unwrap(), 1, false, 44100);
        let _ = wait_until_loaded(&handler, 2);
        let tail = handler.read_block(2);
        assert!(tail[0].iter().all(|s| *s == 0.0));
        handler.close();
    }

    fn write_multichannel_wav(path: &Path, channels: usize, frames: &[Vec<f32>]) {
        let spec = hound::WavSpec {
            channels: channels as u16,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for s in frame {
                writer.write_sample(*s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn active_channel_count_tracks_the_decoded_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("three.wav");
        write_multichannel_wav(
            &path,
            3,
            &[vec![1.0, 2.0, 3.0], vec![0.5, 0.5, 0.5], vec![-1.0, -2.0, -3.0]],
        );

        let handler = SoundHandler::new(path.to_str().unwrap(), 4, false, 44100);
        let block = wait_until_loaded(&handler, 1);
        assert_eq!(block.len(), 3);
        handler.close();
    }

    #[test]
    fn channels_beyond_max_channels_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("three.wav");
        write_multichannel_wav(
            &path,
            3,
            &[vec![1.0, 2.0, 3.0], vec![0.5, 0.5, 0.5], vec![-1.0, -2.0, -3.0]],
        );

        let handler = SoundHandler::new(path.to_str().unwrap(), 2, false, 44100);
        let block = wait_until_loaded(&handler, 1);
        assert_eq!(block.len(), 2);
        handler.close();
    }

    #[test]
    fn decode_rejects_a_file_whose_sample_rate_does_not_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrong_rate.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(1.0f32).unwrap();
        writer.finalize().unwrap();

        let err = decode_wav(&path, 44100).unwrap_err();
        assert!(matches!(
            err,
            SourceError::SampleRateMismatch {
                file_rate: 48000,
                engine_rate: 44100,
                ..
            }
        ));
    }
}
