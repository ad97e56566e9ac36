//! FilterStorage (component B).
//!
//! Preloads every BRIR pair named in a manifest file into frequency-domain
//! blocked form, keyed by [`FilterKey`]. Immutable after [`FilterStorage::
//! load`] returns, so lookups need no locking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use num_complex::Complex;

use crate::error::{FilterNotFoundError, ManifestError, SourceError};
use crate::fft::FftKernel;
use crate::pose::FilterKey;

/// One BRIR pair in frequency-domain blocked form: `K` consecutive
/// `(B+1)`-bin spectra per ear, slot 0 is the oldest partition (see
/// `ConvolverFFTW`'s `multiply_and_add`, which reads partition `i` as "the
/// input block `i` blocks ago").
#[derive(Clone)]
pub struct Filter {
    pub ir_blocks: usize,
    pub tf_left: Arc<Vec<Complex<f32>>>,
    pub tf_right: Arc<Vec<Complex<f32>>>,
}

impl Filter {
    /// An all-silent filter of the given partition count, used as the
    /// convolver's initial state before the first `set_ir`.
    pub fn silence(ir_blocks: usize, bins: usize) -> Self {
        Self {
            ir_blocks,
            tf_left: Arc::new(vec![Complex::new(0.0, 0.0); ir_blocks * bins]),
            tf_right: Arc::new(vec![Complex::new(0.0, 0.0); ir_blocks * bins]),
        }
    }

    /// Transforms a stereo time-domain impulse response, already split
    /// into `K` per-ear blocks of `block_size` samples, into blocked
    /// frequency-domain form.
    fn from_time_domain(
        kernel: &FftKernel,
        left_blocks: &[Vec<f32>],
        right_blocks: &[Vec<f32>],
    ) -> Self {
        let bins = kernel.bins();
        let mut tf_left = Vec::with_capacity(left_blocks.len() * bins);
        let mut tf_right = Vec::with_capacity(right_blocks.len() * bins);
        for block in left_blocks {
            tf_left.extend(kernel.transform_block(block));
        }
        for block in right_blocks {
            tf_right.extend(kernel.transform_block(block));
        }
        Self {
            ir_blocks: left_blocks.len(),
            tf_left: Arc::new(tf_left),
            tf_right: Arc::new(tf_right),
        }
    }
}

/// First manifest token reserved for the headphone-equalization entry,
/// instead of a coordinate tuple.
const HEADPHONE_MARKER: &str = "HPFILTER";

/// Immutable, preloaded filter table.
pub struct FilterStorage {
    block_size: usize,
    ir_blocks: usize,
    table: HashMap<FilterKey, Filter>,
    headphone_filter: Option<Filter>,
}

impl FilterStorage {
    /// Parses `manifest_path`, decodes every referenced WAV file, and
    /// transforms it into blocked frequency-domain form. `filter_size` is
    /// `L` from §6 (`filterSize` config key); every entry must blocked to
    /// the same `K = L / block_size` partitions.
    pub fn load(
        manifest_path: &Path,
        filter_size: usize,
        block_size: usize,
    ) -> Result<Self, ManifestError> {
        let ir_blocks = filter_size / block_size;
        let kernel = FftKernel::new(block_size);

        let contents = std::fs::read_to_string(manifest_path)
            .map_err(|e| ManifestError::Io(manifest_path.to_path_buf(), e))?;

        let mut table = HashMap::new();
        let mut headphone_filter = None;
        let mut first_entry: Option<(PathBuf, usize)> = None;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return Err(ManifestError::MalformedLine(line.to_string()));
            }
            let (key_tokens, path_token) = tokens.split_at(tokens.len() - 1);
            let path = PathBuf::from(path_token[0]);

            let (left_blocks, right_blocks) =
                load_ir_blocks(&path, block_size).map_err(|e| ManifestError::Decode(path.clone(), e))?;

            if left_blocks.len() != ir_blocks {
                return Err(ManifestError::BadLength(
                    path.clone(),
                    left_blocks.len() * block_size,
                    block_size,
                ));
            }

            let filter = Filter::from_time_domain(&kernel, &left_blocks, &right_blocks);

            match (first_entry.as_ref(), key_tokens.first()) {
                (None, _) => first_entry = Some((path.clone(), filter.ir_blocks)),
                (Some((first_path, first_len)), _) if *first_len != filter.ir_blocks => {
                    return Err(ManifestError::LengthMismatch {
                        first: first_path.clone(),
                        first_len: *first_len,
                        other: path.clone(),
                        other_len: filter.ir_blocks,
                    });
                }
                _ => {}
            }

            if key_tokens.first() == Some(&HEADPHONE_MARKER) {
                headphone_filter = Some(filter);
                continue;
            }

            let coordinates: Result<Vec<i32>, _> =
                key_tokens.iter().map(|t| t.parse::<i32>()).collect();
            let coordinates = coordinates.map_err(|_| ManifestError::MalformedLine(line.to_string()))?;
            let key = FilterKey::new(coordinates);

            if table.insert(key, filter).is_some() {
                tracing::warn!(%line, "duplicate filter key in manifest, replacing previous entry");
            }
        }

        Ok(Self {
            block_size,
            ir_blocks,
            table,
            headphone_filter,
        })
    }

    pub fn get(&self, key: &FilterKey) -> Result<&Filter, FilterNotFoundError> {
        self.table
            .get(key)
            .ok_or_else(|| FilterNotFoundError(key.coordinates().to_vec()))
    }

    pub fn headphone_filter(&self) -> Option<&Filter> {
        self.headphone_filter.as_ref()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn ir_blocks(&self) -> usize {
        self.ir_blocks
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Releases the table. A no-op beyond dropping `self` in Rust, kept so
    /// callers mirror the explicit `close()` lifecycle from §3.
    pub fn close(self) {
        drop(self);
    }
}

/// Decodes a stereo WAV impulse response and splits each ear into
/// `block_size`-sample blocks, zero-padding the final block.
fn load_ir_blocks(path: &Path, block_size: usize) -> Result<(Vec<Vec<f32>>, Vec<Vec<f32>>), SourceError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| SourceError::Decode(path.to_path_buf(), e.to_string()))?;
    let spec = reader.spec();

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

    let channels = spec.channels as usize;
    let frames = samples.len() / channels.max(1);

    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in samples.chunks(channels) {
        left.push(frame[0]);
        right.push(if channels >= 2 { frame[1] } else { frame[0] });
    }

    Ok((into_blocks(&left, block_size), into_blocks(&right, block_size)))
}

fn into_blocks(samples: &[f32], block_size: usize) -> Vec<Vec<f32>> {
    let num_blocks = samples.len().div_ceil(block_size).max(1);
    let mut blocks = Vec::with_capacity(num_blocks);
    for chunk in samples.chunks(block_size) {
        let mut block = vec![0.0f32; block_size];
        block[..chunk.len()].copy_from_slice(chunk);
        blocks.push(block);
    }
    while blocks.len() < num_blocks {
        blocks.push(vec![0.0f32; block_size]);
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_wav(path: &Path, left: &[f32], right: &[f32]) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for (l, r) in left.iter().zip(right.iter()) {
            writer.write_sample(*l).unwrap();
            writer.write_sample(*r).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn loads_manifest_and_looks_up_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let ir_path = dir.path().join("a.wav");
        write_wav(&ir_path, &[1.0, 0.0, 0.0, 0.0], &[0.5, 0.0, 0.0, 0.0]);

        let manifest_path = dir.path().join("manifest.txt");
        std::fs::File::create(&manifest_path)
            .unwrap()
            .write_all(format!("0 0 {}\n", ir_path.display()).as_bytes())
            .unwrap();

        let storage = FilterStorage::load(&manifest_path, 4, 4).unwrap();
        assert_eq!(storage.len(), 1);
        let filter = storage.get(&FilterKey::new(vec![0, 0])).unwrap();
        assert_eq!(filter.ir_blocks, 1);
        assert!(storage.headphone_filter().is_none());
    }

    #[test]
    fn missing_key_is_filter_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ir_path = dir.path().join("a.wav");
        write_wav(&ir_path, &[1.0], &[1.0]);
        let manifest_path = dir.path().join("manifest.txt");
        std::fs::File::create(&manifest_path)
            .unwrap()
            .write_all(format!("0 0 {}\n", ir_path.display()).as_bytes())
            .unwrap();

        let storage = FilterStorage::load(&manifest_path, 1, 1).unwrap();
        let err = storage.get(&FilterKey::new(vec![9, 9])).unwrap_err();
        assert_eq!(err.0, vec![9, 9]);
    }

    #[test]
    fn headphone_marker_is_kept_separate() {
        let dir = tempfile::tempdir().unwrap();
        let ir_path = dir.path().join("hp.wav");
        write_wav(&ir_path, &[1.0], &[1.0]);
        let manifest_path = dir.path().join("manifest.txt");
        std::fs::File::create(&manifest_path)
            .unwrap()
            .write_all(format!("{} {}\n", HEADPHONE_MARKER, ir_path.display()).as_bytes())
            .unwrap();

        let storage = FilterStorage::load(&manifest_path, 1, 1).unwrap();
        assert!(storage.is_empty());
        assert!(storage.headphone_filter().is_some());
    }

    #[test]
    fn duplicate_keys_replace_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let ir_a = dir.path().join("a.wav");
        write_wav(&ir_a, &[1.0], &[1.0]);
        let ir_b = dir.path().join("b.wav");
        write_wav(&ir_b, &[0.5], &[0.5]);

        let manifest_path = dir.path().join("manifest.txt");
        std::fs::File::create(&manifest_path)
            .unwrap()
            .write_all(
                format!("0 0 {}\n0 0 {}\n", ir_a.display(), ir_b.display()).as_bytes(),
            )
            .unwrap();

        let storage = FilterStorage::load(&manifest_path, 1, 1).unwrap();
        assert_eq!(storage.len(), 1);
    }
}
