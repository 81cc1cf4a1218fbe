//! Slicing of decoded audio into training windows.
//!
//! - [`RollingWindower`]: fixed, non-overlapping windows cut from a FIFO
//!   buffer that spans file boundaries.
//! - [`whole_clip`]: one window per file of exactly the expected length.
//! - [`CropCache`] + [`random_crop`]: one random fixed-length crop per file
//!   visit, from audio decoded once per process.

use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::decode::{AudioDecoder, DecodeError};

/// Per-worker accumulator for fixed-window mode.
#[derive(Debug)]
pub struct RollingWindower {
    window_size: usize,
    buffer: Vec<f32>,
}

impl RollingWindower {
    pub fn new(window_size: usize) -> Self {
        assert!(window_size > 0, "window_size must be > 0");
        Self {
            window_size,
            buffer: Vec::with_capacity(window_size * 2),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Append `audio` and cut every complete window from the front.
    /// A partial remainder stays buffered for the next push.
    pub fn push(&mut self, audio: &[f32]) -> Vec<Vec<f32>> {
        self.buffer.extend_from_slice(audio);
        let n_windows = self.buffer.len() / self.window_size;
        if n_windows == 0 {
            return Vec::new();
        }

        let consumed = n_windows * self.window_size;
        let windows = self.buffer[..consumed]
            .chunks_exact(self.window_size)
            .map(<[f32]>::to_vec)
            .collect();
        self.buffer.drain(..consumed);
        windows
    }

    /// Samples waiting for a window to complete.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Truncate to `clip_len`; `None` if the audio is shorter.
pub fn whole_clip(audio: &[f32], clip_len: usize) -> Option<Vec<f32>> {
    audio.get(..clip_len).map(<[f32]>::to_vec)
}

/// Draw one crop of `crop_len` samples at a uniform start in
/// `[0, len - crop_len)` (or 0 when the lengths are equal).
/// `None` if the audio is shorter than `crop_len`.
pub fn random_crop<R: Rng + ?Sized>(audio: &[f32], crop_len: usize, rng: &mut R) -> Option<Vec<f32>> {
    let max_start = audio.len().checked_sub(crop_len)?;
    let start = if max_start == 0 {
        0
    } else {
        rng.gen_range(0..max_start)
    };
    Some(audio[start..start + crop_len].to_vec())
}

/// Decoded waveforms memoized by path, shared by all workers.
///
/// Entries live for the process lifetime and are never invalidated, so
/// changes to files on disk after the first decode are not seen. Two
/// workers missing on the same path may both decode it; the later insert
/// overwrites the earlier one with identical samples.
#[derive(Default)]
pub struct CropCache {
    entries: RwLock<HashMap<PathBuf, Arc<[f32]>>>,
}

impl CropCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<[f32]>> {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        guard.get(path).cloned()
    }

    /// Cached samples for `path`, decoding on a miss. The decode runs
    /// without holding the lock.
    pub fn get_or_decode(
        &self,
        path: &Path,
        decoder: &dyn AudioDecoder,
        sample_rate: u32,
    ) -> Result<Arc<[f32]>, DecodeError> {
        if let Some(samples) = self.get(path) {
            return Ok(samples);
        }

        let samples: Arc<[f32]> = decoder.decode(path, sample_rate)?.samples.into();
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(path.to_path_buf(), Arc::clone(&samples));
        Ok(samples)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Waveform;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDecoder {
        calls: AtomicUsize,
        len: usize,
    }

    impl AudioDecoder for CountingDecoder {
        fn decode(&self, _path: &Path, target_rate: u32) -> Result<Waveform, DecodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Waveform {
                samples: (0..self.len).map(|i| i as f32).collect(),
                native_rate: target_rate,
            })
        }
    }

    #[test]
    fn test_rolling_exact_multiple() {
        let mut windower = RollingWindower::new(100);
        let inputs: Vec<Vec<f32>> = [30, 170, 55, 45]
            .iter()
            .scan(0.0, |next, &len| {
                let chunk: Vec<f32> = (0..len).map(|i| *next + i as f32).collect();
                *next += len as f32;
                Some(chunk)
            })
            .collect();

        let mut windows = Vec::new();
        for input in &inputs {
            windows.extend(windower.push(input));
        }

        assert_eq!(windows.len(), 3);
        assert!(windows.iter().all(|w| w.len() == 100));
        assert_eq!(windower.pending(), 0);
        let emitted: Vec<f32> = windows.concat();
        assert_eq!(emitted, inputs.concat());
    }

    #[test]
    fn test_rolling_keeps_remainder() {
        let mut windower = RollingWindower::new(16000);
        assert!(windower.push(&[0.1; 8000]).is_empty());
        assert_eq!(windower.pending(), 8000);

        let windows = windower.push(&[0.2; 10000]);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0][7999], 0.1);
        assert_eq!(windows[0][8000], 0.2);
        assert_eq!(windower.pending(), 2000);

        windower.reset();
        assert_eq!(windower.pending(), 0);
    }

    #[test]
    fn test_whole_clip() {
        let audio: Vec<f32> = (0..20).map(|i| i as f32).collect();
        assert_eq!(whole_clip(&audio, 16).unwrap().len(), 16);
        assert_eq!(whole_clip(&audio, 20).unwrap(), audio);
        assert!(whole_clip(&audio, 21).is_none());
    }

    #[test]
    fn test_random_crop_bounds() {
        let audio: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let crop = random_crop(&audio, 100, &mut rng).unwrap();
            assert_eq!(crop.len(), 100);
            let start = crop[0] as usize;
            assert!(start < 900);
            assert_eq!(crop[99] as usize, start + 99);
        }
    }

    #[test]
    fn test_random_crop_edge_lengths() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(random_crop(&[1.0; 50], 50, &mut rng).unwrap().len(), 50);
        assert!(random_crop(&[1.0; 49], 50, &mut rng).is_none());
    }

    #[test]
    fn test_cache_decodes_once() {
        let cache = CropCache::new();
        let decoder = CountingDecoder {
            calls: AtomicUsize::new(0),
            len: 64,
        };
        let path = Path::new("/clips/a.mp3");

        let first = cache.get_or_decode(path, &decoder, 16000).unwrap();
        let second = cache.get_or_decode(path, &decoder, 16000).unwrap();
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_concurrent_access() {
        let cache = Arc::new(CropCache::new());
        let decoder = Arc::new(CountingDecoder {
            calls: AtomicUsize::new(0),
            len: 32,
        });

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let decoder = Arc::clone(&decoder);
                std::thread::spawn(move || {
                    let path = PathBuf::from(format!("/clips/{}.mp3", i % 2));
                    cache.get_or_decode(&path, decoder.as_ref(), 16000).unwrap().len()
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 32);
        }
        assert_eq!(cache.len(), 2);
        assert!(decoder.calls.load(Ordering::SeqCst) >= 2);
    }
}
