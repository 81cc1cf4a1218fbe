//! Waveform cleanup applied after decoding: silence trimming and the
//! minimum-length check.

/// Samples per energy frame.
pub const FRAME_LENGTH: usize = 2048;
/// Samples between consecutive frame starts.
pub const HOP_LENGTH: usize = 512;

/// Removes leading and trailing silence.
///
/// Returns an empty slice if no frame's RMS energy exceeds `threshold`.
pub fn trim_silence(waveform: &[f32], threshold: f32) -> &[f32] {
    trim_silence_with(waveform, threshold, FRAME_LENGTH, HOP_LENGTH)
}

pub fn trim_silence_with(
    waveform: &[f32],
    threshold: f32,
    frame_length: usize,
    hop_length: usize,
) -> &[f32] {
    let energy = frame_rms(waveform, frame_length, hop_length);
    let first = energy.iter().position(|&e| e > threshold);
    let last = energy.iter().rposition(|&e| e > threshold);

    match (first, last) {
        (Some(first), Some(last)) => {
            let start = first * hop_length;
            let end = (last * hop_length + frame_length).min(waveform.len());
            &waveform[start..end]
        }
        _ => &waveform[..0],
    }
}

/// Root-mean-square energy per frame. Frames start every `hop_length`
/// samples; the tail frame is zero-padded to `frame_length`.
pub fn frame_rms(waveform: &[f32], frame_length: usize, hop_length: usize) -> Vec<f32> {
    let frame_length = frame_length.max(1);
    let hop_length = hop_length.max(1);
    let n_frames = waveform.len().div_ceil(hop_length);

    (0..n_frames)
        .map(|i| {
            let start = i * hop_length;
            let end = (start + frame_length).min(waveform.len());
            let power: f32 = waveform[start..end].iter().map(|s| s * s).sum();
            (power / frame_length as f32).sqrt()
        })
        .collect()
}

/// True if the waveform is too short to be fed.
pub fn reject_if_short(waveform: &[f32], min_length: usize) -> bool {
    waveform.len() < min_length
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_silence_is_empty() {
        let quiet = vec![0.001; 20000];
        assert!(trim_silence(&quiet, 0.01).is_empty());
        assert!(trim_silence(&[], 0.01).is_empty());
    }

    #[test]
    fn test_single_loud_frame_is_kept() {
        let mut audio = vec![0.0; 16384];
        let burst = 8192..8192 + 512;
        for s in &mut audio[burst.clone()] {
            *s = 1.0;
        }

        let trimmed = trim_silence(&audio, 0.1);
        assert!(!trimmed.is_empty());
        assert!(trimmed.len() < audio.len());
        assert!(trimmed.iter().filter(|&&s| s == 1.0).count() == burst.len());
    }

    #[test]
    fn test_trim_offsets() {
        let mut audio = vec![0.0; 100];
        audio[50] = 1.0;
        // frame_length 10, hop 10: only frame 5 is loud.
        let trimmed = trim_silence_with(&audio, 0.1, 10, 10);
        assert_eq!(trimmed.len(), 10);
        assert_eq!(trimmed[0], 1.0);
    }

    #[test]
    fn test_loud_everywhere_keeps_everything() {
        let audio = vec![0.5; 5000];
        assert_eq!(trim_silence(&audio, 0.1).len(), 5000);
    }

    #[test]
    fn test_frame_rms() {
        let energy = frame_rms(&[1.0; 8], 4, 4);
        assert_eq!(energy, vec![1.0, 1.0]);
        // Zero-padded tail frame.
        let energy = frame_rms(&[1.0; 6], 4, 4);
        assert!((energy[1] - (0.5f32).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_reject_if_short() {
        assert!(reject_if_short(&[0.0; 15999], 16000));
        assert!(!reject_if_short(&[0.0; 16000], 16000));
        assert!(!reject_if_short(&[], 0));
    }
}
