//! Audio decoding using symphonia.
//!
//! Supports MP3, FLAC, OGG, WAV formats. Output is always mono at the
//! requested rate.

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Symphonia error: {0}")]
    Symphonia(#[from] symphonia::core::errors::Error),
    #[error("No audio track found")]
    NoAudioTrack,
    #[error("Unsupported codec")]
    UnsupportedCodec,
    #[error("Resampler construction failed: {0}")]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),
    #[error("Resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
}

/// Decodes one file to a mono waveform at `target_rate`.
///
/// Implementations must be pure functions of `(path, target_rate)`; the
/// crop cache relies on this to tolerate duplicate concurrent decodes.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, path: &Path, target_rate: u32) -> Result<Waveform, DecodeError>;
}

/// Mono samples plus the rate the file was stored at.
#[derive(Clone, Debug)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub native_rate: u32,
}

/// Default decoder backed by symphonia and rubato.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaDecoder;

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, path: &Path, target_rate: u32) -> Result<Waveform, DecodeError> {
        let audio = decode_file(path)?;
        Ok(Waveform {
            samples: audio.resample(target_rate)?,
            native_rate: audio.sample_rate,
        })
    }
}

/// Decoded interleaved audio samples.
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedAudio {
    /// Convert to mono by averaging channels.
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }

        self.samples
            .chunks_exact(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / self.channels as f32)
            .collect()
    }

    /// Mix to mono and resample to `target_rate` using sinc interpolation.
    pub fn resample(&self, target_rate: u32) -> Result<Vec<f32>, DecodeError> {
        let mono = self.to_mono();
        if self.sample_rate == target_rate || mono.is_empty() {
            return Ok(mono);
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let resample_ratio = target_rate as f64 / self.sample_rate as f64;
        let chunk_size = 1024;
        // Must cover the actual ratio in either direction (e.g. 8kHz -> 32kHz = 4x).
        let max_ratio = resample_ratio.max(1.0 / resample_ratio) * 1.1;

        let mut resampler = SincFixedIn::<f32>::new(resample_ratio, max_ratio, params, chunk_size, 1)?;

        let mut output = Vec::with_capacity((mono.len() as f64 * resample_ratio) as usize + chunk_size);
        for chunk in mono.chunks(chunk_size) {
            let mut input = chunk.to_vec();
            input.resize(chunk_size, 0.0);
            let resampled = resampler.process(&[input], None)?;
            output.extend_from_slice(&resampled[0]);
        }

        let expected_len = (mono.len() as f64 * resample_ratio).round() as usize;
        output.truncate(expected_len);
        Ok(output)
    }
}

/// Decode the first audio track of a file.
pub fn decode_file(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;

    let mut decoder = symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(DecodeError::UnsupportedCodec)?;
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
    let track_id = track.id;
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        append_samples(&decoded, &mut samples, channels)?;
    }

    if samples.is_empty() {
        return Err(DecodeError::NoAudioTrack);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

fn append_samples(
    buffer: &AudioBufferRef,
    output: &mut Vec<f32>,
    channels: usize,
) -> Result<(), DecodeError> {
    fn interleave<S: symphonia::core::sample::Sample>(
        buf: &symphonia::core::audio::AudioBuffer<S>,
        output: &mut Vec<f32>,
        channels: usize,
        convert: impl Fn(S) -> f32,
    ) {
        output.reserve(buf.frames() * channels);
        for frame in 0..buf.frames() {
            for ch in 0..channels {
                output.push(convert(buf.chan(ch)[frame]));
            }
        }
    }

    match buffer {
        AudioBufferRef::F32(buf) => interleave(&**buf, output, channels, |s| s),
        AudioBufferRef::F64(buf) => interleave(&**buf, output, channels, |s| s as f32),
        AudioBufferRef::S16(buf) => interleave(&**buf, output, channels, |s| s as f32 / 32768.0),
        AudioBufferRef::S32(buf) => interleave(&**buf, output, channels, |s| s as f32 / 2147483648.0),
        AudioBufferRef::U8(buf) => interleave(&**buf, output, channels, |s| (s as f32 - 128.0) / 128.0),
        _ => return Err(DecodeError::UnsupportedCodec),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample() {
        let audio = DecodedAudio {
            samples: (0..44100).map(|i| (i as f32 / 44100.0).sin()).collect(),
            sample_rate: 44100,
            channels: 1,
        };

        let resampled = audio.resample(22050).unwrap();
        assert_eq!(resampled.len(), 22050);
    }

    #[test]
    fn test_to_mono_averages_channels() {
        let audio = DecodedAudio {
            samples: vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0],
            sample_rate: 16000,
            channels: 2,
        };
        assert_eq!(audio.to_mono(), vec![0.5, 0.5, 0.0]);
        assert_eq!(audio.resample(16000).unwrap(), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_missing_file() {
        let err = SymphoniaDecoder.decode(Path::new("/nonexistent/p1_0.wav"), 16000);
        assert!(matches!(err, Err(DecodeError::Io(_))));
    }
}
