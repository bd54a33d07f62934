//! In-memory decoding of uploaded sources
//!
//! Everything the graph consumes is stereo interleaved f32 at the device
//! rate: mono is duplicated, wider layouts keep their first two channels.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::error::{AudioError, AudioResult};
use crate::session::SourceFile;

/// A decoded source, stereo interleaved
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Planar left/right copies, for offline measurement
    pub fn planar(&self) -> (Vec<f32>, Vec<f32>) {
        self.samples.chunks_exact(2).map(|f| (f[0], f[1])).unzip()
    }
}

/// Decode `source` and resample to `target_rate`
pub fn decode(source: &SourceFile, target_rate: u32) -> AudioResult<DecodedAudio> {
    let cursor = Cursor::new(source.bytes.clone());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(mime) = source.content_type.as_deref() {
        hint.mime_type(mime);
    }
    if let Some(ext) = source.extension() {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::Decode(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::Decode("no audio track found".into()))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| AudioError::Decode("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::Decode(e.to_string()))?;

    let mut stereo: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioError::Decode(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(error = e, "skipping corrupt packet");
                continue;
            }
            Err(e) => return Err(AudioError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        fold_to_stereo(sample_buf.samples(), channels, &mut stereo);
    }

    if stereo.is_empty() {
        return Err(AudioError::Decode(format!("{} contains no audio", source.name)));
    }

    let samples = if source_rate != target_rate {
        resample(&stereo, source_rate, target_rate)?
    } else {
        stereo
    };

    let audio = DecodedAudio::new(samples, target_rate);
    debug!(
        name = %source.name,
        source_rate,
        target_rate,
        frames = audio.frames(),
        "decoded source"
    );
    Ok(audio)
}

/// Append `samples` (interleaved, `channels` wide) to `out` as stereo
fn fold_to_stereo(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => out.extend(samples.iter().flat_map(|&s| [s, s])),
        2 => out.extend_from_slice(samples),
        n => out.extend(samples.chunks_exact(n).flat_map(|f| [f[0], f[1]])),
    }
}

/// Resample stereo interleaved audio
fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> AudioResult<Vec<f32>> {
    use rubato::{FftFixedInOut, Resampler};

    let frames = samples.len() / 2;

    let mut resampler =
        FftFixedInOut::<f32>::new(source_rate as usize, target_rate as usize, 1024, 2)
            .map_err(|e| AudioError::Decode(e.to_string()))?;

    let (left, right): (Vec<f32>, Vec<f32>) =
        samples.chunks_exact(2).map(|f| (f[0], f[1])).unzip();
    let planar = [left, right];

    let chunk_size = resampler.input_frames_next();
    let mut output: [Vec<f32>; 2] = [Vec::new(), Vec::new()];

    let mut pos = 0;
    while pos + chunk_size <= frames {
        let input: Vec<&[f32]> = planar.iter().map(|ch| &ch[pos..pos + chunk_size]).collect();
        let resampled = resampler
            .process(&input, None)
            .map_err(|e| AudioError::Decode(e.to_string()))?;
        for (ch, data) in resampled.into_iter().enumerate() {
            output[ch].extend(data);
        }
        pos += chunk_size;
    }

    // Zero-pad the tail and keep only its proportional share
    if pos < frames {
        let remaining = frames - pos;
        let padded: Vec<Vec<f32>> = planar
            .iter()
            .map(|ch| {
                let mut v = ch[pos..].to_vec();
                v.resize(chunk_size, 0.0);
                v
            })
            .collect();
        let input: Vec<&[f32]> = padded.iter().map(|v| v.as_slice()).collect();
        let resampled = resampler
            .process(&input, None)
            .map_err(|e| AudioError::Decode(e.to_string()))?;
        let keep = remaining * target_rate as usize / source_rate as usize;
        for (ch, data) in resampled.into_iter().enumerate() {
            output[ch].extend(&data[..keep.min(data.len())]);
        }
    }

    let [left, right] = output;
    Ok(left
        .into_iter()
        .zip(right)
        .flat_map(|(l, r)| [l, r])
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// WAV bytes for a sine tone, written with hound
    pub(crate) fn wav_bytes(
        seconds: f32,
        sample_rate: u32,
        channels: u16,
        amplitude: f32,
    ) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            let frames = (seconds * sample_rate as f32) as usize;
            for i in 0..frames {
                let t = i as f32 / sample_rate as f32;
                let v = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * amplitude;
                for _ in 0..channels {
                    writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    pub(crate) fn wav_source(name: &str, seconds: f32) -> SourceFile {
        SourceFile::new(name, wav_bytes(seconds, 48000, 2, 0.5)).with_content_type("audio/wav")
    }

    #[test]
    fn test_decode_wav_at_native_rate() {
        let audio = decode(&wav_source("tone.wav", 1.0), 48000).unwrap();
        assert_eq!(audio.sample_rate, 48000);
        assert_eq!(audio.frames(), 48000);
        let peak = audio.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_mono_is_duplicated() {
        let source = SourceFile::new("mono.wav", wav_bytes(0.5, 48000, 1, 0.5));
        let audio = decode(&source, 48000).unwrap();
        assert_eq!(audio.frames(), 24000);
        assert!(audio.samples.chunks_exact(2).all(|f| f[0] == f[1]));
    }

    #[test]
    fn test_resample_keeps_duration() {
        let source = SourceFile::new("cd.wav", wav_bytes(1.0, 44100, 2, 0.5));
        let audio = decode(&source, 48000).unwrap();
        assert_eq!(audio.sample_rate, 48000);
        assert!((audio.duration_secs() - 1.0).abs() < 0.05, "{}", audio.duration_secs());
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let source = SourceFile::new("noise.mp3", vec![0x42; 4096]);
        assert!(matches!(decode(&source, 48000), Err(AudioError::Decode(_))));
    }

    #[test]
    fn test_fold_wide_layouts() {
        let mut out = Vec::new();
        fold_to_stereo(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 4.0, 5.0]);
    }
}
