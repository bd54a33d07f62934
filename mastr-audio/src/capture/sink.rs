//! Capture sinks: turn rendered frames into encoded chunks

use std::io::Cursor;

use tracing::debug;

use crate::error::{AudioError, AudioResult};

/// An encoder fed in timeslices
///
/// `start` yields the container header, `encode` one chunk per timeslice and
/// `finalize` assembles header and chunks into the finished file.
pub trait CaptureSink: Send {
    fn start(&mut self) -> AudioResult<Vec<u8>>;

    /// Encode stereo interleaved frames
    fn encode(&mut self, samples: &[f32]) -> AudioResult<Vec<u8>>;

    fn finalize(&mut self, header: &[u8], chunks: &[Vec<u8>]) -> AudioResult<Vec<u8>>;

    fn mime_type(&self) -> &'static str;
}

/// Creates a sink per export
pub trait SinkFactory: Send + Sync {
    fn create(&self, sample_rate: u32) -> AudioResult<Box<dyn CaptureSink>>;
}

/// PCM WAV via hound
#[derive(Debug, Clone, Copy)]
pub struct WavSinkFactory {
    /// 16 or 24 bit integer, or 32 bit float
    pub bits: u16,
}

impl Default for WavSinkFactory {
    fn default() -> Self {
        Self { bits: 16 }
    }
}

impl SinkFactory for WavSinkFactory {
    fn create(&self, sample_rate: u32) -> AudioResult<Box<dyn CaptureSink>> {
        let sample_format = match self.bits {
            16 | 24 => hound::SampleFormat::Int,
            32 => hound::SampleFormat::Float,
            other => {
                return Err(AudioError::EncoderUnavailable(format!(
                    "unsupported bit depth: {}",
                    other
                )))
            }
        };
        Ok(Box::new(WavSink {
            spec: hound::WavSpec {
                channels: 2,
                sample_rate,
                bits_per_sample: self.bits,
                sample_format,
            },
        }))
    }
}

struct WavSink {
    spec: hound::WavSpec,
}

impl CaptureSink for WavSink {
    fn start(&mut self) -> AudioResult<Vec<u8>> {
        // An empty file is exactly the header, data chunk last
        let mut header = Vec::new();
        let writer = hound::WavWriter::new(Cursor::new(&mut header), self.spec)
            .map_err(|e| AudioError::EncoderUnavailable(e.to_string()))?;
        writer
            .finalize()
            .map_err(|e| AudioError::EncoderUnavailable(e.to_string()))?;

        if header.len() < 12 || &header[header.len() - 8..header.len() - 4] != b"data" {
            return Err(AudioError::EncoderUnavailable(
                "unexpected WAV header layout".into(),
            ));
        }
        debug!(header_len = header.len(), bits = self.spec.bits_per_sample, "wav sink started");
        Ok(header)
    }

    fn encode(&mut self, samples: &[f32]) -> AudioResult<Vec<u8>> {
        let bytes_per_sample = self.spec.bits_per_sample as usize / 8;
        let mut chunk = Vec::with_capacity(samples.len() * bytes_per_sample);
        match self.spec.bits_per_sample {
            16 => {
                for &s in samples {
                    let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
                    chunk.extend_from_slice(&v.to_le_bytes());
                }
            }
            24 => {
                for &s in samples {
                    let v = (s.clamp(-1.0, 1.0) * 8388607.0) as i32;
                    chunk.extend_from_slice(&v.to_le_bytes()[..3]);
                }
            }
            _ => {
                for &s in samples {
                    chunk.extend_from_slice(&s.to_le_bytes());
                }
            }
        }
        Ok(chunk)
    }

    fn finalize(&mut self, header: &[u8], chunks: &[Vec<u8>]) -> AudioResult<Vec<u8>> {
        let data_len: usize = chunks.iter().map(|c| c.len()).sum();
        let mut out = Vec::with_capacity(header.len() + data_len);
        out.extend_from_slice(header);
        for chunk in chunks {
            out.extend_from_slice(chunk);
        }

        let riff_len = u32::try_from(out.len() - 8)
            .map_err(|_| AudioError::EncoderUnavailable("capture exceeds WAV size limit".into()))?;
        out[4..8].copy_from_slice(&riff_len.to_le_bytes());
        let size_at = header.len() - 4;
        out[size_at..size_at + 4].copy_from_slice(&(data_len as u32).to_le_bytes());
        Ok(out)
    }

    fn mime_type(&self) -> &'static str {
        "audio/wav"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_depth() {
        let result = WavSinkFactory { bits: 12 }.create(48000);
        assert!(matches!(result, Err(AudioError::EncoderUnavailable(_))));
    }

    #[test]
    fn test_chunks_assemble_into_readable_wav() {
        let mut sink = WavSinkFactory::default().create(48000).unwrap();
        let header = sink.start().unwrap();
        let chunks = vec![
            sink.encode(&[0.5, -0.5, 0.25, -0.25]).unwrap(),
            sink.encode(&[1.0, -1.0]).unwrap(),
        ];
        let bytes = sink.finalize(&header, &chunks).unwrap();

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.duration(), 3);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![16383, -16383, 8191, -8191, 32767, -32767]);
    }

    #[test]
    fn test_float_sink() {
        let mut sink = WavSinkFactory { bits: 32 }.create(44100).unwrap();
        let header = sink.start().unwrap();
        let chunk = sink.encode(&[0.125, -0.125]).unwrap();
        let bytes = sink.finalize(&header, &[chunk]).unwrap();

        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 44100);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.125, -0.125]);
    }
}
