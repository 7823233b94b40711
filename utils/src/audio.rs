use std::collections::VecDeque;
use std::io::Cursor;

use anyhow::Context;
use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Rate the recognition gateway expects for PCM16 input.
pub const TARGET_SAMPLE_RATE: u32 = 16000;
/// Native-rate samples per outbound audio frame.
pub const INPUT_CHUNK_SIZE: usize = 4096;

/// Chunks between two level reports.
pub const LEVEL_CHECK_INTERVAL: usize = 50;
/// Peak level below which the capture is considered silent.
pub const LOW_LEVEL_THRESHOLD: f32 = 0.01;

pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1
    )?;
    Ok(resampler)
}

pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples.chunks(chunk_size).map(|chunk| {
        let mut chunk = chunk.to_vec();
        chunk.resize(chunk_size, 0.0);
        chunk
    }).collect()
}

pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Resamples a mono clip for a playback device. The zero padding of the last
/// chunk is trimmed off again.
pub fn resample(samples: &[f32], in_rate: u32, out_rate: u32) -> anyhow::Result<Vec<f32>> {
    if in_rate == out_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = create_resampler(in_rate as f64, out_rate as f64, 1024)?;
    let chunk_size = resampler.input_frames_next();
    let expected = (samples.len() as f64 * out_rate as f64 / in_rate as f64).round() as usize;

    let mut out = Vec::with_capacity(expected + chunk_size);
    for chunk in split_for_chunks(samples, chunk_size) {
        let resampled = resampler.process(&[chunk.as_slice()], None)?;
        if let Some(channel) = resampled.first() {
            out.extend_from_slice(channel);
        }
    }
    out.truncate(expected);
    Ok(out)
}

/// Block-averaging decimation from `in_rate` to `out_rate`.
///
/// Each output sample is the mean of the input samples that fall into its
/// window, so no anti-aliasing filter is needed for speech. Matching rates are
/// passed through, and upsampling is not supported.
pub fn downsample(samples: &[f32], in_rate: u32, out_rate: u32) -> Vec<f32> {
    if in_rate == out_rate || out_rate == 0 {
        return samples.to_vec();
    }
    if out_rate > in_rate {
        tracing::warn!(
            "cannot upsample capture from {}hz to {}hz, passing through",
            in_rate,
            out_rate
        );
        return samples.to_vec();
    }

    let ratio = in_rate as f64 / out_rate as f64;
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    let mut offset = 0usize;
    for i in 0..out_len {
        let next = (((i + 1) as f64) * ratio).round() as usize;
        let window = &samples[offset.min(samples.len())..next.min(samples.len())];
        out.push(if window.is_empty() {
            0.0
        } else {
            window.iter().sum::<f32>() / window.len() as f32
        });
        offset = next;
    }
    out
}

/// Float samples to little-endian PCM16, clamped to [-1, 1] first.
pub fn quantize_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            value.to_le_bytes()
        })
        .collect()
}

/// Averages interleaved frames down to one channel.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels > 1 {
        data.chunks(channels)
            .map(|c| c.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        data.to_vec()
    }
}

/// Linear gain stage. Volume outside [0, 1] is clamped; NaN plays at full volume.
pub fn apply_gain(samples: &mut [f32], volume: f32) {
    let gain = if volume.is_nan() { 1.0 } else { volume.clamp(0.0, 1.0) };
    if gain == 1.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}

/// Buffers capture callbacks of arbitrary size into fixed-size blocks.
pub struct AudioChunker {
    buffer: VecDeque<f32>,
    chunk_size: usize,
}

impl AudioChunker {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(chunk_size * 2),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Appends samples and returns every complete block now available.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.buffer.extend(samples);
        let mut chunks = Vec::new();
        while self.buffer.len() >= self.chunk_size {
            chunks.push(self.buffer.drain(..self.chunk_size).collect());
        }
        chunks
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelReport {
    pub average: f32,
    pub peak: f32,
}

impl LevelReport {
    pub fn is_low(&self) -> bool {
        self.peak < LOW_LEVEL_THRESHOLD
    }
}

/// Tracks capture level and reports every `interval` chunks.
pub struct LevelMeter {
    peak: f32,
    chunks: usize,
    interval: usize,
}

impl LevelMeter {
    pub fn new(interval: usize) -> Self {
        Self {
            peak: 0.0,
            chunks: 0,
            interval: interval.max(1),
        }
    }

    pub fn observe(&mut self, chunk: &[f32]) -> Option<LevelReport> {
        if chunk.is_empty() {
            return None;
        }
        let average = chunk.iter().map(|s| s.abs()).sum::<f32>() / chunk.len() as f32;
        self.peak = self.peak.max(average);
        self.chunks += 1;
        (self.chunks % self.interval == 0).then_some(LevelReport { average, peak: self.peak })
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(LEVEL_CHECK_INTERVAL)
    }
}

/// A decoded mono clip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f32 / self.sample_rate as f32
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Decodes a complete compressed stream (mp3, wav, ogg, ...) into mono f32.
/// `extension` only guides format probing.
pub fn decode_compressed(bytes: &[u8], extension: Option<&str>) -> anyhow::Result<DecodedAudio> {
    if bytes.is_empty() {
        anyhow::bail!("no audio bytes to decode");
    }

    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())
        .context("unrecognized audio stream")?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("no decodable audio track")?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("unsupported codec")?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e).context("failed to read packet"),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend(downmix(buffer.samples(), spec.channels.count()));
            }
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!("skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(e).context("failed to decode packet"),
        }
    }

    if samples.is_empty() {
        anyhow::bail!("stream decoded to no samples");
    }
    Ok(DecodedAudio::new(samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn downsample_averages_blocks() {
        let input = [0.0, 0.3, 0.6, 1.0, 1.0, 1.0];
        let out = downsample(&input, 48000, 16000);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!((out[1] - 1.0).abs() < 1e-6);

        assert_eq!(downsample(&input, 16000, 16000), input.to_vec());
    }

    #[test]
    fn downsample_non_integer_ratio() {
        let input = vec![0.5; 441];
        let out = downsample(&input, 44100, 16000);
        assert_eq!(out.len(), 160);
        assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn quantize_clamps_symmetrically() {
        let bytes = quantize_pcm16(&[1.5, -1.5, 0.5, 0.0]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![32767, -32767, 16383, 0]);
    }

    #[test]
    fn chunker_emits_fixed_blocks() {
        let mut chunker = AudioChunker::new(4);
        assert!(chunker.push(&[0.1, 0.2, 0.3]).is_empty());
        let chunks = chunker.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(chunks, vec![vec![0.1, 0.2, 0.3, 0.4], vec![0.5, 0.6, 0.7, 0.8]]);
        assert_eq!(chunker.pending(), 1);
    }

    #[test]
    fn gain_is_clamped() {
        let mut samples = vec![0.5, -0.5];
        apply_gain(&mut samples, 0.3);
        assert!((samples[0] - 0.15).abs() < 1e-6);

        let mut samples = vec![0.5];
        apply_gain(&mut samples, 4.0);
        assert_eq!(samples, vec![0.5]);
        apply_gain(&mut samples, -1.0);
        assert_eq!(samples, vec![0.0]);
    }

    #[test]
    fn level_meter_flags_silence() {
        let mut meter = LevelMeter::new(2);
        assert_eq!(meter.observe(&[0.001; 8]), None);
        let report = meter.observe(&[0.002; 8]).unwrap();
        assert!(report.is_low());

        let mut meter = LevelMeter::new(1);
        assert!(!meter.observe(&[0.5, -0.5]).unwrap().is_low());
    }

    #[test]
    fn decodes_wav_stream_to_mono() {
        let frames: Vec<i16> = (0..2400).flat_map(|_| [16384i16, 0]).collect();
        let bytes = wav_bytes(&frames, 24000, 2);

        let clip = decode_compressed(&bytes, Some("wav")).unwrap();
        assert_eq!(clip.sample_rate, 24000);
        assert_eq!(clip.samples.len(), 2400);
        assert!((clip.samples[0] - 0.25).abs() < 1e-3);
        assert!((clip.duration_secs() - 0.1).abs() < 1e-3);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(decode_compressed(&[], None).is_err());
        assert!(decode_compressed(&[0x42; 64], Some("mp3")).is_err());
    }

    #[test]
    fn resample_keeps_duration() {
        let input = vec![0.0; 2400];
        let out = resample(&input, 24000, 48000).unwrap();
        assert_eq!(out.len(), 4800);
        assert_eq!(resample(&input, 24000, 24000).unwrap().len(), 2400);
    }
}
