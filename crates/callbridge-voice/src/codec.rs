//! Audio format conversion between the telephony leg and the speech AI.
//!
//! The telephony provider streams 8-bit mu-law at 8 kHz mono. The speech AI
//! takes 16-bit little-endian PCM at 16 kHz and answers with 16-bit PCM at
//! 24 kHz. Everything here is stateless: each chunk is converted on its own,
//! so interpolation does not carry across chunk boundaries.
//!
//! PCM byte buffers must hold a whole number of 16-bit samples. A trailing
//! odd byte is ignored.

/// Telephony sample rate.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Sample rate the speech AI expects for input audio.
pub const SPEECH_INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of audio produced by the speech AI.
pub const SPEECH_OUTPUT_SAMPLE_RATE: u32 = 24_000;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32_635;

/// G.711 mu-law expansion table, indexed by the encoded byte.
static MULAW_DECODE_TABLE: [i16; 256] = build_decode_table();

const fn build_decode_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        let byte = !(i as u8);
        let exponent = ((byte >> 4) & 0x07) as i32;
        let mantissa = (byte & 0x0F) as i32;
        let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
        table[i] = if byte & 0x80 != 0 {
            -magnitude as i16
        } else {
            magnitude as i16
        };
        i += 1;
    }
    table
}

/// Expands one mu-law byte to a linear 16-bit sample.
#[inline]
pub fn mulaw_to_linear(byte: u8) -> i16 {
    MULAW_DECODE_TABLE[byte as usize]
}

/// Compands one linear 16-bit sample to mu-law.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut value = sample as i32;
    let sign = if value < 0 {
        value = -value;
        0x80
    } else {
        0x00
    };

    let biased = value.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && biased & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (biased >> (exponent + 3)) & 0x0F;

    !(sign | (exponent << 4) | mantissa) as u8
}

/// Raises the sample rate by an integer factor using linear interpolation.
///
/// The output has exactly `samples.len() * factor` samples. The last input
/// sample is held for the tail since there is no following sample in the
/// chunk to interpolate toward.
pub fn upsample(samples: &[i16], factor: usize) -> Vec<i16> {
    if factor <= 1 {
        return samples.to_vec();
    }

    let mut out = Vec::with_capacity(samples.len() * factor);
    for (i, &current) in samples.iter().enumerate() {
        let next = samples.get(i + 1).copied().unwrap_or(current) as i32;
        let current = current as i32;
        for step in 0..factor as i32 {
            let value = current + (next - current) * step / factor as i32;
            out.push(value as i16);
        }
    }
    out
}

/// Lowers the sample rate by an integer factor, keeping one sample in every
/// `factor`. The output has `ceil(samples.len() / factor)` samples.
pub fn decimate(samples: &[i16], factor: usize) -> Vec<i16> {
    if factor <= 1 {
        return samples.to_vec();
    }
    samples.iter().step_by(factor).copied().collect()
}

/// Reads little-endian 16-bit samples from raw bytes.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Writes samples as little-endian 16-bit bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Converts telephony mu-law (8 kHz) to speech-input PCM (16 kHz, s16le).
///
/// The output holds four bytes per input byte. Empty input yields empty
/// output.
pub fn decode_and_upsample(encoded: &[u8]) -> Vec<u8> {
    let linear: Vec<i16> = encoded.iter().map(|&b| mulaw_to_linear(b)).collect();
    let factor = (SPEECH_INPUT_SAMPLE_RATE / TELEPHONY_SAMPLE_RATE) as usize;
    pcm16_to_bytes(&upsample(&linear, factor))
}

/// Converts speech-output PCM (24 kHz, s16le) to telephony mu-law (8 kHz).
pub fn downsample_and_encode(pcm: &[u8]) -> Vec<u8> {
    let samples = pcm16_from_bytes(pcm);
    let factor = (SPEECH_OUTPUT_SAMPLE_RATE / TELEPHONY_SAMPLE_RATE) as usize;
    decimate(&samples, factor)
        .into_iter()
        .map(linear_to_mulaw)
        .collect()
}
