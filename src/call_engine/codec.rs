//! G.711 μ-law (PCMU)
//!
//! 8 kHz, ein Byte pro Sample. Wird von jedem WebRTC-Stack ohne
//! zusätzliche Codec-Bibliothek unterstützt.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// Kodiert ein 16-bit PCM Sample
pub fn encode_sample(pcm: i16) -> u8 {
    let mut sample = i32::from(pcm);
    let sign = if sample < 0 {
        sample = -sample;
        0x80
    } else {
        0x00
    };

    sample = sample.min(CLIP) + BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && sample & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((sample >> (exponent + 3)) & 0x0F) as u8;

    !(sign | (exponent << 4) | mantissa)
}

/// Dekodiert ein μ-law Byte zu 16-bit PCM
pub fn decode_sample(byte: u8) -> i16 {
    let byte = !byte;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = i32::from(byte & 0x0F);
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;

    if byte & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Kodiert einen Frame aus f32-Samples (-1.0 bis 1.0)
pub fn encode_frame(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|s| encode_sample((s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16))
        .collect()
}

/// Dekodiert einen RTP-Payload zu f32-Samples
pub fn decode_frame(payload: &[u8]) -> Vec<f32> {
    payload
        .iter()
        .map(|b| f32::from(decode_sample(*b)) / 32768.0)
        .collect()
}
