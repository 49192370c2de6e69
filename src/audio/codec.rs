//! PCM Hilfsfunktionen und G.711 µ-law Encoding
//!
//! Das lokale Mikrofon wird als PCMU (8 kHz, 20 ms Frames) gesendet. PCMU ist
//! in jeder WebRTC-Implementierung vorhanden und braucht keine native Codec-Lib.

/// Sample Rate von PCMU
pub const PCMU_SAMPLE_RATE: u32 = 8000;

/// Samples pro 20ms-Frame @ 8kHz
pub const PCMU_FRAME_SAMPLES: usize = 160;

/// Kodiert ein 16-bit Sample nach G.711 µ-law
pub fn linear16_to_mulaw(sample: i16) -> u8 {
    const BIAS: i32 = 0x84;
    const MAX: i32 = 0x7F7B;

    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    if pcm > MAX {
        pcm = MAX;
    }
    pcm += BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | ((exponent as u8) << 4) | mantissa)
}

/// Dekodiert ein G.711 µ-law Byte
pub fn mulaw_to_linear16(mu: u8) -> i16 {
    const BIAS: i16 = 0x84;
    let mu = !mu;
    let sign = (mu & 0x80) != 0;
    let segment = (mu & 0x70) >> 4;
    let mantissa = mu & 0x0F;

    let mut value = ((mantissa as i16) << 3) + BIAS;
    value <<= segment as i16;
    if sign {
        BIAS - value
    } else {
        value - BIAS
    }
}

/// Kodiert einen kompletten Frame
pub fn encode_pcmu(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| linear16_to_mulaw(s)).collect()
}

/// Dekodiert einen PCMU-Payload nach f32
pub fn decode_pcmu(payload: &[u8]) -> Vec<f32> {
    payload
        .iter()
        .map(|&b| mulaw_to_linear16(b) as f32 / i16::MAX as f32)
        .collect()
}

/// f32 [-1, 1] → i16
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Mittelt interleavte Kanäle zu Mono
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Einfaches Linear-Resampling (Mono)
pub fn resample_linear(data: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || data.is_empty() {
        return data.to_vec();
    }

    let ratio = target_rate as f32 / source_rate as f32;
    let new_len = (data.len() as f32 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f32 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f32;
            let s1 = data.get(idx).copied().unwrap_or(0.0);
            let s2 = data.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}
