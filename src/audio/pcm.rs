//! Raw PCM decoding
//!
//! Network chunks are not aligned to sample boundaries, so both decoders
//! keep the trailing partial sample until the next chunk completes it.

/// Little-endian 32-bit float decoder
#[derive(Debug, Default)]
pub struct F32Decoder {
    carry: [u8; 4],
    carry_len: usize,
}

impl F32Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, appending whole samples to `out`
    pub fn decode(&mut self, mut bytes: &[u8], out: &mut Vec<f32>) {
        if self.carry_len > 0 {
            let need = 4 - self.carry_len;
            let take = need.min(bytes.len());
            self.carry[self.carry_len..self.carry_len + take].copy_from_slice(&bytes[..take]);
            self.carry_len += take;
            bytes = &bytes[take..];
            if self.carry_len < 4 {
                return;
            }
            out.push(f32::from_le_bytes(self.carry));
            self.carry_len = 0;
        }

        let mut chunks = bytes.chunks_exact(4);
        out.extend(
            chunks
                .by_ref()
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
        let rest = chunks.remainder();
        self.carry[..rest.len()].copy_from_slice(rest);
        self.carry_len = rest.len();
    }

    /// Bytes held back waiting for the rest of a sample
    pub fn pending_bytes(&self) -> usize {
        self.carry_len
    }

    pub fn reset(&mut self) {
        self.carry_len = 0;
    }
}

/// Little-endian signed 16-bit decoder
#[derive(Debug, Default)]
pub struct Pcm16Decoder {
    carry: Option<u8>,
}

impl Pcm16Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, appending whole samples to `out`
    pub fn decode(&mut self, mut bytes: &[u8], out: &mut Vec<i16>) {
        if let Some(low) = self.carry.take() {
            match bytes.split_first() {
                Some((&high, rest)) => {
                    out.push(i16::from_le_bytes([low, high]));
                    bytes = rest;
                }
                None => {
                    self.carry = Some(low);
                    return;
                }
            }
        }

        let mut chunks = bytes.chunks_exact(2);
        out.extend(chunks.by_ref().map(|c| i16::from_le_bytes([c[0], c[1]])));
        self.carry = chunks.remainder().first().copied();
    }

    pub fn pending_bytes(&self) -> usize {
        usize::from(self.carry.is_some())
    }

    pub fn reset(&mut self) {
        self.carry = None;
    }
}

/// Encode float samples as little-endian bytes
pub fn f32_to_le_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Encode 16-bit samples as little-endian bytes
pub fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_split_sample() {
        let bytes = f32_to_le_bytes(&[0.5, -0.25, 1.0]);
        let mut decoder = F32Decoder::new();
        let mut out = Vec::new();

        decoder.decode(&bytes[..5], &mut out);
        assert_eq!(out, vec![0.5]);
        assert_eq!(decoder.pending_bytes(), 1);

        decoder.decode(&bytes[5..6], &mut out);
        assert_eq!(out.len(), 1);

        decoder.decode(&bytes[6..], &mut out);
        assert_eq!(out, vec![0.5, -0.25, 1.0]);
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn test_pcm16_odd_chunks() {
        let bytes = i16_to_le_bytes(&[1, -2, i16::MAX]);
        let mut decoder = Pcm16Decoder::new();
        let mut out = Vec::new();

        decoder.decode(&bytes[..3], &mut out);
        decoder.decode(&[], &mut out);
        decoder.decode(&bytes[3..], &mut out);
        assert_eq!(out, vec![1, -2, i16::MAX]);
        assert_eq!(decoder.pending_bytes(), 0);
    }
}
