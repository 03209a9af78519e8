use crate::utils::errors::SessionError;

/// Output sample widths accepted by the container writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputBitDepth {
    Eight,
    Sixteen,
    TwentyFour,
    ThirtyTwo,
}

impl TryFrom<u32> for OutputBitDepth {
    type Error = SessionError;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            8 => Ok(OutputBitDepth::Eight),
            16 => Ok(OutputBitDepth::Sixteen),
            24 => Ok(OutputBitDepth::TwentyFour),
            32 => Ok(OutputBitDepth::ThirtyTwo),
            other => Err(SessionError::InvalidBitDepth(other)),
        }
    }
}

impl OutputBitDepth {
    pub const fn bits(self) -> u32 {
        match self {
            OutputBitDepth::Eight => 8,
            OutputBitDepth::Sixteen => 16,
            OutputBitDepth::TwentyFour => 24,
            OutputBitDepth::ThirtyTwo => 32,
        }
    }

    pub const fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }

    pub const fn min(self) -> i64 {
        -(1i64 << (self.bits() - 1))
    }

    pub const fn max(self) -> i64 {
        (1i64 << (self.bits() - 1)) - 1
    }
}

/// Maps full-precision decoded samples onto the requested output width.
///
/// Widening is a lossless left shift. Narrowing rounds to nearest with ties
/// away from zero and clamps to the output range, so the same input always
/// yields the same output.
#[derive(Debug, Clone, Copy)]
pub struct Requantizer {
    source_bits: u32,
    target: OutputBitDepth,
}

impl Requantizer {
    pub fn new(source_bits: u32, target: OutputBitDepth) -> Self {
        Self {
            source_bits: source_bits.clamp(1, 32),
            target,
        }
    }

    pub fn target(&self) -> OutputBitDepth {
        self.target
    }

    #[inline(always)]
    pub fn apply(&self, sample: i32) -> i32 {
        let sample = sample as i64;
        let target_bits = self.target.bits();

        let value = if self.source_bits <= target_bits {
            sample << (target_bits - self.source_bits)
        } else {
            let shift = self.source_bits - target_bits;
            let half = 1i64 << (shift - 1);
            let magnitude = (sample.abs() + half) >> shift;
            if sample < 0 { -magnitude } else { magnitude }
        };

        value.clamp(self.target.min(), self.target.max()) as i32
    }

    /// Requantizes `samples` and appends them as little-endian PCM.
    ///
    /// 8-bit output is unsigned with a 128 offset, wider output is signed.
    pub fn pack_le(&self, samples: &[i32], dst: &mut Vec<u8>) {
        dst.reserve(samples.len() * self.target.bytes());

        for &sample in samples {
            let value = self.apply(sample);
            match self.target {
                OutputBitDepth::Eight => dst.push((value + 128) as u8),
                OutputBitDepth::Sixteen => dst.extend_from_slice(&(value as i16).to_le_bytes()),
                OutputBitDepth::TwentyFour => dst.extend_from_slice(&value.to_le_bytes()[..3]),
                OutputBitDepth::ThirtyTwo => dst.extend_from_slice(&value.to_le_bytes()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_depths() {
        for bits in [0, 4, 12, 20, 64] {
            assert!(matches!(
                OutputBitDepth::try_from(bits),
                Err(SessionError::InvalidBitDepth(b)) if b == bits
            ));
        }
        assert_eq!(OutputBitDepth::try_from(24).unwrap(), OutputBitDepth::TwentyFour);
    }

    #[test]
    fn widening_is_lossless() {
        let rq = Requantizer::new(16, OutputBitDepth::TwentyFour);
        assert_eq!(rq.apply(1), 256);
        assert_eq!(rq.apply(-32768), -8388608);
        assert_eq!(rq.apply(32767), 32767 << 8);
    }

    #[test]
    fn narrowing_rounds_half_away_from_zero() {
        let rq = Requantizer::new(24, OutputBitDepth::Eight);
        // shift of 16, half is 0x8000
        assert_eq!(rq.apply(0x8000), 1);
        assert_eq!(rq.apply(0x7fff), 0);
        assert_eq!(rq.apply(-0x8000), -1);
        assert_eq!(rq.apply(-0x7fff), 0);
        assert_eq!(rq.apply(0x18000), 2);
        assert_eq!(rq.apply(-0x18000), -2);
    }

    #[test]
    fn narrowing_clamps() {
        let rq = Requantizer::new(24, OutputBitDepth::Eight);
        assert_eq!(rq.apply(8388607), 127);
        assert_eq!(rq.apply(-8388608), -128);

        let rq = Requantizer::new(24, OutputBitDepth::Sixteen);
        assert_eq!(rq.apply(8388607), 32767);
    }

    #[test]
    fn narrowing_is_deterministic() {
        let rq = Requantizer::new(24, OutputBitDepth::Eight);
        let input: Vec<i32> = (0..2000).map(|i| (i * 7919 % 16_777_216) - 8_388_608).collect();

        let mut first = Vec::new();
        let mut second = Vec::new();
        rq.pack_le(&input, &mut first);
        rq.pack_le(&input, &mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn packs_unsigned_eight_bit() {
        let rq = Requantizer::new(8, OutputBitDepth::Eight);
        let mut out = Vec::new();
        rq.pack_le(&[-128, 0, 127], &mut out);
        assert_eq!(out, [0, 128, 255]);

        let rq = Requantizer::new(24, OutputBitDepth::TwentyFour);
        let mut out = Vec::new();
        rq.pack_le(&[-2], &mut out);
        assert_eq!(out, [0xfe, 0xff, 0xff]);
    }
}
