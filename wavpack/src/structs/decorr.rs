use anyhow::{Result, bail};
use log::trace;

use crate::utils::errors::MetadataError;
use crate::utils::log2::{exp2s, restore_weight};

pub const MAX_TERMS: usize = 16;
const MAX_TERM: i32 = 8;
const HISTORY_LEN: usize = 8;

/// One adaptive prediction pass.
///
/// Positive terms 1..=8 predict from the sample `term` positions back, 17 and
/// 18 extrapolate from the last two samples, and the negative terms -1..=-3
/// predict each channel of a stereo pair from the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecorrPass {
    pub term: i32,
    pub delta: i32,
    pub weight_a: i32,
    pub weight_b: i32,
    pub samples_a: [i32; HISTORY_LEN],
    pub samples_b: [i32; HISTORY_LEN],
}

/// Decorrelation passes of one block, in the order they are undone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecorrelationProgram {
    pub passes: Vec<DecorrPass>,
}

#[inline(always)]
pub(crate) fn apply_weight(weight: i32, sample: i32) -> i32 {
    if sample as i16 as i32 == sample {
        (weight.wrapping_mul(sample).wrapping_add(512)) >> 10
    } else {
        let low = ((sample & 0xffff).wrapping_mul(weight)) >> 9;
        let high = ((sample & !0xffff) >> 9).wrapping_mul(weight);
        (low.wrapping_add(high).wrapping_add(1)) >> 1
    }
}

#[inline(always)]
pub(crate) fn update_weight(weight: &mut i32, delta: i32, source: i32, result: i32) {
    if source != 0 && result != 0 {
        if (source ^ result) < 0 {
            *weight -= delta;
        } else {
            *weight += delta;
        }
    }
}

#[inline(always)]
pub(crate) fn update_weight_clip(weight: &mut i32, delta: i32, source: i32, result: i32) {
    if source != 0 && result != 0 {
        if (source ^ result) < 0 {
            *weight = (*weight - delta).max(-1024);
        } else {
            *weight = (*weight + delta).min(1024);
        }
    }
}

fn read_log(bytes: &[u8]) -> i32 {
    i16::from_le_bytes([bytes[0], bytes[1]]) as i32
}

impl DecorrelationProgram {
    /// Reads the term/delta bytes. The first byte describes the last pass.
    pub fn read_terms(data: &[u8], mono: bool) -> Result<Self> {
        if data.len() > MAX_TERMS {
            bail!(MetadataError::TooManyTerms(data.len()));
        }

        let mut passes = vec![DecorrPass::default(); data.len()];
        for (pass, &byte) in passes.iter_mut().rev().zip(data) {
            let term = (byte & 0x1f) as i32 - 5;
            if term == 0 || term < -3 || (term > MAX_TERM && term < 17) || term > 18 {
                bail!(MetadataError::UnknownTerm(term));
            }
            if mono && term < 0 {
                bail!(MetadataError::CrossTermInMono(term));
            }

            pass.term = term;
            pass.delta = ((byte >> 5) & 0x7) as i32;
        }

        trace!(
            "decorrelation terms: {:?}",
            passes.iter().map(|p| p.term).collect::<Vec<_>>()
        );

        Ok(Self { passes })
    }

    /// Reads stored weights, filling passes from the last one backwards.
    pub fn read_weights(&mut self, data: &[u8], mono: bool) -> Result<()> {
        let per_pass = if mono { 1 } else { 2 };
        let count = data.len() / per_pass;
        if count > self.passes.len() || data.len() % per_pass != 0 {
            bail!(MetadataError::TooManyWeights {
                found: count,
                terms: self.passes.len(),
            });
        }

        for pass in self.passes.iter_mut() {
            pass.weight_a = 0;
            pass.weight_b = 0;
        }

        for (pass, chunk) in self.passes.iter_mut().rev().zip(data.chunks_exact(per_pass)) {
            pass.weight_a = restore_weight(chunk[0] as i8);
            if !mono {
                pass.weight_b = restore_weight(chunk[1] as i8);
            }
        }

        Ok(())
    }

    /// Seeds pass history, filling passes from the last one backwards.
    ///
    /// `skip_error_words` drops the per-channel error terms that version
    /// 0x402 hybrid streams prefix to the history.
    pub fn read_samples(&mut self, data: &[u8], mono: bool, skip_error_words: bool) -> Result<()> {
        for pass in self.passes.iter_mut() {
            pass.samples_a = [0; HISTORY_LEN];
            pass.samples_b = [0; HISTORY_LEN];
        }

        let mut pos = 0;
        if skip_error_words {
            pos = if mono { 2 } else { 4 };
        }

        let take = |pos: &mut usize| -> Result<i32> {
            let Some(bytes) = data.get(*pos..*pos + 2) else {
                bail!(MetadataError::InvalidLength {
                    id: crate::structs::metadata::id::DECORR_SAMPLES,
                    len: data.len(),
                });
            };
            *pos += 2;
            Ok(exp2s(read_log(bytes)))
        };

        for pass in self.passes.iter_mut().rev() {
            if pos >= data.len() {
                break;
            }

            if pass.term > MAX_TERM {
                pass.samples_a[0] = take(&mut pos)?;
                pass.samples_a[1] = take(&mut pos)?;
                if !mono {
                    pass.samples_b[0] = take(&mut pos)?;
                    pass.samples_b[1] = take(&mut pos)?;
                }
            } else if pass.term < 0 {
                pass.samples_a[0] = take(&mut pos)?;
                pass.samples_b[0] = take(&mut pos)?;
            } else {
                for m in 0..pass.term as usize {
                    pass.samples_a[m] = take(&mut pos)?;
                    if !mono {
                        pass.samples_b[m] = take(&mut pos)?;
                    }
                }
            }
        }

        if pos != data.len() {
            bail!(MetadataError::SamplesNotConsumed(data.len().saturating_sub(pos)));
        }

        Ok(())
    }

    /// Undoes every pass over a single-channel buffer.
    pub fn apply_mono(&mut self, buffer: &mut [i32]) {
        for pass in self.passes.iter_mut() {
            pass.apply_mono(buffer);
        }
    }

    /// Undoes every pass over an interleaved stereo buffer.
    pub fn apply_stereo(&mut self, buffer: &mut [i32]) {
        for pass in self.passes.iter_mut() {
            pass.apply_stereo(buffer);
        }
    }
}

impl DecorrPass {
    fn apply_mono(&mut self, buffer: &mut [i32]) {
        let delta = self.delta;

        match self.term {
            17 | 18 => {
                for sample in buffer.iter_mut() {
                    let predicted = self.extrapolate_a();
                    self.samples_a[1] = self.samples_a[0];
                    self.samples_a[0] = apply_weight(self.weight_a, predicted).wrapping_add(*sample);
                    update_weight(&mut self.weight_a, delta, predicted, *sample);
                    *sample = self.samples_a[0];
                }
            }
            term => {
                let mut m = 0;
                let mut k = term as usize & (HISTORY_LEN - 1);
                for sample in buffer.iter_mut() {
                    let source = self.samples_a[m];
                    self.samples_a[k] = apply_weight(self.weight_a, source).wrapping_add(*sample);
                    update_weight(&mut self.weight_a, delta, source, *sample);
                    *sample = self.samples_a[k];
                    m = (m + 1) & (HISTORY_LEN - 1);
                    k = (k + 1) & (HISTORY_LEN - 1);
                }
                self.rotate_history(m);
            }
        }
    }

    fn apply_stereo(&mut self, buffer: &mut [i32]) {
        let delta = self.delta;

        match self.term {
            17 | 18 => {
                for frame in buffer.chunks_exact_mut(2) {
                    let predicted = self.extrapolate_a();
                    self.samples_a[1] = self.samples_a[0];
                    self.samples_a[0] = apply_weight(self.weight_a, predicted).wrapping_add(frame[0]);
                    update_weight(&mut self.weight_a, delta, predicted, frame[0]);
                    frame[0] = self.samples_a[0];

                    let predicted = self.extrapolate_b();
                    self.samples_b[1] = self.samples_b[0];
                    self.samples_b[0] = apply_weight(self.weight_b, predicted).wrapping_add(frame[1]);
                    update_weight(&mut self.weight_b, delta, predicted, frame[1]);
                    frame[1] = self.samples_b[0];
                }
            }
            -1 => {
                for frame in buffer.chunks_exact_mut(2) {
                    let left = frame[0].wrapping_add(apply_weight(self.weight_a, self.samples_a[0]));
                    update_weight_clip(&mut self.weight_a, delta, self.samples_a[0], frame[0]);
                    frame[0] = left;

                    self.samples_a[0] = frame[1].wrapping_add(apply_weight(self.weight_b, left));
                    update_weight_clip(&mut self.weight_b, delta, left, frame[1]);
                    frame[1] = self.samples_a[0];
                }
            }
            -2 => {
                for frame in buffer.chunks_exact_mut(2) {
                    let right = frame[1].wrapping_add(apply_weight(self.weight_b, self.samples_b[0]));
                    update_weight_clip(&mut self.weight_b, delta, self.samples_b[0], frame[1]);
                    frame[1] = right;

                    self.samples_b[0] = frame[0].wrapping_add(apply_weight(self.weight_a, right));
                    update_weight_clip(&mut self.weight_a, delta, right, frame[0]);
                    frame[0] = self.samples_b[0];
                }
            }
            -3 => {
                for frame in buffer.chunks_exact_mut(2) {
                    let left = frame[0].wrapping_add(apply_weight(self.weight_a, self.samples_a[0]));
                    update_weight_clip(&mut self.weight_a, delta, self.samples_a[0], frame[0]);
                    let right = frame[1].wrapping_add(apply_weight(self.weight_b, self.samples_b[0]));
                    update_weight_clip(&mut self.weight_b, delta, self.samples_b[0], frame[1]);

                    self.samples_b[0] = left;
                    self.samples_a[0] = right;
                    frame[0] = left;
                    frame[1] = right;
                }
            }
            term => {
                let mut m = 0;
                let mut k = term as usize & (HISTORY_LEN - 1);
                for frame in buffer.chunks_exact_mut(2) {
                    let source = self.samples_a[m];
                    self.samples_a[k] = apply_weight(self.weight_a, source).wrapping_add(frame[0]);
                    update_weight(&mut self.weight_a, delta, source, frame[0]);
                    frame[0] = self.samples_a[k];

                    let source = self.samples_b[m];
                    self.samples_b[k] = apply_weight(self.weight_b, source).wrapping_add(frame[1]);
                    update_weight(&mut self.weight_b, delta, source, frame[1]);
                    frame[1] = self.samples_b[k];

                    m = (m + 1) & (HISTORY_LEN - 1);
                    k = (k + 1) & (HISTORY_LEN - 1);
                }
                self.rotate_history(m);
            }
        }
    }

    #[inline(always)]
    fn extrapolate_a(&self) -> i32 {
        extrapolate(self.term, self.samples_a[0], self.samples_a[1])
    }

    #[inline(always)]
    fn extrapolate_b(&self) -> i32 {
        extrapolate(self.term, self.samples_b[0], self.samples_b[1])
    }

    /// Realigns the circular history so index 0 is the oldest entry again.
    fn rotate_history(&mut self, m: usize) {
        if m != 0 {
            self.samples_a.rotate_left(m);
            self.samples_b.rotate_left(m);
        }
    }
}

#[inline(always)]
pub(crate) fn extrapolate(term: i32, last: i32, before_last: i32) -> i32 {
    if term == 17 {
        last.wrapping_mul(2).wrapping_sub(before_last)
    } else {
        (last.wrapping_mul(3).wrapping_sub(before_last)) >> 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_fill_in_reverse() -> Result<()> {
        // term 18 delta 2, term 2 delta 3, term -1 delta 2
        let data = [(2 << 5) | 23, (3 << 5) | 7, (2 << 5) | 4];
        let program = DecorrelationProgram::read_terms(&data, false)?;
        let terms: Vec<_> = program.passes.iter().map(|p| (p.term, p.delta)).collect();
        assert_eq!(terms, vec![(-1, 2), (2, 3), (18, 2)]);

        Ok(())
    }

    #[test]
    fn rejects_unknown_and_cross_terms() {
        assert!(DecorrelationProgram::read_terms(&[5], false).is_err());
        assert!(DecorrelationProgram::read_terms(&[5 + 9], false).is_err());
        assert!(DecorrelationProgram::read_terms(&[5 + 19], false).is_err());
        assert!(DecorrelationProgram::read_terms(&[4], true).is_err());
        assert!(DecorrelationProgram::read_terms(&[0; 17], false).is_err());
    }

    #[test]
    fn weights_and_samples_fill_from_last_pass() -> Result<()> {
        let mut program = DecorrelationProgram::read_terms(&[5 + 1, 5 + 2], true)?;
        assert_eq!(program.passes[0].term, 2);
        assert_eq!(program.passes[1].term, 1);

        // only one weight: it belongs to the last pass (term 1)
        program.read_weights(&[127], true)?;
        assert_eq!(program.passes[1].weight_a, 1024);
        assert_eq!(program.passes[0].weight_a, 0);

        // term 1 takes one history value, term 2 takes two
        let one = 0x0100i16.to_le_bytes();
        let two = 0x0200i16.to_le_bytes();
        let samples = [one, two, one].concat();
        program.read_samples(&samples, true, false)?;
        assert_eq!(program.passes[1].samples_a[0], 1);
        assert_eq!(program.passes[0].samples_a[..2], [2, 1]);

        assert!(program.read_samples(&[0, 1, 0], true, false).is_err());

        Ok(())
    }

    #[test]
    fn first_order_prediction_integrates() {
        let mut program = DecorrelationProgram {
            passes: vec![DecorrPass {
                term: 1,
                weight_a: 1024,
                ..Default::default()
            }],
        };

        let mut buffer = [1, 1, 1, 1];
        program.apply_mono(&mut buffer);
        assert_eq!(buffer, [1, 2, 3, 4]);
        assert_eq!(program.passes[0].samples_a[0], 4);
    }

    #[test]
    fn apply_weight_wide_samples() {
        assert_eq!(apply_weight(1024, 1 << 20), 1 << 20);
        assert_eq!(apply_weight(512, -(1 << 20)), -(1 << 19));
        assert_eq!(apply_weight(1024, 100), 100);
    }
}
