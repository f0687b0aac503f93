//! ADSR envelope driven by note events.

/// Envelope stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeStage {
    /// Envelope is idle (output = 0).
    Idle,
    /// Rising from the current level to 1.
    Attack,
    /// Falling from 1 to the sustain level.
    Decay,
    /// Holding at the sustain level while the gate is open.
    Sustain,
    /// Falling from the current level to 0.
    Release,
}

/// Attack-Decay-Sustain-Release generator with RC-style exponential curves.
///
/// `gate_on` restarts the attack from the current level, so retriggering a
/// sounding note does not click.
#[derive(Clone, Debug)]
pub struct AdsrEnvelope {
    stage: EnvelopeStage,
    level: f32,
    attack: f32,
    decay: f32,
    sustain: f32,
    release: f32,
    attack_coeff: f32,
    decay_coeff: f32,
    release_coeff: f32,
}

impl AdsrEnvelope {
    /// Threshold for considering the envelope "close enough" to target.
    const LEVEL_THRESHOLD: f32 = 0.0001;

    /// Times in seconds, sustain as a 0-1 level.
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32, sample_rate: u32) -> Self {
        let mut env = Self {
            stage: EnvelopeStage::Idle,
            level: 0.0,
            attack,
            decay,
            sustain: sustain.clamp(0.0, 1.0),
            release,
            attack_coeff: 0.0,
            decay_coeff: 0.0,
            release_coeff: 0.0,
        };
        env.set_sample_rate(sample_rate);
        env
    }

    /// Reaches ~99.3% of the target in `time_seconds`.
    fn coeff(time_seconds: f32, sample_rate: u32) -> f32 {
        let samples = time_seconds * sample_rate as f32;
        if samples <= 1.0 {
            return 0.0;
        }
        (-5.0_f32 / samples).exp()
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.attack_coeff = Self::coeff(self.attack, sample_rate);
        self.decay_coeff = Self::coeff(self.decay, sample_rate);
        self.release_coeff = Self::coeff(self.release, sample_rate);
    }

    pub fn gate_on(&mut self) {
        self.stage = EnvelopeStage::Attack;
    }

    pub fn gate_off(&mut self) {
        if self.stage != EnvelopeStage::Idle {
            self.stage = EnvelopeStage::Release;
        }
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn is_idle(&self) -> bool {
        self.stage == EnvelopeStage::Idle
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    /// Advances one sample.
    #[inline]
    pub fn next(&mut self) -> f32 {
        match self.stage {
            EnvelopeStage::Idle => {}
            EnvelopeStage::Attack => {
                self.level = 1.0 - (1.0 - self.level) * self.attack_coeff;
                if self.level >= 1.0 - Self::LEVEL_THRESHOLD {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                self.level = self.sustain + (self.level - self.sustain) * self.decay_coeff;
                if (self.level - self.sustain).abs() < Self::LEVEL_THRESHOLD {
                    self.level = self.sustain;
                    self.stage = EnvelopeStage::Sustain;
                }
            }
            EnvelopeStage::Sustain => self.level = self.sustain,
            EnvelopeStage::Release => {
                self.level *= self.release_coeff;
                if self.level < Self::LEVEL_THRESHOLD {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Idle;
                }
            }
        }
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_starts_idle() {
        let mut env = AdsrEnvelope::new(0.01, 0.1, 0.7, 0.3, 48000);
        assert!(env.is_idle());
        assert_eq!(env.next(), 0.0);
    }

    #[test]
    fn test_envelope_attack_reaches_sustain() {
        let mut env = AdsrEnvelope::new(0.001, 0.01, 0.5, 0.1, 48000);
        env.gate_on();
        for _ in 0..48000 {
            env.next();
        }
        assert_eq!(env.stage(), EnvelopeStage::Sustain);
        assert!((env.level() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_envelope_release_to_idle() {
        let mut env = AdsrEnvelope::new(0.001, 0.01, 0.5, 0.01, 48000);
        env.gate_on();
        for _ in 0..4800 {
            env.next();
        }
        env.gate_off();
        assert_eq!(env.stage(), EnvelopeStage::Release);
        for _ in 0..48000 {
            env.next();
        }
        assert!(env.is_idle());
        assert_eq!(env.level(), 0.0);
    }

    #[test]
    fn test_gate_off_while_idle_stays_idle() {
        let mut env = AdsrEnvelope::new(0.01, 0.1, 0.7, 0.3, 48000);
        env.gate_off();
        assert!(env.is_idle());
    }

    #[test]
    fn test_retrigger_keeps_level() {
        let mut env = AdsrEnvelope::new(0.01, 0.1, 0.7, 0.3, 48000);
        env.gate_on();
        for _ in 0..100 {
            env.next();
        }
        let level = env.level();
        env.gate_on();
        assert!(env.next() >= level);
    }
}
