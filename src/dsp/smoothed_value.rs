//! Smoothed parameter values for click-free gain changes.
//!
//! Stages receive control changes as discrete MIDI events; feeding those
//! straight into a gain would produce zipper noise, so they go through a
//! one-pole smoother that is advanced once per sample.

/// A value that exponentially approaches a target.
#[derive(Clone, Debug)]
pub struct SmoothedValue {
    current: f32,
    target: f32,
    /// Per-sample coefficient (0 = instant, closer to 1 = slower).
    factor: f32,
    time_constant_ms: f32,
}

impl SmoothedValue {
    /// 10ms: fast enough to follow a fader, slow enough to avoid clicks.
    pub const DEFAULT_TIME_CONSTANT_MS: f32 = 10.0;

    /// Snap threshold; below this distance the value jumps to the target.
    const EPSILON: f32 = 1e-4;

    pub fn new(initial: f32, time_constant_ms: f32, sample_rate: u32) -> Self {
        Self {
            current: initial,
            target: initial,
            factor: Self::coefficient(time_constant_ms, sample_rate),
            time_constant_ms,
        }
    }

    pub fn with_default_smoothing(initial: f32, sample_rate: u32) -> Self {
        Self::new(initial, Self::DEFAULT_TIME_CONSTANT_MS, sample_rate)
    }

    /// factor = exp(-1 / time_constant_in_samples); reaches ~63% of a step
    /// after one time constant.
    fn coefficient(time_constant_ms: f32, sample_rate: u32) -> f32 {
        let samples = time_constant_ms * 0.001 * sample_rate as f32;
        if samples < 1.0 {
            return 0.0;
        }
        (-1.0 / samples).exp()
    }

    #[inline]
    pub fn set_target(&mut self, value: f32) {
        self.target = value;
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Advances one sample and returns the new value.
    #[inline]
    pub fn next(&mut self) -> f32 {
        let diff = self.current - self.target;
        if diff.abs() <= Self::EPSILON {
            self.current = self.target;
        } else {
            self.current = self.target + self.factor * diff;
        }
        self.current
    }

    /// Recomputes the coefficient for a new sample rate. Does not allocate.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.factor = Self::coefficient(self.time_constant_ms, sample_rate);
    }
}
