//! Exponentielle Glättung der Konfidenz

/// Standard-Gewicht des neuen Wertes
pub const DEFAULT_ALPHA: f32 = 0.3;

/// `alpha * raw + (1 - alpha) * previous`, begrenzt auf [0, 1]
pub fn smooth_confidence(previous: f32, raw: f32, alpha: f32) -> f32 {
    let alpha = alpha.clamp(0.0, 1.0);
    let raw = raw.clamp(0.0, 1.0);
    (alpha * raw + (1.0 - alpha) * previous).clamp(0.0, 1.0)
}

/// EMA-Zustand einer Detection Loop
#[derive(Debug, Clone)]
pub struct ConfidenceSmoother {
    alpha: f32,
    value: f32,
}

impl ConfidenceSmoother {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, value: 0.0 }
    }

    pub fn update(&mut self, raw: f32) -> f32 {
        self.value = smooth_confidence(self.value, raw, self.alpha);
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

impl Default for ConfidenceSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_starts_from_zero() {
        let mut smoother = ConfidenceSmoother::default();
        let first = smoother.update(0.95);
        assert!((first - 0.285).abs() < 1e-6);
    }

    #[test]
    fn constant_input_converges_and_stays_in_range() {
        let mut smoother = ConfidenceSmoother::default();
        let mut previous = 0.0;
        for _ in 0..100 {
            let value = smoother.update(0.9);
            assert!((0.0..=1.0).contains(&value));
            assert!(value >= previous);
            previous = value;
        }
        assert!((smoother.value() - 0.9).abs() < 1e-4);
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        assert_eq!(smooth_confidence(1.0, 7.0, DEFAULT_ALPHA), 1.0);
        assert_eq!(smooth_confidence(0.0, -3.0, DEFAULT_ALPHA), 0.0);
        assert_eq!(smooth_confidence(0.5, 0.5, 2.0), 0.5);
    }

    #[test]
    fn reset_returns_to_zero() {
        let mut smoother = ConfidenceSmoother::default();
        smoother.update(0.99);
        smoother.reset();
        assert_eq!(smoother.value(), 0.0);
    }
}
