use thiserror::Error;

pub const MIN_SPRING_THICKNESS: f64 = 3.0;
pub const MAX_SPRING_THICKNESS: f64 = 5.0;
pub const MIN_STRAP_WIDTH: f64 = 26.0;

pub const DEFAULT_SPRING_THICKNESS: f64 = MIN_SPRING_THICKNESS;
pub const DEFAULT_STRAP_WIDTH: f64 = MIN_STRAP_WIDTH;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("springThickness must be between 3 and 5 mm (got {0}).")]
    SpringThickness(f64),
    #[error("strapWidth must be at least 26 mm (got {0}).")]
    StrapWidth(f64),
}

/// Design parameters for one strap, in millimetres.
///
/// Construction goes through [`GenerationParams::new`], so a value of this type
/// has already passed the range checks. [`GenerationParams::validate`] repeats
/// them for callers that must not trust how the value was built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    spring_thickness: f64,
    strap_width: f64,
}

impl GenerationParams {
    pub fn new(spring_thickness: f64, strap_width: f64) -> Result<Self, ValidationError> {
        let params = Self {
            spring_thickness,
            strap_width,
        };
        params.validate()?;
        Ok(params)
    }

    /// Bypasses validation so the generator's own check can be exercised.
    #[cfg(test)]
    pub(crate) fn unchecked(spring_thickness: f64, strap_width: f64) -> Self {
        Self {
            spring_thickness,
            strap_width,
        }
    }

    pub fn spring_thickness(&self) -> f64 {
        self.spring_thickness
    }

    pub fn strap_width(&self) -> f64 {
        self.strap_width
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        // Written as negated `contains` so NaN is rejected too.
        if !(MIN_SPRING_THICKNESS..=MAX_SPRING_THICKNESS).contains(&self.spring_thickness) {
            return Err(ValidationError::SpringThickness(self.spring_thickness));
        }
        if !self.strap_width.is_finite() || self.strap_width < MIN_STRAP_WIDTH {
            return Err(ValidationError::StrapWidth(self.strap_width));
        }
        Ok(())
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            spring_thickness: DEFAULT_SPRING_THICKNESS,
            strap_width: DEFAULT_STRAP_WIDTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GenerationParams, ValidationError};

    #[test]
    fn accepts_inclusive_bounds() {
        assert!(GenerationParams::new(3.0, 26.0).is_ok());
        assert!(GenerationParams::new(5.0, 26.0).is_ok());
        assert!(GenerationParams::new(4.2, 400.0).is_ok());
    }

    #[test]
    fn rejects_spring_thickness_outside_range() {
        for value in [2.999, 5.001, -1.0, f64::NAN, f64::INFINITY] {
            let err = GenerationParams::new(value, 30.0).expect_err("should reject");
            assert!(matches!(err, ValidationError::SpringThickness(_)));
            assert!(err.to_string().contains("springThickness"));
        }
    }

    #[test]
    fn rejects_narrow_or_non_finite_strap() {
        for value in [25.99, 0.0, f64::NAN, f64::INFINITY] {
            let err = GenerationParams::new(4.0, value).expect_err("should reject");
            assert!(matches!(err, ValidationError::StrapWidth(_)));
            assert!(err.to_string().contains("at least 26"));
        }
    }

    #[test]
    fn verdict_is_stable_for_same_input() {
        let first = GenerationParams::new(5.5, 30.0);
        let second = GenerationParams::new(5.5, 30.0);
        assert_eq!(first, second);
    }

    #[test]
    fn default_params_are_valid() {
        let params = GenerationParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.spring_thickness(), 3.0);
        assert_eq!(params.strap_width(), 26.0);
    }
}
