//! 長さの検証
use crate::error::{PipelineError, PipelineResult};

/// 境界値は両端とも許容（min ≤ d ≤ max）
#[derive(Debug, Clone, Copy)]
pub struct DurationValidator {
    min_seconds: f64,
    max_seconds: f64,
}

impl DurationValidator {
    pub fn new(min_seconds: f64, max_seconds: f64) -> Self {
        Self {
            min_seconds,
            max_seconds,
        }
    }

    pub fn validate(&self, duration_seconds: f64) -> PipelineResult<()> {
        if duration_seconds < self.min_seconds {
            return Err(PipelineError::TooShort {
                duration: duration_seconds,
                min: self.min_seconds,
            });
        }
        if duration_seconds > self.max_seconds {
            return Err(PipelineError::TooLong {
                duration: duration_seconds,
                max: self.max_seconds,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_inclusive() {
        let validator = DurationValidator::new(0.5, 30.0);
        assert!(validator.validate(0.5).is_ok());
        assert!(validator.validate(30.0).is_ok());
        assert!(matches!(
            validator.validate(0.49),
            Err(PipelineError::TooShort { .. })
        ));
        assert!(matches!(
            validator.validate(30.01),
            Err(PipelineError::TooLong { .. })
        ));
    }
}
