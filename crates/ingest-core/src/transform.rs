use serde::{Deserialize, Serialize};

/// Linear conversion from a decoded raw value to engineering units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearTransform {
    pub scale: f64,
    pub bias: f64,
}

impl LinearTransform {
    pub const IDENTITY: LinearTransform = LinearTransform {
        scale: 1.0,
        bias: 0.0,
    };

    pub fn new(scale: f64, bias: f64) -> Self {
        Self { scale, bias }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.scale + self.bias
    }
}

impl Default for LinearTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_scale_then_bias() {
        assert_eq!(LinearTransform::new(2.0, 1.0).apply(3.0), 7.0);
    }

    #[test]
    fn identity_is_exact() {
        for raw in [0.0, -1.5, 50.0, f64::MAX, 1e-300] {
            assert_eq!(LinearTransform::IDENTITY.apply(raw), raw);
        }
    }
}
