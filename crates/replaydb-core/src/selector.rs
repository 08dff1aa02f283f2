//! Sampling strategies for priority tables.

use replaydb_commons::ReplayError;

/// Strategy used to pick the next item from a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Every item is equally likely.
    Uniform,
    /// Items are weighted by `priority ^ priority_exponent`.
    Prioritized { priority_exponent: f64 },
    /// The oldest item is always picked.
    Fifo,
}

impl Selector {
    /// Parses the configuration representation of a sampler.
    pub fn from_settings(sampler: &str, priority_exponent: f64) -> Result<Self, ReplayError> {
        match sampler {
            "uniform" => Ok(Self::Uniform),
            "prioritized" => Ok(Self::Prioritized { priority_exponent }),
            "fifo" => Ok(Self::Fifo),
            other => Err(ReplayError::invalid_argument(format!(
                "unknown sampler '{}'",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Prioritized { .. } => "prioritized",
            Self::Fifo => "fifo",
        }
    }

    pub fn is_fifo(&self) -> bool {
        matches!(self, Self::Fifo)
    }

    /// Sampling weight of an item with the given priority. Zero-priority
    /// items are unreachable under the prioritized strategy, matching
    /// weighted sampling semantics.
    pub fn weight(&self, priority: f64) -> f64 {
        match self {
            Self::Uniform => 1.0,
            Self::Prioritized { priority_exponent } => priority.max(0.0).powf(*priority_exponent),
            Self::Fifo => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        assert_eq!(Selector::from_settings("uniform", 1.0).unwrap(), Selector::Uniform);
        assert_eq!(
            Selector::from_settings("prioritized", 0.8).unwrap(),
            Selector::Prioritized {
                priority_exponent: 0.8
            }
        );
        assert!(Selector::from_settings("heap", 1.0).is_err());
    }

    #[test]
    fn test_prioritized_weights() {
        let selector = Selector::Prioritized {
            priority_exponent: 2.0,
        };
        assert_eq!(selector.weight(3.0), 9.0);
        assert_eq!(selector.weight(0.0), 0.0);
        // Negative priorities are clamped rather than producing NaN.
        assert_eq!(selector.weight(-1.0), 0.0);
    }

    #[test]
    fn test_uniform_weight_ignores_priority() {
        assert_eq!(Selector::Uniform.weight(100.0), 1.0);
        assert_eq!(Selector::Uniform.weight(0.0), 1.0);
    }
}
