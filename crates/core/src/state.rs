//! Health-factor band classification.
//!
//! A borrower's state is a pure function of its last predicted health
//! factor and the configured band boundaries. All transitions, forward and
//! backward, are legal; the registry logs them.

use serde::{Deserialize, Serialize};

/// Borrower classification bands, most healthy first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BorrowerState {
    /// HF above the watch boundary (including infinite, i.e. no debt).
    Safe,
    /// Worth recomputing every block.
    Watch,
    /// Close enough to pre-build the liquidation transaction.
    Critical,
    /// At or below the liquidation boundary.
    Liquidatable,
}

impl BorrowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Watch => "watch",
            Self::Critical => "critical",
            Self::Liquidatable => "liquidatable",
        }
    }
}

impl std::fmt::Display for BorrowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Band boundaries. Validated at config load: watch > critical > liquidatable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub watch: f64,
    pub critical: f64,
    pub liquidatable: f64,
}

impl Bands {
    pub fn is_ordered(&self) -> bool {
        self.watch > self.critical
            && self.critical > self.liquidatable
            && self.liquidatable >= 0.0
    }
}

impl Default for Bands {
    fn default() -> Self {
        Self {
            watch: 1.10,
            critical: 1.04,
            liquidatable: 1.00,
        }
    }
}

/// Classify a health factor into its band. Total over the non-negative
/// reals plus infinity; boundaries belong to the lower (riskier) band.
pub fn classify(hf: f64, bands: &Bands) -> BorrowerState {
    if hf <= bands.liquidatable {
        BorrowerState::Liquidatable
    } else if hf <= bands.critical {
        BorrowerState::Critical
    } else if hf <= bands.watch {
        BorrowerState::Watch
    } else {
        BorrowerState::Safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bands() -> Bands {
        Bands {
            watch: 1.10,
            critical: 1.04,
            liquidatable: 1.00,
        }
    }

    #[test]
    fn test_classify_boundaries() {
        let bands = bands();
        let cases = [
            (2.00, BorrowerState::Safe),
            (1.11, BorrowerState::Safe),
            (1.10, BorrowerState::Watch),
            (1.05, BorrowerState::Watch),
            (1.04, BorrowerState::Critical),
            (1.01, BorrowerState::Critical),
            (1.00, BorrowerState::Liquidatable),
            (0.50, BorrowerState::Liquidatable),
        ];
        for (hf, expected) in cases {
            assert_eq!(classify(hf, &bands), expected, "hf={hf}");
        }
    }

    #[test]
    fn test_classify_infinite() {
        assert_eq!(classify(f64::INFINITY, &bands()), BorrowerState::Safe);
    }

    #[test]
    fn test_classify_zero() {
        assert_eq!(classify(0.0, &bands()), BorrowerState::Liquidatable);
    }

    #[test]
    fn test_band_monotonicity() {
        // Raising the watch boundary can move Safe -> Watch, never the
        // other direction.
        let tight = bands();
        let wide = Bands {
            watch: 1.50,
            ..tight
        };

        for hf in [1.11, 1.2, 1.45, 1.50, 1.51, 3.0] {
            let before = classify(hf, &tight);
            let after = classify(hf, &wide);
            if before == BorrowerState::Watch {
                assert_eq!(after, BorrowerState::Watch);
            }
            if after == BorrowerState::Safe {
                assert_eq!(before, BorrowerState::Safe);
            }
        }
    }

    #[test]
    fn test_band_ordering_check() {
        assert!(bands().is_ordered());
        assert!(!Bands {
            watch: 1.0,
            critical: 1.04,
            liquidatable: 1.0
        }
        .is_ordered());
    }
}
