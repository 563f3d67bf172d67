//! Token quota tiers used to express usage as a share of a 5-hour window.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Subscription tier with an estimated 5-hour token ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Pro,
    Max5x,
    Max20x,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Pro, Tier::Max5x, Tier::Max20x];

    pub fn token_limit(self) -> u64 {
        match self {
            Tier::Pro => 44_000,
            Tier::Max5x => 88_000,
            Tier::Max20x => 220_000,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Tier::Pro => "Pro",
            Tier::Max5x => "Max 5x",
            Tier::Max20x => "Max 20x",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Tier::Pro => "pro",
            Tier::Max5x => "max5x",
            Tier::Max20x => "max20x",
        }
    }

    /// `used / ceiling * 100`, not clamped.
    #[allow(clippy::cast_precision_loss)]
    pub fn percent_of(self, used: u64) -> f64 {
        let limit = self.token_limit();
        if limit == 0 {
            return 0.0;
        }
        used as f64 / limit as f64 * 100.0
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Tier::ALL
            .into_iter()
            .find(|tier| tier.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("unknown tier '{s}' (expected pro, max5x or max20x)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceilings_grow_with_tier() {
        assert_eq!(Tier::Pro.token_limit(), 44_000);
        assert_eq!(Tier::Max5x.token_limit(), 88_000);
        assert_eq!(Tier::Max20x.token_limit(), 220_000);
    }

    #[test]
    fn percent_of_pro_tier() {
        assert!((Tier::Pro.percent_of(4_400) - 10.0).abs() < 1e-9);
        assert!((Tier::Max20x.percent_of(0)).abs() < 1e-9);
    }

    #[test]
    fn parse_tier_keys() {
        assert_eq!("pro".parse::<Tier>().expect("pro"), Tier::Pro);
        assert_eq!("MAX5X".parse::<Tier>().expect("max5x"), Tier::Max5x);
        assert_eq!("max20x".parse::<Tier>().expect("max20x"), Tier::Max20x);
        assert!("team".parse::<Tier>().is_err());
    }
}
