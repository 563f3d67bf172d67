//! Token usage accumulation across a loop run.

use std::ops::Add;

use serde::{Deserialize, Serialize};

use crate::core::budget::Tier;

/// Token counts reported by a single agent run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    /// Input plus output. Cache tokens are tracked separately.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// A record without input or output tokens carries no usage.
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            cache_read_tokens: self.cache_read_tokens + rhs.cache_read_tokens,
            cache_creation_tokens: self.cache_creation_tokens + rhs.cache_creation_tokens,
        }
    }
}

/// Running totals for the lifetime of one loop run.
///
/// Totals only ever grow; nothing here is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageTotals {
    sum: TokenUsage,
    records: u32,
}

/// Usage against one tier ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierUsage {
    pub tier: Tier,
    pub used: u64,
    /// Uncapped percentage of the tier ceiling.
    pub percent: f64,
}

impl TierUsage {
    pub fn over_limit(&self) -> bool {
        self.percent > 100.0
    }

    /// Percentage clamped to 100 for display.
    pub fn display_percent(&self) -> f64 {
        self.percent.min(100.0)
    }
}

impl UsageTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a run's usage. Absent or empty records leave totals unchanged.
    pub fn record(&mut self, usage: Option<&TokenUsage>) -> &Self {
        if let Some(usage) = usage.filter(|u| !u.is_empty()) {
            self.sum = self.sum + *usage;
            self.records += 1;
        }
        self
    }

    pub fn input_tokens(&self) -> u64 {
        self.sum.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.sum.output_tokens
    }

    pub fn cache_read_tokens(&self) -> u64 {
        self.sum.cache_read_tokens
    }

    pub fn cache_creation_tokens(&self) -> u64 {
        self.sum.cache_creation_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.sum.total_tokens()
    }

    /// Number of runs that contributed usage.
    pub fn records(&self) -> u32 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens() == 0
    }

    pub fn tier_usage(&self, tier: Tier) -> TierUsage {
        let used = self.total_tokens();
        TierUsage {
            tier,
            used,
            percent: tier.percent_of(used),
        }
    }

    /// Usage against every tier, smallest ceiling first.
    pub fn all_tiers(&self) -> Vec<TierUsage> {
        Tier::ALL.iter().map(|tier| self.tier_usage(*tier)).collect()
    }
}
