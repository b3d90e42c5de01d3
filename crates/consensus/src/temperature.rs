//! Per-round sampling temperatures, descending linearly across the budget.
//!
//! Early rounds explore (family maximum); the final budgeted round lands
//! exactly on the family floor. Families are inferred from the model name
//! after stripping the provider prefix: OpenAI-style (`gpt*`, `o<digit>*`)
//! and Gemini models tolerate a 0.0–2.0 range, everything else is treated
//! as a 0.0–1.0 model.

use crate::schema::DEFAULT_MAX_ROUNDS;

/// Temperature family of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempFamily {
    /// 2.0-max family: starts at 2.0, floors at 0.4.
    High,
    /// 1.0-max family: starts at 1.0, floors at 0.2.
    Low,
}

impl TempFamily {
    pub fn max(self) -> f64 {
        match self {
            TempFamily::High => 2.0,
            TempFamily::Low => 1.0,
        }
    }

    pub fn floor(self) -> f64 {
        match self {
            TempFamily::High => 0.4,
            TempFamily::Low => 0.2,
        }
    }
}

/// Classify a model identifier such as `openai:gpt-4o` or `google:gemini-pro`.
///
/// Unrecognizable identifiers fall into the low family.
pub fn family_of(model: &str) -> TempFamily {
    let name = model
        .split_once(':')
        .map(|(_, rest)| rest)
        .unwrap_or(model)
        .to_ascii_lowercase();

    let o_series = {
        let mut chars = name.chars();
        chars.next() == Some('o') && chars.next().is_some_and(|c| c.is_ascii_digit())
    };

    if name.starts_with("gpt") || o_series || name.starts_with("gemini") {
        TempFamily::High
    } else {
        TempFamily::Low
    }
}

/// Linearly descending temperature schedule over a fixed round budget.
#[derive(Debug, Clone, Copy)]
pub struct TemperatureSchedule {
    max_rounds: u32,
}

impl TemperatureSchedule {
    pub fn new(max_rounds: u32) -> Self {
        Self { max_rounds }
    }

    /// Temperature for `model` at 1-based `round`.
    ///
    /// Round 1 (or an invalid round index of 0) returns the family maximum;
    /// rounds at or past the budget return the floor; rounds in between
    /// descend linearly, rounded to one decimal place.
    pub fn temperature(&self, model: &str, round: u32) -> f64 {
        let family = family_of(model);
        let max_t = family.max();
        let floor_t = family.floor();
        let n = self.max_rounds.max(2);

        if round <= 1 {
            return max_t;
        }
        if round >= n {
            return floor_t;
        }

        let step = (max_t - floor_t) / f64::from(n - 1);
        let t = max_t - f64::from(round - 1) * step;
        (t * 10.0).round() / 10.0
    }
}

impl Default for TemperatureSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ROUNDS)
    }
}
