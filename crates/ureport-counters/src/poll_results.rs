//! Poll result counters.
//!
//! A poll result is counted only when it has an org, a flow and a ruleset.
//! Scopes are prefixed with `ruleset:<lowercase ruleset>`:
//!
//! - `:total-ruleset-polled` for every counted result
//! - `:total-ruleset-responded` and `:category:<lowercase>` when it has a category
//! - per location level (`state`, `district`, `ward`):
//!   `:category:<cat>:<level>:<UPPERCASE>` when categorized,
//!   `:nocategory:<level>:<UPPERCASE>` otherwise

use counts_database::{ColumnType, CountKey, CountSpec, SCOPE_COLUMN};
use serde::{Deserialize, Serialize};

use crate::{CountedFact, CounterMaintainer};

pub const POLL_RESULTS_COUNTS_TABLE: &str = "poll_results_counts";

/// The counted fields of a poll result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResult {
    pub org_id: Option<i64>,
    pub flow: Option<String>,
    pub ruleset: Option<String>,
    pub category: Option<String>,
    pub state: Option<String>,
    pub district: Option<String>,
    pub ward: Option<String>,
}

impl PollResult {
    /// A result for `ruleset` of `flow` with no category or location.
    pub fn new(org_id: i64, flow: impl Into<String>, ruleset: impl Into<String>) -> Self {
        Self {
            org_id: Some(org_id),
            flow: Some(flow.into()),
            ruleset: Some(ruleset.into()),
            ..Self::default()
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn district(mut self, district: impl Into<String>) -> Self {
        self.district = Some(district.into());
        self
    }

    pub fn ward(mut self, ward: impl Into<String>) -> Self {
        self.ward = Some(ward.into());
        self
    }

    /// Scopes this result counts towards, if it is counted at all.
    pub fn scopes(&self) -> Vec<String> {
        let (Some(_), Some(_), Some(ruleset)) = (self.org_id, &self.flow, &self.ruleset) else {
            return Vec::new();
        };

        let prefix = format!("ruleset:{}", ruleset.to_lowercase());
        let category = self.category.as_ref().map(|c| c.to_lowercase());

        let mut scopes = vec![format!("{prefix}:total-ruleset-polled")];
        if let Some(category) = &category {
            scopes.push(format!("{prefix}:total-ruleset-responded"));
            scopes.push(format!("{prefix}:category:{category}"));
        }

        let locations = [
            ("state", &self.state),
            ("district", &self.district),
            ("ward", &self.ward),
        ];
        for (level, value) in locations {
            let Some(value) = value else { continue };
            let value = value.to_uppercase();
            match &category {
                Some(category) => scopes.push(format!("{prefix}:category:{category}:{level}:{value}")),
                None => scopes.push(format!("{prefix}:nocategory:{level}:{value}")),
            }
        }
        scopes
    }
}

impl CountedFact for PollResult {
    fn count_spec() -> CountSpec {
        CountSpec::new(POLL_RESULTS_COUNTS_TABLE)
            .column("org_id", ColumnType::Integer)
            .column("ruleset", ColumnType::Text)
            .column(SCOPE_COLUMN, ColumnType::Text)
            .squash_over(["org_id", "ruleset", SCOPE_COLUMN])
    }

    fn count_keys(&self) -> Vec<CountKey> {
        let (Some(org_id), Some(ruleset)) = (self.org_id, &self.ruleset) else {
            return Vec::new();
        };
        self.scopes()
            .into_iter()
            .map(|scope| {
                CountKey::scope(scope)
                    .with("org_id", org_id)
                    .with("ruleset", ruleset.as_str())
            })
            .collect()
    }
}

/// Maintains `poll_results_counts` from poll result changes.
pub type PollResultCounters = CounterMaintainer<PollResult>;

impl CounterMaintainer<PollResult> {
    /// Maintainer with the default `poll_results_counts` layout.
    pub fn new() -> Self {
        Self::with_spec(PollResult::count_spec())
    }
}

impl Default for CounterMaintainer<PollResult> {
    fn default() -> Self {
        Self::new()
    }
}
