//! Reporter counters maintained from contacts.
//!
//! Every active contact with an org counts towards `total-reporters` for that
//! org, plus one scope per demographic field it has set:
//!
//! | field           | scope                        |
//! |-----------------|------------------------------|
//! | `gender`        | `gender:<lowercase>`         |
//! | `born`          | `born:<year>`                |
//! | `occupation`    | `occupation:<lowercase>`     |
//! | `registered_on` | `registered_on:<YYYY-MM-DD>` |
//! | `state`         | `state:<UPPERCASE>`          |
//! | `district`      | `district:<UPPERCASE>`       |

use chrono::NaiveDate;
use counts_database::{ColumnType, CountKey, CountSpec, SCOPE_COLUMN};
use serde::{Deserialize, Serialize};

use crate::{CountedFact, CounterMaintainer};

pub const REPORTERS_COUNTS_TABLE: &str = "reporters_counts";

/// Scope counting every reporter of an org.
pub const TOTAL_REPORTERS: &str = "total-reporters";

/// The counted fields of a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub org_id: Option<i64>,
    pub gender: Option<String>,
    pub born: Option<i32>,
    pub occupation: Option<String>,
    pub registered_on: Option<NaiveDate>,
    pub state: Option<String>,
    pub district: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Contact {
    /// An active contact of `org_id` with no demographic fields set.
    pub fn new(org_id: i64) -> Self {
        Self {
            org_id: Some(org_id),
            gender: None,
            born: None,
            occupation: None,
            registered_on: None,
            state: None,
            district: None,
            is_active: true,
        }
    }

    pub fn gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    pub fn born(mut self, year: i32) -> Self {
        self.born = Some(year);
        self
    }

    pub fn occupation(mut self, occupation: impl Into<String>) -> Self {
        self.occupation = Some(occupation.into());
        self
    }

    pub fn registered_on(mut self, day: NaiveDate) -> Self {
        self.registered_on = Some(day);
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

    pub fn active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Scopes this contact counts towards, if it is counted at all.
    pub fn scopes(&self) -> Vec<String> {
        if self.org_id.is_none() || !self.is_active {
            return Vec::new();
        }

        let mut scopes = vec![TOTAL_REPORTERS.to_string()];
        if let Some(gender) = &self.gender {
            scopes.push(format!("gender:{}", gender.to_lowercase()));
        }
        if let Some(born) = self.born {
            scopes.push(format!("born:{born}"));
        }
        if let Some(occupation) = &self.occupation {
            scopes.push(format!("occupation:{}", occupation.to_lowercase()));
        }
        if let Some(day) = self.registered_on {
            scopes.push(format!("registered_on:{}", day.format("%Y-%m-%d")));
        }
        if let Some(state) = &self.state {
            scopes.push(format!("state:{}", state.to_uppercase()));
        }
        if let Some(district) = &self.district {
            scopes.push(format!("district:{}", district.to_uppercase()));
        }
        scopes
    }
}

impl CountedFact for Contact {
    fn count_spec() -> CountSpec {
        CountSpec::new(REPORTERS_COUNTS_TABLE)
            .column("org_id", ColumnType::Integer)
            .column(SCOPE_COLUMN, ColumnType::Text)
            .squash_over(["org_id", SCOPE_COLUMN])
    }

    fn count_keys(&self) -> Vec<CountKey> {
        let Some(org_id) = self.org_id else {
            return Vec::new();
        };
        self.scopes()
            .into_iter()
            .map(|scope| CountKey::scope(scope).with("org_id", org_id))
            .collect()
    }
}

/// Maintains `reporters_counts` from contact changes.
pub type ContactCounters = CounterMaintainer<Contact>;

impl CounterMaintainer<Contact> {
    /// Maintainer with the default `reporters_counts` layout.
    pub fn new() -> Self {
        Self::with_spec(Contact::count_spec())
    }
}

impl Default for CounterMaintainer<Contact> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_follow_field_casing_rules() {
        let contact = Contact::new(1)
            .gender("Female")
            .born(1990)
            .occupation("Student")
            .registered_on(NaiveDate::from_ymd_opt(2015, 9, 18).unwrap())
            .state("Kigali")
            .district("Nyarugenge");

        assert_eq!(
            contact.scopes(),
            vec![
                "total-reporters",
                "gender:female",
                "born:1990",
                "occupation:student",
                "registered_on:2015-09-18",
                "state:KIGALI",
                "district:NYARUGENGE",
            ]
        );
    }

    #[test]
    fn uncounted_contacts_have_no_keys() {
        let inactive = Contact::new(1).gender("M").active(false);
        assert!(inactive.count_keys().is_empty());

        let orphan = Contact {
            org_id: None,
            ..Contact::new(1)
        };
        assert!(orphan.count_keys().is_empty());
    }

    #[test]
    fn keys_carry_org() {
        let keys = Contact::new(7).count_keys();
        assert_eq!(keys, vec![CountKey::scope("total-reporters").with("org_id", 7)]);
    }

    #[test]
    fn contact_json_defaults_to_active() {
        let contact: Contact = serde_json::from_str(
            r#"{"org_id": 3, "gender": "F", "born": null, "occupation": null,
                "registered_on": "2024-01-05", "state": null, "district": null}"#,
        )
        .unwrap();
        assert!(contact.is_active);
        assert_eq!(contact.registered_on, NaiveDate::from_ymd_opt(2024, 1, 5));
    }
}
