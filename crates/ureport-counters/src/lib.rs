//! # ureport-counters
//!
//! Counter maintenance for the U-Report fact tables.
//!
//! When a contact or a poll result is inserted, updated or deleted, the
//! counters that describe it (total reporters, reporters by gender, poll
//! responses by category and location, ...) must move with it. This crate
//! computes the affected squash keys for each change and writes the +1/-1
//! deltas through the counts engine in one transaction.
//!
//! ## Flow
//!
//! ```text
//! fact change (old, new)
//!   → keys(old) -1, keys(new) +1, unchanged keys cancel
//!   → record_many (one transaction)
//!   → squash worker compacts later
//! ```
//!
//! ## Example
//!
//! ```rust
//! use counts_database::{CountFilter, CountsDatabase};
//! use ureport_counters::{Contact, ContactCounters};
//!
//! let db = CountsDatabase::open_in_memory().unwrap();
//! let counters = ContactCounters::new();
//! counters.install(db.connection()).unwrap();
//!
//! let contact = Contact::new(1).gender("F");
//! counters.on_insert(db.connection(), &contact).unwrap();
//!
//! let filter = CountFilter::new().eq("org_id", 1).scope("gender:f");
//! assert_eq!(db.sum(counters.spec(), &filter).unwrap(), 1);
//! ```

pub mod contacts;
mod error;
pub mod maintainer;
pub mod poll_results;

pub use contacts::{Contact, ContactCounters, REPORTERS_COUNTS_TABLE};
pub use error::{MaintenanceError, MaintenanceResult};
pub use maintainer::{CountedFact, CounterMaintainer};
pub use poll_results::{PollResult, PollResultCounters, POLL_RESULTS_COUNTS_TABLE};
