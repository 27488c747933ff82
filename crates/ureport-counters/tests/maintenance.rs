//! Counter maintenance against a real counts database.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use counts_database::{CountFilter, CountsDatabase};
use tempfile::tempdir;
use ureport_counters::{Contact, ContactCounters, PollResult, PollResultCounters};

fn reporters(db: &CountsDatabase, counters: &ContactCounters, org_id: i64) -> BTreeMap<String, i64> {
    let mut totals = db
        .scope_totals(counters.spec(), &CountFilter::new().eq("org_id", org_id))
        .unwrap();
    totals.retain(|_, total| *total != 0);
    totals
}

fn reporter_total(conn: &rusqlite::Connection, counters: &ContactCounters) -> i64 {
    let filter = CountFilter::new().eq("org_id", 1).scope("total-reporters");
    counts_database::aggregate::sum(conn, counters.spec(), &filter).unwrap()
}

fn setup_contacts() -> (CountsDatabase, ContactCounters) {
    let db = CountsDatabase::open_in_memory().unwrap();
    let counters = ContactCounters::new();
    counters.install(db.connection()).unwrap();
    (db, counters)
}

#[test]
fn contact_insert_counts_every_set_field() {
    let (db, counters) = setup_contacts();

    let contact = Contact::new(1).gender("F").born(1995).state("Kigali");
    assert_eq!(counters.on_insert(db.connection(), &contact).unwrap(), 4);
    counters
        .on_insert(db.connection(), &Contact::new(1).gender("M"))
        .unwrap();
    counters
        .on_insert(db.connection(), &Contact::new(2).gender("f"))
        .unwrap();

    let org1 = reporters(&db, &counters, 1);
    assert_eq!(org1.get("total-reporters"), Some(&2));
    assert_eq!(org1.get("gender:f"), Some(&1));
    assert_eq!(org1.get("gender:m"), Some(&1));
    assert_eq!(org1.get("born:1995"), Some(&1));
    assert_eq!(org1.get("state:KIGALI"), Some(&1));

    assert_eq!(reporters(&db, &counters, 2).get("gender:f"), Some(&1));
}

#[test]
fn counters_follow_the_callers_transaction() {
    let mut conn = rusqlite::Connection::open_in_memory().unwrap();
    counts_database::run_migrations(&conn).unwrap();
    // Squash on every write so the squasher runs inside the transaction too.
    let spec = ContactCounters::new().spec().clone().with_inline_squash_probability(1.0);
    let counters = ContactCounters::with_spec(spec);
    counters.install(&conn).unwrap();
    conn.execute_batch("CREATE TABLE contacts (id INTEGER PRIMARY KEY, gender TEXT)")
        .unwrap();

    let contact = Contact::new(1).gender("F");
    let tx = conn.transaction().unwrap();
    tx.execute("INSERT INTO contacts (gender) VALUES ('F')", []).unwrap();
    counters.on_insert(&tx, &contact).unwrap();
    tx.commit().unwrap();

    assert_eq!(reporter_total(&conn, &counters), 1);
    let rows = counts_database::aggregate::row_count(&conn, counters.spec(), &CountFilter::new()).unwrap();

    let tx = conn.transaction().unwrap();
    tx.execute("INSERT INTO contacts (gender) VALUES ('F')", []).unwrap();
    counters.on_insert(&tx, &contact).unwrap();
    tx.rollback().unwrap();

    assert_eq!(reporter_total(&conn, &counters), 1);
    assert_eq!(
        counts_database::aggregate::row_count(&conn, counters.spec(), &CountFilter::new()).unwrap(),
        rows
    );
    let contacts: i64 = conn
        .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
        .unwrap();
    assert_eq!(contacts, 1);
}

#[test]
fn contact_update_moves_only_changed_fields() {
    let (db, counters) = setup_contacts();

    let before = Contact::new(1).gender("F").occupation("student");
    counters.on_insert(db.connection(), &before).unwrap();

    let after = before.clone().occupation("nurse");
    assert_eq!(counters.on_update(db.connection(), &before, &after).unwrap(), 2);

    let org1 = reporters(&db, &counters, 1);
    assert_eq!(org1.get("total-reporters"), Some(&1));
    assert_eq!(org1.get("gender:f"), Some(&1));
    assert_eq!(org1.get("occupation:student"), None);
    assert_eq!(org1.get("occupation:nurse"), Some(&1));
}

#[test]
fn deactivation_and_org_removal_decrement_everything() {
    let (db, counters) = setup_contacts();

    let active = Contact::new(1).gender("F").district("Gasabo");
    counters.on_insert(db.connection(), &active).unwrap();

    let inactive = active.clone().active(false);
    counters.on_update(db.connection(), &active, &inactive).unwrap();
    assert!(reporters(&db, &counters, 1).is_empty());

    counters.on_update(db.connection(), &inactive, &active).unwrap();
    assert_eq!(reporters(&db, &counters, 1).len(), 3);

    let orphaned = Contact {
        org_id: None,
        ..active.clone()
    };
    counters.on_update(db.connection(), &active, &orphaned).unwrap();
    assert!(reporters(&db, &counters, 1).is_empty());
}

#[test]
fn contact_moving_org_moves_counts() {
    let (db, counters) = setup_contacts();

    let contact = Contact::new(1).gender("M");
    counters.on_insert(db.connection(), &contact).unwrap();
    let moved = Contact {
        org_id: Some(2),
        ..contact.clone()
    };
    counters.on_update(db.connection(), &contact, &moved).unwrap();

    assert!(reporters(&db, &counters, 1).is_empty());
    assert_eq!(reporters(&db, &counters, 2).get("gender:m"), Some(&1));
}

#[test]
fn delete_then_squash_leaves_no_rows() {
    let (db, counters) = setup_contacts();

    let contact = Contact::new(1)
        .gender("F")
        .registered_on(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
    counters.on_insert(db.connection(), &contact).unwrap();
    counters.on_delete(db.connection(), &contact).unwrap();

    assert_eq!(db.squash(counters.spec()).unwrap(), 3);
    assert_eq!(db.row_count(counters.spec(), &CountFilter::new()).unwrap(), 0);
}

#[test]
fn truncate_clears_counters() {
    let (db, counters) = setup_contacts();

    for org_id in 1..=3 {
        counters
            .on_insert(db.connection(), &Contact::new(org_id))
            .unwrap();
    }
    assert_eq!(counters.on_truncate(db.connection()).unwrap(), 3);
    assert_eq!(db.sum(counters.spec(), &CountFilter::new()).unwrap(), 0);
}

#[test]
fn poll_result_update_recategorizes() {
    let dir = tempdir().unwrap();
    let db = CountsDatabase::open(&dir.path().join("counts.sqlite")).unwrap();
    let counters = PollResultCounters::new();
    counters.install(db.connection()).unwrap();

    let unanswered = PollResult::new(1, "flow-1", "rs-1").state("Kigali");
    counters.on_insert(db.connection(), &unanswered).unwrap();

    let answered = unanswered.clone().category("Yes");
    counters
        .on_update(db.connection(), &unanswered, &answered)
        .unwrap();

    db.squash(counters.spec()).unwrap();

    let filter = CountFilter::new().eq("org_id", 1).eq("ruleset", "rs-1");
    let mut totals = db.scope_totals(counters.spec(), &filter).unwrap();
    totals.retain(|_, total| *total != 0);
    assert_eq!(
        totals,
        BTreeMap::from([
            ("ruleset:rs-1:category:yes".to_string(), 1),
            ("ruleset:rs-1:category:yes:state:KIGALI".to_string(), 1),
            ("ruleset:rs-1:total-ruleset-polled".to_string(), 1),
            ("ruleset:rs-1:total-ruleset-responded".to_string(), 1),
        ])
    );
}
