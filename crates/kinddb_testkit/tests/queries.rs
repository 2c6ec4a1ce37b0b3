//! Query execution and pagination against the emulated backend.

use kinddb_core::{CoreError, Cursor, Direction, Entity, Key, Operator, Query, Value};
use kinddb_testkit::prelude::*;
use proptest::prelude::*;

fn ages(people: &[Person]) -> Vec<i64> {
    people.iter().map(|p| p.age).collect()
}

fn by_age() -> Query {
    Query::new(Person::kind()).order_by("age", Direction::Ascending)
}

#[test]
fn run_yields_every_record_across_batches() {
    init_tracing();
    let harness = Harness::remote();
    harness.seed_people(25).unwrap();
    let session = harness.session();

    let mut results = session.run(&by_age().with_batch_size(7)).unwrap();
    let mut seen = Vec::new();
    for entry in results.by_ref() {
        let person: Person = entry.unwrap().into_entity().unwrap();
        seen.push(person.age);
    }

    assert_eq!(seen, (1..=25).collect::<Vec<_>>());
    assert_eq!(results.batches_fetched(), 4);
    assert_eq!(harness.store().calls().run_query, 4);
    assert!(results.next().is_none());
}

#[test]
fn run_is_lazy() {
    let harness = Harness::remote();
    harness.seed_people(5).unwrap();
    let session = harness.session();

    let mut results = session.run(&by_age().with_batch_size(2)).unwrap();
    assert_eq!(harness.store().calls().run_query, 0);
    results.next().unwrap().unwrap();
    assert_eq!(harness.store().calls().run_query, 1);
}

#[test]
fn capped_backend_batches_are_followed() {
    let harness = Harness::remote();
    harness.seed_people(25).unwrap();
    harness.store().set_max_batch(Some(4));
    let session = harness.session();

    let people: Vec<Person> = session.fetch(&by_age().with_batch_size(10)).unwrap();
    assert_eq!(ages(&people), (1..=25).collect::<Vec<_>>());
}

#[test]
fn offset_applies_once_and_limit_caps_the_total() {
    let harness = Harness::remote();
    harness.seed_people(30).unwrap();
    let session = harness.session();

    let query = by_age().with_offset(5).with_limit(10).with_batch_size(3);
    let people: Vec<Person> = session.fetch(&query).unwrap();
    assert_eq!(ages(&people), (6..=15).collect::<Vec<_>>());
}

#[test]
fn filters_are_conjunctive_and_orders_respected() {
    let harness = Harness::remote();
    harness.seed_people(20).unwrap();
    let session = harness.session();

    let query = session
        .query::<Person>()
        .filter("age", Operator::Ge, 10i64)
        .and_filter("age", Operator::Lt, 15i64)
        .order_by("age", Direction::Descending);
    let people: Vec<Person> = session.fetch(&query).unwrap();
    assert_eq!(ages(&people), vec![14, 13, 12, 11, 10]);

    let named = session
        .query::<Person>()
        .filter("name", Operator::Eq, "person-007");
    let people: Vec<Person> = session.fetch(&named).unwrap();
    assert_eq!(ages(&people), vec![7]);
}

#[test]
fn inequality_must_lead_the_sort_order() {
    let harness = Harness::remote();
    harness.seed_people(3).unwrap();
    let session = harness.session();

    let query = session
        .query::<Person>()
        .filter("age", Operator::Gt, 1i64)
        .order_by("name", Direction::Ascending);
    let err = session.run(&query).unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument { .. }));
    assert_eq!(harness.store().calls().run_query, 0);
}

#[test]
fn unindexed_properties_never_match() {
    let harness = Harness::remote();
    let session = harness.session();
    let mut person = Person::new("ada", 36);
    person.bio = "mathematician".to_string();
    session.put(&mut person).unwrap();

    let query = session
        .query::<Person>()
        .filter("bio", Operator::Eq, "mathematician");
    assert!(session.fetch::<Person>(&query).unwrap().is_empty());
}

#[test]
fn keys_only_and_projection_modes() {
    let harness = Harness::remote();
    let keys = harness.seed_people(4).unwrap();
    let session = harness.session();

    let fetched = by_age().fetch_keys(session.adapter()).unwrap();
    assert_eq!(fetched, keys);

    let entries = by_age().select(["name"]).fetch(session.adapter()).unwrap();
    assert_eq!(entries.len(), 4);
    for entry in &entries {
        let record = entry.record().unwrap();
        assert!(record.contains("name"));
        assert!(!record.contains("age"));
    }
    assert!(entries[0].clone().into_entity::<Person>().is_err());
}

#[test]
fn get_returns_the_first_match_or_none() {
    let harness = Harness::remote();
    harness.seed_people(3).unwrap();
    let session = harness.session();

    let first = by_age().get(session.adapter()).unwrap().unwrap();
    let person: Person = first.into_entity().unwrap();
    assert_eq!(person.age, 1);

    let none = by_age()
        .filter("age", Operator::Gt, 99i64)
        .get(session.adapter())
        .unwrap();
    assert!(none.is_none());
}

#[test]
fn ancestor_queries_stay_inside_the_group() {
    let harness = Harness::remote();
    let session = harness.session();
    let acme = Key::new("Organization", 1);
    let globex = Key::new("Organization", 2);
    for (org, name) in [(&acme, "a1"), (&acme, "a2"), (&globex, "g1")] {
        session.put(&mut Person::under(org, name, 30).unwrap()).unwrap();
    }

    let query = session.query::<Person>().with_ancestor(acme.clone());
    let people: Vec<Person> = session.fetch(&query).unwrap();
    let mut names: Vec<_> = people.iter().map(|p| p.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["a1", "a2"]);
    assert!(people.iter().all(|p| p.key.as_ref().unwrap().has_ancestor(&acme)));
}

#[test]
fn key_valued_properties_are_filterable() {
    let harness = Harness::remote();
    let session = harness.session();
    let adapter = session.adapter();
    let team = Key::new("Team", "red");
    let record = kinddb_core::Record::new()
        .with_indexed("team", team.clone())
        .with_indexed("name", "ada");
    adapter
        .put(
            vec![kinddb_core::PutRequest::new(Key::partial("Member"), record)],
            &kinddb_core::WriteOptions::default(),
        )
        .unwrap();

    let found = Query::new("Member")
        .filter("team", Operator::Eq, team)
        .fetch(adapter)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(
        found[0].record().and_then(|r| r.get("name")),
        Some(&Value::from("ada"))
    );
}

#[test]
fn pages_follow_cursors_until_exhausted() {
    let harness = Harness::cached();
    harness.seed_people(10).unwrap();
    let session = harness.session();

    let mut pages = session.paginate(&by_age(), 4, None).unwrap();
    let first = pages.fetch_next_page().unwrap();
    assert_eq!(first.len(), 4);
    assert!(first.has_more());
    let second = pages.fetch_next_page().unwrap();
    let third = pages.fetch_next_page().unwrap();
    assert_eq!(third.len(), 2);
    assert!(!third.has_more());
    assert!(!pages.has_more());
    assert!(matches!(
        pages.fetch_next_page(),
        Err(CoreError::InvalidOperation { .. })
    ));

    let keys: Vec<Key> = [first, second, third].iter().flat_map(|p| p.keys()).collect();
    assert_eq!(keys.len(), 10);
}

#[test]
fn cursor_survives_a_round_trip_through_a_client() {
    let harness = Harness::remote();
    harness.seed_people(9).unwrap();
    let session = harness.session();

    let first = session.fetch_page(&by_age(), 5, None).unwrap();
    let token = first.cursor().unwrap().to_urlsafe();

    // A later request rebuilds the query and resumes from the token.
    let resumed = Cursor::from_urlsafe(&token).unwrap();
    let second = harness.session().fetch_page(&by_age(), 5, Some(&resumed)).unwrap();
    let people: Vec<Person> = second
        .into_entries()
        .into_iter()
        .map(|e| e.into_entity().unwrap())
        .collect();
    assert_eq!(ages(&people), vec![6, 7, 8, 9]);

    let again = session.fetch_page(&by_age(), 5, Some(&resumed)).unwrap();
    assert_eq!(again.len(), 4);
}

#[test]
fn cursor_from_a_different_query_is_rejected() {
    let harness = Harness::remote();
    harness.seed_people(6).unwrap();
    let session = harness.session();

    let page = session.fetch_page(&by_age(), 2, None).unwrap();
    let other = by_age().filter("age", Operator::Ge, 2i64);
    let err = session.fetch_page(&other, 2, page.cursor()).unwrap_err();
    assert!(matches!(err, CoreError::InvalidArgument { .. }));
}

#[test]
fn failed_page_fetch_can_be_retried() {
    let harness = Harness::remote();
    harness.seed_people(6).unwrap();
    let session = harness.session();

    let mut pages = session.paginate(&by_age(), 3, None).unwrap();
    let first = pages.fetch_next_page().unwrap();
    let cursor = pages.cursor().cloned();

    harness.store().set_unavailable(Some("maintenance"));
    let err = pages.fetch_next_page().unwrap_err();
    assert!(matches!(err, CoreError::Unavailable { .. }));
    assert_eq!(pages.cursor().cloned(), cursor);

    harness.store().set_unavailable(None);
    let second = pages.fetch_next_page().unwrap();
    let mut keys = first.keys();
    keys.extend(second.keys());
    assert_eq!(keys.len(), 6);
}

#[test]
fn namespaces_partition_queries() {
    let harness = Harness::remote();
    let session = harness.session();
    {
        let _ns = kinddb_core::namespace::scoped("tenant-a");
        session.put(&mut Person::new("in-a", 1)).unwrap();
    }
    session.put(&mut Person::new("default", 2)).unwrap();

    let tenant: Vec<Person> = session
        .fetch(&by_age().with_namespace(Some("tenant-a".to_string())))
        .unwrap();
    assert_eq!(tenant.len(), 1);
    assert_eq!(tenant[0].name, "in-a");
    assert_eq!(
        tenant[0].key.as_ref().unwrap().namespace(),
        Some("tenant-a")
    );

    let default: Vec<Person> = session.fetch(&by_age()).unwrap();
    assert_eq!(default.len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn pagination_reproduces_run(count in 0usize..40, batch in 1usize..9, page_size in 1usize..9) {
        let harness = Harness::remote();
        let seeded = harness.seed_people(count).unwrap();
        let session = harness.session();
        let query = by_age().with_batch_size(batch);

        let mut results = session.run(&query).unwrap();
        let ran: Vec<Key> = results.by_ref().map(|e| e.unwrap().key().clone()).collect();
        prop_assert_eq!(&ran, &seeded);
        prop_assert_eq!(results.batches_fetched(), count.div_ceil(batch).max(1));

        let mut paged = Vec::new();
        for page in session.paginate(&query, page_size, None).unwrap() {
            let page = page.unwrap();
            prop_assert!(page.len() <= page_size);
            paged.extend(page.keys());
        }
        prop_assert_eq!(paged, ran);
    }
}
