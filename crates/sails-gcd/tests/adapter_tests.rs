//! Adapter behaviour against the in-memory Datastore

use std::collections::BTreeMap;
use std::sync::Arc;

use rstest::{fixture, rstest};

use sails_google_cloud_datastore::{
    AttributeDefinition, BackendError, Criteria, DatastoreAdapter, DatastoreConfig, Error, Key,
    KeyId, MemoryClientFactory, MemoryDatastore, ModelDescriptor, Record, SortDirection,
    StageThreeQuery, Value, WaterlineAdapter, ADAPTER_IDENTITY, init_tracing,
};

const DATASTORE: &str = "default";
const PROJECT: &str = "test-project";

struct Harness {
    adapter: DatastoreAdapter,
    store: Arc<MemoryDatastore>,
}

fn attribute() -> AttributeDefinition {
    AttributeDefinition::default()
}

fn user_model() -> ModelDescriptor {
    let mut definition = BTreeMap::new();
    definition.insert(
        "id".to_string(),
        AttributeDefinition {
            required: true,
            ..attribute()
        },
    );
    definition.insert("name".to_string(), attribute());
    definition.insert(
        "email".to_string(),
        AttributeDefinition {
            unique: true,
            column_name: Some("email_address".to_string()),
            ..attribute()
        },
    );
    definition.insert(
        "role".to_string(),
        AttributeDefinition {
            defaults_to: Some(Value::from("member")),
            ..attribute()
        },
    );
    definition.insert("age".to_string(), attribute());

    ModelDescriptor {
        identity: "user".to_string(),
        primary_key: "id".to_string(),
        definition,
        table_name: "users".to_string(),
    }
}

fn record(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn user(id: &str, name: &str, age: i64) -> Record {
    record(&[
        ("id", Value::from(id)),
        ("name", Value::from(name)),
        ("email_address", Value::from(format!("{id}@example.com"))),
        ("age", Value::from(age)),
    ])
}

#[fixture]
async fn harness() -> Harness {
    init_tracing("warn");
    let factory = Arc::new(MemoryClientFactory::new());
    let store = factory.store(PROJECT);
    let adapter = DatastoreAdapter::new(factory);
    adapter
        .register_datastore(DatastoreConfig::new(DATASTORE, PROJECT), vec![user_model()])
        .await
        .unwrap();
    Harness { adapter, store }
}

async fn seed(h: &Harness, users: Vec<Record>) {
    h.adapter
        .create_each(DATASTORE, &StageThreeQuery::new("users").with_new_records(users))
        .await
        .unwrap();
}

fn find_where(attribute: &str, value: impl Into<Value>) -> StageThreeQuery {
    StageThreeQuery::new("users").with_criteria(Criteria::all().where_eq(attribute, value))
}

// Lifecycle

#[test]
fn test_adapter_info() {
    let info = DatastoreAdapter::info();
    assert_eq!(info.identity, ADAPTER_IDENTITY);
    assert_eq!(info.adapter_api_version, 1);
    assert!(!info.schema);
}

#[rstest]
#[tokio::test]
async fn test_duplicate_registration_keeps_first(#[future] harness: Harness) {
    let h = harness.await;

    let err = h
        .adapter
        .register_datastore(DatastoreConfig::new(DATASTORE, "other-project"), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConsistencyViolation(_)));
    assert!(err.to_string().contains("already registered"));

    let entry = h.adapter.registry().datastore(DATASTORE).unwrap();
    assert_eq!(entry.config.project_id.as_deref(), Some(PROJECT));
}

#[tokio::test]
async fn test_register_requires_identity_and_project() {
    let adapter = DatastoreAdapter::new(Arc::new(MemoryClientFactory::new()));

    let mut config = DatastoreConfig::new("x", PROJECT);
    config.identity = None;
    let err = adapter.register_datastore(config, vec![]).await.unwrap_err();
    assert!(matches!(err, Error::ConsistencyViolation(_)));

    let mut config = DatastoreConfig::new("x", PROJECT);
    config.project_id = None;
    let err = adapter.register_datastore(config, vec![]).await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(!adapter.registry().contains_datastore("x"));
}

#[rstest]
#[tokio::test]
async fn test_teardown_is_idempotent(#[future] harness: Harness) {
    let h = harness.await;

    h.adapter.teardown(DATASTORE).await.unwrap();
    h.adapter.teardown(DATASTORE).await.unwrap();
    h.adapter.teardown("never-registered").await.unwrap();

    let err = h
        .adapter
        .find(DATASTORE, &StageThreeQuery::new("users"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConsistencyViolation(_)));

    // The identity can be registered again after teardown
    h.adapter
        .register_datastore(DatastoreConfig::new(DATASTORE, PROJECT), vec![user_model()])
        .await
        .unwrap();
}

// Create

#[rstest]
#[tokio::test]
async fn test_create_fetch_round_trips(#[future] harness: Harness) {
    let h = harness.await;

    let created = h
        .adapter
        .create(
            DATASTORE,
            &StageThreeQuery::new("users")
                .with_new_record(user("u1", "Ada", 36))
                .fetch(true),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(created.get("id"), Some(&Value::from("u1")));
    assert_eq!(created.get("role"), Some(&Value::from("member")));
    assert_eq!(created.get("email"), Some(&Value::from("u1@example.com")));

    let found = h.adapter.find(DATASTORE, &find_where("id", "u1")).await.unwrap();
    assert_eq!(found, vec![created]);

    // The primary key lives in the key, not in the properties
    let stored = h.store.get(&Key::new("users", KeyId::Name("u1".into()))).unwrap();
    assert!(!stored.properties.contains_key("id"));
}

#[rstest]
#[tokio::test]
async fn test_create_without_fetch_returns_nothing(#[future] harness: Harness) {
    let h = harness.await;

    let result = h
        .adapter
        .create(DATASTORE, &StageThreeQuery::new("users").with_new_record(user("u1", "Ada", 36)))
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(h.store.count("users"), 1);
}

#[rstest]
#[case::primary_key("id")]
#[case::unique("email_address")]
#[tokio::test]
async fn test_create_missing_mandatory_makes_no_store_calls(
    #[future] harness: Harness,
    #[case] dropped: &str,
) {
    let h = harness.await;
    let mut values = user("u1", "Ada", 36);
    values.remove(dropped);

    let err = h
        .adapter
        .create(DATASTORE, &StageThreeQuery::new("users").with_new_record(values))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert!(err.to_string().contains("Missing value for property"));
    assert_eq!(h.store.stats().total_calls(), 0);
}

#[rstest]
#[tokio::test]
async fn test_create_each_is_all_or_nothing(#[future] harness: Harness) {
    let h = harness.await;
    let mut invalid = user("u3", "Eve", 20);
    invalid.remove("id");

    let err = h
        .adapter
        .create_each(
            DATASTORE,
            &StageThreeQuery::new("users")
                .with_new_records(vec![user("u1", "Ada", 36), user("u2", "Bob", 41), invalid]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(h.store.count("users"), 0);
    assert_eq!(h.store.stats().total_calls(), 0);
}

#[rstest]
#[tokio::test]
async fn test_create_each_commit_failure_persists_nothing(#[future] harness: Harness) {
    let h = harness.await;
    h.store
        .fail_next_commit(BackendError::new("contention").with_status(409).with_code("ABORTED"));

    let err = h
        .adapter
        .create_each(
            DATASTORE,
            &StageThreeQuery::new("users")
                .with_new_records(vec![user("u1", "Ada", 36), user("u2", "Bob", 41)]),
        )
        .await
        .unwrap_err();

    match err {
        Error::Backend(backend) => {
            assert_eq!(backend.status, Some(409));
            assert_eq!(backend.code.as_deref(), Some("ABORTED"));
        }
        other => panic!("expected backend error, got {other:?}"),
    }
    assert_eq!(h.store.count("users"), 0);
}

#[rstest]
#[tokio::test]
async fn test_create_each_fetch_returns_every_record(#[future] harness: Harness) {
    let h = harness.await;

    let created = h
        .adapter
        .create_each(
            DATASTORE,
            &StageThreeQuery::new("users")
                .with_new_records(vec![user("u1", "Ada", 36), user("u2", "Bob", 41)])
                .fetch(true),
        )
        .await
        .unwrap()
        .unwrap();

    let ids: Vec<_> = created.iter().map(|r| r.get("id").cloned()).collect();
    assert_eq!(ids, vec![Some(Value::from("u1")), Some(Value::from("u2"))]);
    assert_eq!(h.store.stats().begins, 1);
    assert_eq!(h.store.stats().commits, 1);
}

// Find

#[rstest]
#[tokio::test]
async fn test_find_with_select_projects_attributes(#[future] harness: Harness) {
    let h = harness.await;
    seed(&h, vec![user("u1", "Ada", 36)]).await;

    let found = h
        .adapter
        .find(
            DATASTORE,
            &StageThreeQuery::new("users").with_criteria(Criteria::all().select(["name"])),
        )
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    let keys: Vec<_> = found[0].keys().cloned().collect();
    assert_eq!(keys, vec!["id".to_string(), "name".to_string()]);
}

#[rstest]
#[tokio::test]
async fn test_find_select_by_column_name(#[future] harness: Harness) {
    let h = harness.await;
    seed(&h, vec![user("u1", "Ada", 36)]).await;

    let by_column = StageThreeQuery::new("users")
        .with_criteria(Criteria::all().where_eq("email_address", "u1@example.com").select(["email_address"]));
    let found = h.adapter.find(DATASTORE, &by_column).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("email"), Some(&Value::from("u1@example.com")));
    assert_eq!(found[0].get("id"), Some(&Value::from("u1")));
    assert_eq!(found[0].len(), 2);
}

#[rstest]
#[tokio::test]
async fn test_find_with_skip_is_rejected_before_query(#[future] harness: Harness) {
    let h = harness.await;

    let err = h
        .adapter
        .find(DATASTORE, &StageThreeQuery::new("users").with_criteria(Criteria::all().skip(5)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotImplemented(_)));
    assert_eq!(h.store.stats().queries, 0);
}

#[rstest]
#[tokio::test]
async fn test_find_clamps_limit(#[future] harness: Harness) {
    let h = harness.await;

    h.adapter
        .find(
            DATASTORE,
            &StageThreeQuery::new("users").with_criteria(Criteria::all().limit(999_999_999_999)),
        )
        .await
        .unwrap();

    assert_eq!(h.store.last_query().unwrap().limit, Some(2_147_483_647));
}

#[rstest]
#[tokio::test]
async fn test_find_filters_sorts_and_limits(#[future] harness: Harness) {
    let h = harness.await;
    let mut carol = user("u3", "Carol", 29);
    carol.insert("role".into(), Value::from("admin"));
    seed(&h, vec![user("u1", "Ada", 36), user("u2", "Bob", 41), carol]).await;

    let members = h
        .adapter
        .find(
            DATASTORE,
            &StageThreeQuery::new("users").with_criteria(
                Criteria::all()
                    .where_eq("role", "member")
                    .sort("age", SortDirection::Desc)
                    .limit(1),
            ),
        )
        .await
        .unwrap();

    assert_eq!(members.len(), 1);
    assert_eq!(members[0].get("name"), Some(&Value::from("Bob")));
}

#[rstest]
#[tokio::test]
async fn test_find_by_column_name(#[future] harness: Harness) {
    let h = harness.await;
    seed(&h, vec![user("u1", "Ada", 36), user("u2", "Bob", 41)]).await;

    let found = h
        .adapter
        .find(DATASTORE, &find_where("email_address", "u2@example.com"))
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("id"), Some(&Value::from("u2")));
}

#[rstest]
#[tokio::test]
async fn test_find_rejects_modifiers_and_or(#[future] harness: Harness) {
    let h = harness.await;

    let mut gt = Record::new();
    gt.insert(">".into(), Value::from(30));
    let err = h.adapter.find(DATASTORE, &find_where("age", Value::Object(gt))).await.unwrap_err();
    assert!(matches!(err, Error::NotImplemented(_)));

    let or = Value::Array(vec![Value::Object(record(&[("name", Value::from("Ada"))]))]);
    let err = h.adapter.find(DATASTORE, &find_where("or", or)).await.unwrap_err();
    assert!(matches!(err, Error::NotImplemented(_)));

    assert_eq!(h.store.stats().queries, 0);
}

#[rstest]
#[tokio::test]
async fn test_find_skips_empty_result_slots(#[future] harness: Harness) {
    let h = harness.await;
    seed(&h, vec![user("u1", "Ada", 36), user("u2", "Bob", 41)]).await;
    h.store.set_sparse_results(true);

    let found = h.adapter.find(DATASTORE, &StageThreeQuery::new("users")).await.unwrap();
    assert_eq!(found.len(), 2);
}

#[rstest]
#[tokio::test]
async fn test_find_unknown_collection(#[future] harness: Harness) {
    let h = harness.await;

    let err = h.adapter.find(DATASTORE, &StageThreeQuery::new("pets")).await.unwrap_err();
    assert!(matches!(err, Error::ConsistencyViolation(_)));
}

#[rstest]
#[tokio::test]
async fn test_count(#[future] harness: Harness) {
    let h = harness.await;
    seed(&h, vec![user("u1", "Ada", 36), user("u2", "Bob", 41), user("u3", "Carol", 36)]).await;

    let total = h.adapter.count(DATASTORE, &StageThreeQuery::new("users")).await.unwrap();
    assert_eq!(total, 3);

    let aged = h.adapter.count(DATASTORE, &find_where("age", 36)).await.unwrap();
    assert_eq!(aged, 2);
}

// Update

#[rstest]
#[tokio::test]
async fn test_update_merges_matched_entities(#[future] harness: Harness) {
    let h = harness.await;
    seed(&h, vec![user("u1", "Ada", 36), user("u2", "Bob", 41)]).await;

    let values = record(&[
        ("id", Value::from("u1")),
        ("name", Value::from("Ada Lovelace")),
        ("nickname", Value::from("ignored")),
    ]);
    let updated = h
        .adapter
        .update(DATASTORE, &find_where("id", "u1").fetch(true), &values)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].get("name"), Some(&Value::from("Ada Lovelace")));
    assert_eq!(updated[0].get("age"), Some(&Value::from(36)));
    assert!(!updated[0].contains_key("nickname"));

    let bob = h.adapter.find(DATASTORE, &find_where("id", "u2")).await.unwrap();
    assert_eq!(bob[0].get("name"), Some(&Value::from("Bob")));
}

#[rstest]
#[tokio::test]
async fn test_update_requires_primary_key(#[future] harness: Harness) {
    let h = harness.await;

    let err = h
        .adapter
        .update(
            DATASTORE,
            &find_where("name", "Ada"),
            &record(&[("name", Value::from("Ada Lovelace"))]),
        )
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Validation error: Missing or null value for property `id`.");
    assert_eq!(h.store.stats().total_calls(), 0);
}

#[rstest]
#[tokio::test]
async fn test_update_rolls_back_when_lookup_fails(#[future] harness: Harness) {
    let h = harness.await;
    h.store.fail_next_query(BackendError::new("unavailable").with_status(503));

    let err = h
        .adapter
        .update(DATASTORE, &find_where("id", "u1"), &record(&[("id", Value::from("u1"))]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Backend(_)));
    assert_eq!(h.store.stats().rollbacks, 1);
    assert_eq!(h.store.open_transactions(), 0);
}

// Destroy

#[rstest]
#[tokio::test]
async fn test_destroy_removes_only_matches(#[future] harness: Harness) {
    let h = harness.await;
    seed(&h, vec![user("u1", "Ada", 36), user("u2", "Bob", 41), user("u3", "Carol", 36)]).await;

    let destroyed = h.adapter.destroy(DATASTORE, &find_where("age", 36)).await.unwrap();
    assert!(destroyed.is_none());

    assert!(h.adapter.find(DATASTORE, &find_where("age", 36)).await.unwrap().is_empty());
    let rest = h.adapter.find(DATASTORE, &StageThreeQuery::new("users")).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].get("id"), Some(&Value::from("u2")));
}

#[rstest]
#[tokio::test]
async fn test_destroy_fetch_returns_records(#[future] harness: Harness) {
    let h = harness.await;
    seed(&h, vec![user("u1", "Ada", 36)]).await;

    let destroyed = h
        .adapter
        .destroy(DATASTORE, &find_where("id", "u1").fetch(true))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(destroyed.len(), 1);
    assert_eq!(destroyed[0].get("name"), Some(&Value::from("Ada")));
    assert_eq!(h.store.count("users"), 0);
}

#[rstest]
#[tokio::test]
async fn test_destroy_without_matches_skips_delete(#[future] harness: Harness) {
    let h = harness.await;
    seed(&h, vec![user("u1", "Ada", 36)]).await;
    let commits = h.store.stats().commits;

    h.adapter.destroy(DATASTORE, &find_where("id", "nobody")).await.unwrap();

    assert_eq!(h.store.stats().commits, commits);
    assert_eq!(h.store.count("users"), 1);
}

// DDL and sequences

#[rstest]
#[tokio::test]
async fn test_ddl_is_noop(#[future] harness: Harness) {
    let h = harness.await;

    h.adapter.define(DATASTORE, "users", &Record::new()).await.unwrap();
    h.adapter.drop(DATASTORE, "users").await.unwrap();
    h.adapter.drop("unknown", "users").await.unwrap();
    assert_eq!(h.store.stats().total_calls(), 0);
}

#[rstest]
#[tokio::test]
async fn test_set_sequence(#[future] harness: Harness) {
    let h = harness.await;

    h.adapter.set_sequence(DATASTORE, "users_id_seq", Value::from(42)).await.unwrap();
    h.adapter.set_sequence("unknown", "users_id_seq", Value::from(1)).await.unwrap();

    let entry = h.adapter.registry().datastore(DATASTORE).unwrap();
    assert_eq!(entry.sequence("users_id_seq"), Some(Value::from(42)));
}
