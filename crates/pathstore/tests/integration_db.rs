//! End-to-end tests for the `Db` facade: subscriptions, drop semantics and
//! cache hydration through `pathstore.toml` settings.

use std::sync::{Arc, Mutex, Once};

use serde_json::{Value, json};

use pathstore::{
    CacheAdapter, CacheLayout, Db, RedbBackend, SharedBackend, StoreConfig, TableCache, TableDef,
};

// ── Tracing setup ────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Controlled by `RUST_LOG` (e.g. `RUST_LOG=pathstore=debug`).
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Helpers ──────────────────────────────────────────────────────

type Log = Arc<Mutex<Vec<(&'static str, Value)>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(log: &Log, tag: &'static str) -> impl Fn(&Value) + Send + Sync + 'static {
    let log = log.clone();
    move |value| log.lock().unwrap().push((tag, value.clone()))
}

fn tags(log: &Log) -> Vec<&'static str> {
    log.lock().unwrap().iter().map(|(tag, _)| *tag).collect()
}

fn app_db() -> Db {
    let db = Db::new();
    db.init(
        vec![
            TableDef::new("users", json!({ "profile": { "name": "ada" }, "age": 36 })),
            TableDef::new("posts", json!({ "list": [] })),
        ],
        false,
    );
    db
}

fn cached_config(path: &std::path::Path, token: Option<&str>) -> StoreConfig {
    let mut config = StoreConfig::from_toml(
        r#"
        [cache]
        enabled = true

        [[tables]]
        name = "counter"
        state = { n = 0 }

        [[tables]]
        name = "prefs"
        state = { theme = "light" }
        "#,
    )
    .unwrap();
    config.cache.path = Some(path.to_path_buf());
    config.cache.token = token.map(str::to_string);
    config
}

// ── Reads and writes ─────────────────────────────────────────────

#[test]
fn path_round_trip_and_missing_paths() {
    init_tracing();
    let db = app_db();

    assert!(db.update("users.profile.email", |_| json!("ada@example.com")).write());
    assert_eq!(db.get_value("users.profile.email"), Some(json!("ada@example.com")));

    assert_eq!(db.get_value("users.profile.missing.deeper"), None);
    assert_eq!(db.get_value("nope.x"), None);
    assert!(!db.has("users.profile.missing"));
}

#[test]
fn writes_are_isolated_per_table() {
    init_tracing();
    let db = app_db();
    db.write_update("users.age", |_| json!(40));

    assert_eq!(db.get_value("posts"), Some(json!({ "list": [] })));
    assert_eq!(db.get_value("users.age"), Some(json!(40)));
}

#[test]
fn counter_end_to_end() {
    init_tracing();
    let db = Db::new();
    let counter = db.with_table(TableDef::new("counter", json!({ "n": 0 })));
    let seen = log();
    counter.add_subscriber("n", record(&seen, "n"));

    let inc = |n: Value| json!(n.as_i64().unwrap_or(0) + 1);
    counter.write_update("n", inc);
    counter.write_update("n", inc);

    assert_eq!(counter.get("n").value(), Some(json!(2)));
    let values: Vec<Value> = seen.lock().unwrap().iter().map(|(_, v)| v.clone()).collect();
    assert_eq!(values, vec![json!(1), json!(2)]);
}

#[test]
fn discarded_update_leaves_no_trace() {
    init_tracing();
    let db = app_db();
    let seen = log();
    db.add_subscriber("", record(&seen, "global"));

    db.update("users.age", |_| json!(99)).discard();
    db.update("users.age", |_| json!(99)).discard();

    assert_eq!(db.get_value("users.age"), Some(json!(36)));
    assert!(seen.lock().unwrap().is_empty());
}

// ── Subscriptions ────────────────────────────────────────────────

#[test]
fn wildcard_fires_once_with_full_base_value() {
    init_tracing();
    let db = app_db();
    let seen = log();
    db.add_subscriber("users.*", record(&seen, "deep"));

    db.write_update("users.profile.name", |_| json!("grace"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, json!({ "profile": { "name": "grace" }, "age": 36 }));
}

#[test]
fn global_fires_last_with_core_state() {
    init_tracing();
    let db = app_db();
    let seen = log();
    db.add_subscriber("", record(&seen, "global"));
    db.add_subscriber("users.profile.name", record(&seen, "exact"));
    db.add_subscriber("users.*", record(&seen, "deep"));

    db.write_update("users.profile.name", |_| json!("grace"));

    assert_eq!(tags(&seen), vec!["exact", "deep", "global"]);
    assert_eq!(seen.lock().unwrap()[2].1, db.value());
    assert_eq!(
        seen.lock().unwrap()[2].1["users"]["profile"]["name"],
        json!("grace")
    );
}

#[test]
fn removed_subscriber_stops_firing() {
    init_tracing();
    let db = app_db();
    let seen = log();
    let first = db.add_subscriber("users.age", record(&seen, "first"));
    db.add_subscriber("users.age", record(&seen, "second"));

    assert!(db.remove_subscriber("users.age", first));
    db.write_update("users.age", |_| json!(1));
    assert_eq!(tags(&seen), vec!["second"]);

    db.clear_subscribers();
    db.write_update("users.age", |_| json!(2));
    assert_eq!(tags(&seen), vec!["second"]);
}

#[test]
fn subscriber_may_write_reentrantly() {
    init_tracing();
    let db = app_db();
    let writer = db.clone();
    db.add_subscriber("users.age", move |age| {
        let next = json!(age.as_i64().unwrap_or(0) >= 18);
        writer.set("users.adult", next);
    });

    db.write_update("users.age", |_| json!(20));
    assert_eq!(db.get_value("users.adult"), Some(json!(true)));
}

#[tokio::test]
async fn async_subscriber_receives_value() {
    init_tracing();
    let db = app_db();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    db.add_async_subscriber("users.age", move |age| {
        let tx = tx.clone();
        async move {
            tx.send(age).ok();
        }
    });

    db.write_update("users.age", |_| json!(50));
    assert_eq!(rx.recv().await, Some(json!(50)));
}

// ── Drop semantics ───────────────────────────────────────────────

#[test]
fn drop_then_set_recreates_fresh_table() {
    init_tracing();
    let db = app_db();
    let seen = log();
    db.add_subscriber("users.*", record(&seen, "deep"));
    db.add_subscriber("users.age", record(&seen, "exact"));
    db.add_subscriber("posts.*", record(&seen, "posts"));

    assert!(db.drop_table(Some("users")));
    assert!(!db.has("users"));
    assert!(!db.has("users.profile.name"));
    assert!(!db.drop_table(Some("users")));

    assert!(db.set("users.profile.name", json!("new")));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(db.get_value("users"), Some(json!({ "profile": { "name": "new" } })));

    db.write_update("posts.list", |_| json!([1]));
    assert_eq!(tags(&seen), vec!["posts"]);
}

#[test]
fn drop_from_scoped_handle() {
    init_tracing();
    let db = app_db();
    let posts = db.scoped("posts");
    assert!(posts.drop_table(None));
    assert_eq!(db.tables(), vec!["users"]);
    assert!(!db.drop_table(None));
}

// ── Policy ───────────────────────────────────────────────────────

#[test]
fn falsy_values_follow_the_configured_policy() {
    init_tracing();
    let config = StoreConfig::from_toml(
        r#"
        [write]
        policy = "skip_falsy"

        [[tables]]
        name = "t"
        state = { n = 1, flag = true, s = "x" }
        "#,
    )
    .unwrap();
    let strict = Db::from_config(&config).unwrap();
    for (key, falsy) in [("t.n", json!(0)), ("t.flag", json!(false)), ("t.s", json!(""))] {
        assert!(!strict.write_update(key, |_| falsy));
    }
    assert_eq!(strict.get_value("t"), Some(json!({ "n": 1, "flag": true, "s": "x" })));

    let default = Db::from_config(&StoreConfig::from_toml("[[tables]]\nname = \"t\"").unwrap()).unwrap();
    for (key, falsy) in [("t.n", json!(0)), ("t.flag", json!(false)), ("t.s", json!(""))] {
        assert!(default.write_update(key, |_| falsy));
    }
    assert_eq!(default.get_value("t"), Some(json!({ "n": 0, "flag": false, "s": "" })));
}

// ── Cache ────────────────────────────────────────────────────────

#[test]
fn cache_round_trip_across_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.redb");

    {
        let db = Db::from_config(&cached_config(&path, None)).unwrap();
        assert!(db.cache().is_some());
        db.write_update("counter.n", |_| json!(7));
        db.set("prefs.theme", json!("dark"));
    }

    let db = Db::from_config(&cached_config(&path, None)).unwrap();
    assert_eq!(db.get_value("counter.n"), Some(json!(7)));
    assert_eq!(db.get_value("prefs.theme"), Some(json!("dark")));
}

#[test]
fn token_mismatch_discards_cached_tables() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.redb");

    {
        let db = Db::from_config(&cached_config(&path, Some("v1"))).unwrap();
        db.write_update("counter.n", |_| json!(3));
    }
    {
        let db = Db::from_config(&cached_config(&path, Some("v1"))).unwrap();
        assert_eq!(db.get_value("counter.n"), Some(json!(3)));
    }

    let db = Db::from_config(&cached_config(&path, Some("v2"))).unwrap();
    assert_eq!(db.get_value("counter.n"), Some(json!(0)));
    let record = db.cache().unwrap().record().unwrap();
    assert_eq!(record.token, "v2");
    assert_eq!(record.value["counter"], json!({ "n": 0 }));
}

#[test]
fn per_table_cache_layout() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.redb");
    let config = || {
        let mut config = cached_config(&path, None);
        config.cache.layout = CacheLayout::PerTable;
        config
    };

    {
        let db = Db::from_config(&config()).unwrap();
        db.write_update("prefs.theme", |_| json!("sepia"));
    }

    let db = Db::from_config(&config()).unwrap();
    assert_eq!(db.get_value("prefs.theme"), Some(json!("sepia")));
    assert_eq!(
        db.cache().unwrap().adapter().slots(),
        vec!["counter", "prefs"]
    );
}

#[test]
fn use_cache_table_is_hydrated_on_registration() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.redb");
    let config = StoreConfig::from_toml(&format!(
        "[cache]\npath = {:?}\n\n[[tables]]\nname = \"session\"\nuse_cache = true\nstate = {{ user = \"\" }}\n",
        path.display().to_string()
    ))
    .unwrap();

    {
        let db = Db::from_config(&config).unwrap();
        db.add_table(TableDef::new("scratch", json!({ "n": 1 })));
        db.write_update("session.user", |_| json!("ada"));
        db.write_update("scratch.n", |_| json!(2));
    }

    let db = Db::from_config(&config).unwrap();
    assert_eq!(db.get_value("session.user"), Some(json!("ada")));

    db.add_table(TableDef::new("scratch", json!({ "n": 1 })));
    assert_eq!(db.get_value("scratch.n"), Some(json!(1)));
}

#[test]
fn dropped_table_keeps_cached_snapshot() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.redb");
    let db = Db::from_config(&cached_config(&path, None)).unwrap();
    db.write_update("counter.n", |_| json!(4));

    assert!(db.drop_table(Some("counter")));
    assert_eq!(db.cache().unwrap().load_table("counter"), Some(json!({ "n": 4 })));

    db.set("counter.n", json!(1));
    assert_eq!(db.get_value("counter"), Some(json!({ "n": 1 })));
}

#[test]
fn recreated_table_loses_its_own_cache_flag() {
    init_tracing();
    let backend: SharedBackend = Arc::new(RedbBackend::open_in_memory().unwrap());
    let cache = TableCache::open(
        CacheAdapter::new(backend),
        CacheLayout::SingleRecord,
        "cache",
        None,
    );
    let db = Db::builder().cache(cache).build();
    db.add_table(TableDef::new("session", json!({ "user": "" })).with_cache(true));
    db.write_update("session.user", |_| json!("ada"));

    assert!(db.drop_table(Some("session")));
    db.set("session.user", json!("grace"));

    let cache = db.cache().unwrap();
    assert_eq!(cache.load_table("session"), Some(json!({ "user": "ada" })));

    db.add_table(TableDef::new("session", json!({ "user": "" })).with_cache(true));
    assert_eq!(db.get_value("session.user"), Some(json!("ada")));
}
