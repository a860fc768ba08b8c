use modeldb::seed::SeedOutcome;
use modeldb::{hash, is_same_hashed, Database, DatabaseConfig, DiagnosticSink, Lookup, QueryOptions, SortOrder};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};

fn write_models(dir: &Path) {
    let post = json!({
        "model": {
            "title": "String",
            "owner": "ObjectId",
            "tags": ["String"],
            "published": "Boolean",
            "views": "Number"
        },
        "schema": {
            "virtuals": {
                "author": { "ref": "accountuser", "localField": "owner", "foreignField": "id", "justOne": true },
                "comments": { "ref": "comment", "localField": "id", "foreignField": "post" }
            }
        }
    });
    let comment = json!({ "model": { "post": "ObjectId", "body": "String" } });
    let event = json!({
        "model": {
            "name": "String",
            "meta": { "city": "String", "seats": "Number" },
            "due": "Date",
            "rank": "Number"
        }
    });
    std::fs::write(dir.join("post.json"), post.to_string()).unwrap();
    std::fs::write(dir.join("comment.json"), comment.to_string()).unwrap();
    std::fs::write(dir.join("event.json"), event.to_string()).unwrap();
}

struct Fixture {
    db: Database,
    messages: Arc<Mutex<Vec<String>>>,
    _dir: tempfile::TempDir,
}

async fn connect() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    write_models(dir.path());
    let config = DatabaseConfig {
        user_data_model_path: Some(dir.path().to_path_buf()),
        ..DatabaseConfig::memory()
    };
    let messages = Arc::new(Mutex::new(Vec::new()));
    let seen = messages.clone();
    let sink = DiagnosticSink::new(move |m| seen.lock().unwrap().push(m.to_string()));
    let db = Database::connect_with_sink(config, sink).await.unwrap();
    Fixture {
        db,
        messages,
        _dir: dir,
    }
}

fn id_of(record: &Value) -> Value {
    record.get("id").cloned().unwrap()
}

#[tokio::test]
async fn test_models_and_metadata() {
    let f = connect().await;
    assert_eq!(f.db.model_names(), ["accountotp", "accountuser", "comment", "event", "post"]);
    assert_eq!(
        f.db.fields("accountuser").unwrap(),
        ["id", "username", "password"]
    );
    let virtuals = f.db.virtuals("post").unwrap();
    assert!(virtuals["author"].just_one);
    assert_eq!(virtuals["comments"].ref_model, "comment");
    assert!(f.db.dbo("nope").is_none());

    let ids: Vec<&str> = f.db.tests().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["1", "2", "3"]);
    assert!(f.db.tests().iter().all(|t| t.model == "accountuser"));
}

#[tokio::test]
async fn test_account_user_scenario() {
    let f = connect().await;
    let users = f.db.dbo("accountuser").unwrap();

    // seeded on connect, password stored as a digest
    assert_eq!(users.count(&json!({})).await, 1);
    let admin = users
        .find_one(&json!({ "username": "superuser" }), None)
        .await
        .found()
        .unwrap();
    let stored = admin["password"].as_str().unwrap();
    assert_ne!(stored, "superpassword");
    assert_eq!(stored, hash("superpassword"));
    assert!(is_same_hashed("superpassword", stored));

    let ann = users
        .insert(&json!({ "username": "ann", "password": "secret" }))
        .await
        .unwrap();
    assert_eq!(ann["username"], "ann");
    assert!(is_same_hashed("secret", ann["password"].as_str().unwrap()));
    assert!(ann["createdAt"].is_string());
    assert_eq!(ann["createdAt"], ann["updatedAt"]);

    let by_id = users.find_by_id(&id_of(&ann), None).await;
    assert_eq!(by_id.found().unwrap()["username"], "ann");

    assert_eq!(users.find_one(&json!({ "username": "nobody" }), None).await, Lookup::NotFound);
    assert_eq!(users.find_by_id(&json!(9999), None).await, Lookup::NotFound);

    assert_eq!(users.delete(&json!({ "username": "ann" })).await, 1);
    assert_eq!(users.count(&json!({})).await, 1);
}

#[tokio::test]
async fn test_seeding_happens_once() {
    let f = connect().await;
    assert!(matches!(
        f.db.ensure_default_account().await,
        Some(SeedOutcome::Created(_))
    ));
    let users = f.db.dbo("accountuser").unwrap();
    assert_eq!(users.count(&json!({ "username": "superuser" })).await, 1);
}

#[tokio::test]
async fn test_seeding_skips_existing_account() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        database_file: Some(dir.path().join("data").join("app.db")),
        ..DatabaseConfig::default()
    };
    let first = Database::connect(config.clone()).await.unwrap();
    first.disconnect().await;

    let second = Database::connect(config.clone()).await.unwrap();
    assert_eq!(
        second.ensure_default_account().await,
        Some(SeedOutcome::AlreadyPresent)
    );
    assert_eq!(second.dbo("accountuser").unwrap().count(&json!({})).await, 1);

    second.drop_database().await.unwrap();
    assert!(!dir.path().join("data").join("app.db").exists());
}

#[tokio::test]
async fn test_unconditioned_writes_are_refused() {
    let f = connect().await;
    let users = f.db.dbo("accountuser").unwrap();
    let before = users.count(&json!({})).await;

    assert_eq!(users.delete(&json!({})).await, 0);
    assert_eq!(users.delete(&Value::Null).await, 0);
    assert_eq!(users.update(&json!({}), &json!({ "username": "x" })).await, 0);
    assert_eq!(users.update_one(&Value::Null, &json!({ "username": "x" })).await, 0);
    assert_eq!(users.upsert(&json!({}), &json!({ "username": "x" })).await, None);

    assert_eq!(users.count(&json!({})).await, before);
    assert!(users
        .find_one(&json!({ "username": "superuser" }), None)
        .await
        .is_found());
    let messages = f.messages.lock().unwrap();
    assert_eq!(messages.len(), 5);
    assert!(messages[0].starts_with("accountuser.delete failed"));
    assert!(messages.iter().all(|m| m.contains("non-empty condition")));
}

#[tokio::test]
async fn test_vacuous_filters_are_refused() {
    let f = connect().await;
    let users = f.db.dbo("accountuser").unwrap();
    for name in ["ann", "bob", "cid"] {
        users
            .insert(&json!({ "username": name, "password": "pw" }))
            .await
            .unwrap();
    }
    assert_eq!(users.count(&json!({})).await, 4);

    let vacuous = [
        json!({ "$or": [{}] }),
        json!({ "$or": [{ "username": "ann" }, {}] }),
        json!({ "$not": { "$or": [] } }),
        json!({ "username": { "$nin": [] } }),
        json!({ "username": { "$not": { "$in": [] } } }),
    ];
    for filter in &vacuous {
        assert_eq!(users.delete(filter).await, 0);
        assert_eq!(users.update(filter, &json!({ "username": "z" })).await, 0);
        assert_eq!(users.update_one(filter, &json!({ "username": "z" })).await, 0);
        assert_eq!(users.upsert(filter, &json!({ "username": "z" })).await, None);
    }
    assert_eq!(users.count(&json!({})).await, 4);
    assert_eq!(users.count(&json!({ "username": "z" })).await, 0);
    assert_eq!(f.messages.lock().unwrap().len(), vacuous.len() * 4);

    // reads still treat them as "everything"
    assert_eq!(users.count(&json!({ "$or": [{}] })).await, 4);
    assert_eq!(users.count(&json!({ "username": { "$nin": [] } })).await, 4);

    // a filter that can match nothing is not vacuous
    assert_eq!(users.delete(&json!({ "username": { "$in": [] } })).await, 0);
    assert_eq!(f.messages.lock().unwrap().len(), vacuous.len() * 4);
}

#[tokio::test]
async fn test_negation_matches_null_columns() {
    let f = connect().await;
    let events = f.db.dbo("event").unwrap();
    events.insert(&json!({ "name": "open" })).await.unwrap();
    events.insert(&json!({ "name": "ranked", "rank": 5 })).await.unwrap();

    assert_eq!(events.count(&json!({ "rank": { "$ne": 5 } })).await, 1);
    assert_eq!(events.count(&json!({ "$not": { "rank": 5 } })).await, 1);
    assert_eq!(events.count(&json!({ "rank": { "$not": { "$eq": 5 } } })).await, 1);
    assert_eq!(events.count(&json!({ "rank": { "$not": { "$gt": 1 } } })).await, 1);
    let open = events
        .find_one(&json!({ "$not": { "rank": { "$gte": 5 } } }), None)
        .await
        .found()
        .unwrap();
    assert_eq!(open["name"], "open");
}

#[tokio::test]
async fn test_nested_map_and_date_round_trip() {
    let f = connect().await;
    let events = f.db.dbo("event").unwrap();
    let launch = events
        .insert(&json!({
            "name": "launch",
            "meta": { "city": "Oslo", "seats": 120 },
            "due": "2024-03-01"
        }))
        .await
        .unwrap();
    events
        .insert(&json!({
            "name": "review",
            "meta": { "city": "Rome", "seats": 8 },
            "due": "2024-05-15T09:30:00Z"
        }))
        .await
        .unwrap();

    assert_eq!(launch["meta"], json!({ "city": "Oslo", "seats": 120 }));
    assert_eq!(launch["due"], "2024-03-01T00:00:00.000Z");

    let names = |rows: Vec<Value>| rows.iter().map(|r| r["name"].as_str().unwrap().to_string()).collect::<Vec<_>>();

    let oslo = events.find(&json!({ "meta.city": "Oslo" }), None).await.unwrap();
    assert_eq!(names(oslo), ["launch"]);
    let small = events.find(&json!({ "meta.seats": { "$lt": 50 } }), None).await.unwrap();
    assert_eq!(names(small), ["review"]);
    let elsewhere = events
        .find(&json!({ "meta.city": { "$nin": ["Oslo"] } }), None)
        .await
        .unwrap();
    assert_eq!(names(elsewhere), ["review"]);

    let later = events
        .find(&json!({ "due": { "$gte": "2024-04-01" } }), None)
        .await
        .unwrap();
    assert_eq!(names(later), ["review"]);
    let exact = events
        .find_one(&json!({ "due": "2024-03-01T00:00:00Z" }), None)
        .await
        .found()
        .unwrap();
    assert_eq!(exact["name"], "launch");
    assert_eq!(exact["meta"]["seats"], json!(120));

    assert_eq!(events.update(&json!({ "meta.city": "Rome" }), &json!({ "due": "2024-06-01" })).await, 1);
    assert_eq!(events.count(&json!({ "due": { "$gt": "2024-05-31" } })).await, 1);
}

#[tokio::test]
async fn test_incompatible_operators_fail_with_sentinels() {
    let f = connect().await;
    let users = f.db.dbo("accountuser").unwrap();

    assert_eq!(
        users.find_one(&json!({ "$where": "this.a == 1" }), None).await,
        Lookup::Failed
    );
    assert_eq!(users.count(&json!({ "username": { "$exists": true } })).await, -1);
    assert_eq!(users.find(&json!({ "tags.$": "a" }), None).await, None);
    assert_eq!(users.delete(&json!({ "username": { "$size": 1 } })).await, -1);
    assert_eq!(users.find(&json!({ "ghost": 1 }), None).await, None);

    let messages = f.messages.lock().unwrap();
    assert_eq!(messages.len(), 5);
    assert!(messages[0].contains("not compatible with SQL: $where"));
    assert!(messages[1].contains("$exists"));
    assert!(messages[3].contains("$size"));
    assert!(messages[4].contains("ghost"));
}

async fn seed_posts(db: &Database) -> Value {
    let users = db.dbo("accountuser").unwrap();
    let posts = db.dbo("post").unwrap();
    let owner = users
        .insert(&json!({ "username": "writer", "password": "pw" }))
        .await
        .unwrap();
    for (title, views, published) in [("alpha", 10, true), ("beta", 30, false), ("gamma", 20, false)] {
        posts
            .insert(&json!({
                "title": title,
                "owner": id_of(&owner),
                "tags": ["rust", title],
                "published": published,
                "views": views
            }))
            .await
            .unwrap();
    }
    owner
}

#[tokio::test]
async fn test_find_filters_and_options() {
    let f = connect().await;
    seed_posts(&f.db).await;
    let posts = f.db.dbo("post").unwrap();

    let all = posts.find(&json!({}), None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0]["tags"], json!(["rust", "alpha"]));
    assert_eq!(all[0]["published"], json!(true));
    assert_eq!(all[1]["published"], json!(false));

    let titles = |rows: &[Value]| rows.iter().map(|r| r["title"].as_str().unwrap().to_string()).collect::<Vec<_>>();

    let hot = posts.find(&json!({ "views": { "$gte": 20 } }), None).await.unwrap();
    assert_eq!(titles(&hot), ["beta", "gamma"]);

    let either = posts
        .find(&json!({ "$or": [{ "title": "alpha" }, { "views": { "$lt": 25, "$gt": 15 } }] }), None)
        .await
        .unwrap();
    assert_eq!(titles(&either), ["alpha", "gamma"]);

    let listed = posts
        .find(&json!({ "title": { "$in": ["beta", "gamma", "zeta"] } }), None)
        .await
        .unwrap();
    assert_eq!(titles(&listed), ["beta", "gamma"]);

    let pattern = posts
        .find(&json!({ "title": { "$regex": "^A", "$options": "i" } }), None)
        .await
        .unwrap();
    assert_eq!(titles(&pattern), ["alpha"]);

    let unpublished = posts.find(&json!({ "published": false }), None).await.unwrap();
    assert_eq!(unpublished.len(), 2);

    let options = QueryOptions::new()
        .sort_by("views", SortOrder::Desc)
        .skip(1)
        .limit(1)
        .select(["title"]);
    let page = posts.find(&json!({}), Some(&options)).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["title"], "gamma");
    let keys: Vec<&String> = page[0].as_object().unwrap().keys().collect();
    assert_eq!(keys, ["id", "title"]);

    let none = posts.find(&json!({ "title": "zeta" }), None).await.unwrap();
    assert!(none.is_empty());
    assert_eq!(posts.count(&json!({ "published": false })).await, 2);
}

#[tokio::test]
async fn test_populate_is_opt_in() {
    let f = connect().await;
    let owner = seed_posts(&f.db).await;
    let posts = f.db.dbo("post").unwrap();
    let comments = f.db.dbo("comment").unwrap();

    let alpha = posts
        .find_one(&json!({ "title": "alpha" }), None)
        .await
        .found()
        .unwrap();
    assert!(alpha.get("author").is_none());
    assert!(alpha.get("comments").is_none());

    for body in ["first", "second"] {
        comments
            .insert(&json!({ "post": id_of(&alpha), "body": body }))
            .await
            .unwrap();
    }

    let options = QueryOptions::new().populate("author").populate("comments");
    let full = posts
        .find_one(&json!({ "title": "alpha" }), Some(&options))
        .await
        .found()
        .unwrap();
    assert_eq!(full["author"]["username"], "writer");
    assert_eq!(full["author"]["id"], id_of(&owner));
    let bodies: Vec<&str> = full["comments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["body"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, ["first", "second"]);

    let beta = posts
        .find_one(&json!({ "title": "beta" }), Some(&options))
        .await
        .found()
        .unwrap();
    assert_eq!(beta["comments"], json!([]));

    let bad = QueryOptions::new().populate("editor");
    assert_eq!(posts.find(&json!({}), Some(&bad)).await, None);
    assert!(f.messages.lock().unwrap()[0].contains("unknown populate 'editor'"));
}

#[tokio::test]
async fn test_update_update_one_and_upsert() {
    let f = connect().await;
    seed_posts(&f.db).await;
    let posts = f.db.dbo("post").unwrap();

    assert_eq!(posts.update(&json!({ "published": false }), &json!({ "views": 1 })).await, 2);
    assert_eq!(posts.count(&json!({ "views": 1 })).await, 2);

    assert_eq!(
        posts
            .update_one(&json!({ "published": false }), &json!({ "published": true }))
            .await,
        1
    );
    assert_eq!(posts.count(&json!({ "published": true })).await, 2);
    assert_eq!(posts.update(&json!({ "title": "zeta" }), &json!({ "views": 5 })).await, 0);

    let created = posts
        .upsert(&json!({ "title": "delta" }), &json!({ "views": 7 }))
        .await
        .unwrap();
    assert_eq!(created["title"], "delta");
    assert_eq!(created["views"], json!(7));

    let updated = posts
        .upsert(&json!({ "title": "delta" }), &json!({ "views": 8 }))
        .await
        .unwrap();
    assert_eq!(updated["id"], created["id"]);
    assert_eq!(updated["views"], json!(8));
    assert_eq!(updated["createdAt"], created["createdAt"]);
    assert_eq!(posts.count(&json!({ "title": "delta" })).await, 1);
}

#[tokio::test]
async fn test_password_hashed_on_update_and_upsert() {
    let f = connect().await;
    let users = f.db.dbo("accountuser").unwrap();
    users
        .insert(&json!({ "username": "bob", "password": "one" }))
        .await
        .unwrap();

    assert_eq!(users.update(&json!({ "username": "bob" }), &json!({ "password": "two" })).await, 1);
    let bob = users
        .find_one(&json!({ "username": "bob" }), None)
        .await
        .found()
        .unwrap();
    assert!(is_same_hashed("two", bob["password"].as_str().unwrap()));

    let carol = users
        .upsert(&json!({ "username": "carol" }), &json!({ "password": "three" }))
        .await
        .unwrap();
    assert_eq!(carol["username"], "carol");
    assert!(is_same_hashed("three", carol["password"].as_str().unwrap()));
}
