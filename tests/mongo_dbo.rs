//! Runs only when `MODELDB_TEST_MONGO_URL` points at a server, e.g.
//! `mongodb://localhost:27017`. Each test works in its own throwaway database, so the
//! URL should not name one.

use modeldb::{is_same_hashed, Database, DatabaseConfig, Engine, Lookup, QueryOptions};
use serde_json::json;

async fn connect() -> Option<Database> {
    let url = std::env::var("MODELDB_TEST_MONGO_URL").ok()?;
    let dir = tempfile::tempdir().unwrap();
    let post = json!({
        "model": { "title": "String", "owner": "ObjectId", "views": "Number" },
        "schema": {
            "virtuals": {
                "author": { "ref": "accountuser", "localField": "owner", "foreignField": "_id", "justOne": true }
            }
        }
    });
    std::fs::write(dir.path().join("post.json"), post.to_string()).unwrap();

    let mut config = DatabaseConfig {
        engine: Engine::Mongodb,
        connection_string: Some(url),
        user_data_model_path: Some(dir.path().to_path_buf()),
        ..DatabaseConfig::default()
    };
    config.connection_options.database_name =
        Some(format!("modeldb_test_{}", bson::oid::ObjectId::new().to_hex()));
    Some(Database::connect(config).await.unwrap())
}

#[tokio::test]
async fn test_account_user_on_mongo() {
    let Some(db) = connect().await else {
        return;
    };
    let users = db.dbo("accountuser").unwrap();
    assert_eq!(users.count(&json!({})).await, 1);

    let ann = users
        .insert(&json!({ "username": "ann", "password": "secret" }))
        .await
        .unwrap();
    assert_eq!(ann["id"], ann["_id"]);
    assert!(is_same_hashed("secret", ann["password"].as_str().unwrap()));

    let found = users.find_by_id(&ann["_id"], None).await.found().unwrap();
    assert_eq!(found["username"], "ann");
    assert_eq!(users.find_one(&json!({ "username": "nobody" }), None).await, Lookup::NotFound);

    assert_eq!(users.delete(&json!({})).await, 0);
    assert_eq!(users.count(&json!({})).await, 2);
    assert_eq!(users.delete(&json!({ "username": "ann" })).await, 1);

    db.drop_database().await.unwrap();
}

#[tokio::test]
async fn test_writes_and_populate_on_mongo() {
    let Some(db) = connect().await else {
        return;
    };
    let users = db.dbo("accountuser").unwrap();
    let posts = db.dbo("post").unwrap();
    let owner = users
        .insert(&json!({ "username": "writer", "password": "pw" }))
        .await
        .unwrap();
    for (title, views) in [("alpha", 10), ("beta", 30)] {
        posts
            .insert(&json!({ "title": title, "owner": owner["_id"], "views": views }))
            .await
            .unwrap();
    }

    let plain = posts.find_one(&json!({ "title": "alpha" }), None).await.found().unwrap();
    assert!(plain.get("author").is_none());

    let options = QueryOptions::new().populate("author");
    let full = posts
        .find_one(&json!({ "title": "alpha" }), Some(&options))
        .await
        .found()
        .unwrap();
    assert_eq!(full["author"]["username"], "writer");

    assert_eq!(posts.update(&json!({ "views": { "$gt": 5 } }), &json!({ "views": 1 })).await, 2);
    assert_eq!(posts.update_one(&json!({ "views": 1 }), &json!({ "views": 2 })).await, 1);

    let created = posts
        .upsert(&json!({ "title": "gamma" }), &json!({ "views": 3 }))
        .await
        .unwrap();
    let again = posts
        .upsert(&json!({ "title": "gamma" }), &json!({ "views": 4 }))
        .await
        .unwrap();
    assert_eq!(created["_id"], again["_id"]);
    assert_eq!(again["views"], json!(4));
    assert_eq!(posts.count(&json!({})).await, 3);

    db.drop_database().await.unwrap();
}
