//! Round trips through the router against a real PostgreSQL database.
//!
//! Run with `DATABASE_URL=postgres://... JWT_SECRET=... cargo test -- --ignored`
//! against a disposable database.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tower::ServiceExt;

use collectify::db;
use collectify::models::UserModel;
use collectify::routes::build_router;
use collectify::services::auth_service::{create_admin, issue_jwt};
use collectify::services::frontend_service::EDIT_SUCCESS_REDIRECT;
use collectify::state::AppState;
use collectify::storage::LocalBackend;

const SECRET: &str = "integration-secret";
const BOUNDARY: &str = "collectify-test-boundary";

/// Tests that change admin flags on other users hold this exclusively;
/// everything else shares it.
static ADMIN_ROWS: LazyLock<RwLock<()>> = LazyLock::new(|| RwLock::new(()));

#[allow(dead_code)]
enum AdminRowsGuard {
    Shared(RwLockReadGuard<'static, ()>),
    Exclusive(RwLockWriteGuard<'static, ()>),
}

struct TestApp {
    router: Router,
    pool: PgPool,
    admin: UserModel,
    token: String,
    uploads: tempfile::TempDir,
    _guard: AdminRowsGuard,
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL must be set")
}

async fn new_admin(pool: &PgPool) -> (UserModel, String) {
    let username = unique("admin");
    let admin = create_admin(pool, &username, &format!("{}@example.com", username), "pw")
        .await
        .unwrap();
    let (token, _) = issue_jwt(&admin, SECRET, 1).unwrap();
    (admin, token)
}

async fn setup_with(pool: PgPool, guard: AdminRowsGuard) -> TestApp {
    db::run_migrations(&pool).await.unwrap();
    let (admin, token) = new_admin(&pool).await;

    let uploads = tempfile::tempdir().unwrap();
    let storage = LocalBackend::new(uploads.path()).await.unwrap();
    let state = AppState::new(pool.clone(), Arc::new(storage), SECRET.to_string(), 1);

    TestApp {
        router: build_router(state, 4 * 1024 * 1024),
        pool,
        admin,
        token,
        uploads,
        _guard: guard,
    }
}

async fn setup() -> TestApp {
    let guard = AdminRowsGuard::Shared(ADMIN_ROWS.read().await);
    let pool = db::create_pool(&database_url()).await.unwrap();
    setup_with(pool, guard).await
}

/// Like `setup`, but no other test runs alongside, so admin flags of other
/// users may be changed and restored.
async fn setup_exclusive() -> TestApp {
    let guard = AdminRowsGuard::Exclusive(ADMIN_ROWS.write().await);
    let pool = db::create_pool(&database_url()).await.unwrap();
    setup_with(pool, guard).await
}

fn multipart_request(uri: &str, token: &str, texts: &[(&str, &str)], files: &[(&str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in texts {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    for (filename, data) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"photos[]\"; filename=\"{}\"\r\n\
                 Content-Type: image/png\r\n\r\n",
                BOUNDARY, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: &str, uri: &str, token: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

impl TestApp {
    async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn json(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(json_request(method, uri, &self.token, &body)).await
    }

    async fn send(&self, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .body(Body::empty())
            .unwrap();
        self.call(request).await
    }

    async fn multipart(&self, uri: &str, texts: &[(&str, &str)], files: &[(&str, &[u8])]) -> (StatusCode, Value) {
        self.call(multipart_request(uri, &self.token, texts, files)).await
    }

    async fn create_category(&self, body: Value) -> i64 {
        let (status, category) = self.json("POST", "/api/categories", body).await;
        assert_eq!(status, StatusCode::CREATED, "{}", category);
        category["id"].as_i64().unwrap()
    }

    async fn create_item(&self, body: Value) -> Value {
        let (status, item) = self.json("POST", "/api/items", body).await;
        assert_eq!(status, StatusCode::CREATED, "{}", item);
        item
    }

    /// Clears the admin flag of every admin other than `keep` and returns
    /// their ids for `restore_admins`.
    async fn demote_other_admins(&self, keep: &[i64]) -> Vec<i64> {
        sqlx::query_scalar("UPDATE users SET is_admin = false WHERE is_admin AND NOT (id = ANY($1)) RETURNING id")
            .bind(keep)
            .fetch_all(&self.pool)
            .await
            .unwrap()
    }

    async fn restore_admins(&self, ids: &[i64]) {
        sqlx::query("UPDATE users SET is_admin = true WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    async fn admins_among(&self, ids: &[i64]) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_admin AND id = ANY($1)")
            .bind(ids)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn duplicate_category_name_is_rejected() {
    let app = setup().await;
    let name = unique("Cameras");

    let (status, created) = app.json("POST", "/api/categories", json!({ "name": name })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], name.as_str());

    let (status, body) = app.json("POST", "/api/categories", json!({ "name": name })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Category already exists");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn values_survive_schema_changes() {
    let app = setup().await;

    let (status, category) = app
        .json(
            "POST",
            "/api/categories",
            json!({
                "name": unique("Turntables"),
                "specifications_schema": {
                    "drive": {"label": "Drive", "type": "select", "options": ["belt", "direct"]},
                    "rpm": {"label": "RPM", "type": "number", "min": 33, "max": 78}
                }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(category["specifications"][0]["key"], "drive");
    assert_eq!(category["specifications"][1]["display_order"], 1);
    let category_id = category["id"].as_i64().unwrap();

    let values = json!({"drive": "direct", "rpm": 45, "notes": "mint"});
    let (status, item) = app
        .json(
            "POST",
            "/api/items",
            json!({"name": "SL-1200", "category_id": category_id, "specification_values": values}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let item_id = item["id"].as_i64().unwrap();

    let (status, fields) = app
        .json(
            "PUT",
            &format!("/api/categories/{}/specifications_schema", category_id),
            json!([{"key": "rpm", "label": "Speed", "type": "number", "display_order": 0}]),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fields.as_array().unwrap().len(), 1);

    let (_, item) = app.send("GET", &format!("/api/items/{}", item_id)).await;
    assert_eq!(item["specification_values"], values);
    let ordered = item["ordered_specifications"].as_array().unwrap();
    assert_eq!(ordered.len(), 1);
    assert_eq!(ordered[0]["label"], "Speed");
    assert_eq!(ordered[0]["value"], 45);

    let (status, _) = app.send("DELETE", &format!("/api/categories/{}", category_id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn deleting_item_removes_photos_urls_and_files() {
    let app = setup().await;

    let (_, category) = app
        .json("POST", "/api/categories", json!({ "name": unique("Lenses") }))
        .await;
    let category_id = category["id"].as_i64().unwrap().to_string();

    let (status, item) = app
        .multipart(
            "/api/items",
            &[
                ("name", "Summicron 50"),
                ("category_id", &category_id),
                ("urls", r#"[{"url": "https://example.com/manual"}]"#),
                ("urls[]", "https://example.com/review"),
            ],
            &[("front.png", &b"png-front"[..]), ("notes.txt", &b"skipped"[..])],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(item["urls"].as_array().unwrap().len(), 2);
    let photos = item["photos"].as_array().unwrap();
    assert_eq!(photos.len(), 1);

    let key = photos[0]["filename"].as_str().unwrap().to_string();
    assert!(app.uploads.path().join(&key).exists());
    assert_eq!(item["primary_photo"], key.as_str());

    let item_id = item["id"].as_i64().unwrap();
    let (status, _) = app.send("DELETE", &format!("/api/items/{}", item_id)).await;
    assert_eq!(status, StatusCode::OK);

    assert!(!app.uploads.path().join(&key).exists());
    let photo_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_photos WHERE item_id = $1")
        .bind(item_id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    let url_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_urls WHERE item_id = $1")
        .bind(item_id)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert_eq!((photo_rows, url_rows), (0, 0));

    let (status, _) = app.send("GET", &format!("/api/items/{}", item_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_item_writes_fit_in_a_small_pool() {
    let guard = AdminRowsGuard::Shared(ADMIN_ROWS.read().await);
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url())
        .await
        .unwrap();
    let app = setup_with(pool, guard).await;

    let category_id = app
        .create_category(json!({
            "name": unique("Watches"),
            "specifications_schema": [{"key": "movement", "type": "text"}]
        }))
        .await;

    let mut handles = Vec::new();
    for n in 0..16 {
        let router = app.router.clone();
        let request = json_request(
            "POST",
            "/api/items",
            &app.token,
            &json!({"name": format!("Watch {}", n), "category_id": category_id, "specification_values": {"movement": "quartz"}}),
        );
        handles.push(tokio::spawn(async move { router.oneshot(request).await.unwrap().status() }));
    }

    let mut statuses = Vec::new();
    for handle in handles {
        statuses.push(handle.await.unwrap());
    }
    assert!(statuses.iter().all(|s| *s == StatusCode::CREATED), "{:?}", statuses);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn search_matches_brand_and_description_literally() {
    let app = setup().await;
    let token = uuid::Uuid::new_v4().simple().to_string();
    let category_id = app.create_category(json!({ "name": unique("Cameras") })).await;

    let by_brand = app
        .create_item(json!({"name": "F3", "category_id": category_id, "brand": format!("{}-brand", token)}))
        .await;
    let by_description = app
        .create_item(json!({
            "name": "FM2",
            "category_id": category_id,
            "description": format!("100%_{} serviced", token)
        }))
        .await;
    // Would match `100%_<token>` if the pattern characters were not escaped.
    app.create_item(json!({"name": format!("100ab{}", token), "category_id": category_id}))
        .await;

    let (status, items) = app
        .send("GET", &format!("/api/items?search={}-BRAND", token))
        .await;
    assert_eq!(status, StatusCode::OK);
    let items = items.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], by_brand["id"]);
    assert_eq!(items[0]["brand"], format!("{}-brand", token).as_str());

    let (_, items) = app
        .send(
            "GET",
            &format!("/api/items?category_id={}&search=100%25_{}", category_id, token),
        )
        .await;
    let items = items.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], by_description["id"]);

    let (_, items) = app
        .send("GET", &format!("/api/items?category_id={}", category_id))
        .await;
    assert_eq!(items.as_array().unwrap().len(), 3);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn partial_update_keeps_absent_members() {
    let app = setup().await;
    let category_id = app.create_category(json!({ "name": unique("Pens") })).await;

    let item = app
        .create_item(json!({
            "name": "Pelikan M800",
            "category_id": category_id,
            "specification_values": {"nib": "F"},
            "urls": ["https://example.com/a", {"url": "https://example.com/b"}]
        }))
        .await;
    let uri = format!("/api/items/{}", item["id"]);
    assert_eq!(item["urls"].as_array().unwrap().len(), 2);

    let (status, updated) = app.json("PUT", &uri, json!({"name": "Pelikan M805"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "Pelikan M805");
    assert_eq!(updated["category_id"], category_id);
    assert_eq!(updated["specification_values"], json!({"nib": "F"}));
    assert_eq!(updated["urls"].as_array().unwrap().len(), 2);

    let (status, updated) = app
        .json("PUT", &uri, json!({"urls": ["https://example.com/c"]}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let urls = updated["urls"].as_array().unwrap();
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0]["url"], "https://example.com/c");
    assert_eq!(updated["name"], "Pelikan M805");

    let (status, body) = app.json("PUT", &uri, json!({"name": "  "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Name is required");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn edit_form_round_trip() {
    let app = setup().await;
    let category_id = app
        .create_category(json!({
            "name": unique("Records"),
            "specifications_schema": {
                "rpm": {"label": "RPM", "type": "number"},
                "artist": {"label": "Artist", "type": "text"}
            }
        }))
        .await;
    let item = app
        .create_item(json!({
            "name": "Kind of Blue",
            "category_id": category_id,
            "specification_values": {"artist": "Miles Davis", "pressing": "1959"},
            "urls": ["https://example.com/old"]
        }))
        .await;
    let item_id = item["id"].as_i64().unwrap();
    let edit_uri = format!("/item/{}/edit", item_id);
    let category = category_id.to_string();

    let response = app
        .router
        .clone()
        .oneshot(multipart_request(
            &edit_uri,
            &app.token,
            &[
                ("name", "Kind of Blue (mono)"),
                ("category_id", &category),
                ("spec.rpm", "33"),
                ("spec.artist", "Miles Davis"),
                ("brand", "Columbia"),
                ("urls[]", "https://example.com/new"),
            ],
            &[],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers().get(header::LOCATION).unwrap(), EDIT_SUCCESS_REDIRECT);

    let (_, item) = app.send("GET", &format!("/api/items/{}", item_id)).await;
    assert_eq!(item["name"], "Kind of Blue (mono)");
    assert_eq!(item["specification_values"]["rpm"], 33);
    assert_eq!(item["specification_values"]["pressing"], "1959");
    assert_eq!(item["brand"], "Columbia");
    let urls = item["urls"].as_array().unwrap();
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0]["url"], "https://example.com/new");

    for (texts, expected) in [
        (vec![("name", ""), ("category_id", category.as_str())], "Name is required"),
        (
            vec![
                ("name", "Kind of Blue"),
                ("category_id", category.as_str()),
                ("specification_values", "{not json"),
            ],
            "not valid JSON",
        ),
    ] {
        let response = app
            .router
            .clone()
            .oneshot(multipart_request(&edit_uri, &app.token, &texts, &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let html = read_text(response).await;
        assert!(html.contains("<form"), "{}", html);
        assert!(html.contains(expected), "{}", html);
    }

    let (_, item) = app.send("GET", &format!("/api/items/{}", item_id)).await;
    assert_eq!(item["name"], "Kind of Blue (mono)");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn init_admin_refused_once_an_admin_exists() {
    let app = setup().await;
    let username = unique("late");
    let (status, body) = app
        .json(
            "POST",
            "/api/init-admin",
            json!({"username": username, "email": format!("{}@example.com", username), "password": "pw"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Admin user already exists");

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE username = $1)")
        .bind(&username)
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert!(!exists);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn last_admin_is_kept() {
    let app = setup_exclusive().await;
    let demoted = app.demote_other_admins(&[app.admin.id]).await;

    let (status, body) = app
        .json(
            "PUT",
            &format!("/api/auth/users/{}", app.admin.id),
            json!({"is_admin": false}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot remove the last admin user");

    // Two admins removing each other at the same time leave one behind.
    let (other, other_token) = new_admin(&app.pool).await;
    let pair = [app.admin.id, other.id];
    let deletes = [
        json_request("DELETE", &format!("/api/auth/users/{}", other.id), &app.token, &Value::Null),
        json_request("DELETE", &format!("/api/auth/users/{}", app.admin.id), &other_token, &Value::Null),
    ];
    let handles: Vec<_> = deletes
        .into_iter()
        .map(|request| {
            let router = app.router.clone();
            tokio::spawn(async move { router.oneshot(request).await.unwrap().status() })
        })
        .collect();
    for handle in handles {
        let status = handle.await.unwrap();
        assert!(status != StatusCode::INTERNAL_SERVER_ERROR, "{}", status);
    }
    assert_eq!(app.admins_among(&pair).await, 1);

    // Same for two demotions issued by the surviving admin.
    let survivor: UserModel = sqlx::query_as(
        "SELECT id, username, email, password_hash, is_admin, created_at FROM users \
         WHERE is_admin AND id = ANY($1)",
    )
    .bind(&pair[..])
    .fetch_one(&app.pool)
    .await
    .unwrap();
    let (survivor_token, _) = issue_jwt(&survivor, SECRET, 1).unwrap();
    let (third, _) = new_admin(&app.pool).await;
    let handles: Vec<_> = [survivor.id, third.id]
        .into_iter()
        .map(|id| {
            let router = app.router.clone();
            let request = json_request(
                "PUT",
                &format!("/api/auth/users/{}", id),
                &survivor_token,
                &json!({"is_admin": false}),
            );
            tokio::spawn(async move { router.oneshot(request).await.unwrap().status() })
        })
        .collect();
    let mut statuses = Vec::new();
    for handle in handles {
        statuses.push(handle.await.unwrap());
    }
    // The loser is refused as the last admin, or as no longer being one.
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1, "{:?}", statuses);
    let expected = [StatusCode::OK, StatusCode::BAD_REQUEST, StatusCode::FORBIDDEN];
    assert!(statuses.iter().all(|s| expected.contains(s)), "{:?}", statuses);
    assert_eq!(app.admins_among(&[survivor.id, third.id]).await, 1);

    app.restore_admins(&demoted).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn migrate_specs_builds_fields_from_legacy_column() {
    let app = setup().await;
    let legacy = r#"{"format": {"label": "Format", "type": "select", "options": ["LP", "EP"]}, "year": {"type": "number", "min": 1900}}"#;
    let category_id: i64 = sqlx::query_scalar(
        "INSERT INTO categories (name, specifications_schema) VALUES ($1, $2) RETURNING id",
    )
    .bind(unique("Legacy records"))
    .bind(legacy)
    .fetch_one(&app.pool)
    .await
    .unwrap();

    let report = db::categories::migrate_legacy_schemas(&app.pool).await.unwrap();
    assert!(report.migrated >= 1);

    let fields = db::categories::load_fields(&app.pool, category_id).await.unwrap();
    let keys: Vec<&str> = fields.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(keys, vec!["format", "year"]);
    assert_eq!(fields[0].label, "Format");

    // Already migrated categories are left alone.
    db::categories::migrate_legacy_schemas(&app.pool).await.unwrap();
    assert_eq!(db::categories::load_fields(&app.pool, category_id).await.unwrap().len(), 2);

    let (_, schema) = app
        .send("GET", &format!("/api/categories/{}/specifications_schema", category_id))
        .await;
    assert_eq!(schema[1]["key"], "year");
}
