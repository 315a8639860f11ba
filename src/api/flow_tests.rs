//! Router tests against a real Postgres database. Each test gets a fresh
//! database with `migrations/` applied.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceExt;

use crate::api::create_app;
use crate::config::test_config;
use crate::InnerState;

const PASSWORD: &str = "Passw0rd!";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_app(pool: PgPool) -> Router {
    create_app(InnerState {
        db: pool,
        config: Arc::new(test_config()),
        aws: None,
        http_client: reqwest::Client::new(),
    })
    .expect("router should build")
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    cookies: &str,
    body: Option<Value>,
) -> Response {
    let mut request = Request::builder().method(method).uri(uri);
    if !cookies.is_empty() {
        request = request.header(header::COOKIE, cookies);
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    app.clone().oneshot(request).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// `name=value` pairs of every `Set-Cookie` header, joined for a `Cookie` header.
fn cookie_header(response: &Response) -> String {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

async fn sign_up(app: &Router, email: &str) -> Response {
    let body = json!({ "email": email, "name": "Tester", "password": PASSWORD });
    send(app, Method::POST, "/auth/sign-up", "", Some(body)).await
}

/// Signs a new user up and in, returning the session cookies.
async fn signed_in(app: &Router, email: &str) -> String {
    assert_eq!(sign_up(app, email).await.status(), StatusCode::CREATED);

    let body = json!({ "email": email, "password": PASSWORD });
    let response = send(app, Method::POST, "/auth/sign-in", "", Some(body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    cookie_header(&response)
}

async fn create(app: &Router, cookies: &str, uri: &str, body: Value) -> Value {
    let response = send(app, Method::POST, uri, cookies, Some(body)).await;
    assert_eq!(response.status(), StatusCode::CREATED, "POST {}", uri);
    body_json(response).await
}

fn uuid_of(value: &Value) -> String {
    value["uuid"].as_str().expect("uuid in response").to_string()
}

fn names(list: &Value) -> Vec<String> {
    list.as_array()
        .expect("array")
        .iter()
        .map(|item| item["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Emails are compared after normalization, so a second sign-up with a
/// differently cased address conflicts.
#[sqlx::test]
async fn duplicate_sign_up_is_a_conflict(pool: PgPool) {
    let app = test_app(pool);
    assert_eq!(sign_up(&app, "ada@example.com").await.status(), StatusCode::CREATED);

    let response = sign_up(&app, "ADA@Example.com").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["message"], "User with email 'ada@example.com' already exists");
}

#[sqlx::test]
async fn wrong_password_is_unauthorized(pool: PgPool) {
    let app = test_app(pool);
    sign_up(&app, "ada@example.com").await;

    let body = json!({ "email": "ada@example.com", "password": "Wr0ng!pass" });
    let response = send(&app, Method::POST, "/auth/sign-in", "", Some(body)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

/// Sign-out drops the stored refresh hash, so the old refresh cookie stops
/// working even though its JWT has not expired.
#[sqlx::test]
async fn refresh_stops_working_after_sign_out(pool: PgPool) {
    let app = test_app(pool);
    let cookies = signed_in(&app, "ada@example.com").await;

    let response = send(&app, Method::POST, "/auth/refresh", &cookies, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(cookie_header(&response).starts_with("Authentication="));

    let response = send(&app, Method::POST, "/auth/sign-out", &cookies, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, Method::POST, "/auth/refresh", &cookies, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test]
async fn me_returns_the_sanitized_user(pool: PgPool) {
    let app = test_app(pool);
    let cookies = signed_in(&app, "ada@example.com").await;

    let response = send(&app, Method::GET, "/auth/me", &cookies, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["email"], "ada@example.com");
    assert!(body.get("password").is_none());
    assert!(body.get("refreshToken").is_none());
}

/// No session cookie may leave the server when the refresh hash cannot be stored.
#[sqlx::test]
async fn failed_refresh_hash_write_sets_no_cookies(pool: PgPool) {
    let app = test_app(pool.clone());
    assert_eq!(sign_up(&app, "ada@example.com").await.status(), StatusCode::CREATED);

    sqlx::query(
        r#"
        CREATE FUNCTION reject_user_updates() RETURNS trigger AS $$
        BEGIN
            RAISE EXCEPTION 'users are read-only';
        END
        $$ LANGUAGE plpgsql
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "CREATE TRIGGER users_read_only BEFORE UPDATE ON users FOR EACH ROW EXECUTE FUNCTION reject_user_updates()",
    )
    .execute(&pool)
    .await
    .unwrap();

    let body = json!({ "email": "ada@example.com", "password": PASSWORD });
    let response = send(&app, Method::POST, "/auth/sign-in", "", Some(body)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn videos_of_another_user_are_not_found(pool: PgPool) {
    let app = test_app(pool);
    let ada = signed_in(&app, "ada@example.com").await;
    let bob = signed_in(&app, "bob@example.com").await;

    let video = create(
        &app,
        &ada,
        "/videos",
        json!({ "name": "Intro", "platform": "YOUTUBE", "externalId": "abc" }),
    )
    .await;
    let uri = format!("/videos/{}", uuid_of(&video));

    assert_eq!(send(&app, Method::GET, &uri, &bob, None).await.status(), StatusCode::NOT_FOUND);
    let patch = json!({ "name": "Mine now" });
    assert_eq!(
        send(&app, Method::PATCH, &uri, &bob, Some(patch)).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(send(&app, Method::DELETE, &uri, &bob, None).await.status(), StatusCode::NOT_FOUND);

    let bobs = body_json(send(&app, Method::GET, "/videos", &bob, None).await).await;
    assert!(bobs.as_array().unwrap().is_empty());

    let response = send(&app, Method::GET, &uri, &ada, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["name"], "Intro");
}

/// A related uuid owned by someone else fails the whole request and leaves
/// no row behind.
#[sqlx::test]
async fn foreign_related_uuids_are_rejected_without_writing(pool: PgPool) {
    let app = test_app(pool.clone());
    let ada = signed_in(&app, "ada@example.com").await;
    let bob = signed_in(&app, "bob@example.com").await;

    let bobs_group = create(&app, &bob, "/video-groups", json!({ "name": "Bob's" })).await;
    let bobs_video = create(
        &app,
        &bob,
        "/videos",
        json!({ "name": "Bob's clip", "platform": "VIMEO", "externalId": "1" }),
    )
    .await;

    let body = json!({
        "name": "Intro",
        "platform": "YOUTUBE",
        "externalId": "abc",
        "videoGroupUuids": [uuid_of(&bobs_group)],
    });
    let response = send(&app, Method::POST, "/videos", &ada, Some(body)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json!({ "name": "Mix", "videoUuids": [uuid_of(&bobs_video)] });
    let response = send(&app, Method::POST, "/video-groups", &ada, Some(body)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert_eq!(count(&pool, "videos").await, 1);
    assert_eq!(count(&pool, "video_groups").await, 1);
    assert_eq!(count(&pool, "video_groups_videos").await, 0);
}

/// Patching a video keeps its groups when `videoGroupUuids` is absent,
/// replaces them when given, and clears them on an empty list.
#[sqlx::test]
async fn patch_replaces_group_links_only_when_given(pool: PgPool) {
    let app = test_app(pool);
    let ada = signed_in(&app, "ada@example.com").await;

    let first = create(&app, &ada, "/video-groups", json!({ "name": "First" })).await;
    let second = create(&app, &ada, "/video-groups", json!({ "name": "Second" })).await;
    let video = create(
        &app,
        &ada,
        "/videos",
        json!({
            "name": "Intro",
            "platform": "TWITCH",
            "externalId": "abc",
            "videoGroupUuids": [uuid_of(&first)],
        }),
    )
    .await;
    assert_eq!(names(&video["videoGroups"]), vec!["First"]);
    let uri = format!("/videos/{}", uuid_of(&video));

    let patched = body_json(
        send(&app, Method::PATCH, &uri, &ada, Some(json!({ "name": "Renamed" }))).await,
    )
    .await;
    assert_eq!(patched["name"], "Renamed");
    assert_eq!(names(&patched["videoGroups"]), vec!["First"]);

    let patched = body_json(
        send(
            &app,
            Method::PATCH,
            &uri,
            &ada,
            Some(json!({ "videoGroupUuids": [uuid_of(&second)] })),
        )
        .await,
    )
    .await;
    assert_eq!(names(&patched["videoGroups"]), vec!["Second"]);

    let patched = body_json(
        send(&app, Method::PATCH, &uri, &ada, Some(json!({ "videoGroupUuids": [] }))).await,
    )
    .await;
    assert!(patched["videoGroups"].as_array().unwrap().is_empty());
}

#[sqlx::test]
async fn group_description_can_be_cleared(pool: PgPool) {
    let app = test_app(pool);
    let ada = signed_in(&app, "ada@example.com").await;

    let group = create(
        &app,
        &ada,
        "/video-groups",
        json!({ "name": "Mix", "description": "Late night" }),
    )
    .await;
    let uri = format!("/video-groups/{}", uuid_of(&group));

    let renamed =
        body_json(send(&app, Method::PATCH, &uri, &ada, Some(json!({ "name": "Set" }))).await)
            .await;
    assert_eq!(renamed["description"], "Late night");

    let cleared = body_json(
        send(&app, Method::PATCH, &uri, &ada, Some(json!({ "description": null }))).await,
    )
    .await;
    assert!(cleared["description"].is_null());
    assert_eq!(cleared["name"], "Set");
}

/// Delete removes the join rows and then the video, and answers with the
/// video as it was.
#[sqlx::test]
async fn deleting_a_video_drops_its_group_links(pool: PgPool) {
    let app = test_app(pool.clone());
    let ada = signed_in(&app, "ada@example.com").await;

    let group = create(&app, &ada, "/video-groups", json!({ "name": "Mix" })).await;
    let video = create(
        &app,
        &ada,
        "/videos",
        json!({
            "name": "Intro",
            "platform": "YOUTUBE",
            "externalId": "abc",
            "videoGroupUuids": [uuid_of(&group)],
        }),
    )
    .await;
    assert_eq!(count(&pool, "video_groups_videos").await, 1);

    let uri = format!("/videos/{}", uuid_of(&video));
    let response = send(&app, Method::DELETE, &uri, &ada, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let deleted = body_json(response).await;
    assert_eq!(names(&deleted["videoGroups"]), vec!["Mix"]);

    assert_eq!(count(&pool, "video_groups_videos").await, 0);
    assert_eq!(send(&app, Method::GET, &uri, &ada, None).await.status(), StatusCode::NOT_FOUND);

    let group_uri = format!("/video-groups/{}", uuid_of(&group));
    let group = body_json(send(&app, Method::GET, &group_uri, &ada, None).await).await;
    assert!(group["videos"].as_array().unwrap().is_empty());
}

#[sqlx::test]
async fn deleting_a_group_keeps_its_videos(pool: PgPool) {
    let app = test_app(pool.clone());
    let ada = signed_in(&app, "ada@example.com").await;

    let video = create(
        &app,
        &ada,
        "/videos",
        json!({ "name": "Intro", "platform": "YOUTUBE", "externalId": "abc" }),
    )
    .await;
    let group = create(
        &app,
        &ada,
        "/video-groups",
        json!({ "name": "Mix", "videoUuids": [uuid_of(&video)] }),
    )
    .await;
    assert_eq!(names(&group["videos"]), vec!["Intro"]);

    let uri = format!("/video-groups/{}", uuid_of(&group));
    assert_eq!(send(&app, Method::DELETE, &uri, &ada, None).await.status(), StatusCode::OK);

    assert_eq!(count(&pool, "video_groups_videos").await, 0);
    assert_eq!(count(&pool, "videos").await, 1);
}

// ---------------------------------------------------------------------------
// Box profiles
// ---------------------------------------------------------------------------

/// Videos created under one box are invisible to the user scope, to the
/// owner's other boxes and to other users.
#[sqlx::test]
async fn box_scoped_videos_stay_inside_their_box(pool: PgPool) {
    let app = test_app(pool);
    let ada = signed_in(&app, "ada@example.com").await;
    let bob = signed_in(&app, "bob@example.com").await;

    let living_room = create(&app, &ada, "/box-profiles", json!({ "name": "Living room" })).await;
    let kitchen = create(&app, &ada, "/box-profiles", json!({ "name": "Kitchen" })).await;
    let living_room = uuid_of(&living_room);
    let kitchen = uuid_of(&kitchen);

    let video = create(
        &app,
        &ada,
        &format!("/opx/{}/videos", living_room),
        json!({ "name": "Cartoon", "platform": "YOUTUBE", "externalId": "xyz" }),
    )
    .await;
    let video = uuid_of(&video);

    let listed =
        body_json(send(&app, Method::GET, &format!("/opx/{}/videos", living_room), &ada, None).await)
            .await;
    assert_eq!(names(&listed), vec!["Cartoon"]);

    let user_scope = body_json(send(&app, Method::GET, "/videos", &ada, None).await).await;
    assert!(user_scope.as_array().unwrap().is_empty());

    let other_box = format!("/opx/{}/videos/{}", kitchen, video);
    assert_eq!(
        send(&app, Method::GET, &other_box, &ada, None).await.status(),
        StatusCode::NOT_FOUND
    );

    let bobs_view = format!("/opx/{}/videos", living_room);
    assert_eq!(
        send(&app, Method::GET, &bobs_view, &bob, None).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[sqlx::test]
async fn box_profile_is_public_by_url_code(pool: PgPool) {
    let app = test_app(pool);
    let ada = signed_in(&app, "ada@example.com").await;

    let box_profile = create(&app, &ada, "/box-profiles", json!({ "name": "Living room" })).await;
    let url_code = box_profile["urlCode"].as_str().unwrap().to_string();
    assert_eq!(url_code.len(), 10);

    let response = send(&app, Method::GET, &format!("/box-profiles/code/{}", url_code), "", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["name"], "Living room");
    assert!(body["videos"].as_array().unwrap().is_empty());

    let response = send(&app, Method::GET, "/box-profiles/code/missing000", "", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
