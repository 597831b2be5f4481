mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn health_endpoint_responds() -> Result<()> {
    let server = common::spawn_server().await?;

    let res = server.client.get(server.url("/health")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);

    let body = res.json::<Value>().await?;
    assert_eq!(body["data"]["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn api_root_describes_service() -> Result<()> {
    let server = common::spawn_server().await?;

    let body = server.client.get(server.url("/")).send().await?.json::<Value>().await?;
    assert!(body["success"].as_bool().unwrap_or(false), "unexpected body: {}", body);
    assert!(body["data"]["endpoints"]["modules"].is_string());
    Ok(())
}

#[tokio::test]
async fn first_registered_user_is_admin() -> Result<()> {
    let server = common::spawn_server().await?;

    let res = server
        .client
        .post(server.url("/auth/register"))
        .json(&json!({"username": "root", "password": common::PASSWORD}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let first = res.json::<Value>().await?;
    assert_eq!(first["data"]["session"]["isLoggedIn"], true);
    assert_eq!(first["data"]["session"]["user"]["role"], "admin");

    let second = server
        .client
        .post(server.url("/auth/register"))
        .json(&json!({"username": "bob", "password": common::PASSWORD}))
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(second["data"]["session"]["user"]["role"], "user");
    Ok(())
}

#[tokio::test]
async fn duplicate_username_conflicts() -> Result<()> {
    let server = common::spawn_server().await?;
    common::register(&server, "carol").await?;

    let res = server
        .client
        .post(server.url("/auth/register"))
        .json(&json!({"username": "carol", "password": common::PASSWORD}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body = res.json::<Value>().await?;
    assert_eq!(body["error"], true);
    assert_eq!(body["code"], "CONFLICT");
    Ok(())
}

#[tokio::test]
async fn register_rejects_weak_input() -> Result<()> {
    let server = common::spawn_server().await?;

    for payload in [
        json!({"username": "ab", "password": common::PASSWORD}),
        json!({"username": "dave", "password": "123"}),
    ] {
        let res = server.client.post(server.url("/auth/register")).json(&payload).send().await?;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "payload {} accepted", payload);
    }

    let res = server
        .client
        .post(server.url("/auth/register"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.json::<Value>().await?["code"], "INVALID_JSON");
    Ok(())
}

#[tokio::test]
async fn login_checks_password() -> Result<()> {
    let server = common::spawn_server().await?;
    common::register(&server, "erin").await?;

    let res = server
        .client
        .post(server.url("/auth/login"))
        .json(&json!({"username": "erin", "password": "wrong-pass"}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = server
        .client
        .post(server.url("/auth/login"))
        .json(&json!({"username": "erin", "password": common::PASSWORD}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.json::<Value>().await?;
    assert!(body["data"]["token"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(body["data"]["session"]["user"]["name"], "erin");
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_token() -> Result<()> {
    let server = common::spawn_server().await?;

    let res = server.client.get(server.url("/api/auth/whoami")).send().await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = server
        .client
        .get(server.url("/api/modules"))
        .bearer_auth("not-a-jwt")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn whoami_refresh_and_logout() -> Result<()> {
    let server = common::spawn_server().await?;
    let token = common::register(&server, "frank").await?;

    let me = server
        .client
        .get(server.url("/api/auth/whoami"))
        .bearer_auth(&token)
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(me["data"]["username"], "frank");
    assert_eq!(me["data"]["role"], "admin");

    let res = server
        .client
        .put(server.url("/api/auth/refresh"))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.json::<Value>().await?["data"]["token"].is_string());

    let out = server
        .client
        .post(server.url("/api/auth/logout"))
        .bearer_auth(&token)
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(out["data"]["isLoggedIn"], false);
    assert_eq!(out["data"]["user"]["name"], "");
    Ok(())
}

#[tokio::test]
async fn collections_are_admin_only() -> Result<()> {
    let server = common::spawn_server().await?;
    let (admin, user) = common::admin_and_user(&server).await?;

    let res = server
        .client
        .get(server.url("/api/collections"))
        .bearer_auth(&user)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let body = server
        .client
        .get(server.url("/api/collections"))
        .bearer_auth(&admin)
        .send()
        .await?
        .json::<Value>()
        .await?;
    let collections = body["data"].as_array().cloned().unwrap_or_default();
    let module_data = collections
        .iter()
        .find(|c| c["name"] == "module_data")
        .expect("module_data collection");
    // The relation field is renamed by the second module_data migration
    assert!(module_data["fields"]
        .as_array()
        .is_some_and(|fields| fields.iter().any(|f| f["name"] == "module")));
    Ok(())
}
