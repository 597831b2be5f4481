mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn admin_creates_and_lists_modules() -> Result<()> {
    let server = common::spawn_server().await?;
    let (admin, user) = common::admin_and_user(&server).await?;

    let module = common::create_module(&server, &admin, common::salary_definition()).await?;
    let id = module["id"].as_str().unwrap_or_default().to_string();
    assert!(!id.is_empty());
    assert_eq!(module["fields"].as_array().map(Vec::len), Some(4));

    // Regular users may read module definitions
    let list = server
        .client
        .get(server.url("/api/modules"))
        .bearer_auth(&user)
        .send()
        .await?
        .json::<Value>()
        .await?;
    let modules = list["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0]["name"], "工资管理");

    let res = server
        .client
        .get(server.url(&format!("/api/modules/{}", id)))
        .bearer_auth(&user)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.json::<Value>().await?["data"]["fields"][3]["formula"], "[S1]+[S2]");
    Ok(())
}

#[tokio::test]
async fn regular_users_cannot_define_modules() -> Result<()> {
    let server = common::spawn_server().await?;
    let (admin, user) = common::admin_and_user(&server).await?;

    let res = server
        .client
        .post(server.url("/api/modules"))
        .bearer_auth(&user)
        .json(&common::salary_definition())
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(res.json::<Value>().await?["code"], "FORBIDDEN");

    let module = common::create_module(&server, &admin, common::salary_definition()).await?;
    let res = server
        .client
        .put(server.url(&format!("/api/modules/{}", module["id"].as_str().unwrap_or_default())))
        .bearer_auth(&user)
        .json(&json!({"name": "renamed", "fields": []}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn invalid_definitions_report_field_errors() -> Result<()> {
    let server = common::spawn_server().await?;
    let admin = common::register(&server, "admin").await?;

    let res = server
        .client
        .post(server.url("/api/modules"))
        .bearer_auth(&admin)
        .json(&json!({
            "name": "broken",
            "fields": [
                {"name": "A", "key": "a", "type": "number", "alias": "S1"},
                {"name": "B", "key": "a", "type": "number"},
                {"name": "Total", "key": "total", "type": "compute", "formula": "[S1]+[S9]"}
            ]
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let body = res.json::<Value>().await?;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["field_errors"]["fields[1].key"].is_string(), "body: {}", body);
    assert!(body["field_errors"]["fields[2].formula"].is_string(), "body: {}", body);
    Ok(())
}

#[tokio::test]
async fn cyclic_compute_fields_are_rejected() -> Result<()> {
    let server = common::spawn_server().await?;
    let admin = common::register(&server, "admin").await?;

    let res = server
        .client
        .post(server.url("/api/modules"))
        .bearer_auth(&admin)
        .json(&json!({
            "name": "loop",
            "fields": [
                {"name": "X", "key": "x", "type": "compute", "alias": "X", "formula": "[Y]+1"},
                {"name": "Y", "key": "y", "type": "compute", "alias": "Y", "formula": "[X]*2"}
            ]
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn update_replaces_fields_and_delete_removes_rows() -> Result<()> {
    let server = common::spawn_server().await?;
    let (admin, user) = common::admin_and_user(&server).await?;
    let module = common::create_module(&server, &admin, common::salary_definition()).await?;
    let id = module["id"].as_str().unwrap_or_default().to_string();

    let res = server
        .client
        .put(server.url(&format!("/api/modules/{}", id)))
        .bearer_auth(&admin)
        .json(&json!({
            "name": "薪资",
            "fields": [{"name": "员工姓名", "key": "empName", "type": "string"}]
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let updated = res.json::<Value>().await?;
    assert_eq!(updated["data"]["name"], "薪资");
    assert_eq!(updated["data"]["id"], id.as_str());

    // Deleting requires only an authenticated user
    let res = server
        .client
        .delete(server.url(&format!("/api/modules/{}", id)))
        .bearer_auth(&user)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.json::<Value>().await?["data"]["deleted"], true);

    let res = server
        .client
        .get(server.url(&format!("/api/modules/{}/rows", id)))
        .bearer_auth(&user)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn missing_module_is_not_found() -> Result<()> {
    let server = common::spawn_server().await?;
    let admin = common::register(&server, "admin").await?;

    let res = server
        .client
        .get(server.url("/api/modules/does-not-exist"))
        .bearer_auth(&admin)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.json::<Value>().await?["error"], true);
    Ok(())
}

#[tokio::test]
async fn demo_modules_are_seeded_when_enabled() -> Result<()> {
    let server = common::spawn_with(common::test_config(true)).await?;
    let admin = common::register(&server, "admin").await?;

    let list = server
        .client
        .get(server.url("/api/modules"))
        .bearer_auth(&admin)
        .send()
        .await?
        .json::<Value>()
        .await?;
    let names: Vec<String> = list["data"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|m| m["name"].as_str().map(str::to_string))
        .collect();
    assert!(names.contains(&"员工管理".to_string()), "names: {:?}", names);
    assert!(names.contains(&"工资管理".to_string()), "names: {:?}", names);
    Ok(())
}
