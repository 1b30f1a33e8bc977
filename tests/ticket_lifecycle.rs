mod common;

use anyhow::{anyhow, Result};
use axum::http::StatusCode;
use common::{json_body, seed_catalog, Catalog, TestApp};
use helpdesk::auth::Role;
use helpdesk::jobs::JOB_RECOMPUTE_MONTHLY_STATISTICS;
use helpdesk::tickets::{TicketStatus, UpdateType};
use serde_json::{json, Value};
use uuid::Uuid;

struct Cast {
    requester: Uuid,
    requester_token: String,
    manager: Uuid,
    manager_token: String,
    admin_token: String,
    catalog: Catalog,
}

async fn cast(app: &TestApp) -> Result<Cast> {
    let requester = app.insert_user("alice", "alice-pass", Role::User).await?;
    let manager = app.insert_user("bruno", "bruno-pass", Role::Manager).await?;
    app.insert_user("ada", "ada-pass", Role::Admin).await?;
    Ok(Cast {
        requester,
        requester_token: app.login_token("alice", "alice-pass").await?,
        manager,
        manager_token: app.login_token("bruno", "bruno-pass").await?,
        admin_token: app.login_token("ada", "ada-pass").await?,
        catalog: seed_catalog(app).await?,
    })
}

async fn create_ticket(app: &TestApp, cast: &Cast) -> Result<Value> {
    let response = app
        .post_json(
            "/api/tickets",
            &json!({
                "title": "  Laptop will not boot  ",
                "description": "Black screen after the update.",
                "priority": "MIDDLE",
                "type_id": cast.catalog.type_id,
                "first_category_id": cast.catalog.category_id,
                "second_category_id": cast.catalog.subcategory_id,
                "deadline": "2030-05-01T12:00:00Z",
            }),
            Some(&cast.requester_token),
        )
        .await?;
    if response.status() != StatusCode::CREATED {
        return Err(anyhow!("ticket creation failed: {}", response.status()));
    }
    json_body(response).await
}

fn ticket_id(body: &Value) -> Result<Uuid> {
    let raw = body["ticket"]["id"]
        .as_str()
        .ok_or_else(|| anyhow!("response has no ticket id"))?;
    Ok(Uuid::parse_str(raw)?)
}

async fn move_to(app: &TestApp, id: Uuid, status: &str, token: &str) -> Result<StatusCode> {
    let response = app
        .post_json(
            &format!("/api/tickets/{id}/status"),
            &json!({ "status": status }),
            Some(token),
        )
        .await?;
    Ok(response.status())
}

#[tokio::test]
async fn created_ticket_reads_back_as_written() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let created = create_ticket(&app, &cast).await?;
    let id = ticket_id(&created)?;
    assert_eq!(created["ticket"]["title"], "Laptop will not boot");
    assert_eq!(created["ticket"]["status"], "PENDING");
    assert_eq!(created["ticket"]["manager_id"], Value::Null);
    assert_eq!(created["history"]["update_type"], "TICKET_CREATED");
    assert_eq!(
        created["history"]["created_at"],
        created["ticket"]["updated_at"]
    );

    let response = app
        .get(&format!("/api/tickets/{id}"), Some(&cast.requester_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = json_body(response).await?;
    assert_eq!(fetched, created["ticket"]);
    assert_eq!(fetched["requester_id"], json!(cast.requester));
    assert_eq!(fetched["deadline"], "2030-05-01T12:00:00");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn creation_rejects_mismatched_subcategory() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let response = app
        .post_json(
            "/api/tickets",
            &json!({
                "title": "Printer",
                "description": "Out of toner",
                "priority": "LOW",
                "type_id": cast.catalog.type_id,
                "first_category_id": cast.catalog.other_category_id,
                "second_category_id": cast.catalog.subcategory_id,
            }),
            Some(&cast.requester_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/tickets",
            &json!({
                "title": "   ",
                "description": "Out of toner",
                "priority": "LOW",
                "type_id": cast.catalog.type_id,
                "first_category_id": cast.catalog.category_id,
            }),
            Some(&cast.requester_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn manager_approval_records_one_history_row_and_settings_stay_staff_only() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let id = ticket_id(&create_ticket(&app, &cast).await?)?;

    let response = app
        .post_json(
            &format!("/api/tickets/{id}/status"),
            &json!({ "status": "APPROVED" }),
            Some(&cast.manager_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let approved = json_body(response).await?;
    assert_eq!(approved["ticket"]["status"], "APPROVED");
    assert_eq!(approved["ticket"]["manager_id"], json!(cast.manager));
    assert_eq!(approved["history"]["update_type"], "TICKET_APPROVED");

    let history = app.history_rows(id).await?;
    let approvals: Vec<_> = history
        .iter()
        .filter(|entry| entry.update_type == UpdateType::TicketApproved)
        .collect();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].status, TicketStatus::Approved);
    assert_eq!(approvals[0].updated_by, cast.manager);

    let before = app
        .get(&format!("/api/tickets/{id}"), Some(&cast.requester_token))
        .await?;
    let before = json_body(before).await?;

    let response = app
        .patch_json(
            &format!("/api/tickets/{id}/settings"),
            &json!({ "priority": "HIGH" }),
            Some(&cast.requester_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let after = app
        .get(&format!("/api/tickets/{id}"), Some(&cast.requester_token))
        .await?;
    assert_eq!(json_body(after).await?, before);
    assert_eq!(app.history_rows(id).await?.len(), history.len());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn full_lifecycle_reaches_done_and_then_rejects_transitions() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let id = ticket_id(&create_ticket(&app, &cast).await?)?;

    // skipping ahead is not an edge
    assert_eq!(
        move_to(&app, id, "DONE", &cast.manager_token).await?,
        StatusCode::CONFLICT
    );
    // requesters cannot triage
    assert_eq!(
        move_to(&app, id, "APPROVED", &cast.requester_token).await?,
        StatusCode::FORBIDDEN
    );

    assert_eq!(move_to(&app, id, "APPROVED", &cast.manager_token).await?, StatusCode::OK);
    assert_eq!(
        move_to(&app, id, "APPROVED", &cast.manager_token).await?,
        StatusCode::CONFLICT
    );
    assert_eq!(move_to(&app, id, "IN_PROGRESS", &cast.manager_token).await?, StatusCode::OK);
    assert_eq!(move_to(&app, id, "REVIEW", &cast.manager_token).await?, StatusCode::OK);
    assert_eq!(move_to(&app, id, "IN_PROGRESS", &cast.requester_token).await?, StatusCode::OK);
    assert_eq!(move_to(&app, id, "REVIEW", &cast.manager_token).await?, StatusCode::OK);
    assert_eq!(move_to(&app, id, "DONE", &cast.requester_token).await?, StatusCode::OK);

    let done = app
        .get(&format!("/api/tickets/{id}"), Some(&cast.requester_token))
        .await?;
    let done = json_body(done).await?;
    assert_eq!(done["status"], "DONE");
    assert!(done["completed_at"].is_string());

    for target in ["IN_PROGRESS", "REVIEW", "PENDING", "REJECTED"] {
        assert_eq!(
            move_to(&app, id, target, &cast.admin_token).await?,
            StatusCode::CONFLICT,
            "DONE -> {target} must be refused"
        );
    }
    let response = app
        .patch_json(
            &format!("/api/tickets/{id}/settings"),
            &json!({ "priority": "HIGH" }),
            Some(&cast.admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let statuses: Vec<_> = app
        .history_rows(id)
        .await?
        .into_iter()
        .map(|entry| entry.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            TicketStatus::Pending,
            TicketStatus::Approved,
            TicketStatus::InProgress,
            TicketStatus::Review,
            TicketStatus::InProgress,
            TicketStatus::Review,
            TicketStatus::Done,
        ]
    );

    let jobs = app.jobs_by_type(JOB_RECOMPUTE_MONTHLY_STATISTICS).await?;
    assert_eq!(jobs.len(), 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn requester_edits_pending_ticket_only() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let id = ticket_id(&create_ticket(&app, &cast).await?)?;

    let response = app
        .patch_json(
            &format!("/api/tickets/{id}"),
            &json!({ "first_category_id": cast.catalog.other_category_id }),
            Some(&cast.requester_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let edited = json_body(response).await?;
    assert_eq!(edited["history"]["update_type"], "CATEGORY_CHANGE");
    assert_eq!(edited["ticket"]["second_category_id"], Value::Null);

    let response = app
        .patch_json(
            &format!("/api/tickets/{id}"),
            &json!({ "title": "Laptop will not boot" }),
            Some(&cast.requester_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST, "no-op edit");

    let response = app
        .patch_json(
            &format!("/api/tickets/{id}"),
            &json!({ "title": "Laptop still dead", "urgent": true }),
            Some(&cast.requester_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["history"]["update_type"], "TICKET_EDITED");

    let response = app
        .patch_json(
            &format!("/api/tickets/{id}"),
            &json!({ "urgent": false }),
            Some(&cast.requester_token),
        )
        .await?;
    assert_eq!(json_body(response).await?["history"]["update_type"], "OTHER");

    assert_eq!(move_to(&app, id, "APPROVED", &cast.manager_token).await?, StatusCode::OK);

    let response = app
        .patch_json(
            &format!("/api/tickets/{id}"),
            &json!({ "description": "Now it beeps" }),
            Some(&cast.requester_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn settings_changes_are_classified() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let id = ticket_id(&create_ticket(&app, &cast).await?)?;
    let path = format!("/api/tickets/{id}/settings");

    let response = app
        .patch_json(&path, &json!({ "priority": "HIGH" }), Some(&cast.manager_token))
        .await?;
    assert_eq!(json_body(response).await?["history"]["update_type"], "PRIORITY_CHANGE");

    let response = app
        .patch_json(&path, &json!({ "deadline": null }), Some(&cast.manager_token))
        .await?;
    let cleared = json_body(response).await?;
    assert_eq!(cleared["history"]["update_type"], "DEADLINE_CHANGE");
    assert_eq!(cleared["ticket"]["deadline"], Value::Null);

    let response = app
        .patch_json(&path, &json!({ "manager_id": cast.manager }), Some(&cast.admin_token))
        .await?;
    let assigned = json_body(response).await?;
    assert_eq!(assigned["history"]["update_type"], "MANAGER_CHANGE");
    assert_eq!(assigned["ticket"]["manager_id"], json!(cast.manager));

    let response = app
        .patch_json(
            &path,
            &json!({ "manager_id": cast.requester }),
            Some(&cast.admin_token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST, "users cannot be assigned");

    let response = app
        .patch_json(
            &path,
            &json!({ "priority": "LOW", "deadline": "2031-01-01T00:00:00Z" }),
            Some(&cast.admin_token),
        )
        .await?;
    assert_eq!(json_body(response).await?["history"]["update_type"], "TICKET_EDITED");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn soft_deleted_ticket_disappears_but_keeps_history() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let id = ticket_id(&create_ticket(&app, &cast).await?)?;

    let response = app
        .delete(&format!("/api/tickets/{id}"), Some(&cast.manager_token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .delete(&format!("/api/tickets/{id}"), Some(&cast.requester_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .get(&format!("/api/tickets/{id}"), Some(&cast.admin_token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/api/tickets", Some(&cast.requester_token)).await?;
    assert_eq!(json_body(response).await?["total"], 0);

    let response = app
        .get(&format!("/api/history?ticket_id={id}"), Some(&cast.admin_token))
        .await?;
    let page = json_body(response).await?;
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"][0]["update_type"], "TICKET_CREATED");
    assert_eq!(page["items"][1]["update_type"], "TICKET_DELETE");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn visibility_follows_role() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;
    app.insert_user("erin", "erin-pass", Role::User).await?;
    let stranger = app.login_token("erin", "erin-pass").await?;
    app.insert_user("marc", "marc-pass", Role::Manager).await?;
    let other_manager = app.login_token("marc", "marc-pass").await?;

    let id = ticket_id(&create_ticket(&app, &cast).await?)?;

    let response = app.get(&format!("/api/tickets/{id}"), Some(&stranger)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // unassigned tickets are visible to every manager
    let response = app.get(&format!("/api/tickets/{id}"), Some(&other_manager)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(move_to(&app, id, "APPROVED", &cast.manager_token).await?, StatusCode::OK);

    let response = app.get(&format!("/api/tickets/{id}"), Some(&other_manager)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .get("/api/tickets?status=APPROVED", Some(&cast.manager_token))
        .await?;
    assert_eq!(json_body(response).await?["total"], 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn comments_are_shared_between_requester_and_manager() -> Result<()> {
    let _lock = common::acquire_db_lock().await;
    let app = TestApp::new().await?;
    let cast = cast(&app).await?;

    let id = ticket_id(&create_ticket(&app, &cast).await?)?;
    let path = format!("/api/tickets/{id}/comments");

    let response = app
        .post_json(&path, &json!({ "body": "  Any update?  " }), Some(&cast.requester_token))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(json_body(response).await?["body"], "Any update?");

    let response = app
        .post_json(&path, &json!({ "body": "   " }), Some(&cast.manager_token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(&path, &json!({ "body": "Looking now." }), Some(&cast.manager_token))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.get(&path, Some(&cast.requester_token)).await?;
    let comments = json_body(response).await?;
    let bodies: Vec<_> = comments
        .as_array()
        .map(|items| items.iter().map(|c| c["body"].clone()).collect())
        .unwrap_or_default();
    assert_eq!(bodies, vec![json!("Any update?"), json!("Looking now.")]);

    assert_eq!(move_to(&app, id, "REJECTED", &cast.manager_token).await?, StatusCode::OK);
    let response = app
        .post_json(&path, &json!({ "body": "Why?" }), Some(&cast.requester_token))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}
