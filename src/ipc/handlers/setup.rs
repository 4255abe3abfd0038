//! Thin boundary CRUD for the reference data the core consumes. No business
//! logic lives here; attendance semantics never touch these rows directly.

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn handle_faculty_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute("INSERT INTO faculty(id, name) VALUES(?, ?)", (&id, &name)) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "id": id, "name": name }))
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let faculty_id = req
        .params
        .get("facultyId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, name, code, faculty_id) VALUES(?, ?, ?, ?)",
        (&id, &name, &code, &faculty_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "id": id, "name": name, "code": code, "facultyId": faculty_id }),
    )
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let mut stmt = match conn.prepare(
        "SELECT c.id, c.name, c.code, c.faculty_id, f.name
         FROM courses c LEFT JOIN faculty f ON f.id = c.faculty_id
         ORDER BY c.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "facultyId": r.get::<_, Option<String>>(3)?,
                "facultyName": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_accounts_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role = req
        .params
        .get("role")
        .and_then(|v| v.as_str())
        .unwrap_or("student")
        .to_string();
    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO accounts(id, name, email, role) VALUES(?, ?, ?, ?)",
        (&id, &name, &email, &role),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "id": id, "name": name, "email": email, "role": role }),
    )
}

fn handle_enrolled_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let account_id = match required_str(req, "accountId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let roll_number = req
        .params
        .get("rollNumber")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let department = req
        .params
        .get("department")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let attendance_goal = req
        .params
        .get("attendanceGoal")
        .and_then(|v| v.as_i64())
        .unwrap_or(75);
    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO enrolled_profiles(id, account_id, roll_number, department, attendance_goal)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &account_id, &roll_number, &department, attendance_goal),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "id": id, "accountId": account_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "faculty.create" => Some(handle_faculty_create(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "accounts.create" => Some(handle_accounts_create(state, req)),
        "enrolled.create" => Some(handle_enrolled_create(state, req)),
        _ => None,
    }
}
