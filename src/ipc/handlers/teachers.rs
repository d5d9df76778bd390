use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let employee_no = req
        .params
        .get("employeeNo")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, name, employee_no, active) VALUES(?, ?, ?, 1)",
        (&teacher_id, &name, &employee_no),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }
    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };
    let mut stmt = match conn.prepare(
        "SELECT id, name, employee_no, active FROM teachers ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let employee_no: Option<String> = row.get(2)?;
            let active: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "employeeNo": employee_no,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn parse_date(req: &Request, raw: &str, key: &str) -> Result<NaiveDate, serde_json::Value> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        err(
            &req.id,
            "bad_params",
            format!("{} must be YYYY-MM-DD", key),
            None,
        )
    })
}

fn handle_salary_config_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let basic_monthly = match req.params.get("basicMonthlySalary").and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing basicMonthlySalary", None),
    };
    let per_day = match req.params.get("perDaySalary").and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing perDaySalary", None),
    };
    if basic_monthly <= 0.0 || per_day <= 0.0 {
        return err(
            &req.id,
            "bad_params",
            "salary amounts must be positive",
            None,
        );
    }
    let effective_from = match req.params.get("effectiveFrom").and_then(|v| v.as_str()) {
        Some(v) => match parse_date(req, v, "effectiveFrom") {
            Ok(d) => d,
            Err(e) => return e,
        },
        None => return err(&req.id, "bad_params", "missing effectiveFrom", None),
    };
    let effective_to = match req.params.get("effectiveTo").and_then(|v| v.as_str()) {
        Some(v) => match parse_date(req, v, "effectiveTo") {
            Ok(d) => Some(d),
            Err(e) => return e,
        },
        None => None,
    };
    if let Some(to) = effective_to {
        if to <= effective_from {
            return err(
                &req.id,
                "bad_params",
                "effectiveTo must be after effectiveFrom",
                None,
            );
        }
    }

    let teacher_exists = match conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !teacher_exists {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    let config_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO salary_configs(id, teacher_id, basic_monthly, per_day, effective_from, effective_to, active)
         VALUES(?, ?, ?, ?, ?, ?, 1)",
        (
            &config_id,
            &teacher_id,
            basic_monthly,
            per_day,
            effective_from.format("%Y-%m-%d").to_string(),
            effective_to.map(|d| d.format("%Y-%m-%d").to_string()),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "salary_configs" })),
        );
    }
    ok(&req.id, json!({ "configId": config_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "salaryConfig.save" => Some(handle_salary_config_save(state, req)),
        _ => None,
    }
}
