use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::payroll::DayStatus;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn parse_date(raw: &str) -> Result<chrono::NaiveDate, HandlerErr> {
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| HandlerErr {
        code: "bad_params",
        message: "date must be YYYY-MM-DD".to_string(),
        details: None,
    })
}

fn parse_optional_time(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let Some(s) = v.as_str() else {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("{} must be HH:MM", key),
            details: None,
        });
    };
    let t = s.trim();
    if t.is_empty() {
        return Ok(None);
    }
    chrono::NaiveTime::parse_from_str(t, "%H:%M")
        .map(|parsed| Some(parsed.format("%H:%M").to_string()))
        .map_err(|_| HandlerErr {
            code: "bad_params",
            message: format!("{} must be HH:MM", key),
            details: None,
        })
}

fn teacher_exists(conn: &Connection, teacher_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn attendance_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let date_raw = get_required_str(params, "date")?;
    let date = parse_date(&date_raw)?;
    let status_raw = get_required_str(params, "status")?;
    let Some(status) = DayStatus::parse(&status_raw) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "status must be one of: present, absent, half_day, late, early_departure"
                .to_string(),
            details: Some(json!({ "status": status_raw })),
        });
    };

    if !teacher_exists(conn, &teacher_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "teacher not found".to_string(),
            details: None,
        });
    }

    let check_in = parse_optional_time(params, "checkInTime")?;
    let check_out = parse_optional_time(params, "checkOutTime")?;
    let late_minutes = params.get("lateMinutes").and_then(|v| v.as_i64()).unwrap_or(0);
    let early_minutes = params
        .get("earlyDepartureMinutes")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if late_minutes < 0 || early_minutes < 0 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "minute counts must be non-negative".to_string(),
            details: None,
        });
    }
    let manual_override = params
        .get("isManualOverride")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let override_amount = params
        .get("deductionAmount")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    let override_reason = params
        .get("deductionReason")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    if manual_override && !override_amount.is_finite() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "deductionAmount must be a finite number".to_string(),
            details: None,
        });
    }

    conn.execute(
        "INSERT INTO biometric_attendance(id, teacher_id, date, check_in, check_out, status,
                                          late_minutes, early_minutes, manual_override,
                                          override_amount, override_reason)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(teacher_id, date) DO UPDATE SET
           check_in = excluded.check_in,
           check_out = excluded.check_out,
           status = excluded.status,
           late_minutes = excluded.late_minutes,
           early_minutes = excluded.early_minutes,
           manual_override = excluded.manual_override,
           override_amount = excluded.override_amount,
           override_reason = excluded.override_reason",
        (
            Uuid::new_v4().to_string(),
            &teacher_id,
            date.format("%Y-%m-%d").to_string(),
            &check_in,
            &check_out,
            status.as_str(),
            late_minutes,
            early_minutes,
            manual_override as i64,
            override_amount,
            &override_reason,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "biometric_attendance" })),
    })?;

    Ok(json!({ "ok": true }))
}

fn attendance_month(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let month = params
        .get("month")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing month".to_string(),
            details: None,
        })?;
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing year".to_string(),
            details: None,
        })?;
    if !(1..=12).contains(&month) {
        return Err(HandlerErr {
            code: "bad_params",
            message: "month must be between 1 and 12".to_string(),
            details: None,
        });
    }

    if !teacher_exists(conn, &teacher_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "teacher not found".to_string(),
            details: None,
        });
    }

    let prefix = format!("{:04}-{:02}-%", year, month);
    let mut stmt = conn
        .prepare(
            "SELECT date, check_in, check_out, status, late_minutes, early_minutes,
                    manual_override, override_amount, override_reason
             FROM biometric_attendance
             WHERE teacher_id = ? AND date LIKE ?
             ORDER BY date",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let rows = stmt
        .query_map((&teacher_id, &prefix), |row| {
            Ok(json!({
                "date": row.get::<_, String>(0)?,
                "checkInTime": row.get::<_, Option<String>>(1)?,
                "checkOutTime": row.get::<_, Option<String>>(2)?,
                "status": row.get::<_, String>(3)?,
                "lateMinutes": row.get::<_, i64>(4)?,
                "earlyDepartureMinutes": row.get::<_, i64>(5)?,
                "isManualOverride": row.get::<_, i64>(6)? != 0,
                "deductionAmount": row.get::<_, f64>(7)?,
                "deductionReason": row.get::<_, Option<String>>(8)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    Ok(json!({
        "teacherId": teacher_id,
        "month": month,
        "year": year,
        "records": rows
    }))
}

fn handle_attendance_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_record(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_month(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_month(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" => Some(handle_attendance_record(state, req)),
        "attendance.month" => Some(handle_attendance_month(state, req)),
        _ => None,
    }
}
