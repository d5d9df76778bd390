use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::payroll::{self, AttendanceDay, DayStatus, DeductionRule, SalaryConfig};
use chrono::NaiveDate;
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

fn db_err(e: impl ToString) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
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

fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn parse_stored_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| HandlerErr {
        code: "bad_record",
        message: format!("stored date is not YYYY-MM-DD: {}", raw),
        details: None,
    })
}

fn load_configs(conn: &Connection, teacher_id: &str) -> Result<Vec<SalaryConfig>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, basic_monthly, per_day, effective_from, effective_to, active
             FROM salary_configs
             WHERE teacher_id = ?
             ORDER BY effective_from",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([teacher_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, i64>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut configs = Vec::with_capacity(rows.len());
    for (id, basic_monthly, per_day, from_raw, to_raw, active) in rows {
        let effective_to = match to_raw {
            Some(raw) => Some(parse_stored_date(&raw)?),
            None => None,
        };
        configs.push(SalaryConfig {
            id: Some(id),
            teacher_id: teacher_id.to_string(),
            basic_monthly,
            per_day,
            effective_from: parse_stored_date(&from_raw)?,
            effective_to,
            active: active != 0,
        });
    }
    Ok(configs)
}

fn load_rules(conn: &Connection) -> Result<Vec<DeductionRule>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, rule_name, rule_type, condition_text, deduction_type, deduction_value,
                    grace_minutes, max_late_count, active, sort_order
             FROM attendance_rules
             ORDER BY sort_order",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, f64>(5)?,
                r.get::<_, i64>(6)?,
                r.get::<_, i64>(7)?,
                r.get::<_, i64>(8)?,
                r.get::<_, i64>(9)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut rules = Vec::with_capacity(rows.len());
    for (id, rule_name, type_raw, condition_text, ded_raw, deduction_value, grace, max_late, active, sort_order) in rows
    {
        let Some(rule_type) = payroll::RuleType::parse(&type_raw) else {
            return Err(HandlerErr {
                code: "bad_record",
                message: format!("unknown ruleType in attendance_rules: {}", type_raw),
                details: Some(json!({ "ruleId": id })),
            });
        };
        let Some(deduction_type) = payroll::DeductionType::parse(&ded_raw) else {
            return Err(HandlerErr {
                code: "bad_record",
                message: format!("unknown deductionType in attendance_rules: {}", ded_raw),
                details: Some(json!({ "ruleId": id })),
            });
        };
        rules.push(DeductionRule {
            id: Some(id),
            rule_name,
            rule_type,
            condition_text,
            deduction_type,
            deduction_value,
            grace_minutes: grace,
            max_late_count: max_late,
            active: active != 0,
            sort_order,
        });
    }
    Ok(rules)
}

fn load_month_records(
    conn: &Connection,
    teacher_id: &str,
    month: u32,
    year: i32,
) -> Result<Vec<AttendanceDay>, HandlerErr> {
    let prefix = format!("{:04}-{:02}-%", year, month);
    let mut stmt = conn
        .prepare(
            "SELECT date, check_in, check_out, status, late_minutes, early_minutes,
                    manual_override, override_amount, override_reason
             FROM biometric_attendance
             WHERE teacher_id = ? AND date LIKE ?
             ORDER BY date",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map((teacher_id, &prefix), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, i64>(5)?,
                r.get::<_, i64>(6)?,
                r.get::<_, f64>(7)?,
                r.get::<_, Option<String>>(8)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let parse_time = |raw: Option<String>| {
        raw.and_then(|t| chrono::NaiveTime::parse_from_str(&t, "%H:%M").ok())
    };

    let mut records = Vec::with_capacity(rows.len());
    for (date_raw, check_in, check_out, status_raw, late_minutes, early_minutes, manual, amount, reason) in rows
    {
        let Some(status) = DayStatus::parse(&status_raw) else {
            return Err(HandlerErr {
                code: "bad_record",
                message: format!("unknown status in biometric_attendance: {}", status_raw),
                details: Some(json!({ "teacherId": teacher_id, "date": date_raw })),
            });
        };
        records.push(AttendanceDay {
            teacher_id: teacher_id.to_string(),
            date: parse_stored_date(&date_raw)?,
            check_in: parse_time(check_in),
            check_out: parse_time(check_out),
            status,
            late_minutes,
            early_minutes,
            manual_override: manual != 0,
            override_amount: amount,
            override_reason: reason,
        });
    }
    Ok(records)
}

fn calculation_json(
    id: &str,
    version: i64,
    calc: &payroll::MonthlySalaryCalculation,
) -> serde_json::Value {
    let mut value = json!(calc);
    value["calculationId"] = json!(id);
    value["version"] = json!(version);
    value
}

fn salary_calculate_month(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let month = get_required_i64(params, "month")?;
    let year = get_required_i64(params, "year")?;
    if !(1..=12).contains(&month) {
        return Err(HandlerErr {
            code: "bad_params",
            message: "month must be between 1 and 12".to_string(),
            details: None,
        });
    }
    let (month, year) = (month as u32, year as i32);

    let teacher_known = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(db_err)?
        .is_some();
    if !teacher_known {
        return Err(HandlerErr {
            code: "not_found",
            message: "teacher not found".to_string(),
            details: Some(json!({ "teacherId": teacher_id })),
        });
    }

    let period_start = payroll::first_of_month(year, month).map_err(|e| HandlerErr {
        code: "bad_params",
        message: e.message,
        details: e.details,
    })?;
    let configs = load_configs(conn, &teacher_id)?;
    let Some(config) = payroll::select_config(&configs, period_start) else {
        return Err(HandlerErr {
            code: "no_salary_config",
            message: format!(
                "no active salary configuration covers {:04}-{:02}",
                year, month
            ),
            details: Some(json!({ "teacherId": teacher_id, "month": month, "year": year })),
        });
    };

    let records = load_month_records(conn, &teacher_id, month, year)?;
    let rules = load_rules(conn)?;
    let calc = payroll::calculate_month(&teacher_id, month, year, config, &records, &rules);
    let details_json = serde_json::to_string(&calc.details).map_err(|e| HandlerErr {
        code: "encode_failed",
        message: e.to_string(),
        details: None,
    })?;

    // Version bookkeeping happens inside one transaction: approval state is
    // re-read here so a concurrently approved row is never overwritten.
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let latest: Option<(String, i64, i64)> = tx
        .query_row(
            "SELECT id, version, approved FROM salary_calculations
             WHERE teacher_id = ? AND month = ? AND year = ?
             ORDER BY version DESC LIMIT 1",
            (&teacher_id, month, year),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err)?;

    let version = match latest {
        None => 1,
        Some((_, v, approved)) if approved != 0 => v + 1,
        Some((stale_id, v, _)) => {
            // The latest version is still unapproved; replace it in place.
            tx.execute("DELETE FROM salary_calculations WHERE id = ?", [&stale_id])
                .map_err(db_err)?;
            v
        }
    };

    let calc_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO salary_calculations(id, teacher_id, month, year, version, basic_salary,
                                         per_day_salary, total_working_days, present_days,
                                         absent_days, half_days, late_days, total_deductions,
                                         net_salary, approved, approved_at, details_json, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?, ?)",
        rusqlite::params![
            &calc_id,
            &teacher_id,
            month,
            year,
            version,
            calc.basic_salary,
            calc.per_day_salary,
            calc.total_working_days as i64,
            calc.present_days as i64,
            calc.absent_days as i64,
            calc.half_days as i64,
            calc.late_days as i64,
            calc.total_deductions,
            calc.net_salary,
            &details_json,
            &created_at,
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "salary_calculations" })),
    })?;
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(calculation_json(&calc_id, version, &calc))
}

fn salary_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let month = get_required_i64(params, "month")?;
    let year = get_required_i64(params, "year")?;

    let row: Option<(String, i64, f64, f64, i64, i64, i64, i64, i64, f64, f64, i64, Option<String>, String)> = conn
        .query_row(
            "SELECT id, version, basic_salary, per_day_salary, total_working_days, present_days,
                    absent_days, half_days, late_days, total_deductions, net_salary, approved,
                    approved_at, details_json
             FROM salary_calculations
             WHERE teacher_id = ? AND month = ? AND year = ?
             ORDER BY version DESC LIMIT 1",
            (&teacher_id, month, year),
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                    r.get(8)?,
                    r.get(9)?,
                    r.get(10)?,
                    r.get(11)?,
                    r.get(12)?,
                    r.get(13)?,
                ))
            },
        )
        .optional()
        .map_err(db_err)?;

    let Some((
        id,
        version,
        basic_salary,
        per_day_salary,
        total_working_days,
        present_days,
        absent_days,
        half_days,
        late_days,
        total_deductions,
        net_salary,
        approved,
        approved_at,
        details_json,
    )) = row
    else {
        return Err(HandlerErr {
            code: "not_found",
            message: "no salary calculation for that period".to_string(),
            details: Some(json!({ "teacherId": teacher_id, "month": month, "year": year })),
        });
    };

    let details: serde_json::Value =
        serde_json::from_str(&details_json).unwrap_or_else(|_| json!([]));
    Ok(json!({
        "calculationId": id,
        "teacherId": teacher_id,
        "month": month,
        "year": year,
        "version": version,
        "basicSalary": basic_salary,
        "perDaySalary": per_day_salary,
        "totalWorkingDays": total_working_days,
        "presentDays": present_days,
        "absentDays": absent_days,
        "halfDays": half_days,
        "lateDays": late_days,
        "totalDeductions": total_deductions,
        "netSalary": net_salary,
        "isApproved": approved != 0,
        "approvedAt": approved_at,
        "details": details
    }))
}

fn salary_approve(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let calc_id = get_required_str(params, "calculationId")?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let approved: Option<i64> = tx
        .query_row(
            "SELECT approved FROM salary_calculations WHERE id = ?",
            [&calc_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(approved) = approved else {
        return Err(HandlerErr {
            code: "not_found",
            message: "salary calculation not found".to_string(),
            details: Some(json!({ "calculationId": calc_id })),
        });
    };
    if approved != 0 {
        return Err(HandlerErr {
            code: "already_approved",
            message: "salary calculation is already approved".to_string(),
            details: Some(json!({ "calculationId": calc_id })),
        });
    }

    let approved_at = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "UPDATE salary_calculations SET approved = 1, approved_at = ? WHERE id = ?",
        (&approved_at, &calc_id),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "salary_calculations" })),
    })?;
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "calculationId": calc_id,
        "isApproved": true,
        "approvedAt": approved_at
    }))
}

fn handle_calculate_month(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match salary_calculate_month(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match salary_get(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_approve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match salary_approve(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "salary.calculateMonth" => Some(handle_calculate_month(state, req)),
        "salary.get" => Some(handle_get(state, req)),
        "salary.approve" => Some(handle_approve(state, req)),
        _ => None,
    }
}
