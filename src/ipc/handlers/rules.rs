use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::payroll::{self, DeductionRule};
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

fn rule_from_params(params: &serde_json::Value) -> Result<DeductionRule, HandlerErr> {
    let rule_name = get_required_str(params, "ruleName")?;
    let rule_type_raw = get_required_str(params, "ruleType")?;
    let Some(rule_type) = payroll::RuleType::parse(&rule_type_raw) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "ruleType must be one of: late_coming, half_day, absent, early_departure"
                .to_string(),
            details: Some(json!({ "ruleType": rule_type_raw })),
        });
    };
    let deduction_type_raw = get_required_str(params, "deductionType")?;
    let Some(deduction_type) = payroll::DeductionType::parse(&deduction_type_raw) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "deductionType must be one of: percentage, fixed_amount, full_day, half_day"
                .to_string(),
            details: Some(json!({ "deductionType": deduction_type_raw })),
        });
    };
    let deduction_value = params
        .get("deductionValue")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing deductionValue".to_string(),
            details: None,
        })?;

    Ok(DeductionRule {
        id: params
            .get("ruleId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        rule_name,
        rule_type,
        condition_text: params
            .get("conditionDescription")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        deduction_type,
        deduction_value,
        grace_minutes: params.get("graceMinutes").and_then(|v| v.as_i64()).unwrap_or(0),
        max_late_count: params.get("maxLateCount").and_then(|v| v.as_i64()).unwrap_or(0),
        active: params.get("isActive").and_then(|v| v.as_bool()).unwrap_or(true),
        sort_order: params.get("sortOrder").and_then(|v| v.as_i64()).unwrap_or(0),
    })
}

fn handle_rules_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let rule = match rule_from_params(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    // Bad rules are rejected here, at authoring time; evaluation trusts
    // whatever made it into the table.
    if let Err(e) = payroll::validate_rule(&rule) {
        return calc_err(&req.id, e);
    }

    let rule_id = rule
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let result = conn.execute(
        "INSERT INTO attendance_rules(id, rule_name, rule_type, condition_text, deduction_type, deduction_value, grace_minutes, max_late_count, active, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           rule_name = excluded.rule_name,
           rule_type = excluded.rule_type,
           condition_text = excluded.condition_text,
           deduction_type = excluded.deduction_type,
           deduction_value = excluded.deduction_value,
           grace_minutes = excluded.grace_minutes,
           max_late_count = excluded.max_late_count,
           active = excluded.active,
           sort_order = excluded.sort_order",
        (
            &rule_id,
            &rule.rule_name,
            rule.rule_type.as_str(),
            &rule.condition_text,
            rule.deduction_type.as_str(),
            rule.deduction_value,
            rule.grace_minutes,
            rule.max_late_count,
            rule.active as i64,
            rule.sort_order,
        ),
    );
    if let Err(e) = result {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_rules" })),
        );
    }
    ok(&req.id, json!({ "ruleId": rule_id }))
}

fn handle_rules_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "rules": [] }));
    };
    let mut stmt = match conn.prepare(
        "SELECT id, rule_name, rule_type, condition_text, deduction_type, deduction_value,
                grace_minutes, max_late_count, active, sort_order
         FROM attendance_rules
         ORDER BY sort_order, rule_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "ruleName": row.get::<_, String>(1)?,
                "ruleType": row.get::<_, String>(2)?,
                "conditionDescription": row.get::<_, Option<String>>(3)?,
                "deductionType": row.get::<_, String>(4)?,
                "deductionValue": row.get::<_, f64>(5)?,
                "graceMinutes": row.get::<_, i64>(6)?,
                "maxLateCount": row.get::<_, i64>(7)?,
                "isActive": row.get::<_, i64>(8)? != 0,
                "sortOrder": row.get::<_, i64>(9)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(rules) => ok(&req.id, json!({ "rules": rules })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rules.save" => Some(handle_rules_save(state, req)),
        "rules.list" => Some(handle_rules_list(state, req)),
        _ => None,
    }
}
