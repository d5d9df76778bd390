use crate::grading;
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::types::{AppState, Request};
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

fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

/// Marks arrive as a number or a string (the absence marker travels as
/// text); persist whichever form was sent so it round-trips to the engine.
fn obtained_as_text(v: &serde_json::Value) -> Result<String, HandlerErr> {
    match v {
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::String(s) => Ok(s.clone()),
        _ => Err(HandlerErr {
            code: "bad_params",
            message: "obtained must be a number or string".to_string(),
            details: None,
        }),
    }
}

fn marks_enter(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let term = params
        .get("term")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing term".to_string(),
            details: None,
        })?;
    if term < 1 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "term must be a positive integer".to_string(),
            details: None,
        });
    }
    let Some(subjects) = params.get("subjects").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing subjects".to_string(),
            details: None,
        });
    };

    let student_exists = conn
        .query_row(
            "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
            (&class_id, &student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?
        .is_some();
    if !student_exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut saved = 0_usize;
    for (idx, subject) in subjects.iter().enumerate() {
        let subject_name = get_required_str(subject, "subjectName")?;
        let max_marks = get_required_f64(subject, "maxMarks")?;
        let pass_mark = get_required_f64(subject, "passMark")?;
        if max_marks <= 0.0 {
            return Err(HandlerErr {
                code: "bad_params",
                message: "maxMarks must be positive".to_string(),
                details: Some(json!({ "subjectName": subject_name })),
            });
        }
        if pass_mark < 0.0 || pass_mark > max_marks {
            return Err(HandlerErr {
                code: "bad_params",
                message: "passMark must be between 0 and maxMarks".to_string(),
                details: Some(json!({ "subjectName": subject_name })),
            });
        }
        let obtained = obtained_as_text(subject.get("obtained").unwrap_or(&serde_json::Value::Null)
        )
        .map_err(|mut e| {
            e.details = Some(json!({ "subjectName": subject_name }));
            e
        })?;

        tx.execute(
            "INSERT INTO subject_marks(id, class_id, student_id, term, subject_name, obtained, max_marks, pass_mark, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, term, subject_name) DO UPDATE SET
               obtained = excluded.obtained,
               max_marks = excluded.max_marks,
               pass_mark = excluded.pass_mark,
               sort_order = excluded.sort_order",
            (
                Uuid::new_v4().to_string(),
                &class_id,
                &student_id,
                term,
                &subject_name,
                &obtained,
                max_marks,
                pass_mark,
                idx as i64,
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "subject_marks" })),
        })?;
        saved += 1;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "saved": saved }))
}

fn handle_marks_enter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match marks_enter(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_evaluate_subject(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(obtained) = req.params.get("obtained") else {
        return err(&req.id, "bad_params", "missing obtained", None);
    };
    let Some(pass_mark) = req.params.get("passMark").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing passMark", None);
    };
    let cfg = match parse_config(req.params.get("config")) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match grading::evaluate_subject(obtained, pass_mark, &cfg) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => calc_err(&req.id, e),
    }
}

fn parse_config(raw: Option<&serde_json::Value>) -> Result<grading::GradingConfig, HandlerErr> {
    let Some(raw) = raw else {
        return Ok(grading::GradingConfig::default());
    };
    serde_json::from_value(raw.clone()).map_err(|e| HandlerErr {
        code: "bad_params",
        message: format!("invalid config: {}", e),
        details: None,
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.enter" => Some(handle_marks_enter(state, req)),
        "marks.evaluateSubject" => Some(handle_evaluate_subject(state, req)),
        _ => None,
    }
}
