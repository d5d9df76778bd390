use crate::grading::{self, CalcError};
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

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

fn parse_config(req: &Request) -> Result<grading::GradingConfig, serde_json::Value> {
    let Some(raw) = req.params.get("config") else {
        return Ok(grading::GradingConfig::default());
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| err(&req.id, "bad_params", format!("invalid config: {}", e), None))
}

/// Load one student's marks grouped into ordered terms; subject order inside
/// a term is the entry order.
fn load_student_terms(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> Result<Vec<grading::TermInput>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT term, subject_name, obtained, max_marks, pass_mark
             FROM subject_marks
             WHERE class_id = ? AND student_id = ?
             ORDER BY term, sort_order",
        )
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map((class_id, student_id), |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, f64>(3)?,
                r.get::<_, f64>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| CalcError::new("db_query_failed", e.to_string()))?;

    let mut terms: Vec<grading::TermInput> = Vec::new();
    for (term, subject_name, obtained, max_marks, pass_mark) in rows {
        if terms.last().map(|t| t.term) != Some(term) {
            terms.push(grading::TermInput {
                term,
                subjects: Vec::new(),
            });
        }
        let current = terms.last_mut().expect("term group exists");
        current.subjects.push(grading::SubjectSpec {
            subject_id: None,
            subject_name,
            obtained: serde_json::Value::String(obtained),
            max_marks,
            pass_mark,
        });
    }
    Ok(terms)
}

fn student_info(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> Result<Option<grading::StudentInfo>, CalcError> {
    conn.query_row(
        "SELECT s.id, s.name, s.roll, c.name
         FROM students s JOIN classes c ON c.id = s.class_id
         WHERE s.class_id = ? AND s.id = ?",
        (class_id, student_id),
        |r| {
            Ok(grading::StudentInfo {
                student_id: r.get(0)?,
                name: r.get(1)?,
                roll: r.get(2)?,
                class_name: Some(r.get(3)?),
            })
        },
    )
    .optional()
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

fn handle_student_outcome(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cfg = match parse_config(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let info = match student_info(conn, &class_id, &student_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return calc_err(&req.id, e),
    };
    let terms = match load_student_terms(conn, &class_id, &student_id) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };
    match grading::compute_student_outcome(info, &terms, &cfg) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => calc_err(&req.id, e),
    }
}

fn handle_class_results(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let cfg = match parse_config(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let class_name: Option<String> = match conn
        .query_row("SELECT name FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(class_name) = class_name else {
        return err(&req.id, "not_found", "class not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, roll
         FROM students
         WHERE class_id = ? AND active = 1
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match stmt
        .query_map([&class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut outcomes: Vec<grading::StudentOutcome> = Vec::new();
    for (student_id, name, roll) in students {
        let terms = match load_student_terms(conn, &class_id, &student_id) {
            Ok(v) => v,
            Err(e) => return calc_err(&req.id, e),
        };
        // Students with no recorded marks have not sat this report's exams;
        // they stay out of the cohort rather than failing the whole report.
        if terms.is_empty() {
            continue;
        }
        let info = grading::StudentInfo {
            student_id,
            name,
            roll,
            class_name: Some(class_name.clone()),
        };
        match grading::compute_student_outcome(info, &terms, &cfg) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => return calc_err(&req.id, e),
        }
    }

    let ranked = grading::rank_cohort(outcomes);
    let summary = grading::summarize_class(&ranked);
    ok(
        &req.id,
        json!({
            "classId": class_id,
            "className": class_name,
            "results": ranked,
            "summary": summary
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.studentOutcome" => Some(handle_student_outcome(state, req)),
        "reports.classResults" => Some(handle_class_results(state, req)),
        _ => None,
    }
}
