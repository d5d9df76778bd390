use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Round-half-up at `decimals` places: `floor(x * 10^d + 0.5) / 10^d`.
pub fn round_half_up(x: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    ((x * factor) + 0.5).floor() / factor
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GradingConfig {
    pub absence_marker: String,
    pub treat_blank_as_absent: bool,
    pub percent_decimals: u32,
    pub promotion_threshold_percent: f64,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            absence_marker: "A".to_string(),
            treat_blank_as_absent: true,
            percent_decimals: 2,
            promotion_threshold_percent: 40.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectStatus {
    Pass,
    Fail,
    Absent,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectOutcome {
    pub numeric_mark: f64,
    pub status: SubjectStatus,
}

/// Classify one obtained value against a pass mark.
///
/// The obtained value arrives as JSON and may be a number or a string; the
/// absence marker compares case-insensitively. Anything that is neither the
/// marker, blank (when `treat_blank_as_absent`), nor a finite number is an
/// `invalid_mark` error, never a Pass/Fail guess.
pub fn evaluate_subject(
    obtained: &serde_json::Value,
    pass_mark: f64,
    cfg: &GradingConfig,
) -> Result<SubjectOutcome, CalcError> {
    let numeric = match obtained {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Null => {
            return classify_text("", pass_mark, cfg);
        }
        serde_json::Value::String(s) => {
            return classify_text(s.trim(), pass_mark, cfg);
        }
        _ => {
            return Err(CalcError::new(
                "invalid_mark",
                "obtained must be a number or string",
            ));
        }
    };
    let Some(mark) = numeric.filter(|v| v.is_finite()) else {
        return Err(CalcError::new("invalid_mark", "Invalid obtained value"));
    };
    Ok(SubjectOutcome {
        numeric_mark: mark,
        status: pass_or_fail(mark, pass_mark),
    })
}

fn classify_text(
    trimmed: &str,
    pass_mark: f64,
    cfg: &GradingConfig,
) -> Result<SubjectOutcome, CalcError> {
    if !trimmed.is_empty() && trimmed.eq_ignore_ascii_case(&cfg.absence_marker) {
        return Ok(SubjectOutcome {
            numeric_mark: 0.0,
            status: SubjectStatus::Absent,
        });
    }
    if trimmed.is_empty() {
        if cfg.treat_blank_as_absent {
            return Ok(SubjectOutcome {
                numeric_mark: 0.0,
                status: SubjectStatus::Absent,
            });
        }
        return Err(CalcError::new("invalid_mark", "Invalid obtained value"));
    }
    let Ok(mark) = trimmed.parse::<f64>() else {
        return Err(CalcError::new("invalid_mark", "Invalid obtained value"));
    };
    if !mark.is_finite() {
        return Err(CalcError::new("invalid_mark", "Invalid obtained value"));
    }
    Ok(SubjectOutcome {
        numeric_mark: mark,
        status: pass_or_fail(mark, pass_mark),
    })
}

fn pass_or_fail(mark: f64, pass_mark: f64) -> SubjectStatus {
    if mark >= pass_mark {
        SubjectStatus::Pass
    } else {
        SubjectStatus::Fail
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSpec {
    #[serde(default)]
    pub subject_id: Option<String>,
    pub subject_name: String,
    pub obtained: serde_json::Value,
    pub max_marks: f64,
    pub pass_mark: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermInput {
    pub term: i64,
    pub subjects: Vec<SubjectSpec>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub subject_name: String,
    pub max_marks: f64,
    pub pass_mark: f64,
    pub numeric_mark: f64,
    pub status: SubjectStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermResult {
    pub term: i64,
    pub subjects: Vec<SubjectResult>,
    pub term_total: f64,
    pub term_max_total: f64,
    pub term_percent: f64,
    pub statuses: Vec<SubjectStatus>,
}

fn evaluate_term_subject(spec: &SubjectSpec, cfg: &GradingConfig) -> Result<SubjectResult, CalcError> {
    if spec.max_marks <= 0.0 {
        return Err(CalcError::new("bad_params", "maxMarks must be positive")
            .with_details(serde_json::json!({ "subjectName": spec.subject_name })));
    }
    if spec.pass_mark < 0.0 || spec.pass_mark > spec.max_marks {
        return Err(
            CalcError::new("bad_params", "passMark must be between 0 and maxMarks")
                .with_details(serde_json::json!({ "subjectName": spec.subject_name })),
        );
    }
    let outcome = evaluate_subject(&spec.obtained, spec.pass_mark, cfg)
        .map_err(|e| e.with_details(serde_json::json!({ "subjectName": spec.subject_name })))?;
    Ok(SubjectResult {
        subject_id: spec.subject_id.clone(),
        subject_name: spec.subject_name.clone(),
        max_marks: spec.max_marks,
        pass_mark: spec.pass_mark,
        numeric_mark: outcome.numeric_mark,
        status: outcome.status,
    })
}

/// Roll up one term's subject results, preserving subject order.
/// An empty subject list yields all-zero totals, never NaN.
pub fn aggregate_term(term: i64, subjects: Vec<SubjectResult>, cfg: &GradingConfig) -> TermResult {
    let term_total: f64 = subjects.iter().map(|s| s.numeric_mark).sum();
    let term_max_total: f64 = subjects.iter().map(|s| s.max_marks).sum();
    let term_percent = if term_max_total > 0.0 {
        round_half_up(100.0 * term_total / term_max_total, cfg.percent_decimals)
    } else {
        0.0
    };
    let statuses = subjects.iter().map(|s| s.status).collect();
    TermResult {
        term,
        subjects,
        term_total,
        term_max_total,
        term_percent,
        statuses,
    }
}

/// Final status from the last term's subject statuses.
///
/// Rule order is load-bearing; these are checked first to last and the first
/// match wins, independent of any percentage.
fn final_status_for(statuses: &[SubjectStatus]) -> SubjectStatus {
    let absent_count = statuses
        .iter()
        .filter(|s| **s == SubjectStatus::Absent)
        .count();
    let fail_count = statuses
        .iter()
        .filter(|s| **s == SubjectStatus::Fail)
        .count();

    if absent_count >= 4 {
        return SubjectStatus::Absent;
    }
    if absent_count == 2 || absent_count == 3 {
        return SubjectStatus::Fail;
    }
    if fail_count >= 2 {
        return SubjectStatus::Fail;
    }
    if fail_count == 1 && absent_count == 1 {
        return SubjectStatus::Fail;
    }
    SubjectStatus::Pass
}

/// Percentage to grade band; bands are inclusive of their stated minimum.
pub fn grade_band(percent: f64) -> &'static str {
    if percent >= 80.0 {
        "A+"
    } else if percent >= 70.0 {
        "A"
    } else if percent >= 60.0 {
        "B"
    } else if percent >= 50.0 {
        "C"
    } else if percent >= 40.0 {
        "D"
    } else {
        "F"
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub student_id: String,
    pub name: String,
    #[serde(default)]
    pub roll: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentOutcome {
    pub student_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub terms: Vec<TermResult>,
    pub combined_t2: f64,
    pub final_aggregate: f64,
    pub final_percent: f64,
    pub final_grade: String,
    pub final_status: SubjectStatus,
    pub promoted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_label: Option<String>,
}

/// Evaluate every subject, aggregate every term, and resolve the final
/// outcome for one student.
///
/// Quirks carried over from the original grading sheet, on purpose:
/// `finalAggregate` always divides by 3 (a one- or two-term year is deflated
/// by the missing terms counting as 0), and `finalPercent` always uses term
/// 1's max-marks total as its denominator even if later terms differ.
pub fn compute_student_outcome(
    student: StudentInfo,
    terms: &[TermInput],
    cfg: &GradingConfig,
) -> Result<StudentOutcome, CalcError> {
    if terms.is_empty() {
        return Err(CalcError::new("bad_params", "termsData must not be empty")
            .with_details(serde_json::json!({ "studentId": student.student_id })));
    }

    let mut term_results: Vec<TermResult> = Vec::with_capacity(terms.len());
    for t in terms {
        if t.subjects.is_empty() {
            return Err(CalcError::new("bad_params", "term has no subjects")
                .with_details(serde_json::json!({
                    "studentId": student.student_id,
                    "term": t.term,
                })));
        }
        let mut subjects = Vec::with_capacity(t.subjects.len());
        for spec in &t.subjects {
            subjects.push(evaluate_term_subject(spec, cfg)?);
        }
        term_results.push(aggregate_term(t.term, subjects, cfg));
    }

    let total = |i: usize| term_results.get(i).map(|t| t.term_total).unwrap_or(0.0);
    let combined_t2 = round_half_up((total(0) + total(1)) / 2.0, 2);
    let final_aggregate = round_half_up((total(0) + total(1) + total(2)) / 3.0, 2);
    let term1_max = term_results[0].term_max_total;
    let final_percent = if term1_max > 0.0 {
        round_half_up(100.0 * final_aggregate / term1_max, 2)
    } else {
        0.0
    };

    let last_statuses = &term_results[term_results.len() - 1].statuses;
    let final_status = final_status_for(last_statuses);
    let final_grade = grade_band(final_percent).to_string();
    let promoted =
        final_status == SubjectStatus::Pass && final_percent >= cfg.promotion_threshold_percent;

    Ok(StudentOutcome {
        student_id: student.student_id,
        name: student.name,
        roll: student.roll,
        class_name: student.class_name,
        terms: term_results,
        combined_t2,
        final_aggregate,
        final_percent,
        final_grade,
        final_status,
        promoted,
        rank: None,
        rank_label: None,
    })
}

/// Ordinal label with the 11/12/13 exception, repeating per hundred.
pub fn ordinal_label(n: i64) -> String {
    let suffix = match n % 100 {
        11 | 12 | 13 => "th",
        _ => match n % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    };
    format!("{}{}", n, suffix)
}

/// Competition ranking over the already-rounded final aggregate.
///
/// Sorted descending by aggregate, ties broken by ascending name. Exactly
/// equal aggregates share a rank; the next distinct value takes its 1-based
/// sorted position, so ties leave gaps.
pub fn rank_cohort(mut students: Vec<StudentOutcome>) -> Vec<StudentOutcome> {
    students.sort_by(|a, b| {
        b.final_aggregate
            .partial_cmp(&a.final_aggregate)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut prev_aggregate = f64::NAN;
    let mut prev_rank = 0_i64;
    for (i, s) in students.iter_mut().enumerate() {
        let rank = if i > 0 && s.final_aggregate == prev_aggregate {
            prev_rank
        } else {
            (i as i64) + 1
        };
        prev_aggregate = s.final_aggregate;
        prev_rank = rank;
        s.rank = Some(rank);
        s.rank_label = Some(ordinal_label(rank));
    }
    students
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub total_students: usize,
    pub absent_students: usize,
    pub present_students: usize,
    pub pass_count: usize,
    pub fail_count: usize,
    pub pass_percentage: f64,
    pub year_pass_percent: f64,
}

/// Class-level pass/fail/absence tallies over resolved outcomes.
pub fn summarize_class(students: &[StudentOutcome]) -> ClassSummary {
    let total_students = students.len();
    let absent_students = students
        .iter()
        .filter(|s| s.final_status == SubjectStatus::Absent)
        .count();
    let present_students = total_students - absent_students;
    let pass_count = students
        .iter()
        .filter(|s| s.final_status == SubjectStatus::Pass)
        .count();
    let fail_count = present_students - pass_count;
    let pass_percentage = if present_students > 0 {
        round_half_up(100.0 * (pass_count as f64) / (present_students as f64), 2)
    } else {
        0.0
    };
    ClassSummary {
        total_students,
        absent_students,
        present_students,
        pass_count,
        fail_count,
        pass_percentage,
        // Term-weighted year percentage is a known simplification.
        year_pass_percent: pass_percentage,
    }
}
