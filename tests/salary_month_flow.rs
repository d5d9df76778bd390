use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().expect("error code").to_string()
}

#[test]
fn monthly_salary_with_late_forgiveness_and_approval_guard() {
    let workspace = temp_dir("schoold-salary-flow");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.create",
        json!({ "name": "R. Iyer", "employeeNo": "T-104" }),
    );
    let teacher_id = teacher["teacherId"].as_str().expect("teacherId").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "salaryConfig.save",
        json!({
            "teacherId": teacher_id,
            "basicMonthlySalary": 30000,
            "perDaySalary": 1000,
            "effectiveFrom": "2025-01-01"
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "rules.save",
        json!({
            "ruleName": "Late arrival",
            "ruleType": "late_coming",
            "conditionDescription": "Check-in after 09:00",
            "deductionType": "fixed_amount",
            "deductionValue": 100,
            "graceMinutes": 10,
            "maxLateCount": 3
        }),
    );

    // Five late punches at 15 minutes each, then five clean days.
    for (i, day) in (3..=7).enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("l{}", i),
            "attendance.record",
            json!({
                "teacherId": teacher_id,
                "date": format!("2025-03-{:02}", day),
                "checkInTime": "09:15",
                "checkOutTime": "16:00",
                "status": "late",
                "lateMinutes": 15
            }),
        );
    }
    for (i, day) in (10..=14).enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("p{}", i),
            "attendance.record",
            json!({
                "teacherId": teacher_id,
                "date": format!("2025-03-{:02}", day),
                "checkInTime": "08:55",
                "checkOutTime": "16:00",
                "status": "present"
            }),
        );
    }

    let calc = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "salary.calculateMonth",
        json!({ "teacherId": teacher_id, "month": 3, "year": 2025 }),
    );
    assert_eq!(calc["version"], json!(1));
    assert_eq!(calc["totalWorkingDays"], json!(10));
    assert_eq!(calc["presentDays"], json!(5));
    assert_eq!(calc["lateDays"], json!(5));
    assert_eq!(calc["totalDeductions"], json!(200.0));
    assert_eq!(calc["netSalary"], json!(29800.0));
    assert_eq!(calc["isApproved"], json!(false));

    // First three late arrivals are forgiven, the rest are charged.
    let late_amounts: Vec<f64> = calc["details"]
        .as_array()
        .expect("details")
        .iter()
        .filter(|d| d["status"] == json!("late"))
        .map(|d| d["deductionAmount"].as_f64().expect("amount"))
        .collect();
    assert_eq!(late_amounts, vec![0.0, 0.0, 0.0, 100.0, 100.0]);

    // A manually overridden day keeps its human-entered amount and reason.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "attendance.record",
        json!({
            "teacherId": teacher_id,
            "date": "2025-03-17",
            "status": "absent",
            "isManualOverride": true,
            "deductionAmount": 450.5,
            "deductionReason": "Unpaid leave sanctioned"
        }),
    );

    let calc = request_ok(
        &mut stdin,
        &mut reader,
        "22",
        "salary.calculateMonth",
        json!({ "teacherId": teacher_id, "month": 3, "year": 2025 }),
    );
    // Still unapproved, so the rerun replaces version 1 instead of stacking.
    assert_eq!(calc["version"], json!(1));
    assert_eq!(calc["totalWorkingDays"], json!(11));
    assert_eq!(calc["absentDays"], json!(1));
    assert_eq!(calc["totalDeductions"], json!(650.5));
    assert_eq!(calc["netSalary"], json!(29349.5));
    let override_day = calc["details"]
        .as_array()
        .expect("details")
        .iter()
        .find(|d| d["date"] == json!("2025-03-17"))
        .expect("override day present")
        .clone();
    assert_eq!(override_day["deductionAmount"], json!(450.5));
    assert_eq!(override_day["deductionReason"], json!("Unpaid leave sanctioned"));
    assert_eq!(override_day["manualOverride"], json!(true));
    let calc_id = calc["calculationId"].as_str().expect("calculationId").to_string();

    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "23",
        "salary.approve",
        json!({ "calculationId": calc_id }),
    );
    assert_eq!(approved["isApproved"], json!(true));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "24",
        "salary.approve",
        json!({ "calculationId": calc_id }),
    );
    assert_eq!(code, "already_approved");

    // Recalculating an approved month yields a fresh unapproved version.
    let recalc = request_ok(
        &mut stdin,
        &mut reader,
        "25",
        "salary.calculateMonth",
        json!({ "teacherId": teacher_id, "month": 3, "year": 2025 }),
    );
    assert_eq!(recalc["version"], json!(2));
    assert_eq!(recalc["isApproved"], json!(false));
    assert_eq!(recalc["netSalary"], json!(29349.5));

    let latest = request_ok(
        &mut stdin,
        &mut reader,
        "26",
        "salary.get",
        json!({ "teacherId": teacher_id, "month": 3, "year": 2025 }),
    );
    assert_eq!(latest["version"], json!(2));
    assert_eq!(latest["isApproved"], json!(false));
    assert_eq!(latest["details"].as_array().expect("details").len(), 11);

    // A teacher with no covering config fails alone, with the period named.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "27",
        "teachers.create",
        json!({ "name": "S. Rao" }),
    );
    let other_id = other["teacherId"].as_str().expect("teacherId");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "28",
        "salary.calculateMonth",
        json!({ "teacherId": other_id, "month": 3, "year": 2025 }),
    );
    assert_eq!(code, "no_salary_config");

    drop(stdin);
    let _ = child.wait();
}
