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
fn export_then_import_moves_a_workspace() {
    let source = temp_dir("schoold-backup-src");
    let target = temp_dir("schoold-backup-dst");
    let bundle = temp_dir("schoold-backup-bundle").join("school.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Grade 7B" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": class_id, "name": "Meera", "roll": "7" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.create",
        json!({ "name": "K. Menon", "employeeNo": "T-201" }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], json!("schoold-workspace-v1"));
    let digest = exported["dbSha256"].as_str().expect("dbSha256");
    assert_eq!(digest.len(), 64);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(bundle.exists());

    // A fresh workspace starts empty, then takes on the bundle's contents.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "workspace.select",
        json!({ "path": target.to_string_lossy() }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "7", "classes.list", json!({}));
    assert_eq!(listed["classes"].as_array().expect("classes").len(), 0);

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "backup.import",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        imported["bundleFormatDetected"],
        json!("schoold-workspace-v1")
    );

    let listed = request_ok(&mut stdin, &mut reader, "9", "classes.list", json!({}));
    let classes = listed["classes"].as_array().expect("classes");
    assert_eq!(classes.len(), 1);
    assert_eq!(classes[0]["name"], json!("Grade 7B"));
    assert_eq!(classes[0]["studentCount"], json!(1));

    let teachers = request_ok(&mut stdin, &mut reader, "10", "teachers.list", json!({}));
    assert_eq!(
        teachers["teachers"].as_array().expect("teachers")[0]["name"],
        json!("K. Menon")
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn import_rejects_garbage_and_keeps_the_workspace_usable() {
    let workspace = temp_dir("schoold-backup-bad");
    let garbage = workspace.join("not-a-bundle.zip");
    std::fs::write(&garbage, b"this is not a zip archive").expect("write garbage");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Grade 1A" }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "backup.import",
        json!({ "inPath": garbage.to_string_lossy() }),
    );
    assert_eq!(code, "backup_import_failed");

    // The failed import must not take the workspace down with it.
    let listed = request_ok(&mut stdin, &mut reader, "4", "classes.list", json!({}));
    let classes = listed["classes"].as_array().expect("classes");
    assert_eq!(classes.len(), 1);
    assert_eq!(classes[0]["name"], json!("Grade 1A"));

    drop(stdin);
    let _ = child.wait();
}
