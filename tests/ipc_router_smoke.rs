use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

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

fn roundtrip(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    raw: &str,
) -> serde_json::Value {
    writeln!(stdin, "{}", raw).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

#[test]
fn router_basics() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    // health works without a workspace.
    let resp = roundtrip(
        &mut stdin,
        &mut reader,
        &json!({ "id": "1", "method": "health", "params": {} }).to_string(),
    );
    assert_eq!(resp["ok"], json!(true));
    assert_eq!(resp["result"]["version"], json!(env!("CARGO_PKG_VERSION")));
    assert_eq!(resp["result"]["workspacePath"], json!(null));

    // Unknown methods fall through to the not_implemented catch-all.
    let resp = roundtrip(
        &mut stdin,
        &mut reader,
        &json!({ "id": "2", "method": "reports.yearbook", "params": {} }).to_string(),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("not_implemented"));

    // Write operations need a workspace first.
    let resp = roundtrip(
        &mut stdin,
        &mut reader,
        &json!({ "id": "3", "method": "classes.create", "params": { "name": "Grade 2A" } })
            .to_string(),
    );
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("no_workspace"));

    // A line that is not JSON gets an id-less bad_json reply, and the
    // daemon keeps serving afterwards.
    let resp = roundtrip(&mut stdin, &mut reader, "this is not json");
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("bad_json"));

    let resp = roundtrip(
        &mut stdin,
        &mut reader,
        &json!({ "id": "4", "method": "health", "params": {} }).to_string(),
    );
    assert_eq!(resp["ok"], json!(true));

    // Closing stdin shuts the daemon down cleanly.
    drop(stdin);
    let status = child.wait().expect("wait for child");
    assert!(status.success());
}
