mod backup;
mod db;
mod grading;
mod ipc;
mod payroll;

use std::io::{self, BufRead, Write};

/// One request per line in, one response per line out, flushed immediately
/// so the supervising process never blocks on a buffered reply.
fn serve(state: &mut ipc::AppState, input: impl BufRead, mut output: impl Write) {
    for line in input.lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back on an unparseable line.
                let _ = writeln!(
                    output,
                    "{{\"ok\":false,\"error\":{{\"code\":\"bad_json\",\"message\":\"{}\"}}}}",
                    e
                );
                let _ = output.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(state, req);
        let _ = writeln!(
            output,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = output.flush();
    }
}

fn main() {
    let mut state = ipc::AppState::new();
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(&mut state, stdin.lock(), stdout.lock());
}
