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
    let exe = env!("CARGO_BIN_EXE_nbformsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn nbformsd");
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

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected an error response: {}",
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
}

fn login(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, username: &str) -> String {
    let result = request_ok(
        stdin,
        reader,
        "login",
        "auth.login",
        json!({ "username": username, "password": "pw" }),
    );
    result
        .get("apiKey")
        .and_then(|v| v.as_str())
        .expect("apiKey")
        .to_string()
}

fn submit(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    api_key: &str,
    notebook: &str,
    question: &str,
    answer: &str,
) {
    let _ = request_ok(
        stdin,
        reader,
        "submit",
        "responses.submit",
        json!({
            "apiKey": api_key,
            "notebook": notebook,
            "responses": [{ "identifier": question, "response": answer }]
        }),
    );
}

fn header(result: &serde_json::Value) -> Vec<String> {
    result
        .get("rows")
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .and_then(|row| row.as_array())
        .expect("header row")
        .iter()
        .map(|c| c.as_str().unwrap_or("").to_string())
        .collect()
}

#[test]
fn header_is_sorted_and_locks_suppress_columns_notebook_wide() {
    let workspace = temp_dir("nbforms-pivot");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ada = login(&mut stdin, &mut reader, "ada");
    let bob = login(&mut stdin, &mut reader, "bob");

    submit(&mut stdin, &mut reader, &ada, "hw01", "q2", "ada-2");
    submit(&mut stdin, &mut reader, &ada, "hw01", "q1", "ada-1");
    submit(&mut stdin, &mut reader, &bob, "hw01", "q1", "bob-1");

    // Requested out of order; header still sorts, with "user" first.
    let export = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "responses.export",
        json!({
            "notebook": "hw01",
            "questions": ["q2", "q1"],
            "identity": "plain"
        }),
    );
    assert_eq!(header(&export), vec!["user", "q1", "q2"]);

    // Ada locks q1; bob's q1 answer must disappear from default exports too.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "questions.setLocked",
        json!({ "notebook": "hw01", "identifier": "q1", "locked": true }),
    );

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "responses.export",
        json!({ "notebook": "hw01", "questions": ["q2", "q1"] }),
    );
    assert_eq!(header(&export), vec!["q2"]);

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "responses.export",
        json!({
            "notebook": "hw01",
            "questions": ["q2", "q1"],
            "overrideLocks": true
        }),
    );
    assert_eq!(header(&export), vec!["q1", "q2"]);

    // Lock everything: the export fails instead of emitting an empty table.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "questions.setLocked",
        json!({ "notebook": "hw01", "identifier": "q2", "locked": true }),
    );
    let failed = request(
        &mut stdin,
        &mut reader,
        "7",
        "responses.export",
        json!({ "notebook": "hw01" }),
    );
    assert_eq!(error_code(&failed), "empty_question_set");

    // Unlocking restores the column.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "questions.setLocked",
        json!({ "notebook": "hw01", "identifier": "q2", "locked": false }),
    );
    let export = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "responses.export",
        json!({ "notebook": "hw01" }),
    );
    assert_eq!(header(&export), vec!["q2"]);
}

#[test]
fn hash_identity_is_pseudonymous_and_stable() {
    let workspace = temp_dir("nbforms-hash");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ada = login(&mut stdin, &mut reader, "ada");
    submit(&mut stdin, &mut reader, &ada, "hw01", "q1", "a");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "responses.export",
        json!({ "notebook": "hw01", "identity": "hash" }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "responses.export",
        json!({ "notebook": "hw01", "identity": "hash" }),
    );

    let label = |result: &serde_json::Value| {
        result
            .get("rows")
            .and_then(|v| v.as_array())
            .and_then(|rows| rows.get(1))
            .and_then(|row| row.as_array())
            .and_then(|row| row.first())
            .and_then(|c| c.as_str())
            .expect("identity cell")
            .to_string()
    };
    let l1 = label(&first);
    let l2 = label(&second);
    assert_eq!(l1, l2, "pseudonym must be stable across exports");
    assert_eq!(l1.len(), 20);
    assert_ne!(l1, "ada");
}

#[test]
fn csv_export_renders_null_cells_empty() {
    let workspace = temp_dir("nbforms-csv");
    let out = workspace.join("export.csv");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let ada = login(&mut stdin, &mut reader, "ada");
    let bob = login(&mut stdin, &mut reader, "bob");
    submit(&mut stdin, &mut reader, &ada, "hw01", "q1", "a");
    submit(&mut stdin, &mut reader, &bob, "hw01", "q2", "b,with comma");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "responses.exportCsv",
        json!({
            "notebook": "hw01",
            "identity": "plain",
            "out": out.to_string_lossy()
        }),
    );

    let csv = std::fs::read_to_string(&out).expect("read csv");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "user,q1,q2");
    assert!(lines.contains(&"ada,a,"));
    assert!(lines.contains(&"bob,,\"b,with comma\""));
}
