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
    let exe = env!("CARGO_BIN_EXE_marksheetd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("MARKSHEETD_WORKSPACE")
        .spawn()
        .expect("spawn marksheetd");
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
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn open_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
) -> PathBuf {
    let workspace = temp_dir(prefix);
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    workspace
}

#[test]
fn marks_update_and_analytics_follow_stored_scores() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, "marksheet-records-marks");

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "registerNo": "R1", "name": "One", "email": "one@example.edu" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "marks.upload",
        json!([{ "Register Number": "R1", "Maths": 45, "Physics": 92, "English": 76 }]),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "marks.listForStudent",
        json!({ "email": "ONE@example.edu" }),
    );
    assert_eq!(listed["student"]["registerNo"], "R1");
    let marks = listed["marks"].as_array().expect("marks").clone();
    let subjects: Vec<&str> = marks.iter().filter_map(|m| m["subject"].as_str()).collect();
    assert_eq!(subjects, vec!["English", "Maths", "Physics"]);
    let maths = marks
        .iter()
        .find(|m| m["subject"] == "Maths")
        .expect("maths mark");
    assert_eq!(maths["band"], "F");

    let maths_id = maths["id"].as_str().expect("mark id").to_string();
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "marks.update",
        json!({ "markId": maths_id, "scored": 95 }),
    );
    assert_eq!(updated["mark"]["scored"], 95.0);

    let analytics = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "marks.analytics",
        json!({ "registerNo": "R1" }),
    );
    let overview = &analytics["overview"];
    assert_eq!(overview["subjectCount"], 3);
    assert_eq!(overview["topSubject"], "Maths");
    // (95 + 92 + 76) / 3 = 87.666..
    assert_eq!(overview["averagePercent"], 87.7);

    let missing = request(
        &mut stdin,
        &mut reader,
        "6",
        "marks.update",
        json!({ "markId": "no-such-mark", "scored": 10 }),
    );
    assert_eq!(error_code(&missing), "not_found");

    let negative = request(
        &mut stdin,
        &mut reader,
        "7",
        "marks.update",
        json!({ "markId": maths_id, "scored": -3 }),
    );
    assert_eq!(error_code(&negative), "bad_params");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn students_are_unique_and_lockable() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, "marksheet-records-students");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "registerNo": " R2 ", "name": "Two" }),
    );
    let student_id = created["student"]["id"].as_str().expect("id").to_string();
    assert_eq!(created["student"]["registerNo"], "R2");
    assert_eq!(created["student"]["profileLocked"], false);

    let dup = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "registerNo": "R2", "name": "Other" }),
    );
    assert_eq!(error_code(&dup), "conflict");

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.setLocked",
        json!({ "studentId": student_id, "locked": true }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(listed["students"][0]["profileLocked"], true);

    let unknown = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.setLocked",
        json!({ "studentId": "ghost", "locked": false }),
    );
    assert_eq!(error_code(&unknown), "not_found");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn circulars_list_newest_first() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let before = request_ok(&mut stdin, &mut reader, "0", "circulars.list", json!({}));
    assert_eq!(before["circulars"], json!([]));

    open_workspace(&mut stdin, &mut reader, "marksheet-records-circulars");

    let missing = request(
        &mut stdin,
        &mut reader,
        "1",
        "circulars.create",
        json!({ "title": "Exam week", "content": "   " }),
    );
    assert_eq!(error_code(&missing), "bad_params");

    for (i, title) in ["First", "Second", "Third"].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "circulars.create",
            json!({ "title": title, "content": "Body", "author": "office@example.edu" }),
        );
    }
    let listed = request_ok(&mut stdin, &mut reader, "2", "circulars.list", json!({}));
    let titles: Vec<&str> = listed["circulars"]
        .as_array()
        .expect("circulars")
        .iter()
        .filter_map(|c| c["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["Third", "Second", "First"]);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn timetable_groups_by_weekday_and_sorts_periods() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, "marksheet-records-timetable");

    for (i, (day, period, subject)) in [
        ("wednesday", 2, "Chemistry"),
        ("Monday", 2, "Physics"),
        ("MONDAY", 1, "Maths"),
    ]
    .iter()
    .enumerate()
    {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("t{}", i),
            "timetable.upsert",
            json!({ "day": day, "period": period, "subject": subject, "room": "B-101" }),
        );
    }

    let bad_day = request(
        &mut stdin,
        &mut reader,
        "1",
        "timetable.upsert",
        json!({ "day": "Funday", "period": 1, "subject": "Art" }),
    );
    assert_eq!(error_code(&bad_day), "bad_params");

    let got = request_ok(&mut stdin, &mut reader, "2", "timetable.get", json!({}));
    let days = got["days"].as_array().expect("days");
    assert_eq!(days.len(), 2);
    assert_eq!(days[0]["day"], "Monday");
    assert_eq!(days[0]["entries"][0]["subject"], "Maths");
    assert_eq!(days[0]["entries"][1]["subject"], "Physics");
    assert_eq!(days[1]["day"], "Wednesday");

    let entry_id = days[1]["entries"][0]["id"].as_str().expect("id").to_string();
    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "timetable.upsert",
        json!({ "id": entry_id, "day": "Monday", "period": 3, "subject": "Chemistry" }),
    );
    assert_eq!(moved["entry"]["day"], "Monday");

    let got = request_ok(&mut stdin, &mut reader, "4", "timetable.get", json!({}));
    let days = got["days"].as_array().expect("days");
    assert_eq!(days.len(), 1);
    assert_eq!(days[0]["entries"].as_array().expect("entries").len(), 3);

    drop(stdin);
    let _ = child.wait();
}
