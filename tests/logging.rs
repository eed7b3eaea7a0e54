#![cfg(not(target_arch = "wasm32"))]

use livebind::error::transport_error;
use livebind::logger::{set_user_log_handler, LogLevel, LogRecord};
use livebind::query::MemoryTransport;
use livebind::Session;
use serde_json::json;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

#[test]
fn subscription_problems_are_logged() {
    let records: Arc<Mutex<Vec<LogRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    set_user_log_handler(Some(Arc::new(move |record: LogRecord| {
        sink.lock().unwrap().push(record);
    })));

    let transport = MemoryTransport::new();
    transport.set_rows("tasks", vec![json!({"_id": 1}), json!({"title": "no id"})]);
    transport.set_warnings(vec!["index missing".into()]);
    let session = Session::new(Rc::new(transport.clone()));
    let rows = session
        .run_until(session.collection("tasks").fetch().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(rows.len(), 1);

    transport.fail_with(Some(transport_error("backend offline")));
    let failed = session
        .run_until(session.collection("notes").fetch().unwrap())
        .unwrap();
    assert!(failed.is_err());

    transport.fail_with(None);
    transport.fail_removals_with(Some(transport_error("already gone")));
    let tasks = session.collection("tasks");
    let registration = tasks.on(|_| {});
    session.run_until_stalled().unwrap();
    drop(registration);
    session.run_until_stalled().unwrap();

    set_user_log_handler(None);
    let records = records.lock().unwrap();
    let find = |logger: &str, level: LogLevel, needle: &str| {
        records.iter().any(|record| {
            record.logger == logger && record.level == level && record.message.contains(needle)
        })
    };
    assert!(find("@livebind/query", LogLevel::Warn, "index missing"));
    assert!(find("@livebind/store", LogLevel::Error, "`_id`"));
    assert!(find("@livebind/query", LogLevel::Error, "backend offline"));
    assert!(find("@livebind/query", LogLevel::Warn, "already gone"));
}
