//! Sandbox scheduling, result delivery, messaging and script fetching.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value};
use url::Url;

use difc::kernel::{
    CompartmentState, EvalScope, FetchError, Handler, Monitor, MonitorError, Outcome,
    ScriptEngine, ScriptError,
};
use difc::lattice::{Label, Principal};
use difc::scenario::LiteralEngine;

fn principal(uri: &str) -> Principal {
    Principal::parse(uri).expect("valid principal")
}

fn label(uri: &str) -> Label {
    Label::from_principal(principal(uri))
}

fn recorder() -> (Rc<RefCell<Vec<Value>>>, Handler) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    (seen, Box::new(move |v: &Value| sink.borrow_mut().push(v.clone())))
}

/// Calls `done` no matter where it runs.
struct AlwaysDone;

impl ScriptEngine for AlwaysDone {
    fn evaluate(&mut self, _source: &str, scope: &mut EvalScope<'_>) -> Result<Value, ScriptError> {
        scope.done(Value::Null)?;
        Ok(Value::Null)
    }
}

fn setup() -> (Monitor, difc::kernel::CompartmentId) {
    let mut monitor = Monitor::new();
    let caller = monitor.register(principal("https://app.example"));
    (monitor, caller)
}

#[test]
fn schedule_posts_result_and_raises_label() {
    let (mut monitor, caller) = setup();
    let handle = monitor
        .create_sandbox(caller, Some(&label("https://a.com")), None)
        .expect("sandbox");
    assert!(monitor.is_clean(handle).expect("sandbox"));

    monitor
        .schedule(caller, handle, r#"{"done": 42}"#, &mut LiteralEngine)
        .expect("schedule allowed");

    assert_eq!(
        monitor.sandbox_result(handle).expect("sandbox"),
        Some(Outcome::Value(json!(42)))
    );
    assert!(!monitor.is_clean(handle).expect("sandbox"));
    let sandbox = monitor.sandbox_compartment(handle).expect("compartment");
    assert_eq!(monitor.privacy_label(sandbox).expect("label"), label("https://a.com"));
}

#[test]
fn on_done_floats_caller_and_delivers() {
    let (mut monitor, caller) = setup();
    let handle = monitor
        .create_sandbox(caller, Some(&label("https://a.com")), None)
        .expect("sandbox");
    monitor
        .schedule(caller, handle, r#"{"done": "secret"}"#, &mut LiteralEngine)
        .expect("schedule allowed");

    let (seen, handler) = recorder();
    monitor
        .on_done(caller, handle, handler, None)
        .expect("caller may read");

    assert_eq!(*seen.borrow(), vec![json!("secret")]);
    assert_eq!(monitor.privacy_label(caller).expect("label"), label("https://a.com"));
}

#[test]
fn handlers_registered_first_get_the_result_once() {
    let (mut monitor, caller) = setup();
    let handle = monitor.create_sandbox(caller, None, None).expect("sandbox");

    let (seen, handler) = recorder();
    monitor
        .on_done(caller, handle, handler, None)
        .expect("caller may read");
    assert!(seen.borrow().is_empty());

    monitor
        .schedule(caller, handle, r#"{"done": 1}"#, &mut LiteralEngine)
        .expect("schedule allowed");
    assert_eq!(*seen.borrow(), vec![json!(1)]);
}

#[test]
fn on_done_outside_caller_clearance_is_refused() {
    let mut monitor = Monitor::new();
    let caller = monitor.insert(
        CompartmentState::sandbox_mode(principal("https://app.example"))
            .with_clearance(Some(label("https://b.com")), None),
    );
    let handle = monitor
        .create_sandbox(caller, Some(&label("https://a.com")), None)
        .expect("sandbox");

    let (seen, handler) = recorder();
    let err = monitor
        .on_done(caller, handle, handler, None)
        .expect_err("read refused");
    assert!(matches!(err, MonitorError::SubsumptionDenied(_)));
    assert!(seen.borrow().is_empty());
    assert!(monitor.privacy_label(caller).expect("label").is_empty());
}

#[test]
fn cannot_schedule_into_less_sensitive_sandbox() {
    let mut monitor = Monitor::new();
    let caller = monitor.insert(
        CompartmentState::sandbox_mode(principal("https://app.example"))
            .with_privacy(label("https://a.com")),
    );
    let handle = monitor
        .create_sandbox(caller, Some(&Label::new()), None)
        .expect("sandbox");

    let err = monitor
        .schedule(caller, handle, r#"{"done": 1}"#, &mut LiteralEngine)
        .expect_err("would leak");
    assert!(matches!(err, MonitorError::SubsumptionDenied(_)));
    assert_eq!(monitor.sandbox_result(handle).expect("sandbox"), None);
}

#[test]
fn script_errors_become_error_results() {
    let (mut monitor, caller) = setup();
    let handle = monitor.create_sandbox(caller, None, None).expect("sandbox");
    monitor
        .schedule(caller, handle, r#"{"throw": "boom"}"#, &mut LiteralEngine)
        .expect("errors are results");

    let result = monitor.sandbox_result(handle).expect("sandbox").expect("result");
    assert!(result.is_error());

    let (ok_seen, on_success) = recorder();
    let (err_seen, on_error) = recorder();
    monitor
        .on_done(caller, handle, on_success, Some(on_error))
        .expect("caller may read");
    assert!(ok_seen.borrow().is_empty());
    assert_eq!(err_seen.borrow().len(), 1);
    let message = err_seen.borrow()[0].as_str().map(str::to_owned);
    assert!(message.is_some_and(|m| m.contains("boom")));
}

#[test]
fn error_result_waits_for_error_handler() {
    let (mut monitor, caller) = setup();
    let handle = monitor.create_sandbox(caller, None, None).expect("sandbox");
    monitor
        .schedule(caller, handle, r#"{"throw": "boom"}"#, &mut LiteralEngine)
        .expect("errors are results");

    let (seen, handler) = recorder();
    monitor
        .on_done(caller, handle, handler, None)
        .expect("caller may read");
    assert!(seen.borrow().is_empty());
}

#[test]
fn sandbox_cannot_read_above_its_label() {
    let (mut monitor, caller) = setup();
    let handle = monitor
        .create_sandbox(caller, Some(&label("https://a.com")), None)
        .expect("sandbox");

    monitor
        .schedule(
            caller,
            handle,
            r#"{"read": {"privacy": [["https://b.com"]]}, "done": 1}"#,
            &mut LiteralEngine,
        )
        .expect("errors are results");

    let result = monitor.sandbox_result(handle).expect("sandbox").expect("result");
    assert!(result.is_error());
}

#[test]
fn sandbox_reads_within_its_label() {
    let (mut monitor, caller) = setup();
    let handle = monitor
        .create_sandbox(caller, Some(&label("https://a.com")), None)
        .expect("sandbox");

    monitor
        .schedule(
            caller,
            handle,
            r#"{"read": {"privacy": [["https://a.com"]]}, "done": 1}"#,
            &mut LiteralEngine,
        )
        .expect("schedule allowed");

    assert_eq!(
        monitor.sandbox_result(handle).expect("sandbox"),
        Some(Outcome::Value(json!(1)))
    );
}

#[test]
fn posted_message_is_readable_inside() {
    let (mut monitor, caller) = setup();
    let handle = monitor
        .create_sandbox(caller, Some(&label("https://a.com")), None)
        .expect("sandbox");

    monitor
        .post_message(caller, handle, json!({"hello": "world"}))
        .expect("message allowed");
    monitor
        .schedule(caller, handle, r#"{"echo_message": true}"#, &mut LiteralEngine)
        .expect("schedule allowed");

    assert_eq!(
        monitor.sandbox_result(handle).expect("sandbox"),
        Some(Outcome::Value(json!({"hello": "world"})))
    );
}

#[test]
fn message_into_less_sensitive_sandbox_is_refused() {
    let mut monitor = Monitor::new();
    let caller = monitor.insert(
        CompartmentState::sandbox_mode(principal("https://app.example"))
            .with_privacy(label("https://a.com")),
    );
    let handle = monitor
        .create_sandbox(caller, Some(&Label::new()), None)
        .expect("sandbox");

    let err = monitor
        .post_message(caller, handle, json!("leak"))
        .expect_err("would leak");
    assert!(matches!(err, MonitorError::SubsumptionDenied(_)));
}

#[test]
fn schedule_uri_fetches_then_runs() {
    let (mut monitor, caller) = setup();
    let handle = monitor.create_sandbox(caller, None, None).expect("sandbox");
    let mut requested = Vec::new();
    let mut fetcher = |url: &Url| -> Result<String, FetchError> {
        requested.push(url.to_string());
        Ok(r#"{"done": "fetched"}"#.to_owned())
    };

    monitor
        .schedule_uri(
            caller,
            handle,
            "https://cdn.example/lib.js",
            &mut fetcher,
            &mut LiteralEngine,
        )
        .expect("fetch allowed");

    assert_eq!(requested, vec!["https://cdn.example/lib.js".to_owned()]);
    assert_eq!(
        monitor.sandbox_result(handle).expect("sandbox"),
        Some(Outcome::Value(json!("fetched")))
    );
}

#[test]
fn fetch_that_would_leak_is_refused() {
    let mut monitor = Monitor::new();
    let caller = monitor.insert(
        CompartmentState::sandbox_mode(principal("https://app.example"))
            .with_privacy(label("https://a.com")),
    );
    let handle = monitor
        .create_sandbox(caller, None, None)
        .expect("sandbox");
    let mut calls = 0_u32;
    let mut fetcher = |_url: &Url| -> Result<String, FetchError> {
        calls = calls.saturating_add(1);
        Ok(String::new())
    };

    let err = monitor
        .schedule_uri(
            caller,
            handle,
            "https://cdn.example/lib.js",
            &mut fetcher,
            &mut LiteralEngine,
        )
        .expect_err("would leak");
    assert!(matches!(err, MonitorError::SubsumptionDenied(_)));
    assert_eq!(calls, 0);
}

#[test]
fn fetch_to_the_labelled_origin_is_allowed() {
    let mut monitor = Monitor::new();
    let caller = monitor.insert(
        CompartmentState::sandbox_mode(principal("https://app.example"))
            .with_privacy(label("https://a.com")),
    );
    let mut fetcher = |_url: &Url| -> Result<String, FetchError> { Ok("7".to_owned()) };

    let value = monitor
        .import(caller, "https://a.com/lib.js", &mut fetcher, &mut LiteralEngine)
        .expect("same origin as label");
    assert_eq!(value, json!(7));
}

#[test]
fn fetch_rejects_bad_urls_and_schemes() {
    let (mut monitor, caller) = setup();
    let mut fetcher = |_url: &Url| -> Result<String, FetchError> { Ok(String::new()) };

    let err = monitor
        .import(caller, "ftp://files.example/x.js", &mut fetcher, &mut LiteralEngine)
        .expect_err("scheme");
    assert!(matches!(
        err,
        MonitorError::Fetch(FetchError::UnsupportedScheme { .. })
    ));

    let err = monitor
        .import(caller, "not a url", &mut fetcher, &mut LiteralEngine)
        .expect_err("url");
    assert!(matches!(err, MonitorError::Fetch(FetchError::InvalidUrl { .. })));
}

#[test]
fn transport_failure_is_reported() {
    let (mut monitor, caller) = setup();
    let mut fetcher = |url: &Url| -> Result<String, FetchError> {
        Err(FetchError::Failed {
            url: url.to_string(),
            reason: "connection reset".to_owned(),
        })
    };

    let err = monitor
        .import(caller, "https://cdn.example/x.js", &mut fetcher, &mut LiteralEngine)
        .expect_err("transport");
    assert!(matches!(err, MonitorError::Fetch(FetchError::Failed { .. })));
}

#[test]
fn import_surfaces_thrown_errors() {
    let (mut monitor, caller) = setup();
    let mut fetcher =
        |_url: &Url| -> Result<String, FetchError> { Ok(r#"{"throw": "bad"}"#.to_owned()) };

    let err = monitor
        .import(caller, "https://cdn.example/x.js", &mut fetcher, &mut LiteralEngine)
        .expect_err("thrown");
    assert!(matches!(err, MonitorError::ScriptFailed(ref m) if m == "bad"));
}

#[test]
fn done_outside_a_sandbox_is_invalid() {
    let (mut monitor, caller) = setup();
    let mut fetcher = |_url: &Url| -> Result<String, FetchError> { Ok(String::new()) };

    let err = monitor
        .import(caller, "https://cdn.example/x.js", &mut fetcher, &mut AlwaysDone)
        .expect_err("no sandbox");
    assert!(matches!(err, MonitorError::InvalidState(_)));
}
