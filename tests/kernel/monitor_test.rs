//! Label-mutation API and compartment bookkeeping.

use difc::kernel::{CompartmentState, Mode, Monitor, MonitorError, NetworkPolicy};
use difc::lattice::{Label, Principal};

fn principal(uri: &str) -> Principal {
    Principal::parse(uri).expect("valid principal")
}

fn label(uri: &str) -> Label {
    Label::from_principal(principal(uri))
}

#[test]
fn enabling_sandbox_mode_is_idempotent() {
    let mut monitor = Monitor::new();
    let id = monitor.register(principal("https://app.example"));
    assert!(!monitor.is_sandboxed(id).expect("state"));

    assert!(monitor.enable_sandbox(id).expect("state"));
    assert!(!monitor.enable_sandbox(id).expect("state"));
    assert!(monitor.is_sandbox_mode(id).expect("state"));
    assert!(!monitor.is_sandbox(id).expect("state"));

    let privileges = monitor.privileges(id).expect("privileges");
    assert!(privileges
        .as_label()
        .subsumes(&label("https://app.example")));
}

#[test]
fn privacy_label_can_be_raised() {
    let mut monitor = Monitor::new();
    let id = monitor.register(principal("https://app.example"));

    assert!(monitor
        .set_privacy_label(id, &label("https://a.com"))
        .expect("state"));
    assert_eq!(monitor.privacy_label(id).expect("label"), label("https://a.com"));

    let policy = monitor.perimeter(id).expect("perimeter re-applied");
    assert_eq!(
        policy.network,
        NetworkPolicy::Origins(vec!["https://a.com".to_owned()])
    );
}

#[test]
fn privacy_label_cannot_be_lowered_without_privilege() {
    let mut monitor = Monitor::new();
    let id = monitor.register(principal("https://app.example"));
    monitor
        .set_privacy_label(id, &label("https://a.com"))
        .expect("state");

    assert!(!monitor.set_privacy_label(id, &Label::new()).expect("state"));
    assert_eq!(monitor.privacy_label(id).expect("label"), label("https://a.com"));
}

#[test]
fn privilege_allows_declassification() {
    let mut monitor = Monitor::new();
    let id = monitor.register(principal("https://app.example"));
    monitor
        .set_privacy_label(id, &label("https://a.com"))
        .expect("state");
    monitor
        .grant_privilege(id, principal("https://a.com"))
        .expect("state");

    assert!(monitor.set_privacy_label(id, &Label::new()).expect("state"));
    assert!(monitor.privacy_label(id).expect("label").is_empty());
}

#[test]
fn privacy_label_stays_under_clearance() {
    let mut monitor = Monitor::new();
    let id = monitor.insert(
        CompartmentState::sandbox_mode(principal("https://app.example"))
            .with_clearance(Some(label("https://a.com")), None),
    );

    assert!(!monitor
        .set_privacy_label(id, &label("https://b.com"))
        .expect("state"));
    assert!(monitor
        .set_privacy_label(id, &label("https://a.com"))
        .expect("state"));
}

#[test]
fn trust_label_can_only_be_lowered() {
    let mut monitor = Monitor::new();
    let id = monitor.insert(
        CompartmentState::sandbox_mode(principal("https://app.example"))
            .with_trust(label("https://auditor.example")),
    );

    assert!(monitor.set_trust_label(id, &Label::new()).expect("state"));
    assert!(!monitor
        .set_trust_label(id, &label("https://auditor.example"))
        .expect("state"));
    assert!(monitor.trust_label(id).expect("label").is_empty());
}

#[test]
fn clearance_requires_sandbox_mode() {
    let mut monitor = Monitor::new();
    let id = monitor.register(principal("https://app.example"));

    let err = monitor
        .set_privacy_clearance(id, &label("https://a.com"))
        .expect_err("not in sandbox mode");
    assert!(matches!(err, MonitorError::InvalidState(_)));

    let err = monitor
        .set_trust_clearance(id, &Label::new())
        .expect_err("not in sandbox mode");
    assert!(matches!(err, MonitorError::InvalidState(_)));
}

#[test]
fn sandbox_clearance_is_fixed() {
    let mut monitor = Monitor::new();
    let caller = monitor.register(principal("https://app.example"));
    let handle = monitor
        .create_sandbox(caller, Some(&label("https://a.com")), None)
        .expect("sandbox");
    let sandbox = monitor.sandbox_compartment(handle).expect("compartment");

    let err = monitor
        .set_privacy_clearance(sandbox, &label("https://b.com"))
        .expect_err("sandbox");
    assert!(matches!(err, MonitorError::InvalidState(_)));
}

#[test]
fn privacy_clearance_can_only_be_lowered() {
    let mut monitor = Monitor::new();
    let id = monitor.register(principal("https://app.example"));
    monitor.enable_sandbox(id).expect("state");

    let both = Label::from_json(r#"[["https://a.com"],["https://b.com"]]"#).expect("label");
    assert!(monitor
        .set_privacy_clearance(id, &label("https://a.com"))
        .expect("state"));
    assert!(!monitor.set_privacy_clearance(id, &both).expect("state"));
    assert!(monitor.set_privacy_clearance(id, &Label::new()).expect("state"));
    assert_eq!(
        monitor.privacy_clearance(id).expect("clearance"),
        Some(Label::new())
    );
}

#[test]
fn privacy_clearance_must_cover_current_label() {
    let mut monitor = Monitor::new();
    let id = monitor.insert(
        CompartmentState::sandbox_mode(principal("https://app.example"))
            .with_privacy(label("https://a.com")),
    );

    assert!(!monitor
        .set_privacy_clearance(id, &label("https://b.com"))
        .expect("state"));
    assert!(monitor.privacy_clearance(id).expect("clearance").is_none());
}

#[test]
fn trust_clearance_can_only_be_raised() {
    let mut monitor = Monitor::new();
    let auditor = label("https://auditor.example");
    let id = monitor.insert(
        CompartmentState::sandbox_mode(principal("https://app.example")).with_trust(auditor.clone()),
    );

    assert!(monitor.set_trust_clearance(id, &auditor).expect("state"));
    assert!(!monitor.set_trust_clearance(id, &Label::new()).expect("state"));
    assert_eq!(monitor.trust_clearance(id).expect("clearance"), Some(auditor));
}

#[test]
fn json_initializer_conjoins_label() {
    let mut monitor = Monitor::new();
    let id = monitor.register(principal("https://app.example"));

    assert!(monitor.initialize_from_json(id, r#"[["https://a.com"]]"#));
    assert!(monitor.initialize_from_json(id, r#"[["https://b.com"]]"#));

    let expected = Label::from_json(r#"[["https://a.com"],["https://b.com"]]"#).expect("label");
    assert_eq!(monitor.privacy_label(id).expect("label"), expected);
}

#[test]
fn json_initializer_rejects_malformed_input() {
    let mut monitor = Monitor::new();
    let id = monitor.register(principal("https://app.example"));

    assert!(!monitor.initialize_from_json(id, "not json"));
    assert!(!monitor.initialize_from_json(id, "[[]]"));
    assert!(monitor.privacy_label(id).expect("label").is_empty());
}

#[test]
fn fresh_principal_is_granted() {
    let mut monitor = Monitor::new();
    let id = monitor.register(principal("https://app.example"));

    let minted = monitor.fresh_principal(id).expect("state");
    let privileges = monitor.privileges(id).expect("privileges");
    assert!(privileges
        .as_label()
        .subsumes(&Label::from_principal(minted)));
}

#[test]
fn removing_a_compartment_forgets_it() {
    let mut monitor = Monitor::new();
    let id = monitor.register(principal("https://app.example"));
    let removed = monitor.remove(id).expect("was registered");
    assert_eq!(removed.mode(), Mode::NotSandboxed);

    let err = monitor.privacy_label(id).expect_err("removed");
    assert!(matches!(err, MonitorError::UnknownCompartment(_)));
}

#[test]
fn removing_a_sandbox_compartment_drops_the_sandbox() {
    let mut monitor = Monitor::new();
    let caller = monitor.register(principal("https://app.example"));
    let handle = monitor.create_sandbox(caller, None, None).expect("sandbox");
    let sandbox = monitor.sandbox_compartment(handle).expect("compartment");

    monitor.remove(sandbox).expect("was registered");
    let err = monitor.sandbox_result(handle).expect_err("removed");
    assert!(matches!(err, MonitorError::UnknownSandbox(_)));
}
