//! Tests for `src/lattice/label.rs`, `role.rs` and `privilege.rs`.

use difc::lattice::{Label, LabelError, Principal, Privilege, Role};

fn role(uris: &[&str]) -> Role {
    Role::from_uris(uris.iter().copied()).expect("valid role")
}

fn label(clauses: &[&[&str]]) -> Label {
    Label::from_roles(clauses.iter().map(|c| role(c))).expect("valid label")
}

fn principal(uri: &str) -> Principal {
    Principal::parse(uri).expect("valid principal")
}

#[test]
fn wider_role_subsumes_narrower() {
    let ab = role(&["https://a.com", "https://b.com"]);
    let a = role(&["https://a.com"]);
    assert!(ab.subsumes(&a));
    assert!(!a.subsumes(&ab));
    assert!(a.subsumes(&a));
}

#[test]
fn role_or_is_idempotent() {
    let base = role(&["https://a.com"]);
    let once = base.clone().or(principal("https://b.com"));
    let twice = once.clone().or(principal("https://b.com"));
    assert_eq!(once, twice);
    assert_eq!(once.len(), 2);
}

#[test]
fn public_label_subsumes_only_public() {
    let public = Label::new();
    let a = label(&[&["https://a.com"]]);
    assert!(public.subsumes(&public));
    assert!(a.subsumes(&public));
    assert!(!public.subsumes(&a));
}

#[test]
fn privilege_discharges_matching_conjunct() {
    let public = Label::new();
    let a = label(&[&["https://a.com"]]);
    let privilege = Privilege::from_principal(principal("https://a.com"));

    assert!(!public.subsumes_with(&Privilege::empty(), &a));
    assert!(public.subsumes_with(&privilege, &a));
}

#[test]
fn and_covers_both_operands() {
    let a = label(&[&["https://a.com"]]);
    let b = label(&[&["https://b.com"]]);
    let joined = a.and(&b);
    assert_eq!(joined.roles().len(), 2);
    assert!(joined.subsumes(&a));
    assert!(joined.subsumes(&b));
}

#[test]
fn and_drops_redundant_roles() {
    let narrow = label(&[&["https://a.com"]]);
    let wide = label(&[&["https://a.com", "https://b.com"]]);
    let joined = narrow.and(&wide);
    assert_eq!(joined.roles().len(), 1);
    // the superset role survives, so the join still subsumes both sides
    assert_eq!(joined, wide);
    assert!(joined.subsumes(&narrow));
    assert!(joined.subsumes(&wide));
}

#[test]
fn and_is_order_independent() {
    let a = label(&[&["https://a.com"], &["alice"]]);
    let b = label(&[&["https://b.com"]]);
    assert_eq!(a.and(&b), b.and(&a));
}

#[test]
fn or_keeps_shared_principals() {
    let ab = label(&[&["https://a.com", "https://b.com"]]);
    let bc = label(&[&["https://b.com", "https://c.com"]]);
    let met = ab.or(&bc);
    assert_eq!(met, label(&[&["https://b.com"]]));
    assert!(ab.subsumes(&met));
    assert!(bc.subsumes(&met));
}

#[test]
fn or_of_disjoint_labels_is_public() {
    let a = label(&[&["https://a.com"]]);
    let b = label(&[&["https://b.com"]]);
    assert!(a.or(&b).is_empty());
}

#[test]
fn reduce_drops_roles_the_privilege_covers() {
    let mut l = label(&[&["https://a.com"], &["https://b.com"]]);
    l.reduce(&Privilege::from_principal(principal("https://a.com")));
    assert_eq!(l, label(&[&["https://b.com"]]));
}

#[test]
fn empty_role_is_rejected() {
    let err = Label::from_role(Role::new()).expect_err("empty role");
    assert_eq!(err, LabelError::EmptyRole);
}

#[test]
fn clone_does_not_alias_original() {
    let original = label(&[&["https://a.com"], &["https://b.com"]]);
    let mut copy = original.try_clone().expect("clone");
    copy.reduce(&Privilege::from_principal(principal("https://a.com")));
    copy = copy.and(&label(&[&["https://c.com"]]));

    assert_eq!(original, label(&[&["https://a.com"], &["https://b.com"]]));
    assert_ne!(original, copy);
}

#[test]
fn json_label_format() {
    let l = Label::from_json(r#"[["https://a.com/x","alice"],["https://b.com"]]"#)
        .expect("valid json label");
    assert_eq!(l.roles().len(), 2);
    assert_eq!(Label::from_json(&l.to_json()).expect("round trip"), l);
    assert_eq!(Label::new().to_json(), "[]");
}

#[test]
fn json_label_rejects_bad_shapes() {
    for bad in [r#"{}"#, r#"[[]]"#, r#"[[1]]"#, r#"["a"]"#, r#"[[""]]"#] {
        let err = Label::from_json(bad).expect_err(bad);
        assert!(matches!(err, LabelError::MalformedJson(_)), "{bad}: {err:?}");
    }
}

#[test]
fn display_forms() {
    assert_eq!(Label::new().to_string(), "Label()");
    let l = label(&[&["https://a.com"]]);
    assert!(l.to_string().starts_with("Label(Role("));
}

#[test]
fn privilege_combine_only_grows() {
    let mut privilege = Privilege::from_principal(principal("https://a.com"));
    let before = privilege.clone();
    privilege.combine(&Privilege::from_principal(principal("https://b.com")));
    assert!(privilege.subsumes(&before));
    assert!(!before.subsumes(&privilege));
}
