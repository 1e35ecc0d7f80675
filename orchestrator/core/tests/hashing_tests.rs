// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde_json::{json, Value};

use sintra_core::domain::hashing::{canonical_json, stable_hash};
use sintra_core::domain::plan::ExecutionPlan;

fn raw_plan() -> Value {
    json!({
        "execution_id": "exec-1",
        "threadId": "thread-1",
        "goal": "sync invoices",
        "steps": [{
            "step_id": "fetch",
            "adapter": "WebhookAdapter",
            "method": "GET",
            "url": "https://example.test/invoices",
            "expects": {"http_status": [200]}
        }]
    })
}

fn parse(raw: &Value) -> ExecutionPlan {
    serde_json::from_value(raw.clone()).unwrap()
}

#[test]
fn test_plan_hash_is_the_hash_of_the_received_document() {
    let raw = raw_plan();
    assert_eq!(parse(&raw).plan_hash(), stable_hash(&raw));

    // the same document as text, keys reordered
    let text = r#"{"steps":[{"expects":{"http_status":[200]},"url":"https://example.test/invoices","method":"GET","adapter":"WebhookAdapter","step_id":"fetch"}],"goal":"sync invoices","threadId":"thread-1","execution_id":"exec-1"}"#;
    let from_text: ExecutionPlan = serde_json::from_str(text).unwrap();
    assert_eq!(from_text.plan_hash(), stable_hash(&raw));
}

#[test]
fn test_plans_differing_only_in_unknown_fields_hash_differently() {
    let base = raw_plan();
    let mut approved = base.clone();
    approved["approved_by"] = json!("ops-oncall");
    let mut versioned = base.clone();
    versioned["policy_version"] = json!(3);

    let hashes = [parse(&base).plan_hash(), parse(&approved).plan_hash(), parse(&versioned).plan_hash()];
    assert_ne!(hashes[0], hashes[1]);
    assert_ne!(hashes[0], hashes[2]);
    assert_ne!(hashes[1], hashes[2]);

    // a step-level extra field counts too
    let mut annotated = base.clone();
    annotated["steps"][0]["note"] = json!("added by reviewer");
    assert_ne!(parse(&annotated).plan_hash(), hashes[0]);
}

#[test]
fn test_defaulted_fields_are_not_hashed_in() {
    let base = raw_plan();
    let mut explicit = base.clone();
    explicit["steps"][0]["action"] = json!("http.request");

    let a = parse(&base);
    let b = parse(&explicit);
    assert_eq!(a.steps, b.steps);
    assert_ne!(a.plan_hash(), b.plan_hash());
}

#[test]
fn test_numbers_canonicalize_like_json_stringify() {
    let doc = json!({"whole": 1.0, "negzero": -0.0, "big": 1e21, "small": 1.5e-7, "frac": 2.5, "int": 42});
    assert_eq!(
        canonical_json(&doc),
        r#"{"big":1e+21,"frac":2.5,"int":42,"negzero":0,"small":1.5e-7,"whole":1}"#
    );
    assert_eq!(stable_hash(&json!({"amount": 100.0})), stable_hash(&json!({"amount": 100})));
}
