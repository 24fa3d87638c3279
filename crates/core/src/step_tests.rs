// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn new_step_is_in_flight() {
    let step = Step::in_flight("Importing file");
    assert_eq!(step.duration, IN_FLIGHT);
    assert!(step.is_in_flight());
}

#[test]
fn finalized_step_is_not_in_flight() {
    let step = Step {
        info: "Importing file".to_string(),
        duration: 11.7,
    };
    assert!(!step.is_in_flight());
}

#[test]
fn serde_shape() {
    let step = Step::in_flight("Extracting archive");
    let json = serde_json::to_value(&step).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"info": "Extracting archive", "duration": -1.0})
    );
}
