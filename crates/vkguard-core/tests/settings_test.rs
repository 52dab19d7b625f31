//! Integration test: settings loader
//!
//! Covers TOML parsing, environment overrides and the resolution of textual
//! enable/disable flags into the unit selection.
//!
//! Run with: cargo test --test settings_test -- --nocapture

use std::collections::HashMap;

use vkguard_core::config::{DisableFlag, EnableFlag, LayerSettings, LockingMode};

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults_select_core_units_only() {
    let settings = LayerSettings::default();
    let units = settings.resolve_units(&[], &[]);

    assert!(units.thread_safety);
    assert!(units.object_lifetime);
    assert!(units.stateless);
    assert!(units.core_checks);
    assert!(!units.gpu_assisted);
    assert!(!units.best_practices);
    assert!(!units.sync_hazard);
    assert_eq!(settings.locking, LockingMode::Fine);
    assert_eq!(settings.gpu_assisted.max_binding_slots, 33);
    assert_eq!(settings.gpu_assisted.descriptor_chunk_size, 512);
}

#[test]
fn test_parse_toml_settings() {
    let text = r#"
        enables = ["gpu_assisted", "best_practices"]
        disables = ["thread_safety"]
        locking = "coarse"

        [messages]
        duplicate_limit = 3
        mute = ["VUID-vkCreateImage-extent-00944"]

        [gpu_assisted]
        descriptor_chunk_size = 64
    "#;
    let settings: LayerSettings = toml::from_str(text).expect("settings should parse");
    assert_eq!(settings.locking, LockingMode::Coarse);
    assert_eq!(settings.messages.duplicate_limit, 3);
    assert_eq!(settings.gpu_assisted.descriptor_chunk_size, 64);
    // unspecified members keep their defaults
    assert_eq!(settings.gpu_assisted.max_binding_slots, 33);

    let units = settings.resolve_units(&[], &[]);
    assert!(units.gpu_assisted);
    assert!(units.best_practices);
    assert!(!units.thread_safety);
}

#[test]
fn test_env_overrides_append_flags() {
    let mut settings = LayerSettings::default();
    settings.apply_env(env(&[
        ("VKGUARD_ENABLES", "sync_hazard, gpuav"),
        ("VKGUARD_DISABLES", "stateless"),
        ("VKGUARD_LOCKING", "coarse"),
        ("VKGUARD_DUPLICATE_LIMIT", "0"),
        ("VKGUARD_MUTE", "A,B"),
    ]));

    assert_eq!(settings.locking, LockingMode::Coarse);
    assert_eq!(settings.messages.duplicate_limit, 0);
    assert_eq!(settings.messages.mute, vec!["A".to_string(), "B".to_string()]);

    let units = settings.resolve_units(&[], &[]);
    assert!(units.sync_hazard);
    assert!(units.gpu_assisted);
    assert!(!units.stateless);
}

#[test]
fn test_unknown_flags_are_ignored() {
    let settings = LayerSettings {
        enables: vec!["not_a_real_flag".to_string(), "best_practices".to_string()],
        disables: vec!["bogus".to_string()],
        ..LayerSettings::default()
    };
    let units = settings.resolve_units(&[], &[]);
    assert!(units.best_practices);
    assert!(units.core_checks);
    assert!("bogus".parse::<DisableFlag>().is_err());
}

#[test]
fn test_extension_flags_and_disable_all() {
    let settings = LayerSettings::default();
    let units = settings.resolve_units(&[EnableFlag::GpuAssisted], &[]);
    assert!(units.gpu_assisted);

    let units = settings.resolve_units(&[EnableFlag::GpuAssisted], &[DisableFlag::All]);
    assert!(!units.gpu_assisted);
    assert!(!units.core_checks);
    assert!(!units.thread_safety);
}

#[test]
fn test_settings_round_trip_through_toml() {
    let mut settings = LayerSettings::default();
    settings.enables.push("gpu_assisted".to_string());
    let text = settings.to_toml().expect("serialize");
    println!("{}", text);
    let back: LayerSettings = toml::from_str(&text).expect("parse back");
    assert_eq!(back.enables, settings.enables);
}
