//! Integration test: diagnostic reporter
//!
//! Verifies skip verdicts, the duplicate limit, muting, severity switches
//! and location formatting.

use std::sync::Arc;

use vkguard_core::config::MessageSettings;
use vkguard_core::{Location, MemorySink, Reporter, Severity};

fn make_reporter(settings: MessageSettings) -> (Reporter, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (Reporter::new(sink.clone(), &settings), sink)
}

#[test]
fn test_errors_request_skip_and_warnings_do_not() {
    let (reporter, sink) = make_reporter(MessageSettings::default());
    let loc = Location::new("vkCreateImage");

    assert!(reporter.log_error("VUID-A", &[1], &loc, "bad"));
    assert!(!reporter.log_warning("WARN-A", &[1], &loc, "meh"));
    assert!(!reporter.log_performance("PERF-A", &[], &loc, "slow"));

    let messages = sink.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].severity, Severity::Error);
    assert_eq!(messages[0].location, "vkCreateImage():");
}

#[test]
fn test_duplicate_limit_and_mute() {
    let settings = MessageSettings {
        duplicate_limit: 2,
        mute: vec!["VUID-MUTED".to_string()],
        ..MessageSettings::default()
    };
    let (reporter, sink) = make_reporter(settings);
    let loc = Location::new("vkCreateBuffer");

    for _ in 0..5 {
        // the verdict stays an error even when the message is suppressed
        assert!(reporter.log_error("VUID-REPEATED", &[], &loc, "again"));
    }
    reporter.log_error("VUID-MUTED", &[], &loc, "never shown");

    assert_eq!(sink.count("VUID-REPEATED"), 2);
    assert!(!sink.has("VUID-MUTED"));
}

#[test]
fn test_info_is_off_by_default() {
    let (reporter, sink) = make_reporter(MessageSettings::default());
    reporter.log_info("INFO-A", &[], &Location::new("vkQueueSubmit"), "hello");
    assert!(sink.messages().is_empty());
}

#[test]
fn test_location_chain_formatting() {
    let root = Location::new("vkCreateGraphicsPipelines");
    let info = root.index("pCreateInfos", 2);
    let stage = info.index("pStages", 0);
    let module = stage.dot("module");
    assert_eq!(
        module.to_string(),
        "vkCreateGraphicsPipelines(): pCreateInfos[2].pStages[0].module"
    );
}
