use rung_core::errors::{ErrorInfo, PtError};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("chain", 3)
        .with_context("iteration", 1200)
}

#[test]
fn invalid_config_surface() {
    let err = PtError::InvalidConfig(sample_info("C001", "n_chains must be >= 1"));
    assert_eq!(err.info().code, "C001");
    assert_eq!(err.family(), "invalid-config");
    assert!(err.info().context.contains_key("chain"));
}

#[test]
fn worker_failure_surface() {
    let err = PtError::WorkerFailure(sample_info("W001", "kernel panicked"));
    assert_eq!(err.info().code, "W001");
    assert_eq!(err.info().context["iteration"], "1200");
    assert!(!err.is_cancellation());
}

#[test]
fn channel_closed_surface() {
    let err = PtError::ChannelClosed(sample_info("X001", "neighbour hung up"));
    assert_eq!(err.family(), "channel-closed");
}

#[test]
fn timeout_surface() {
    let err = PtError::Timeout(sample_info("T001", "no swap offer"));
    assert_eq!(err.info().code, "T001");
}

#[test]
fn cancelled_surface() {
    let err = PtError::Cancelled(sample_info("K001", "sibling failed"));
    assert!(err.is_cancellation());
}

#[test]
fn display_includes_context_and_hint() {
    let err = PtError::Io(
        ErrorInfo::new("checkpoint-write", "disk full")
            .with_context("path", "/tmp/chain_0.csv")
            .with_hint("free some space"),
    );
    let rendered = err.to_string();
    assert!(rendered.starts_with("io error: disk full (code: checkpoint-write)"));
    assert!(rendered.contains("path=/tmp/chain_0.csv"));
    assert!(rendered.ends_with("hint: free some space"));
}

#[test]
fn errors_round_trip_through_json() {
    let err = PtError::Timeout(sample_info("T002", "adapter silent"));
    let json = serde_json::to_string(&err).expect("serialize");
    assert!(json.contains("\"family\":\"Timeout\""));
    let decoded: PtError = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(decoded, err);
}
