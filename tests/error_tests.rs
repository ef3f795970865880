//! Tests for the error system.

use moai::error::unified::*;
use moai::error::*;

#[test]
fn error_api_creation() {
    let err = MoaiError::api(404, "Not found");
    assert!(matches!(&err, MoaiError::Api { status: 404, .. }));
    assert_eq!(err.to_string(), "API error (status 404): Not found");
}

#[test]
fn action_error_names_the_block_kind() {
    let err = MoaiError::action("file", "../x: path escapes the project root");
    assert_eq!(
        err.to_string(),
        "Action error (file): ../x: path escapes the project root"
    );
    assert!(!err.is_transport());
}

#[test]
fn error_helper_mappings_are_stable_for_major_variants() {
    struct Case {
        error: MoaiError,
        expected_category: ErrorCategory,
        expected_retryable: bool,
        expected_recovery: RecoverySuggestion,
    }

    let network_error = reqwest::Client::new()
        .get("http://[::1")
        .build()
        .unwrap_err();
    let io_error = std::io::Error::new(std::io::ErrorKind::Other, "disk");
    let serde_error = serde_json::from_str::<serde_json::Value>("{not-json}").unwrap_err();

    let cases = vec![
        Case {
            error: MoaiError::Authentication("bad-key".to_string()),
            expected_category: ErrorCategory::Authentication,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckCredentials,
        },
        Case {
            error: MoaiError::RateLimited {
                retry_after_ms: Some(1000),
            },
            expected_category: ErrorCategory::RateLimit,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryLater,
        },
        Case {
            error: MoaiError::Timeout(5000),
            expected_category: ErrorCategory::Timeout,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::IncreaseTimeout,
        },
        Case {
            error: MoaiError::Configuration("bad-config".to_string()),
            expected_category: ErrorCategory::Configuration,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckConfiguration,
        },
        Case {
            error: MoaiError::Network(network_error),
            expected_category: ErrorCategory::Transport,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryLater,
        },
        Case {
            error: MoaiError::Serialization(serde_error),
            expected_category: ErrorCategory::Parse,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::ReportIssue,
        },
        Case {
            error: MoaiError::action("bash", "exit 1"),
            expected_category: ErrorCategory::Action,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::InspectAction,
        },
        Case {
            error: MoaiError::Workflow("no steps".to_string()),
            expected_category: ErrorCategory::Action,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::InspectAction,
        },
        Case {
            error: MoaiError::api(401, "Unauthorized"),
            expected_category: ErrorCategory::Authentication,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::CheckCredentials,
        },
        Case {
            error: MoaiError::api(429, "Rate limited"),
            expected_category: ErrorCategory::RateLimit,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryLater,
        },
        Case {
            error: MoaiError::api(503, "Server unavailable"),
            expected_category: ErrorCategory::Server,
            expected_retryable: true,
            expected_recovery: RecoverySuggestion::RetryLater,
        },
        Case {
            error: MoaiError::Io(io_error),
            expected_category: ErrorCategory::Action,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::InspectAction,
        },
        Case {
            error: MoaiError::Cancelled,
            expected_category: ErrorCategory::Cancelled,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::None,
        },
        Case {
            error: MoaiError::InvalidArgument("bad-arg".to_string()),
            expected_category: ErrorCategory::Unknown,
            expected_retryable: false,
            expected_recovery: RecoverySuggestion::ReportIssue,
        },
    ];

    for case in cases {
        assert_eq!(
            case.error.category(),
            case.expected_category,
            "category for {}",
            case.error
        );
        assert_eq!(
            case.error.is_retryable(),
            case.expected_retryable,
            "retryable for {}",
            case.error
        );
        assert_eq!(
            case.error.recovery_suggestion(),
            case.expected_recovery,
            "recovery for {}",
            case.error
        );
    }
}
