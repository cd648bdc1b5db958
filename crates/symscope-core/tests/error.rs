//! Tests for error handling

use symscope_core::error::{ErrorCode, Result, SymError};

#[test]
fn test_every_error_has_a_code()
{
    let cases = [
        (SymError::Generic("boom".into()), ErrorCode::Error),
        (SymError::InvalidParameter("x".into()), ErrorCode::InvalidParameter),
        (SymError::InvalidSize("x".into()), ErrorCode::InvalidSize),
        (
            SymError::LoadFailed {
                path: "/lib/x.so".into(),
                reason: "bad magic".into(),
            },
            ErrorCode::LoadFailed,
        ),
        (SymError::Parse("x".into()), ErrorCode::LoadFailed),
        (SymError::SymbolNotFound, ErrorCode::SymbolNotFound),
        (SymError::LineNotAvailable, ErrorCode::LineNotAvailable),
        (SymError::NotImplemented("x"), ErrorCode::NotImplemented),
        (SymError::FeatureNotAvailable("x".into()), ErrorCode::FeatureNotAvailable),
        (SymError::OutOfMemory("x".into()), ErrorCode::OutOfMemory),
        (SymError::Recursive, ErrorCode::Recursive),
    ];
    for (error, code) in cases {
        assert_eq!(error.code(), code, "{error}");
        assert_ne!(error.code(), ErrorCode::Success);
    }
}

#[test]
fn test_io_errors_are_load_failures()
{
    let error: SymError = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
    assert_eq!(error.code(), ErrorCode::LoadFailed);
    assert!(error.to_string().contains("missing"));
}

#[test]
fn test_load_failed_display()
{
    let error = SymError::LoadFailed {
        path: "/lib/x.so".into(),
        reason: "bad magic".into(),
    };
    let message = format!("{}", error);
    assert!(message.contains("/lib/x.so"));
    assert!(message.contains("bad magic"));
}

#[test]
fn test_error_code_display()
{
    assert_eq!(ErrorCode::SymbolNotFound.to_string(), "symbol not found");
    assert_eq!(ErrorCode::LineNotAvailable.as_str(), "line not available");
}

#[test]
fn test_result_type()
{
    let _result: Result<()> = Ok(());
    let _error_result: Result<()> = Err(SymError::SymbolNotFound);
}
