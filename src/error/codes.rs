/// Error code registry for the bridge
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Protocol violations
/// - 3000-3999: Authentication failures
/// - 4000-4999: Serialization faults
/// - 5000-5999: Worker process / connection errors
/// - 6000-6999: Split transport errors
/// - 9000-9999: IO and other errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_PARSE_ERROR: u16 = 1002;
    pub const CONFIG_MISSING_REQUIRED: u16 = 1003;
    pub const CONFIG_INVALID_VALUE: u16 = 1004;
    pub const CONFIG_UNSUPPORTED_SCHEME: u16 = 1005;

    // Protocol violations (2000-2999)
    pub const PROTOCOL_GENERIC: u16 = 2000;
    pub const PROTOCOL_UNKNOWN_COMMAND: u16 = 2001;
    pub const PROTOCOL_MALFORMED_MESSAGE: u16 = 2002;
    pub const PROTOCOL_UNREGISTERED_COUNTER: u16 = 2003;
    pub const PROTOCOL_OUT_OF_ORDER: u16 = 2004;
    pub const PROTOCOL_UNEXPECTED_EOF: u16 = 2005;

    // Authentication failures (3000-3999)
    pub const AUTH_GENERIC: u16 = 3000;
    pub const AUTH_DIGEST_MISMATCH: u16 = 3001;
    pub const AUTH_NOT_PERFORMED: u16 = 3002;
    pub const AUTH_SECRET_UNAVAILABLE: u16 = 3003;

    // Serialization faults (4000-4999)
    pub const SERIAL_GENERIC: u16 = 4000;
    pub const SERIAL_SCHEMA_PARSE: u16 = 4001;
    pub const SERIAL_ENCODE: u16 = 4002;
    pub const SERIAL_DECODE: u16 = 4003;
    pub const SERIAL_MODE_MISMATCH: u16 = 4004;

    // Worker process / connection errors (5000-5999)
    pub const WORKER_GENERIC: u16 = 5000;
    pub const WORKER_SPAWN_FAILED: u16 = 5001;
    pub const WORKER_EXITED: u16 = 5002;
    pub const WORKER_CONNECTION_LOST: u16 = 5003;
    pub const WORKER_TIMEOUT: u16 = 5004;
    pub const WORKER_ABORTED: u16 = 5005;
    pub const WORKER_EXECUTABLE_NOT_FOUND: u16 = 5006;

    // Split transport errors (6000-6999)
    pub const SPLIT_GENERIC: u16 = 6000;
    pub const SPLIT_NOT_FOUND: u16 = 6001;
    pub const SPLIT_CORRUPTED: u16 = 6002;

    // IO and other errors (9000-9999)
    pub const IO_GENERIC: u16 = 9000;
    pub const IO_NOT_FOUND: u16 = 9001;
    pub const IO_PERMISSION_DENIED: u16 = 9002;
    pub const OTHER_INTERNAL_ERROR: u16 = 9003;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Failed to parse configuration",
        1003 => "Required configuration key is missing",
        1004 => "Invalid value in configuration",
        1005 => "Unsupported URI scheme",

        2000 => "Generic protocol violation",
        2001 => "Unknown command code",
        2002 => "Malformed message",
        2003 => "Counter incremented before registration",
        2004 => "Command sent out of order",
        2005 => "Stream ended unexpectedly",

        3000 => "Generic authentication failure",
        3001 => "Digest mismatch",
        3002 => "Worker finished without authenticating",
        3003 => "Shared secret unavailable",

        4000 => "Generic serialization error",
        4001 => "Schema could not be parsed",
        4002 => "Record could not be encoded",
        4003 => "Record could not be decoded",
        4004 => "Record does not match the configured mode",

        5000 => "Generic worker error",
        5001 => "Failed to spawn worker",
        5002 => "Worker exited unexpectedly",
        5003 => "Connection to worker lost",
        5004 => "Timed out waiting for worker",
        5005 => "Task attempt aborted",
        5006 => "Worker executable not found",

        6000 => "Generic split error",
        6001 => "Split file not found",
        6002 => "Split file is corrupted",

        9000 => "Generic IO error",
        9001 => "File or directory not found",
        9002 => "Permission denied",
        9003 => "Internal error",

        _ => "Unknown error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_ranges() {
        assert_eq!(ErrorCode::CONFIG_GENERIC / 1000, 1);
        assert_eq!(ErrorCode::PROTOCOL_UNREGISTERED_COUNTER / 1000, 2);
        assert_eq!(ErrorCode::AUTH_DIGEST_MISMATCH / 1000, 3);
        assert_eq!(ErrorCode::SERIAL_DECODE / 1000, 4);
        assert_eq!(ErrorCode::WORKER_EXITED / 1000, 5);
        assert_eq!(ErrorCode::SPLIT_NOT_FOUND / 1000, 6);
    }

    #[test]
    fn test_describe_error_code() {
        assert_eq!(
            describe_error_code(ErrorCode::PROTOCOL_UNREGISTERED_COUNTER),
            "Counter incremented before registration"
        );
        assert_eq!(describe_error_code(4242), "Unknown error code");
    }
}
