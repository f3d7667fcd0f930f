pub mod demo;
pub mod host;

pub use method_dispatch;

/// Environment variable selecting the tracing level of the demo binary.
pub const LOG_ENV: &str = "DISPATCH_LOG";

/// Environment variable naming the dispatcher's tracing span.
pub const NAME_ENV: &str = "DISPATCH_NAME";

/// Environment variable enabling the first-reply-wins policy (`1` or `true`).
pub const FIRST_WINS_ENV: &str = "DISPATCH_FIRST_WINS";

/// Parse a boolean environment flag.
pub fn env_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_flag() {
        assert!(env_flag("1"));
        assert!(env_flag(" TRUE "));
        assert!(!env_flag("0"));
        assert!(!env_flag(""));
    }
}
