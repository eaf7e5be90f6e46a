use std::str::FromStr;
use tokio::time::Duration;

/// Parses a duration string in the format "250ms", "30s", "10m", "5h", "3d".
///
/// Supported units:
/// - `ms` for milliseconds
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let (value_str, unit) = match s.strip_suffix("ms") {
        Some(rest) => (rest, "ms"),
        None => s.split_at(s.len() - s.chars().last().map_or(0, char::len_utf8)),
    };

    let multiplier_ms: u64 = match unit {
        "ms" => 1,
        "s" => 1000,
        "m" => 60 * 1000,
        "h" => 60 * 60 * 1000,
        "d" => 24 * 60 * 60 * 1000,
        other => {
            return Err(format!(
                "Unknown duration unit: '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
                other
            ))
        }
    };

    let value = u64::from_str(value_str)
        .map_err(|_| format!("Invalid numeric value in duration: '{}'", value_str))?;

    value
        .checked_mul(multiplier_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("Duration '{}' is too large", s))
}

/// Parses a comma-separated header string with support for escaped commas.
///
/// Use `\,` to include a literal comma in a header value.
/// Example: "Accept:text/html\,application/json,Accept-Language:ko-KR"
pub fn parse_headers_with_escapes(headers_str: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut current_header = String::new();
    let mut chars = headers_str.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&',') => {
                current_header.push(',');
                chars.next();
            }
            ',' => {
                if !current_header.trim().is_empty() {
                    headers.push(std::mem::take(&mut current_header));
                }
                current_header.clear();
            }
            _ => current_header.push(ch),
        }
    }

    if !current_header.trim().is_empty() {
        headers.push(current_header);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    mod duration {
        use super::*;

        #[test]
        fn parse_milliseconds() {
            assert_eq!(
                parse_duration_string("1500ms").unwrap(),
                Duration::from_millis(1500)
            );
        }

        #[test]
        fn parse_seconds() {
            assert_eq!(
                parse_duration_string("30s").unwrap(),
                Duration::from_secs(30)
            );
        }

        #[test]
        fn parse_minutes() {
            assert_eq!(
                parse_duration_string("10m").unwrap(),
                Duration::from_secs(600)
            );
        }

        #[test]
        fn parse_hours_and_days() {
            assert_eq!(
                parse_duration_string("5h").unwrap(),
                Duration::from_secs(18000)
            );
            assert_eq!(
                parse_duration_string("3d").unwrap(),
                Duration::from_secs(259200)
            );
        }

        #[test]
        fn trims_whitespace() {
            assert_eq!(
                parse_duration_string("  10m  ").unwrap(),
                Duration::from_secs(600)
            );
        }

        #[test]
        fn empty_string_errors() {
            let err = parse_duration_string("   ").unwrap_err();
            assert!(err.contains("empty"), "error was: {}", err);
        }

        #[test]
        fn unknown_suffix_errors() {
            let err = parse_duration_string("10x").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn no_suffix_errors() {
            let err = parse_duration_string("10").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn bad_numbers_error() {
            for input in ["m", "5.5h", "-5m", "abcms"] {
                let err = parse_duration_string(input).unwrap_err();
                assert!(err.contains("Invalid numeric"), "{} gave: {}", input, err);
            }
        }

        #[test]
        fn overflow_errors() {
            let err = parse_duration_string("18446744073709551615d").unwrap_err();
            assert!(err.contains("too large"), "error was: {}", err);
        }
    }

    #[test]
    fn test_parse_headers_simple() {
        let result = parse_headers_with_escapes("Accept:application/json,X-Client:loadtest");

        assert_eq!(result, vec!["Accept:application/json", "X-Client:loadtest"]);
    }

    #[test]
    fn test_parse_headers_with_escaped_comma() {
        let result = parse_headers_with_escapes("Accept:text/html\\,application/json,X-A:b");

        assert_eq!(result.len(), 2);
        assert_eq!(result[0], "Accept:text/html,application/json");
        assert_eq!(result[1], "X-A:b");
    }

    #[test]
    fn test_parse_headers_backslash_not_before_comma() {
        let result = parse_headers_with_escapes("Path:C:\\Users\\test,Host:example.com");

        assert_eq!(result, vec!["Path:C:\\Users\\test", "Host:example.com"]);
    }

    #[test]
    fn test_parse_headers_skips_empty_entries() {
        let result = parse_headers_with_escapes("  A:1  ,  ,B:2,");

        assert_eq!(result, vec!["  A:1  ", "B:2"]);
    }
}
