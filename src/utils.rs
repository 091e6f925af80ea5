// utils.rs - Input validation and display formatting helpers
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref HTTP_URL: Regex = Regex::new(r"^https?://").unwrap();
    static ref SIX_DIGITS: Regex = Regex::new(r"^\d{6}$").unwrap();
}

/// Remote video sources must be http(s); anything else is rejected before a
/// request is built.
pub fn is_http_url(url: &str) -> bool {
    HTTP_URL.is_match(url)
}

/// Keep digits only, dropping spaces, dashes, parentheses, etc.
pub fn strip_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// US phone numbers are stored as exactly 10 digits.
pub fn is_valid_phone(digits: &str) -> bool {
    digits.len() == 10 && digits.chars().all(|c| c.is_ascii_digit())
}

/// Verification codes are 6 ASCII digits. Format check only; the backend
/// decides whether the code is actually correct.
pub fn is_valid_code(code: &str) -> bool {
    SIX_DIGITS.is_match(code)
}

/// Split a backend `"start - end"` range on the literal separator. A string
/// without the separator becomes the start with an empty end.
pub fn split_time_range(time: &str) -> (String, String) {
    let mut parts = time.split(" - ");
    let start = parts.next().unwrap_or_default().to_string();
    let end = parts.next().unwrap_or_default().to_string();
    (start, end)
}

/// `(555) 123-4567` when the number is a clean 10 digits, the raw value
/// otherwise.
pub fn format_phone_display(phone: &str) -> String {
    let digits = strip_phone(phone);
    if digits.len() == 10 {
        format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..])
    } else {
        phone.to_string()
    }
}

/// Human-readable join date, e.g. "March 1, 2026".
pub fn format_joined_date(date: &DateTime<Utc>) -> String {
    date.format("%B %-d, %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_http_url_validation() {
        assert!(is_http_url("http://example.com/v.mp4"));
        assert!(is_http_url("https://youtu.be/abc123"));
        assert!(!is_http_url("ftp://example.com/v.mp4"));
        assert!(!is_http_url("example.com/v.mp4"));
        assert!(!is_http_url("upload://id/v.mp4"));
    }

    #[test]
    fn test_phone_stripping_and_validation() {
        assert_eq!(strip_phone("(555) 123-4567"), "5551234567");
        assert!(is_valid_phone("5551234567"));
        assert!(!is_valid_phone("555123456"));
        assert!(!is_valid_phone("55512345678"));
        assert!(!is_valid_phone(""));
    }

    #[test]
    fn test_code_format() {
        assert!(is_valid_code("012345"));
        assert!(!is_valid_code("12345"));
        assert!(!is_valid_code("1234567"));
        assert!(!is_valid_code("12a456"));
        assert!(!is_valid_code(""));
    }

    #[test]
    fn test_split_time_range() {
        assert_eq!(
            split_time_range("0:10 - 0:20"),
            ("0:10".to_string(), "0:20".to_string())
        );
        assert_eq!(split_time_range("1:05"), ("1:05".to_string(), String::new()));
        // Extra separators follow the first two fields.
        assert_eq!(
            split_time_range("a - b - c"),
            ("a".to_string(), "b".to_string())
        );
    }

    #[test]
    fn test_phone_display() {
        assert_eq!(format_phone_display("5551234567"), "(555) 123-4567");
        assert_eq!(format_phone_display("123"), "123");
        assert_eq!(format_phone_display(""), "");
    }

    #[test]
    fn test_joined_date_display() {
        let date = Utc.with_ymd_and_hms(2026, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(format_joined_date(&date), "March 1, 2026");
    }
}
