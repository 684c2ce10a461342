//! Output policy applied to every reply before it leaves the crate.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const URL_PLACEHOLDER: &str = "[链接已隐藏]";
pub const PHONE_PLACEHOLDER: &str = "[号码已隐藏]";
pub const CONTACT_PLACEHOLDER: &str = "[联系方式已隐藏]";

static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("valid url pattern"));
static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid digit pattern"));
static MOBILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^1[3-9]\d{9}$").expect("valid mobile pattern"));
static MESSAGING_HANDLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(微信|vx|Vx|VX)[:：]?\s*[A-Za-z0-9_-]{3,}").expect("valid handle pattern")
});

/// Replace URLs, mainland mobile numbers, and messaging handles with fixed
/// placeholders, in that order.
///
/// A mobile number only matches as a whole digit run: `13812345678` is
/// redacted, `913812345678` is not.
pub fn redact_sensitive(text: &str) -> String {
    let t = URL.replace_all(text, URL_PLACEHOLDER);
    let t = DIGIT_RUN.replace_all(&t, |caps: &Captures| {
        if MOBILE.is_match(&caps[0]) {
            PHONE_PLACEHOLDER.to_string()
        } else {
            caps[0].to_string()
        }
    });
    MESSAGING_HANDLE
        .replace_all(&t, CONTACT_PLACEHOLDER)
        .into_owned()
}

/// Trim, then cap at `max_chars` characters. Overlong text keeps its first
/// `max_chars - 1` characters (trailing whitespace removed) plus `…`.
pub fn enforce_style(text: &str, max_chars: usize) -> String {
    let t = text.trim();
    if t.chars().count() <= max_chars {
        return t.to_string();
    }
    let head: String = t.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", head.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_url() {
        assert_eq!(
            redact_sensitive("看这里 https://shop.example.com/x?id=1 下单"),
            "看这里 [链接已隐藏] 下单"
        );
    }

    #[test]
    fn test_redacts_whole_mobile_runs_only() {
        assert_eq!(redact_sensitive("打13812345678"), "打[号码已隐藏]");
        assert_eq!(redact_sensitive("单号913812345678"), "单号913812345678");
        assert_eq!(redact_sensitive("编号12345678901"), "编号12345678901");
    }

    #[test]
    fn test_redacts_messaging_handle() {
        assert_eq!(redact_sensitive("加微信：abc_123"), "加[联系方式已隐藏]");
        assert_eq!(redact_sensitive("VX shop-01 了解"), "[联系方式已隐藏] 了解");
    }

    #[test]
    fn test_clean_text_untouched() {
        let t = "收到～我在的，有任何具体问题直接问我就行。";
        assert_eq!(redact_sensitive(t), t);
    }

    #[test]
    fn test_enforce_style_truncates_by_chars() {
        let long = "好".repeat(200);
        let out = enforce_style(&long, 160);
        assert_eq!(out.chars().count(), 160);
        assert!(out.ends_with('…'));

        assert_eq!(enforce_style("  短句  ", 160), "短句");
        assert_eq!(enforce_style("abcdef", 6), "abcdef");
        assert_eq!(enforce_style("abc   defg", 5), "abc…");
    }
}
