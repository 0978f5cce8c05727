//! Pattern-based input threat analysis and field validators.
//!
//! These are heuristics for catching the common, naive attacks and recording
//! them for audit. They are not a WAF: false negatives are expected.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::header::CONTENT_TYPE,
    middleware::Next,
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::audit::{EventContext, NewSecurityEvent};
use crate::error::AppError;
use crate::state::SecurityState;

pub const MAX_SANITIZED_LEN: usize = 1000;

lazy_static! {
    static ref SQL_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|EXECUTE|UNION|DECLARE)\b").unwrap(),
        Regex::new(r"(?i)\b(OR|AND)\s+\d+\s*=\s*\d+").unwrap(),
        Regex::new(r"(--|#|/\*|\*/|;)").unwrap(),
        Regex::new(r"(?i)'\s*(OR|AND)\s*'[^']*'\s*=").unwrap(),
        Regex::new(r"(?i)'\s*OR\s*'\s*=").unwrap(),
    ];
    static ref XSS_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap(),
        Regex::new(r"(?is)<iframe\b[^>]*>.*?</iframe\s*>").unwrap(),
        Regex::new(r"(?i)javascript\s*:").unwrap(),
        Regex::new(r"(?i)\bon\w+\s*=").unwrap(),
        Regex::new(r"(?is)<img\b[^>]*\bsrc\b[^>]*>").unwrap(),
    ];
    static ref EVENT_HANDLER: Regex = Regex::new(r"(?i)\bon\w+\s*=").unwrap();
    static ref JAVASCRIPT_SCHEME: Regex = Regex::new(r"(?i)javascript\s*:").unwrap();
    static ref USERNAME: Regex = Regex::new(r"^[A-Za-z0-9_-]{3,30}$").unwrap();
    static ref EMAIL: Regex = Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap();
}

/// Rounds of percent-decoding applied before looking for `../` and `..\`.
const TRAVERSAL_DECODE_ROUNDS: usize = 2;

const WEAK_PREFIXES: &[&str] = &["123456", "password", "qwerty", "abc123"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    SqlInjection,
    Xss,
    PathTraversal,
}

impl ThreatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatKind::SqlInjection => "sql_injection",
            ThreatKind::Xss => "xss",
            ThreatKind::PathTraversal => "path_traversal",
        }
    }
}

/// Result of analysing one input string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputAnalysis {
    pub is_safe: bool,
    pub threats: Vec<ThreatKind>,
    pub sanitized: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordStrength {
    /// 0..=4
    pub score: u8,
    pub is_strong: bool,
    pub feedback: Vec<String>,
}

pub fn detect_sql_injection(input: &str) -> bool {
    SQL_PATTERNS.iter().any(|re| re.is_match(input))
}

pub fn detect_xss(input: &str) -> bool {
    XSS_PATTERNS.iter().any(|re| re.is_match(input))
}

fn has_dot_dot_separator(input: &str) -> bool {
    input.contains("../") || input.contains("..\\")
}

/// `../` or `..\` in the input as given, or after one or two rounds of
/// percent-decoding, so fully and partially encoded dots and separators match.
pub fn detect_path_traversal(input: &str) -> bool {
    let mut current = input.to_string();
    if has_dot_dot_separator(&current) {
        return true;
    }
    for _ in 0..TRAVERSAL_DECODE_ROUNDS {
        // Lossy: encoded bytes that are not UTF-8 must not end the scan
        let decoded = String::from_utf8_lossy(&urlencoding::decode_binary(current.as_bytes())).into_owned();
        if decoded == current {
            break;
        }
        if has_dot_dot_separator(&decoded) {
            return true;
        }
        current = decoded;
    }
    false
}

/// Light clean-up for values stored or echoed as plain text.
pub fn sanitize_string(input: &str) -> String {
    let stripped: String = input.trim().chars().filter(|c| *c != '<' && *c != '>').collect();
    let stripped = JAVASCRIPT_SCHEME.replace_all(&stripped, "");
    let stripped = EVENT_HANDLER.replace_all(&stripped, "");
    stripped.chars().take(MAX_SANITIZED_LEN).collect()
}

/// Full HTML entity escaping for values rendered into markup.
pub fn sanitize_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn analyze(input: &str) -> InputAnalysis {
    let mut threats = Vec::new();
    if detect_sql_injection(input) {
        threats.push(ThreatKind::SqlInjection);
    }
    if detect_xss(input) {
        threats.push(ThreatKind::Xss);
    }
    if detect_path_traversal(input) {
        threats.push(ThreatKind::PathTraversal);
    }
    InputAnalysis { is_safe: threats.is_empty(), threats, sanitized: sanitize_string(input) }
}

pub fn validate_password_strength(password: &str) -> PasswordStrength {
    let len = password.chars().count();
    if len < 8 {
        return PasswordStrength {
            score: 0,
            is_strong: false,
            feedback: vec!["Password must be at least 8 characters long".to_string()],
        };
    }

    let mut score: i32 = 0;
    let mut feedback = Vec::new();

    if len >= 12 {
        score += 1;
    }
    if len >= 16 {
        score += 1;
    }

    let classes = [
        (password.chars().any(|c| c.is_lowercase()), "Add lowercase letters"),
        (password.chars().any(|c| c.is_uppercase()), "Add uppercase letters"),
        (password.chars().any(|c| c.is_ascii_digit()), "Add numbers"),
        (password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()), "Add special characters"),
    ];
    for (present, hint) in classes {
        if present {
            score += 1;
        } else {
            feedback.push(hint.to_string());
        }
    }

    let lower = password.to_lowercase();
    if WEAK_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        score -= 2;
        feedback.push("Avoid common patterns like '123456', 'password' or 'qwerty'".to_string());
    }

    let score = score.clamp(0, 4) as u8;
    PasswordStrength { score, is_strong: score >= 4 && feedback.is_empty(), feedback }
}

/// 3 to 30 ASCII letters, digits, `_` or `-`.
pub fn validate_username(username: &str) -> bool {
    USERNAME.is_match(username)
}

pub fn validate_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL.is_match(email)
}

/// Absolute http(s) URL with a host.
pub fn validate_url(input: &str) -> bool {
    match url::Url::parse(input) {
        Ok(u) => matches!(u.scheme(), "http" | "https") && u.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

/// Calendar date in `YYYY-MM-DD` form.
pub fn validate_date(input: &str) -> bool {
    input.len() == 10 && chrono::NaiveDate::parse_from_str(input, "%Y-%m-%d").is_ok()
}

/// Check for suspicious user agents (simple heuristic)
pub fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua_lower = ua.to_lowercase();
    ua_lower.contains("scanner")
        || (ua_lower.contains("crawler") && !ua_lower.contains("googlebot") && !ua_lower.contains("bingbot"))
        || ua_lower.contains("nikto")
        || ua_lower.contains("sqlmap")
        || ua_lower.contains("havij")
        || ua_lower.contains("acunetix")
}

/// Removes control characters, limits length and escapes quotes so the value
/// can be embedded in a log line.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "\\\'")
}

/// Runs every string value through [`analyze`] and merges the threats found.
pub fn analyze_all<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<ThreatKind> {
    let mut found = Vec::new();
    for value in values {
        for threat in analyze(value).threats {
            if !found.contains(&threat) {
                found.push(threat);
            }
        }
    }
    found
}

fn collect_json_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_json_strings(v, out)),
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                out.push(k.clone());
                collect_json_strings(v, out);
            }
        }
        _ => {}
    }
}

/// Decoded keys and values of a query string or form body, in order.
fn form_fields(query: &str) -> Vec<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .flat_map(|(k, v)| [k.into_owned(), v.into_owned()])
        .filter(|f| !f.is_empty())
        .collect()
}

/// Analyses the path plus the keys and values of the query, JSON and form
/// bodies of every request.
///
/// A request carrying a threat is rejected with `400 Bad Request` and a
/// `SqlInjectionAttempt` (when SQL injection fired) or `SuspiciousInput`
/// audit event. Bodies larger than `security.max_body_bytes` get `413`.
pub async fn validate_request_middleware(
    State(state): State<SecurityState>,
    req: Request,
    next: Next,
) -> Response {
    let ctx = EventContext::from_request(&req);

    if let Some(ua) = req.headers().get("user-agent").and_then(|v| v.to_str().ok()) {
        if is_suspicious_user_agent(ua) {
            tracing::warn!("Suspicious user agent detected: {}", sanitize_for_logging(ua));
        }
    }

    let mut fields = Vec::new();
    if detect_path_traversal(req.uri().path()) {
        fields.push(req.uri().path().to_string());
    }
    if let Some(query) = req.uri().query() {
        fields.extend(form_fields(query));
    }

    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    let is_json = content_type.starts_with("application/json");
    let is_form = content_type.starts_with("application/x-www-form-urlencoded");

    let req = if is_json || is_form {
        let limit = state.config.security.max_body_bytes;
        let (parts, body) = req.into_parts();
        let bytes = match to_bytes(body, limit).await {
            Ok(b) => b,
            Err(_) => return AppError::PayloadTooLarge { limit }.into_response(),
        };
        if is_json {
            // Unparseable JSON is left for the handler to reject
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                collect_json_strings(&value, &mut fields);
            }
        } else {
            fields.extend(form_fields(&String::from_utf8_lossy(&bytes)));
        }
        Request::from_parts(parts, Body::from(bytes))
    } else {
        req
    };

    let threats = analyze_all(fields.iter().map(String::as_str));
    if threats.is_empty() {
        return next.run(req).await;
    }

    state.metrics.inc_threats_detected();
    let names: Vec<String> = threats.iter().map(|t| t.as_str().to_string()).collect();
    let sample = fields
        .iter()
        .find(|f| !analyze(f).is_safe)
        .map(|f| sanitize_for_logging(f))
        .unwrap_or_default();
    let event = if threats.contains(&ThreatKind::SqlInjection) {
        NewSecurityEvent::sql_injection_attempt(&ctx, &sample)
    } else {
        NewSecurityEvent::suspicious_input(&ctx, &names, &sample)
    };
    state.audit.record(event);

    AppError::ThreatDetected { threats: names }.into_response()
}
