//! Command-line redaction
//!
//! Commands are logged and shown back to the user only after passing
//! through here: credential arguments are blanked, provider tokens are
//! masked and home-directory paths lose the user name.

use regex::Regex;

pub const REDACTED: &str = "[REDACTED]";
const HIDDEN_HOME_PATH: &str = "/home/[USER]/.[HIDDEN]";

struct SecretPattern {
    name: &'static str,
    regex: Regex,
}

fn secret(name: &'static str, pattern: &str) -> SecretPattern {
    SecretPattern {
        name,
        regex: Regex::new(pattern).unwrap(),
    }
}

lazy_static::lazy_static! {
    static ref SECRET_PATTERNS: Vec<SecretPattern> = vec![
        secret("aws_access_key", r"(?:A3T[A-Z0-9]|AKIA|AGPA|AIDA|AROA|AIPA|ANPA|ANVA|ASIA)[A-Z0-9]{16}"),
        secret("github_token", r"gh[pousr]_[A-Za-z0-9]{36,}"),
        secret("gitlab_token", r"glpat-[A-Za-z0-9_-]{20,}"),
        secret("stripe_key", r"(?:sk|pk)_(?:live|test)_[A-Za-z0-9]{24,}"),
        secret("slack_token", r"xox[baprs]-[A-Za-z0-9-]{10,}"),
        secret("jwt", r"eyJ[A-Za-z0-9_-]*\.eyJ[A-Za-z0-9_-]*\.[A-Za-z0-9_-]*"),
        secret("bearer", r"(?i)bearer\s+[A-Za-z0-9_.~+/-]+=*"),
    ];
    static ref CREDENTIAL_ASSIGNMENT: Regex =
        Regex::new(r"(?i)((?:--?)?(?:password|passwd|pass|token|secret|api[-_]?key)\s*[=:])\S+").unwrap();
    static ref CREDENTIAL_FLAG: Regex =
        Regex::new(r"(?i)^--?(?:password|passwd|token|secret|api[-_]?key)$").unwrap();
    static ref URL_CREDENTIALS: Regex = Regex::new(r"(://[^/\s:@]+):[^@\s/]+@").unwrap();
    static ref HIDDEN_HOME: Regex = Regex::new(r"/home/[^/\s]+/\.[^/\s]+").unwrap();
}

/// Printable form of a command line that is safe to log.
pub fn sanitize_command(command: &str, args: &[String]) -> String {
    let home = std::env::var("HOME").ok();
    let mut parts = vec![redact_text_with_home(command, home.as_deref())];
    let mut blank_next = false;

    for arg in args {
        if blank_next {
            parts.push(REDACTED.to_string());
            blank_next = false;
            continue;
        }
        if CREDENTIAL_FLAG.is_match(arg) {
            blank_next = true;
            parts.push(arg.clone());
            continue;
        }

        let clean = redact_text_with_home(arg, home.as_deref());
        if clean.chars().any(char::is_whitespace) {
            parts.push(format!("'{}'", clean));
        } else {
            parts.push(clean);
        }
    }

    parts.join(" ")
}

/// Redact secrets and private paths from free text.
pub fn redact_text(text: &str) -> String {
    redact_text_with_home(text, std::env::var("HOME").ok().as_deref())
}

/// Names of the secret patterns found in `text`.
pub fn detect_secrets(text: &str) -> Vec<&'static str> {
    SECRET_PATTERNS
        .iter()
        .filter(|p| p.regex.is_match(text))
        .map(|p| p.name)
        .collect()
}

fn redact_text_with_home(text: &str, home: Option<&str>) -> String {
    let mut out = CREDENTIAL_ASSIGNMENT
        .replace_all(text, format!("${{1}}{}", REDACTED).as_str())
        .into_owned();
    out = URL_CREDENTIALS
        .replace_all(&out, format!("$1:{}@", REDACTED).as_str())
        .into_owned();
    for pattern in SECRET_PATTERNS.iter() {
        out = pattern.regex.replace_all(&out, REDACTED).into_owned();
    }

    out = HIDDEN_HOME.replace_all(&out, HIDDEN_HOME_PATH).into_owned();
    if let Some(home) = home.filter(|h| h.len() > 1) {
        let home = home.trim_end_matches('/');
        if let Some(rest) = out.strip_prefix(home).filter(|rest| at_path_boundary(rest)) {
            out = format!("~{}", rest);
        }
        out = replace_after(&out, &format!("={}", home), "=~");
    }
    out
}

fn at_path_boundary(rest: &str) -> bool {
    rest.is_empty() || rest.starts_with('/') || rest.starts_with(char::is_whitespace)
}

/// Replace `from` with `to` wherever the text after it starts a new path
/// component or ends the word.
fn replace_after(text: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(from) {
        let tail = &rest[pos + from.len()..];
        out.push_str(&rest[..pos]);
        out.push_str(if at_path_boundary(tail) { to } else { from });
        rest = tail;
    }
    out.push_str(rest);
    out
}
