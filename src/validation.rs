use std::sync::LazyLock;

use regex::Regex;

use crate::models::Link;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(([^<>()\[\]\\.,;:\s@"]+(\.[^<>()\[\]\\.,;:\s@"]+)*)|(".+"))@((\[[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\])|(([a-zA-Z\-0-9]+\.)+[a-zA-Z]{2,}))$"#,
    )
    .expect("email pattern compiles")
});

static MOBILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+\d+$").expect("mobile pattern compiles"));

static DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern compiles"));

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^http(s)?://(www\.)?youtu(be\.com|.be)/.+$").expect("youtube pattern compiles")
});

// One link per line: "- <title> (<url>)."
static LINK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-\s+(.+?)\s+\((\S+)\)\.$").expect("link pattern compiles"));

pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(&email.to_lowercase())
}

pub fn is_valid_mobile(mobile: &str) -> bool {
    MOBILE.is_match(mobile)
}

pub fn is_valid_date(date: &str) -> bool {
    DATE.is_match(date)
}

pub fn is_valid_youtube_url(url: &str) -> bool {
    YOUTUBE_URL.is_match(url)
}

/// Parses markdown-ish link lists; lines that don't follow the pattern are
/// skipped.
pub fn parse_references(text: &str) -> Vec<Link> {
    text.lines()
        .filter_map(|line| {
            let captures = LINK_LINE.captures(line.trim())?;
            Some(Link {
                title: captures[1].to_string(),
                url: captures[2].to_string(),
            })
        })
        .collect()
}

/// Renders links back into the line format accepted by `parse_references`.
pub fn format_references(links: &[Link]) -> String {
    links
        .iter()
        .map(|link| format!("- {} ({}).", link.title, link.url))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Treats absent and blank values alike.
pub fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
