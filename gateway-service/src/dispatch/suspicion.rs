//! Heuristic suspicion scoring for anonymous auth endpoints.
//!
//! Each signal adds a non-negative weight, so a request never scores lower
//! by sending less. A full set of ordinary browser headers scores zero.

use axum::http::{header, HeaderMap};
use isbot::Bots;
use once_cell::sync::Lazy;

static BOTS: Lazy<Bots> = Lazy::new(Bots::default);

/// User-Agent fragments of automation tooling that still self-identifies.
const AUTOMATION_SIGNATURES: &[&str] = &[
    "headlesschrome",
    "phantomjs",
    "puppeteer",
    "playwright",
    "selenium",
    "electron",
    "curl/",
    "wget/",
    "python-requests",
    "python-urllib",
    "go-http-client",
    "java/",
    "okhttp",
    "httpie",
];

#[derive(Debug, Clone)]
pub struct SuspicionReport {
    pub score: u32,
    pub signals: Vec<&'static str>,
}

impl SuspicionReport {
    pub fn is_likely_bot(&self, threshold: u32) -> bool {
        self.score >= threshold
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Score the request headers of an anonymous JSON auth endpoint.
pub fn score_request(headers: &HeaderMap, allowed_origins: &[String]) -> SuspicionReport {
    let mut score = 0u32;
    let mut signals = Vec::new();
    fn add(score: &mut u32, signals: &mut Vec<&'static str>, weight: u32, signal: &'static str) {
        *score += weight;
        signals.push(signal);
    }

    let user_agent = header_str(headers, "user-agent").unwrap_or("");
    if user_agent.is_empty() {
        add(&mut score, &mut signals, 100, "missing_user_agent");
    } else {
        if BOTS.is_bot(user_agent) {
            add(&mut score, &mut signals, 120, "known_bot_user_agent");
        }
        let lowered = user_agent.to_ascii_lowercase();
        if AUTOMATION_SIGNATURES.iter().any(|sig| lowered.contains(sig)) {
            add(&mut score, &mut signals, 120, "automation_user_agent");
        }
    }

    match header_str(headers, "sec-fetch-site") {
        None => add(&mut score, &mut signals, 40, "missing_sec_fetch_site"),
        Some("cross-site") => add(&mut score, &mut signals, 60, "cross_site_sec_fetch"),
        Some(_) => {}
    }
    if headers.get("sec-fetch-mode").is_none() {
        add(&mut score, &mut signals, 20, "missing_sec_fetch_mode");
    }

    match header_str(headers, "origin") {
        None => add(&mut score, &mut signals, 40, "missing_origin"),
        Some(origin) => {
            if !allowed_origins.iter().any(|o| o == origin) {
                add(&mut score, &mut signals, 80, "origin_mismatch");
            }
        }
    }

    match header_str(headers, "referer") {
        None => add(&mut score, &mut signals, 20, "missing_referer"),
        Some(referer) => {
            if !allowed_origins.iter().any(|o| referer.starts_with(o.as_str())) {
                add(&mut score, &mut signals, 40, "referer_mismatch");
            }
        }
    }

    if headers.get(header::ACCEPT).is_none() {
        add(&mut score, &mut signals, 20, "missing_accept");
    }
    if headers.get(header::ACCEPT_LANGUAGE).is_none() {
        add(&mut score, &mut signals, 30, "missing_accept_language");
    }
    if headers.get(header::ACCEPT_ENCODING).is_none() {
        add(&mut score, &mut signals, 30, "missing_accept_encoding");
    }

    // These endpoints only take JSON bodies
    let json_content_type = header_str(headers, "content-type")
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);
    if !json_content_type {
        add(&mut score, &mut signals, 50, "unexpected_content_type");
    }

    SuspicionReport { score, signals }
}
