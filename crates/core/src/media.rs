//! Media reference classification.
//!
//! A frame's media reference must be a *durable reference* (an absolute URL
//! into the durable object store) before it may be persisted. Inline
//! payloads such as `data:` URIs and `blob:` handles are *ephemeral*: they
//! only exist in the session that produced them.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// Scheme prefixes that mark a value as an inline, session-local payload.
pub const EPHEMERAL_PATTERN: &str = r"(?i)^\s*(data|blob):";

/// Absolute `http(s)` URL; captures scheme and host.
pub const URL_PATTERN: &str = r"^(?i:(https?))://([A-Za-z0-9.-]+)(?::\d{1,5})?(?:[/?#]\S*)?$";

static EPHEMERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(EPHEMERAL_PATTERN).expect("valid regex"));

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(URL_PATTERN).expect("valid regex"));

/// Number of characters kept when a rejected value is echoed in diagnostics.
pub const PREVIEW_LEN: usize = 48;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What kind of value a media reference holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Addressable from any session through the durable object store.
    Durable,
    /// Inline payload (`data:` / `blob:`) that cannot sync across sessions.
    Ephemeral,
    /// Anything else: relative paths, bare names, foreign hosts, empty strings.
    NotDurable,
}

/// Rules deciding which URLs count as durable references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaPolicy {
    /// Hosts of the durable object store. Empty accepts any host.
    pub durable_hosts: Vec<String>,
    /// Accept plain `http://` URLs (local object stores, emulators).
    pub allow_insecure: bool,
}

impl MediaPolicy {
    /// Policy restricted to the given object-store hosts.
    pub fn with_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            durable_hosts: hosts.into_iter().map(|h| h.into().to_ascii_lowercase()).collect(),
            allow_insecure: false,
        }
    }

    /// Classify a media reference value.
    pub fn classify(&self, value: &str) -> MediaKind {
        if EPHEMERAL_RE.is_match(value) {
            return MediaKind::Ephemeral;
        }

        let Some(caps) = URL_RE.captures(value) else {
            return MediaKind::NotDurable;
        };

        let scheme = caps[1].to_ascii_lowercase();
        if scheme == "http" && !self.allow_insecure {
            return MediaKind::NotDurable;
        }

        let host = caps[2].to_ascii_lowercase();
        if !self.durable_hosts.is_empty() && !self.durable_hosts.iter().any(|h| *h == host) {
            return MediaKind::NotDurable;
        }

        MediaKind::Durable
    }

    /// Returns `true` if `value` is a durable reference under this policy.
    pub fn is_durable(&self, value: &str) -> bool {
        self.classify(value) == MediaKind::Durable
    }

    /// Same as [`is_durable`](Self::is_durable) for an optional value.
    pub fn holds_durable(&self, value: Option<&str>) -> bool {
        value.is_some_and(|v| self.is_durable(v))
    }
}

/// Truncated, log-safe rendering of a media value.
///
/// Inline payloads can be megabytes long; diagnostics only need the prefix.
pub fn preview(value: &str) -> String {
    if value.chars().count() <= PREVIEW_LEN {
        return value.to_string();
    }
    let head: String = value.chars().take(PREVIEW_LEN).collect();
    format!("{head}…")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
