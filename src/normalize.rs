//! Domain, email, and column-key normalization.
//!
//! Pure functions at the row entry point. Everything here returns `Option`
//! on bad input and never panics; an unparseable value is simply absent.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::types::{Field, NormalizedInput};

/// Free-mail providers whose domains never identify a company.
const FREE_EMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "yahoo.co.uk",
    "outlook.com",
    "hotmail.com",
    "hotmail.co.uk",
    "live.com",
    "msn.com",
    "aol.com",
    "icloud.com",
    "me.com",
    "mac.com",
    "proton.me",
    "protonmail.com",
    "gmx.com",
    "gmx.net",
    "mail.com",
    "zoho.com",
    "yandex.com",
    "yandex.ru",
];

/// Service subdomains that never carry identity.
const SERVICE_SUBDOMAINS: &[&str] = &[
    "mail", "api", "cdn", "app", "apps", "static", "assets", "m", "blog", "shop", "store",
    "docs", "support", "help", "status",
];

/// Multi-part public suffixes that must survive subdomain stripping.
const MULTI_PART_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "co.jp", "ne.jp", "or.jp", "com.au",
    "net.au", "org.au", "co.nz", "co.in", "com.br", "com.mx", "com.sg", "com.hk", "co.za",
    "com.cn", "com.tr",
];

fn hostname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)+$")
            .expect("hostname pattern is valid")
    })
}

/// Options for [`normalize_domain`].
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Reduce to the registrable domain (drop all subdomains).
    pub strip_subdomain: bool,
    /// Drop path, query, and fragment.
    pub strip_path: bool,
    pub lowercase: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            strip_subdomain: true,
            strip_path: true,
            lowercase: true,
        }
    }
}

/// Canonicalize a domain or URL into a bare hostname.
///
/// Strips scheme, userinfo, port, path, query, and fragment; strips
/// recognized service subdomains (`www*`, `mail`, `api`, `cdn`, ...)
/// while preserving multi-part public suffixes (`co.uk` and friends).
/// Returns `None` for empty or invalid hostnames.
pub fn normalize_domain(input: &str, opts: NormalizeOptions) -> Option<String> {
    let mut s = input.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(idx) = s.find("://") {
        s = &s[idx + 3..];
    }
    if let Some(idx) = s.find('@') {
        // userinfo, or a bare email passed by mistake
        s = &s[idx + 1..];
    }
    if opts.strip_path {
        if let Some(idx) = s.find(['/', '?', '#']) {
            s = &s[..idx];
        }
    }
    if let Some(idx) = s.find(':') {
        s = &s[..idx];
    }

    let mut host = if opts.lowercase {
        s.to_ascii_lowercase()
    } else {
        s.to_string()
    };
    host = host.trim_matches('.').to_string();

    if !hostname_pattern().is_match(&host) {
        return None;
    }

    let labels: Vec<&str> = host.split('.').collect();
    let suffix_len = public_suffix_len(&labels);
    // A bare public suffix is not a usable domain.
    if labels.len() <= suffix_len {
        return None;
    }

    let registrable_start = labels.len() - suffix_len - 1;
    let kept = if opts.strip_subdomain {
        &labels[registrable_start..]
    } else {
        let mut start = 0;
        while start < registrable_start && is_service_label(labels[start]) {
            start += 1;
        }
        &labels[start..]
    };

    Some(kept.join("."))
}

fn public_suffix_len(labels: &[&str]) -> usize {
    if labels.len() >= 3 {
        let tail = format!("{}.{}", labels[labels.len() - 2], labels[labels.len() - 1]);
        if MULTI_PART_SUFFIXES.contains(&tail.as_str()) {
            return 2;
        }
    }
    1
}

fn is_service_label(label: &str) -> bool {
    label.starts_with("www") || SERVICE_SUBDOMAINS.contains(&label)
}

/// Whether a domain belongs to a free-mail provider.
pub fn is_free_email_domain(domain: &str) -> bool {
    FREE_EMAIL_DOMAINS.contains(&domain.to_ascii_lowercase().as_str())
}

/// Extract a company domain from an email address.
///
/// Returns `None` for malformed addresses and for free-mail providers,
/// whose domains say nothing about the sender's company.
pub fn extract_domain_from_email(email: &str) -> Option<String> {
    let email = email.trim();
    let mut parts = email.split('@');
    let local = parts.next()?;
    let domain_part = parts.next()?;
    if parts.next().is_some() || local.is_empty() || domain_part.is_empty() {
        return None;
    }

    let domain = normalize_domain(domain_part, NormalizeOptions::default())?;
    if is_free_email_domain(&domain) {
        return None;
    }
    Some(domain)
}

/// Map a user-facing column name to a canonical field.
///
/// Fixed alias table; canonical keys map to themselves.
pub fn map_column_key(key: &str) -> Option<Field> {
    let normalized = key.trim().to_ascii_lowercase().replace(['_', '-'], " ");
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    match normalized.as_str() {
        "name" | "full name" | "person" | "contact name" => Some(Field::Name),
        "company" | "company name" | "organization" | "organisation" | "employer" => {
            Some(Field::Company)
        }
        "title" | "job title" | "position" | "role" => Some(Field::Title),
        "email" | "email address" | "work email" => Some(Field::Email),
        "emailcandidates" | "email candidates" => Some(Field::EmailCandidates),
        "domain" | "company domain" => Some(Field::Domain),
        "website" | "url" | "site" | "homepage" | "web site" => Some(Field::Website),
        "industry" | "sector" => Some(Field::Industry),
        "location" | "city" | "region" | "country" => Some(Field::Location),
        "shortbio" | "short bio" | "bio" | "about" => Some(Field::ShortBio),
        "companysummary" | "company summary" | "company description" => {
            Some(Field::CompanySummary)
        }
        "sociallinks" | "social links" | "socials" => Some(Field::SocialLinks),
        "linkedinurl" | "linkedin" | "linkedin url" | "linkedin profile" => {
            Some(Field::LinkedinUrl)
        }
        "whois" => Some(Field::Whois),
        _ => None,
    }
}

/// Merge user-column-keyed row data into the canonical input shape.
///
/// Canonical keys win over aliases; later aliases never overwrite an
/// already-populated slot. Domains are canonicalized on the way in, and a
/// free-mail domain is dropped rather than stored.
pub fn normalize_row(
    table_id: &str,
    row_id: &str,
    raw: &HashMap<String, serde_json::Value>,
) -> NormalizedInput {
    let mut input = NormalizedInput::new(table_id, row_id);
    input.raw = raw.clone();

    // Two passes so canonical keys always take precedence.
    let mut entries: Vec<(&String, &serde_json::Value)> = raw.iter().collect();
    entries.sort_by_key(|(key, _)| {
        let canonical = Field::parse(key).is_some();
        (!canonical, key.to_string())
    });

    for (key, value) in entries {
        let Some(field) = Field::parse(key).or_else(|| map_column_key(key)) else {
            continue;
        };
        let Some(text) = value.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            continue;
        };

        match field {
            Field::Name => set_if_empty(&mut input.name, text),
            Field::Company => set_if_empty(&mut input.company, text),
            Field::LinkedinUrl => set_if_empty(&mut input.linkedin_url, text),
            Field::Email => {
                if text.matches('@').count() == 1 {
                    set_if_empty(&mut input.email, text);
                }
            }
            Field::Domain | Field::Website => {
                if input.domain.is_none() {
                    if let Some(domain) = normalize_domain(text, NormalizeOptions::default()) {
                        if !is_free_email_domain(&domain) {
                            input.domain = Some(domain);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    // Derive a company domain from the email when none was given.
    if input.domain.is_none() {
        if let Some(email) = input.email.clone() {
            input.domain = extract_domain_from_email(&email);
        }
    }

    input
}

fn set_if_empty(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}
