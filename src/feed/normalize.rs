use url::Url;

use crate::error::{AppError, Result};

/// Query parameters that identify a campaign or click, never the article.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "yclid", "igshid", "mc_cid", "mc_eid", "_ga", "ocid",
    "cmpid", "smid", "ref", "ref_src", "at_medium", "at_campaign", "CMP",
];

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_")
        || TRACKING_PARAMS
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&lower))
}

/// Canonical form of an article URL: scheme and host lowercased, default
/// port, fragment and tracking parameters dropped, trailing slash removed.
pub fn canonical_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| AppError::Validation(format!("invalid article URL '{}': {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "unsupported URL scheme '{}' in '{}'",
            url.scheme(),
            raw
        )));
    }
    if url.host_str().is_none() {
        return Err(AppError::Validation(format!("URL has no host: '{}'", raw)));
    }

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let mut canonical = url.to_string();
    if url.path() == "/" && url.query().is_none() {
        canonical.pop();
    }
    Ok(canonical)
}

/// Plain text from a feed summary: markup stripped, whitespace collapsed.
pub fn clean_text(input: &str) -> String {
    let text = if input.contains('<') || input.contains('&') {
        match html2text::from_read(input.as_bytes(), 10_000) {
            Ok(rendered) => rendered
                .lines()
                .filter(|line| !is_link_footnote(line))
                .collect::<Vec<_>>()
                .join(" "),
            Err(e) => {
                tracing::debug!("Failed to convert summary HTML to text: {}", e);
                input.to_string()
            }
        }
    } else {
        input.to_string()
    };

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// html2text appends "[1]: https://..." reference lines for links.
fn is_link_footnote(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with('[')
        && line
            .find("]: ")
            .map(|end| line[1..end].chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
}
