use crate::error::{Result, TypesError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of interaction an order buys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Like,
    Follow,
    Comment,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Like => "like",
            InteractionKind::Follow => "follow",
            InteractionKind::Comment => "comment",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const INSTAGRAM_HOSTS: &[&str] = &["instagram.com", "www.instagram.com"];

/// Syntactic check that a target URL points at Instagram content.
///
/// Accepts `https://instagram.com/...` and `https://www.instagram.com/...`
/// with a non-empty path. No network I/O; whether the target actually exists
/// is the adapter's concern at validation time.
pub fn validate_target_url(kind: InteractionKind, url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .ok_or_else(|| TypesError::InvalidTarget(format!("target must use https: {}", url)))?;

    let (host, path) = rest
        .split_once('/')
        .ok_or_else(|| TypesError::InvalidTarget(format!("target has no path: {}", url)))?;

    if !INSTAGRAM_HOSTS.contains(&host) {
        return Err(TypesError::InvalidTarget(format!(
            "target host is not instagram.com: {}",
            host
        )));
    }

    if path.trim_matches('/').is_empty() {
        return Err(TypesError::InvalidTarget(format!(
            "target path is empty for {} target: {}",
            kind, url
        )));
    }

    Ok(())
}

/// Full precondition check for an order target: URL shape plus the
/// comment-specific requirement that `required_text` is non-empty.
pub fn validate_order_target(
    kind: InteractionKind,
    url: &str,
    required_text: Option<&str>,
) -> Result<()> {
    validate_target_url(kind, url)?;

    if kind == InteractionKind::Comment {
        match required_text {
            Some(text) if !text.trim().is_empty() => {}
            _ => {
                return Err(TypesError::InvalidTarget(
                    "comment orders require a non-empty required_text".to_string(),
                ))
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_instagram_urls() {
        validate_target_url(InteractionKind::Like, "https://instagram.com/p/abc123/").unwrap();
        validate_target_url(InteractionKind::Follow, "https://www.instagram.com/someuser").unwrap();
    }

    #[test]
    fn test_rejects_non_instagram() {
        assert!(validate_target_url(InteractionKind::Like, "https://example.com/p/abc").is_err());
        assert!(validate_target_url(InteractionKind::Like, "http://instagram.com/p/abc").is_err());
        assert!(validate_target_url(InteractionKind::Follow, "https://instagram.com/").is_err());
        assert!(validate_target_url(InteractionKind::Follow, "https://instagram.com").is_err());
    }

    #[test]
    fn test_comment_requires_text() {
        let url = "https://instagram.com/p/abc123/";
        assert!(validate_order_target(InteractionKind::Comment, url, None).is_err());
        assert!(validate_order_target(InteractionKind::Comment, url, Some("  ")).is_err());
        validate_order_target(InteractionKind::Comment, url, Some("nice post")).unwrap();
        validate_order_target(InteractionKind::Like, url, None).unwrap();
    }
}
