//! Artifact reference parsing.
//!
//! Model artifacts are referenced either fully qualified
//! (`s3://container/path/to/key`) or bare (`container/path/to/key`). Parsing
//! is pure: no I/O, no normalisation of the key beyond stripping the scheme.

use std::fmt;

use crate::error::{ControlError, ControlResult};

const SCHEME_SEPARATOR: &str = "://";

/// Container and key of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    /// Bucket-equivalent container name.
    pub container: String,
    /// Object key within the container, percent-encoding preserved.
    pub key: String,
}

impl ArtifactLocation {
    /// Parse a store reference.
    ///
    /// A leading `scheme://` token is matched case-insensitively and
    /// stripped. Fails with [`ControlError::MalformedReference`] when the
    /// remainder has no `/` separator or either side of it is empty.
    pub fn parse(reference: &str) -> ControlResult<Self> {
        let trimmed = reference.trim();
        let path = strip_scheme(trimmed);

        let (container, key) = path
            .split_once('/')
            .ok_or_else(|| ControlError::MalformedReference(reference.to_owned()))?;

        if container.is_empty() || key.is_empty() {
            return Err(ControlError::MalformedReference(reference.to_owned()));
        }

        Ok(Self {
            container: container.to_owned(),
            key: key.to_owned(),
        })
    }
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

fn strip_scheme(reference: &str) -> &str {
    match reference.find(SCHEME_SEPARATOR) {
        Some(pos) if is_scheme(&reference[..pos]) => &reference[pos + SCHEME_SEPARATOR.len()..],
        _ => reference,
    }
}

// RFC 3986: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )
fn is_scheme(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
