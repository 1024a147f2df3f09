//! Concrete entropy providers.

pub mod rest;

pub use rest::{RestSource, fnv1a_64};

use std::sync::Arc;

use crate::error::SourceError;
use crate::source::EntropySource;

/// Provider names accepted by [`build_sources`].
pub const KNOWN_SOURCES: &[&str] = &["anu", "ethz", "nist"];

/// Providers used when none are named explicitly.
pub const DEFAULT_SOURCES: &[&str] = &["anu", "ethz"];

/// Construct providers by name (case-insensitive).
///
/// `anu` requires an API key.
pub fn build_sources(
    names: &[&str],
    anu_key: Option<&str>,
) -> Result<Vec<Arc<dyn EntropySource>>, SourceError> {
    let mut out: Vec<Arc<dyn EntropySource>> = Vec::with_capacity(names.len());
    for name in names {
        let source = match name.trim().to_ascii_lowercase().as_str() {
            "anu" => RestSource::anu(anu_key.unwrap_or_default())?,
            "ethz" => RestSource::ethz()?,
            "nist" => RestSource::nist_beacon()?,
            other => {
                return Err(SourceError::InvalidConfig {
                    provider: other.to_string(),
                    reason: format!("unknown source, expected one of {}", KNOWN_SOURCES.join(", ")),
                });
            }
        };
        out.push(Arc::new(source));
    }
    if out.is_empty() {
        return Err(SourceError::NoSources);
    }
    Ok(out)
}
