//! Variant filename resolution.
//!
//! Requested filenames encode the derivation in the name itself:
//!
//! - `640x480-q80.webp` - exact dimensions, explicit quality
//! - `x300.jpg` - square, 300 on both sides
//! - `w250.webp` - width 250, height scaled to preserve aspect ratio
//! - `full_size.png` - original dimensions, re-encoded
//!
//! The `-qNN` quality token is optional in every grammar. A name matching
//! none of the grammars but ending in a short extension is treated as an
//! opaque original and passed through untouched. A name with no extension
//! at all does not resolve.
//!
//! Numeric tokens degrade independently rather than failing the parse: a
//! dimension that does not parse becomes 0, a quality that is missing,
//! zero, or unparseable becomes the configured default.

use crate::config::ServerConfig;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// One derived image: the dimensions, quality, and format requested by a
/// variant filename, plus the filename itself for cache placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSpec {
    /// Target width in pixels. Zero means "keep the source width".
    pub width: u32,
    /// Target height in pixels. Zero means "derive from width" (or keep
    /// the source height when width is also zero).
    pub height: u32,
    /// Encoding quality, 1-100. Zero only on pass-through specs.
    pub quality: u8,
    /// Output encoding, e.g. `jpg` or `webp`.
    pub format: String,
    /// The filename the variant is cached and served under.
    pub filename: String,
}

impl VariantSpec {
    /// Whether this spec is an opaque original: no scaling, no re-encode,
    /// the source bytes are served as-is.
    pub fn is_passthrough(&self) -> bool {
        self.width == 0 && self.height == 0 && self.quality == 0
    }

    /// The width to actually render, after the configured cap.
    ///
    /// A zero cap disables clamping.
    pub fn clamped_width(&self, maximum_width: u32) -> u32 {
        if maximum_width == 0 {
            self.width
        } else {
            self.width.min(maximum_width)
        }
    }
}

impl fmt::Display for VariantSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}x{} q{} {})",
            self.filename, self.width, self.height, self.quality, self.format
        )
    }
}

/// Error resolving a variant filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The name carries no recognizable extension, so neither a variant
    /// nor an opaque original can be derived from it.
    NoExtension(String),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NoExtension(name) => {
                write!(f, "filename '{name}' has no recognizable extension")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

fn dimensions_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^([0-9]+)x([0-9]+)(?:-q([0-9]+))?\.(\w{3,5})$").unwrap())
}

fn square_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^x([0-9]+)(?:-q([0-9]+))?\.(\w{3,5})$").unwrap())
}

fn width_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^w([0-9]+)(?:-q([0-9]+))?\.(\w{3,5})$").unwrap())
}

fn full_size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^full_size(?:-q([0-9]+))?\.(\w{3,5})$").unwrap())
}

fn extension_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\.(\w{3,5})$").unwrap())
}

/// Resolves a variant filename into a [`VariantSpec`].
///
/// The grammars are tried in order from most to least specific; the first
/// match wins. Names matching no grammar resolve as pass-through when they
/// end in a 3-5 character extension, and fail otherwise.
pub fn resolve_variant(config: &ServerConfig, filename: &str) -> Result<VariantSpec, ResolveError> {
    if let Some(captures) = dimensions_pattern().captures(filename) {
        return Ok(VariantSpec {
            width: parse_dimension(captures.get(1)),
            height: parse_dimension(captures.get(2)),
            quality: parse_quality(config, captures.get(3)),
            format: captures[4].to_string(),
            filename: filename.to_string(),
        });
    }

    if let Some(captures) = square_pattern().captures(filename) {
        let side = parse_dimension(captures.get(1));
        return Ok(VariantSpec {
            width: side,
            height: side,
            quality: parse_quality(config, captures.get(2)),
            format: captures[3].to_string(),
            filename: filename.to_string(),
        });
    }

    if let Some(captures) = width_pattern().captures(filename) {
        return Ok(VariantSpec {
            width: parse_dimension(captures.get(1)),
            height: 0,
            quality: parse_quality(config, captures.get(2)),
            format: captures[3].to_string(),
            filename: filename.to_string(),
        });
    }

    if let Some(captures) = full_size_pattern().captures(filename) {
        return Ok(VariantSpec {
            width: 0,
            height: 0,
            quality: parse_quality(config, captures.get(1)),
            format: captures[2].to_string(),
            filename: filename.to_string(),
        });
    }

    if let Some(captures) = extension_pattern().captures(filename) {
        return Ok(VariantSpec {
            width: 0,
            height: 0,
            quality: 0,
            format: captures[1].to_string(),
            filename: filename.to_string(),
        });
    }

    Err(ResolveError::NoExtension(filename.to_string()))
}

/// Parses a captured dimension, falling back to 0 when absent or out of
/// range. The rest of the spec stays usable either way.
fn parse_dimension(capture: Option<regex::Match<'_>>) -> u32 {
    capture
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(0)
}

/// Parses a captured quality token. Absent, zero, or unparseable tokens
/// all substitute the configured default.
fn parse_quality(config: &ServerConfig, capture: Option<regex::Match<'_>>) -> u8 {
    let parsed = capture
        .and_then(|m| m.as_str().parse::<u8>().ok())
        .unwrap_or(0);
    if parsed == 0 {
        config.default_quality
    } else {
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig::default().with_default_quality(75)
    }

    #[test]
    fn test_resolves_explicit_dimensions_and_quality() {
        let spec = resolve_variant(&config(), "640x480-q80.webp").unwrap();
        assert_eq!(spec.width, 640);
        assert_eq!(spec.height, 480);
        assert_eq!(spec.quality, 80);
        assert_eq!(spec.format, "webp");
        assert_eq!(spec.filename, "640x480-q80.webp");
        assert!(!spec.is_passthrough());
    }

    #[test]
    fn test_dimensions_without_quality_use_default() {
        let spec = resolve_variant(&config(), "300x200.jpg").unwrap();
        assert_eq!(spec.width, 300);
        assert_eq!(spec.height, 200);
        assert_eq!(spec.quality, 75);
        assert_eq!(spec.format, "jpg");
    }

    #[test]
    fn test_square_grammar_sets_both_sides() {
        let spec = resolve_variant(&config(), "x300.jpg").unwrap();
        assert_eq!(spec.width, 300);
        assert_eq!(spec.height, 300);
        assert_eq!(spec.quality, 75);
        assert_eq!(spec.format, "jpg");
    }

    #[test]
    fn test_square_grammar_with_quality() {
        let spec = resolve_variant(&config(), "x120-q45.gif").unwrap();
        assert_eq!(spec.width, 120);
        assert_eq!(spec.height, 120);
        assert_eq!(spec.quality, 45);
        assert_eq!(spec.format, "gif");
    }

    #[test]
    fn test_width_grammar_leaves_height_unconstrained() {
        let spec = resolve_variant(&config(), "w250.webp").unwrap();
        assert_eq!(spec.width, 250);
        assert_eq!(spec.height, 0);
        assert_eq!(spec.quality, 75);
        assert_eq!(spec.format, "webp");
        assert!(!spec.is_passthrough());
    }

    #[test]
    fn test_full_size_keeps_dimensions_but_reencodes() {
        let spec = resolve_variant(&config(), "full_size.png").unwrap();
        assert_eq!(spec.width, 0);
        assert_eq!(spec.height, 0);
        assert_eq!(spec.quality, 75);
        assert_eq!(spec.format, "png");
        assert!(!spec.is_passthrough(), "full_size is a re-encode, not a copy");
    }

    #[test]
    fn test_full_size_with_explicit_quality() {
        let spec = resolve_variant(&config(), "full_size-q90.jpg").unwrap();
        assert_eq!(spec.quality, 90);
        assert_eq!(spec.format, "jpg");
    }

    #[test]
    fn test_unrecognized_name_with_extension_is_passthrough() {
        let spec = resolve_variant(&config(), "original.png").unwrap();
        assert_eq!(spec.width, 0);
        assert_eq!(spec.height, 0);
        assert_eq!(spec.quality, 0);
        assert_eq!(spec.format, "png");
        assert_eq!(spec.filename, "original.png");
        assert!(spec.is_passthrough());
    }

    #[test]
    fn test_passthrough_keeps_long_opaque_names() {
        let spec = resolve_variant(&config(), "catalog-photo_2024.jpeg").unwrap();
        assert!(spec.is_passthrough());
        assert_eq!(spec.format, "jpeg");
        assert_eq!(spec.filename, "catalog-photo_2024.jpeg");
    }

    #[test]
    fn test_name_without_extension_does_not_resolve() {
        let err = resolve_variant(&config(), "thumbnail").unwrap_err();
        assert_eq!(err, ResolveError::NoExtension("thumbnail".to_string()));
    }

    #[test]
    fn test_extension_outside_length_bounds_does_not_resolve() {
        assert!(resolve_variant(&config(), "photo.ab").is_err());
        assert!(resolve_variant(&config(), "photo.verylongext").is_err());
    }

    #[test]
    fn test_unparseable_quality_falls_back_to_default() {
        // 999 does not fit the quality range, the dimension still applies.
        let spec = resolve_variant(&config(), "x300-q999.jpg").unwrap();
        assert_eq!(spec.width, 300);
        assert_eq!(spec.quality, 75);
    }

    #[test]
    fn test_zero_quality_substitutes_default() {
        let spec = resolve_variant(&config(), "x300-q0.jpg").unwrap();
        assert_eq!(spec.quality, 75);
        assert!(!spec.is_passthrough());
    }

    #[test]
    fn test_overflowing_dimension_falls_back_to_zero() {
        let spec = resolve_variant(&config(), "99999999999x10.jpg").unwrap();
        assert_eq!(spec.width, 0);
        assert_eq!(spec.height, 10);
        assert_eq!(spec.quality, 75);
    }

    #[test]
    fn test_grammar_prefixes_are_case_sensitive() {
        // "X300" matches no grammar, so the name falls through as opaque.
        let spec = resolve_variant(&config(), "X300.jpg").unwrap();
        assert!(spec.is_passthrough());
    }

    #[test]
    fn test_clamped_width_respects_cap() {
        let spec = resolve_variant(&config(), "2000x500.jpg").unwrap();
        assert_eq!(spec.clamped_width(1000), 1000);
        assert_eq!(spec.clamped_width(0), 2000);
        assert_eq!(spec.clamped_width(3000), 2000);
    }
}
