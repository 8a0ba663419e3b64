use std::sync::OnceLock;

use anyhow::{anyhow, Context};
use regex::Regex;

use crate::config::Bitrate;

/// Identity of an encoded variant as recovered from its file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariantKey {
    /// Clip base name, the file name minus its final underscore-delimited segment.
    pub base: String,

    /// Final segment with the extension removed, e.g. `1M`.
    pub tag: String,

    /// Numeric value of the tag, e.g. `1` for `1M`.
    pub value: u64,

    /// The tag read as a rate label, e.g. `1_000_000` for `1M` and `500_000` for `500K`.
    pub bits_per_second: u64,
}

#[allow(clippy::unwrap_used)]
fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();

    PATTERN.get_or_init(|| Regex::new(r"^(\d+)[KkMmGg]$").unwrap())
}

fn strip_extension(segment: &str) -> &str {
    segment
        .rsplit_once('.')
        .map_or(segment, |(stem, _extension)| stem)
}

/// Splits `football_4k_1M.mp4` into base `football_4k` and tag `1M` (value 1).
///
/// A tag that is not a number with a unit suffix falls back to being read as a bare integer
/// (surrounding whitespace allowed); when that also fails the name is rejected.
pub fn parse_variant_filename(filename: &str) -> anyhow::Result<VariantKey> {
    let (base, last) = filename
        .rsplit_once('_')
        .ok_or_else(|| anyhow!("File name '{filename}' has no underscore-delimited variant tag"))?;

    if base.is_empty() {
        return Err(anyhow!("File name '{filename}' has an empty clip base name"));
    }

    let tag = strip_extension(last);

    let value = if let Some(captures) = tag_pattern().captures(tag) {
        captures
            .get(1)
            .ok_or_else(|| anyhow!("Unreachable code reached"))?
            .as_str()
            .parse::<u64>()
            .with_context(|| format!("Variant tag '{tag}' in '{filename}' is out of range"))?
    } else {
        tag.trim()
            .parse::<u64>()
            .with_context(|| format!("Unable to parse variant tag '{tag}' in '{filename}'"))?
    };

    let bits_per_second = Bitrate::parse(tag)
        .with_context(|| format!("Variant tag '{tag}' in '{filename}' is not a bitrate"))?
        .bits_per_second();

    Ok(VariantKey {
        base: base.to_owned(),
        tag: tag.to_owned(),
        value,
        bits_per_second,
    })
}
