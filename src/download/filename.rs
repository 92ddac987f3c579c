//! Target path derivation for downloaded media.
//!
//! Filenames are slugs of the (already normalized) title; directory layout
//! depends on single-file mode and attached episode metadata.

use std::path::{Path, PathBuf};

use url::Url;

/// Slugifies a title with `_` separators, keeping the original case.
#[must_use]
pub fn slug(title: &str) -> String {
    slug_with_separator(title, '_')
}

/// Slugifies a title with a caller-chosen separator.
///
/// Alphanumerics (including umlauts and other letters) are kept, runs of
/// everything else collapse into a single separator. Apostrophes vanish
/// entirely so `Don't` becomes `Dont`, not `Don_t`.
#[must_use]
pub fn slug_with_separator(title: &str, separator: char) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_sep = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push(separator);
            }
            pending_sep = false;
            out.push(c);
        } else if c != '\'' {
            pending_sep = true;
        }
    }
    out
}

/// Extracts a usable filename from the last path segment of a URL.
///
/// Returns `None` when the URL does not parse or the segment is empty.
#[must_use]
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    if segment.is_empty() {
        return None;
    }
    Some(segment.to_string())
}

/// Derives the final target path for a candidate.
///
/// - Single-file mode: `root/slug(title).{format}`.
/// - Directory mode: `root/slug(title)/{url segment}`, falling back to
///   `slug(title).{format}` when the URL yields no usable segment.
/// - With episode metadata, the slug is nested under
///   `Staffel {season}/S{season:02}E{episode:02}_{slug}`.
#[must_use]
pub fn target_path(
    root: &Path,
    title: &str,
    format: &str,
    url: &str,
    single_file: bool,
    episode: Option<(i64, i64)>,
) -> PathBuf {
    let base_slug = slug(title);
    let (dir, stem) = match episode {
        Some((season, ep)) => (
            root.join(format!("Staffel {season}")),
            format!("S{season:02}E{ep:02}_{base_slug}"),
        ),
        None => (root.to_path_buf(), base_slug),
    };

    if single_file {
        dir.join(format!("{stem}.{format}"))
    } else {
        let filename =
            filename_from_url(url).unwrap_or_else(|| format!("{stem}.{format}"));
        dir.join(stem).join(filename)
    }
}

/// Sibling path the in-flight transfer writes to.
///
/// Lives next to the final path so the commit rename stays on one
/// filesystem and is atomic.
#[must_use]
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".partial");
    final_path.with_file_name(name)
}
