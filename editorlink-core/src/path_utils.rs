//! Editor content path utilities
//!
//! Clients send asset locations in many shapes (`Blueprints/Enemies`,
//! `\Game\Blueprints\`, `/Content/Blueprints`). These helpers map them onto a
//! single canonical `/Game/...` form so equivalent requests share one key.

/// Root of the project content mount
pub const CONTENT_ROOT: &str = "/Game";

/// Normalize path to forward slashes
#[inline]
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Canonicalize a save path to `/Game/...` form.
///
/// An empty path maps to [`CONTENT_ROOT`].
pub fn normalize_content_path(path: &str) -> String {
    let mut path = normalize_path(path.trim());
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    let path = path.trim_end_matches('/');

    if path.is_empty() {
        return CONTENT_ROOT.to_string();
    }

    if has_prefix_ignore_case(path, "/Content") {
        let rest = &path["/Content".len()..];
        if rest.is_empty() || rest.starts_with('/') {
            return format!("{}{}", CONTENT_ROOT, rest);
        }
    }

    if path == CONTENT_ROOT || path.starts_with("/Game/") {
        return path.to_string();
    }

    format!("{}/{}", CONTENT_ROOT, path.trim_start_matches('/'))
}

fn has_prefix_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Join a canonical content path and an asset name
pub fn join_asset_path(save_path: &str, name: &str) -> String {
    format!("{}/{}", normalize_content_path(save_path), name.trim())
}
