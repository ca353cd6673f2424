//! Maps source object keys onto destination keys.
//!
//! Pure string work: no I/O, no allocation beyond the returned key. The
//! extension rules only kick in when a custom extension is configured.

use crate::models::copy::CopyOptions;
use regex::Regex;
use std::sync::LazyLock;

const SEPARATOR: char = '/';

/// `YYYY/MM/DD/name` at the end of a key.
static DATED_FOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9]{4}/[0-9]{2}/[0-9]{2}/[^/]+$").expect("dated folder pattern is valid")
});

/// Make a non-empty prefix end with the path separator.
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with(SEPARATOR) {
        prefix.to_string()
    } else {
        format!("{prefix}{SEPARATOR}")
    }
}

/// Compute the destination key for `source_key`.
///
/// The source prefix is swapped for the destination prefix, then the
/// configured extension is applied:
/// - with `apply_custom_extension`, an existing extension is replaced;
/// - a key without an extension gets one appended when
///   `add_extension_to_files_without_ext` is set or the key sits in a
///   `YYYY/MM/DD/` folder.
///
/// Directory markers (keys ending in `/`) are never touched.
pub fn translate(
    source_key: &str,
    source_prefix: &str,
    destination_prefix: &str,
    options: &CopyOptions,
    extension: Option<&str>,
) -> String {
    let source_prefix = normalize_prefix(source_prefix);
    let destination_prefix = normalize_prefix(destination_prefix);

    let relative = source_key
        .strip_prefix(source_prefix.as_str())
        .unwrap_or(source_key);
    let key = format!("{destination_prefix}{relative}");

    let Some(ext) = extension.map(|e| e.trim_start_matches('.')).filter(|e| !e.is_empty())
    else {
        return key;
    };
    if key.ends_with(SEPARATOR) {
        return key;
    }

    let file_name_start = key.rfind(SEPARATOR).map_or(0, |i| i + 1);
    let extension_dot = key[file_name_start..]
        .rfind('.')
        .map(|i| file_name_start + i);

    match extension_dot {
        Some(dot) if options.apply_custom_extension => format!("{}.{ext}", &key[..dot]),
        None if options.add_extension_to_files_without_ext || DATED_FOLDER.is_match(&key) => {
            format!("{key}.{ext}")
        }
        _ => key,
    }
}
