//! Name and path string helpers used by resolution.
//!
//! Paths use `\` separators. A leading `\\server\share` names the global
//! root's server and a share beneath it.

use crate::hash::names_equal_ignore_case;

const SYS_NAME_TOKEN: &str = "@sys";
const INVALID_NAME_CHARS: &[char] = &[':', '*', '?', '"', '<', '>'];
const INVALID_8DOT3_CHARS: &[char] = &[
    '"', '*', '+', ',', '/', ':', ';', '<', '=', '>', '?', '[', '\\', ']', '|', ' ',
];

/// Converts `/` separators to `\`.
pub fn update_name(name: &str) -> String {
    name.replace('/', "\\")
}

pub fn is_relative_name(name: &str) -> bool {
    !name.starts_with('\\')
}

/// Splits a path on `\`, dropping empty components.
pub fn split_components(path: &str) -> Vec<String> {
    path.split('\\')
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Splits `path` into its parent portion and final component.
pub fn retrieve_final_component(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('\\');
    match trimmed.rfind('\\') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => ("", trimmed),
    }
}

/// Nothing but separators remain.
pub fn is_final_node(remaining: &str) -> bool {
    remaining.chars().all(|c| c == '\\')
}

/// Rejects names carrying characters the namespace cannot hold.
pub fn valid_name_format(name: &str) -> bool {
    !name.is_empty() && !name.contains(INVALID_NAME_CHARS)
}

/// Name fits the DOS 8.3 form: 1-8 name characters, optionally a dot and 1-3 more.
pub fn is_dos_8dot3_legal(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    if name.contains(INVALID_8DOT3_CHARS) || name.chars().any(|c| (c as u32) < 0x20) {
        return false;
    }
    let mut parts = name.splitn(2, '.');
    let base = parts.next().unwrap_or("");
    let ext = parts.next();
    let base_len = base.chars().count();
    if base_len == 0 || base_len > 8 {
        return false;
    }
    match ext {
        None => true,
        Some(ext) => {
            let ext_len = ext.chars().count();
            ext_len > 0 && ext_len <= 3 && !ext.contains('.')
        }
    }
}

/// Component ends with the `@sys` token.
pub fn contains_sys_name(component: &str) -> bool {
    sys_name_position(component).is_some()
}

fn sys_name_position(component: &str) -> Option<usize> {
    let token_len = SYS_NAME_TOKEN.len();
    if component.len() < token_len || !component.is_char_boundary(component.len() - token_len) {
        return None;
    }
    let pos = component.len() - token_len;
    if names_equal_ignore_case(&component[pos..], SYS_NAME_TOKEN) {
        Some(pos)
    } else {
        None
    }
}

/// Replaces the `@sys` token in `component` with `sys_name`.
///
/// A component that is exactly `@sys` becomes `sys_name`; otherwise the
/// text from `@` onward is replaced.
pub fn substitute_sys_name(component: &str, sys_name: &str) -> Option<String> {
    let pos = sys_name_position(component)?;
    let mut out = String::with_capacity(pos + sys_name.len());
    out.push_str(&component[..pos]);
    out.push_str(sys_name);
    Some(out)
}

/// Replaces component `index` of `path` with `replacement`, keeping the separators.
pub fn substitute_name_in_path(path: &str, index: usize, replacement: &str) -> Option<String> {
    let leading = path.len() - path.trim_start_matches('\\').len();
    let trailing = path.ends_with('\\') && path.len() > leading;
    let mut components = split_components(path);
    let slot = components.get_mut(index)?;
    *slot = replacement.to_string();
    let mut out = "\\".repeat(leading);
    out.push_str(&components.join("\\"));
    if trailing {
        out.push('\\');
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_name() {
        assert_eq!(update_name("a/b/c"), "a\\b\\c");
        assert_eq!(update_name("/abs/x"), "\\abs\\x");
    }

    #[test]
    fn test_is_relative_name() {
        assert!(is_relative_name("a\\b"));
        assert!(is_relative_name("..\\x"));
        assert!(!is_relative_name("\\a"));
    }

    #[test]
    fn test_split_components() {
        assert_eq!(split_components("\\\\AFS\\cell\\a\\"), vec!["AFS", "cell", "a"]);
        assert!(split_components("\\").is_empty());
    }

    #[test]
    fn test_retrieve_final_component() {
        assert_eq!(retrieve_final_component("\\a\\b\\c"), ("\\a\\b", "c"));
        assert_eq!(retrieve_final_component("c"), ("", "c"));
        assert_eq!(retrieve_final_component("\\a\\b\\"), ("\\a", "b"));
    }

    #[test]
    fn test_is_final_node() {
        assert!(is_final_node(""));
        assert!(is_final_node("\\"));
        assert!(!is_final_node("\\x"));
    }

    #[test]
    fn test_valid_name_format() {
        assert!(valid_name_format("report.txt"));
        assert!(valid_name_format("a b"));
        for bad in ["a:b", "a*", "what?", "\"q\"", "<x", "y>"] {
            assert!(!valid_name_format(bad), "{}", bad);
        }
        assert!(!valid_name_format(""));
    }

    #[test]
    fn test_dos_8dot3() {
        assert!(is_dos_8dot3_legal("README"));
        assert!(is_dos_8dot3_legal("PROGRA~1"));
        assert!(is_dos_8dot3_legal("a.txt"));
        assert!(is_dos_8dot3_legal("ABCDEFGH.IJK"));
        assert!(!is_dos_8dot3_legal("ABCDEFGHI"));
        assert!(!is_dos_8dot3_legal("a.text"));
        assert!(!is_dos_8dot3_legal("a.b.c"));
        assert!(!is_dos_8dot3_legal("has space"));
        assert!(!is_dos_8dot3_legal(".profile"));
        assert!(!is_dos_8dot3_legal("a."));
        assert!(!is_dos_8dot3_legal(".."));
    }

    #[test]
    fn test_substitute_sys_name_whole_component() {
        assert_eq!(
            substitute_sys_name("@sys", "amd64_linux26").as_deref(),
            Some("amd64_linux26")
        );
        assert_eq!(substitute_sys_name("@SYS", "x86").as_deref(), Some("x86"));
    }

    #[test]
    fn test_substitute_sys_name_suffix() {
        assert_eq!(substitute_sys_name("bin.@sys", "x86").as_deref(), Some("bin.x86"));
        assert!(contains_sys_name("bin.@sys"));
        assert!(!contains_sys_name("bin"));
        assert_eq!(substitute_sys_name("bin", "x86"), None);
        assert_eq!(substitute_sys_name("@sysx", "x86"), None);
    }

    #[test]
    fn test_substitute_sys_name_non_ascii_prefix() {
        assert_eq!(
            substitute_sys_name("\u{e9}@sys", "x86").as_deref(),
            Some("\u{e9}x86")
        );
    }

    #[test]
    fn test_substitute_name_in_path() {
        assert_eq!(
            substitute_name_in_path("\\\\AFS\\cell\\@sys\\bin", 2, "x86").as_deref(),
            Some("\\\\AFS\\cell\\x86\\bin")
        );
        assert_eq!(
            substitute_name_in_path("a\\b\\", 0, "z").as_deref(),
            Some("z\\b\\")
        );
        assert_eq!(substitute_name_in_path("a\\b", 5, "z"), None);
    }
}
