//! Identifier and file-name derivation for generated artifacts.
//!
//! Document ids are arbitrary strings — they may contain path separators,
//! unicode, or leading digits — but the generated package needs two derived
//! names per document that are stable across runs:
//!
//! - a **file name** safe for any filesystem (`posts/hello-world` →
//!   `posts__hello_world.json`), and
//! - a **source identifier** safe to use as an ESM import binding
//!   (`posts__hello_world` → `postsHelloWorld`).
//!
//! Both transforms are deterministic. File-name collisions between distinct
//! ids that normalize to the same string (`a/b` vs `a__b`) are a known,
//! accepted limitation — id uniqueness is a schema-level responsibility, not
//! guarded here. Identifier collisions within one generated file, by
//! contrast, *are* guarded: the fallback name `{type_name}{index}` uses the
//! document's positional index within its type, which is monotonic and never
//! reused, so it is unique by construction.

use std::collections::HashSet;

/// Derive a filesystem-safe file name (without extension) from a document id.
///
/// - every `/` becomes `__`
/// - every remaining character outside `[A-Za-z0-9_]` becomes `_`
/// - a leading digit is padded with `_`
pub fn id_to_file_name(id: &str) -> String {
    let mut out = String::with_capacity(id.len() + 2);
    for ch in id.chars() {
        if ch == '/' {
            out.push_str("__");
        } else if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Derive the import binding for one document within its type's barrel file.
///
/// Camel-cases the file-name form of `id` (runs of non-alphanumeric
/// characters act as word separators and are dropped). If the result is not
/// a valid bare identifier, or collides with a name already in `used`, falls
/// back to `{type_name}{index}` where `index` is the document's 0-based
/// position within its type.
pub fn document_identifier(
    id: &str,
    type_name: &str,
    index: usize,
    used: &HashSet<String>,
) -> String {
    let candidate = camel_case(&id_to_file_name(id));
    if is_valid_identifier(&candidate) && !used.contains(&candidate) {
        candidate
    } else {
        format!("{type_name}{index}")
    }
}

/// Derive the exported data-variable name for a document type.
///
/// Singletons export the document itself under the lower-camel-cased type
/// name (`SiteConfig` → `siteConfig`); collections export the ordered array
/// under `all` + a naive English plural (`Post` → `allPosts`, `Category` →
/// `allCategories`).
pub fn data_variable_name(type_name: &str, is_singleton: bool) -> String {
    if is_singleton {
        lower_first(type_name)
    } else {
        format!("all{}", pluralize(type_name))
    }
}

/// Whether `s` can be used as a bare ESM identifier: non-empty, does not
/// start with a digit, and contains only `[A-Za-z0-9_$]`.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        None => return false,
        Some(c) if c.is_ascii_digit() => return false,
        Some(c) if !(c.is_ascii_alphanumeric() || c == '_' || c == '$') => return false,
        Some(_) => {}
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Camel-case on non-alphanumeric word boundaries, dropping the separators.
fn camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut boundary = false;
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() {
            if boundary && !out.is_empty() {
                out.extend(ch.to_uppercase());
            } else {
                out.push(ch);
            }
            boundary = false;
        } else {
            boundary = true;
        }
    }
    lower_first(&out)
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Naive English pluralization, good enough for type names.
fn pluralize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix('y') {
        // consonant + y → ies (Category → Categories)
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{stem}ies");
        }
    }
    if name.ends_with(['s', 'x', 'z']) || name.ends_with("ch") || name.ends_with("sh") {
        return format!("{name}es");
    }
    format!("{name}s")
}
