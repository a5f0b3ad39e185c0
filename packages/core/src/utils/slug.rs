//! URL slug generation

/// Fallback slug for titles with no usable characters
pub const DEFAULT_SLUG: &str = "page";

/// Turn a title into a lowercase, hyphen-separated URL slug
///
/// Alphanumeric characters are kept (lowercased), every other run of
/// characters becomes a single hyphen, and leading/trailing hyphens are
/// dropped. Titles that reduce to nothing yield [`DEFAULT_SLUG`].
///
/// # Examples
///
/// ```
/// use folio_core::utils::slugify;
///
/// assert_eq!(slugify("Roman Empire: An Overview"), "roman-empire-an-overview");
/// assert_eq!(slugify("  ***  "), "page");
/// ```
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    if slug.is_empty() {
        DEFAULT_SLUG.to_string()
    } else {
        slug
    }
}

/// The `n`th candidate for a slug: `base` itself, then `base-2`, `base-3`, ...
pub fn numbered_slug(base: &str, n: usize) -> String {
    if n <= 1 {
        base.to_string()
    } else {
        format!("{}-{}", base, n)
    }
}
