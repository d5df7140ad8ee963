/// How [slugify] treats letter case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlugCase {
    /// Letters keep their case, so `GET-/Items` and `get-/items` stay distinct.
    #[default]
    Preserve,
    Lower,
}

/// Turn an arbitrary string into a URL-safe slug.
///
/// ASCII letters, digits and `_` are kept; every other run of characters
/// collapses into a single `-`. Leading and trailing separators are dropped.
///
/// `"GET-/consumption/{id}"` becomes `"GET-consumption-id"`.
pub fn slugify(value: &str, case: SlugCase) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_separator = false;

    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(match case {
                SlugCase::Preserve => c,
                SlugCase::Lower => c.to_ascii_lowercase(),
            });
        } else {
            pending_separator = true;
        }
    }

    slug
}
