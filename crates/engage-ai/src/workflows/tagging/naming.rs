/// A tag in both of its wire shapes: the `raw` form handed to the external
/// tag service (which prefixes on its own) and the `full` product-prefixed
/// form used for local storage and audit lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagName {
    raw: String,
    full: String,
}

impl TagName {
    /// Derives the raw/full pair from a rule-authored tag, which may arrive
    /// bare (`"Inativo 7d"`) or already prefixed (`"OGI_Inativo_7d"`).
    /// Prefix detection is case-insensitive so the pair is identical either
    /// way and double-prefixing cannot happen.
    pub fn normalize(tag: &str, prefix: &str) -> Self {
        let trimmed = tag.trim();
        let stripped = strip_prefix_ci(trimmed, prefix).unwrap_or(trimmed);

        let raw = stripped.replace('_', " ").trim().to_string();
        let full = if prefix.is_empty() {
            raw.replace(' ', "_")
        } else {
            format!("{}_{}", prefix, raw.replace(' ', "_"))
        };

        Self { raw, full }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn full(&self) -> &str {
        &self.full
    }
}

fn strip_prefix_ci<'a>(tag: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() || tag.len() <= prefix.len() || !tag.is_char_boundary(prefix.len()) {
        return None;
    }

    let (head, rest) = tag.split_at(prefix.len());
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }

    rest.strip_prefix('_').or_else(|| rest.strip_prefix(' '))
}
