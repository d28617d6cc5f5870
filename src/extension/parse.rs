//! Parsing of extension header values.
//!
//! Accepts the `name; param[=value]; ...` list syntax, with offers separated
//! by commas. Quoted values are unquoted; empty list elements are skipped.

/// A single extension entry from an offer or response header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionOffer<'a> {
    name: &'a str,
    params: Vec<(&'a str, Option<&'a str>)>,
}

impl<'a> ExtensionOffer<'a> {
    #[must_use]
    pub const fn name(&self) -> &'a str { self.name }

    /// Parameters in the order they appeared.
    #[must_use]
    pub fn params(&self) -> &[(&'a str, Option<&'a str>)] { &self.params }

    /// Whether this entry names `extension`, ignoring ASCII case.
    #[must_use]
    pub fn is(&self, extension: &str) -> bool { self.name.eq_ignore_ascii_case(extension) }
}

/// Split a header value into its extension entries.
#[must_use]
pub fn parse_extension_list(header: &str) -> Vec<ExtensionOffer<'_>> {
    header
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';').map(str::trim);
            let name = parts.next().filter(|name| !name.is_empty())?;
            let params = parts
                .filter(|part| !part.is_empty())
                .map(|part| match part.split_once('=') {
                    Some((key, value)) => (key.trim(), Some(unquote(value.trim()))),
                    None => (part, None),
                })
                .collect();
            Some(ExtensionOffer { name, params })
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}
