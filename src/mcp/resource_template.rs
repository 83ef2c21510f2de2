//! Resource URI templates.
//!
//! A template such as `greeting://{name}` is compiled into an anchored
//! regular expression in which literal text is escaped and each `{name}`
//! placeholder captures exactly one path segment (`[^/]+`).
//!
//! Two lookup policies are offered:
//!
//! - [`ResourceTemplate::match_uri`] is strict and returns `None` when the
//!   URI does not fit. Resource reads and subscriptions route with it.
//! - [`ResourceTemplate::extract_params`] is permissive and returns an empty
//!   map instead.

use indexmap::IndexMap;
use regex::Regex;

use crate::error::TemplateError;

/// Placeholder value used by [`ResourceTemplate::example_uri`] when none is declared.
pub const DEFAULT_EXAMPLE_VALUE: &str = "example";

/// A compiled URI template plus its listing metadata.
#[derive(Debug, Clone)]
pub struct ResourceTemplate {
    template: String,
    pattern: Regex,
    params: Vec<String>,
    examples: IndexMap<String, String>,
    name: Option<String>,
    description: Option<String>,
    mime_type: Option<String>,
    listable: bool,
    subscribable: bool,
}

/// A piece of a parsed template.
enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn split_template(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let invalid = |reason: &str| TemplateError {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let literal = &rest[..open];
        if literal.contains('}') {
            return Err(invalid("unmatched '}'"));
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| invalid("unterminated placeholder"))?;
        let name = &after[..close];
        if name.is_empty() || name.contains(['{', '/']) {
            return Err(invalid("bad placeholder name"));
        }
        segments.push(Segment::Placeholder(name));
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err(invalid("unmatched '}'"));
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}

impl ResourceTemplate {
    /// Compiles `template`.
    ///
    /// # Errors
    ///
    /// Returns an error for unbalanced braces, empty or duplicate placeholder
    /// names.
    pub fn new(template: impl Into<String>) -> Result<Self, TemplateError> {
        let template = template.into();
        let segments = split_template(&template)?;

        let mut regex = String::from("^");
        let mut params: Vec<String> = Vec::new();
        for segment in segments {
            match segment {
                Segment::Literal(text) => regex.push_str(&regex::escape(text)),
                Segment::Placeholder(name) => {
                    if params.iter().any(|p| p == name) {
                        return Err(TemplateError {
                            template: template.clone(),
                            reason: format!("duplicate placeholder {name:?}"),
                        });
                    }
                    params.push(name.to_string());
                    regex.push_str("([^/]+)");
                }
            }
        }
        regex.push('$');

        let pattern = Regex::new(&regex).map_err(|e| TemplateError {
            template: template.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            template,
            pattern,
            params,
            examples: IndexMap::new(),
            name: None,
            description: None,
            mime_type: None,
            listable: true,
            subscribable: false,
        })
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the MIME type of the resources this template produces.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Declares the example value for placeholder `name`.
    #[must_use]
    pub fn with_example(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.examples.insert(name.into(), value.into());
        self
    }

    /// Whether `resources/list` includes this template's example URI.
    #[must_use]
    pub const fn listable(mut self, listable: bool) -> Self {
        self.listable = listable;
        self
    }

    /// Whether clients may subscribe to matching URIs.
    #[must_use]
    pub const fn subscribable(mut self, subscribable: bool) -> Self {
        self.subscribable = subscribable;
        self
    }

    /// The template text.
    #[must_use]
    pub fn uri_template(&self) -> &str {
        &self.template
    }

    /// Placeholder names in declaration order.
    #[must_use]
    pub fn parameter_names(&self) -> &[String] {
        &self.params
    }

    /// Display name used in listings.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// MIME type of the resources it yields.
    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Whether `resources/list` includes its example.
    #[must_use]
    pub const fn is_listable(&self) -> bool {
        self.listable
    }

    /// Whether clients may subscribe to its resources.
    #[must_use]
    pub const fn is_subscribable(&self) -> bool {
        self.subscribable
    }

    /// Returns `true` if `uri` fits the template.
    #[must_use]
    pub fn matches(&self, uri: &str) -> bool {
        self.pattern.is_match(uri)
    }

    /// Strict match: the placeholder values, or `None` if `uri` does not fit.
    #[must_use]
    pub fn match_uri(&self, uri: &str) -> Option<IndexMap<String, String>> {
        let captures = self.pattern.captures(uri)?;
        Some(
            self.params
                .iter()
                .zip(captures.iter().skip(1))
                .map(|(name, value)| {
                    let value = value.map_or("", |m| m.as_str());
                    (name.clone(), value.to_string())
                })
                .collect(),
        )
    }

    /// Permissive match: the placeholder values, or an empty map if `uri` does not fit.
    #[must_use]
    pub fn extract_params(&self, uri: &str) -> IndexMap<String, String> {
        self.match_uri(uri).unwrap_or_default()
    }

    /// Substitutes `{name}` tokens with the given values.
    ///
    /// Values are inserted verbatim, without escaping. Placeholders with no
    /// supplied value are left in place.
    #[must_use]
    pub fn generate_uri<K, V>(&self, values: impl IntoIterator<Item = (K, V)>) -> String
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        values
            .into_iter()
            .fold(self.template.clone(), |uri, (name, value)| {
                uri.replace(&format!("{{{}}}", name.as_ref()), value.as_ref())
            })
    }

    /// A concrete URI built from the declared examples, for listings.
    #[must_use]
    pub fn example_uri(&self) -> String {
        self.generate_uri(self.params.iter().map(|name| {
            let value = self
                .examples
                .get(name)
                .map_or(DEFAULT_EXAMPLE_VALUE, String::as_str);
            (name.as_str(), value)
        }))
    }
}
