//! Scope keys: rendering templates like `user:{user_id}` into concrete keys.
//!
//! A scope identifies what is being limited. Keys are plain strings; two templates that
//! render to the same string share limiter state. The per-operation classes
//! (`memory:add`, ...) have no placeholders, so one key is shared by every caller unless
//! the caller composes something more specific such as `user:{user_id}:memory:add`.

use crate::error::ConfigError;
use std::collections::BTreeMap;
use std::fmt;

/// A concrete, rendered scope identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// Use `key` verbatim, without template rendering.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take ownership of the key.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ScopeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScopeKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ScopeKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Named values substituted into scope templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeParams {
    values: BTreeMap<String, String>,
}

impl ScopeParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or overwrite a value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Copy every entry of `other` over `self`; `other` wins on conflicts.
    pub fn extend(&mut self, other: &ScopeParams) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ScopeParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = ScopeParams::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn parse(template: &str) -> Result<Vec<Segment<'_>>, ConfigError> {
    let malformed = |reason| ConfigError::MalformedTemplate { template: template.to_string(), reason };
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| malformed("unterminated '{'"))?;
        let name = &after[..close];
        if name.is_empty() {
            return Err(malformed("empty placeholder '{}'"));
        }
        if name.contains('{') {
            return Err(malformed("nested '{'"));
        }
        segments.push(Segment::Placeholder(name));
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}

/// Render `template`, substituting each `{name}` with `params[name]`.
///
/// # Errors
/// [`ConfigError::MissingScopeParam`] if a placeholder has no value, and
/// [`ConfigError::MalformedTemplate`] for unterminated or empty placeholders.
///
/// # Examples
/// ```
/// use tollgate::scope::{render, ScopeParams};
/// let key = render("user:{user_id}", &ScopeParams::new().with("user_id", "42")).unwrap();
/// assert_eq!(key.as_str(), "user:42");
/// ```
pub fn render(template: &str, params: &ScopeParams) -> Result<ScopeKey, ConfigError> {
    let mut out = String::with_capacity(template.len());
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Placeholder(name) => {
                let value = params.get(name).ok_or_else(|| ConfigError::MissingScopeParam {
                    template: template.to_string(),
                    param: name.to_string(),
                })?;
                out.push_str(value);
            }
        }
    }
    Ok(ScopeKey(out))
}

/// Whether `scope` could have been rendered from `template`.
///
/// Each placeholder stands for one segment: one or more characters, none of them `:`.
/// `user:{user_id}` therefore matches `user:42` but not `user:42:memory:add`.
/// Malformed templates match nothing.
pub fn template_matches(template: &str, scope: &str) -> bool {
    match parse(template) {
        Ok(segments) => matches_from(&segments, scope),
        Err(_) => false,
    }
}

fn matches_from(segments: &[Segment<'_>], input: &str) -> bool {
    match segments.split_first() {
        None => input.is_empty(),
        Some((Segment::Literal(text), rest)) => {
            input.strip_prefix(text).is_some_and(|tail| matches_from(rest, tail))
        }
        Some((Segment::Placeholder(_), rest)) => {
            let segment = input.find(':').unwrap_or(input.len());
            input[..segment]
                .char_indices()
                .map(|(i, c)| i + c.len_utf8())
                .any(|end| matches_from(rest, &input[end..]))
        }
    }
}

/// Number of literal characters in `template`; more literal text means a more specific
/// template when several match the same scope.
pub(crate) fn literal_len(template: &str) -> usize {
    parse(template)
        .map(|segments| {
            segments
                .iter()
                .map(|s| match s {
                    Segment::Literal(text) => text.len(),
                    Segment::Placeholder(_) => 0,
                })
                .sum()
        })
        .unwrap_or(0)
}

/// The scope classes known to the tier catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeClass {
    /// API-wide limit.
    Api,
    /// Per-user limit, `user:{user_id}`.
    User,
    /// Per-project limit, `project:{project_id}`.
    Project,
    MemoryAdd,
    MemoryGet,
    MemoryUpdate,
    MemoryDelete,
    MemorySearch,
    /// Per-webhook limit, `webhook:{webhook_id}`.
    Webhook,
}

impl ScopeClass {
    /// Every known class.
    pub const ALL: [ScopeClass; 9] = [
        ScopeClass::Api,
        ScopeClass::User,
        ScopeClass::Project,
        ScopeClass::MemoryAdd,
        ScopeClass::MemoryGet,
        ScopeClass::MemoryUpdate,
        ScopeClass::MemoryDelete,
        ScopeClass::MemorySearch,
        ScopeClass::Webhook,
    ];

    /// The class's scope template.
    pub fn template(self) -> &'static str {
        match self {
            ScopeClass::Api => "api",
            ScopeClass::User => "user:{user_id}",
            ScopeClass::Project => "project:{project_id}",
            ScopeClass::MemoryAdd => "memory:add",
            ScopeClass::MemoryGet => "memory:get",
            ScopeClass::MemoryUpdate => "memory:update",
            ScopeClass::MemoryDelete => "memory:delete",
            ScopeClass::MemorySearch => "memory:search",
            ScopeClass::Webhook => "webhook:{webhook_id}",
        }
    }

    /// Look up a class by its template string.
    pub fn from_template(template: &str) -> Option<ScopeClass> {
        Self::ALL.into_iter().find(|class| class.template() == template)
    }

    /// Render this class's template.
    pub fn render(self, params: &ScopeParams) -> Result<ScopeKey, ConfigError> {
        render(self.template(), params)
    }
}

impl fmt::Display for ScopeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template())
    }
}
