use serde::{Deserialize, Serialize};

/// Tag key identifying the project dimension of a series.
pub const PROJECT_TAG_KEY: &str = "project";

/// Tag key identifying the hypervisor dimension of a series.
pub const HYPERVISOR_TAG_KEY: &str = "hypervisor";

/// A tag selector for series queries.
///
/// A filter without a value groups over all values of the key (the
/// backend's `tag:` argument); a filter with a value restricts the query
/// to series carrying that exact tag (the `tags:` argument). The two
/// forms query different things and must never be conflated.
///
/// # Examples
///
/// ```
/// use caos_dashboard::datamodel::TagFilter;
///
/// // Sum over every project
/// let grouped = TagFilter::group("project");
///
/// // Only the series of one project
/// let filtered = TagFilter::value("project", "a1b2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    /// Tag key, e.g. "project" or "hypervisor".
    pub key: String,

    /// Exact value to match; `None` means group over all values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl TagFilter {
    /// Creates a grouping selector over all values of `key`.
    pub fn group(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    /// Creates an exact-match selector for `key` = `value`.
    pub fn value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Returns true if this selector groups instead of filtering.
    #[inline]
    pub fn is_grouping(&self) -> bool {
        self.value.is_none()
    }
}

impl std::fmt::Display for TagFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}=\"{}\"", self.key, value),
            None => write!(f, "{}", self.key),
        }
    }
}
