use std::fmt;

/// An ordered sequence of string segments identifying one cached query.
///
/// Segment order is significant: `["contacts", "42"]` and
/// `["42", "contacts"]` name two different cache slots. Segments are never
/// sorted or normalized, so callers that build keys in different orders get
/// different entries.
///
/// ```
/// use requery::QueryKey;
///
/// let a = QueryKey::new(["contacts", "42"]);
/// let b = QueryKey::from(["contacts"]).with("42");
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
  segments: Vec<String>,
}

impl QueryKey {
  /// Creates a key from an ordered collection of segments.
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      segments: segments.into_iter().map(Into::into).collect(),
    }
  }

  /// Returns this key with one more segment appended.
  pub fn with(mut self, segment: impl Into<String>) -> Self {
    self.segments.push(segment.into());
    self
  }

  /// The key's segments, in construction order.
  pub fn segments(&self) -> &[String] {
    &self.segments
  }

  /// Renders the key in its canonical stored form: a JSON array of the
  /// segments.
  ///
  /// JSON escaping keeps segment boundaries unambiguous, so a segment
  /// containing `","` cannot collide with two separate segments. The same
  /// form is what `invalidate_matching` runs its substring match against.
  pub fn serialize(&self) -> String {
    serde_json::to_string(&self.segments).expect("string segments always serialize")
  }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for QueryKey {
  fn from(segments: [S; N]) -> Self {
    Self::new(segments)
  }
}

impl From<Vec<String>> for QueryKey {
  fn from(segments: Vec<String>) -> Self {
    Self { segments }
  }
}

impl From<&[&str]> for QueryKey {
  fn from(segments: &[&str]) -> Self {
    Self::new(segments.iter().copied())
  }
}

impl<S: Into<String>> FromIterator<S> for QueryKey {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self::new(iter)
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.serialize())
  }
}
