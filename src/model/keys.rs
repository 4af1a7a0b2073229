//! Store keys — directory axes, field keys and the composite key.
//!
//! A run directory is addressed by the ordered list of axis tokens that
//! distinguish it from its siblings; a stored value is addressed by that
//! directory key plus a field key.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// ============================================================================
// Segment
// ============================================================================

/// One path segment, interpreted as a number when it parses as one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Segment {
    /// Parse a raw segment: integer first, then float, else text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Segment::Int(i);
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => Segment::Float(f),
            _ => Segment::Text(raw.to_owned()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Segment::Int(i) => Some(*i as f64),
            Segment::Float(f) => Some(*f),
            Segment::Text(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Segment::Text(_))
    }

    /// Whether `text` names this segment. Numbers compare by value, so
    /// `0.50` and `5e-1` both match `Float(0.5)`.
    pub fn matches_text(&self, text: &str) -> bool {
        match (self.as_f64(), Segment::parse(text).as_f64()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.to_string() == text,
            _ => false,
        }
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Segment::Int(a), Segment::Int(b)) => a == b,
            (Segment::Float(a), Segment::Float(b)) => a.to_bits() == b.to_bits(),
            (Segment::Text(a), Segment::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Segment {}

impl Hash for Segment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Segment::Int(i) => i.hash(state),
            Segment::Float(f) => f.to_bits().hash(state),
            Segment::Text(s) => s.hash(state),
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Numbers order numerically and before text; text orders lexically. An
/// integer sorts before an equal float so that ordering agrees with `Eq`.
impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Int(a), Segment::Int(b)) => a.cmp(b),
            (Segment::Float(a), Segment::Float(b)) => a.total_cmp(b),
            (Segment::Int(a), Segment::Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Segment::Float(a), Segment::Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            (Segment::Text(_), _) => Ordering::Greater,
            (_, Segment::Text(_)) => Ordering::Less,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Int(i) => write!(f, "{i}"),
            Segment::Float(v) => write!(f, "{v:?}"),
            Segment::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Segment {
    fn from(v: &str) -> Self { Segment::parse(v) }
}
impl From<i64> for Segment {
    fn from(v: i64) -> Self { Segment::Int(v) }
}
impl From<f64> for Segment {
    fn from(v: f64) -> Self { Segment::Float(v) }
}

// ============================================================================
// AxisToken
// ============================================================================

/// One component of a directory key.
///
/// `Paired` carries the parent segment when the value alone would not say
/// which sweep parameter it belongs to (`erd_type=pump_as_turbine`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisToken {
    Bare(Segment),
    Paired { parent: String, value: Segment },
}

impl AxisToken {
    pub fn bare(value: impl Into<Segment>) -> Self {
        AxisToken::Bare(value.into())
    }

    pub fn paired(parent: impl Into<String>, value: impl Into<Segment>) -> Self {
        AxisToken::Paired { parent: parent.into(), value: value.into() }
    }

    /// The axis value (the varying part of the token).
    pub fn value(&self) -> &Segment {
        match self {
            AxisToken::Bare(v) => v,
            AxisToken::Paired { value, .. } => value,
        }
    }

    pub fn parent(&self) -> Option<&str> {
        match self {
            AxisToken::Bare(_) => None,
            AxisToken::Paired { parent, .. } => Some(parent),
        }
    }

    /// Substring match against the token's string form.
    pub fn contains_term(&self, term: &str) -> bool {
        self.to_string().contains(term)
    }

    /// Whether `term` names this token, either as its value or as
    /// `parent=value`.
    pub fn matches_component(&self, term: &str) -> bool {
        if self.value().matches_text(term) {
            return true;
        }
        match (self, term.split_once('=')) {
            (AxisToken::Paired { parent, value }, Some((p, v))) => parent == p && value.matches_text(v),
            _ => false,
        }
    }
}

impl fmt::Display for AxisToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisToken::Bare(v) => write!(f, "{v}"),
            AxisToken::Paired { parent, value } => write!(f, "{parent}={value}"),
        }
    }
}

impl From<&str> for AxisToken {
    fn from(v: &str) -> Self { AxisToken::Bare(Segment::parse(v)) }
}
impl From<(&str, &str)> for AxisToken {
    fn from((parent, value): (&str, &str)) -> Self { AxisToken::paired(parent, Segment::parse(value)) }
}

// ============================================================================
// DirectoryKey
// ============================================================================

/// Ordered axis tokens identifying one run directory (or a derived context).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectoryKey(SmallVec<[AxisToken; 4]>);

impl DirectoryKey {
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    pub fn from_tokens(tokens: impl IntoIterator<Item = AxisToken>) -> Self {
        Self(tokens.into_iter().collect())
    }

    pub fn tokens(&self) -> &[AxisToken] {
        &self.0
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn push(&mut self, token: AxisToken) {
        self.0.push(token);
    }

    /// A copy of this key with one more trailing token.
    pub fn child(&self, token: AxisToken) -> Self {
        let mut key = self.clone();
        key.0.push(token);
        key
    }

    /// A copy of this key with `token` in front.
    pub fn prefixed(&self, token: AxisToken) -> Self {
        let mut key = Self::new();
        key.0.push(token);
        key.0.extend(self.0.iter().cloned());
        key
    }

    /// A copy of this key without the tokens at `positions`.
    pub fn without(&self, positions: &[usize]) -> Self {
        Self(
            self.0.iter()
                .enumerate()
                .filter(|(i, _)| !positions.contains(i))
                .map(|(_, t)| t.clone())
                .collect(),
        )
    }

    pub fn last(&self) -> Option<&AxisToken> {
        self.0.last()
    }

    /// Substring match of `term` against the whole key's string form.
    pub fn contains_term(&self, term: &str) -> bool {
        self.to_string().contains(term)
    }

    /// Whether some token matches `term` exactly (see
    /// [`AxisToken::matches_component`]).
    pub fn has_component(&self, term: &str) -> bool {
        self.0.iter().any(|t| t.matches_component(term))
    }
}

impl fmt::Display for DirectoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, t) in self.0.iter().enumerate() {
            if i > 0 { write!(f, "/")?; }
            write!(f, "{t}")?;
        }
        Ok(())
    }
}

impl From<&str> for DirectoryKey {
    fn from(v: &str) -> Self { Self::from_tokens([AxisToken::from(v)]) }
}
impl From<AxisToken> for DirectoryKey {
    fn from(v: AxisToken) -> Self { Self::from_tokens([v]) }
}
impl From<Vec<AxisToken>> for DirectoryKey {
    fn from(v: Vec<AxisToken>) -> Self { Self::from_tokens(v) }
}

// ============================================================================
// FieldKey
// ============================================================================

/// Field component of a store key.
///
/// `Tuple` is used when one approximate name resolved to several indexed
/// variants, e.g. `("flow", "0.0,Liq")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldKey {
    Name(String),
    Tuple(Vec<String>),
}

impl FieldKey {
    /// Canonical form: one part collapses to a bare name.
    pub fn from_parts(mut parts: Vec<String>) -> Self {
        if parts.len() == 1 {
            FieldKey::Name(parts.remove(0))
        } else {
            FieldKey::Tuple(parts)
        }
    }

    pub fn parts(&self) -> &[String] {
        match self {
            FieldKey::Name(n) => std::slice::from_ref(n),
            FieldKey::Tuple(parts) => parts,
        }
    }

    /// Leading name (the return key for tuple keys).
    pub fn name(&self) -> &str {
        self.parts().first().map(String::as_str).unwrap_or("")
    }

    /// Whether any part equals `name`.
    pub fn refers_to(&self, name: &str) -> bool {
        self.parts().iter().any(|p| p == name)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKey::Name(n) => write!(f, "{n}"),
            FieldKey::Tuple(parts) => write!(f, "({})", parts.join(", ")),
        }
    }
}

impl From<&str> for FieldKey {
    fn from(v: &str) -> Self { FieldKey::Name(v.to_owned()) }
}
impl From<String> for FieldKey {
    fn from(v: String) -> Self { FieldKey::Name(v) }
}
impl From<&String> for FieldKey {
    fn from(v: &String) -> Self { FieldKey::Name(v.clone()) }
}
impl From<(&str, &str)> for FieldKey {
    fn from((a, b): (&str, &str)) -> Self { FieldKey::Tuple(vec![a.to_owned(), b.to_owned()]) }
}
impl From<Vec<String>> for FieldKey {
    fn from(v: Vec<String>) -> Self { FieldKey::from_parts(v) }
}

// ============================================================================
// StoreKey
// ============================================================================

/// Composite `(directory, field)` key of the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey {
    pub directory: DirectoryKey,
    pub field: FieldKey,
}

impl StoreKey {
    pub fn new(directory: impl Into<DirectoryKey>, field: impl Into<FieldKey>) -> Self {
        Self { directory: directory.into(), field: field.into() }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.directory, self.field)
    }
}

/// Parse index labels out of an array-indexed key.
///
/// `fs.flow[0.0,Liq]` yields `[0.0, "Liq"]`; keys without brackets yield `None`.
pub fn parse_key_index(key: &str) -> Option<Vec<Segment>> {
    let mut labels = Vec::new();
    let mut rest = key;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else { break };
        for part in after[..close].split(',') {
            labels.push(Segment::parse(part));
        }
        rest = &after[close + 1..];
    }
    if labels.is_empty() { None } else { Some(labels) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_parse() {
        assert_eq!(Segment::parse("3"), Segment::Int(3));
        assert_eq!(Segment::parse("0.5"), Segment::Float(0.5));
        assert_eq!(Segment::parse("membrane_cost"), Segment::Text("membrane_cost".into()));
        assert_eq!(Segment::parse("nan"), Segment::Text("nan".into()));
    }

    #[test]
    fn test_segment_ordering() {
        let mut segs = vec![Segment::Int(10), Segment::Float(2.5), Segment::Int(1)];
        segs.sort();
        assert_eq!(segs, vec![Segment::Int(1), Segment::Float(2.5), Segment::Int(10)]);
        assert!(Segment::Int(100) < Segment::Text("a".into()));
    }

    #[test]
    fn test_segment_ordering_agrees_with_eq() {
        assert_ne!(Segment::Int(1), Segment::Float(1.0));
        assert_eq!(Segment::Int(1).cmp(&Segment::Float(1.0)), Ordering::Less);
        assert_eq!(Segment::Float(1.0).cmp(&Segment::Int(1)), Ordering::Greater);
        assert_eq!(Segment::Int(i64::MAX).cmp(&Segment::Int(i64::MAX - 1)), Ordering::Greater);
        assert!(Segment::Float(1.5) > Segment::Int(1));
    }

    #[test]
    fn test_exact_component_matches_numeric_spellings() {
        let key = DirectoryKey::from_tokens([
            AxisToken::paired("recovery", Segment::parse("0.50")),
            AxisToken::paired("flow", Segment::parse("1e3")),
        ]);
        assert_eq!(key.to_string(), "recovery=0.5/flow=1000.0");
        assert!(key.has_component("0.50"));
        assert!(key.has_component("recovery=0.50"));
        assert!(key.has_component("1e3"));
        assert!(key.has_component("flow=1000"));
        assert!(!key.has_component("flow=0.50"));
        assert!(!key.has_component("0.5000001"));
    }

    #[test]
    fn test_directory_key_display_and_terms() {
        let key = DirectoryKey::from_tokens([
            AxisToken::from(("erd_type", "pressure_exchanger")),
            AxisToken::from("membrane_cost"),
        ]);
        assert_eq!(key.to_string(), "erd_type=pressure_exchanger/membrane_cost");
        assert!(key.contains_term("pressure"));
        assert!(key.has_component("membrane_cost"));
        assert!(key.has_component("pressure_exchanger"));
        assert!(!key.has_component("membrane"));
        assert_eq!(key.without(&[0]).to_string(), "membrane_cost");
    }

    #[test]
    fn test_field_key_canonical() {
        assert_eq!(FieldKey::from_parts(vec!["LCOW".into()]), FieldKey::Name("LCOW".into()));
        let t = FieldKey::from_parts(vec!["flow".into(), "0.0,Liq".into()]);
        assert_eq!(t.name(), "flow");
        assert!(t.refers_to("flow"));
        assert_eq!(t.to_string(), "(flow, 0.0,Liq)");
    }

    #[test]
    fn test_parse_key_index() {
        assert_eq!(
            parse_key_index("fs.feed.flow_mass_phase_comp[0.0,Liq,NaCl]"),
            Some(vec![Segment::Float(0.0), Segment::Text("Liq".into()), Segment::Text("NaCl".into())])
        );
        assert_eq!(parse_key_index("field[2,Liq]"), Some(vec![Segment::Int(2), Segment::Text("Liq".into())]));
        assert_eq!(parse_key_index("fs.costing.LCOW"), None);
    }
}
