//! Stitch values.
//!
//! A stitch key carries either a single scalar or an ordered, duplicate-free
//! list of scalars of one type. `merge` and `delta` are the only ways values
//! combine; mixing scalar types is a configuration error.

use crate::error::{Result, StitchError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar type a stitch key accepts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Integer,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::String => write!(f, "string"),
            ValueType::Integer => write!(f, "integer"),
        }
    }
}

/// One stitch value element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scalar {
    Str(String),
    Int(i64),
}

impl Scalar {
    pub fn value_type(&self) -> ValueType {
        match self {
            Scalar::Str(_) => ValueType::String,
            Scalar::Int(_) => ValueType::Integer,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            Scalar::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            Scalar::Str(_) => None,
        }
    }

    /// Type-prefixed token used as part of index keys, so `"42"` and `42`
    /// never collide.
    pub fn index_token(&self) -> String {
        match self {
            Scalar::Str(s) => format!("s:{}", s),
            Scalar::Int(v) => format!("i:{}", v),
        }
    }

    /// Parse a raw string into a scalar of the requested type.
    pub fn parse(raw: &str, ty: ValueType) -> Option<Scalar> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match ty {
            ValueType::String => Some(Scalar::Str(raw.to_string())),
            ValueType::Integer => raw.parse::<i64>().ok().map(Scalar::Int),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Str(s) => write!(f, "{}", s),
            Scalar::Int(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Str(s)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

/// A stitch value: one scalar, or an ordered-unique list of scalars.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Value {
    Single(Scalar),
    List(Vec<Scalar>),
}

/// Result of [`Value::delta`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    /// Every element of the new value is already present.
    NoChange,
    /// The elements of the new value that the old one lacks.
    Changed(Value),
}

impl Value {
    pub fn single(s: impl Into<Scalar>) -> Self {
        Value::Single(s.into())
    }

    /// Build a list value, dropping duplicates and keeping first-seen order.
    /// A one-element list collapses to `Single`.
    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scalar>,
    {
        let mut out: Vec<Scalar> = Vec::new();
        for item in items {
            let s = item.into();
            if !out.contains(&s) {
                out.push(s);
            }
        }
        Self::from_vec(out)
    }

    pub fn empty() -> Self {
        Value::List(Vec::new())
    }

    fn from_vec(mut items: Vec<Scalar>) -> Self {
        if items.len() == 1 {
            Value::Single(items.remove(0))
        } else {
            Value::List(items)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Value::Single(_) => 1,
            Value::List(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// More than one element.
    pub fn is_multiple(&self) -> bool {
        self.len() > 1
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scalar> {
        match self {
            Value::Single(s) => std::slice::from_ref(s).iter(),
            Value::List(items) => items.iter(),
        }
    }

    pub fn contains(&self, s: &Scalar) -> bool {
        self.iter().any(|v| v == s)
    }

    pub fn first(&self) -> Option<&Scalar> {
        self.iter().next()
    }

    pub fn to_vec(&self) -> Vec<Scalar> {
        self.iter().cloned().collect()
    }

    /// Element type, or `None` for the empty list.
    pub fn value_type(&self) -> Option<ValueType> {
        self.first().map(Scalar::value_type)
    }

    /// Ensure every element has the expected type.
    pub fn check_type(&self, key: &str, expected: ValueType) -> Result<()> {
        for s in self.iter() {
            let found = s.value_type();
            if found != expected {
                return Err(StitchError::incompatible(key, expected, found));
            }
        }
        Ok(())
    }

    fn check_compatible(&self, other: &Value) -> Result<()> {
        if let (Some(a), Some(b)) = (self.value_type(), other.value_type()) {
            if a != b {
                return Err(StitchError::incompatible("value", a, b));
            }
        }
        // Mixed lists are rejected as well
        if let Some(ty) = self.value_type().or_else(|| other.value_type()) {
            self.check_type("value", ty)?;
            other.check_type("value", ty)?;
        }
        Ok(())
    }

    /// Union preserving insertion order: elements of `self` first, then the
    /// elements of `other` not already present.
    pub fn merge(&self, other: &Value) -> Result<Value> {
        self.check_compatible(other)?;
        let mut out = self.to_vec();
        for s in other.iter() {
            if !out.contains(s) {
                out.push(s.clone());
            }
        }
        Ok(Self::from_vec(out))
    }

    /// Merge many values in order.
    pub fn merge_all<'a, I>(values: I) -> Result<Option<Value>>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut acc: Option<Value> = None;
        for v in values {
            acc = Some(match acc {
                None => v.clone(),
                Some(a) => a.merge(v)?,
            });
        }
        Ok(acc)
    }

    /// Elements of `new` that `old` does not contain.
    pub fn delta(new: &Value, old: Option<&Value>) -> Result<Delta> {
        let old = match old {
            Some(old) => old,
            None if new.is_empty() => return Ok(Delta::NoChange),
            None => return Ok(Delta::Changed(new.clone())),
        };
        new.check_compatible(old)?;
        let diff: Vec<Scalar> = new.iter().filter(|s| !old.contains(s)).cloned().collect();
        if diff.is_empty() {
            Ok(Delta::NoChange)
        } else {
            Ok(Delta::Changed(Self::from_vec(diff)))
        }
    }

    /// Elements of `self` not present in `other`. `None` when nothing remains.
    pub fn without(&self, other: &Value) -> Option<Value> {
        let rest: Vec<Scalar> = self.iter().filter(|s| !other.contains(s)).cloned().collect();
        if rest.is_empty() {
            None
        } else {
            Some(Self::from_vec(rest))
        }
    }

    /// Build a value ordered by descending support, ties by scalar order.
    /// Unlike `merge`, this ordering is frequency-based.
    pub fn ranked<I>(support: I) -> Value
    where
        I: IntoIterator<Item = (Scalar, usize)>,
    {
        let mut items: Vec<(Scalar, usize)> = support.into_iter().collect();
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Self::from_vec(items.into_iter().map(|(s, _)| s).collect())
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Value::Single(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Single(s.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Single(v.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Single(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, s) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", s)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_dedupes_and_collapses() {
        let v = Value::list(["a", "b", "a"]);
        assert_eq!(v, Value::List(vec!["a".into(), "b".into()]));

        let one = Value::list(["a", "a"]);
        assert_eq!(one, Value::single("a"));
        assert!(!one.is_multiple());
    }

    #[test]
    fn test_merge_preserves_insertion_order() {
        let a = Value::list(["x", "y"]);
        let b = Value::list(["z", "x"]);
        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.to_vec(), vec![Scalar::from("x"), "y".into(), "z".into()]);
    }

    #[test]
    fn test_merge_rejects_mixed_types() {
        let a = Value::single("x");
        let b = Value::single(5i64);
        let err = a.merge(&b).unwrap_err();
        assert!(matches!(err, StitchError::IncompatibleValueType { .. }));
    }

    #[test]
    fn test_delta_no_change_is_distinct_from_empty() {
        let old = Value::list(["a", "b"]);
        let new = Value::single("a");
        assert_eq!(Value::delta(&new, Some(&old)).unwrap(), Delta::NoChange);

        let new = Value::list(["a", "c"]);
        assert_eq!(
            Value::delta(&new, Some(&old)).unwrap(),
            Delta::Changed(Value::single("c"))
        );

        assert_eq!(
            Value::delta(&new, None).unwrap(),
            Delta::Changed(Value::list(["a", "c"]))
        );
        assert_ne!(Delta::NoChange, Delta::Changed(Value::empty()));
    }

    #[test]
    fn test_without() {
        let v = Value::list([1i64, 2, 3]);
        assert_eq!(v.without(&Value::single(2i64)), Some(Value::list([1i64, 3])));
        assert_eq!(v.without(&v), None);
    }

    #[test]
    fn test_ranked_orders_by_support() {
        let v = Value::ranked(vec![
            (Scalar::from("b"), 1),
            (Scalar::from("a"), 3),
            (Scalar::from("c"), 3),
        ]);
        assert_eq!(v.to_vec(), vec![Scalar::from("a"), "c".into(), "b".into()]);
    }

    #[test]
    fn test_scalar_parse_and_tokens() {
        assert_eq!(Scalar::parse(" 42 ", ValueType::Integer), Some(Scalar::Int(42)));
        assert_eq!(Scalar::parse("x", ValueType::Integer), None);
        assert_eq!(Scalar::parse("", ValueType::String), None);
        assert_ne!(Scalar::from("42").index_token(), Scalar::from(42i64).index_token());
    }
}
