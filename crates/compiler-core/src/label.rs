//! Jump targets.

use crate::unit::ValueType;
use alloc::fmt;
use core::ops;
use serde::{Deserialize, Serialize};

/// Opaque identity of a jump destination.
///
/// Two labels are the same target only when they are the same handle; the
/// declaration data in [`LabelTable`] never takes part in equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Label(u32);

impl Label {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the inner value as a [`usize`].
    #[must_use]
    pub const fn idx(self) -> usize {
        self.0 as usize
    }
}

impl From<Label> for u32 {
    fn from(label: Label) -> Self {
        label.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelDecl {
    pub name: String,
    /// Type of the value a jump to this label transmits; `None` when jumps
    /// carry nothing.
    #[serde(default)]
    pub carries: Option<ValueType>,
    /// Introduced by a compiler pass rather than by the source program.
    #[serde(default)]
    pub synthetic: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelTable {
    decls: Vec<LabelDecl>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a source-level label.
    pub fn add(&mut self, name: impl Into<String>, carries: Option<ValueType>) -> Label {
        self.push(LabelDecl {
            name: name.into(),
            carries,
            synthetic: false,
        })
    }

    /// Declare a label introduced by a compiler pass.
    pub fn add_synthetic(&mut self, name: impl Into<String>, carries: Option<ValueType>) -> Label {
        self.push(LabelDecl {
            name: name.into(),
            carries,
            synthetic: true,
        })
    }

    fn push(&mut self, decl: LabelDecl) -> Label {
        let label = Label::new(u32::try_from(self.decls.len()).expect("too many labels"));
        self.decls.push(decl);
        label
    }

    pub fn get(&self, label: Label) -> Option<&LabelDecl> {
        self.decls.get(label.idx())
    }

    pub fn contains(&self, label: Label) -> bool {
        label.idx() < self.decls.len()
    }

    pub fn carries(&self, label: Label) -> Option<ValueType> {
        self.get(label).and_then(|decl| decl.carries)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Label, &LabelDecl)> + '_ {
        self.decls
            .iter()
            .enumerate()
            .map(|(i, decl)| (Label::new(i as u32), decl))
    }
}

impl ops::Index<Label> for LabelTable {
    type Output = LabelDecl;

    fn index(&self, label: Label) -> &LabelDecl {
        &self.decls[label.idx()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_identities() {
        let mut table = LabelTable::new();
        let a = table.add("end", None);
        let b = table.add("end", None);
        assert_ne!(a, b);
        assert_eq!(table[a], table[b]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn synthetic_labels_are_marked() {
        let mut table = LabelTable::new();
        let src = table.add("loop", Some(ValueType::Int));
        let syn = table.add_synthetic("flow", None);
        assert!(!table[src].synthetic);
        assert!(table[syn].synthetic);
        assert_eq!(table.carries(src), Some(ValueType::Int));
        assert_eq!(table.carries(syn), None);
        assert!(!table.contains(Label::new(7)));
    }
}
