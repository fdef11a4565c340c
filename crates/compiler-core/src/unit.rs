use crate::{label::LabelTable, tree::Constant, tree::Node};
use alloc::fmt;
use core::ops;
use serde::{Deserialize, Serialize};

/// Static type of a local or of the value a label transmits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Any,
    Int,
    Bool,
    Str,
    Exception,
}

impl ValueType {
    /// Value a freshly allocated local of this type starts with.
    pub const fn initial_value(self) -> Constant {
        match self {
            Self::Int => Constant::Int(0),
            Self::Bool => Constant::Bool(false),
            Self::Any | Self::Str | Self::Exception => Constant::Nil,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Str => "str",
            Self::Exception => "exception",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct VarId(u32);

impl VarId {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn idx(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDecl {
    pub name: String,
    pub ty: ValueType,
    /// Introduced by a compiler pass; the code generator allocates storage for
    /// these alongside ordinary locals.
    #[serde(default)]
    pub synthetic: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalTable {
    decls: Vec<LocalDecl>,
}

impl LocalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, ty: ValueType) -> VarId {
        self.push(LocalDecl {
            name: name.into(),
            ty,
            synthetic: false,
        })
    }

    pub fn add_synthetic(&mut self, name: impl Into<String>, ty: ValueType) -> VarId {
        self.push(LocalDecl {
            name: name.into(),
            ty,
            synthetic: true,
        })
    }

    fn push(&mut self, decl: LocalDecl) -> VarId {
        let var = VarId::new(u32::try_from(self.decls.len()).expect("too many locals"));
        self.decls.push(decl);
        var
    }

    pub fn get(&self, var: VarId) -> Option<&LocalDecl> {
        self.decls.get(var.idx())
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, &LocalDecl)> + '_ {
        self.decls
            .iter()
            .enumerate()
            .map(|(i, decl)| (VarId::new(i as u32), decl))
    }

    pub fn synthetic(&self) -> impl Iterator<Item = (VarId, &LocalDecl)> + '_ {
        self.iter().filter(|(_, decl)| decl.synthetic)
    }
}

impl ops::Index<VarId> for LocalTable {
    type Output = LocalDecl;

    fn index(&self, var: VarId) -> &LocalDecl {
        &self.decls[var.idx()]
    }
}

/// One compiled unit: a function, method or top-level body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeUnit {
    pub name: String,
    #[serde(default)]
    pub labels: LabelTable,
    #[serde(default)]
    pub locals: LocalTable,
    pub body: Node,
}

impl CodeUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: LabelTable::new(),
            locals: LocalTable::new(),
            body: Node::nil(),
        }
    }

    pub fn label(&mut self, name: impl Into<String>) -> crate::Label {
        self.labels.add(name, None)
    }

    pub fn label_with(&mut self, name: impl Into<String>, carries: ValueType) -> crate::Label {
        self.labels.add(name, Some(carries))
    }

    pub fn local(&mut self, name: impl Into<String>, ty: ValueType) -> VarId {
        self.locals.add(name, ty)
    }

    pub fn with_body(mut self, body: Node) -> Self {
        self.body = body;
        self
    }
}
