//! Type graph (C1).
//!
//! A pure data component: base/pointer/array/struct nodes with shared sub-edges, living
//! in an arena owned by the compilation unit that discovered them. Edges are indices
//! into that arena rather than `typed_arena`-style borrowed references: the spec's design
//! notes sanction either ("edges are indices or non-owning references"), and indices sidestep
//! the self-referential-lifetime machinery a borrowed-edge graph would otherwise need for
//! nothing this simplified, field-less C-like type model actually requires (no generics,
//! no trait objects, no recursive enum payloads beyond a single pointee/element edge).
//!
//! Pointer cycles (`struct node { node *next; }`) are representable because an edge is
//! just a `TypeId`, and a `Pointer` node's `pointee` can legally equal the index of the
//! struct that contains it.

use std::fmt;

/// Index of a [`TypeNode`] within its owning compilation unit's arena.
pub type TypeId = usize;

/// An edge to another type node: unresolved until the loader's second pass rewrites it,
/// permanently null if the referenced DIE offset was never found among the unit's types.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Edge {
    Unresolved(u64),
    Resolved(TypeId),
    Null,
}

impl Edge {
    pub fn resolved(self) -> Option<TypeId> {
        match self {
            Edge::Resolved(id) => Some(id),
            _ => None,
        }
    }
}

/// A base type's interpretation, closed set per the spec's data model.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interp {
    Address,
    Signed,
    Unsigned,
    SignedChar,
    UnsignedChar,
    Float,
    Bool,
}

impl Interp {
    /// Map a DWARF `DW_ATE_*` encoding constant to the closed interpretation set.
    pub fn from_dwarf_encoding(encoding: gimli::DwAte) -> Option<Interp> {
        use gimli::constants::*;
        Some(match encoding {
            DW_ATE_address => Interp::Address,
            DW_ATE_signed => Interp::Signed,
            DW_ATE_unsigned => Interp::Unsigned,
            DW_ATE_signed_char => Interp::SignedChar,
            DW_ATE_unsigned_char => Interp::UnsignedChar,
            DW_ATE_float => Interp::Float,
            DW_ATE_boolean => Interp::Bool,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeKind {
    Base { name: String, interp: Interp },
    Pointer { pointee: Edge },
    Array { element: Edge },
    Struct { name: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeNode {
    /// DIE offset this node was built from; used by the loader's resolution pass to
    /// match placeholder edges against the node that defines that offset.
    pub die_offset: u64,
    pub size: u32,
    pub kind: TypeKind,
}

impl TypeNode {
    pub fn new_base(die_offset: u64, name: impl Into<String>, size: u32, interp: Interp) -> Self {
        TypeNode {
            die_offset,
            size,
            kind: TypeKind::Base {
                name: name.into(),
                interp,
            },
        }
    }

    pub fn new_pointer(die_offset: u64, pointee: Edge) -> Self {
        TypeNode {
            die_offset,
            size: 8,
            kind: TypeKind::Pointer { pointee },
        }
    }

    pub fn new_array(die_offset: u64, element: Edge, size: u32) -> Self {
        TypeNode {
            die_offset,
            size,
            kind: TypeKind::Array { element },
        }
    }

    pub fn new_struct(die_offset: u64, name: impl Into<String>) -> Self {
        TypeNode {
            die_offset,
            size: 0,
            kind: TypeKind::Struct { name: name.into() },
        }
    }
}

impl fmt::Display for TypeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Base { name, .. } => write!(f, "{name}"),
            TypeKind::Pointer { .. } => write!(f, "pointer"),
            TypeKind::Array { .. } => write!(f, "array"),
            TypeKind::Struct { name } => write!(f, "struct {name}"),
        }
    }
}

/// An owned, detached subgraph produced by cloning a shared type out of a unit's arena
/// (the expression evaluator does this because `&e` must synthesize a fresh pointer node
/// pointing back into a clone of `e`'s type). Unlike [`TypeArena`], edges here are plain
/// indices into `Self::nodes`, so the clone is self-contained and free-standing.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedType {
    pub nodes: Vec<TypeNode>,
    pub root: TypeId,
}

impl OwnedType {
    pub fn root(&self) -> &TypeNode {
        &self.nodes[self.root]
    }

    pub fn pointee(&self) -> Option<&TypeNode> {
        match &self.root().kind {
            TypeKind::Pointer { pointee } => pointee.resolved().map(|id| &self.nodes[id]),
            _ => None,
        }
    }

    pub fn element(&self) -> Option<&TypeNode> {
        match &self.root().kind {
            TypeKind::Array { element } => element.resolved().map(|id| &self.nodes[id]),
            _ => None,
        }
    }

    /// Wrap this owned subgraph in a fresh pointer node, as `&e` does (§4.6).
    pub fn wrap_in_pointer(mut self) -> OwnedType {
        let old_root = self.root;
        self.nodes.push(TypeNode::new_pointer(0, Edge::Resolved(old_root)));
        let new_root = self.nodes.len() - 1;
        OwnedType {
            nodes: self.nodes,
            root: new_root,
        }
    }

    /// Deep-equality against another owned subgraph (testable property 7).
    pub fn deep_eq(&self, other: &OwnedType) -> bool {
        fn eq_at(a: &OwnedType, b: &OwnedType, ai: TypeId, bi: TypeId) -> bool {
            let (na, nb) = (&a.nodes[ai], &b.nodes[bi]);
            if na.size != nb.size {
                return false;
            }
            match (&na.kind, &nb.kind) {
                (TypeKind::Base { name: n1, interp: i1 }, TypeKind::Base { name: n2, interp: i2 }) => {
                    n1 == n2 && i1 == i2
                }
                (TypeKind::Pointer { pointee: p1 }, TypeKind::Pointer { pointee: p2 }) => {
                    match (p1.resolved(), p2.resolved()) {
                        (Some(r1), Some(r2)) => eq_at(a, b, r1, r2),
                        (None, None) => true,
                        _ => false,
                    }
                }
                (TypeKind::Array { element: e1 }, TypeKind::Array { element: e2 }) => {
                    match (e1.resolved(), e2.resolved()) {
                        (Some(r1), Some(r2)) => eq_at(a, b, r1, r2),
                        (None, None) => true,
                        _ => false,
                    }
                }
                (TypeKind::Struct { name: n1 }, TypeKind::Struct { name: n2 }) => n1 == n2,
                _ => false,
            }
        }
        eq_at(self, other, self.root, other.root)
    }
}

/// The arena of type nodes owned by one compilation unit. Shared and immutable once the
/// loader finishes; the expression evaluator never mutates it, only clones out of it.
#[derive(Debug, Default)]
pub struct TypeArena {
    pub nodes: Vec<TypeNode>,
}

impl TypeArena {
    pub fn push(&mut self, node: TypeNode) -> TypeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn get(&self, id: TypeId) -> Option<&TypeNode> {
        self.nodes.get(id)
    }

    /// Rewrite an `Unresolved(offset)` edge to `Resolved(id)` by finding the node whose
    /// `die_offset` matches, leaving it `Null` if no such node exists in this unit (§4.1
    /// pass 2: "placeholders that fail to resolve are left as null edges").
    pub fn resolve_edge(&self, edge: Edge) -> Edge {
        match edge {
            Edge::Unresolved(offset) => self
                .nodes
                .iter()
                .position(|n| n.die_offset == offset)
                .map(Edge::Resolved)
                .unwrap_or(Edge::Null),
            other => other,
        }
    }

    /// Pass 2 of the loader: rewrite every `Unresolved` edge among this unit's own nodes
    /// (pointer pointees, array elements) now that every node's `die_offset` is known.
    /// Edges that don't resolve become `Null` rather than failing the load (§4.1).
    pub fn resolve_all(&mut self) {
        for i in 0..self.nodes.len() {
            let resolved = match &self.nodes[i].kind {
                TypeKind::Pointer { pointee } => Some((true, self.resolve_edge(*pointee))),
                TypeKind::Array { element } => Some((false, self.resolve_edge(*element))),
                _ => None,
            };
            if let Some((is_pointer, edge)) = resolved {
                match &mut self.nodes[i].kind {
                    TypeKind::Pointer { pointee } if is_pointer => *pointee = edge,
                    TypeKind::Array { element } if !is_pointer => *element = edge,
                    _ => unreachable!(),
                }
            }
        }
    }

    /// Deep-clone the subgraph rooted at `id` into a detached, owned [`OwnedType`].
    pub fn clone_owned(&self, id: TypeId) -> OwnedType {
        let mut nodes = Vec::new();
        let mut memo = std::collections::HashMap::new();
        let root = self.clone_rec(id, &mut nodes, &mut memo);
        OwnedType { nodes, root }
    }

    fn clone_rec(
        &self,
        id: TypeId,
        out: &mut Vec<TypeNode>,
        memo: &mut std::collections::HashMap<TypeId, TypeId>,
    ) -> TypeId {
        if let Some(&existing) = memo.get(&id) {
            return existing;
        }
        let node = &self.nodes[id];
        match &node.kind {
            TypeKind::Base { .. } | TypeKind::Struct { .. } => {
                out.push(node.clone());
                let new_id = out.len() - 1;
                memo.insert(id, new_id);
                new_id
            }
            TypeKind::Pointer { pointee } => {
                // Reserve the slot before recursing so a pointer cycle resolves back to it.
                out.push(TypeNode::new_pointer(node.die_offset, Edge::Null));
                let new_id = out.len() - 1;
                memo.insert(id, new_id);
                let new_pointee = pointee
                    .resolved()
                    .map(|p| Edge::Resolved(self.clone_rec(p, out, memo)))
                    .unwrap_or(Edge::Null);
                out[new_id].kind = TypeKind::Pointer {
                    pointee: new_pointee,
                };
                new_id
            }
            TypeKind::Array { element } => {
                out.push(TypeNode::new_array(node.die_offset, Edge::Null, node.size));
                let new_id = out.len() - 1;
                memo.insert(id, new_id);
                let new_element = element
                    .resolved()
                    .map(|e| Edge::Resolved(self.clone_rec(e, out, memo)))
                    .unwrap_or(Edge::Null);
                out[new_id].kind = TypeKind::Array {
                    element: new_element,
                };
                new_id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_preserves_pointer_cycle() {
        let mut arena = TypeArena::default();
        let node_id = arena.push(TypeNode::new_struct(1, "node"));
        let ptr_id = arena.push(TypeNode::new_pointer(2, Edge::Resolved(node_id)));
        // patch `node` to have a `next: *node` field-equivalent by re-pointing the
        // pointer's pointee back at the struct (simulating `struct node { node *next; }`)
        arena.nodes[ptr_id] = TypeNode::new_pointer(2, Edge::Resolved(node_id));

        let cloned = arena.clone_owned(ptr_id);
        assert!(matches!(cloned.root().kind, TypeKind::Pointer { .. }));
        let pointee = cloned.pointee().unwrap();
        assert!(matches!(pointee.kind, TypeKind::Struct { .. }));
    }

    #[test]
    fn deep_equal_after_clone() {
        let mut arena = TypeArena::default();
        let base = arena.push(TypeNode::new_base(1, "int", 4, Interp::Signed));
        let ptr = arena.push(TypeNode::new_pointer(2, Edge::Resolved(base)));

        let a = arena.clone_owned(ptr);
        let b = arena.clone_owned(ptr);
        assert!(a.deep_eq(&b));
    }

    #[test]
    fn resolve_edge_leaves_null_when_missing() {
        let arena = TypeArena::default();
        let resolved = arena.resolve_edge(Edge::Unresolved(0xdead));
        assert_eq!(resolved, Edge::Null);
    }

    #[test]
    fn address_of_wraps_in_fresh_pointer() {
        let mut arena = TypeArena::default();
        let base = arena.push(TypeNode::new_base(1, "int", 4, Interp::Signed));
        let owned = arena.clone_owned(base);
        let wrapped = owned.wrap_in_pointer();
        assert!(matches!(wrapped.root().kind, TypeKind::Pointer { .. }));
        assert_eq!(wrapped.root().size, 8);
        assert_eq!(wrapped.pointee().unwrap().kind, TypeKind::Base { name: "int".into(), interp: Interp::Signed });
    }
}
