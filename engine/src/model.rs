// model.rs — Hierarchical dataflow graph model
//
// Arena-backed graph of actors, ports, and relations. Actors may be leaf
// (atomic) or composite; composites own child actors and internal
// relations. A relation endpoint naming the relation's own container
// refers to the *inside* view of one of the container's boundary ports.
//
// Preconditions:
//   - Callers hold a mutable `Graph` while building.
// Postconditions:
//   - Every mutation bumps `Graph::version`; derived artifacts key their
//     caches on it.
// Failure modes:
//   - Structural violations (direction conflicts, bad rates, duplicate
//     ports, width conflicts) are returned as `SdfError`; the graph is
//     left unchanged by a failed mutation.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use crate::diag::SdfError;

// ── Identifiers ──────────────────────────────────────────────────────────

/// Index of an actor in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u32);

/// Index of a relation in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(pub u32);

// ── Port ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Token type carried by a port. `Opaque` stands for any type with no
/// registered marshalling entry; it survives modelling but is rejected at
/// code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Int,
    Double,
    Boolean,
    Opaque,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenType::Int => "int",
            TokenType::Double => "double",
            TokenType::Boolean => "boolean",
            TokenType::Opaque => "opaque",
        };
        write!(f, "{s}")
    }
}

impl TokenType {
    pub fn parse(s: &str) -> TokenType {
        match s {
            "int" => TokenType::Int,
            "double" => TokenType::Double,
            "boolean" => TokenType::Boolean,
            _ => TokenType::Opaque,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Port {
    pub name: String,
    pub direction: Direction,
    pub multiport: bool,
    /// Tokens produced (output) or consumed (input) per firing.
    pub rate: u32,
    pub ty: TokenType,
    /// Relations linked to this port, in declaration order. For a
    /// multiport, the position in this list is the channel index.
    pub linked: Vec<RelationId>,
}

impl Port {
    /// Number of channels this port exposes. A linked non-multiport has
    /// exactly one; an unlinked port has zero.
    pub fn width(&self) -> usize {
        self.linked.len()
    }
}

/// Declarative port specification handed to `add_port`.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub name: String,
    pub input: bool,
    pub output: bool,
    pub multiport: bool,
    pub rate: i64,
    pub ty: TokenType,
}

impl PortSpec {
    pub fn input(name: impl Into<String>, rate: i64) -> Self {
        Self {
            name: name.into(),
            input: true,
            output: false,
            multiport: false,
            rate,
            ty: TokenType::Double,
        }
    }

    pub fn output(name: impl Into<String>, rate: i64) -> Self {
        Self {
            name: name.into(),
            input: false,
            output: true,
            multiport: false,
            rate,
            ty: TokenType::Double,
        }
    }

    pub fn multiport(mut self) -> Self {
        self.multiport = true;
        self
    }

    pub fn typed(mut self, ty: TokenType) -> Self {
        self.ty = ty;
        self
    }
}

// ── Actor ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ActorNode {
    pub name: String,
    /// Registry kind for leaf actors; `None` for composites.
    pub kind: Option<String>,
    pub parent: Option<ActorId>,
    pub ports: Vec<Port>,
    pub children: Vec<ActorId>,
    pub params: BTreeMap<String, String>,
}

impl ActorNode {
    pub fn is_composite(&self) -> bool {
        !self.children.is_empty() || self.kind.is_none()
    }
}

// ── Relation ─────────────────────────────────────────────────────────────

/// One end of a relation: a port of an actor, by index. When `actor` is
/// the relation's own container, the endpoint designates the inside view
/// of that composite's boundary port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub actor: ActorId,
    pub port: usize,
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub name: String,
    /// Enclosing composite, or `None` for top-level relations.
    pub container: Option<ActorId>,
    pub endpoints: Vec<Endpoint>,
}

// ── Graph ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    pub actors: Vec<ActorNode>,
    pub relations: Vec<Relation>,
    /// Bumped on every mutation; derived artifacts cache against it.
    pub version: u64,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actors: Vec::new(),
            relations: Vec::new(),
            version: 0,
        }
    }

    pub fn actor(&self, id: ActorId) -> &ActorNode {
        &self.actors[id.0 as usize]
    }

    pub fn actor_mut(&mut self, id: ActorId) -> &mut ActorNode {
        self.version += 1;
        &mut self.actors[id.0 as usize]
    }

    pub fn relation(&self, id: RelationId) -> &Relation {
        &self.relations[id.0 as usize]
    }

    /// Add a top-level actor.
    pub fn add_actor(&mut self, name: impl Into<String>, kind: Option<String>) -> ActorId {
        let id = ActorId(self.actors.len() as u32);
        self.actors.push(ActorNode {
            name: name.into(),
            kind,
            parent: None,
            ports: Vec::new(),
            children: Vec::new(),
            params: BTreeMap::new(),
        });
        self.version += 1;
        id
    }

    /// Add an actor inside a composite.
    pub fn add_child(
        &mut self,
        parent: ActorId,
        name: impl Into<String>,
        kind: Option<String>,
    ) -> ActorId {
        let id = ActorId(self.actors.len() as u32);
        self.actors.push(ActorNode {
            name: name.into(),
            kind,
            parent: Some(parent),
            ports: Vec::new(),
            children: Vec::new(),
            params: BTreeMap::new(),
        });
        self.actors[parent.0 as usize].children.push(id);
        self.version += 1;
        id
    }

    /// Declare a port on an actor. Validates direction, rate, and name
    /// uniqueness before touching the graph.
    pub fn add_port(&mut self, actor: ActorId, spec: PortSpec) -> Result<usize, SdfError> {
        let node = &self.actors[actor.0 as usize];
        if spec.input == spec.output {
            return Err(SdfError::PortDirectionConflict {
                actor: node.name.clone(),
                port: spec.name,
            });
        }
        if spec.rate <= 0 {
            return Err(SdfError::RateConfigurationError {
                actor: node.name.clone(),
                port: spec.name,
                rate: spec.rate,
            });
        }
        if node.ports.iter().any(|p| p.name == spec.name) {
            return Err(SdfError::DuplicatePort {
                actor: node.name.clone(),
                port: spec.name,
            });
        }
        let idx = node.ports.len();
        self.actors[actor.0 as usize].ports.push(Port {
            name: spec.name,
            direction: if spec.input {
                Direction::Input
            } else {
                Direction::Output
            },
            multiport: spec.multiport,
            rate: spec.rate as u32,
            ty: spec.ty,
            linked: Vec::new(),
        });
        self.version += 1;
        Ok(idx)
    }

    /// Add a relation at the top level.
    pub fn add_relation(&mut self, name: impl Into<String>) -> RelationId {
        self.add_relation_in(name, None)
    }

    /// Add a relation contained in a composite (or top level for `None`).
    pub fn add_relation_in(
        &mut self,
        name: impl Into<String>,
        container: Option<ActorId>,
    ) -> RelationId {
        let id = RelationId(self.relations.len() as u32);
        self.relations.push(Relation {
            name: name.into(),
            container,
            endpoints: Vec::new(),
        });
        self.version += 1;
        id
    }

    /// Which side of an actor a relation attaches to. A relation contained
    /// in the actor itself touches the inside view of a boundary port; any
    /// other relation touches the outside.
    fn is_inside_link(&self, actor: ActorId, relation: RelationId) -> bool {
        self.relations[relation.0 as usize].container == Some(actor)
    }

    /// Link a port to a relation. A non-multiport admits exactly one
    /// relation per side (a composite boundary port has an inside and an
    /// outside view); multiport links are appended in call order and that
    /// order defines the port's channel numbering.
    pub fn link(&mut self, actor: ActorId, port: usize, relation: RelationId) -> Result<(), SdfError> {
        let inside = self.is_inside_link(actor, relation);
        let node = &self.actors[actor.0 as usize];
        let p = &node.ports[port];
        let same_side = p
            .linked
            .iter()
            .filter(|r| (self.relations[r.0 as usize].container == Some(actor)) == inside)
            .count();
        if !p.multiport && same_side > 0 {
            return Err(SdfError::PortWidthConflict {
                actor: node.name.clone(),
                port: p.name.clone(),
            });
        }
        self.actors[actor.0 as usize].ports[port].linked.push(relation);
        self.relations[relation.0 as usize]
            .endpoints
            .push(Endpoint { actor, port });
        self.version += 1;
        Ok(())
    }

    /// All actors in declaration-order depth-first preorder, top-level
    /// actors first. Deterministic for a given build sequence.
    pub fn actors_preorder(&self) -> Vec<ActorId> {
        let mut out = Vec::with_capacity(self.actors.len());
        let roots: Vec<ActorId> = (0..self.actors.len() as u32)
            .map(ActorId)
            .filter(|id| self.actor(*id).parent.is_none())
            .collect();
        let mut stack: Vec<ActorId> = roots.into_iter().rev().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            for child in self.actor(id).children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Leaf actors in preorder.
    pub fn leaves_preorder(&self) -> Vec<ActorId> {
        self.actors_preorder()
            .into_iter()
            .filter(|id| !self.actor(*id).is_composite())
            .collect()
    }

    /// Look up a port by name on an actor.
    pub fn find_port(&self, actor: ActorId, name: &str) -> Option<usize> {
        self.actor(actor).ports.iter().position(|p| p.name == name)
    }

    /// Dotted path of an actor from the model root (`outer.inner`).
    pub fn actor_path(&self, actor: ActorId) -> String {
        let mut parts = vec![self.actor(actor).name.clone()];
        let mut cur = self.actor(actor).parent;
        while let Some(p) = cur {
            parts.push(self.actor(p).name.clone());
            cur = self.actor(p).parent;
        }
        parts.reverse();
        parts.join(".")
    }

    /// Dotted path of a port (`outer.inner.portname`).
    pub fn port_path(&self, actor: ActorId, port: usize) -> String {
        format!("{}.{}", self.actor_path(actor), self.actor(actor).ports[port].name)
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "model {} (v{})", self.name, self.version)?;
        for id in self.actors_preorder() {
            let a = self.actor(id);
            let depth = {
                let mut d = 0;
                let mut cur = a.parent;
                while let Some(p) = cur {
                    d += 1;
                    cur = self.actor(p).parent;
                }
                d
            };
            let indent = "  ".repeat(depth + 1);
            let tag = if a.is_composite() { "composite" } else { "actor" };
            match &a.kind {
                Some(k) => writeln!(f, "{indent}{tag} {} : {}", a.name, k)?,
                None => writeln!(f, "{indent}{tag} {}", a.name)?,
            }
            for p in &a.ports {
                let dir = match p.direction {
                    Direction::Input => "in",
                    Direction::Output => "out",
                };
                let mp = if p.multiport { " multi" } else { "" };
                writeln!(
                    f,
                    "{indent}  {dir}{mp} {} : {} rate {}",
                    p.name, p.ty, p.rate
                )?;
            }
        }
        Ok(())
    }
}
