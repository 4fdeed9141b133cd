// desc.rs — JSON model description front-end
//
// Deserializes a model description and builds the hierarchical graph.
// Leaf actors name a registry kind and inherit its port signature, with
// optional per-actor rate overrides. Composite actors declare their own
// boundary ports inline and contain nested actors and relations. A
// relation endpoint naming the enclosing composite itself binds the
// inside view of that composite's boundary port.
//
// Preconditions:
//   - The registry contains every kind the description references.
// Postconditions:
//   - The returned graph passes all structural validation in `model`.
// Failure modes:
//   - `SdfError` for unknown kinds, unresolvable endpoint paths, and any
//     structural violation surfaced by graph mutation.
// Side effects: none.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::diag::SdfError;
use crate::model::{ActorId, Graph, PortSpec, TokenType};
use crate::registry::KindRegistry;

// ── Description types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct PortDesc {
    pub name: String,
    #[serde(default)]
    pub input: bool,
    #[serde(default)]
    pub output: bool,
    #[serde(default)]
    pub multiport: bool,
    #[serde(default = "default_rate")]
    pub rate: i64,
    #[serde(rename = "type", default = "default_type")]
    pub ty: String,
}

fn default_rate() -> i64 {
    1
}

fn default_type() -> String {
    "double".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActorDesc {
    pub name: String,
    /// Registry kind. Absent for composites.
    #[serde(default)]
    pub kind: Option<String>,
    /// Inline boundary ports (composites only).
    #[serde(default)]
    pub ports: Vec<PortDesc>,
    /// Nested actors; non-empty marks this actor composite.
    #[serde(default)]
    pub actors: Vec<ActorDesc>,
    #[serde(default)]
    pub relations: Vec<RelationDesc>,
    /// Per-port rate overrides applied on top of the kind signature.
    #[serde(default)]
    pub rates: BTreeMap<String, i64>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationDesc {
    pub name: String,
    /// Endpoint paths of the form `actor.port`. Naming the enclosing
    /// composite binds the inside view of its boundary port.
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelDesc {
    pub name: String,
    #[serde(default)]
    pub iterations: u64,
    #[serde(default = "default_period")]
    pub period: f64,
    #[serde(default)]
    pub actors: Vec<ActorDesc>,
    #[serde(default)]
    pub relations: Vec<RelationDesc>,
}

fn default_period() -> f64 {
    1.0
}

impl ModelDesc {
    pub fn from_json(text: &str) -> Result<ModelDesc, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ── Graph construction ───────────────────────────────────────────────────

/// Build the graph described by `desc`, resolving leaf port signatures
/// through `registry`.
pub fn build(desc: &ModelDesc, registry: &KindRegistry) -> Result<Graph, SdfError> {
    let mut graph = Graph::new(desc.name.clone());
    let mut top = Vec::new();
    for actor in &desc.actors {
        let id = build_actor(&mut graph, None, actor, registry)?;
        top.push((actor.name.clone(), id));
    }
    wire_relations(&mut graph, None, &desc.relations)?;
    Ok(graph)
}

fn build_actor(
    graph: &mut Graph,
    parent: Option<ActorId>,
    desc: &ActorDesc,
    registry: &KindRegistry,
) -> Result<ActorId, SdfError> {
    let composite = !desc.actors.is_empty() || desc.kind.is_none();
    let kind = if composite { None } else { desc.kind.clone() };
    let id = match parent {
        Some(p) => graph.add_child(p, desc.name.clone(), kind),
        None => graph.add_actor(desc.name.clone(), kind),
    };
    graph.actor_mut(id).params = desc.params.clone();

    if composite {
        // Boundary ports come from the inline declaration.
        for p in &desc.ports {
            graph.add_port(id, port_spec(p))?;
        }
        for child in &desc.actors {
            build_actor(graph, Some(id), child, registry)?;
        }
        wire_relations(graph, Some(id), &desc.relations)?;
    } else {
        let kind_name = desc.kind.as_deref().unwrap_or_default();
        let kind = registry
            .lookup(kind_name)
            .ok_or_else(|| SdfError::UnknownActorKind {
                actor: desc.name.clone(),
                kind: kind_name.to_string(),
            })?;
        for kp in &kind.ports {
            let rate = desc.rates.get(&kp.name).copied().unwrap_or(kp.rate);
            graph.add_port(
                id,
                PortSpec {
                    name: kp.name.clone(),
                    input: kp.input,
                    output: kp.output,
                    multiport: kp.multiport,
                    rate,
                    ty: TokenType::parse(&kp.ty),
                },
            )?;
        }
    }
    Ok(id)
}

fn port_spec(p: &PortDesc) -> PortSpec {
    PortSpec {
        name: p.name.clone(),
        input: p.input,
        output: p.output,
        multiport: p.multiport,
        rate: p.rate,
        ty: TokenType::parse(&p.ty),
    }
}

/// Create the relations of one hierarchy level and link their endpoints.
fn wire_relations(
    graph: &mut Graph,
    container: Option<ActorId>,
    relations: &[RelationDesc],
) -> Result<(), SdfError> {
    for rel in relations {
        let rid = graph.add_relation_in(rel.name.clone(), container);
        for endpoint in &rel.endpoints {
            let (actor, port) = resolve_endpoint(graph, container, endpoint)?;
            graph.link(actor, port, rid)?;
        }
    }
    Ok(())
}

/// Resolve an `actor.port` path at one hierarchy level. The actor name is
/// looked up among the container's children (or top-level actors), or may
/// be the container itself for a boundary-port inside view.
fn resolve_endpoint(
    graph: &Graph,
    container: Option<ActorId>,
    path: &str,
) -> Result<(ActorId, usize), SdfError> {
    let (actor_name, port_name) = path.rsplit_once('.').ok_or_else(|| {
        SdfError::UnresolvedPortError {
            subject: path.to_string(),
            detail: "endpoint must be written as 'actor.port'".to_string(),
        }
    })?;

    let actor = if let Some(c) = container {
        if graph.actor(c).name == actor_name {
            Some(c)
        } else {
            graph
                .actor(c)
                .children
                .iter()
                .copied()
                .find(|id| graph.actor(*id).name == actor_name)
        }
    } else {
        (0..graph.actors.len() as u32)
            .map(ActorId)
            .find(|id| graph.actor(*id).parent.is_none() && graph.actor(*id).name == actor_name)
    };
    let actor = actor.ok_or_else(|| SdfError::UnresolvedPortError {
        subject: path.to_string(),
        detail: format!("no actor named '{}' at this level", actor_name),
    })?;

    let port = graph
        .find_port(actor, port_name)
        .ok_or_else(|| SdfError::UnresolvedPortError {
            subject: path.to_string(),
            detail: format!(
                "actor '{}' has no port named '{}'",
                graph.actor(actor).name,
                port_name
            ),
        })?;
    Ok((actor, port))
}
