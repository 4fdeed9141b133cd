// resolve.rs — Flattened channel-link resolution
//
// Computes, for every leaf output channel, the set of leaf input channels
// it feeds, traversing relations across composite boundaries in both
// directions. Composites are transparent: the link table never names one.
//
// Preconditions:
//   - The graph passed structural validation during construction.
// Postconditions:
//   - Links are in deterministic order (source preorder rank, then source
//     port, then source channel); resolving the same graph twice yields
//     an identical table.
// Failure modes:
//   - `UnresolvedPortError` when traversal reaches the inside view of a
//     composite *input* boundary port, which implies a direction
//     inconsistency in the wiring.
// Side effects: none.

use std::collections::{BTreeMap, HashSet};

use crate::diag::{codes, DiagLevel, Diagnostic, SdfError};
use crate::model::{ActorId, Direction, Graph, RelationId};

// ── Link table ───────────────────────────────────────────────────────────

/// One fully resolved source-to-destination channel connection between
/// leaf actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub source_actor: ActorId,
    pub source_port: usize,
    pub source_channel: usize,
    pub dest_actor: ActorId,
    pub dest_port: usize,
    pub dest_channel: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTable {
    pub links: Vec<Link>,
    /// Graph version this table was resolved against.
    pub version: u64,
}

impl LinkTable {
    /// Links originating at one output channel, in table order.
    pub fn from_source(&self, actor: ActorId, port: usize, channel: usize) -> Vec<&Link> {
        self.links
            .iter()
            .filter(|l| {
                l.source_actor == actor && l.source_port == port && l.source_channel == channel
            })
            .collect()
    }

    /// Links arriving at one input channel, in table order.
    pub fn into_dest(&self, actor: ActorId, port: usize, channel: usize) -> Vec<&Link> {
        self.links
            .iter()
            .filter(|l| l.dest_actor == actor && l.dest_port == port && l.dest_channel == channel)
            .collect()
    }
}

#[derive(Debug)]
pub struct ResolveResult {
    pub table: LinkTable,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Resolve every leaf output channel of `graph` to its destination
/// receivers. Dangling channels resolve to nothing, silently; fan-in is
/// retained and reported as a warning.
pub fn resolve_links(graph: &Graph) -> Result<ResolveResult, SdfError> {
    let mut links = Vec::new();

    for source in graph.leaves_preorder() {
        for (port_idx, port) in graph.actor(source).ports.iter().enumerate() {
            if port.direction != Direction::Output {
                continue;
            }
            for (channel, relation) in port.linked.iter().enumerate() {
                let mut visited = HashSet::new();
                trace_relation(
                    graph,
                    *relation,
                    (source, port_idx),
                    &mut visited,
                    &mut |dest_actor, dest_port, dest_channel| {
                        links.push(Link {
                            source_actor: source,
                            source_port: port_idx,
                            source_channel: channel,
                            dest_actor,
                            dest_port,
                            dest_channel,
                        });
                    },
                )?;
            }
        }
    }

    let rank: BTreeMap<ActorId, usize> = graph
        .actors_preorder()
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id, i))
        .collect();
    links.sort_by_key(|l| (rank[&l.source_actor], l.source_port, l.source_channel));

    let diagnostics = fan_in_warnings(graph, &links);
    Ok(ResolveResult {
        table: LinkTable {
            links,
            version: graph.version,
        },
        diagnostics,
    })
}

/// Walk one relation, invoking `sink` for every leaf input channel it
/// reaches. `entry` is the port the traversal arrived through; its
/// endpoint on this relation is skipped.
fn trace_relation(
    graph: &Graph,
    relation: RelationId,
    entry: (ActorId, usize),
    visited: &mut HashSet<RelationId>,
    sink: &mut impl FnMut(ActorId, usize, usize),
) -> Result<(), SdfError> {
    if !visited.insert(relation) {
        return Ok(());
    }
    let rel = graph.relation(relation);
    for (ep_idx, ep) in rel.endpoints.iter().enumerate() {
        if (ep.actor, ep.port) == entry {
            continue;
        }
        let node = graph.actor(ep.actor);
        let port = &node.ports[ep.port];
        let is_boundary_inside = rel.container == Some(ep.actor);

        if is_boundary_inside {
            match port.direction {
                // Inside view of an output boundary: ascend to the
                // composite's enclosing level.
                Direction::Output => {
                    for r in &port.linked {
                        if graph.relation(*r).container != Some(ep.actor) {
                            trace_relation(graph, *r, (ep.actor, ep.port), visited, sink)?;
                        }
                    }
                }
                // A source inside the composite drives the composite's own
                // input boundary. The wiring is direction-inconsistent.
                Direction::Input => {
                    return Err(SdfError::UnresolvedPortError {
                        subject: graph.port_path(ep.actor, ep.port),
                        detail: "an inside source drives an input boundary port".to_string(),
                    });
                }
            }
        } else {
            match port.direction {
                Direction::Input => {
                    if node.is_composite() {
                        // Descend through the boundary into the composite.
                        for r in &port.linked {
                            if graph.relation(*r).container == Some(ep.actor) {
                                trace_relation(graph, *r, (ep.actor, ep.port), visited, sink)?;
                            }
                        }
                    } else {
                        // A port linked to this relation more than once has
                        // one endpoint per channel; pair the n-th endpoint
                        // with the n-th occurrence in link order.
                        let occurrence = rel.endpoints[..ep_idx]
                            .iter()
                            .filter(|e| (e.actor, e.port) == (ep.actor, ep.port))
                            .count();
                        let dest_channel = port
                            .linked
                            .iter()
                            .enumerate()
                            .filter(|(_, r)| **r == relation)
                            .map(|(i, _)| i)
                            .nth(occurrence)
                            .unwrap_or(0);
                        sink(ep.actor, ep.port, dest_channel);
                    }
                }
                // A peer writer on the same relation. Its own traversal
                // produces its links.
                Direction::Output => {}
            }
        }
    }
    Ok(())
}

/// Warn once per destination receiver fed by more than one source.
fn fan_in_warnings(graph: &Graph, links: &[Link]) -> Vec<Diagnostic> {
    let mut by_dest: BTreeMap<(ActorId, usize, usize), usize> = BTreeMap::new();
    for l in links {
        *by_dest
            .entry((l.dest_actor, l.dest_port, l.dest_channel))
            .or_default() += 1;
    }
    by_dest
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|((actor, port, channel), n)| {
            Diagnostic::new(
                DiagLevel::Warning,
                format!(
                    "{} writers feed channel {} of '{}'",
                    n,
                    channel,
                    graph.port_path(actor, port)
                ),
            )
            .with_code(codes::W0200)
            .with_subject(graph.port_path(actor, port))
            .with_hint("merge the writers through an explicit combiner actor".to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PortSpec;

    fn chain() -> (Graph, ActorId, ActorId) {
        let mut g = Graph::new("chain");
        let src = g.add_actor("src", Some("ramp".into()));
        let src_out = g.add_port(src, PortSpec::output("out", 1)).unwrap();
        let snk = g.add_actor("snk", Some("printer".into()));
        let snk_in = g.add_port(snk, PortSpec::input("in", 1)).unwrap();
        let r = g.add_relation("r0");
        g.link(src, src_out, r).unwrap();
        g.link(snk, snk_in, r).unwrap();
        (g, src, snk)
    }

    #[test]
    fn direct_chain_resolves_one_link() {
        let (g, src, snk) = chain();
        let result = resolve_links(&g).unwrap();
        assert_eq!(
            result.table.links,
            vec![Link {
                source_actor: src,
                source_port: 0,
                source_channel: 0,
                dest_actor: snk,
                dest_port: 0,
                dest_channel: 0,
            }]
        );
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn resolution_is_idempotent() {
        let (g, _, _) = chain();
        let a = resolve_links(&g).unwrap();
        let b = resolve_links(&g).unwrap();
        assert_eq!(a.table, b.table);
    }

    #[test]
    fn dangling_output_resolves_to_nothing() {
        let mut g = Graph::new("dangling");
        let src = g.add_actor("src", Some("ramp".into()));
        let p = g.add_port(src, PortSpec::output("out", 1)).unwrap();
        let r = g.add_relation("r0");
        g.link(src, p, r).unwrap();
        let result = resolve_links(&g).unwrap();
        assert!(result.table.links.is_empty());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn composite_boundary_is_transparent() {
        let mut g = Graph::new("nested");
        let src = g.add_actor("src", Some("ramp".into()));
        let src_out = g.add_port(src, PortSpec::output("out", 1)).unwrap();

        let sub = g.add_actor("sub", None);
        let sub_in = g.add_port(sub, PortSpec::input("in", 1)).unwrap();
        let inner = g.add_child(sub, "g", Some("gain".into()));
        let inner_in = g.add_port(inner, PortSpec::input("in", 1)).unwrap();
        let _ = g.add_port(inner, PortSpec::output("out", 1)).unwrap();

        let outer_rel = g.add_relation("outer");
        g.link(src, src_out, outer_rel).unwrap();
        g.link(sub, sub_in, outer_rel).unwrap();

        let inner_rel = g.add_relation_in("inner", Some(sub));
        g.link(sub, sub_in, inner_rel).unwrap();
        g.link(inner, inner_in, inner_rel).unwrap();

        let result = resolve_links(&g).unwrap();
        assert_eq!(result.table.links.len(), 1);
        let l = result.table.links[0];
        assert_eq!(l.source_actor, src);
        assert_eq!(l.dest_actor, inner);
        assert_eq!(l.dest_port, inner_in);
    }

    #[test]
    fn nested_output_ascends_to_outer_sink() {
        let mut g = Graph::new("ascend");
        let sub = g.add_actor("sub", None);
        let sub_out = g.add_port(sub, PortSpec::output("out", 1)).unwrap();
        let inner = g.add_child(sub, "src", Some("ramp".into()));
        let inner_out = g.add_port(inner, PortSpec::output("out", 1)).unwrap();

        let snk = g.add_actor("snk", Some("printer".into()));
        let snk_in = g.add_port(snk, PortSpec::input("in", 1)).unwrap();

        let inner_rel = g.add_relation_in("inner", Some(sub));
        g.link(inner, inner_out, inner_rel).unwrap();
        g.link(sub, sub_out, inner_rel).unwrap();

        let outer_rel = g.add_relation("outer");
        g.link(sub, sub_out, outer_rel).unwrap();
        g.link(snk, snk_in, outer_rel).unwrap();

        let result = resolve_links(&g).unwrap();
        assert_eq!(result.table.links.len(), 1);
        let l = result.table.links[0];
        assert_eq!(l.source_actor, inner);
        assert_eq!(l.dest_actor, snk);
        assert_eq!(l.dest_port, snk_in);
    }

    #[test]
    fn multiport_fan_out_keeps_declaration_order() {
        let mut g = Graph::new("fanout");
        let src = g.add_actor("src", Some("dist".into()));
        let p = g
            .add_port(src, PortSpec::output("out", 1).multiport())
            .unwrap();
        let a = g.add_actor("a", Some("printer".into()));
        let a_in = g.add_port(a, PortSpec::input("in", 1)).unwrap();
        let b = g.add_actor("b", Some("printer".into()));
        let b_in = g.add_port(b, PortSpec::input("in", 1)).unwrap();

        let r1 = g.add_relation("r1");
        let r2 = g.add_relation("r2");
        g.link(src, p, r1).unwrap();
        g.link(src, p, r2).unwrap();
        g.link(a, a_in, r1).unwrap();
        g.link(b, b_in, r2).unwrap();

        let result = resolve_links(&g).unwrap();
        assert_eq!(result.table.links.len(), 2);
        assert_eq!(result.table.links[0].source_channel, 0);
        assert_eq!(result.table.links[0].dest_actor, a);
        assert_eq!(result.table.links[1].source_channel, 1);
        assert_eq!(result.table.links[1].dest_actor, b);
    }

    #[test]
    fn multiport_input_linked_twice_to_one_relation_gets_distinct_channels() {
        let mut g = Graph::new("double");
        let src = g.add_actor("src", Some("ramp".into()));
        let src_out = g.add_port(src, PortSpec::output("out", 1)).unwrap();
        let snk = g.add_actor("snk", Some("printer".into()));
        let snk_in = g
            .add_port(snk, PortSpec::input("in", 1).multiport())
            .unwrap();

        let r = g.add_relation("r0");
        g.link(src, src_out, r).unwrap();
        g.link(snk, snk_in, r).unwrap();
        g.link(snk, snk_in, r).unwrap();

        let result = resolve_links(&g).unwrap();
        assert_eq!(result.table.links.len(), 2);
        let mut channels: Vec<usize> =
            result.table.links.iter().map(|l| l.dest_channel).collect();
        channels.sort();
        assert_eq!(channels, vec![0, 1]);
    }

    #[test]
    fn fan_in_kept_with_warning() {
        let mut g = Graph::new("fanin");
        let a = g.add_actor("a", Some("ramp".into()));
        let a_out = g.add_port(a, PortSpec::output("out", 1)).unwrap();
        let b = g.add_actor("b", Some("ramp".into()));
        let b_out = g.add_port(b, PortSpec::output("out", 1)).unwrap();
        let snk = g.add_actor("snk", Some("printer".into()));
        let snk_in = g.add_port(snk, PortSpec::input("in", 1)).unwrap();

        let r = g.add_relation("shared");
        g.link(a, a_out, r).unwrap();
        g.link(b, b_out, r).unwrap();
        g.link(snk, snk_in, r).unwrap();

        let result = resolve_links(&g).unwrap();
        assert_eq!(result.table.links.len(), 2);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].code, Some(codes::W0200));
    }

    #[test]
    fn inside_source_on_input_boundary_is_an_error() {
        let mut g = Graph::new("bad");
        let sub = g.add_actor("sub", None);
        let sub_in = g.add_port(sub, PortSpec::input("in", 1)).unwrap();
        let inner = g.add_child(sub, "src", Some("ramp".into()));
        let inner_out = g.add_port(inner, PortSpec::output("out", 1)).unwrap();

        let rel = g.add_relation_in("inner", Some(sub));
        g.link(inner, inner_out, rel).unwrap();
        g.link(sub, sub_in, rel).unwrap();

        let err = resolve_links(&g).unwrap_err();
        assert!(matches!(err, SdfError::UnresolvedPortError { .. }));
    }
}
