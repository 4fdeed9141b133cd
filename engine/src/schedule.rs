// schedule.rs — Balance equation solving and static firing order
//
// Solves the SDF balance equations per hierarchy level with exact rational
// propagation, normalizes each connected component to the smallest positive
// integer repetition vector, verifies every relation's balance, and derives
// a deterministic topological firing order (Kahn's algorithm, ties broken
// by ActorId).
//
// Preconditions: the graph passed structural validation; link resolution is
//                not required.
// Postconditions: returns a `ProgramSchedule` whose firing orders fire each
//                 actor of a level exactly once at its full repetition
//                 count; `total_repetitions` folds in enclosing composite
//                 counts for buffer sizing.
// Failure modes: `InconsistentRateError` when the balance equations have no
//                positive integer solution; `SchedulingDeadlockError` when
//                actors remain in a dependency cycle.
// Side effects: none.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::diag::SdfError;
use crate::model::{ActorId, Direction, Graph};
use crate::pass::StageCert;

// ── Public types ─────────────────────────────────────────────────────────

/// One entry of a firing order: fire `actor` `count` times in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Firing {
    pub actor: ActorId,
    pub count: u32,
}

/// Firing order for one hierarchy level.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schedule {
    pub firings: Vec<Firing>,
}

/// Complete schedule for a hierarchical model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSchedule {
    /// Firing order of the top level.
    pub root: Schedule,
    /// Firing order inside each composite actor.
    pub composites: BTreeMap<ActorId, Schedule>,
    /// Repetition count of each actor within its own level.
    pub repetitions: BTreeMap<ActorId, u32>,
    /// Repetition count folded with all enclosing composite counts. This is
    /// the number of firings per complete top-level iteration.
    pub total_repetitions: BTreeMap<ActorId, u32>,
    /// Graph version this schedule was computed against.
    pub version: u64,
}

impl ProgramSchedule {
    /// Human-readable rendering, one firing per line.
    pub fn render(&self, graph: &Graph) -> String {
        let mut out = String::new();
        out.push_str(&format!("schedule for {}\n", graph.name));
        render_level(&mut out, graph, &self.root, self, 1);
        out
    }
}

fn render_level(
    out: &mut String,
    graph: &Graph,
    schedule: &Schedule,
    program: &ProgramSchedule,
    depth: usize,
) {
    for firing in &schedule.firings {
        let indent = "  ".repeat(depth);
        let node = graph.actor(firing.actor);
        out.push_str(&format!("{indent}{} x {}\n", firing.count, node.name));
        if let Some(inner) = program.composites.get(&firing.actor) {
            render_level(out, graph, inner, program, depth + 1);
        }
    }
}

// ── Cached scheduler ─────────────────────────────────────────────────────

/// Schedule cache keyed on graph version. Recomputes only after the graph
/// has been mutated.
#[derive(Debug, Default)]
pub struct Scheduler {
    cached: Option<ProgramSchedule>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, graph: &Graph) -> Result<&ProgramSchedule, SdfError> {
        let fresh = matches!(&self.cached, Some(s) if s.version == graph.version);
        if !fresh {
            self.cached = Some(build_schedule(graph)?);
        }
        match &self.cached {
            Some(s) => Ok(s),
            None => unreachable!(),
        }
    }
}

// ── Schedule construction ────────────────────────────────────────────────

/// Compute the complete static schedule of a hierarchical graph.
pub fn build_schedule(graph: &Graph) -> Result<ProgramSchedule, SdfError> {
    let mut repetitions = BTreeMap::new();
    let mut composites = BTreeMap::new();

    let top: Vec<ActorId> = (0..graph.actors.len() as u32)
        .map(ActorId)
        .filter(|id| graph.actor(*id).parent.is_none())
        .collect();
    let root = schedule_level(graph, None, &top, &mut repetitions)?;

    for id in graph.actors_preorder() {
        let node = graph.actor(id);
        if node.is_composite() && !node.children.is_empty() {
            let inner = schedule_level(graph, Some(id), &node.children, &mut repetitions)?;
            composites.insert(id, inner);
        }
    }

    let mut total_repetitions = BTreeMap::new();
    for id in graph.actors_preorder() {
        let own = repetitions.get(&id).copied().unwrap_or(1);
        let enclosing = graph
            .actor(id)
            .parent
            .and_then(|p| total_repetitions.get(&p).copied())
            .unwrap_or(1);
        total_repetitions.insert(id, own * enclosing);
    }

    Ok(ProgramSchedule {
        root,
        composites,
        repetitions,
        total_repetitions,
        version: graph.version,
    })
}

/// One directed rate constraint between two actors of the same level.
struct EdgeRate {
    src: ActorId,
    dst: ActorId,
    /// Tokens produced per source firing on this channel.
    p: u32,
    /// Tokens consumed per destination firing on this channel.
    c: u32,
    relation: String,
}

fn schedule_level(
    graph: &Graph,
    container: Option<ActorId>,
    members: &[ActorId],
    repetitions: &mut BTreeMap<ActorId, u32>,
) -> Result<Schedule, SdfError> {
    let edges = level_edges(graph, container, members);
    let rv = solve_level_balance(graph, members, &edges)?;
    if let Some(boundary) = container {
        verify_boundary_rates(graph, boundary, &rv)?;
    }
    let firings = sort_level(graph, members, &edges, &rv)?;
    for (&id, &count) in &rv {
        repetitions.insert(id, count);
    }
    Ok(Schedule { firings })
}

/// Derive the rate constraints visible at one hierarchy level. Boundary
/// endpoints of the enclosing composite carry no constraint here; the
/// parent level accounts for them through the composite's declared port
/// rates.
fn level_edges(graph: &Graph, container: Option<ActorId>, members: &[ActorId]) -> Vec<EdgeRate> {
    let member_set: HashSet<ActorId> = members.iter().copied().collect();
    let mut edges = Vec::new();
    for rel in &graph.relations {
        if rel.container != container {
            continue;
        }
        for w in &rel.endpoints {
            if !member_set.contains(&w.actor) {
                continue;
            }
            let wp = &graph.actor(w.actor).ports[w.port];
            if wp.direction != Direction::Output {
                continue;
            }
            for r in &rel.endpoints {
                if !member_set.contains(&r.actor) {
                    continue;
                }
                let rp = &graph.actor(r.actor).ports[r.port];
                if rp.direction != Direction::Input {
                    continue;
                }
                edges.push(EdgeRate {
                    src: w.actor,
                    dst: r.actor,
                    p: wp.rate,
                    c: rp.rate,
                    relation: rel.name.clone(),
                });
            }
        }
    }
    edges
}

/// A composite fires as one unit: per firing, each boundary channel moves
/// exactly the port's declared rate. The inner solution must match that
/// declaration, or the outer level would schedule against a rate the
/// inside cannot honor.
fn verify_boundary_rates(
    graph: &Graph,
    container: ActorId,
    rv: &BTreeMap<ActorId, u32>,
) -> Result<(), SdfError> {
    for rel in &graph.relations {
        if rel.container != Some(container) {
            continue;
        }
        let Some(boundary) = rel.endpoints.iter().find(|e| e.actor == container) else {
            continue;
        };
        let bp = &graph.actor(container).ports[boundary.port];
        for inner in &rel.endpoints {
            if inner.actor == container {
                continue;
            }
            let ip = &graph.actor(inner.actor).ports[inner.port];
            // An input boundary feeds inner inputs; inner outputs feed an
            // output boundary. Opposite-direction endpoints on the same
            // relation are level-internal traffic, checked by level_edges.
            if ip.direction != bp.direction {
                continue;
            }
            let moved = rv.get(&inner.actor).copied().unwrap_or(1) as u64 * ip.rate as u64;
            if moved != bp.rate as u64 {
                return Err(SdfError::InconsistentRateError {
                    relation: rel.name.clone(),
                    detail: format!(
                        "boundary port '{}.{}' declares rate {} but '{}' moves {} token(s) per firing",
                        graph.actor_path(container),
                        bp.name,
                        bp.rate,
                        graph.actor_path(inner.actor),
                        moved
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Solve the balance equations of one level. Ratios propagate exactly as
/// reduced u64 fractions; each connected component is normalized
/// independently to the smallest positive integers.
fn solve_level_balance(
    graph: &Graph,
    members: &[ActorId],
    edges: &[EdgeRate],
) -> Result<BTreeMap<ActorId, u32>, SdfError> {
    let mut adjacency: HashMap<ActorId, Vec<usize>> = HashMap::new();
    for id in members {
        adjacency.entry(*id).or_default();
    }
    for (idx, e) in edges.iter().enumerate() {
        adjacency.entry(e.src).or_default().push(idx);
        adjacency.entry(e.dst).or_default().push(idx);
    }

    let mut rv: BTreeMap<ActorId, u32> = BTreeMap::new();
    let mut assigned: HashSet<ActorId> = HashSet::new();

    for &seed in members {
        if assigned.contains(&seed) {
            continue;
        }
        // BFS over one connected component from a reference actor.
        let mut ratios: HashMap<ActorId, (u64, u64)> = HashMap::new();
        ratios.insert(seed, (1, 1));
        let mut queue = VecDeque::from([seed]);
        while let Some(current) = queue.pop_front() {
            let (num, den) = ratios[&current];
            for &idx in &adjacency[&current] {
                let e = &edges[idx];
                let (neighbor, next) = if e.src == current {
                    (e.dst, reduce_ratio(num * e.p as u64, den * e.c as u64))
                } else {
                    (e.src, reduce_ratio(num * e.c as u64, den * e.p as u64))
                };
                if !ratios.contains_key(&neighbor) {
                    ratios.insert(neighbor, next);
                    queue.push_back(neighbor);
                }
            }
        }
        for (id, count) in normalize_component(&ratios) {
            assigned.insert(id);
            rv.insert(id, count);
        }
    }

    verify_level_balance(graph, edges, &rv)?;
    Ok(rv)
}

/// Check every edge constraint against the computed integer solution. When
/// propagation visited a cycle, an inconsistent rate assignment surfaces
/// here rather than during BFS.
fn verify_level_balance(
    graph: &Graph,
    edges: &[EdgeRate],
    rv: &BTreeMap<ActorId, u32>,
) -> Result<(), SdfError> {
    for e in edges {
        let produced = rv.get(&e.src).copied().unwrap_or(1) as u64 * e.p as u64;
        let consumed = rv.get(&e.dst).copied().unwrap_or(1) as u64 * e.c as u64;
        if produced != consumed {
            return Err(SdfError::InconsistentRateError {
                relation: e.relation.clone(),
                detail: format!(
                    "'{}' produces {} token(s) per iteration but '{}' consumes {}",
                    graph.actor_path(e.src),
                    produced,
                    graph.actor_path(e.dst),
                    consumed
                ),
            });
        }
    }
    Ok(())
}

/// Topological firing order of one level. Each actor appears once with its
/// full repetition count; any remainder after Kahn's algorithm is a
/// dependency cycle with no initial tokens.
fn sort_level(
    graph: &Graph,
    members: &[ActorId],
    edges: &[EdgeRate],
    rv: &BTreeMap<ActorId, u32>,
) -> Result<Vec<Firing>, SdfError> {
    let mut in_degree: BTreeMap<ActorId, u32> = members.iter().map(|id| (*id, 0)).collect();
    let mut adj: BTreeMap<ActorId, Vec<ActorId>> = BTreeMap::new();
    let mut seen: HashSet<(ActorId, ActorId)> = HashSet::new();
    for e in edges {
        if e.src == e.dst {
            // A tokenless self-loop can never fire; the actor surfaces in
            // the stuck remainder below.
            *in_degree.entry(e.dst).or_insert(0) += 1;
            continue;
        }
        if !seen.insert((e.src, e.dst)) {
            continue;
        }
        *in_degree.entry(e.dst).or_insert(0) += 1;
        adj.entry(e.src).or_default().push(e.dst);
    }

    let mut queue: Vec<ActorId> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    queue.sort();
    let mut queue: VecDeque<ActorId> = queue.into_iter().collect();

    let mut firings = Vec::with_capacity(members.len());
    while let Some(id) = queue.pop_front() {
        firings.push(Firing {
            actor: id,
            count: rv.get(&id).copied().unwrap_or(1),
        });
        if let Some(neighbors) = adj.get(&id) {
            let mut sorted = neighbors.clone();
            sorted.sort();
            for next in sorted {
                if let Some(deg) = in_degree.get_mut(&next) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }
    }

    if firings.len() < members.len() {
        let fired: HashSet<ActorId> = firings.iter().map(|f| f.actor).collect();
        let mut stuck: Vec<String> = members
            .iter()
            .filter(|id| !fired.contains(id))
            .map(|id| graph.actor_path(*id))
            .collect();
        stuck.sort();
        return Err(SdfError::SchedulingDeadlockError { actors: stuck });
    }
    Ok(firings)
}

// ── Rational helpers ─────────────────────────────────────────────────────

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        0
    } else {
        a / gcd(a, b) * b
    }
}

fn reduce_ratio(num: u64, den: u64) -> (u64, u64) {
    let g = gcd(num, den);
    (num / g, den / g)
}

/// Scale one component's rational solution to the smallest positive
/// integers: multiply by the lcm of denominators, then divide by the gcd
/// of the results.
fn normalize_component(ratios: &HashMap<ActorId, (u64, u64)>) -> BTreeMap<ActorId, u32> {
    let lcm_den = ratios.values().fold(1u64, |acc, &(_, d)| lcm(acc, d));
    let mut rv: BTreeMap<ActorId, u64> = ratios
        .iter()
        .map(|(&id, &(num, den))| (id, num * (lcm_den / den)))
        .collect();
    let g = rv.values().copied().fold(0u64, gcd);
    if g > 1 {
        for val in rv.values_mut() {
            *val /= g;
        }
    }
    rv.into_iter().map(|(id, v)| (id, v as u32)).collect()
}

// ── Verification ─────────────────────────────────────────────────────────

/// Machine-checkable evidence for schedule postconditions.
#[derive(Debug, Clone)]
pub struct ScheduleCert {
    /// Every actor appears exactly once in its level's firing order.
    pub all_actors_fired: bool,
    /// Every relation's token balance holds over one iteration.
    pub balance_holds: bool,
    /// Every composite boundary channel moves its declared rate per firing.
    pub boundary_rates_hold: bool,
}

impl StageCert for ScheduleCert {
    fn all_pass(&self) -> bool {
        self.all_actors_fired && self.balance_holds && self.boundary_rates_hold
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("all_actors_fired", self.all_actors_fired),
            ("balance_holds", self.balance_holds),
            ("boundary_rates_hold", self.boundary_rates_hold),
        ]
    }
}

/// Verify schedule postconditions against the graph it was computed for.
pub fn verify_schedule(graph: &Graph, schedule: &ProgramSchedule) -> ScheduleCert {
    let mut fired: HashMap<ActorId, u32> = HashMap::new();
    for f in &schedule.root.firings {
        *fired.entry(f.actor).or_default() += 1;
    }
    for inner in schedule.composites.values() {
        for f in &inner.firings {
            *fired.entry(f.actor).or_default() += 1;
        }
    }
    let all_actors_fired = (0..graph.actors.len() as u32)
        .map(ActorId)
        .all(|id| fired.get(&id).copied().unwrap_or(0) == 1);

    let mut balance_holds = true;
    for rel in &graph.relations {
        let edges = level_edges(
            graph,
            rel.container,
            &match rel.container {
                Some(c) => graph.actor(c).children.clone(),
                None => (0..graph.actors.len() as u32)
                    .map(ActorId)
                    .filter(|id| graph.actor(*id).parent.is_none())
                    .collect(),
            },
        );
        for e in edges.iter().filter(|e| e.relation == rel.name) {
            let p = schedule.repetitions.get(&e.src).copied().unwrap_or(1) as u64 * e.p as u64;
            let c = schedule.repetitions.get(&e.dst).copied().unwrap_or(1) as u64 * e.c as u64;
            if p != c {
                balance_holds = false;
            }
        }
    }

    let boundary_rates_hold = (0..graph.actors.len() as u32)
        .map(ActorId)
        .filter(|id| graph.actor(*id).is_composite())
        .all(|id| verify_boundary_rates(graph, id, &schedule.repetitions).is_ok());

    ScheduleCert {
        all_actors_fired,
        balance_holds,
        boundary_rates_hold,
    }
}
