// pass.rs — Pass descriptor module: metadata and dependency resolution
//
// Declares the engine's 4 passes, their dependency edges, and the
// artifacts they produce. The pipeline runner uses this to compute the
// minimal pass subset for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each engine pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    BuildModel,
    ResolveLinks,
    BuildSchedule,
    Codegen,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type in
/// the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Graph,     // model::Graph
    Links,     // resolve::LinkTable
    Schedule,  // schedule::ProgramSchedule
    Generated, // codegen::GeneratedCode
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about an engine pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Describes what invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::BuildModel => PassDescriptor {
            name: "build_model",
            inputs: &[],
            outputs: &[ArtifactId::Graph],
            invalidation_key: "model description + kind registry",
            invariants: "ports validated, hierarchy wired",
        },
        PassId::ResolveLinks => PassDescriptor {
            name: "resolve_links",
            inputs: &[PassId::BuildModel],
            outputs: &[ArtifactId::Links],
            invalidation_key: "graph version",
            invariants: "every link joins two leaf channels",
        },
        PassId::BuildSchedule => PassDescriptor {
            name: "build_schedule",
            inputs: &[PassId::BuildModel],
            outputs: &[ArtifactId::Schedule],
            invalidation_key: "graph version",
            invariants: "balance verified, firing order acyclic",
        },
        PassId::Codegen => PassDescriptor {
            name: "codegen",
            inputs: &[PassId::ResolveLinks, PassId::BuildSchedule],
            outputs: &[ArtifactId::Generated],
            invalidation_key: "graph version + links + schedule + registry",
            invariants: "valid C emitted, deterministic bytes",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All 4 pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 4] = [
    PassId::BuildModel,
    PassId::ResolveLinks,
    PassId::BuildSchedule,
    PassId::Codegen,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable evidence that a pass met its postconditions.
pub trait StageCert {
    /// True if every obligation holds.
    fn all_pass(&self) -> bool;
    /// Named obligations with their outcome.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Tests ──────────────────────────────────────────────────────────────────
