// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId. Phase errors are converted to diagnostics so the CLI
// reports them uniformly.
//
// Preconditions: ModelDesc and KindRegistry must be set before calling
//                run_pipeline.
// Postconditions: all artifacts for required passes are populated, or
//                 has_error is set.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete callback after each pass for
//               immediate display.

use std::time::Instant;

use crate::codegen::{codegen, CodegenOptions, GeneratedCode};
use crate::desc::{build, ModelDesc};
use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::model::Graph;
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::registry::KindRegistry;
use crate::resolve::{resolve_links, LinkTable};
use crate::schedule::{build_schedule, verify_schedule, ProgramSchedule};

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub registry: KindRegistry,
    pub desc: ModelDesc,
    pub graph: Option<Graph>,
    pub links: Option<LinkTable>,
    pub schedule: Option<ProgramSchedule>,
    pub generated: Option<GeneratedCode>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(desc: ModelDesc, registry: KindRegistry) -> Self {
        Self {
            registry,
            desc,
            graph: None,
            links: None,
            schedule: None,
            generated: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `model_hash`: SHA-256 of the raw model description text.
/// `registry_fingerprint`: SHA-256 of `KindRegistry::canonical_json()`.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub model_hash: [u8; 32],
    pub registry_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the model hash (64 characters).
    pub fn model_hash_hex(&self) -> String {
        bytes_to_hex(&self.model_hash)
    }

    /// Hex string of the registry fingerprint (64 characters).
    pub fn registry_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.registry_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"model_hash\": \"{}\",\n  \"registry_fingerprint\": \"{}\",\n  \"manifest_schema_version\": 1,\n  \"compiler_version\": \"{}\"\n}}\n",
            self.model_hash_hex(),
            self.registry_fingerprint_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Compute provenance from the model text and the loaded registry.
///
/// The registry fingerprint uses `canonical_json()` (compact JSON, kinds
/// sorted by name) so it is stable across load order.
pub fn compute_provenance(model_text: &str, registry: &KindRegistry) -> Provenance {
    use sha2::{Digest, Sha256};

    let model_hash = {
        let mut hasher = Sha256::new();
        hasher.update(model_text.as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    };

    let registry_fingerprint = {
        let canonical = registry.canonical_json();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    };

    Provenance {
        model_hash,
        registry_fingerprint,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

// ── Helper: per-pass post-processing ───────────────────────────────────────

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Per-pass sequence: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "sdfc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose →
/// error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    codegen_options: &CodegenOptions,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let passes = required_passes(terminal);

    for &pass_id in &passes {
        match pass_id {
            PassId::BuildModel => {
                let t = Instant::now();
                let result = build(&state.desc, &state.registry);
                let elapsed = t.elapsed();
                let diags = match result {
                    Ok(graph) => {
                        state.graph = Some(graph);
                        Vec::new()
                    }
                    Err(e) => vec![e.to_diagnostic()],
                };
                finish_pass(
                    state,
                    PassId::BuildModel,
                    diags,
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::ResolveLinks => {
                let t = Instant::now();
                let result = resolve_links(state.graph.as_ref().unwrap());
                let elapsed = t.elapsed();
                let diags = match result {
                    Ok(resolution) => {
                        state.links = Some(resolution.table);
                        resolution.diagnostics
                    }
                    Err(e) => vec![e.to_diagnostic()],
                };
                finish_pass(
                    state,
                    PassId::ResolveLinks,
                    diags,
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::BuildSchedule => {
                let t = Instant::now();
                let result = build_schedule(state.graph.as_ref().unwrap());
                let elapsed = t.elapsed();
                let mut diags = Vec::new();
                match result {
                    Ok(schedule) => {
                        let cert = verify_schedule(state.graph.as_ref().unwrap(), &schedule);
                        if !cert.all_pass() {
                            let failed: Vec<_> = cert
                                .obligations()
                                .iter()
                                .filter(|(_, ok)| !ok)
                                .map(|(name, _)| *name)
                                .collect();
                            diags.push(
                                Diagnostic::new(
                                    DiagLevel::Error,
                                    format!(
                                        "schedule verification failed: {}",
                                        failed.join(", ")
                                    ),
                                )
                                .with_code(codes::E0500),
                            );
                        }
                        state.schedule = Some(schedule);
                    }
                    Err(e) => diags.push(e.to_diagnostic()),
                }
                finish_pass(
                    state,
                    PassId::BuildSchedule,
                    diags,
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Codegen => {
                let t = Instant::now();
                let result = codegen(
                    state.graph.as_ref().unwrap(),
                    state.links.as_ref().unwrap(),
                    state.schedule.as_ref().unwrap(),
                    &state.registry,
                    codegen_options,
                );
                let elapsed = t.elapsed();
                let diags = match result {
                    Ok(r) => {
                        state.generated = Some(r.generated);
                        r.diagnostics
                    }
                    Err(e) => vec![e.to_diagnostic()],
                };
                finish_pass(
                    state,
                    PassId::Codegen,
                    diags,
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
        }
    }
    Ok(())
}
