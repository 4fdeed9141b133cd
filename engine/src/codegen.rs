// codegen.rs — C code generation for scheduled dataflow models
//
// Transforms the resolved, scheduled model into a single C translation
// unit. Every leaf output channel owns a statically sized buffer; readers
// keep their own cursor into the writer's buffer. Kind phase templates are
// substituted per actor and wrapped in phase functions; the main function
// drives initialize, the firing loop, and wrapup through a generated
// director struct.
//
// Preconditions: link resolution and scheduling completed without errors
//                against the same graph version.
// Postconditions: returns `CodegenResult` with byte-deterministic C source
//                 for a given (graph, links, schedule, registry, options).
// Failure modes: `UnsupportedTypeError` when a leaf port carries a type
//                with no marshalling entry.
// Side effects: none.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;

use crate::diag::{Diagnostic, SdfError};
use crate::model::{ActorId, Direction, Graph, TokenType};
use crate::registry::KindRegistry;
use crate::resolve::LinkTable;
use crate::schedule::{ProgramSchedule, Schedule};

// ── Public types ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CodegenResult {
    pub generated: GeneratedCode,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub c_source: String,
}

#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// Top-level iterations baked into the director; 0 runs unbounded.
    pub iterations: u64,
    /// Model time advanced per iteration.
    pub period: f64,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            iterations: 1,
            period: 1.0,
        }
    }
}

// ── Type marshalling ─────────────────────────────────────────────────────

struct CMapping {
    c_type: &'static str,
    printf_fmt: &'static str,
}

/// Marshalling entry for a token type, or None when unregistered.
fn c_mapping(ty: TokenType) -> Option<CMapping> {
    match ty {
        TokenType::Int => Some(CMapping {
            c_type: "int",
            printf_fmt: "%d",
        }),
        TokenType::Double => Some(CMapping {
            c_type: "double",
            printf_fmt: "%g",
        }),
        TokenType::Boolean => Some(CMapping {
            c_type: "int",
            printf_fmt: "%d",
        }),
        TokenType::Opaque => None,
    }
}

// ── Public entry point ───────────────────────────────────────────────────

pub fn codegen(
    graph: &Graph,
    links: &LinkTable,
    schedule: &ProgramSchedule,
    registry: &KindRegistry,
    options: &CodegenOptions,
) -> Result<CodegenResult, SdfError> {
    let mut ctx = CodegenCtx::new(graph, links, schedule, registry, options)?;
    ctx.emit_all()?;
    Ok(ctx.build_result())
}

// ── Internal context ─────────────────────────────────────────────────────

/// Receiver coordinates: actor, port index, channel.
type Coord = (ActorId, usize, usize);

struct BufferInfo {
    name: String,
    capacity: u32,
    ty: TokenType,
}

struct CodegenCtx<'a> {
    graph: &'a Graph,
    links: &'a LinkTable,
    schedule: &'a ProgramSchedule,
    registry: &'a KindRegistry,
    options: &'a CodegenOptions,
    /// Unique C symbol per actor, derived from its dotted path.
    symbols: HashMap<ActorId, String>,
    /// Source-owned buffers keyed by output channel coordinates.
    buffers: BTreeMap<Coord, BufferInfo>,
    /// Zero-filled scratch buffers for dangling input channels.
    scratch: BTreeMap<Coord, BufferInfo>,
    out: String,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> CodegenCtx<'a> {
    fn new(
        graph: &'a Graph,
        links: &'a LinkTable,
        schedule: &'a ProgramSchedule,
        registry: &'a KindRegistry,
        options: &'a CodegenOptions,
    ) -> Result<Self, SdfError> {
        check_port_types(graph)?;
        let symbols = assign_symbols(graph);
        let mut ctx = CodegenCtx {
            graph,
            links,
            schedule,
            registry,
            options,
            symbols,
            buffers: BTreeMap::new(),
            scratch: BTreeMap::new(),
            out: String::with_capacity(8192),
            diagnostics: Vec::new(),
        };
        ctx.plan_buffers();
        Ok(ctx)
    }

    fn build_result(self) -> CodegenResult {
        CodegenResult {
            generated: GeneratedCode { c_source: self.out },
            diagnostics: self.diagnostics,
        }
    }

    fn symbol(&self, actor: ActorId) -> &str {
        &self.symbols[&actor]
    }

    fn total_rv(&self, actor: ActorId) -> u32 {
        self.schedule
            .total_repetitions
            .get(&actor)
            .copied()
            .unwrap_or(1)
    }

    /// Per-iteration token count of one channel, which is also its buffer
    /// capacity.
    fn channel_capacity(&self, actor: ActorId, port: usize) -> u32 {
        self.graph.actor(actor).ports[port].rate * self.total_rv(actor)
    }

    /// Size every buffer up front. Output channels own one buffer each; an
    /// unlinked output still gets one so its writes have a destination.
    /// Input channels with no inbound link get a zero scratch buffer.
    fn plan_buffers(&mut self) {
        for actor in self.graph.leaves_preorder() {
            let sym = self.symbol(actor).to_string();
            for (port_idx, port) in self.graph.actor(actor).ports.iter().enumerate() {
                let channels = port.linked.len().max(1);
                for ch in 0..channels {
                    let info = BufferInfo {
                        name: format!("{}_{}_{}", sym, port.name, ch),
                        capacity: self.channel_capacity(actor, port_idx),
                        ty: port.ty,
                    };
                    match port.direction {
                        Direction::Output => {
                            self.buffers.insert((actor, port_idx, ch), info);
                        }
                        Direction::Input => {
                            if self.links.into_dest(actor, port_idx, ch).is_empty() {
                                self.scratch.insert((actor, port_idx, ch), info);
                            }
                        }
                    }
                }
            }
        }
    }

    /// The buffer an input channel reads from: the first writer's buffer,
    /// or the channel's own zero scratch when dangling.
    fn input_buffer(&self, actor: ActorId, port: usize, ch: usize) -> Option<&BufferInfo> {
        if let Some(link) = self.links.into_dest(actor, port, ch).first() {
            let key = (link.source_actor, link.source_port, link.source_channel);
            if let Some(info) = self.buffers.get(&key) {
                return Some(info);
            }
        }
        self.scratch.get(&(actor, port, ch))
    }

    // ── Emission ────────────────────────────────────────────────────────

    fn emit_all(&mut self) -> Result<(), SdfError> {
        self.emit_header();
        self.emit_director();
        self.emit_buffers();
        self.emit_preinitialize()?;
        self.emit_phase_functions()?;
        self.emit_iteration();
        self.emit_main();
        Ok(())
    }

    fn emit_header(&mut self) {
        let _ = writeln!(self.out, "/* generated by sdfc from model '{}' */", self.graph.name);
        let _ = writeln!(self.out, "#include <stdio.h>");
        let _ = writeln!(self.out);
    }

    fn emit_director(&mut self) {
        let _ = writeln!(self.out, "typedef struct {{");
        let _ = writeln!(self.out, "    long iterations;");
        let _ = writeln!(self.out, "    double period;");
        let _ = writeln!(self.out, "    long iteration;");
        let _ = writeln!(self.out, "    double model_time;");
        let _ = writeln!(self.out, "}} director_t;");
        let _ = writeln!(
            self.out,
            "static director_t director = {{ {}, {:?}, 0, 0.0 }};",
            self.options.iterations, self.options.period
        );
        let _ = writeln!(self.out);
        let _ = writeln!(self.out, "static int director_postfire(void) {{");
        let _ = writeln!(self.out, "    director.iteration++;");
        let _ = writeln!(self.out, "    director.model_time += director.period;");
        let _ = writeln!(
            self.out,
            "    if (director.iterations > 0 && director.iteration >= director.iterations) return 0;"
        );
        let _ = writeln!(self.out, "    return 1;");
        let _ = writeln!(self.out, "}}");
        let _ = writeln!(self.out);
    }

    /// Declare channel buffers and cursors. Each output buffer has a write
    /// cursor; each reading input channel has its own read cursor into the
    /// writer's buffer.
    fn emit_buffers(&mut self) {
        let mut lines = Vec::new();
        for info in self.buffers.values().chain(self.scratch.values()) {
            let c_type = c_mapping(info.ty).map(|m| m.c_type).unwrap_or("double");
            lines.push(format!(
                "static {} {}[{}];",
                c_type, info.name, info.capacity
            ));
        }
        for info in self.buffers.values() {
            lines.push(format!("static int {}_w = 0;", info.name));
        }
        for actor in self.graph.leaves_preorder() {
            let sym = self.symbol(actor).to_string();
            for port in &self.graph.actor(actor).ports {
                if port.direction != Direction::Input {
                    continue;
                }
                let channels = port.linked.len().max(1);
                for ch in 0..channels {
                    lines.push(format!("static int {}_{}_{}_r = 0;", sym, port.name, ch));
                }
            }
        }
        for line in lines {
            let _ = writeln!(self.out, "{}", line);
        }
        let _ = writeln!(self.out);
    }

    /// Preinitialize templates land at file scope so actors can declare
    /// their own state variables.
    fn emit_preinitialize(&mut self) -> Result<(), SdfError> {
        for actor in self.graph.leaves_preorder() {
            let template = self
                .kind_templates(actor)
                .map(|t| t.preinitialize.clone())
                .unwrap_or_default();
            if template.trim().is_empty() {
                continue;
            }
            let body = self.expand_template(actor, &template)?;
            let _ = writeln!(self.out, "/* {} */", self.graph.actor_path(actor));
            let _ = writeln!(self.out, "{}", body.trim_end());
            let _ = writeln!(self.out);
        }
        Ok(())
    }

    fn kind_templates(&self, actor: ActorId) -> Option<&crate::registry::PhaseTemplates> {
        let kind = self.graph.actor(actor).kind.as_deref()?;
        self.registry.lookup(kind).map(|k| &k.templates)
    }

    fn emit_phase_functions(&mut self) -> Result<(), SdfError> {
        for actor in self.graph.leaves_preorder() {
            let sym = self.symbol(actor).to_string();
            for phase in ["initialize", "fire", "postfire", "wrapup"] {
                let template = self
                    .kind_templates(actor)
                    .map(|t| match phase {
                        "initialize" => t.initialize.clone(),
                        "fire" => t.fire.clone(),
                        "postfire" => t.postfire.clone(),
                        _ => t.wrapup.clone(),
                    })
                    .unwrap_or_default();
                // Fire always exists: even an empty body must advance the
                // channel cursors.
                if template.trim().is_empty() && phase != "fire" {
                    continue;
                }
                let body = self.expand_template(actor, &template)?;
                let _ = writeln!(self.out, "static void {}_{}(void) {{", sym, phase);
                for line in body.lines() {
                    if line.trim().is_empty() {
                        let _ = writeln!(self.out);
                    } else {
                        let _ = writeln!(self.out, "    {}", line.trim_end());
                    }
                }
                if phase == "fire" {
                    self.emit_cursor_advances(actor);
                }
                let _ = writeln!(self.out, "}}");
                let _ = writeln!(self.out);
            }
        }
        Ok(())
    }

    /// One firing consumes `rate` tokens per input channel and produces
    /// `rate` per output channel; cursors advance accordingly.
    fn emit_cursor_advances(&mut self, actor: ActorId) {
        let sym = self.symbol(actor).to_string();
        let mut lines = Vec::new();
        for (port_idx, port) in self.graph.actor(actor).ports.iter().enumerate() {
            let channels = port.linked.len().max(1);
            for ch in 0..channels {
                match port.direction {
                    Direction::Output => {
                        let info = &self.buffers[&(actor, port_idx, ch)];
                        lines.push(format!(
                            "{0}_w = ({0}_w + {1}) % {2};",
                            info.name, port.rate, info.capacity
                        ));
                    }
                    Direction::Input => {
                        if let Some(info) = self.input_buffer(actor, port_idx, ch) {
                            lines.push(format!(
                                "{0}_{1}_{2}_r = ({0}_{1}_{2}_r + {3}) % {4};",
                                sym, port.name, ch, port.rate, info.capacity
                            ));
                        }
                    }
                }
            }
        }
        for line in lines {
            let _ = writeln!(self.out, "    {}", line);
        }
    }

    /// One complete top-level iteration in static schedule order. Composite
    /// firings inline their sub-schedule.
    fn emit_iteration(&mut self) {
        let _ = writeln!(self.out, "static void fire_iteration(void) {{");
        let root = self.schedule.root.clone();
        self.emit_schedule_walk(&root, 1);
        let _ = writeln!(self.out, "}}");
        let _ = writeln!(self.out);
    }

    fn emit_schedule_walk(&mut self, schedule: &Schedule, depth: usize) {
        let indent = "    ".repeat(depth);
        for firing in &schedule.firings {
            let node = self.graph.actor(firing.actor);
            let inner = self.schedule.composites.get(&firing.actor).cloned();
            if firing.count > 1 {
                let _ = writeln!(
                    self.out,
                    "{}for (int i{} = 0; i{} < {}; i{}++) {{",
                    indent, depth, depth, firing.count, depth
                );
                self.emit_firing_body(firing.actor, &inner, node.is_composite(), depth + 1);
                let _ = writeln!(self.out, "{}}}", indent);
            } else {
                self.emit_firing_body(firing.actor, &inner, node.is_composite(), depth);
            }
        }
    }

    fn emit_firing_body(
        &mut self,
        actor: ActorId,
        inner: &Option<Schedule>,
        composite: bool,
        depth: usize,
    ) {
        let indent = "    ".repeat(depth);
        if composite {
            if let Some(inner) = inner {
                self.emit_schedule_walk(inner, depth);
            }
        } else {
            let sym = self.symbol(actor).to_string();
            let _ = writeln!(self.out, "{}{}_fire();", indent, sym);
            if self
                .kind_templates(actor)
                .map(|t| !t.postfire.trim().is_empty())
                .unwrap_or(false)
            {
                let _ = writeln!(self.out, "{}{}_postfire();", indent, sym);
            }
        }
    }

    fn emit_main(&mut self) {
        let leaves = self.graph.leaves_preorder();
        let _ = writeln!(self.out, "int main(void) {{");
        for &actor in &leaves {
            if self
                .kind_templates(actor)
                .map(|t| !t.initialize.trim().is_empty())
                .unwrap_or(false)
            {
                let sym = self.symbol(actor).to_string();
                let _ = writeln!(self.out, "    {}_initialize();", sym);
            }
        }
        let _ = writeln!(self.out, "    for (;;) {{");
        let _ = writeln!(self.out, "        fire_iteration();");
        let _ = writeln!(self.out, "        if (!director_postfire()) break;");
        let _ = writeln!(self.out, "    }}");
        for &actor in &leaves {
            if self
                .kind_templates(actor)
                .map(|t| !t.wrapup.trim().is_empty())
                .unwrap_or(false)
            {
                let sym = self.symbol(actor).to_string();
                let _ = writeln!(self.out, "    {}_wrapup();", sym);
            }
        }
        let _ = writeln!(self.out, "    return 0;");
        let _ = writeln!(self.out, "}}");
    }

    // ── Template substitution ───────────────────────────────────────────

    /// Expand `$ref`, `$actorSymbol`, `$param`, and `$print` macros against
    /// one actor. Unknown `$name` text passes through verbatim.
    fn expand_template(&self, actor: ActorId, template: &str) -> Result<String, SdfError> {
        let bytes = template.as_bytes();
        let mut out = String::with_capacity(template.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b'$' {
                let next = template[i..]
                    .find('$')
                    .map(|o| i + o)
                    .unwrap_or(template.len());
                out.push_str(&template[i..next]);
                i = next;
                continue;
            }
            let name_start = i + 1;
            let mut j = name_start;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                j += 1;
            }
            let name = &template[name_start..j];
            let close = extract_balanced(bytes, j, b'(', b')');
            let (args, next) = match close {
                Some(end) => (Some(&template[j + 1..end]), end + 1),
                None => (None, j),
            };
            match (name, args) {
                ("ref", Some(args)) => {
                    out.push_str(&self.expand_ref(actor, args)?);
                    i = next;
                }
                ("actorSymbol", Some(args)) => {
                    out.push_str(&format!("{}_{}", self.symbol(actor), args.trim()));
                    i = next;
                }
                ("param", Some(args)) => {
                    let value = self
                        .graph
                        .actor(actor)
                        .params
                        .get(args.trim())
                        .cloned()
                        .unwrap_or_else(|| "0".to_string());
                    out.push_str(&value);
                    i = next;
                }
                ("print", Some(args)) => {
                    out.push_str(&self.expand_print(actor, args)?);
                    i = next;
                }
                _ => {
                    out.push('$');
                    i = name_start;
                }
            }
        }
        Ok(out)
    }

    /// `$ref(port)`, `$ref(port, off)`, `$ref(port#ch)`, `$ref(port#ch, off)`.
    fn expand_ref(&self, actor: ActorId, args: &str) -> Result<String, SdfError> {
        let parts = split_top_level_commas(args);
        let (port_spec, offset) = match parts.as_slice() {
            [p] => (p.trim(), None),
            [p, off, ..] => (p.trim(), Some(off.trim())),
            [] => (args.trim(), None),
        };
        let (port_name, channel) = match port_spec.split_once('#') {
            Some((name, ch)) => (name, ch.trim().parse::<usize>().unwrap_or(0)),
            None => (port_spec, 0),
        };
        let port_idx = self.graph.find_port(actor, port_name).ok_or_else(|| {
            SdfError::UnresolvedPortError {
                subject: format!("{}.{}", self.graph.actor_path(actor), port_name),
                detail: "template references a port the actor does not declare".to_string(),
            }
        })?;
        let port = &self.graph.actor(actor).ports[port_idx];

        Ok(match port.direction {
            Direction::Output => {
                let info = self.buffers.get(&(actor, port_idx, channel)).ok_or_else(|| {
                    SdfError::UnresolvedPortError {
                        subject: self.graph.port_path(actor, port_idx),
                        detail: format!("channel {} exceeds the port width", channel),
                    }
                })?;
                match offset {
                    Some(off) => format!(
                        "{0}[({0}_w + ({1})) % {2}]",
                        info.name, off, info.capacity
                    ),
                    None => format!("{0}[{0}_w]", info.name),
                }
            }
            Direction::Input => {
                let info = self.input_buffer(actor, port_idx, channel).ok_or_else(|| {
                    SdfError::UnresolvedPortError {
                        subject: self.graph.port_path(actor, port_idx),
                        detail: format!("channel {} exceeds the port width", channel),
                    }
                })?;
                let cursor = format!(
                    "{}_{}_{}_r",
                    self.symbol(actor),
                    port.name,
                    channel
                );
                match offset {
                    Some(off) => format!(
                        "{}[({} + ({})) % {}]",
                        info.name, cursor, off, info.capacity
                    ),
                    None => format!("{}[{}]", info.name, cursor),
                }
            }
        })
    }

    fn expand_print(&self, actor: ActorId, args: &str) -> Result<String, SdfError> {
        let port_name = args.trim().split('#').next().unwrap_or(args.trim());
        let port_idx = self.graph.find_port(actor, port_name).ok_or_else(|| {
            SdfError::UnresolvedPortError {
                subject: format!("{}.{}", self.graph.actor_path(actor), port_name),
                detail: "template references a port the actor does not declare".to_string(),
            }
        })?;
        let ty = self.graph.actor(actor).ports[port_idx].ty;
        let fmt = c_mapping(ty)
            .map(|m| m.printf_fmt)
            .unwrap_or("%g");
        let reference = self.expand_ref(actor, args)?;
        Ok(format!("printf(\"{}\\n\", {})", fmt, reference))
    }
}

// ── Free helpers ─────────────────────────────────────────────────────────

/// Reject any leaf port whose type has no marshalling entry.
fn check_port_types(graph: &Graph) -> Result<(), SdfError> {
    for actor in graph.leaves_preorder() {
        for port in &graph.actor(actor).ports {
            if c_mapping(port.ty).is_none() {
                return Err(SdfError::UnsupportedTypeError {
                    actor: graph.actor_path(actor),
                    port: port.name.clone(),
                    ty: port.ty,
                });
            }
        }
    }
    Ok(())
}

/// Derive a unique C identifier per actor from its dotted path. Collisions
/// after sanitization get a numeric suffix.
fn assign_symbols(graph: &Graph) -> HashMap<ActorId, String> {
    let mut symbols = HashMap::new();
    let mut taken = HashSet::new();
    for actor in graph.actors_preorder() {
        let base: String = graph
            .actor_path(actor)
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let base = if base.starts_with(|c: char| c.is_ascii_digit()) {
            format!("_{base}")
        } else {
            base
        };
        let mut candidate = base.clone();
        let mut n = 1;
        while !taken.insert(candidate.clone()) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        symbols.insert(actor, candidate);
    }
    symbols
}

/// Find the matching close delimiter starting at `start`, which must hold
/// `open`. Returns the index of the close byte.
fn extract_balanced(bytes: &[u8], start: usize, open: u8, close: u8) -> Option<usize> {
    if start >= bytes.len() || bytes[start] != open {
        return None;
    }
    let mut depth = 0;
    let mut i = start;
    while i < bytes.len() {
        if bytes[i] == open {
            depth += 1;
        } else if bytes[i] == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Split by commas at the top level, respecting nested parentheses.
fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, &b) in s.as_bytes().iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}
