use clap::Parser;
use std::path::PathBuf;

use sdfc::codegen::CodegenOptions;
use sdfc::model::Graph;
use sdfc::pass::PassId;
use sdfc::pipeline::{compute_provenance, run_pipeline, CompilationState};
use sdfc::registry::KindRegistry;
use sdfc::resolve::LinkTable;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    C,
    Schedule,
    Links,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "sdfc",
    version,
    about = "Static dataflow compiler — schedules and generates C from JSON model descriptions"
)]
struct Cli {
    /// Input model description (JSON)
    model: PathBuf,

    /// Kind definition file (repeatable)
    #[arg(short = 'k', long = "kinds")]
    kinds: Vec<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::C)]
    emit: EmitStage,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override the model's iteration count
    #[arg(long)]
    iterations: Option<u64>,

    /// Print engine phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("sdfc: model = {}", cli.model.display());
        eprintln!("sdfc: emit  = {:?}", cli.emit);
    }

    // ── Load kind registry ──
    let mut registry = KindRegistry::new();
    for path in &cli.kinds {
        if let Err(e) = registry.load_file(path) {
            eprintln!("sdfc: error: {}", e);
            std::process::exit(2);
        }
    }
    if cli.verbose {
        eprintln!("sdfc: {} kinds registered", registry.len());
    }

    // ── Read and parse the model description ──
    let model_text = match std::fs::read_to_string(&cli.model) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("sdfc: error: {}: {}", cli.model.display(), e);
            std::process::exit(2);
        }
    };
    let desc = match sdfc::desc::ModelDesc::from_json(&model_text) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("sdfc: parse error: {}", e);
            std::process::exit(1);
        }
    };

    let iterations = cli.iterations.unwrap_or(desc.iterations);
    let options = CodegenOptions {
        iterations,
        period: desc.period,
    };
    let terminal = match cli.emit {
        EmitStage::C => PassId::Codegen,
        EmitStage::Schedule => PassId::BuildSchedule,
        EmitStage::Links => PassId::ResolveLinks,
        EmitStage::BuildInfo => PassId::BuildModel,
    };

    let provenance = compute_provenance(&model_text, &registry);
    let mut state = CompilationState::new(desc, registry);
    state.provenance = Some(provenance);

    let result = run_pipeline(&mut state, terminal, &options, cli.verbose, |_, diags| {
        for diag in diags {
            eprintln!("sdfc: {}", diag);
        }
    });
    if result.is_err() {
        std::process::exit(1);
    }

    // ── Render the requested artifact ──
    let rendered = match cli.emit {
        EmitStage::C => state
            .generated
            .map(|g| g.c_source)
            .unwrap_or_default(),
        EmitStage::Schedule => match (&state.schedule, &state.graph) {
            (Some(s), Some(g)) => s.render(g),
            _ => String::new(),
        },
        EmitStage::Links => match (&state.links, &state.graph) {
            (Some(l), Some(g)) => render_links(g, l),
            _ => String::new(),
        },
        EmitStage::BuildInfo => state
            .provenance
            .map(|p| p.to_json())
            .unwrap_or_default(),
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, rendered) {
                eprintln!("sdfc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
            if cli.verbose {
                eprintln!("sdfc: wrote {}", path.display());
            }
        }
        None => print!("{}", rendered),
    }
}

/// One resolved link per line, in table order.
fn render_links(graph: &Graph, table: &LinkTable) -> String {
    let mut out = String::new();
    for l in &table.links {
        out.push_str(&format!(
            "{}[{}] -> {}[{}]\n",
            graph.port_path(l.source_actor, l.source_port),
            l.source_channel,
            graph.port_path(l.dest_actor, l.dest_port),
            l.dest_channel,
        ));
    }
    out
}
