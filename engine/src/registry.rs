// registry.rs — Actor kind registry
//
// Loads actor kind definitions from JSON files. Each file declares one or
// more kinds; a kind carries its port signature (names, directions,
// default rates, token types) and the C phase templates substituted at
// code generation.
//
// Preconditions:
//   - Kind files are UTF-8 JSON matching `KindFile`.
// Postconditions:
//   - `lookup` is O(1); `canonical_json` is deterministic across loads of
//     the same set of files in any order.
// Failure modes:
//   - `RegistryError::Io` for unreadable files, `::Parse` for malformed
//     JSON or invalid rates, `::DuplicateKind` when two files declare the
//     same kind name.
// Side effects: reads the filesystem in `load_file`.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

// ── Kind definition ──────────────────────────────────────────────────────

/// Port signature entry of a kind. Rates default to 1 and types to
/// `double`, matching the common case in kind files.
#[derive(Debug, Clone, Deserialize)]
pub struct KindPort {
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

/// C template bodies for each execution phase. Missing phases default to
/// the empty template, which emits nothing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhaseTemplates {
    #[serde(default)]
    pub preinitialize: String,
    #[serde(default)]
    pub initialize: String,
    #[serde(default)]
    pub fire: String,
    #[serde(default)]
    pub postfire: String,
    #[serde(default)]
    pub wrapup: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActorKind {
    pub name: String,
    #[serde(default)]
    pub ports: Vec<KindPort>,
    #[serde(default)]
    pub templates: PhaseTemplates,
}

#[derive(Debug, Deserialize)]
struct KindFile {
    kinds: Vec<ActorKind>,
}

// ── Errors ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum RegistryError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        file: PathBuf,
        message: String,
    },
    DuplicateKind {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Io { path, source } => {
                write!(f, "cannot read kind file '{}': {}", path.display(), source)
            }
            RegistryError::Parse { file, message } => {
                write!(f, "invalid kind file '{}': {}", file.display(), message)
            }
            RegistryError::DuplicateKind { name, first, second } => {
                write!(
                    f,
                    "kind '{}' defined in both '{}' and '{}'",
                    name,
                    first.display(),
                    second.display()
                )
            }
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct KindRegistry {
    kinds: HashMap<String, (ActorKind, PathBuf)>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every kind declared in one JSON file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), RegistryError> {
        let text = fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: KindFile = serde_json::from_str(&text).map_err(|e| RegistryError::Parse {
            file: path.to_path_buf(),
            message: e.to_string(),
        })?;
        for kind in file.kinds {
            for p in &kind.ports {
                if p.rate <= 0 {
                    return Err(RegistryError::Parse {
                        file: path.to_path_buf(),
                        message: format!(
                            "kind '{}' port '{}' declares non-positive rate {}",
                            kind.name, p.name, p.rate
                        ),
                    });
                }
            }
            self.insert_from(kind, path.to_path_buf())?;
        }
        Ok(())
    }

    /// Register a kind directly. Used by tests and embedded defaults.
    pub fn insert(&mut self, kind: ActorKind) -> Result<(), RegistryError> {
        self.insert_from(kind, PathBuf::from("<builtin>"))
    }

    fn insert_from(&mut self, kind: ActorKind, origin: PathBuf) -> Result<(), RegistryError> {
        if let Some((_, first)) = self.kinds.get(&kind.name) {
            return Err(RegistryError::DuplicateKind {
                name: kind.name.clone(),
                first: first.clone(),
                second: origin,
            });
        }
        self.kinds.insert(kind.name.clone(), (kind, origin));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&ActorKind> {
        self.kinds.get(name).map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Deterministic JSON rendering of the registry contents, kinds sorted
    /// by name. Feeds the build fingerprint.
    pub fn canonical_json(&self) -> String {
        let mut names: Vec<&String> = self.kinds.keys().collect();
        names.sort();
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let (kind, _) = &self.kinds[name];
            let ports: Vec<serde_json::Value> = kind
                .ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.name,
                        "input": p.input,
                        "output": p.output,
                        "multiport": p.multiport,
                        "rate": p.rate,
                        "type": p.ty,
                    })
                })
                .collect();
            entries.push(serde_json::json!({
                "name": kind.name,
                "ports": ports,
                "templates": {
                    "preinitialize": kind.templates.preinitialize,
                    "initialize": kind.templates.initialize,
                    "fire": kind.templates.fire,
                    "postfire": kind.templates.postfire,
                    "wrapup": kind.templates.wrapup,
                },
            }));
        }
        serde_json::json!({ "kinds": entries }).to_string()
    }
}
