//! The module loader.
//!
//! Runs once, before execution, over the program's imports. Host-language
//! modules (`.ts`/`.js`) contribute an exports map obtained from the host;
//! same-language modules (`.vibe`) are recursively parsed and loaded, leaves
//! first. A local name may be imported at most once in the entire transitive
//! closure -- the collision error doubles as cycle detection, because a true
//! cycle forces a re-import of a name already claimed by an earlier path.
//!
//! File access and host-module introspection are pluggable: the engine never
//! touches the filesystem except through [`ModuleSource`].

use std::path::{Component, Path, PathBuf};

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

use crate::{
    ast::{FunctionDecl, Program, StmtKind},
    error::{EngineError, RunResult},
    parser::parse,
    state::{RuntimeState, Status},
    value::Value,
};

/// The two module kinds, distinguished by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleKind {
    /// Native host module (`.ts` / `.js`).
    Host,
    /// Same-language module (`.vibe`).
    Source,
}

/// Where an imported local name came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedName {
    pub source_path: String,
    pub kind: ModuleKind,
}

/// A loaded host-language module: the engine only knows its export names;
/// calls suspend and are fulfilled by the embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostModule {
    pub path: String,
    pub exports: Vec<String>,
}

/// A loaded same-language module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceModule {
    pub path: String,
    /// Exported function declarations, callable like user-defined functions.
    pub functions: AHashMap<String, FunctionDecl>,
    /// Exported variable and model bindings, materialized by running the
    /// module to completion at load time.
    pub values: AHashMap<String, Value>,
}

/// Source text access for `.vibe` modules.
pub trait ModuleSource {
    /// Reads the module source at `path`.
    ///
    /// # Errors
    /// Returns a human-readable message when the module cannot be read.
    fn read(&self, path: &str) -> Result<String, String>;
}

/// Filesystem-backed [`ModuleSource`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FsModuleSource;

impl ModuleSource for FsModuleSource {
    fn read(&self, path: &str) -> Result<String, String> {
        std::fs::read_to_string(path).map_err(|err| err.to_string())
    }
}

/// In-memory [`ModuleSource`] keyed by resolved path, for tests and embedders
/// that manage sources themselves.
#[derive(Debug, Default, Clone)]
pub struct MapModuleSource {
    files: AHashMap<String, String>,
}

impl MapModuleSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, source: impl Into<String>) -> Self {
        self.files.insert(path.into(), source.into());
        self
    }
}

impl ModuleSource for MapModuleSource {
    fn read(&self, path: &str) -> Result<String, String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| format!("no such module '{path}'"))
    }
}

/// Export-name introspection for host-language modules. How the exports map
/// is obtained from the host runtime is the embedder's concern.
pub trait HostModuleLoader {
    /// Enumerates the export names of the host module at `path`.
    ///
    /// # Errors
    /// Returns a human-readable message when the module cannot be loaded.
    fn exports(&self, path: &str) -> Result<Vec<String>, String>;
}

/// A [`HostModuleLoader`] for embeddings without a host runtime: every host
/// import fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHostModules;

impl HostModuleLoader for NoHostModules {
    fn exports(&self, _path: &str) -> Result<Vec<String>, String> {
        Err("host modules are not available in this embedding".to_owned())
    }
}

/// A table-backed [`HostModuleLoader`].
#[derive(Debug, Default, Clone)]
pub struct StaticHostModules {
    modules: AHashMap<String, Vec<String>>,
}

impl StaticHostModules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_module(mut self, path: impl Into<String>, exports: Vec<String>) -> Self {
        self.modules.insert(path.into(), exports);
        self
    }
}

impl HostModuleLoader for StaticHostModules {
    fn exports(&self, path: &str) -> Result<Vec<String>, String> {
        self.modules
            .get(path)
            .cloned()
            .ok_or_else(|| format!("no such host module '{path}'"))
    }
}

/// Resolves the program's imports, populating `ts_modules`, `source_modules`
/// and `imported_names` on the state. Loading happens in dependency order,
/// leaves first; errors are raised synchronously, before execution begins.
///
/// # Errors
/// Returns `ImportError` for collisions, unreadable or unparseable modules,
/// unsupported extensions, missing exports, and modules whose top level
/// requires external interaction.
pub fn load_imports(
    mut state: RuntimeState,
    entry_path: &str,
    source: &dyn ModuleSource,
    host: &dyn HostModuleLoader,
) -> RunResult<RuntimeState> {
    let entry = PathBuf::from(entry_path);
    let base = entry.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    if state.root_dir.is_none() {
        state.root_dir = Some(base.to_string_lossy().into_owned());
    }
    let program = state.program.clone();
    let mut loading = AHashSet::new();
    process_imports(&mut state, &program, &base, source, host, &mut loading)?;
    Ok(state)
}

fn process_imports(
    state: &mut RuntimeState,
    program: &Program,
    base: &Path,
    source: &dyn ModuleSource,
    host: &dyn HostModuleLoader,
    loading: &mut AHashSet<String>,
) -> RunResult<()> {
    for stmt in &program.statements {
        let StmtKind::Import { names, path } = &stmt.kind else {
            continue;
        };
        let resolved = normalize_path(&base.join(path));
        let kind = module_kind(&resolved)
            .ok_or_else(|| EngineError::import(format!("Unsupported module kind for '{resolved}'")).with_loc(stmt.loc))?;
        for name in names {
            if let Some(previous) = state.imported_names.get(name) {
                return Err(EngineError::import(format!(
                    "Import error: '{name}' already imported from '{}'",
                    previous.source_path
                ))
                .with_loc(stmt.loc));
            }
            state.imported_names.insert(
                name.clone(),
                ImportedName {
                    source_path: resolved.clone(),
                    kind,
                },
            );
        }
        match kind {
            ModuleKind::Host => {
                if !state.ts_modules.contains_key(&resolved) {
                    let exports = host
                        .exports(&resolved)
                        .map_err(|err| EngineError::import(format!("Cannot load module '{resolved}': {err}")))?;
                    state.ts_modules.insert(
                        resolved.clone(),
                        HostModule {
                            path: resolved.clone(),
                            exports,
                        },
                    );
                }
                let module = state
                    .ts_modules
                    .get(&resolved)
                    .expect("host module was just ensured loaded");
                for name in names {
                    if !module.exports.iter().any(|e| e == name) {
                        return Err(EngineError::import(format!(
                            "Module '{resolved}' has no export '{name}'"
                        ))
                        .with_loc(stmt.loc));
                    }
                }
            }
            ModuleKind::Source => {
                if !state.source_modules.contains_key(&resolved) && !loading.contains(&resolved) {
                    loading.insert(resolved.clone());
                    let text = source
                        .read(&resolved)
                        .map_err(|err| EngineError::import(format!("Cannot read module '{resolved}': {err}")))?;
                    let module_program = parse(&text, &resolved)?;
                    let module_base = Path::new(&resolved)
                        .parent()
                        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
                    process_imports(state, &module_program, &module_base, source, host, loading)?;
                    let module = materialize_module(state, &resolved, module_program)?;
                    state.source_modules.insert(resolved.clone(), module);
                }
                if let Some(module) = state.source_modules.get(&resolved) {
                    for name in names {
                        if !module.functions.contains_key(name) && !module.values.contains_key(name) {
                            return Err(EngineError::import(format!(
                                "Module '{resolved}' has no export '{name}'"
                            ))
                            .with_loc(stmt.loc));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Materializes a source module by running it to completion with the engine.
/// Exported variables are stored with their runtime value.
fn materialize_module(state: &RuntimeState, path: &str, program: Program) -> RunResult<SourceModule> {
    let mut functions = AHashMap::new();
    let mut exported_values = Vec::new();
    for stmt in &program.statements {
        let StmtKind::Export(inner) = &stmt.kind else {
            continue;
        };
        match &inner.kind {
            StmtKind::Function(decl) => {
                functions.insert(decl.name.clone(), decl.clone());
            }
            StmtKind::Let { name, .. } | StmtKind::Const { name, .. } => {
                exported_values.push(name.clone());
            }
            StmtKind::Model(decl) => exported_values.push(decl.name.clone()),
            _ => {}
        }
    }
    let mut module_state = RuntimeState::new(program, state.options.clone());
    // Dependency order guarantees this module's own imports are already
    // loaded; hand them down so its top level can resolve them.
    module_state.ts_modules = state.ts_modules.clone();
    module_state.source_modules = state.source_modules.clone();
    module_state.imported_names = state.imported_names.clone();
    let finished = module_state.run_until_pause();
    match finished.status {
        Status::Completed => {}
        Status::Error => {
            let message = finished.error.map_or_else(|| "unknown error".to_owned(), |err| err.to_string());
            return Err(EngineError::import(format!("Module '{path}' failed to load: {message}")));
        }
        _ => {
            return Err(EngineError::import(format!(
                "Module '{path}' requires external interaction at load time"
            )));
        }
    }
    let mut values = AHashMap::new();
    let globals = &finished.call_stack[0];
    for name in exported_values {
        if let Some(variable) = globals.locals.get(&name) {
            values.insert(name, variable.value.clone());
        }
    }
    Ok(SourceModule {
        path: path.to_owned(),
        functions,
        values,
    })
}

fn module_kind(path: &str) -> Option<ModuleKind> {
    let extension = Path::new(path).extension()?.to_str()?;
    match extension {
        "ts" | "js" => Some(ModuleKind::Host),
        "vibe" => Some(ModuleKind::Source),
        _ => None,
    }
}

/// Lexically normalizes a path: strips `.` components and folds `..` into
/// their parent. Purely textual; nothing is touched on disk.
fn normalize_path(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut prefix = String::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().into_owned(),
            Component::RootDir => prefix.push('/'),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    parts.push("..".to_owned());
                }
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
        }
    }
    format!("{prefix}{}", parts.join("/"))
}
