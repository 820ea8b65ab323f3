//! Legacy importer for annotated action scripts
//!
//! Walks a script tree. Every script `<dir>/<stem>.<ext>` defining a
//! function named `<stem>` becomes the action `<dir>/<stem>`:
//!
//! ```text
//! """Scales every element."""
//! __tags__ = ['geometry']
//!
//! def scale(domain, factor: 'Real=1.0:Scale factor', target: 'Obj[1..*]') -> 'Bool':
//!     ...
//! ```
//!
//! The first parameter is the domain handle. The remaining parameters and the
//! return value are described by annotation strings. The module docstring
//! becomes the description and `__tags__` the tags. Directories holding an
//! `__init__.py` are library packages and are not scanned for actions.
//!
//! Broken scripts and duplicate names are logged and skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::action::{ActionManifest, ActionRegistry, ParamSpec, RegisteredAction, ScriptAction, ScriptRunner};
use crate::annotation::{parse_annotation, AnnotationError};

/// Script file extension scanned by default.
pub const DEFAULT_EXTENSION: &str = "py";

const PACKAGE_MARKER: &str = "__init__.py";

static DOCSTRING: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r#"^\s*(?:#[^\n]*\n\s*)*(?s:"""(.*?)"""|'''(.*?)''')"#));

static TAGS: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"(?m)^__tags__\s*=\s*\[([^\]]*)\]"));

/// Why a script could not be imported.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// Script could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No function named after the file
    #[error("no function {function} defined")]
    NoEntryPoint { function: String },

    /// Parameter list is not closed
    #[error("unterminated parameter list of {function}")]
    Unterminated { function: String },

    /// A parameter or return annotation is malformed
    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    /// Internal pattern failed to compile
    #[error("invalid pattern: {0}")]
    Pattern(String),
}

fn pattern(re: &'static Lazy<Result<Regex, regex::Error>>) -> Result<&'static Regex, ImportError> {
    re.as_ref().map_err(|e| ImportError::Pattern(e.to_string()))
}

/// Outcome of one import run.
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Names of imported actions
    pub imported: Vec<String>,
    /// Scripts skipped, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

/// Scanner for a script tree.
pub struct ScriptImporter {
    root: PathBuf,
    extension: String,
    runner: Arc<dyn ScriptRunner>,
}

impl ScriptImporter {
    /// Importer for `root` running scripts through `runner`.
    pub fn new(root: impl Into<PathBuf>, runner: Arc<dyn ScriptRunner>) -> Self {
        Self {
            root: root.into(),
            extension: DEFAULT_EXTENSION.to_string(),
            runner,
        }
    }

    /// Scan files with `extension` instead of the default.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Action name of a script: its path below the root, without extension,
    /// `/`-separated.
    fn action_name(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?.with_extension("");
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn scripts(&self) -> Vec<PathBuf> {
        let mut scripts: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(target: "modelbus::actions", error = %e, "Unreadable entry in action tree");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str())
            })
            .filter(|path| {
                path.parent()
                    .map(|dir| !dir.join(PACKAGE_MARKER).is_file())
                    .unwrap_or(true)
            })
            .collect();
        scripts.sort();
        scripts
    }

    /// Import every action of the tree into `registry`.
    pub fn import_into(&self, registry: &ActionRegistry) -> ImportReport {
        let mut report = ImportReport::default();
        for path in self.scripts() {
            let (name, function) = match (
                self.action_name(&path),
                path.file_stem().and_then(|s| s.to_str()),
            ) {
                (Some(name), Some(stem)) => (name, stem.to_string()),
                _ => continue,
            };
            let manifest = std::fs::read_to_string(&path)
                .map_err(|source| ImportError::Io {
                    path: path.clone(),
                    source,
                })
                .and_then(|source| parse_script(&name, &function, &source));
            let manifest = match manifest {
                Ok(manifest) => manifest,
                Err(e) => {
                    error!(target: "modelbus::actions", script = %path.display(), error = %e, "Skipped action script");
                    report.skipped.push((path, e.to_string()));
                    continue;
                }
            };
            let action = RegisteredAction {
                manifest,
                entry: Arc::new(ScriptAction::new(path.clone(), function, self.runner.clone())),
                source: Some(path.clone()),
            };
            match registry.insert(action) {
                Ok(()) => {
                    info!(target: "modelbus::actions", action = %name, script = %path.display(), "Imported action");
                    report.imported.push(name);
                }
                Err(e) => report.skipped.push((path, e.to_string())),
            }
        }
        report
    }
}

/// Split a parameter list at top-level commas, respecting quotes and
/// brackets.
fn split_params(list: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut depth = 0usize;
    for c in list.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => params.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    params.push(current);
    params
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Strip one level of quotes from an annotation expression.
fn unquote(expr: &str) -> &str {
    let expr = expr.trim();
    for q in ['\'', '"'] {
        if expr.len() >= 2 && expr.starts_with(q) && expr.ends_with(q) {
            return &expr[1..expr.len() - 1];
        }
    }
    expr
}

/// Index of the parenthesis closing the one just before `from`.
fn closing_paren(source: &str, from: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in source[from..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(from + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Byte index of the first of `targets` outside quotes.
fn find_unquoted(s: &str, targets: &[char]) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c == '\'' || c == '"' {
            quote = Some(c);
        } else if targets.contains(&c) {
            return Some(i);
        }
    }
    None
}

/// Parameter name and annotation of `name: annotation = default`.
fn param_parts(param: &str) -> (&str, Option<&str>) {
    match find_unquoted(param, &[':', '=']) {
        Some(i) if param[i..].starts_with(':') => {
            let rest = &param[i + 1..];
            let annotation = match find_unquoted(rest, &['=']) {
                Some(eq) => &rest[..eq],
                None => rest,
            };
            (param[..i].trim(), Some(unquote(annotation)))
        }
        Some(i) => (param[..i].trim(), None),
        None => (param.trim(), None),
    }
}

/// Build the manifest of action `name` from script `source`, whose entry
/// point is `function`.
pub fn parse_script(name: &str, function: &str, source: &str) -> Result<ActionManifest, ImportError> {
    let def = Regex::new(&format!(r"(?m)^def[ \t]+{}[ \t]*\(", regex::escape(function)))
        .map_err(|e| ImportError::Pattern(e.to_string()))?;
    let open = def
        .find(source)
        .ok_or_else(|| ImportError::NoEntryPoint {
            function: function.to_string(),
        })?
        .end();
    let close = closing_paren(source, open).ok_or_else(|| ImportError::Unterminated {
        function: function.to_string(),
    })?;

    let mut manifest = ActionManifest::new(name);

    let params = split_params(&source[open..close]);
    match params.first().map(|p| param_parts(p)) {
        None => warn!(
            target: "modelbus::actions",
            action = name,
            "Action has no parameters, the first parameter must be the domain"
        ),
        Some((_, Some(annotation))) if annotation != "Domain" => warn!(
            target: "modelbus::actions",
            action = name,
            annotation,
            "First parameter should be the domain"
        ),
        Some(_) => {}
    }
    for param in params.iter().skip(1) {
        let (param_name, annotation) = param_parts(param);
        let spec = match annotation {
            Some(annotation) => parse_annotation(param_name, annotation)?,
            None => {
                debug!(target: "modelbus::actions", action = name, param = param_name, "Unannotated parameter, assuming *");
                ParamSpec::new(param_name, "*")
            }
        };
        manifest.params.push(spec);
    }

    // `-> 'annotation':` after the parameter list
    let header_end = source[close..]
        .find('\n')
        .map(|i| close + i)
        .unwrap_or(source.len());
    let tail = source[close + 1..header_end].trim();
    if let Some(ret) = tail.strip_prefix("->") {
        let ret = unquote(ret.trim().trim_end_matches(':'));
        if !ret.is_empty() {
            manifest.results.push(parse_annotation("return", ret)?);
        }
    }

    if let Some(caps) = pattern(&DOCSTRING)?.captures(source) {
        if let Some(doc) = caps.get(1).or_else(|| caps.get(2)) {
            manifest.description = doc.as_str().trim().to_string();
        }
    }
    if let Some(caps) = pattern(&TAGS)?.captures(source) {
        manifest.tags = split_params(&caps[1])
            .iter()
            .map(|t| unquote(t).to_string())
            .collect();
    }
    Ok(manifest)
}
