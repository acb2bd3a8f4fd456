//! Periodic task templates
//!
//! Templates are TOML files named `<name>.toml` in the template directory.
//! A template may pull in others with `load_template`; those are merged
//! first and the template's own keys are laid over them, recursively for
//! nested tables. Loaded templates are cached until [`TemplateStore::reload`].
//!
//! ```toml
//! load_template = ["base"]
//!
//! [periodic.refresh_calendar]
//! command = "Calendar refresh"
//! every = "2 hours"
//! queue = "calendar"
//!
//! [periodic.refresh_calendar.args]
//! days = 30
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use toml::{Table, Value};

use crate::error::{WorkerError, WorkerResult};
use crate::interval::parse_interval;

/// Key listing the templates to merge underneath
pub const LOAD_TEMPLATE_KEY: &str = "load_template";

/// Table holding periodic entries
pub const PERIODIC_KEY: &str = "periodic";

/// One recurring command
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PeriodicEntry {
    /// `Namespace method`, also accepted as `Namespace.method`
    pub command: String,
    /// Interval string, see [`crate::interval`]
    pub every: String,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl PeriodicEntry {
    pub fn interval_secs(&self) -> u64 {
        parse_interval(&self.every)
    }

    /// Argument vector for the command table
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .command
            .split(|c: char| c.is_whitespace() || c == '.')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();

        args.extend(self.args.iter().map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("--{}={}", key, value)
        }));
        args
    }
}

/// Deep merge `overlay` into `base`; overlay wins on conflicts
pub fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn validate_name(name: &str) -> WorkerResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(WorkerError::TemplateNotFound(name.to_string()));
    }
    Ok(())
}

fn parents_of(name: &str, table: &Table) -> WorkerResult<Vec<String>> {
    match table.get(LOAD_TEMPLATE_KEY) {
        None => Ok(Vec::new()),
        Some(Value::String(parent)) => Ok(vec![parent.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    WorkerError::template_parse(name, "load_template entries must be strings")
                })
            })
            .collect(),
        Some(_) => Err(WorkerError::template_parse(
            name,
            "load_template must be a string or a list of strings",
        )),
    }
}

/// Loads, merges and caches templates from one directory
#[derive(Debug)]
pub struct TemplateStore {
    dir: PathBuf,
    cache: DashMap<String, Arc<Table>>,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fully merged template, from cache when possible
    pub fn load(&self, name: &str) -> WorkerResult<Arc<Table>> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(cached.value().clone());
        }
        let table = Arc::new(self.resolve(name, &mut Vec::new())?);
        self.cache.insert(name.to_string(), table.clone());
        Ok(table)
    }

    /// Forget every cached template
    pub fn reload(&self) -> usize {
        let dropped = self.cache.len();
        self.cache.clear();
        tracing::info!(dir = %self.dir.display(), dropped = dropped, "Template cache cleared");
        dropped
    }

    fn read(&self, name: &str) -> WorkerResult<Table> {
        validate_name(name)?;
        let path = self.dir.join(format!("{}.toml", name));
        let raw = std::fs::read_to_string(&path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => WorkerError::TemplateNotFound(name.to_string()),
            _ => WorkerError::Io(err),
        })?;
        raw.parse::<Table>()
            .map_err(|err| WorkerError::template_parse(name, err.to_string()))
    }

    fn resolve(&self, name: &str, stack: &mut Vec<String>) -> WorkerResult<Table> {
        if stack.iter().any(|seen| seen == name) {
            let mut chain = stack.clone();
            chain.push(name.to_string());
            return Err(WorkerError::TemplateCycle(chain.join(" -> ")));
        }

        let mut own = self.read(name)?;
        let parents = parents_of(name, &own)?;
        own.remove(LOAD_TEMPLATE_KEY);

        stack.push(name.to_string());
        let mut merged = Table::new();
        for parent in &parents {
            let parent_table = self.resolve(parent, stack)?;
            merge_tables(&mut merged, parent_table);
        }
        stack.pop();

        merge_tables(&mut merged, own);
        Ok(merged)
    }

    /// Periodic entries declared by a template, keyed by task name
    pub fn periodic_entries(&self, name: &str) -> WorkerResult<BTreeMap<String, PeriodicEntry>> {
        let table = self.load(name)?;
        let Some(periodic) = table.get(PERIODIC_KEY) else {
            return Ok(BTreeMap::new());
        };
        let Value::Table(entries) = periodic else {
            return Err(WorkerError::template_parse(name, "periodic must be a table"));
        };

        entries
            .iter()
            .map(|(task, value)| {
                value
                    .clone()
                    .try_into::<PeriodicEntry>()
                    .map(|entry| (task.clone(), entry))
                    .map_err(|err| {
                        WorkerError::template_parse(name, format!("periodic.{}: {}", task, err))
                    })
            })
            .collect()
    }
}
