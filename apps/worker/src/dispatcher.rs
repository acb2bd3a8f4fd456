//! Command table
//!
//! Commands are resolved from the first two arguments of a job
//! (`namespace method`) against a table built once at startup. Nothing is
//! looked up by reflection; an unregistered pair is an `UnknownCommand`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::JobContext;
use crate::error::{WorkerError, WorkerResult};

/// A runnable command
///
/// `args` holds only the parameters, without the namespace and method words.
#[async_trait]
pub trait Command: Send + Sync {
    async fn run(&self, ctx: &mut JobContext, args: &[String]) -> WorkerResult<()>;
}

fn command_key(namespace: &str, method: &str) -> String {
    format!("{}.{}", namespace.trim(), method.trim()).to_lowercase()
}

/// Closed registry of commands
#[derive(Clone, Default)]
pub struct CommandTable {
    commands: BTreeMap<String, Arc<dyn Command>>,
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTable")
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `namespace method`, replacing any previous one
    pub fn register<C>(&mut self, namespace: &str, method: &str, handler: C) -> &mut Self
    where
        C: Command + 'static,
    {
        self.commands
            .insert(command_key(namespace, method), Arc::new(handler));
        self
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<C>(mut self, namespace: &str, method: &str, handler: C) -> Self
    where
        C: Command + 'static,
    {
        self.register(namespace, method, handler);
        self
    }

    /// Find the command named by the first two arguments
    pub fn resolve(&self, args: &[String]) -> WorkerResult<Arc<dyn Command>> {
        let [namespace, method, ..] = args else {
            return Err(WorkerError::InvalidArgs(
                "expected a namespace and a method name".to_string(),
            ));
        };
        self.commands
            .get(&command_key(namespace, method))
            .cloned()
            .ok_or_else(|| WorkerError::UnknownCommand(format!("{} {}", namespace, method)))
    }

    pub fn contains(&self, args: &[String]) -> bool {
        self.resolve(args).is_ok()
    }

    /// Resolve and run a command inside `ctx`
    pub async fn dispatch(&self, ctx: &mut JobContext, args: &[String]) -> WorkerResult<()> {
        let command = self.resolve(args)?;
        command.run(ctx, &args[2..]).await
    }

    /// Registered command keys, sorted
    pub fn names(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    #[async_trait]
    impl Command for Nothing {
        async fn run(&self, _ctx: &mut JobContext, _args: &[String]) -> WorkerResult<()> {
            Ok(())
        }
    }

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let table = CommandTable::new().with("Library", "noop", Nothing);
        assert!(table.contains(&args(&["Library", "noop"])));
        assert!(table.contains(&args(&["library", "NOOP", "extra"])));
        assert_eq!(table.names(), vec!["library.noop"]);
    }

    #[test]
    fn test_unknown_command() {
        let table = CommandTable::new().with("Library", "noop", Nothing);
        let err = table.resolve(&args(&["Library", "explode"])).err().unwrap();
        assert!(matches!(err, WorkerError::UnknownCommand(ref name) if name == "Library explode"));
    }

    #[test]
    fn test_too_few_args() {
        let table = CommandTable::new();
        assert!(matches!(
            table.resolve(&args(&["Library"])),
            Err(WorkerError::InvalidArgs(_))
        ));
        assert!(matches!(table.resolve(&[]), Err(WorkerError::InvalidArgs(_))));
    }
}
