use super::state::ServerState;
use crate::core::Result;
use crate::protocol::{Command, Frame};
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// What the connection loop does once a handler returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Reply(Frame),
    NoReply,
    /// Reply `+OK` and remember the port a replica announced
    ListeningPort(u16),
    /// Hand the connection over to the master as a replica link. Only
    /// produced on a master; PSYNC on a replica is an error reply.
    FullResync,
}

pub type Handler =
    Box<dyn Fn(Arc<ServerState>, Command) -> BoxFuture<'static, Result<Action>> + Send + Sync>;

/// A registered command
pub struct CommandSpec {
    name: String,
    /// Redis-style arity: positive means exact, negative means at least
    /// `-arity`. Counts the verb itself.
    arity: i32,
    write: bool,
    handler: Handler,
}

impl CommandSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mutates the keyspace and is replicated
    pub fn is_write(&self) -> bool {
        self.write
    }

    pub fn accepts(&self, argc: usize) -> bool {
        let argc = argc as i64;
        let arity = self.arity as i64;
        if arity >= 0 { argc == arity } else { argc >= -arity }
    }

    pub fn call(&self, state: Arc<ServerState>, command: Command) -> BoxFuture<'static, Result<Action>> {
        (self.handler)(state, command)
    }
}

/// Verb → handler map. Built explicitly and handed to the server, so tests
/// can run with a reduced or extended table.
#[derive(Default)]
pub struct CommandTable {
    commands: HashMap<String, CommandSpec>,
}

impl CommandTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command the server implements
    pub fn standard() -> Self {
        let mut table = Self::new();
        super::commands::register_all(&mut table);
        table
    }

    /// Register `handler` under `name` (case-insensitive), replacing any
    /// previous registration.
    pub fn register<F, Fut>(&mut self, name: &str, arity: i32, write: bool, handler: F) -> &mut Self
    where
        F: Fn(Arc<ServerState>, Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Action>> + Send + 'static,
    {
        let name = name.to_ascii_uppercase();
        self.commands.insert(
            name.clone(),
            CommandSpec {
                name,
                arity,
                write,
                handler: Box::new(move |state, command| handler(state, command).boxed()),
            },
        );
        self
    }

    /// Look up an upper-cased verb
    pub fn get(&self, verb: &str) -> Option<&CommandSpec> {
        self.commands.get(verb)
    }

    pub fn contains(&self, verb: &str) -> bool {
        self.commands.contains_key(&verb.to_ascii_uppercase())
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

    async fn noop(_state: Arc<ServerState>, _command: Command) -> Result<Action> {
        Ok(Action::NoReply)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut table = CommandTable::new();
        table.register("echo", 2, false, noop).register("del", -2, true, noop);

        assert_eq!(table.len(), 2);
        assert!(table.contains("ECHO"));
        assert!(table.get("echo").is_none());
        assert!(table.get("DEL").unwrap().is_write());
    }

    #[test]
    fn test_arity() {
        let mut table = CommandTable::new();
        table.register("GET", 2, false, noop).register("SET", -3, true, noop);

        let get = table.get("GET").unwrap();
        assert!(get.accepts(2));
        assert!(!get.accepts(1));
        assert!(!get.accepts(3));

        let set = table.get("SET").unwrap();
        assert!(!set.accepts(2));
        assert!(set.accepts(3));
        assert!(set.accepts(5));
    }

    #[test]
    fn test_standard_table() {
        let table = CommandTable::standard();
        for verb in [
            "PING", "ECHO", "SET", "GET", "DEL", "CONFIG", "KEYS", "INFO", "REPLCONF", "PSYNC",
            "CLIENT",
        ] {
            assert!(table.contains(verb), "missing {}", verb);
        }
        assert!(table.get("SET").unwrap().is_write());
        assert!(table.get("DEL").unwrap().is_write());
        assert!(!table.get("GET").unwrap().is_write());
    }
}
