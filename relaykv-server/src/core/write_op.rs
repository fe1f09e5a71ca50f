use super::error::{KvError, Result};
use super::keyspace::Keyspace;
use super::types::now_ms;
use crate::protocol::Command;
use bytes::Bytes;

/// A keyspace mutation decoded from a `SET` or `DEL` command.
///
/// Clients and the replication stream both go through this type, so a
/// replica applies exactly what the master accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set {
        key: Bytes,
        value: Bytes,
        expiry_ms: Option<i64>,
    },
    Del {
        keys: Vec<Bytes>,
    },
}

impl WriteOp {
    pub fn is_write_verb(verb: &str) -> bool {
        matches!(verb, "SET" | "DEL")
    }

    /// Decode a write command. Relative expiries are resolved against the
    /// current clock.
    pub fn from_command(command: &Command) -> Result<Self> {
        match command.verb().as_str() {
            "SET" => Self::parse_set(command),
            "DEL" => {
                if command.args().is_empty() {
                    return Err(KvError::WrongArity("del".to_string()));
                }
                Ok(WriteOp::Del {
                    keys: command.args().to_vec(),
                })
            }
            _ => Err(KvError::UnknownCommand(
                String::from_utf8_lossy(command.parts().first().map_or(&b""[..], |v| &v[..]))
                    .into_owned(),
            )),
        }
    }

    fn parse_set(command: &Command) -> Result<Self> {
        let args = command.args();
        if args.len() < 2 {
            return Err(KvError::WrongArity("set".to_string()));
        }

        let mut expiry_ms = None;
        let mut i = 2;
        while i < args.len() {
            let unit_ms = if command.arg_eq(i, "PX") {
                1
            } else if command.arg_eq(i, "EX") {
                1000
            } else {
                return Err(KvError::Syntax("syntax error".to_string()));
            };
            if expiry_ms.is_some() {
                return Err(KvError::Syntax("syntax error".to_string()));
            }
            let amount = args
                .get(i + 1)
                .ok_or_else(|| KvError::Syntax("syntax error".to_string()))?;
            expiry_ms = Some(resolve_expiry(amount, unit_ms)?);
            i += 2;
        }

        Ok(WriteOp::Set {
            key: args[0].clone(),
            value: args[1].clone(),
            expiry_ms,
        })
    }

    /// Apply to the keyspace. Returns the number of keys written or removed.
    pub fn apply(&self, keyspace: &Keyspace) -> usize {
        match self {
            WriteOp::Set {
                key,
                value,
                expiry_ms,
            } => {
                keyspace.set(key.clone(), value.clone(), *expiry_ms);
                1
            }
            WriteOp::Del { keys } => keys.iter().filter(|key| keyspace.delete(key)).count(),
        }
    }
}

fn resolve_expiry(amount: &[u8], unit_ms: i64) -> Result<i64> {
    let invalid = || KvError::InvalidRequest("invalid expire time in 'set' command".to_string());
    let amount: i64 = std::str::from_utf8(amount)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| KvError::InvalidRequest("value is not an integer or out of range".to_string()))?;
    if amount <= 0 {
        return Err(invalid());
    }
    amount
        .checked_mul(unit_ms)
        .and_then(|ms| ms.checked_add(now_ms()))
        .ok_or_else(invalid)
}
