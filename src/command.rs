use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, error};

use crate::aof::AofWriter;
use crate::frame::Frame;
use crate::set_options::{Condition, SetOptions, Ttl};
use crate::store::Store;

/// Uniform handler shape: the store plus the full request argv, command name
/// included.
type Handler = fn(&mut Store, &[Bytes]) -> Result<Frame, CommandError>;

struct CommandSpec {
    run: Handler,
    /// Mutating commands are handed to the AOF writer before they run.
    mutating: bool,
}

#[derive(Debug, Error)]
pub enum CommandError {
    /// Surfaced to the client as a RESP error frame; the connection stays
    /// open.
    #[error("{0}")]
    Client(String),
    /// Server-side failure: logged, answered with a generic error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Routes request frames to command handlers.
///
/// The registry is an explicit table built at construction, keyed by the
/// upper-cased command name.
pub struct Dispatcher {
    table: HashMap<&'static str, CommandSpec>,
    store: Rc<RefCell<Store>>,
    aof: Option<AofWriter>,
}

impl Dispatcher {
    pub fn new(store: Rc<RefCell<Store>>, aof: Option<AofWriter>) -> Self {
        let mut table: HashMap<&'static str, CommandSpec> = HashMap::new();
        let mut register = |name: &'static str, run: Handler, mutating: bool| {
            table.insert(name, CommandSpec { run, mutating });
        };
        register("PING", ping, false);
        register("ECHO", echo, false);
        register("INFO", info, false);
        register("COMMAND", command_stub, false);
        register("DBSIZE", dbsize, false);
        register("EXISTS", exists, false);
        register("GET", get, false);
        register("SET", set, true);
        register("DEL", del, true);
        register("INCR", incr, true);
        register("DECR", decr, true);
        register("LPUSH", lpush, true);
        register("RPUSH", rpush, true);
        register("LRANGE", lrange, false);
        Dispatcher { table, store, aof }
    }

    /// Executes one client request, logging it to the AOF first when it is a
    /// mutating command.
    pub fn dispatch(&self, request: Frame) -> Frame {
        self.apply(request, true)
    }

    /// Replay path: identical semantics with the AOF hook disabled, so a
    /// replayed log is not appended to itself.
    pub fn replay(&self, request: Frame) -> Frame {
        self.apply(request, false)
    }

    fn apply(&self, request: Frame, log_mutations: bool) -> Frame {
        let argv = match request_argv(&request) {
            Ok(argv) => argv,
            Err(message) => return Frame::error(message),
        };
        let name = String::from_utf8_lossy(&argv[0]).to_ascii_uppercase();
        let Some(spec) = self.table.get(name.as_str()) else {
            return Frame::error(format!("ERR command `{name}` not found"));
        };
        if spec.mutating && log_mutations {
            if let Some(aof) = &self.aof {
                aof.log(&request);
            }
        }
        let mut store = self.store.borrow_mut();
        match (spec.run)(&mut store, &argv) {
            Ok(reply) => reply,
            Err(CommandError::Client(message)) => {
                debug!(command = %name, %message, "rejected request");
                Frame::error(message)
            }
            Err(CommandError::Internal(cause)) => {
                error!(command = %name, %cause, "handler failed");
                Frame::error("Server error")
            }
        }
    }
}

/// A request must arrive as an array of bulk strings naming the command
/// first; everything else is protocol misuse worth a client error.
fn request_argv(request: &Frame) -> Result<Vec<Bytes>, &'static str> {
    let Frame::Array(items) = request else {
        return Err("ERR request must be an array of bulk strings");
    };
    let mut argv = Vec::with_capacity(items.len());
    for item in items {
        match item.as_bulk() {
            Some(payload) => argv.push(payload.clone()),
            None => return Err("ERR request must be an array of bulk strings"),
        }
    }
    if argv.is_empty() {
        return Err("ERR empty request");
    }
    Ok(argv)
}

fn exact_arity(argv: &[Bytes], expected: usize, name: &str) -> Result<(), CommandError> {
    if argv.len() != expected {
        return Err(wrong_arity(name));
    }
    Ok(())
}

fn min_arity(argv: &[Bytes], expected: usize, name: &str) -> Result<(), CommandError> {
    if argv.len() < expected {
        return Err(wrong_arity(name));
    }
    Ok(())
}

fn wrong_arity(name: &str) -> CommandError {
    CommandError::Client(format!("ERR wrong number of arguments for `{name}` command"))
}

fn client_error(message: impl Into<String>) -> CommandError {
    CommandError::Client(message.into())
}

fn ping(_: &mut Store, argv: &[Bytes]) -> Result<Frame, CommandError> {
    exact_arity(argv, 1, "ping")?;
    Ok(Frame::simple("PONG"))
}

fn echo(_: &mut Store, argv: &[Bytes]) -> Result<Frame, CommandError> {
    exact_arity(argv, 2, "echo")?;
    Ok(Frame::Bulk(argv[1].clone()))
}

fn info(_: &mut Store, argv: &[Bytes]) -> Result<Frame, CommandError> {
    exact_arity(argv, 1, "info")?;
    Ok(Frame::simple("Running"))
}

fn command_stub(_: &mut Store, _argv: &[Bytes]) -> Result<Frame, CommandError> {
    Ok(Frame::simple("Not Implemented"))
}

fn dbsize(store: &mut Store, argv: &[Bytes]) -> Result<Frame, CommandError> {
    exact_arity(argv, 1, "dbsize")?;
    Ok(Frame::Integer(store.len() as i64))
}

fn exists(store: &mut Store, argv: &[Bytes]) -> Result<Frame, CommandError> {
    exact_arity(argv, 2, "exists")?;
    Ok(match store.get(&argv[1]) {
        Some(_) => Frame::simple("OK"),
        None => Frame::NullBulk,
    })
}

fn del(store: &mut Store, argv: &[Bytes]) -> Result<Frame, CommandError> {
    exact_arity(argv, 2, "del")?;
    Ok(if store.delete(&argv[1]) {
        Frame::simple("OK")
    } else {
        Frame::NullBulk
    })
}

fn get(store: &mut Store, argv: &[Bytes]) -> Result<Frame, CommandError> {
    exact_arity(argv, 2, "get")?;
    let Some(record) = store.get(&argv[1]) else {
        return Ok(Frame::NullBulk);
    };
    string_reply(&record.value, &argv[1])
}

/// Stored integers read back as the bulk form of their decimal text; lists
/// are not readable through the string commands.
fn string_reply(value: &Frame, key: &[u8]) -> Result<Frame, CommandError> {
    match value {
        Frame::Bulk(payload) => Ok(Frame::Bulk(payload.clone())),
        Frame::Integer(value) => Ok(Frame::bulk(value.to_string())),
        _ => Err(client_error(format!(
            "ERR value at `{}` is not a string",
            String::from_utf8_lossy(key)
        ))),
    }
}

fn set(store: &mut Store, argv: &[Bytes]) -> Result<Frame, CommandError> {
    min_arity(argv, 3, "set")?;
    let key = argv[1].clone();
    let value = normalize(&argv[2]);
    let options = SetOptions::parse(&argv[3..])
        .map_err(|cause| client_error(format!("Invalid SET arguments: {cause}")))?;

    let old = store.get(&key).cloned();
    match options.condition {
        Some(Condition::Nx) if old.is_some() => {
            return Err(client_error(format!(
                "ERR key `{}` already exists and NX sent",
                String::from_utf8_lossy(&key)
            )));
        }
        Some(Condition::Xx) if old.is_none() => {
            return Err(client_error(format!(
                "ERR key `{}` does not exist and XX sent",
                String::from_utf8_lossy(&key)
            )));
        }
        _ => {}
    }

    let expiry = match options.ttl {
        Ttl::Discard => None,
        Ttl::Keep => old.as_ref().and_then(|record| record.expiry),
        Ttl::ExpireAt(at) => Some(at),
    };
    store.set(key.clone(), value, expiry);

    if options.get_old {
        return match old {
            None => Ok(Frame::NullBulk),
            Some(record) => string_reply(&record.value, &key),
        };
    }
    Ok(Frame::simple("OK"))
}

/// SET stores decimal text as an integer so INCR and DECR work on values
/// that arrived as strings.
fn normalize(raw: &Bytes) -> Frame {
    match std::str::from_utf8(raw).ok().and_then(|text| text.parse().ok()) {
        Some(value) => Frame::Integer(value),
        None => Frame::Bulk(raw.clone()),
    }
}

fn incr(store: &mut Store, argv: &[Bytes]) -> Result<Frame, CommandError> {
    exact_arity(argv, 2, "incr")?;
    adjust(store, &argv[1], 1)
}

fn decr(store: &mut Store, argv: &[Bytes]) -> Result<Frame, CommandError> {
    exact_arity(argv, 2, "decr")?;
    adjust(store, &argv[1], -1)
}

fn adjust(store: &mut Store, key: &Bytes, delta: i64) -> Result<Frame, CommandError> {
    let (current, expiry) = match store.get(key) {
        Some(record) => match record.value {
            Frame::Integer(value) => (value, record.expiry),
            _ => return Ok(Frame::NullBulk),
        },
        None => return Ok(Frame::NullBulk),
    };
    let Some(next) = current.checked_add(delta) else {
        return Err(client_error("ERR increment or decrement would overflow"));
    };
    store.set(key.clone(), Frame::Integer(next), expiry);
    Ok(Frame::Integer(next))
}

fn lpush(store: &mut Store, argv: &[Bytes]) -> Result<Frame, CommandError> {
    min_arity(argv, 3, "lpush")?;
    push(store, argv, true)
}

fn rpush(store: &mut Store, argv: &[Bytes]) -> Result<Frame, CommandError> {
    min_arity(argv, 3, "rpush")?;
    push(store, argv, false)
}

fn push(store: &mut Store, argv: &[Bytes], front: bool) -> Result<Frame, CommandError> {
    let key = &argv[1];
    let values = argv[2..].iter().map(|raw| Frame::Bulk(raw.clone()));
    if let Some(record) = store.get_mut(key) {
        let Frame::Array(list) = &mut record.value else {
            return Err(client_error(format!(
                "ERR value at `{}` is not a list",
                String::from_utf8_lossy(key)
            )));
        };
        for value in values {
            if front {
                list.insert(0, value);
            } else {
                list.push(value);
            }
        }
        return Ok(Frame::Integer(list.len() as i64));
    }
    let mut list = Vec::with_capacity(argv.len() - 2);
    for value in values {
        if front {
            list.insert(0, value);
        } else {
            list.push(value);
        }
    }
    let length = list.len() as i64;
    store.set(key.clone(), Frame::Array(list), None);
    Ok(Frame::Integer(length))
}

fn lrange(store: &mut Store, argv: &[Bytes]) -> Result<Frame, CommandError> {
    exact_arity(argv, 4, "lrange")?;
    let start = range_index(&argv[2])?;
    let stop = range_index(&argv[3])?;
    let Some(record) = store.get(&argv[1]) else {
        return Ok(Frame::NullArray);
    };
    let Frame::Array(list) = &record.value else {
        return Err(client_error(format!(
            "ERR value at `{}` is not a list",
            String::from_utf8_lossy(&argv[1])
        )));
    };
    let len = list.len() as i64;
    // Negative indices count back from the tail; a start that stays negative
    // after the adjustment is out of range in this dialect.
    let start = if start < 0 { start + len } else { start };
    if start < 0 {
        return Ok(Frame::NullArray);
    }
    let stop = if stop < 0 { stop + len } else { stop };
    let stop = stop.min(len - 1);
    if start >= len || start > stop {
        return Ok(Frame::NullArray);
    }
    Ok(Frame::Array(list[start as usize..=stop as usize].to_vec()))
}

fn range_index(raw: &Bytes) -> Result<i64, CommandError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| client_error("ERR start and stop must be integers"))
}
