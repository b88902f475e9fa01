//! Protocol engine: the command interpreter and event-coordination loop.
//!
//! The engine consumes from two inputs (driver protocol lines, filesystem
//! events) and produces protocol lines on a single output. Each loop
//! iteration waits for exactly one input and handles it to completion, so
//! the replica registry needs no locking. A reader task feeds driver lines
//! into a channel in parallel; channel closure is the clean end-of-input
//! condition.

use crate::monitor::replica::Replica;
use crate::monitor::watcher::{FsEvent, WatchControl, WatcherError};
use crate::proto::wire::{self, ProtocolError};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Callback invoked when the driver issues DEBUG.
pub type DebugCallback = Box<dyn Fn() + Send>;

/// Fatal engine errors. Every variant unwinds to the binary, which reports
/// it to the driver as an `ERROR` line and exits non-zero.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The driver's first line was not the expected version banner.
    #[error("Bad version handshake: {0:?}")]
    Handshake(String),

    /// A command arrived with the wrong number of arguments.
    #[error("Expected {want} args for {cmd}, but got {got}")]
    BadArity {
        /// The command name.
        cmd: &'static str,
        /// The arity the command requires.
        want: usize,
        /// The arity received.
        got: usize,
    },

    /// The command token is not part of the protocol.
    #[error("Unknown command {0:?}")]
    UnknownCommand(String),

    /// A scoped command arrived outside a START/DONE scope.
    #[error("{0} command issued without active replica")]
    NoActiveReplica(&'static str),

    /// START arrived while another START scope was still open.
    #[error("START command issued with already-active replica")]
    ScopeActive,

    /// The driver named a replica hash that was never registered.
    #[error("Unknown replica {0:?}")]
    UnknownReplica(String),

    /// A symlink could not be read after its watch was installed.
    #[error("Failed to read symlink {}: {source}", .path.display())]
    ReadLink {
        /// The link path.
        path: PathBuf,
        /// The readlink error.
        source: io::Error,
    },

    /// An event matched no replica, which means the registry bookkeeping
    /// is wrong.
    #[error("Filesystem event {} did not match any replica", .0.display())]
    UnmatchedEvent(PathBuf),

    /// The watcher's event channel closed while the engine was running.
    #[error("Event stream closed")]
    EventsClosed,

    /// A protocol line could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A watch operation failed fatally.
    #[error(transparent)]
    Watch(#[from] WatcherError),

    /// Reading the driver's input or writing the reply stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Transient focus between START and DONE.
struct ActiveScope {
    hash: String,
    base_path: PathBuf,
    path: PathBuf,
}

/// The protocol state machine.
///
/// Generic over the watch control surface and the output sink so tests can
/// substitute an in-memory watcher and capture the reply stream.
pub struct Engine<C, W> {
    watcher: C,
    events: mpsc::Receiver<FsEvent>,
    lines: mpsc::Receiver<io::Result<String>>,
    out: W,
    replicas: HashMap<String, Replica>,
    scope: Option<ActiveScope>,
    debug_hook: Option<DebugCallback>,
}

impl<C, W> Engine<C, W>
where
    C: WatchControl,
    W: AsyncWrite + Unpin,
{
    /// Creates an engine over a watch control surface, its event stream,
    /// a channel of driver lines, and the reply sink.
    pub fn new(
        watcher: C,
        events: mpsc::Receiver<FsEvent>,
        lines: mpsc::Receiver<io::Result<String>>,
        out: W,
    ) -> Self {
        Self {
            watcher,
            events,
            lines,
            out,
            replicas: HashMap::new(),
            scope: None,
            debug_hook: None,
        }
    }

    /// Installs the callback run when the driver issues DEBUG.
    pub fn set_debug_hook(&mut self, hook: DebugCallback) {
        self.debug_hook = Some(hook);
    }

    /// Runs the handshake and then the decision loop until end of input or
    /// a fatal error.
    pub async fn run(&mut self) -> Result<(), EngineError> {
        self.send("VERSION", &["1"]).await?;
        // The banner reply is matched literally, before any unescaping.
        match self.lines.recv().await {
            Some(Ok(reply)) if reply == "VERSION 1" => {}
            Some(Ok(reply)) => return Err(EngineError::Handshake(reply)),
            Some(Err(err)) => return Err(err.into()),
            None => return Err(EngineError::Handshake(String::from("end of input"))),
        }

        loop {
            tokio::select! {
                line = self.lines.recv() => match line {
                    Some(Ok(line)) => self.dispatch(&line).await?,
                    Some(Err(err)) => return Err(err.into()),
                    None => return Ok(()),
                },
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await?,
                    None => return Err(EngineError::EventsClosed),
                },
            }
        }
    }

    async fn dispatch(&mut self, line: &str) -> Result<(), EngineError> {
        let (cmd, args) = wire::parse_line(line)?;
        tracing::debug!(%cmd, ?args, "recv command");

        // Every command except WAIT disarms pending waits, so a driver that
        // changed its mind cannot receive a stale CHANGES later.
        if cmd != "WAIT" {
            for replica in self.replicas.values_mut() {
                replica.waiting = false;
            }
        }

        match cmd.as_str() {
            "DEBUG" => {
                expect_args("DEBUG", &args, 0)?;
                if let Some(hook) = &self.debug_hook {
                    hook();
                }
                Ok(())
            }
            "START" => {
                expect_args("START", &args, 3)?;
                self.cmd_start(&args[0], &args[1], &args[2]).await
            }
            "DIR" => {
                expect_args("DIR", &args, 1)?;
                self.cmd_dir().await
            }
            "LINK" => {
                expect_args("LINK", &args, 1)?;
                self.cmd_link(&args[0]).await
            }
            "DONE" => {
                expect_args("DONE", &args, 0)?;
                self.cmd_done()
            }
            "WAIT" => {
                expect_args("WAIT", &args, 1)?;
                self.cmd_wait(&args[0]).await
            }
            "CHANGES" => {
                expect_args("CHANGES", &args, 1)?;
                self.cmd_changes(&args[0]).await
            }
            "RESET" => {
                expect_args("RESET", &args, 1)?;
                self.cmd_reset(&args[0])
            }
            _ => Err(EngineError::UnknownCommand(cmd)),
        }
    }

    /// Begins a per-directory descent, registering and watching the replica
    /// on first sight.
    async fn cmd_start(&mut self, hash: &str, base: &str, path: &str) -> Result<(), EngineError> {
        if self.scope.is_some() {
            return Err(EngineError::ScopeActive);
        }

        let base_path = match self.replicas.get(hash) {
            Some(replica) => replica.base_path.clone(),
            None => {
                let base_path = PathBuf::from(base);
                self.watcher.watch(&base_path)?;
                self.replicas
                    .insert(hash.to_string(), Replica::new(hash, base_path.clone()));
                base_path
            }
        };

        self.scope = Some(ActiveScope {
            hash: hash.to_string(),
            base_path,
            path: PathBuf::from(path),
        });
        self.send("OK", &[]).await
    }

    async fn cmd_dir(&mut self) -> Result<(), EngineError> {
        if self.scope.is_none() {
            return Err(EngineError::NoActiveReplica("DIR"));
        }
        // The replica's watch is recursive and already covers children.
        self.send("OK", &[]).await
    }

    /// Follows a symlink discovered at the active path and maps its real
    /// target back into the replica's namespace.
    ///
    /// The watch is installed on the resolved target, so the `dirs` keys
    /// are exactly the watched paths and RESET can tear them down again.
    async fn cmd_link(&mut self, name: &str) -> Result<(), EngineError> {
        let scope = self
            .scope
            .as_ref()
            .ok_or(EngineError::NoActiveReplica("LINK"))?;
        let rel = scope.path.join(name);
        let abs = scope.base_path.join(&rel);
        let hash = scope.hash.clone();

        let target = match fs::read_link(&abs) {
            Ok(target) => target,
            // The link vanished between the driver's scan and now.
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %abs.display(), "skipping vanished symlink");
                return Ok(());
            }
            Err(source) => return Err(EngineError::ReadLink { path: abs, source }),
        };
        // A relative target is real only relative to the link's parent.
        let target = if target.is_absolute() {
            target
        } else {
            match abs.parent() {
                Some(parent) => parent.join(target),
                None => target,
            }
        };

        match self.watcher.watch(&target) {
            // Broken symlink. The target could appear later, but watching
            // for its creation is more machinery than it is worth, so skip
            // without a reply.
            Err(WatcherError::NotFound { .. }) => {
                tracing::debug!(path = %abs.display(), "skipping broken symlink");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
            Ok(()) => {}
        }

        let replica = self
            .replicas
            .get_mut(&hash)
            .ok_or_else(|| EngineError::UnknownReplica(hash.clone()))?;
        replica.record_link(target, rel);
        self.send("OK", &[]).await
    }

    fn cmd_done(&mut self) -> Result<(), EngineError> {
        if self.scope.take().is_none() {
            return Err(EngineError::NoActiveReplica("DONE"));
        }
        Ok(())
    }

    /// Arms the replica's wait flag, or answers immediately when changes
    /// are already pending.
    async fn cmd_wait(&mut self, hash: &str) -> Result<(), EngineError> {
        let replica = self
            .replicas
            .get_mut(hash)
            .ok_or_else(|| EngineError::UnknownReplica(hash.to_string()))?;
        if replica.changes.is_empty() {
            replica.waiting = true;
            return Ok(());
        }
        self.send("CHANGES", &[hash]).await
    }

    /// Drains the replica's pending changes as one RECURSIVE/DONE
    /// transaction. The trie is cleared only after the last RECURSIVE line
    /// is on the wire.
    async fn cmd_changes(&mut self, hash: &str) -> Result<(), EngineError> {
        let mut pending = Vec::new();
        {
            let replica = self
                .replicas
                .get(hash)
                .ok_or_else(|| EngineError::UnknownReplica(hash.to_string()))?;
            replica.changes.walk(|path| pending.push(path.to_path_buf()));
        }

        for path in &pending {
            let arg = path.to_string_lossy();
            self.send("RECURSIVE", &[arg.as_ref()]).await?;
        }
        if let Some(replica) = self.replicas.get_mut(hash) {
            replica.changes.clear();
        }
        self.send("DONE", &[]).await
    }

    /// Forgets a replica, removing every watch that was installed for it.
    fn cmd_reset(&mut self, hash: &str) -> Result<(), EngineError> {
        let replica = self
            .replicas
            .remove(hash)
            .ok_or_else(|| EngineError::UnknownReplica(hash.to_string()))?;
        // The dirs keys are the paths that were handed to the watcher,
        // including followed link targets.
        for real in replica.dirs.keys() {
            self.watcher.unwatch(real)?;
        }
        Ok(())
    }

    /// Attributes one filesystem event across the registry and notifies
    /// waiting replicas.
    async fn handle_event(&mut self, event: FsEvent) -> Result<(), EngineError> {
        tracing::debug!(path = %event.path.display(), kind = ?event.kind, "recv filesystem event");

        let mut matched = false;
        let mut armed = Vec::new();
        for replica in self.replicas.values_mut() {
            if replica.note_event(&event.path) {
                matched = true;
                if replica.waiting {
                    replica.waiting = false;
                    armed.push(replica.hash.clone());
                }
            }
        }
        if !matched {
            return Err(EngineError::UnmatchedEvent(event.path));
        }

        for hash in armed {
            self.send("CHANGES", &[&hash]).await?;
        }
        Ok(())
    }

    async fn send(&mut self, cmd: &str, args: &[&str]) -> Result<(), EngineError> {
        tracing::debug!(%cmd, ?args, "send command");
        let mut line = wire::format_line(cmd, args);
        line.push('\n');
        self.out.write_all(line.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }
}

fn expect_args(cmd: &'static str, args: &[String], want: usize) -> Result<(), EngineError> {
    if args.len() != want {
        return Err(EngineError::BadArity {
            cmd,
            want,
            got: args.len(),
        });
    }
    Ok(())
}
