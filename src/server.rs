use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aof;
use crate::command::Dispatcher;
use crate::config::Config;
use crate::connection::{Connection, ConnectionError};
use crate::expiry;
use crate::frame::Frame;
use crate::store::Store;

/// Runs the server until `shutdown` resolves or the accept loop fails.
///
/// Startup order: store, AOF worker, dispatcher, optional replay, expiry
/// sampler, accept loop. Must be called from within a `task::LocalSet`;
/// every task shares the reactor thread with the store.
pub async fn run(
    listener: TcpListener,
    config: Config,
    shutdown: impl Future,
) -> anyhow::Result<()> {
    let store = Rc::new(RefCell::new(Store::new()));
    let cancel = CancellationToken::new();

    let (writer, worker) = aof::new(config.aof_path.clone());
    let aof_task = task::spawn_local(worker.run(cancel.child_token()));

    let dispatcher = Rc::new(Dispatcher::new(store.clone(), Some(writer)));
    if config.load_on_start {
        if let Err(cause) = aof::replay(&config.aof_path, &dispatcher).await {
            cancel.cancel();
            let _ = aof_task.await;
            return Err(
                anyhow::Error::new(cause).context("failed to replay the append-only file")
            );
        }
    }

    let sampler_task = task::spawn_local(expiry::run(
        store.clone(),
        config.expiry_interval,
        cancel.child_token(),
    ));

    let mut listener = Listener {
        listener,
        dispatcher,
        buffer_size: config.buffer_size,
        cancel: cancel.clone(),
        connections: Vec::new(),
    };

    let result = tokio::select! {
        result = listener.accept_loop() => result.context("accept loop failed"),
        _ = shutdown => {
            info!("shutdown signal received");
            Ok(())
        }
    };

    // Tear down in reverse: cancel everything, then join with error
    // suppression so one misbehaving task cannot wedge the shutdown.
    cancel.cancel();
    for connection in listener.connections.drain(..) {
        let _ = connection.await;
    }
    let _ = sampler_task.await;
    let _ = aof_task.await;
    info!("server stopped");
    result
}

struct Listener {
    listener: TcpListener,
    dispatcher: Rc<Dispatcher>,
    buffer_size: usize,
    cancel: CancellationToken,
    connections: Vec<JoinHandle<()>>,
}

impl Listener {
    async fn accept_loop(&mut self) -> anyhow::Result<()> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            debug!(%peer, "accepted connection");
            let mut handler = ConnectionHandler {
                connection: Connection::with_buffer_size(socket, self.buffer_size),
                dispatcher: self.dispatcher.clone(),
                cancel: self.cancel.child_token(),
            };
            self.connections.push(task::spawn_local(async move {
                match handler.run().await {
                    Ok(()) => debug!(%peer, "connection closed"),
                    Err(cause) if cause.is_peer_disconnect() => {
                        debug!(%peer, "peer went away");
                    }
                    Err(cause) => warn!(%peer, %cause, "connection closed on error"),
                }
            }));
        }
    }
}

struct ConnectionHandler {
    connection: Connection<TcpStream>,
    dispatcher: Rc<Dispatcher>,
    cancel: CancellationToken,
}

impl ConnectionHandler {
    /// Read, dispatch, reply, strictly in that order per request, until the
    /// peer closes or the server shuts down.
    async fn run(&mut self) -> Result<(), ConnectionError> {
        loop {
            let request = tokio::select! {
                request = self.connection.read_frame() => request?,
                _ = self.cancel.cancelled() => return Ok(()),
            };
            let Some(request) = request else {
                return Ok(());
            };
            let reply = self.dispatcher.dispatch(request);
            if let Frame::Error(message) = &reply {
                debug!(message = %String::from_utf8_lossy(message), "error reply");
            }
            self.connection.write_frame(&reply).await?;
        }
    }
}
