// SPDX-License-Identifier: AGPL-3.0-or-later

use std::future::Future;

use anyhow::Result;
use log::{error, info};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task;
use tokio::task::JoinHandle;
use triggered::{Listener, Trigger};

/// Sends messages through the communication bus between services.
pub type Sender<T> = broadcast::Sender<T>;

/// Receives shutdown signal for services so they can react accordingly.
pub type Shutdown = JoinHandle<()>;

/// This trait defines a generic async service function receiving a shared
/// context and access to the communication bus and shutdown signal handler.
///
/// It is also using the `async_trait` macro as a trick to avoid a more ugly
/// trait signature as working with generic, static, pinned and boxed async
/// functions can look quite messy.
#[async_trait::async_trait]
pub trait Service<D, M>
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    async fn call(&self, context: D, shutdown: Shutdown, tx: Sender<M>) -> Result<()>;
}

/// Implements our `Service` trait for a generic async function.
#[async_trait::async_trait]
impl<FN, F, D, M> Service<D, M> for FN
where
    // Function accepting a context and our communication channels, returning a future.
    FN: Fn(D, Shutdown, Sender<M>) -> F + Sync,
    // A future
    F: Future<Output = Result<()>> + Send + 'static,
    // Generic context type.
    D: Clone + Send + Sync + 'static,
    // Generic message type for the communication bus.
    M: Clone + Send + Sync + 'static,
{
    async fn call(&self, context: D, shutdown: Shutdown, tx: Sender<M>) -> Result<()> {
        (self)(context, shutdown, tx).await
    }
}

/// Wrapper around `Trigger` which fires as soon as it gets dropped.
///
/// This way a panicking service still announces its exit: the wrapper goes
/// out of scope together with the panicked task.
#[derive(Clone)]
struct ExitSignal(Trigger);

impl ExitSignal {
    /// Fires the signal manually.
    pub fn trigger(&self) {
        self.0.trigger();
    }
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.trigger();
    }
}

/// Service manager for orchestration of the long-running pipeline daemons.
///
/// The manager offers a broadcast bus for cross-service messages and a
/// shutdown signal every service can subscribe to for graceful teardown.
///
/// A stopped service (panic, error or regular return) fires an exit signal
/// which can be awaited via `on_exit`. A stopped daemon usually indicates
/// system failure, the recommended reaction is shutting the node down.
pub struct ServiceManager<D, M>
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    /// Shared, thread-safe context between services.
    context: D,

    /// Sender of our communication bus.
    tx: Sender<M>,

    /// Sender of exit signal.
    ///
    /// The manager catches returned errors or panics from services and fires
    /// the exit signal.
    exit_signal: ExitSignal,

    /// Receiver of exit signal.
    exit_handle: Listener,

    /// Sender of shutdown signal.
    ///
    /// This needs to be a broadcast channel as we keep count of the
    /// subscribers and stop the service manager as soon as all of them have
    /// been dropped.
    shutdown_signal: broadcast::Sender<bool>,
}

impl<D, M> ServiceManager<D, M>
where
    D: Clone + Send + Sync + 'static,
    M: Clone + Send + Sync + 'static,
{
    /// Returns a new instance of a service manager.
    ///
    /// The `capacity` argument defines the maximum bound of messages on the
    /// communication bus which get broadcasted across all services.
    pub fn new(capacity: usize, context: D) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        let (shutdown_signal, _) = broadcast::channel(16);
        let (exit_signal, exit_handle) = triggered::trigger();

        Self {
            context,
            tx,
            exit_signal: ExitSignal(exit_signal),
            exit_handle,
            shutdown_signal,
        }
    }

    /// Adds a new service to the manager and spawns it right away.
    pub fn add<F: Service<D, M> + Send + Sync + Copy + 'static>(
        &mut self,
        name: &'static str,
        service: F,
    ) {
        // Sender for communication bus
        let tx = self.tx.clone();

        // Sender and receiver for shutdown channel
        let shutdown_tx = self.shutdown_signal.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        // Wait for any signal from the shutdown channel
        let signal = task::spawn(async move {
            let _ = shutdown_rx.recv().await;
        });

        // Sender for exit signal
        let exit_signal = self.exit_signal.clone();

        // Reference to shared context
        let context = self.context.clone();

        task::spawn(async move {
            info!("Start {} service", name);

            // Run the service!
            let handle = service.call(context, signal, tx).await;

            // Drop the shutdown sender of this service when we're done, this
            // signals the shutdown process that this service has finally
            // stopped
            drop(shutdown_tx);

            // Handle potential errors which have been returned by the service
            if let Some(err) = handle.err() {
                error!("Error in {} service: {}", name, err);
                exit_signal.trigger();
            }

            // `exit_signal` goes out of scope here. Since `ExitSignal` fires
            // on drop we also announce exits caused by panics or returns.
        });
    }

    /// Future which resolves as soon as a service returned an error, panicked
    /// or stopped.
    pub async fn on_exit(&self) {
        self.exit_handle.clone().await;
    }

    /// Informs all services about graceful shutdown and waits until they all
    /// stopped.
    pub async fn shutdown(self) {
        info!("Received shutdown signal");

        let mut rx = self.shutdown_signal.subscribe();

        // Broadcast graceful shutdown messages to all services
        self.shutdown_signal.send(true).unwrap();

        // We drop our sender first to make sure _all_ senders get eventually
        // closed, because the recv() call otherwise sleeps forever
        drop(self.shutdown_signal);

        // When every sender has gone out of scope, the recv call will return
        // with a `Closed` error. This is our signal that all services have
        // been finally shut down and we are done for good!
        while !matches!(rx.recv().await, Err(RecvError::Closed)) {}
    }
}
