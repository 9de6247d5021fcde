/*
    Copyright © 2026, quorum_smr contributors
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica's delivery core.
//!
//! A "replica" in this module is the post-consensus half of a state machine replication node:
//! the threads that take decided batches from the consensus layer, apply them to the
//! application in execution id order, keep the decision log and checkpoints, and transfer state
//! to and from lagging peers. The consensus layer itself is the library user's, plugged in
//! through [Replica::submit_decision] and [Replica::report_ahead].
//!
//! ## Starting a replica
//!
//! Here is an example that demonstrates how to build and start running a replica using the
//! builder pattern:
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .app(app)
//!     .clients_manager(clients_manager)
//!     .network(network)
//!     .configuration(configuration)
//!     .on_deliver_batch(deliver_handler)
//!     .build()
//!     .start()
//! ```
//!
//! ### Required setters
//!
//! The required setters are for providing the trait implementations required to run a replica:
//! - `.app(...)`
//! - `.clients_manager(...)`
//! - `.network(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from
//! [crate::events]:
//! - `.on_deliver_batch(...)`
//! - `.on_deliver_failure(...)`
//! - `.on_checkpoint(...)`
//! - `.on_start_transfer(...)`
//! - `.on_end_transfer(...)`
//! - `.on_abandon_transfer(...)`
//! - `.on_receive_transfer_request(...)`
//! - `.on_send_transfer_reply(...)`
//!
//! The replica's [configuration](Configuration) can also be defined using the builder pattern,
//! for example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(signing_key)
//!     .initial_view(view)
//!     .checkpoint_period(100)
//!     .log_events(true)
//!     .build()
//! ```

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use typed_builder::TypedBuilder;

use crate::app::{App, ClientsManager};
use crate::delivery::log::DecisionLogCamera;
use crate::delivery::{
    DeliveryConfiguration, DeliveryHandle, DeliveryPipeline, DeliveryShutDown,
};
use crate::event_bus::*;
use crate::events::*;
use crate::messages::RequestMessage;
use crate::networking::{
    start_polling, Network, SenderHandle, TransferClientStub, TransferServerStub,
};
use crate::state_transfer::server::start_transfer_server;
use crate::state_transfer::status::SharedStatus;
use crate::state_transfer::{StateTransferConfiguration, StateTransferCoordinator};
use crate::types::basic::{ExecutionId, ReplicaId};
use crate::types::batch::DecidedBatch;
use crate::types::keypair::Keypair;
use crate::types::transfer::TransferableState;
use crate::types::view::View;

/// Stores the user-defined parameters required to start the replica, that is:
/// 1. The replica's [keypair](ed25519_dalek::SigningKey), whose public half is its identity on
///    the network.
/// 2. The initial [View]: the membership and fault threshold the replica starts under.
/// 3. The checkpoint period, i.e., a checkpoint of the application state is taken at every
///    execution id that is a positive multiple of it.
/// 4. The poll intervals of the delivery and state transfer threads: the upper bound on how
///    long each sleeps before re-checking its inputs and its shutdown signal.
/// 5. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Log Events
///
/// This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.initial_view(...)`
    - `.checkpoint_period(...)`

    Optional:
    - `.delivery_poll_interval(...)`
    - `.transfer_poll_interval(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's keypair, used to establish its identity. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the view the replica starts under. Required."))]
    pub initial_view: View,
    #[builder(setter(doc = "Set the checkpoint period: a checkpoint is taken at every execution id that is a positive multiple of this. Required."))]
    pub checkpoint_period: u64,
    #[builder(default = Duration::from_millis(100), setter(doc = "Set the delivery thread's poll interval. Optional."))]
    pub delivery_poll_interval: Duration,
    #[builder(default = Duration::from_millis(100), setter(doc = "Set the state transfer thread's poll interval. Optional."))]
    pub transfer_poll_interval: Duration,
    #[builder(default = false, setter(doc = "Enable logging? Optional, defaults to false."))]
    pub log_events: bool,
}

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.app(...)`
    - `.clients_manager(...)`
    - `.network(...)`
    - `.configuration(...)`

    Optional:
    - `.on_deliver_batch(...)`
    - `.on_deliver_failure(...)`
    - `.on_checkpoint(...)`
    - `.on_start_transfer(...)`
    - `.on_end_transfer(...)`
    - `.on_abandon_transfer(...)`
    - `.on_receive_transfer_request(...)`
    - `.on_send_transfer_reply(...)`
"))]
pub struct ReplicaSpec<A: App, C: ClientsManager, N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the application code to be replicated. The argument must implement the [App](crate::app::App) trait. Required."))]
    app: A,
    #[builder(setter(doc = "Set the front-door bookkeeping hook. The argument must implement the [ClientsManager](crate::app::ClientsManager) trait. Required."))]
    clients_manager: C,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&DeliverBatchEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DeliverBatchEvent>),
    doc = "Register a handler closure to be invoked after a decided batch is applied to the application. Optional."))]
    on_deliver_batch: Option<HandlerPtr<DeliverBatchEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DeliverFailureEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DeliverFailureEvent>),
    doc = "Register a handler closure to be invoked after a batch or request fails to apply. Optional."))]
    on_deliver_failure: Option<HandlerPtr<DeliverFailureEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CheckpointEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CheckpointEvent>),
    doc = "Register a handler closure to be invoked after a checkpoint of the application state is taken. Optional."))]
    on_checkpoint: Option<HandlerPtr<CheckpointEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartTransferEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartTransferEvent>),
    doc = "Register a handler closure to be invoked after the replica concludes it is lagging and requests state from its peers. Optional."))]
    on_start_transfer: Option<HandlerPtr<StartTransferEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndTransferEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndTransferEvent>),
    doc = "Register a handler closure to be invoked after the replica installs a transferred state and resumes delivery. Optional."))]
    on_end_transfer: Option<HandlerPtr<EndTransferEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&AbandonTransferEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AbandonTransferEvent>),
    doc = "Register a handler closure to be invoked after the replica gives up on a state transfer attempt. Optional."))]
    on_abandon_transfer: Option<HandlerPtr<AbandonTransferEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveTransferRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveTransferRequestEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a state transfer request from a peer. Optional."))]
    on_receive_transfer_request: Option<HandlerPtr<ReceiveTransferRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendTransferReplyEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendTransferReplyEvent>),
    doc = "Register a handler closure to be invoked after the replica answers a peer's state transfer request. Optional."))]
    on_send_transfer_reply: Option<HandlerPtr<SendTransferReplyEvent>>,
}

impl<A: App, C: ClientsManager, N: Network + 'static> ReplicaSpec<A, C, N> {
    /// Starts all threads and channels associated with running a replica, and returns the
    /// handles to them in a [Replica] struct.
    pub fn start(mut self) -> Replica {
        let view = self.configuration.initial_view.clone();
        self.network.init_view(&view);

        let me = Keypair::new(self.configuration.me).public();

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, requests, transfer_requests, transfer_replies) =
            start_polling(self.network.clone(), poller_shutdown_receiver);

        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_deliver_batch,
            self.on_deliver_failure,
            self.on_checkpoint,
            self.on_start_transfer,
            self.on_end_transfer,
            self.on_abandon_transfer,
            self.on_receive_transfer_request,
            self.on_send_transfer_reply,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let app = Arc::new(Mutex::new(self.app));
        let clients_manager = Arc::new(Mutex::new(self.clients_manager));
        let log = DecisionLogCamera::new();
        let status = Arc::new(SharedStatus::new());

        let (decision_sender, decision_receiver) = mpsc::channel();
        let (report_sender, report_receiver) = mpsc::channel();

        let (delivery_shutdown, delivery_shutdown_receiver) = mpsc::channel();
        let delivery = DeliveryPipeline::new(
            DeliveryConfiguration {
                me,
                view: view.clone(),
                checkpoint_period: self.configuration.checkpoint_period,
                poll_interval: self.configuration.delivery_poll_interval,
            },
            Arc::clone(&app),
            Arc::clone(&clients_manager),
            log.clone(),
            Arc::clone(&status),
            decision_receiver,
            SenderHandle::new(self.network.clone()),
            delivery_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let (coordinator_shutdown, coordinator_shutdown_receiver) = mpsc::channel();
        let coordinator = StateTransferCoordinator::new(
            StateTransferConfiguration {
                me,
                view: view.clone(),
                poll_interval: self.configuration.transfer_poll_interval,
            },
            app,
            clients_manager,
            log.clone(),
            Arc::clone(&status),
            report_receiver,
            TransferClientStub::new(transfer_replies),
            SenderHandle::new(self.network.clone()),
            coordinator_shutdown_receiver,
            event_publisher.clone(),
        )
        .start();

        let (transfer_server_shutdown, transfer_server_shutdown_receiver) = mpsc::channel();
        let transfer_server = start_transfer_server(
            me,
            view,
            log.clone(),
            Arc::clone(&status),
            TransferServerStub::new(transfer_requests),
            SenderHandle::new(self.network),
            transfer_server_shutdown_receiver,
            event_publisher,
        );

        let (event_bus_shutdown, event_bus_shutdown_receiver) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let event_bus = if !event_handlers.is_empty() {
            Some(start_event_bus(
                event_handlers,
                event_subscriber.unwrap(), // Safety: should be Some(...).
                event_bus_shutdown_receiver.unwrap(), // Safety: should be Some(...).
            ))
        } else {
            None
        };

        Replica {
            delivery_handle: DeliveryHandle::new(decision_sender),
            report_sender,
            log,
            status,
            requests: Some(requests),
            poller: Some(poller),
            poller_shutdown,
            delivery: Some(delivery),
            delivery_shutdown,
            coordinator: Some(coordinator),
            coordinator_shutdown,
            transfer_server: Some(transfer_server),
            transfer_server_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of a running replica. When this value is dropped, all
/// background threads are gracefully shut down.
pub struct Replica {
    delivery_handle: DeliveryHandle,
    report_sender: Sender<(ReplicaId, ExecutionId)>,
    log: DecisionLogCamera,
    status: Arc<SharedStatus>,
    requests: Option<Receiver<(ReplicaId, RequestMessage)>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    delivery: Option<JoinHandle<()>>,
    delivery_shutdown: Sender<()>,
    coordinator: Option<JoinHandle<()>>,
    coordinator_shutdown: Sender<()>,
    transfer_server: Option<JoinHandle<()>>,
    transfer_server_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Replica {
    /// Hand the decided batch for `eid` to the delivery pipeline. Called by the consensus layer
    /// exactly once per decision; decisions may be submitted out of execution id order, the
    /// pipeline buffers and reorders.
    pub fn submit_decision(
        &self,
        eid: ExecutionId,
        batch: DecidedBatch,
    ) -> Result<(), DeliveryShutDown> {
        self.delivery_handle.submit(eid, batch)
    }

    /// Report that a message from peer `origin` referenced the execution id `seen`, which is
    /// ahead of what this replica has delivered. Called by the consensus layer whenever a
    /// peer's message reveals progress beyond ours; once more than `f` distinct peers have
    /// given such evidence, a state transfer towards `seen - 1` starts.
    pub fn report_ahead(&self, origin: ReplicaId, seen: ExecutionId) {
        // A send failure means the replica is shutting down; the evidence can be dropped.
        let _ = self.report_sender.send((origin, seen));
    }

    /// Returns a camera which can be used to peek into the replica's decision log.
    pub fn decision_log_camera(&self) -> &DecisionLogCamera {
        &self.log
    }

    /// The [transferable state](TransferableState) at this replica's current frontier, if it
    /// has delivered anything yet.
    pub fn transferable_state(&self) -> Option<TransferableState> {
        self.log.transferable_state()
    }

    /// Whether the replica is currently blocked retrieving state from its peers.
    pub fn is_retrieving_state(&self) -> bool {
        self.status.is_retrieving()
    }

    /// The newest execution id this replica has applied, None before the first delivery.
    pub fn last_delivered(&self) -> Option<ExecutionId> {
        self.status.lock().last_delivered
    }

    /// Take the receiving end of inbound client requests, to be consumed by the library user's
    /// front door (the clients manager's admission side). Returns None after the first call.
    pub fn take_request_receiver(&mut self) -> Option<Receiver<(ReplicaId, RequestMessage)>> {
        self.requests.take()
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        // Safety: the order of thread shutdown in this function is important, as the threads
        // make assumptions about the validity of their channels based on this. The delivery,
        // coordinator, and transfer server threads receive messages from the poller, and assume
        // that the poller will live longer than them.

        self.event_bus_shutdown
            .iter()
            .for_each(|shutdown| shutdown.send(()).unwrap());
        if self.event_bus.is_some() {
            self.event_bus.take().unwrap().join().unwrap();
        }

        self.delivery_shutdown.send(()).unwrap();
        self.delivery.take().unwrap().join().unwrap();

        self.coordinator_shutdown.send(()).unwrap();
        self.coordinator.take().unwrap().join().unwrap();

        self.transfer_server_shutdown.send(()).unwrap();
        self.transfer_server.take().unwrap().join().unwrap();

        self.poller_shutdown.send(()).unwrap();
        self.poller.take().unwrap().join().unwrap();
    }
}
