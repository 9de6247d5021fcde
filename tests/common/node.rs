use std::sync::{Arc, Mutex};

use ed25519_dalek::SigningKey;
use quorum_smr::{
    app::NoClientsManager,
    replica::{Configuration, Replica, ReplicaSpec},
    types::basic::{ExecutionId, ReplicaId, SequenceNumber, SessionId, SignatureBytes, ViewId},
    types::batch::{DecidedBatch, OrderedRequest, RequestType},
    types::transfer::TransferableState,
    types::view::View,
};

use super::counter_app::{CounterApp, CounterState};
use super::network::NetworkStub;

/// A running replica plus the handles the tests observe it through.
pub(crate) struct Node {
    id: ReplicaId,
    replica: Replica,
    state: Arc<Mutex<CounterState>>,
}

impl Node {
    pub(crate) fn new(
        keypair: SigningKey,
        network: NetworkStub,
        view: View,
        checkpoint_period: u64,
    ) -> Node {
        let id = ReplicaId::from(&keypair.verifying_key());
        let (app, state) = CounterApp::new();

        let configuration = Configuration::builder()
            .me(keypair)
            .initial_view(view)
            .checkpoint_period(checkpoint_period)
            .log_events(true)
            .build();

        let replica = ReplicaSpec::builder()
            .app(app)
            .clients_manager(NoClientsManager)
            .network(network)
            .configuration(configuration)
            .build()
            .start();

        Node { id, replica, state }
    }

    pub(crate) fn id(&self) -> ReplicaId {
        self.id
    }

    pub(crate) fn submit_decision(&self, eid: u64, batch: DecidedBatch) {
        self.replica
            .submit_decision(ExecutionId::new(eid), batch)
            .unwrap();
    }

    pub(crate) fn report_ahead(&self, origin: ReplicaId, seen: u64) {
        self.replica.report_ahead(origin, ExecutionId::new(seen));
    }

    pub(crate) fn counter(&self) -> u64 {
        self.state.lock().unwrap().counter
    }

    pub(crate) fn applied_under(&self) -> Vec<ExecutionId> {
        self.state.lock().unwrap().applied_under.clone()
    }

    pub(crate) fn last_delivered(&self) -> Option<ExecutionId> {
        self.replica.last_delivered()
    }

    pub(crate) fn is_retrieving_state(&self) -> bool {
        self.replica.is_retrieving_state()
    }

    pub(crate) fn checkpoint_eid(&self) -> Option<ExecutionId> {
        self.replica.decision_log_camera().checkpoint_eid()
    }

    pub(crate) fn logged_eids(&self) -> Vec<ExecutionId> {
        self.replica.decision_log_camera().logged_eids()
    }

    pub(crate) fn transferable_state(&self) -> Option<TransferableState> {
        self.replica.transferable_state()
    }
}

/// An ordered increment request for the counter app. Delivery does not verify request
/// signatures (admission does, outside this crate), so tests leave them zeroed.
pub(crate) fn increment_request(sender: ReplicaId, sequence: u64, by: u64) -> OrderedRequest {
    OrderedRequest {
        sender,
        session: SessionId::new(1),
        sequence: SequenceNumber::new(sequence),
        request_type: RequestType::Ordered,
        view: ViewId::new(0),
        payload: CounterApp::increment_payload(by),
        signature: SignatureBytes::default(),
    }
}

/// A decided batch holding a single increment request.
pub(crate) fn increment_batch(
    sender: ReplicaId,
    proposer: ReplicaId,
    sequence: u64,
    by: u64,
) -> DecidedBatch {
    DecidedBatch::from_requests(
        vec![increment_request(sender, sequence, by)],
        0,
        proposer,
    )
}
