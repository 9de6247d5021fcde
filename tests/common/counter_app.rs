use std::sync::{Arc, Mutex};

use quorum_smr::{
    app::{App, ExecuteError},
    types::basic::ExecutionId,
    types::batch::{DeliveryContext, OrderedRequest},
};

/// The observable state of a [CounterApp], shared with the test body.
pub(crate) struct CounterState {
    pub(crate) counter: u64,
    /// Every execution id the app saw an ordered request under, in application order. Lets
    /// tests assert order and exactly-once delivery.
    pub(crate) applied_under: Vec<ExecutionId>,
}

/// A deterministic test application: a single counter. An ordered request's payload is the
/// little-endian increment to add; every reply is the little-endian counter value after (or,
/// for unordered requests, at) the read.
#[derive(Clone)]
pub(crate) struct CounterApp {
    state: Arc<Mutex<CounterState>>,
}

impl CounterApp {
    pub(crate) fn new() -> (CounterApp, Arc<Mutex<CounterState>>) {
        let state = Arc::new(Mutex::new(CounterState {
            counter: 0,
            applied_under: Vec::new(),
        }));
        (
            CounterApp {
                state: Arc::clone(&state),
            },
            state,
        )
    }

    pub(crate) fn increment_payload(by: u64) -> Vec<u8> {
        by.to_le_bytes().to_vec()
    }
}

impl App for CounterApp {
    fn execute_ordered(
        &mut self,
        request: &OrderedRequest,
        context: &DeliveryContext,
    ) -> Result<Vec<u8>, ExecuteError> {
        let increment: [u8; 8] = request
            .payload
            .as_slice()
            .try_into()
            .map_err(|_| ExecuteError::Rejected)?;
        let mut state = self.state.lock().unwrap();
        state.counter += u64::from_le_bytes(increment);
        state.applied_under.push(context.eid);
        Ok(state.counter.to_le_bytes().to_vec())
    }

    fn execute_unordered(&mut self, _request: &OrderedRequest) -> Result<Vec<u8>, ExecuteError> {
        let state = self.state.lock().unwrap();
        Ok(state.counter.to_le_bytes().to_vec())
    }

    fn snapshot(&mut self) -> Vec<u8> {
        self.state.lock().unwrap().counter.to_le_bytes().to_vec()
    }

    fn install_snapshot(&mut self, snapshot: &[u8]) {
        let counter: [u8; 8] = snapshot
            .try_into()
            .expect("a CounterApp snapshot is always eight bytes");
        self.state.lock().unwrap().counter = u64::from_le_bytes(counter);
    }
}
