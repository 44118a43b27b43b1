use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::FetchError;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::network::NetworkInterface;
use crate::transform::DispatchKey;
use crate::transform::canonicalize;

type FetchOutcome = Result<Response, FetchError>;
type WaitMap = Arc<Mutex<HashMap<DispatchKey, broadcast::Sender<FetchOutcome>>>>;

/// Shares one network request between identical concurrent requests.
///
/// The first caller for a [`DispatchKey`] sends the request from a spawned
/// task, so that dropping it does not strand the callers that joined it.
#[derive(Clone, Default)]
pub(crate) struct Deduplicator {
    wait_map: WaitMap,
}

enum Role {
    First(broadcast::Receiver<FetchOutcome>),
    Joined(broadcast::Receiver<FetchOutcome>),
}

impl Deduplicator {
    pub(crate) async fn execute(
        &self,
        network: Arc<dyn NetworkInterface>,
        request: Request,
    ) -> FetchOutcome {
        let key = canonicalize(&request.document, &request.variables);
        let role = {
            let mut locked_wait_map = self.wait_map.lock();
            match locked_wait_map.get(&key) {
                Some(waiter) => Role::Joined(waiter.subscribe()),
                None => {
                    let (sender, receiver) = broadcast::channel(1);
                    locked_wait_map.insert(key.clone(), sender);
                    Role::First(receiver)
                }
            }
        };

        let mut receiver = match role {
            Role::Joined(receiver) => {
                tracing::debug!(key = %key, "joining in-flight request");
                receiver
            }
            Role::First(receiver) => {
                let in_flight = InFlight {
                    wait_map: self.wait_map.clone(),
                    key: Some(key),
                };
                tokio::task::spawn(async move {
                    let outcome = network.execute(request).await;
                    in_flight.complete(outcome);
                });
                receiver
            }
        };
        receiver.recv().await.unwrap_or(Err(FetchError::Canceled))
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.wait_map.lock().len()
    }
}

/// Removes its key from the wait map when the request completes or is dropped.
struct InFlight {
    wait_map: WaitMap,
    key: Option<DispatchKey>,
}

impl InFlight {
    fn complete(mut self, outcome: FetchOutcome) {
        if let Some(key) = self.key.take() {
            // removal and send happen under the lock so no late waiter misses the value
            let mut locked_wait_map = self.wait_map.lock();
            if let Some(sender) = locked_wait_map.remove(&key) {
                let _ = sender.send(outcome);
            }
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            // waiters see a closed channel
            self.wait_map.lock().remove(&key);
        }
    }
}
