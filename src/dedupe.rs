//! In-flight request sharing.

use futures::future::BoxFuture;
use futures::future::Shared;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use tracing::instrument;

use crate::request::ErrorResponse;
use crate::request::Method;
use crate::request::ResourceRequest;
use crate::request::ResourceResponse;
use crate::traits::NetworkAdapter;

type DispatchResult = Result<ResourceResponse, ErrorResponse>;
type InFlight = Shared<BoxFuture<'static, DispatchResult>>;

/// Network layer which collapses concurrent identical GET requests into one dispatch. All joined callers get the
/// result of the first one, errors included. Other methods always go to the network on their own.
pub struct RequestDeduper {
    network:   Arc<dyn NetworkAdapter>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
}

impl RequestDeduper {
    pub fn new(network: Arc<dyn NetworkAdapter>) -> Self {
        Self {
            network,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[instrument(level = "trace", skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn dispatch(&self, request: ResourceRequest) -> DispatchResult {
        if request.method != Method::Get {
            return self.network.dispatch(request).await;
        }

        let key = request.dedupe_key();
        let shared = {
            let mut in_flight = self.in_flight.lock();
            if let Some(pending) = in_flight.get(&key) {
                debug!("joining in-flight request {key}");
                pending.clone()
            }
            else {
                let network = Arc::clone(&self.network);
                let registry = Arc::downgrade(&self.in_flight);
                let own_key = key.clone();
                let pending = async move {
                    let result = network.dispatch(request).await;
                    // Unregister before resolving so that a request issued after completion dispatches anew.
                    if let Some(registry) = registry.upgrade() {
                        registry.lock().remove(&own_key);
                    }
                    result
                }
                .boxed()
                .shared();
                in_flight.insert(key, pending.clone());
                pending
            }
        };

        shared.await
    }

    /// Number of distinct requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

impl std::fmt::Debug for RequestDeduper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduper")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
