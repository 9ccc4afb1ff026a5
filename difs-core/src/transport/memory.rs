//! In-process network used by tests and by tools that embed a repo.
//!
//! Faces created from one `MemoryNetwork` share a routing table (longest
//! prefix wins) and a pending-interest table. Data put by any face answers
//! every pending interest it matches.

use super::{Interest, NackReason, RequestOutcome, Transport};
use crate::{Data, Name, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};

const REGISTRATION_CHANNEL_CAPACITY: usize = 256;

struct Route {
    prefix: Name,
    sender: mpsc::Sender<Interest>,
}

struct PendingInterest {
    id: u64,
    interest: Interest,
    reply: oneshot::Sender<Data>,
}

enum Dispatch {
    Routed(u64, mpsc::Sender<Interest>, oneshot::Receiver<Data>),
    NoRoute,
    Lost,
}

struct LossRule {
    prefix: Name,
    remaining: usize,
}

#[derive(Default)]
struct NetworkState {
    routes: Vec<Route>,
    pending: Vec<PendingInterest>,
    losses: Vec<LossRule>,
    next_pending_id: u64,
    expressed: u64,
}

#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn face(&self) -> MemoryFace {
        MemoryFace {
            network: self.clone(),
        }
    }

    /// Silently drop the next `count` interests under `prefix`; their
    /// requesters time out.
    pub fn drop_interests(&self, prefix: Name, count: usize) {
        self.lock().losses.push(LossRule {
            prefix,
            remaining: count,
        });
    }

    /// Interests expressed on this network so far, dropped ones included.
    pub fn expressed_count(&self) -> u64 {
        self.lock().expressed
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn should_drop(state: &mut NetworkState, name: &Name) -> bool {
        let Some(rule) = state
            .losses
            .iter_mut()
            .find(|rule| rule.remaining > 0 && rule.prefix.is_prefix_of(name))
        else {
            return false;
        };
        rule.remaining -= 1;
        state.losses.retain(|rule| rule.remaining > 0);
        true
    }

    fn route_for(state: &mut NetworkState, name: &Name) -> Option<mpsc::Sender<Interest>> {
        state.routes.retain(|route| !route.sender.is_closed());
        state
            .routes
            .iter()
            .filter(|route| route.prefix.is_prefix_of(name))
            .max_by_key(|route| route.prefix.len())
            .map(|route| route.sender.clone())
    }
}

#[derive(Clone)]
pub struct MemoryFace {
    network: MemoryNetwork,
}

impl MemoryFace {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for MemoryFace {
    async fn express_interest(&self, interest: Interest) -> RequestOutcome {
        let lifetime = interest.lifetime;

        let dispatch = {
            let mut state = self.network.lock();
            state.expressed += 1;

            if MemoryNetwork::should_drop(&mut state, &interest.name) {
                Dispatch::Lost
            } else {
                match MemoryNetwork::route_for(&mut state, &interest.name) {
                    Some(route) => {
                        let (reply_tx, reply_rx) = oneshot::channel();
                        let id = state.next_pending_id;
                        state.next_pending_id += 1;
                        state.pending.push(PendingInterest {
                            id,
                            interest: interest.clone(),
                            reply: reply_tx,
                        });
                        Dispatch::Routed(id, route, reply_rx)
                    }
                    None => Dispatch::NoRoute,
                }
            }
        };

        let (id, route, reply_rx) = match dispatch {
            Dispatch::Routed(id, route, reply_rx) => (id, route, reply_rx),
            Dispatch::NoRoute => return RequestOutcome::Nack(NackReason::NoRoute),
            Dispatch::Lost => {
                tracing::debug!("Dropping interest. name={}", interest.name);
                tokio::time::sleep(lifetime).await;
                return RequestOutcome::Timeout;
            }
        };

        if route.send(interest).await.is_err() {
            self.network.lock().pending.retain(|pending| pending.id != id);
            return RequestOutcome::Nack(NackReason::NoRoute);
        }

        match tokio::time::timeout(lifetime, reply_rx).await {
            Ok(Ok(data)) => RequestOutcome::Data(data),
            Ok(Err(_)) => RequestOutcome::Timeout,
            Err(_) => {
                self.network.lock().pending.retain(|pending| pending.id != id);
                RequestOutcome::Timeout
            }
        }
    }

    async fn register_prefix(&self, prefix: Name) -> Result<mpsc::Receiver<Interest>> {
        let (sender, receiver) = mpsc::channel(REGISTRATION_CHANNEL_CAPACITY);
        tracing::debug!("Registering prefix. prefix={}", prefix);
        self.network.lock().routes.push(Route { prefix, sender });
        Ok(receiver)
    }

    async fn put_data(&self, data: Data) -> Result<()> {
        let satisfied: Vec<PendingInterest> = {
            let mut state = self.network.lock();
            let (satisfied, remaining): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|pending| pending.interest.matches(&data));
            state.pending = remaining;
            satisfied
        };

        if satisfied.is_empty() {
            tracing::debug!("Dropping unsolicited data. name={}", data.name);
        }

        for pending in satisfied {
            let _ = pending.reply.send(data.clone());
        }
        Ok(())
    }
}
