//! In-process loopback network
//!
//! Every host joined to a topic receives every broadcast on it, the sender
//! included. Leadership is explicit: the first host to join a topic leads
//! until [`LocalNetwork::set_leader`] picks another one or the leader
//! leaves. Delivery is immediate and lossless, which makes round behavior
//! deterministic in tests.

use crate::binding::{ConsensusBinding, ConsensusHandler, ConsensusNetwork, Role};
use crate::error::{ConsensusError, ConsensusResult};
use crate::message::Message;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Member {
    id: u64,
    host_id: String,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct Topic {
    members: Vec<Member>,
    leader: Option<String>,
    term: u64,
}

#[derive(Default)]
pub struct LocalNetwork {
    topics: Mutex<HashMap<String, Topic>>,
    next_member: AtomicU64,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handle through which `host_id` joins topics
    pub fn host(self: &Arc<Self>, host_id: impl Into<String>) -> LocalHost {
        LocalHost {
            network: Arc::clone(self),
            host_id: host_id.into(),
        }
    }

    pub fn set_leader(&self, topic: &str, host_id: &str) {
        let mut topics = self.topics.lock();
        topics.entry(topic.to_string()).or_default().leader = Some(host_id.to_string());
    }

    pub fn leader(&self, topic: &str) -> Option<String> {
        self.topics.lock().get(topic).and_then(|t| t.leader.clone())
    }

    pub fn term(&self, topic: &str) -> u64 {
        self.topics.lock().get(topic).map(|t| t.term).unwrap_or(0)
    }

    pub fn member_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map(|t| t.members.len()).unwrap_or(0)
    }

    fn join(&self, topic: &str, host_id: &str) -> (u64, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_member.fetch_add(1, Ordering::Relaxed);

        let mut topics = self.topics.lock();
        let state = topics.entry(topic.to_string()).or_default();
        state.members.push(Member {
            id,
            host_id: host_id.to_string(),
            tx,
        });
        if state.leader.is_none() {
            state.leader = Some(host_id.to_string());
        }
        debug!(topic, host_id, members = state.members.len(), "Joined topic");
        (id, rx)
    }

    fn leave(&self, topic: &str, member_id: u64) {
        let mut topics = self.topics.lock();
        let Some(state) = topics.get_mut(topic) else {
            return;
        };
        let Some(pos) = state.members.iter().position(|m| m.id == member_id) else {
            return;
        };
        let member = state.members.remove(pos);

        let still_present = state.members.iter().any(|m| m.host_id == member.host_id);
        if !still_present && state.leader.as_deref() == Some(member.host_id.as_str()) {
            state.leader = state.members.first().map(|m| m.host_id.clone());
            state.term += 1;
        }
        if state.members.is_empty() {
            topics.remove(topic);
        }
    }

    fn deliver(&self, topic: &str, message: Message) -> ConsensusResult<()> {
        let mut topics = self.topics.lock();
        let state = topics
            .get_mut(topic)
            .ok_or_else(|| ConsensusError::NotJoined(topic.to_string()))?;
        state.members.retain(|m| !m.tx.is_closed());
        for member in &state.members {
            // Closed receivers were pruned above; a race here only drops to a leaving member
            let _ = member.tx.send(message.clone());
        }
        Ok(())
    }

    fn is_leader(&self, topic: &str, host_id: &str) -> bool {
        self.topics
            .lock()
            .get(topic)
            .and_then(|t| t.leader.as_deref())
            .is_some_and(|leader| leader == host_id)
    }

    fn advance_term(&self, topic: &str) {
        if let Some(state) = self.topics.lock().get_mut(topic) {
            state.term += 1;
        }
    }

    fn peer_count(&self, topic: &str) -> usize {
        self.member_count(topic).saturating_sub(1)
    }
}

/// One host's view of a [`LocalNetwork`]
#[derive(Clone)]
pub struct LocalHost {
    network: Arc<LocalNetwork>,
    host_id: String,
}

impl LocalHost {
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn join_local(&self, topic: &str) -> LocalBinding {
        let (member_id, inbox) = self.network.join(topic, &self.host_id);
        LocalBinding {
            network: Arc::clone(&self.network),
            host_id: self.host_id.clone(),
            topic: topic.to_string(),
            member_id,
            inbox: tokio::sync::Mutex::new(inbox),
        }
    }
}

impl ConsensusNetwork for LocalHost {
    fn join(&self, topic: &str) -> ConsensusResult<Arc<dyn ConsensusBinding>> {
        Ok(Arc::new(self.join_local(topic)))
    }
}

/// Membership of one host in one topic. Leaves the topic on drop.
pub struct LocalBinding {
    network: Arc<LocalNetwork>,
    host_id: String,
    topic: String,
    member_id: u64,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl Drop for LocalBinding {
    fn drop(&mut self) {
        self.network.leave(&self.topic, self.member_id);
    }
}

#[async_trait]
impl ConsensusBinding for LocalBinding {
    fn host_id(&self) -> &str {
        &self.host_id
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    async fn run(&self, token: CancellationToken, handler: Arc<dyn ConsensusHandler>) {
        let mut inbox = self.inbox.lock().await;

        // Messages that arrived while no loop was running belong to old rounds
        let mut discarded = 0usize;
        while inbox.try_recv().is_ok() {
            discarded += 1;
        }

        let mut ticker = tokio::time::interval(handler.leader_job_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(host = %self.host_id, topic = %self.topic, discarded, "Consensus loop started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(message) = inbox.recv() => {
                    if let Err(e) = handler.handle_message(message).await {
                        warn!(topic = %self.topic, error = %e, "Message handler failed");
                    }
                }
                _ = ticker.tick() => {
                    if self.role() == Role::Leader {
                        if let Err(e) = handler.leader_job().await {
                            warn!(topic = %self.topic, error = %e, "Leader job failed");
                        }
                    }
                }
            }
        }

        info!(host = %self.host_id, topic = %self.topic, "Consensus loop stopped");
    }

    async fn broadcast(&self, message: Message) -> ConsensusResult<()> {
        self.network.deliver(&self.topic, message)
    }

    fn role(&self) -> Role {
        if self.network.is_leader(&self.topic, &self.host_id) {
            Role::Leader
        } else {
            Role::Follower
        }
    }

    fn advance_term(&self) {
        self.network.advance_term(&self.topic);
    }

    fn peer_count(&self) -> usize {
        self.network.peer_count(&self.topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PriceDataMessage;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const TOPIC: &str = "BTC-USD-global-aggregator-topic-5000";

    fn price(from: &str, round_id: i64, value: i64) -> Message {
        Message::price_data(from, &PriceDataMessage { round_id, value }).unwrap()
    }

    #[tokio::test]
    async fn test_single_host_is_leader_and_hears_itself() {
        let network = LocalNetwork::new();
        let binding = network.host("a").join_local(TOPIC);

        assert_eq!(binding.role(), Role::Leader);
        assert_eq!(binding.peer_count(), 0);

        binding.broadcast(price("a", 1, 10)).await.unwrap();
        let echoed = binding.inbox.lock().await.recv().await.unwrap();
        assert_eq!(echoed.sent_from, "a");
    }

    #[tokio::test]
    async fn test_membership_and_leadership() {
        let network = LocalNetwork::new();
        let a = network.host("a").join_local(TOPIC);
        let b = network.host("b").join_local(TOPIC);
        let c = network.host("c").join_local(TOPIC);

        assert_eq!(a.peer_count(), 2);
        assert_eq!(a.role(), Role::Leader);
        assert_eq!(b.role(), Role::Follower);

        network.set_leader(TOPIC, "b");
        assert_eq!(a.role(), Role::Follower);
        assert_eq!(b.role(), Role::Leader);

        b.advance_term();
        assert_eq!(network.term(TOPIC), 1);

        drop(b);
        assert_eq!(c.peer_count(), 1);
        assert_eq!(network.leader(TOPIC).as_deref(), Some("a"));
        assert_eq!(network.term(TOPIC), 2);
    }

    #[tokio::test]
    async fn test_broadcast_to_left_topic_fails() {
        let network = LocalNetwork::new();
        let host = network.host("a");
        drop(host.join_local(TOPIC));
        assert_matches!(
            network.deliver(TOPIC, price("a", 1, 1)),
            Err(ConsensusError::NotJoined(_))
        );
    }

    struct CountingHandler {
        leader_jobs: AtomicUsize,
        messages: AtomicUsize,
    }

    #[async_trait]
    impl ConsensusHandler for CountingHandler {
        fn leader_job_interval(&self) -> Duration {
            Duration::from_millis(100)
        }

        async fn leader_job(&self) -> anyhow::Result<()> {
            self.leader_jobs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn handle_message(&self, _message: Message) -> anyhow::Result<()> {
            self.messages.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("handler errors are logged, not fatal")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_drives_handler_until_cancelled() {
        let network = LocalNetwork::new();
        let leader = Arc::new(network.host("a").join_local(TOPIC));
        let follower = Arc::new(network.host("b").join_local(TOPIC));

        let leader_handler = Arc::new(CountingHandler {
            leader_jobs: AtomicUsize::new(0),
            messages: AtomicUsize::new(0),
        });
        let follower_handler = Arc::new(CountingHandler {
            leader_jobs: AtomicUsize::new(0),
            messages: AtomicUsize::new(0),
        });

        let token = CancellationToken::new();
        let leader_task = {
            let (binding, handler, token) = (leader.clone(), leader_handler.clone(), token.clone());
            tokio::spawn(async move { binding.run(token, handler).await })
        };
        let follower_task = {
            let (binding, handler, token) = (follower.clone(), follower_handler.clone(), token.clone());
            tokio::spawn(async move { binding.run(token, handler).await })
        };

        tokio::time::sleep(Duration::from_millis(350)).await;
        leader.broadcast(price("a", 1, 10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        token.cancel();
        leader_task.await.unwrap();
        follower_task.await.unwrap();

        assert_eq!(leader_handler.leader_jobs.load(Ordering::SeqCst), 3);
        assert_eq!(follower_handler.leader_jobs.load(Ordering::SeqCst), 0);
        assert_eq!(leader_handler.messages.load(Ordering::SeqCst), 1);
        assert_eq!(follower_handler.messages.load(Ordering::SeqCst), 1);
    }
}
