//! In-process partitioned topic with consumer groups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Broker, Message, MessageSource};
use crate::{ConsumerError, PaymentEvent, Result};

#[derive(Debug)]
struct GroupState {
    /// Members in join order; partition `p` belongs to `members[p % len]`.
    members: Vec<String>,
    /// Bumped on every join and leave.
    generation: u64,
    /// Next offset to consume, per partition.
    committed: Vec<i64>,
}

#[derive(Debug)]
struct TopicState {
    logs: Vec<Vec<Message>>,
    groups: HashMap<String, GroupState>,
}

impl TopicState {
    fn group_mut(&mut self, group: &str) -> &mut GroupState {
        let partitions = self.logs.len();
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| GroupState {
                members: Vec::new(),
                generation: 0,
                committed: vec![0; partitions],
            })
    }
}

#[derive(Debug)]
struct Inner {
    topic: String,
    state: Mutex<TopicState>,
    notify: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, TopicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn assignment(members: &[String], partitions: usize, member: &str) -> Vec<i32> {
    let Some(index) = members.iter().position(|m| m == member) else {
        return Vec::new();
    };
    (0..partitions)
        .filter(|p| p % members.len() == index)
        .map(|p| p as i32)
        .collect()
}

/// In-memory broker for one topic.
///
/// Messages are partitioned by key (`key mod partitions`). Each consumer
/// group keeps its own committed offsets, and partitions are spread
/// round-robin across the group's members, recomputed whenever a member
/// joins or leaves. A member resumes every newly assigned partition from
/// the group's committed offset, so unacknowledged messages are
/// redelivered after a rebalance.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
    group: String,
}

impl InMemoryBroker {
    /// Creates a topic with `partitions` partitions, consumed by `group`.
    pub fn new(topic: impl Into<String>, group: impl Into<String>, partitions: usize) -> Self {
        let partitions = partitions.max(1);
        Self {
            inner: Arc::new(Inner {
                topic: topic.into(),
                state: Mutex::new(TopicState {
                    logs: vec![Vec::new(); partitions],
                    groups: HashMap::new(),
                }),
                notify: Notify::new(),
            }),
            group: group.into(),
        }
    }

    /// Returns a handle to the same topic consumed by another group.
    pub fn for_group(&self, group: impl Into<String>) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            group: group.into(),
        }
    }

    /// Appends a message and returns its partition and offset.
    pub fn publish(&self, key: i64, payload: impl Into<Vec<u8>>) -> (i32, i64) {
        let mut state = self.inner.lock();
        let partition = key.rem_euclid(state.logs.len() as i64) as i32;
        let log = &mut state.logs[partition as usize];
        let offset = log.len() as i64;
        log.push(Message {
            topic: self.inner.topic.clone(),
            partition,
            offset,
            payload: payload.into(),
        });
        drop(state);

        self.inner.notify.notify_waiters();
        (partition, offset)
    }

    /// Publishes a payment event keyed by its order id.
    pub fn publish_event(&self, event: &PaymentEvent) -> Result<(i32, i64)> {
        Ok(self.publish(event.order_id.as_i64(), event.to_payload()?))
    }

    /// Returns the next offset this group will consume from `partition`.
    pub fn committed_offset(&self, partition: i32) -> i64 {
        self.inner
            .lock()
            .groups
            .get(&self.group)
            .and_then(|g| g.committed.get(partition as usize).copied())
            .unwrap_or(0)
    }

    /// Returns the number of messages not yet acknowledged by this group.
    pub fn lag(&self) -> i64 {
        let state = self.inner.lock();
        let committed = state.groups.get(&self.group).map(|g| &g.committed);
        state
            .logs
            .iter()
            .enumerate()
            .map(|(p, log)| {
                let done = committed.and_then(|c| c.get(p).copied()).unwrap_or(0);
                log.len() as i64 - done
            })
            .sum()
    }

    /// Returns the partitions currently owned by `member`.
    pub fn assignment(&self, member: &str) -> Vec<i32> {
        let state = self.inner.lock();
        state
            .groups
            .get(&self.group)
            .map(|g| assignment(&g.members, state.logs.len(), member))
            .unwrap_or_default()
    }

    /// Returns the current group members in join order.
    pub fn members(&self) -> Vec<String> {
        self.inner
            .lock()
            .groups
            .get(&self.group)
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn subscribe(&self, member: &str) -> Result<Box<dyn MessageSource>> {
        {
            let mut state = self.inner.lock();
            let group = state.group_mut(&self.group);
            if group.members.iter().any(|m| m == member) {
                return Err(ConsumerError::Broker(format!(
                    "member {member} already joined group {}",
                    self.group
                )));
            }
            group.members.push(member.to_string());
            group.generation += 1;
        }
        self.inner.notify.notify_waiters();

        tracing::debug!(group = %self.group, member, "joined consumer group");

        Ok(Box::new(InMemorySource {
            broker: self.clone(),
            member: member.to_string(),
            generation: None,
            assigned: Vec::new(),
            positions: HashMap::new(),
            next_partition: 0,
            closed: false,
        }))
    }
}

/// A member of an [`InMemoryBroker`] consumer group.
struct InMemorySource {
    broker: InMemoryBroker,
    member: String,
    generation: Option<u64>,
    assigned: Vec<i32>,
    positions: HashMap<i32, i64>,
    next_partition: usize,
    closed: bool,
}

impl InMemorySource {
    fn next_message(&mut self) -> Option<Message> {
        let inner = Arc::clone(&self.broker.inner);
        let state = inner.lock();
        let group = state.groups.get(&self.broker.group)?;

        if self.generation != Some(group.generation) {
            self.assigned = assignment(&group.members, state.logs.len(), &self.member);
            self.positions = self
                .assigned
                .iter()
                .map(|&p| (p, group.committed[p as usize]))
                .collect();
            self.generation = Some(group.generation);
            tracing::debug!(
                member = %self.member,
                partitions = ?self.assigned,
                "partitions assigned"
            );
        }

        let count = self.assigned.len();
        for step in 0..count {
            let index = (self.next_partition + step) % count;
            let partition = self.assigned[index];
            let position = self.positions.get(&partition).copied().unwrap_or(0);

            if let Some(message) = state.logs[partition as usize].get(position as usize) {
                self.positions.insert(partition, position + 1);
                self.next_partition = index + 1;
                return Some(message.clone());
            }
        }

        None
    }

    fn leave(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        {
            let mut state = self.broker.inner.lock();
            let group = state.group_mut(&self.broker.group);
            group.members.retain(|m| m != &self.member);
            group.generation += 1;
        }
        self.broker.inner.notify.notify_waiters();

        tracing::debug!(group = %self.broker.group, member = %self.member, "left consumer group");
    }
}

#[async_trait]
impl MessageSource for InMemorySource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>> {
        if self.closed {
            return Err(ConsumerError::Closed);
        }

        let deadline = Instant::now() + timeout;
        let inner = Arc::clone(&self.broker.inner);
        loop {
            // Registered before the check so a publish in between is not missed.
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.next_message() {
                return Ok(Some(message));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&mut self, message: &Message) -> Result<()> {
        if self.closed {
            return Err(ConsumerError::Closed);
        }

        let mut state = self.broker.inner.lock();
        let partitions = state.logs.len();
        let group = state.group_mut(&self.broker.group);

        if !assignment(&group.members, partitions, &self.member).contains(&message.partition) {
            tracing::debug!(
                member = %self.member,
                partition = message.partition,
                offset = message.offset,
                "ignoring ack for partition no longer owned"
            );
            return Ok(());
        }

        if let Some(committed) = group.committed.get_mut(message.partition as usize) {
            *committed = message.offset + 1;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.leave();
        Ok(())
    }
}

impl Drop for InMemorySource {
    fn drop(&mut self) {
        self.leave();
    }
}
