use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use keith_schema::BusMessage;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Topic {
    SessionOpened,
    SessionClosed,
    TurnReceived,
    TurnEmitted,
    PersonaHandoff,
    ReferralLinkIssued,
    TaskSubmitted,
    TaskClaimed,
    TaskCompleted,
    TaskFailed,
}

impl Topic {
    pub const ALL: [Topic; 10] = [
        Topic::SessionOpened,
        Topic::SessionClosed,
        Topic::TurnReceived,
        Topic::TurnEmitted,
        Topic::PersonaHandoff,
        Topic::ReferralLinkIssued,
        Topic::TaskSubmitted,
        Topic::TaskClaimed,
        Topic::TaskCompleted,
        Topic::TaskFailed,
    ];

    pub fn from_message(msg: &BusMessage) -> Self {
        match msg {
            BusMessage::SessionOpened { .. } => Topic::SessionOpened,
            BusMessage::SessionClosed { .. } => Topic::SessionClosed,
            BusMessage::TurnReceived { .. } => Topic::TurnReceived,
            BusMessage::TurnEmitted { .. } => Topic::TurnEmitted,
            BusMessage::PersonaHandoff { .. } => Topic::PersonaHandoff,
            BusMessage::ReferralLinkIssued { .. } => Topic::ReferralLinkIssued,
            BusMessage::TaskSubmitted { .. } => Topic::TaskSubmitted,
            BusMessage::TaskClaimed { .. } => Topic::TaskClaimed,
            BusMessage::TaskCompleted { .. } => Topic::TaskCompleted,
            BusMessage::TaskFailed { .. } => Topic::TaskFailed,
        }
    }
}

type Subscriber = mpsc::Sender<BusMessage>;
type SubscriberMap = Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>;

/// In-process topic pub/sub. Delivery is best-effort: a full or closed
/// subscriber channel drops the message for that subscriber only.
pub struct EventBus {
    subscribers: SubscriberMap,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> mpsc::Receiver<BusMessage> {
        self.subscribe_many(&[topic]).await
    }

    /// One receiver fed by several topics, in publish order.
    pub async fn subscribe_many(&self, topics: &[Topic]) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        for topic in topics {
            subs.entry(*topic).or_default().push(tx.clone());
        }
        rx
    }

    pub async fn subscribe_all(&self) -> mpsc::Receiver<BusMessage> {
        self.subscribe_many(&Topic::ALL).await
    }

    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        deliver(&self.subscribers, msg).await
    }

    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            subscribers: self.subscribers.clone(),
        }
    }
}

/// Cloneable publish-only handle handed to sessions, workers and routes.
#[derive(Clone)]
pub struct BusPublisher {
    subscribers: SubscriberMap,
}

impl BusPublisher {
    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        deliver(&self.subscribers, msg).await
    }
}

async fn deliver(subscribers: &SubscriberMap, msg: BusMessage) -> Result<()> {
    let topic = Topic::from_message(&msg);
    let mut closed = false;
    {
        let subs = subscribers.read().await;
        if let Some(list) = subs.get(&topic) {
            for tx in list {
                match tx.try_send(msg.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(?topic, "bus subscriber full, message dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed = true,
                }
            }
        }
    }
    if closed {
        let mut subs = subscribers.write().await;
        for list in subs.values_mut() {
            list.retain(|tx| !tx.is_closed());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keith_schema::{Language, OutboundTurn, SessionId};
    use tokio::time::{timeout, Duration};

    fn turn_emitted() -> BusMessage {
        BusMessage::TurnEmitted {
            turn: OutboundTurn {
                session_id: SessionId("PA_1".into()),
                participant_identity: "caller-1".into(),
                language: Language::En,
                text: "Hello".into(),
                at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn publish_to_no_subscribers_succeeds() {
        let bus = EventBus::new(8);
        let result = bus
            .publish(BusMessage::TaskCompleted {
                task_id: "t1".into(),
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe(Topic::TurnEmitted).await;

        bus.publish(turn_emitted()).await.unwrap();

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(received, BusMessage::TurnEmitted { .. }));
    }

    #[tokio::test]
    async fn different_topics_no_crosstalk() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe(Topic::TurnEmitted).await;

        bus.publish(BusMessage::TaskFailed {
            task_id: "t1".into(),
            error: "boom".into(),
        })
        .await
        .unwrap();

        let received = timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn subscribe_all_sees_every_topic_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe_all().await;
        let publisher = bus.publisher();

        publisher
            .publish(BusMessage::SessionOpened {
                session_id: SessionId("PA_1".into()),
                participant_identity: "caller-1".into(),
            })
            .await
            .unwrap();
        publisher.publish(turn_emitted()).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, BusMessage::SessionOpened { .. }));
        assert!(matches!(second, BusMessage::TurnEmitted { .. }));
    }

    #[tokio::test]
    async fn backpressure_drops_when_full() {
        let bus = EventBus::new(1);
        let mut rx = bus.subscribe(Topic::TurnEmitted).await;

        bus.publish(turn_emitted()).await.unwrap();
        bus.publish(turn_emitted()).await.unwrap();

        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_ok());
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let bus = EventBus::new(4);
        let rx = bus.subscribe(Topic::TurnEmitted).await;
        drop(rx);

        bus.publish(turn_emitted()).await.unwrap();

        let subs = bus.subscribers.read().await;
        assert!(subs.get(&Topic::TurnEmitted).unwrap().is_empty());
    }

    #[test]
    fn topic_from_message_matches_variant() {
        let cases = vec![
            (
                BusMessage::SessionClosed {
                    session_id: SessionId("s".into()),
                },
                Topic::SessionClosed,
            ),
            (
                BusMessage::PersonaHandoff {
                    session_id: SessionId("s".into()),
                    from: Language::En,
                    to: Language::Es,
                    persona_id: "keith-es-01".into(),
                },
                Topic::PersonaHandoff,
            ),
            (
                BusMessage::TaskClaimed {
                    task_id: "t".into(),
                    worker: "w".into(),
                },
                Topic::TaskClaimed,
            ),
            (turn_emitted(), Topic::TurnEmitted),
        ];
        for (msg, expected) in cases {
            assert_eq!(Topic::from_message(&msg), expected);
        }
    }
}
