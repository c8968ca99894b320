// service/realtime.rs
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::models::{
    chatmodels::Message, notificationmodel::Notification, transactionmodel::TransactionStatus,
};

pub type ConnectionId = Uuid;

/// Events pushed to sockets. Serialized as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(Message),
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },
    MessagesRead {
        conversation_id: Uuid,
        reader_id: Uuid,
        count: u64,
    },
    Presence {
        user_id: Uuid,
        online: bool,
    },
    Notification(Notification),
    PaymentUpdate {
        transaction_id: Uuid,
        contract_id: Uuid,
        status: TransactionStatus,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversation { conversation_id: Uuid },
    LeaveConversation { conversation_id: Uuid },
    TypingStart { conversation_id: Uuid },
    TypingStop { conversation_id: Uuid },
    MarkRead { conversation_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Room {
    User(Uuid),
    Conversation(Uuid),
}

#[derive(Debug)]
struct Connection {
    user_id: Uuid,
    sender: mpsc::UnboundedSender<ServerEvent>,
    conversations: HashSet<Uuid>,
}

#[derive(Debug, Default)]
struct HubState {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
}

impl HubState {
    fn join(&mut self, room: Room, connection_id: ConnectionId) {
        self.rooms.entry(room).or_default().insert(connection_id);
    }

    fn leave(&mut self, room: Room, connection_id: ConnectionId) {
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
    }

    fn emit(&self, room: Room, event: &ServerEvent, except: Option<ConnectionId>) -> usize {
        let members = match self.rooms.get(&room) {
            Some(members) => members,
            None => return 0,
        };

        members
            .iter()
            .filter(|id| Some(**id) != except)
            .filter_map(|id| self.connections.get(id))
            // a closed receiver just means the socket is going away
            .filter(|conn| conn.sender.send(event.clone()).is_ok())
            .count()
    }
}

/// Connection registry with user and conversation rooms. Delivery is best
/// effort and at most once; nothing is queued for offline users.
#[derive(Debug, Default)]
pub struct RealtimeHub {
    state: RwLock<HubState>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(
        &self,
        user_id: Uuid,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();

        let mut state = self.state.write().await;
        state.connections.insert(
            connection_id,
            Connection {
                user_id,
                sender,
                conversations: HashSet::new(),
            },
        );
        state.join(Room::User(user_id), connection_id);

        tracing::debug!("Socket {} connected for user {}", connection_id, user_id);
        (connection_id, receiver)
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let mut state = self.state.write().await;

        let connection = match state.connections.remove(&connection_id) {
            Some(connection) => connection,
            None => return,
        };

        state.leave(Room::User(connection.user_id), connection_id);
        for conversation_id in &connection.conversations {
            state.leave(Room::Conversation(*conversation_id), connection_id);
        }

        let still_online = state.rooms.contains_key(&Room::User(connection.user_id));
        if !still_online {
            let event = ServerEvent::Presence {
                user_id: connection.user_id,
                online: false,
            };
            for conversation_id in &connection.conversations {
                state.emit(Room::Conversation(*conversation_id), &event, None);
            }
        }

        tracing::debug!(
            "Socket {} disconnected for user {}",
            connection_id,
            connection.user_id
        );
    }

    /// Subscribes a socket to a conversation. Callers check membership first.
    pub async fn join_conversation(&self, connection_id: ConnectionId, conversation_id: Uuid) -> bool {
        let mut state = self.state.write().await;

        let user_id = match state.connections.get_mut(&connection_id) {
            Some(connection) => {
                connection.conversations.insert(conversation_id);
                connection.user_id
            }
            None => return false,
        };

        state.join(Room::Conversation(conversation_id), connection_id);
        state.emit(
            Room::Conversation(conversation_id),
            &ServerEvent::Presence {
                user_id,
                online: true,
            },
            Some(connection_id),
        );
        true
    }

    pub async fn leave_conversation(&self, connection_id: ConnectionId, conversation_id: Uuid) {
        let mut state = self.state.write().await;
        if let Some(connection) = state.connections.get_mut(&connection_id) {
            connection.conversations.remove(&conversation_id);
        }
        state.leave(Room::Conversation(conversation_id), connection_id);
    }

    /// Returns how many sockets the event reached.
    pub async fn emit_to_user(&self, user_id: Uuid, event: ServerEvent) -> usize {
        self.state.read().await.emit(Room::User(user_id), &event, None)
    }

    pub async fn emit_to_conversation(
        &self,
        conversation_id: Uuid,
        event: ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        self.state
            .read()
            .await
            .emit(Room::Conversation(conversation_id), &event, except)
    }

    /// Emits to a conversation room and to every socket of `user_id`, so a
    /// participant who has not opened the conversation still hears about it.
    /// Each socket gets the event once.
    pub async fn emit_to_conversation_and_user(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        event: ServerEvent,
    ) -> usize {
        let state = self.state.read().await;
        let rooms = [Room::Conversation(conversation_id), Room::User(user_id)];
        let targets: HashSet<ConnectionId> = rooms
            .iter()
            .filter_map(|room| state.rooms.get(room))
            .flatten()
            .copied()
            .collect();

        targets
            .iter()
            .filter_map(|id| state.connections.get(id))
            .filter(|conn| conn.sender.send(event.clone()).is_ok())
            .count()
    }

    /// Reply to a single socket, e.g. an error for a rejected client event.
    pub async fn send_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        self.state
            .read()
            .await
            .connections
            .get(&connection_id)
            .map(|conn| conn.sender.send(event).is_ok())
            .unwrap_or(false)
    }

    pub async fn in_conversation(&self, connection_id: ConnectionId, conversation_id: Uuid) -> bool {
        self.state
            .read()
            .await
            .connections
            .get(&connection_id)
            .map(|conn| conn.conversations.contains(&conversation_id))
            .unwrap_or(false)
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.state
            .read()
            .await
            .rooms
            .contains_key(&Room::User(user_id))
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_room_reaches_every_socket() {
        let hub = RealtimeHub::new();
        let user = Uuid::new_v4();
        let (_a, mut rx_a) = hub.connect(user).await;
        let (_b, mut rx_b) = hub.connect(user).await;

        let delivered = hub
            .emit_to_user(user, ServerEvent::Error { message: "x".to_string() })
            .await;

        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(hub.is_online(user).await);
    }

    #[tokio::test]
    async fn test_conversation_room_and_presence() {
        let hub = RealtimeHub::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        let (conn_a, mut rx_a) = hub.connect(alice).await;
        let (conn_b, mut rx_b) = hub.connect(bob).await;
        assert!(hub.join_conversation(conn_a, conversation).await);
        assert!(hub.join_conversation(conn_b, conversation).await);

        // alice hears bob come online
        match rx_a.try_recv().unwrap() {
            ServerEvent::Presence { user_id, online } => {
                assert_eq!(user_id, bob);
                assert!(online);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let typing = ServerEvent::Typing {
            conversation_id: conversation,
            user_id: alice,
            is_typing: true,
        };
        assert_eq!(hub.emit_to_conversation(conversation, typing, Some(conn_a)).await, 1);
        assert!(matches!(rx_b.try_recv().unwrap(), ServerEvent::Typing { .. }));
        assert!(rx_a.try_recv().is_err());

        hub.disconnect(conn_b).await;
        assert!(!hub.is_online(bob).await);
        match rx_a.try_recv().unwrap() {
            ServerEvent::Presence { user_id, online } => {
                assert_eq!(user_id, bob);
                assert!(!online);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_offline_users_get_nothing() {
        let hub = RealtimeHub::new();
        let user = Uuid::new_v4();
        let (conn, _rx) = hub.connect(user).await;
        hub.disconnect(conn).await;

        let delivered = hub
            .emit_to_user(user, ServerEvent::Error { message: "x".to_string() })
            .await;
        assert_eq!(delivered, 0);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_direct_reply_and_membership() {
        let hub = RealtimeHub::new();
        let user = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        let (conn, mut rx) = hub.connect(user).await;

        assert!(!hub.in_conversation(conn, conversation).await);
        hub.join_conversation(conn, conversation).await;
        assert!(hub.in_conversation(conn, conversation).await);
        hub.leave_conversation(conn, conversation).await;
        assert!(!hub.in_conversation(conn, conversation).await);

        assert!(
            hub.send_to_connection(conn, ServerEvent::Error { message: "nope".to_string() })
                .await
        );
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Error { .. }));
        assert!(
            !hub.send_to_connection(Uuid::new_v4(), ServerEvent::Error { message: "x".to_string() })
                .await
        );
    }

    #[test]
    fn test_event_wire_format() {
        let conversation_id = Uuid::new_v4();
        let event: ClientEvent = serde_json::from_value(serde_json::json!({
            "event": "join_conversation",
            "data": { "conversation_id": conversation_id }
        }))
        .unwrap();
        assert_eq!(event, ClientEvent::JoinConversation { conversation_id });

        let json = serde_json::to_value(ServerEvent::Presence {
            user_id: conversation_id,
            online: true,
        })
        .unwrap();
        assert_eq!(json["event"], "presence");
        assert_eq!(json["data"]["online"], true);
    }

    #[tokio::test]
    async fn test_recipient_outside_the_room_still_hears_the_message() {
        let hub = RealtimeHub::new();
        let sender = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        let (sender_conn, mut sender_rx) = hub.connect(sender).await;
        hub.join_conversation(sender_conn, conversation).await;
        // one socket browsing elsewhere, one with the conversation open
        let (_idle, mut idle_rx) = hub.connect(recipient).await;
        let (open, mut open_rx) = hub.connect(recipient).await;
        hub.join_conversation(open, conversation).await;
        while sender_rx.try_recv().is_ok() {}

        let event = ServerEvent::Typing {
            conversation_id: conversation,
            user_id: sender,
            is_typing: false,
        };
        let reached = hub
            .emit_to_conversation_and_user(conversation, recipient, event)
            .await;

        assert_eq!(reached, 3);
        assert!(matches!(idle_rx.try_recv(), Ok(ServerEvent::Typing { .. })));
        assert!(matches!(open_rx.try_recv(), Ok(ServerEvent::Typing { .. })));
        assert!(open_rx.try_recv().is_err());
        assert!(matches!(sender_rx.try_recv(), Ok(ServerEvent::Typing { .. })));
    }
}
