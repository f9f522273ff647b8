//! Live-connection registry and the change-notification wire format.
//! WebSocket handlers register a sender plus the authenticated principal;
//! the dispatcher fans changes out through `for_each`.

use crate::model::{Entity, Principal};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// One change event pushed to subscribed clients: the affected schema,
/// whether it was written or removed, and the primary-key tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyMessage {
    pub service: String,
    pub action: NotifyAction,
    #[serde(rename = "primaryKey")]
    pub primary_key: Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyAction {
    Notify,
    Delete,
}

struct Connection {
    principal: Principal,
    sender: UnboundedSender<String>,
}

/// Shared map of live connections. Mutated on connect/disconnect, read
/// on every fan-out; the lock is held only for the duration of the map
/// walk, sends go through unbounded channels and never block.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, principal: Principal, sender: UnboundedSender<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.connections
            .write()
            .insert(id, Connection { principal, sender });
        id
    }

    pub fn unregister(&self, id: Uuid) {
        self.connections.write().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Send `message` to every connection whose principal passes the
    /// visibility check. Dead channels are dropped silently; the next
    /// disconnect event removes them.
    pub fn broadcast<F>(&self, message: &NotifyMessage, visible_to: F) -> usize
    where
        F: Fn(&Principal) -> bool,
    {
        let encoded = match serde_json::to_string(message) {
            Ok(encoded) => encoded,
            Err(err) => {
                log::error!("failed to encode notification: {err}");
                return 0;
            }
        };

        let connections = self.connections.read();
        let mut delivered = 0;

        for connection in connections.values() {
            if !visible_to(&connection.principal) {
                continue;
            }

            if connection.sender.send(encoded.clone()).is_ok() {
                delivered += 1;
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn message() -> NotifyMessage {
        NotifyMessage {
            service: "widget".to_string(),
            action: NotifyAction::Notify,
            primary_key: serde_json::from_value(json!({"id": 1})).unwrap(),
        }
    }

    #[test]
    fn broadcast_respects_the_visibility_predicate() {
        let registry = ConnectionRegistry::new();
        let (visible_tx, mut visible_rx) = mpsc::unbounded_channel();
        let (hidden_tx, mut hidden_rx) = mpsc::unbounded_channel();

        registry.register(
            Principal {
                group_owner: 2,
                ..Principal::default()
            },
            visible_tx,
        );
        registry.register(
            Principal {
                group_owner: 3,
                ..Principal::default()
            },
            hidden_tx,
        );

        let delivered = registry.broadcast(&message(), |p| p.group_owner == 2);
        assert_eq!(delivered, 1);
        assert!(visible_rx.try_recv().is_ok());
        assert!(hidden_rx.try_recv().is_err());
    }

    #[test]
    fn unregister_removes_the_connection() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = registry.register(Principal::default(), tx);
        assert_eq!(registry.len(), 1);

        registry.unregister(id);
        assert!(registry.is_empty());
    }

    #[test]
    fn wire_format_uses_the_documented_field_names() {
        let encoded = serde_json::to_value(message()).unwrap();
        assert_eq!(
            encoded,
            json!({"service": "widget", "action": "notify", "primaryKey": {"id": 1}})
        );
    }
}
