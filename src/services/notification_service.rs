use async_trait::async_trait;
use sea_orm::{ entity::prelude::*, DatabaseConnection, Set };
use serde::{ Deserialize, Serialize };
use uuid::Uuid;

use crate::db::entity::notification;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminNotification {
    pub kind: String,
    pub title: String,
    pub message: String,
    pub broadcast: bool,
    pub escalate: bool,
    pub wallet_tx_id: Option<Uuid>,
}

impl AdminNotification {
    /// Operator escalation about one ledger row.
    pub fn escalation(kind: &str, title: &str, message: String, wallet_tx_id: Option<Uuid>) -> Self {
        Self {
            kind: kind.to_string(),
            title: title.to_string(),
            message,
            broadcast: true,
            escalate: true,
            wallet_tx_id,
        }
    }

    pub fn info(kind: &str, title: &str, message: String, wallet_tx_id: Option<Uuid>) -> Self {
        Self {
            kind: kind.to_string(),
            title: title.to_string(),
            message,
            broadcast: false,
            escalate: false,
            wallet_tx_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNotification {
    pub kind: String,
    pub title: String,
    pub message: String,
    pub wallet_tx_id: Option<Uuid>,
}

impl UserNotification {
    pub fn new(kind: &str, title: &str, message: String, wallet_tx_id: Option<Uuid>) -> Self {
        Self {
            kind: kind.to_string(),
            title: title.to_string(),
            message,
            wallet_tx_id,
        }
    }
}

/// Fire-and-forget delivery. Implementations never return errors: a failed
/// notification must not undo the ledger work that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn set_admin_notification(&self, notification: AdminNotification);

    async fn set_user_notification(&self, user_id: Uuid, notification: UserNotification);
}

/// Persists notifications for the delivery workers (Telegram, Slack, push).
pub struct DbNotifier {
    db: DatabaseConnection,
}

impl DbNotifier {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn persist(&self, audience: &str, user_id: Option<Uuid>, row: NotificationRow) {
        let model = notification::ActiveModel {
            id: Set(Uuid::new_v4()),
            audience: Set(audience.to_string()),
            user_id: Set(user_id),
            kind: Set(row.kind),
            title: Set(row.title),
            message: Set(row.message),
            broadcast: Set(row.broadcast),
            escalate: Set(row.escalate),
            wallet_tx_id: Set(row.wallet_tx_id),
            created_at: Set(chrono::Utc::now()),
        };

        if let Err(e) = model.insert(&self.db).await {
            tracing::error!(audience, error = %e, "Failed to store notification");
        }
    }
}

struct NotificationRow {
    kind: String,
    title: String,
    message: String,
    broadcast: bool,
    escalate: bool,
    wallet_tx_id: Option<Uuid>,
}

#[async_trait]
impl Notifier for DbNotifier {
    async fn set_admin_notification(&self, notification: AdminNotification) {
        if notification.escalate {
            tracing::error!(
                kind = %notification.kind,
                wallet_tx_id = ?notification.wallet_tx_id,
                "{}: {}",
                notification.title,
                notification.message
            );
        } else {
            tracing::info!(kind = %notification.kind, "{}: {}", notification.title, notification.message);
        }

        self.persist("admin", None, NotificationRow {
            kind: notification.kind,
            title: notification.title,
            message: notification.message,
            broadcast: notification.broadcast,
            escalate: notification.escalate,
            wallet_tx_id: notification.wallet_tx_id,
        }).await;
    }

    async fn set_user_notification(&self, user_id: Uuid, notification: UserNotification) {
        tracing::debug!(user_id = %user_id, kind = %notification.kind, "User notification");

        self.persist("user", Some(user_id), NotificationRow {
            kind: notification.kind,
            title: notification.title,
            message: notification.message,
            broadcast: false,
            escalate: false,
            wallet_tx_id: notification.wallet_tx_id,
        }).await;
    }
}
