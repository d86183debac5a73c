//! 外部通知集成
//!
//! - **telegram**: Telegram Bot 消息推送

pub mod telegram;

use std::sync::Arc;

use async_trait::async_trait;

use crate::reservation::NotificationPrefs;

pub use telegram::{telegram_factory, TelegramNotifier};

/// 通知出口：尽力而为，失败由调用方记录
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> anyhow::Result<()>;
}

/// 根据请求的通知偏好创建通知器；返回 None 表示不通知
pub type NotifierFactory = Arc<dyn Fn(&NotificationPrefs) -> Option<Arc<dyn Notifier>> + Send + Sync>;

/// 从不通知的工厂
pub fn disabled_factory() -> NotifierFactory {
    Arc::new(|_: &NotificationPrefs| -> Option<Arc<dyn Notifier>> { None })
}

/// 后台发送，不阻塞调用方
pub fn spawn_notify(notifier: Arc<dyn Notifier>, text: String) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&text).await {
            tracing::warn!("notification failed: {}", e);
        }
    });
}
