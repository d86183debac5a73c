//! Telegram 通知
//!
//! 通过 Bot API `sendMessage` 推送预约结果与致命错误。只有 bot_token 与
//! chat_id 都非空时才会创建通知器；发送失败只记录日志，不影响 Worker。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::integrations::Notifier;
use crate::reservation::NotificationPrefs;

pub const TELEGRAM_API: &str = "https://api.telegram.org";

/// 消息格式："SRTrain Rev \n{消息} \n@{时间}"
pub fn format_message(message: &str, at: DateTime<Local>) -> String {
    format!(
        "SRTrain Rev \n{} \n@{}",
        message,
        at.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Telegram Bot 通知器
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    base_url: String,
    http: reqwest::Client,
}

impl TelegramNotifier {
    /// token 或 chat_id 为空时返回 None
    pub fn new(bot_token: &str, chat_id: &str) -> Option<Self> {
        let bot_token = bot_token.trim();
        let chat_id = chat_id.trim();
        if bot_token.is_empty() || chat_id.is_empty() {
            return None;
        }
        Some(Self {
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            base_url: TELEGRAM_API.to_string(),
            http: reqwest::Client::new(),
        })
    }

    /// 按用户偏好创建；未启用通知时返回 None
    pub fn from_prefs(prefs: &NotificationPrefs) -> Option<Self> {
        if !prefs.enabled {
            return None;
        }
        Self::new(&prefs.bot_token, &prefs.chat_id)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.bot_token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        let payload = [
            ("chat_id", self.chat_id.clone()),
            ("text", format_message(text, Local::now())),
        ];
        let resp = self.http.post(self.endpoint()).form(&payload).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("Telegram API error: status {}", resp.status());
        }
        tracing::info!("telegram message sent to chat {}", self.chat_id);
        Ok(())
    }
}

/// 默认工厂：按请求里的通知偏好创建 Telegram 通知器
pub fn telegram_factory() -> super::NotifierFactory {
    Arc::new(|prefs: &NotificationPrefs| {
        TelegramNotifier::from_prefs(prefs).map(|n| Arc::new(n) as Arc<dyn Notifier>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_message() {
        let at = Local.with_ymd_and_hms(2024, 3, 15, 8, 30, 5).unwrap();
        assert_eq!(
            format_message("SRT 예약 대기 완료", at),
            "SRTrain Rev \nSRT 예약 대기 완료 \n@2024-03-15 08:30:05"
        );
    }

    #[test]
    fn test_requires_token_and_chat() {
        assert!(TelegramNotifier::new("", "123").is_none());
        assert!(TelegramNotifier::new("token", "  ").is_none());
        let n = TelegramNotifier::new("token", "123").unwrap();
        assert_eq!(n.endpoint(), "https://api.telegram.org/bottoken/sendMessage");
        let n = n.with_base_url("http://127.0.0.1:9/");
        assert_eq!(n.endpoint(), "http://127.0.0.1:9/bottoken/sendMessage");
    }

    #[test]
    fn test_disabled_prefs_build_nothing() {
        let prefs = NotificationPrefs {
            enabled: false,
            bot_token: "token".into(),
            chat_id: "123".into(),
        };
        assert!(TelegramNotifier::from_prefs(&prefs).is_none());
        let prefs = NotificationPrefs {
            enabled: true,
            ..prefs
        };
        assert!(TelegramNotifier::from_prefs(&prefs).is_some());
        assert!(telegram_factory()(&prefs).is_some());
    }
}
