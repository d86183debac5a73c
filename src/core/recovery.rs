//! 错误分类与恢复引擎
//!
//! 远端错误只有人类可读文本，按标记子串表做三路分类（过载 / 凭据 / 其它），
//! 再由 RecoveryEngine 映射为 Worker 可执行的动作。标记文本来自 SRT 的韩文提示，
//! 这是脆弱的启发式：后端文案变化时需要更新 MARKERS。

use std::time::Duration;

use crate::booking::BookingError;
use crate::core::events::Sentinel;

/// 失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// 用户过多，稍后重试
    Overloaded,
    /// 账号 / 密码问题，终止并提示重新输入
    Credential,
    /// 明确的严重错误，终止
    Critical,
    /// 其它错误：轮询阶段较长等待后重试，单个车次则跳过
    Other,
}

/// 类别 → 标记子串（小写比较）。表内顺序即优先级：凭据 > 过载 > 严重
const MARKERS: &[(FailureClass, &[&str])] = &[
    (
        FailureClass::Credential,
        &["비밀번호", "존재하지않는 회원", "password", "credential"],
    ),
    (
        FailureClass::Overloaded,
        &["사용자가 많아", "too many users"],
    ),
    (FailureClass::Critical, &["심각한 오류", "critical"]),
];

/// 按文本分类
pub fn classify_text(text: &str) -> FailureClass {
    let lower = text.to_lowercase();
    MARKERS
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| lower.contains(m)))
        .map(|(class, _)| *class)
        .unwrap_or(FailureClass::Other)
}

/// 结构化的登录失败直接视为凭据错误，其余按文本分类
pub fn classify(err: &BookingError) -> FailureClass {
    match err {
        BookingError::Auth(_) => FailureClass::Credential,
        other => classify_text(&other.to_string()),
    }
}

/// 查询失败后的恢复动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 等待后重新登录并回到轮询
    Reconnect { after: Duration, notify: bool },
    /// 终止 Worker，推送哨兵
    Escalate(Sentinel),
}

/// 把失败类别映射为动作
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    overload_backoff: Duration,
    error_backoff: Duration,
}

impl RecoveryEngine {
    pub fn new(overload_backoff: Duration, error_backoff: Duration) -> Self {
        Self {
            overload_backoff,
            error_backoff,
        }
    }

    fn escalation(class: FailureClass) -> Sentinel {
        match class {
            FailureClass::Credential => Sentinel::PasswordError,
            _ => Sentinel::CriticalError,
        }
    }

    /// 查询阶段整体失败
    pub fn on_search_failure(&self, class: FailureClass) -> RecoveryAction {
        match class {
            FailureClass::Overloaded => RecoveryAction::Reconnect {
                after: self.overload_backoff,
                notify: false,
            },
            FailureClass::Other => RecoveryAction::Reconnect {
                after: self.error_backoff,
                notify: true,
            },
            FailureClass::Credential | FailureClass::Critical => {
                RecoveryAction::Escalate(Self::escalation(class))
            }
        }
    }

    /// 单个车次预约失败：返回 None 时继续下一个车次，否则以该哨兵终止
    pub fn on_candidate_failure(&self, class: FailureClass) -> Option<Sentinel> {
        match class {
            FailureClass::Credential | FailureClass::Critical => Some(Self::escalation(class)),
            FailureClass::Overloaded | FailureClass::Other => None,
        }
    }

    /// 登录（含重新登录）失败一律终止
    pub fn on_auth_failure(&self, class: FailureClass) -> Sentinel {
        Self::escalation(class)
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(10))
    }
}
