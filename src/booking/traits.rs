//! 订票后端抽象
//!
//! BookingClient 负责登录并返回 BookingSession；会话上提供查询、候补预约、
//! 候补选项设置与登出。所有后端（SRT / Mock）都实现这两个 trait。

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// 订票后端错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// 账号或密码被拒绝
    #[error("authentication failed: {0}")]
    Auth(String),

    /// 响应无法解析（对应 "Expecting value" 一类错误）
    #[error("malformed response: {0}")]
    Parse(String),

    /// 后端返回的业务错误，保留原始提示文本
    #[error("{0}")]
    Remote(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for BookingError {
    fn from(e: reqwest::Error) -> Self {
        BookingError::Transport(e.to_string())
    }
}

/// 登录凭据
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub id: String,
    pub password: String,
}

impl Credentials {
    pub fn new(id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("id", &self.id)
            .field("password", &"***")
            .finish()
    }
}

/// 车次查询条件（日期 YYYYMMDD，时间 HHMMSS）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub departure: String,
    pub arrival: String,
    pub date: String,
    pub time_start: String,
    pub time_end: String,
}

/// 查询返回的一个车次
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// 列车种类代码（SRT 为 17）
    pub train_code: String,
    pub train_number: String,
    pub dep_date: String,
    pub dep_time: String,
    pub dep_station_code: String,
    pub dep_station_name: String,
    pub arr_date: String,
    pub arr_time: String,
    pub arr_station_code: String,
    pub arr_station_name: String,
    /// 一般室余票状态文本
    pub general_seat_state: String,
    /// 特室余票状态文本
    pub special_seat_state: String,
    /// 候补可否代码（含 "9" 表示可候补）
    pub standby_code: String,
}

impl Candidate {
    pub fn standby_available(&self) -> bool {
        self.standby_code.contains('9')
    }
}

fn hhmm(time: &str) -> String {
    match (time.get(0..2), time.get(2..4)) {
        (Some(h), Some(m)) => format!("{h}:{m}"),
        _ => time.to_string(),
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let month = self.dep_date.get(4..6).unwrap_or("--");
        let day = self.dep_date.get(6..8).unwrap_or("--");
        let standby = if self.standby_available() {
            "예약대기 가능"
        } else {
            "예약대기 불가"
        };
        write!(
            f,
            "[SRT {}] {}월 {}일, {}~{}({}~{}) 특실 {}, 일반실 {}, {}",
            self.train_number,
            month,
            day,
            self.dep_station_name,
            self.arr_station_name,
            hhmm(&self.dep_time),
            hhmm(&self.arr_time),
            self.special_seat_state,
            self.general_seat_state,
            standby
        )
    }
}

/// 候补预约结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reservation {
    /// 预约号（pnrNo）
    pub number: String,
    pub train_number: String,
}

/// 候补选项：短信通知 / 接受舱位变更
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandbyOptions {
    pub sms: bool,
    pub class_change: bool,
}

impl Default for StandbyOptions {
    fn default() -> Self {
        Self {
            sms: true,
            class_change: true,
        }
    }
}

/// 订票后端：登录得到会话
#[async_trait]
pub trait BookingClient: Send + Sync {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn BookingSession>, BookingError>;
}

/// 已登录的会话
#[async_trait]
pub trait BookingSession: Send + Sync {
    /// 按返回顺序给出候选车次
    async fn search_candidates(&self, query: &SearchQuery) -> Result<Vec<Candidate>, BookingError>;

    async fn reserve_standby(&self, candidate: &Candidate) -> Result<Reservation, BookingError>;

    async fn configure_options(
        &self,
        reservation: &Reservation,
        phone_number: &str,
        options: StandbyOptions,
    ) -> Result<(), BookingError>;

    /// 尽力登出，调用方只记录失败
    async fn logout(&self) -> Result<(), BookingError>;
}
