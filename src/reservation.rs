//! 预约请求：表单解析与校验
//!
//! ReservationForm 对应页面表单字段；校验通过后得到不可变的 ReservationRequest，
//! 交给 Worker 后不再修改。空的账号 / Telegram 字段回落到配置中的默认值。

use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::booking::srt::station_code;
use crate::booking::{Credentials, SearchQuery};
use crate::config::AppConfig;

/// 页面上选择「直接输入」时站名下拉框的值
pub const DIRECT_STATION: &str = "direct";

/// 表单校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("missing SRT credentials")]
    MissingCredentials,

    #[error("unknown station: {0}")]
    UnknownStation(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid time: {0}")]
    InvalidTime(String),

    #[error("time window start {start} is after end {end}")]
    InvalidWindow { start: String, end: String },

    #[error("invalid phone number: {0}")]
    InvalidPhone(String),
}

/// Telegram 通知偏好
#[derive(Clone, Default, PartialEq, Eq)]
pub struct NotificationPrefs {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: String,
}

impl fmt::Debug for NotificationPrefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationPrefs")
            .field("enabled", &self.enabled)
            .field("bot_token", &if self.bot_token.is_empty() { "" } else { "***" })
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// 校验后的预约请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub credentials: Credentials,
    pub departure: String,
    pub arrival: String,
    /// YYYYMMDD
    pub date: String,
    /// HHMMSS
    pub time_start: String,
    /// HHMMSS
    pub time_end: String,
    /// 010-1234-5678
    pub phone_number: String,
    pub notification: NotificationPrefs,
}

impl ReservationRequest {
    pub fn search_query(&self) -> SearchQuery {
        SearchQuery {
            departure: self.departure.clone(),
            arrival: self.arrival.clone(),
            date: self.date.clone(),
            time_start: self.time_start.clone(),
            time_end: self.time_end.clone(),
        }
    }

    /// 日志用摘要（不含凭据）
    pub fn summary(&self) -> String {
        format!(
            "{}→{} {} {}~{}",
            self.departure, self.arrival, self.date, self.time_start, self.time_end
        )
    }
}

/// 表单缺省值（来自配置）
#[derive(Debug, Clone, Default)]
pub struct RequestDefaults {
    pub srt_id: String,
    pub srt_password: String,
    pub phone_number: String,
    pub bot_token: String,
    pub chat_id: String,
}

impl From<&AppConfig> for RequestDefaults {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            srt_id: cfg.srt.id.clone(),
            srt_password: cfg.srt.password.clone(),
            phone_number: cfg.srt.phone_number.clone(),
            bot_token: cfg.telegram.bot_token.clone(),
            chat_id: cfg.telegram.chat_id.clone(),
        }
    }
}

/// 页面表单
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReservationForm {
    pub sid: Option<String>,
    pub spw: Option<String>,
    pub dep_station: String,
    pub arr_station: String,
    #[serde(rename = "customDepStation")]
    pub custom_dep_station: Option<String>,
    #[serde(rename = "customArrStation")]
    pub custom_arr_station: Option<String>,
    /// YYYY-MM-DD
    pub date: String,
    pub start_hour: String,
    pub start_minute: String,
    pub end_hour: String,
    pub end_minute: String,
    pub phone_part1: String,
    pub phone_part2: String,
    pub phone_part3: String,
    /// 复选框：出现即启用
    pub enable_telegram: Option<String>,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn station(selected: &str, custom: Option<&str>, field: &'static str) -> Result<String, RequestError> {
    let name = if selected.trim() == DIRECT_STATION {
        non_empty(custom)
    } else {
        non_empty(Some(selected))
    };
    let name = name.ok_or(RequestError::MissingField(field))?;
    if station_code(&name).is_none() {
        return Err(RequestError::UnknownStation(name));
    }
    Ok(name)
}

fn parse_date(date: &str) -> Result<String, RequestError> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map(|d| d.format("%Y%m%d").to_string())
        .map_err(|_| RequestError::InvalidDate(date.to_string()))
}

/// 小时 + 分钟 → HHMM00
fn parse_time(hour: &str, minute: &str) -> Result<String, RequestError> {
    let invalid = || RequestError::InvalidTime(format!("{hour}:{minute}"));
    let h: u32 = hour.trim().parse().map_err(|_| invalid())?;
    let m: u32 = minute.trim().parse().map_err(|_| invalid())?;
    if h > 23 || m > 59 {
        return Err(invalid());
    }
    Ok(format!("{h:02}{m:02}00"))
}

static PHONE_RE: OnceLock<Regex> = OnceLock::new();

fn parse_phone(a: &str, b: &str, c: &str) -> Result<String, RequestError> {
    let phone = format!("{}-{}-{}", a.trim(), b.trim(), c.trim());
    let re = PHONE_RE.get_or_init(|| Regex::new(r"^0\d{1,2}-\d{3,4}-\d{4}$").unwrap());
    if re.is_match(&phone) {
        Ok(phone)
    } else {
        Err(RequestError::InvalidPhone(phone))
    }
}

impl ReservationForm {
    /// 校验并转换为预约请求
    pub fn into_request(self, defaults: &RequestDefaults) -> Result<ReservationRequest, RequestError> {
        let id = non_empty(self.sid.as_deref()).unwrap_or_else(|| defaults.srt_id.clone());
        let password = non_empty(self.spw.as_deref()).unwrap_or_else(|| defaults.srt_password.clone());
        if id.is_empty() || password.is_empty() {
            return Err(RequestError::MissingCredentials);
        }

        let departure = station(&self.dep_station, self.custom_dep_station.as_deref(), "dep_station")?;
        let arrival = station(&self.arr_station, self.custom_arr_station.as_deref(), "arr_station")?;
        let date = parse_date(&self.date)?;
        let time_start = parse_time(&self.start_hour, &self.start_minute)?;
        let time_end = parse_time(&self.end_hour, &self.end_minute)?;
        if time_start > time_end {
            return Err(RequestError::InvalidWindow {
                start: time_start,
                end: time_end,
            });
        }

        let all_phone_parts_empty = [&self.phone_part1, &self.phone_part2, &self.phone_part3]
            .iter()
            .all(|p| p.trim().is_empty());
        let phone_number = if all_phone_parts_empty && !defaults.phone_number.is_empty() {
            defaults.phone_number.clone()
        } else {
            parse_phone(&self.phone_part1, &self.phone_part2, &self.phone_part3)?
        };

        let notification = NotificationPrefs {
            enabled: self.enable_telegram.is_some(),
            bot_token: non_empty(self.bot_token.as_deref())
                .unwrap_or_else(|| defaults.bot_token.clone()),
            chat_id: non_empty(self.chat_id.as_deref()).unwrap_or_else(|| defaults.chat_id.clone()),
        };

        Ok(ReservationRequest {
            credentials: Credentials::new(id, password),
            departure,
            arrival,
            date,
            time_start,
            time_end,
            phone_number,
            notification,
        })
    }
}
