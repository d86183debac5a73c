//! SRT 移动端接口客户端
//!
//! - Base URL: https://app.srail.or.kr:443
//! - 表单提交、JSON 响应；登录态保存在每个会话独立的 cookie store 中
//! - 登录方式由账号形态决定：邮箱 / 手机号 / 会员号

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::booking::{
    BookingClient, BookingError, BookingSession, Candidate, Credentials, Reservation, SearchQuery,
    StandbyOptions,
};

pub const SRT_MOBILE: &str = "https://app.srail.or.kr:443";

const USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 5.1.1; LGM-V300K Build/N2G47H) \
AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/39.0.0.0 Mobile Safari/537.36SRT-APP-Android V.1.0.6";

const MAIN: &str = "/main/main.do";
const LOGIN: &str = "/apb/selectListApb01080_n.do";
const LOGOUT: &str = "/login/loginOut.do";
const SEARCH: &str = "/ara/selectListAra10007_n.do";
const RESERVE: &str = "/arc/selectListArc05013_n.do";
const STANDBY_OPTION: &str = "/ata/selectListAta01135_n.do";

/// SRT 列车种类代码
const SRT_TRAIN_CODE: &str = "17";
/// 候补预约的 jobId
const JOB_STANDBY: &str = "1102";

/// 车站名 → SRT 车站代码
const STATIONS: &[(&str, &str)] = &[
    ("수서", "0551"),
    ("동탄", "0552"),
    ("평택지제", "0553"),
    ("천안아산", "0502"),
    ("오송", "0297"),
    ("대전", "0010"),
    ("김천(구미)", "0507"),
    ("동대구", "0015"),
    ("신경주", "0508"),
    ("울산(통도사)", "0509"),
    ("부산", "0020"),
    ("공주", "0514"),
    ("익산", "0030"),
    ("정읍", "0033"),
    ("광주송정", "0036"),
    ("나주", "0037"),
    ("목포", "0041"),
];

pub fn station_code(name: &str) -> Option<&'static str> {
    STATIONS
        .iter()
        .find(|(n, _)| *n == name.trim())
        .map(|(_, code)| *code)
}

pub fn station_name(code: &str) -> &str {
    STATIONS
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(n, _)| *n)
        .unwrap_or(code)
}

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
static PHONE_RE: OnceLock<Regex> = OnceLock::new();

/// 登录方式代码：1 会员号，2 邮箱，3 手机号
pub fn login_type(id: &str) -> &'static str {
    let email = EMAIL_RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());
    let phone = PHONE_RE.get_or_init(|| Regex::new(r"^01\d-?\d{3,4}-?\d{4}$").unwrap());
    if email.is_match(id) {
        "2"
    } else if phone.is_match(id) {
        "3"
    } else {
        "1"
    }
}

/// 解析 JSON 响应；非 JSON 视为解析错误
fn parse_body(text: &str) -> Result<Value, BookingError> {
    serde_json::from_str(text).map_err(|e| BookingError::Parse(format!("Expecting value: {e}")))
}

/// resultMap[0] 的 strResult / msgTxt
fn check_result(body: &Value) -> Result<(), BookingError> {
    let result = &body["resultMap"][0];
    if result["strResult"].as_str() == Some("SUCC") {
        return Ok(());
    }
    let msg = result["msgTxt"]
        .as_str()
        .or_else(|| body["MSG"].as_str())
        .unwrap_or("알 수 없는 오류");
    Err(BookingError::Remote(msg.to_string()))
}

fn field(row: &Value, key: &str) -> String {
    match &row[key] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// 从查询响应中取出候选车次：只保留 SRT 且在时间窗口内的车次
pub fn parse_candidates(body: &Value, time_end: &str) -> Result<Vec<Candidate>, BookingError> {
    if let Err(BookingError::Remote(msg)) = check_result(body) {
        if msg.contains("조회 결과가 없습니다") {
            return Ok(Vec::new());
        }
        return Err(BookingError::Remote(msg));
    }
    let rows = body["outDataSets"]["dsOutput1"]
        .as_array()
        .ok_or_else(|| BookingError::Parse("missing outDataSets.dsOutput1".to_string()))?;

    Ok(rows
        .iter()
        .filter(|row| field(row, "stlbTrnClsfCd") == SRT_TRAIN_CODE)
        .map(|row| {
            let dep_code = field(row, "dptRsStnCd");
            let arr_code = field(row, "arvRsStnCd");
            Candidate {
                train_code: field(row, "stlbTrnClsfCd"),
                train_number: field(row, "trnNo"),
                dep_date: field(row, "dptDt"),
                dep_time: field(row, "dptTm"),
                dep_station_name: station_name(&dep_code).to_string(),
                dep_station_code: dep_code,
                arr_date: field(row, "arvDt"),
                arr_time: field(row, "arvTm"),
                arr_station_name: station_name(&arr_code).to_string(),
                arr_station_code: arr_code,
                general_seat_state: field(row, "gnrmRsvPsbStr"),
                special_seat_state: field(row, "sprmRsvPsbStr"),
                standby_code: field(row, "rsvWaitPsbCd"),
            }
        })
        .filter(|c| time_end.is_empty() || c.dep_time.as_str() <= time_end)
        .collect())
}

/// SRT 客户端：每次登录创建独立的 HTTP 客户端（cookie 隔离）
#[derive(Debug, Clone)]
pub struct SrtClient {
    base_url: String,
    timeout: Duration,
}

impl SrtClient {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(SRT_MOBILE)
                .trim_end_matches('/')
                .to_string(),
            timeout,
        }
    }
}

impl Default for SrtClient {
    fn default() -> Self {
        Self::new(None, Duration::from_secs(30))
    }
}

#[async_trait]
impl BookingClient for SrtClient {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn BookingSession>, BookingError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .build()?;

        let kind = login_type(&credentials.id);
        let id = if kind == "3" {
            credentials.id.replace('-', "")
        } else {
            credentials.id.clone()
        };
        let referer = format!("{}{}", self.base_url, MAIN);
        let form = [
            ("auto", "Y"),
            ("check", "Y"),
            ("page", "menu"),
            ("deviceKey", "-"),
            ("customerYn", ""),
            ("login_referer", referer.as_str()),
            ("srchDvCd", kind),
            ("srchDvNm", id.as_str()),
            ("hmpgPwdCphd", credentials.password.as_str()),
        ];

        let text = http
            .post(format!("{}{}", self.base_url, LOGIN))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?
            .text()
            .await?;

        if text.contains("존재하지않는 회원입니다") || text.contains("비밀번호 오류") {
            let body = parse_body(&text).ok();
            let msg = body
                .as_ref()
                .and_then(|b| b["MSG"].as_str())
                .unwrap_or("비밀번호 오류");
            return Err(BookingError::Auth(msg.to_string()));
        }
        if text.contains("Your IP Address Blocked") {
            return Err(BookingError::Remote("Your IP Address Blocked".to_string()));
        }

        let body = parse_body(&text)?;
        let user = &body["userMap"];
        let membership_number = field(user, "MB_CRD_NO");
        if membership_number.is_empty() {
            let msg = body["MSG"].as_str().unwrap_or("로그인 응답에 회원 정보가 없습니다");
            return Err(BookingError::Remote(msg.to_string()));
        }
        tracing::info!(
            "SRT login ok: member={} name={}",
            membership_number,
            field(user, "CUST_NM")
        );

        Ok(Box::new(SrtSession {
            http,
            base_url: self.base_url.clone(),
            phone_number: field(user, "MBL_PHONE"),
        }))
    }
}

struct SrtSession {
    http: reqwest::Client,
    base_url: String,
    phone_number: String,
}

impl SrtSession {
    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Value, BookingError> {
        let text = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?
            .text()
            .await?;
        parse_body(&text)
    }
}

#[async_trait]
impl BookingSession for SrtSession {
    async fn search_candidates(&self, query: &SearchQuery) -> Result<Vec<Candidate>, BookingError> {
        let dep = station_code(&query.departure)
            .ok_or_else(|| BookingError::Remote(format!("알 수 없는 역: {}", query.departure)))?;
        let arr = station_code(&query.arrival)
            .ok_or_else(|| BookingError::Remote(format!("알 수 없는 역: {}", query.arrival)))?;
        let form = [
            ("chtnDvCd", "1"),
            ("arriveTime", "N"),
            ("seatAttCd", "015"),
            ("psgNum", "1"),
            ("trnGpCd", "109"),
            ("stlbTrnClsfCd", "05"),
            ("dptDt", query.date.as_str()),
            ("dptTm", query.time_start.as_str()),
            ("arvRsStnCd", arr),
            ("dptRsStnCd", dep),
        ];
        let body = self.post_form(SEARCH, &form).await?;
        parse_candidates(&body, &query.time_end)
    }

    async fn reserve_standby(&self, candidate: &Candidate) -> Result<Reservation, BookingError> {
        let train_number = candidate
            .train_number
            .trim()
            .parse::<u32>()
            .map(|n| format!("{n:05}"))
            .unwrap_or_else(|_| candidate.train_number.clone());
        let form = [
            ("jobId", JOB_STANDBY),
            ("jrnyCnt", "1"),
            ("jrnyTpCd", "11"),
            ("jrnySqno1", "001"),
            ("stndFlg", "N"),
            ("trnGpCd1", "300"),
            ("stlbTrnClsfCd1", candidate.train_code.as_str()),
            ("dptDt1", candidate.dep_date.as_str()),
            ("dptTm1", candidate.dep_time.as_str()),
            ("runDt1", candidate.dep_date.as_str()),
            ("trnNo1", train_number.as_str()),
            ("dptRsStnCd1", candidate.dep_station_code.as_str()),
            ("dptRsStnCdNm1", candidate.dep_station_name.as_str()),
            ("arvRsStnCd1", candidate.arr_station_code.as_str()),
            ("arvRsStnCdNm1", candidate.arr_station_name.as_str()),
            ("totPrnb", "1"),
            ("psgGridcnt", "1"),
            ("psgTpCd1", "1"),
            ("psgInfoPerPrnb1", "1"),
            ("locSeatAttCd1", "000"),
            ("rqSeatAttCd1", "015"),
            ("dirSeatAttCd1", "009"),
            ("smkSeatAttCd1", "000"),
            ("etcSeatAttCd1", "000"),
            ("psrmClCd1", "1"),
            ("mblPhone", self.phone_number.as_str()),
        ];
        let body = self.post_form(RESERVE, &form).await?;
        check_result(&body)?;
        let number = field(&body["reservListMap"][0], "pnrNo");
        if number.is_empty() {
            return Err(BookingError::Parse("missing reservListMap.pnrNo".to_string()));
        }
        Ok(Reservation {
            number,
            train_number: candidate.train_number.clone(),
        })
    }

    async fn configure_options(
        &self,
        reservation: &Reservation,
        phone_number: &str,
        options: StandbyOptions,
    ) -> Result<(), BookingError> {
        let yn = |b: bool| if b { "Y" } else { "N" };
        let tel = if options.sms { phone_number } else { "" };
        let form = [
            ("pnrNo", reservation.number.as_str()),
            ("psrmClChgFlg", yn(options.class_change)),
            ("smsSndFlg", yn(options.sms)),
            ("telNo", tel),
        ];
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, STANDBY_OPTION))
            .form(&form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BookingError::Remote(format!(
                "예약대기 옵션 설정 실패: HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn logout(&self) -> Result<(), BookingError> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, LOGOUT))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(BookingError::Transport(format!("logout HTTP {}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_login_type() {
        assert_eq!(login_type("someone@example.com"), "2");
        assert_eq!(login_type("010-1234-5678"), "3");
        assert_eq!(login_type("01012345678"), "3");
        assert_eq!(login_type("1234567890"), "1");
    }

    #[test]
    fn test_station_lookup() {
        assert_eq!(station_code("수서"), Some("0551"));
        assert_eq!(station_code(" 부산 "), Some("0020"));
        assert_eq!(station_code("서울"), None);
        assert_eq!(station_name("0015"), "동대구");
        assert_eq!(station_name("9999"), "9999");
    }

    #[test]
    fn test_parse_body_rejects_html() {
        let err = parse_body("<html>busy</html>").unwrap_err();
        assert!(matches!(err, BookingError::Parse(_)));
        assert!(err.to_string().contains("Expecting value"));
    }

    #[test]
    fn test_parse_candidates_filters_train_kind_and_window() {
        let body = json!({
            "resultMap": [{"strResult": "SUCC", "msgTxt": ""}],
            "outDataSets": {"dsOutput1": [
                {"stlbTrnClsfCd": "17", "trnNo": "301", "dptDt": "20240315", "dptTm": "080000",
                 "dptRsStnCd": "0551", "arvDt": "20240315", "arvTm": "103000", "arvRsStnCd": "0020",
                 "gnrmRsvPsbStr": "매진", "sprmRsvPsbStr": "매진", "rsvWaitPsbCd": "9"},
                {"stlbTrnClsfCd": "00", "trnNo": "101", "dptDt": "20240315", "dptTm": "081000",
                 "dptRsStnCd": "0551", "arvDt": "20240315", "arvTm": "110000", "arvRsStnCd": "0020",
                 "gnrmRsvPsbStr": "매진", "sprmRsvPsbStr": "매진", "rsvWaitPsbCd": "-1"},
                {"stlbTrnClsfCd": "17", "trnNo": "381", "dptDt": "20240315", "dptTm": "210000",
                 "dptRsStnCd": "0551", "arvDt": "20240315", "arvTm": "233000", "arvRsStnCd": "0020",
                 "gnrmRsvPsbStr": "예약가능", "sprmRsvPsbStr": "매진", "rsvWaitPsbCd": "-1"}
            ]}
        });

        let found = parse_candidates(&body, "120000").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].train_number, "301");
        assert_eq!(found[0].dep_station_name, "수서");
        assert_eq!(found[0].arr_station_name, "부산");
        assert!(found[0].standby_available());
    }

    #[test]
    fn test_parse_candidates_no_result_is_empty() {
        let body = json!({"resultMap": [{"strResult": "FAIL", "msgTxt": "조회 결과가 없습니다."}]});
        assert!(parse_candidates(&body, "").unwrap().is_empty());
    }

    #[test]
    fn test_parse_candidates_keeps_remote_message() {
        let body = json!({"resultMap": [{"strResult": "FAIL", "msgTxt": "사용자가 많아 접속이 원활하지 않습니다."}]});
        let err = parse_candidates(&body, "").unwrap_err();
        assert_eq!(
            err,
            BookingError::Remote("사용자가 많아 접속이 원활하지 않습니다.".to_string())
        );
    }
}
