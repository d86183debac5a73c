//! Mock 订票后端（用于测试与本地演示，无需真实账号）
//!
//! 按脚本依次返回登录 / 查询 / 预约结果；脚本耗尽后使用默认结果，
//! 并记录每类调用的次数，便于断言 Worker 行为。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::booking::{
    BookingClient, BookingError, BookingSession, Candidate, Credentials, Reservation, SearchQuery,
    StandbyOptions,
};

#[derive(Debug, Default)]
struct Script {
    auth: Mutex<VecDeque<Result<(), BookingError>>>,
    searches: Mutex<VecDeque<Result<Vec<Candidate>, BookingError>>>,
    reserves: Mutex<VecDeque<Result<(), BookingError>>>,
    fallback_candidates: Mutex<Vec<Candidate>>,
    logins: AtomicUsize,
    logouts: AtomicUsize,
    search_calls: AtomicUsize,
    option_calls: AtomicUsize,
    reserve_calls: Mutex<Vec<String>>,
}

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().ok().and_then(|mut q| q.pop_front())
}

fn push<T>(queue: &Mutex<VecDeque<T>>, item: T) {
    if let Ok(mut q) = queue.lock() {
        q.push_back(item);
    }
}

/// 可编排脚本的 Mock 客户端；clone 后共享同一份脚本与计数
#[derive(Debug, Clone, Default)]
pub struct MockBookingClient {
    script: Arc<Script>,
}

impl MockBookingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 演示用：每次查询都返回一个可候补车次，预约总是成功
    pub fn demo() -> Self {
        Self::new().with_fallback_candidates(vec![sample_candidate("301"), sample_candidate("305")])
    }

    /// 脚本耗尽后查询返回的车次
    pub fn with_fallback_candidates(self, candidates: Vec<Candidate>) -> Self {
        if let Ok(mut slot) = self.script.fallback_candidates.lock() {
            *slot = candidates;
        }
        self
    }

    pub fn push_auth(self, result: Result<(), BookingError>) -> Self {
        push(&self.script.auth, result);
        self
    }

    pub fn push_search(self, result: Result<Vec<Candidate>, BookingError>) -> Self {
        push(&self.script.searches, result);
        self
    }

    pub fn push_reserve(self, result: Result<(), BookingError>) -> Self {
        push(&self.script.reserves, result);
        self
    }

    pub fn logins(&self) -> usize {
        self.script.logins.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.script.logouts.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.script.search_calls.load(Ordering::SeqCst)
    }

    pub fn option_calls(&self) -> usize {
        self.script.option_calls.load(Ordering::SeqCst)
    }

    /// 已尝试预约的车次号（按调用顺序）
    pub fn reserve_calls(&self) -> Vec<String> {
        self.script
            .reserve_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BookingClient for MockBookingClient {
    async fn authenticate(
        &self,
        _credentials: &Credentials,
    ) -> Result<Box<dyn BookingSession>, BookingError> {
        self.script.logins.fetch_add(1, Ordering::SeqCst);
        pop(&self.script.auth).unwrap_or(Ok(()))?;
        Ok(Box::new(MockSession {
            script: Arc::clone(&self.script),
        }))
    }
}

struct MockSession {
    script: Arc<Script>,
}

#[async_trait]
impl BookingSession for MockSession {
    async fn search_candidates(&self, _query: &SearchQuery) -> Result<Vec<Candidate>, BookingError> {
        self.script.search_calls.fetch_add(1, Ordering::SeqCst);
        match pop(&self.script.searches) {
            Some(result) => result,
            None => Ok(self
                .script
                .fallback_candidates
                .lock()
                .map(|c| c.clone())
                .unwrap_or_default()),
        }
    }

    async fn reserve_standby(&self, candidate: &Candidate) -> Result<Reservation, BookingError> {
        if let Ok(mut calls) = self.script.reserve_calls.lock() {
            calls.push(candidate.train_number.clone());
        }
        pop(&self.script.reserves).unwrap_or(Ok(()))?;
        Ok(Reservation {
            number: format!("MOCK-{}", candidate.train_number),
            train_number: candidate.train_number.clone(),
        })
    }

    async fn configure_options(
        &self,
        _reservation: &Reservation,
        _phone_number: &str,
        _options: StandbyOptions,
    ) -> Result<(), BookingError> {
        self.script.option_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> Result<(), BookingError> {
        self.script.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 构造一个水西（수서）→釜山方向的示例车次
pub fn sample_candidate(train_number: &str) -> Candidate {
    Candidate {
        train_code: "17".to_string(),
        train_number: train_number.to_string(),
        dep_date: "20240315".to_string(),
        dep_time: "080000".to_string(),
        dep_station_code: "0551".to_string(),
        dep_station_name: "수서".to_string(),
        arr_date: "20240315".to_string(),
        arr_time: "103000".to_string(),
        arr_station_code: "0020".to_string(),
        arr_station_name: "부산".to_string(),
        general_seat_state: "매진".to_string(),
        special_seat_state: "매진".to_string(),
        standby_code: "9".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> SearchQuery {
        SearchQuery {
            departure: "수서".into(),
            arrival: "부산".into(),
            date: "20240315".into(),
            time_start: "080000".into(),
            time_end: "120000".into(),
        }
    }

    #[tokio::test]
    async fn test_script_then_fallback() {
        let client = MockBookingClient::new()
            .push_search(Err(BookingError::Parse("Expecting value".into())))
            .with_fallback_candidates(vec![sample_candidate("301")]);
        let session = client
            .authenticate(&Credentials::new("id", "pw"))
            .await
            .unwrap();

        assert!(session.search_candidates(&query()).await.is_err());
        let found = session.search_candidates(&query()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(client.search_calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_auth_failure() {
        let client = MockBookingClient::new().push_auth(Err(BookingError::Auth("비밀번호 오류".into())));
        assert!(client.authenticate(&Credentials::new("id", "pw")).await.is_err());
        assert!(client.authenticate(&Credentials::new("id", "pw")).await.is_ok());
        assert_eq!(client.logins(), 2);
    }

    #[tokio::test]
    async fn test_records_reserve_attempts() {
        let client = MockBookingClient::new().push_reserve(Err(BookingError::Remote("잔여석 없음".into())));
        let session = client
            .authenticate(&Credentials::new("id", "pw"))
            .await
            .unwrap();

        assert!(session.reserve_standby(&sample_candidate("301")).await.is_err());
        let reservation = session.reserve_standby(&sample_candidate("305")).await.unwrap();
        assert_eq!(reservation.number, "MOCK-305");
        assert_eq!(client.reserve_calls(), vec!["301", "305"]);

        session.logout().await.unwrap();
        assert_eq!(client.logouts(), 1);
    }
}
