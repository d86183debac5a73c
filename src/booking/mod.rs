//! 订票后端：客户端抽象与实现（SRT / Mock）

pub mod mock;
pub mod srt;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use mock::{sample_candidate, MockBookingClient};
pub use srt::SrtClient;
pub use traits::{
    BookingClient, BookingError, BookingSession, Candidate, Credentials, Reservation, SearchQuery,
    StandbyOptions,
};

use crate::config::BookingSection;

/// 按配置创建后端：provider = "mock" 时使用演示客户端，否则连 SRT
pub fn create_booking_client(cfg: &BookingSection) -> Arc<dyn BookingClient> {
    match cfg.provider.as_str() {
        "mock" => {
            tracing::warn!("booking provider is mock, no real reservation will be made");
            Arc::new(MockBookingClient::demo())
        }
        _ => Arc::new(SrtClient::new(
            cfg.base_url.as_deref(),
            Duration::from_secs(cfg.request_timeout_secs),
        )),
    }
}
