use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use notesync::domain::ports::time_service::TimeService;
use std::sync::Mutex;
use std::time::Duration;

/// Clock that only moves when told to. `sleep` returns almost at once so
/// loops keep turning in tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }
}

#[async_trait]
impl TimeService for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, _duration: Duration) {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
