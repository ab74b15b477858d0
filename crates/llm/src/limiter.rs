use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;

/// Per-UTC-day call ceiling shared by every clone of a client.
#[derive(Debug)]
pub struct DailyLimiter {
    limit: u32,
    state: Mutex<(NaiveDate, u32)>,
}

impl DailyLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            state: Mutex::new((Utc::now().date_naive(), 0)),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_on(Utc::now().date_naive())
    }

    fn try_acquire_on(&self, today: NaiveDate) -> bool {
        let mut state = self.state.lock();
        if state.0 != today {
            *state = (today, 0);
        }
        if self.limit > 0 && state.1 >= self.limit {
            return false;
        }
        state.1 += 1;
        true
    }

    pub fn calls_today(&self) -> u32 {
        self.state.lock().1
    }
}
