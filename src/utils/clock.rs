use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use tokio::time::Instant;

/// Represents an entity responsible for providing dates across application. This can allow it to
/// be used for testing
#[async_trait]
pub trait Clock: Sync + Send + 'static {
    /// Local wall-clock time. Used for the dates and times shown to the user and stored with a
    /// session.
    fn time(&self) -> NaiveDateTime;

    /// Monotonic time. Elapsed time is always measured with this one.
    fn instant(&self) -> Instant;

    async fn sleep_until(&self, instant: tokio::time::Instant);
}

pub struct DefaultClock;

#[async_trait]
impl Clock for DefaultClock {
    fn time(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, instant: tokio::time::Instant) {
        tokio::time::sleep_until(instant).await;
    }
}

/// Clock whose wall time starts at a fixed moment and then follows tokio's clock, so paused tests
/// can move both with `tokio::time::advance`.
#[cfg(test)]
#[derive(Clone)]
pub struct TestClock {
    pub start_time: NaiveDateTime,
    pub reference: Instant,
}

#[cfg(test)]
impl TestClock {
    pub fn starting_at(start_time: NaiveDateTime) -> Self {
        Self {
            start_time,
            reference: Instant::now(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Clock for TestClock {
    fn time(&self) -> NaiveDateTime {
        self.start_time
            + chrono::Duration::from_std(self.reference.elapsed())
                .expect("test durations are small")
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, instant: tokio::time::Instant) {
        tokio::time::sleep_until(instant).await;
    }
}
