use tokio::time::{Duration, Instant};

/// Clock is the timer tasks' only source of time, so tests can swap in a mock and
/// drive timers deterministically.
#[async_trait::async_trait]
pub(crate) trait Clock: Clone {
    fn now(&self) -> Instant;
    async fn sleep_until(&mut self, deadline: Instant);

    async fn sleep(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }
}

#[derive(Copy, Clone)]
pub(crate) struct TokioClock;

#[async_trait::async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
pub(crate) use mock::{manual_clock, ManualClock, ManualClockDriver};


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn manual_clock_releases_sleepers_in_step() {
        let tick = Duration::from_millis(250);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let (mut clock, mut driver) = manual_clock();
        let start = clock.now();

        tokio::spawn(async move {
            let mut next_wake = start;
            loop {
                next_wake += tick;
                clock.sleep_until(next_wake).await;
                if tx.send(()).is_err() {
                    return;
                }
            }
        });

        // Nothing fires until time moves.
        tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect_err("expected timeout");

        driver.advance(tick);
        rx.recv().await.unwrap();

        // A large leap releases every tick it covers.
        driver.advance(tick * 3);
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect_err("expected timeout");

        assert_eq!(driver.elapsed(), tick * 4);
    }
}
