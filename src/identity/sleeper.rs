use std::time::Duration;

/// Delay between probe attempts.
pub trait Sleeper {
    fn pause(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Waits on the tokio timer.
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}
