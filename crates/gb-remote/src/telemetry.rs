//! Telemetry poller
//!
//! Polls accelerator memory and utilization on a fixed interval and yields
//! one [`TelemetryTick`] per poll. A failed poll is yielded inline as
//! [`TelemetryTick::Failed`]; the stream itself only ends on cancellation.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use gb_core::time::current_time_millis;
use gb_core::{Remote, TelemetrySample, TelemetryTick};

/// Per-device CSV query, one line per accelerator
pub const TELEMETRY_QUERY: &str = "nvidia-smi \
     --query-gpu=index,name,memory.used,memory.total,utilization.gpu \
     --format=csv,noheader,nounits";

/// Lower bound on the polling interval
const MIN_INTERVAL: Duration = Duration::from_millis(100);

pub struct TelemetryPoller<R: Remote + ?Sized> {
    remote: Arc<R>,
    interval: Duration,
    tick_timeout: Duration,
}

impl<R: Remote + ?Sized + 'static> TelemetryPoller<R> {
    pub fn new(remote: Arc<R>, interval: Duration, tick_timeout: Duration) -> Self {
        Self {
            remote,
            interval: interval.max(MIN_INTERVAL),
            tick_timeout,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one query, bounded by the tick timeout
    pub async fn poll_once(&self) -> TelemetryTick {
        let at = current_time_millis();
        let outcome = tokio::time::timeout(self.tick_timeout, self.remote.exec(TELEMETRY_QUERY, false))
            .await;

        let reason = match outcome {
            Ok(Ok(result)) if result.success() => match parse_samples(&result.stdout_tail, at) {
                Ok(samples) => return TelemetryTick::Samples(samples),
                Err(reason) => reason,
            },
            Ok(Ok(result)) => format!(
                "query exited with status {}: {}",
                result.exit_code,
                result.stderr_tail.trim()
            ),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("query timed out after {:?}", self.tick_timeout),
        };

        tracing::debug!("Telemetry tick failed: {}", reason);
        TelemetryTick::Failed { at, reason }
    }

    /// Unbounded tick stream that ends once `cancel` fires.
    ///
    /// The first tick is immediate. Must be called inside a tokio runtime.
    pub fn into_stream(self, cancel: CancellationToken) -> impl Stream<Item = TelemetryTick> + Send {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        stream::unfold((self, ticker, cancel), |(poller, mut ticker, cancel)| async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = ticker.tick() => {}
            }
            let tick = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                tick = poller.poll_once() => tick,
            };
            Some((tick, (poller, ticker, cancel)))
        })
    }
}

/// Parse `nvidia-smi` CSV rows into samples stamped with `timestamp`
pub fn parse_samples(output: &str, timestamp: u64) -> Result<Vec<TelemetrySample>, String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| parse_line(line, timestamp))
        .collect()
}

fn parse_line(line: &str, timestamp: u64) -> Result<TelemetrySample, String> {
    let malformed = || format!("unexpected telemetry row: {}", line);

    // Names may contain commas, so take the index from the front and the
    // three readings from the back
    let (index, rest) = line.split_once(',').ok_or_else(malformed)?;
    let mut tail = rest.rsplitn(4, ',').map(str::trim);
    let (Some(utilization), Some(mem_total), Some(mem_used), Some(name)) =
        (tail.next(), tail.next(), tail.next(), tail.next())
    else {
        return Err(malformed());
    };

    let number = |field: &str| -> Result<u64, String> {
        // Devices without a reading report "[N/A]"
        if field.contains("N/A") {
            return Ok(0);
        }
        field
            .parse::<u64>()
            .map_err(|_| format!("bad number '{}' in telemetry row: {}", field, line))
    };

    let index = index.trim();
    let device_index = index
        .parse::<u32>()
        .map_err(|_| format!("bad device index '{}' in telemetry row: {}", index, line))?;
    let utilization = u8::try_from(number(utilization)?.min(100)).map_err(|_| malformed())?;

    Ok(TelemetrySample {
        device_index,
        name: name.to_string(),
        mem_used: number(mem_used)?,
        mem_total: number(mem_total)?,
        utilization,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemote;
    use async_trait::async_trait;
    use futures::StreamExt;
    use gb_core::{ExecutionResult, GbError, RemoteTarget};
    use tokio::time::Instant;

    const TWO_GPUS: &str = "0, NVIDIA A100-SXM4-80GB, 1024, 81920, 37\n\
                            1, NVIDIA A100-SXM4-80GB, 0, 81920, 0\n";

    /// Remote whose commands never finish
    struct HangingRemote(FakeRemote);

    #[async_trait]
    impl Remote for HangingRemote {
        fn target(&self) -> &RemoteTarget {
            self.0.target()
        }

        async fn exec(&self, _command: &str, _streamed: bool) -> Result<ExecutionResult, GbError> {
            std::future::pending().await
        }

        async fn upload(&self, _remote_path: &str, _contents: Vec<u8>) -> Result<(), GbError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_parse_samples() {
        let samples = parse_samples(TWO_GPUS, 42).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].device_index, 0);
        assert_eq!(samples[0].name, "NVIDIA A100-SXM4-80GB");
        assert_eq!(samples[0].mem_used, 1024);
        assert_eq!(samples[0].mem_total, 81920);
        assert_eq!(samples[0].utilization, 37);
        assert_eq!(samples[1].timestamp, 42);
    }

    #[test]
    fn test_parse_not_available_fields() {
        let samples = parse_samples("0, Tesla T4, 10, 15360, [N/A]", 0).unwrap();
        assert_eq!(samples[0].utilization, 0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_samples("NVIDIA-SMI has failed", 0).is_err());
        assert!(parse_samples("0, Tesla T4, 10", 0).is_err());
    }

    #[test]
    fn test_parse_name_with_commas() {
        let samples = parse_samples("3, NVIDIA RTX 6000 Ada, 48GB, 512, 49140, 12", 0).unwrap();
        assert_eq!(samples[0].device_index, 3);
        assert_eq!(samples[0].name, "NVIDIA RTX 6000 Ada, 48GB");
        assert_eq!(samples[0].mem_used, 512);
        assert_eq!(samples[0].mem_total, 49140);
        assert_eq!(samples[0].utilization, 12);
    }

    #[test]
    fn test_parse_rejects_out_of_range_index() {
        let err = parse_samples("4294967296, Tesla T4, 10, 15360, 5", 0).unwrap_err();
        assert!(err.contains("device index"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_inline_and_polling_continues() {
        let remote = Arc::new(FakeRemote::new());
        remote.push_error(GbError::transport("connection reset"));
        remote.push_exit(0, TWO_GPUS, "");
        remote.push_exit(0, TWO_GPUS, "");

        let poller = TelemetryPoller::new(remote, Duration::from_secs(2), Duration::from_secs(5));
        let ticks: Vec<TelemetryTick> = poller
            .into_stream(CancellationToken::new())
            .take(3)
            .collect()
            .await;

        assert!(ticks[0].is_failure());
        for tick in &ticks[1..] {
            match tick {
                TelemetryTick::Samples(samples) => assert_eq!(samples.len(), 2),
                other => panic!("expected samples, got {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_interval() {
        let remote = Arc::new(FakeRemote::new());
        let poller = TelemetryPoller::new(remote, Duration::from_secs(2), Duration::from_secs(5));

        let start = Instant::now();
        let ticks: Vec<TelemetryTick> = poller
            .into_stream(CancellationToken::new())
            .take(3)
            .collect()
            .await;

        assert_eq!(ticks.len(), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(4));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_query_times_out() {
        let remote = Arc::new(HangingRemote(FakeRemote::new()));
        let poller = TelemetryPoller::new(remote, Duration::from_secs(2), Duration::from_secs(1));

        match poller.poll_once().await {
            TelemetryTick::Failed { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_ends_stream_within_one_tick() {
        let remote = Arc::new(FakeRemote::new());
        let poller = TelemetryPoller::new(remote, Duration::from_secs(2), Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let ticks: Vec<TelemetryTick> = poller.into_stream(cancel).collect().await;

        // ticks at 0s and 2s, cancelled at 3s
        assert_eq!(ticks.len(), 2);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_hung_tick() {
        let remote = Arc::new(HangingRemote(FakeRemote::new()));
        let poller = TelemetryPoller::new(remote, Duration::from_secs(2), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let ticks: Vec<TelemetryTick> = poller.into_stream(cancel).collect().await;
        assert!(ticks.is_empty());
    }
}
