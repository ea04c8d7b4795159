//! Background sampling: probe → snapshot store → broadcast hub, once per tick.

use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use hostmon_core::collector::{HostProbe, ProbeError};
use hostmon_core::model::NormalizedSample;

use crate::hub::{BroadcastHub, Frame, Topic};
use crate::state::{SamplerStats, Snapshot, SnapshotStore, now_millis};

pub(crate) type SharedProbe = Arc<Mutex<Box<dyn HostProbe>>>;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SamplerConfig {
    pub(crate) interval: Duration,
    /// Upper bound on one probe call before the tick is declared degraded.
    pub(crate) probe_timeout: Duration,
}

/// What one tick did.
#[derive(Debug)]
pub(crate) enum TickOutcome {
    Published {
        tick: u64,
        cpu_subscribers: usize,
        memory_subscribers: usize,
    },
    Degraded {
        tick: u64,
        error: ProbeError,
    },
    /// The sample was read but could not be serialized; nothing was stored.
    EncodeFailed {
        tick: u64,
    },
}

pub(crate) struct Sampler {
    probe: SharedProbe,
    store: Arc<SnapshotStore>,
    hub: Arc<BroadcastHub>,
    stats: Arc<SamplerStats>,
    config: SamplerConfig,
}

impl Sampler {
    pub(crate) fn new(
        probe: SharedProbe,
        store: Arc<SnapshotStore>,
        hub: Arc<BroadcastHub>,
        stats: Arc<SamplerStats>,
        config: SamplerConfig,
    ) -> Self {
        Self {
            probe,
            store,
            hub,
            stats,
            config,
        }
    }

    // ============================================================
    // Tick loop
    // ============================================================

    /// Ticks until `shutdown` fires (or its sender is dropped), then closes
    /// every subscriber stream.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.interval;
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            interval_ms = interval.as_millis() as u64,
            probe_timeout_ms = self.config.probe_timeout.as_millis() as u64,
            "sampler started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.changed() => break,
            }

            let t0 = Instant::now();
            self.tick().await;
            let elapsed = t0.elapsed();

            if elapsed > interval / 2 {
                warn!(
                    duration_ms = elapsed.as_millis() as u64,
                    interval_ms = interval.as_millis() as u64,
                    "tick exceeded 50% of interval"
                );
            }
        }

        let released = self.hub.close_all();
        info!(released, "sampler stopped");
    }

    /// Runs one tick: sample, store, publish. Never fails; a bad probe call
    /// leaves the previous snapshot in place.
    pub(crate) async fn tick(&self) -> TickOutcome {
        let tick = self.stats.record_tick();

        let sample = match self.read_probe().await {
            Ok(sample) => sample,
            Err(e) => {
                let consecutive = self.stats.record_failure(e.to_string());
                warn!(
                    tick,
                    error = %e,
                    consecutive_failures = consecutive,
                    "degraded sampling, keeping previous sample"
                );
                return TickOutcome::Degraded { tick, error: e };
            }
        };

        let cpu_frame = match encode(&sample.cpu) {
            Ok(f) => f,
            Err(e) => return self.encode_failed(tick, e),
        };
        let memory_frame = match encode(&sample.memory) {
            Ok(f) => f,
            Err(e) => return self.encode_failed(tick, e),
        };

        let taken_at = now_millis();
        let NormalizedSample { cpu, cores, memory } = sample;
        let usage = cpu.cpu_usage;
        self.store.set(Snapshot {
            tick,
            taken_at,
            cpu: Some(cpu),
            cores,
            memory: Some(memory),
        });

        // Store first: a client that reacts to a frame by querying sees at least that tick
        let cpus = self.hub.publish(Topic::Cpus, cpu_frame);
        let mem = self.hub.publish(Topic::Memory, memory_frame);

        let recovered_after = self.stats.record_success(taken_at);
        if self.stats.samples() == 1 {
            info!(tick, usage, "first sample collected");
        } else if recovered_after > 0 {
            info!(tick, failed_ticks = recovered_after, "sampling recovered");
        } else {
            debug!(
                tick,
                usage,
                cpu_subscribers = cpus.delivered,
                memory_subscribers = mem.delivered,
                dropped = cpus.dropped + mem.dropped,
                gone = cpus.closed + mem.closed,
                "tick completed"
            );
        }

        TickOutcome::Published {
            tick,
            cpu_subscribers: cpus.delivered,
            memory_subscribers: mem.delivered,
        }
    }

    fn encode_failed(&self, tick: u64, e: serde_json::Error) -> TickOutcome {
        error!(tick, error = %e, "failed to serialize sample");
        self.stats.record_failure(format!("serialize sample: {e}"));
        TickOutcome::EncodeFailed { tick }
    }

    /// Calls the probe on the blocking pool, bounded by `probe_timeout`.
    ///
    /// A timed-out call keeps running on its thread and holds the probe lock;
    /// ticks that find the lock taken fail fast with [`ProbeError::Busy`].
    async fn read_probe(&self) -> Result<NormalizedSample, ProbeError> {
        let probe = self.probe.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut probe = match probe.try_lock() {
                Ok(guard) => guard,
                // A previous call panicked; the probe state is still usable
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return Err(ProbeError::Busy),
            };
            probe.sample()
        });

        let reading = match tokio::time::timeout(self.config.probe_timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => return Err(ProbeError::Panicked(join.to_string())),
            Err(_) => return Err(ProbeError::Timeout),
        };

        reading
            .normalize()
            .map_err(|e| ProbeError::Partial(e.to_string()))
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Frame, serde_json::Error> {
    serde_json::to_string(value).map(Frame::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use hostmon_core::collector::{MockFs, ProcfsProbe};
    use hostmon_core::model::{CpuReading, CpuSample, HostReading, MemoryUsage};
    use tokio::sync::mpsc::error::TryRecvError;

    use crate::hub::HubConfig;

    /// Probe that replays a fixed script, one entry per call.
    struct ScriptedProbe {
        script: VecDeque<Result<HostReading, ProbeError>>,
    }

    impl HostProbe for ScriptedProbe {
        fn sample(&mut self) -> Result<HostReading, ProbeError> {
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(ProbeError::Partial("script exhausted".into())))
        }
    }

    struct SleepyProbe(Duration);

    impl HostProbe for SleepyProbe {
        fn sample(&mut self) -> Result<HostReading, ProbeError> {
            std::thread::sleep(self.0);
            Ok(reading(1.0))
        }
    }

    struct PanicOnceProbe {
        panicked: bool,
    }

    impl HostProbe for PanicOnceProbe {
        fn sample(&mut self) -> Result<HostReading, ProbeError> {
            if !self.panicked {
                self.panicked = true;
                panic!("probe exploded");
            }
            Ok(reading(7.0))
        }
    }

    fn reading(usage: f32) -> HostReading {
        let cpu = CpuReading {
            usage,
            frequency_mhz: 3200,
            vendor_id: "GenuineIntel".into(),
            brand: "Test CPU".into(),
        };
        HostReading {
            cores: vec![cpu.clone(), cpu.clone()],
            cpu,
            memory: MemoryUsage {
                total: 8 * 1024 * 1024 * 1024,
                used: 3 * 1024 * 1024 * 1024,
                swap_total: 0,
                swap_used: 0,
            },
        }
    }

    struct Harness {
        sampler: Sampler,
        store: Arc<SnapshotStore>,
        hub: Arc<BroadcastHub>,
        stats: Arc<SamplerStats>,
    }

    fn harness(probe: impl HostProbe + 'static, probe_timeout: Duration) -> Harness {
        let store = Arc::new(SnapshotStore::new());
        let hub = Arc::new(BroadcastHub::new(HubConfig::default()));
        let stats = Arc::new(SamplerStats::default());
        let probe: SharedProbe = Arc::new(Mutex::new(Box::new(probe)));
        let sampler = Sampler::new(
            probe,
            store.clone(),
            hub.clone(),
            stats.clone(),
            SamplerConfig {
                interval: Duration::from_millis(10),
                probe_timeout,
            },
        );
        Harness {
            sampler,
            store,
            hub,
            stats,
        }
    }

    fn scripted(script: Vec<Result<HostReading, ProbeError>>) -> Harness {
        harness(
            ScriptedProbe {
                script: script.into(),
            },
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_encode_failure_is_not_a_probe_error() {
        let h = scripted(vec![Ok(reading(5.0))]);
        let err = serde_json::from_str::<u8>("not json").unwrap_err();

        let outcome = h.sampler.encode_failed(3, err);
        assert!(matches!(outcome, TickOutcome::EncodeFailed { tick: 3 }));

        let status = h.stats.status();
        assert_eq!(status.failures, 1);
        let last_error = status.last_error.unwrap();
        assert!(last_error.starts_with("serialize sample: "), "{last_error}");
        assert!(h.store.get().is_empty());
    }

    fn cpu_usage(frame: &str) -> f32 {
        serde_json::from_str::<CpuSample>(frame).unwrap().cpu_usage
    }

    #[tokio::test]
    async fn test_single_tick_scenario() {
        let h = scripted(vec![Ok(reading(42.5))]);
        let mut cpus = h.hub.subscribe(Topic::Cpus).unwrap();

        let outcome = h.sampler.tick().await;
        assert!(matches!(
            outcome,
            TickOutcome::Published {
                tick: 1,
                cpu_subscribers: 1,
                memory_subscribers: 0
            }
        ));

        let expected = CpuSample {
            cpu_usage: 42.5,
            frequency: 3200,
            vendor_id: "GenuineIntel".into(),
            brand: "Test CPU".into(),
        };
        assert_eq!(h.store.get().cpu.as_ref(), Some(&expected));

        let frame = cpus.try_recv().unwrap();
        assert_eq!(
            &*frame,
            r#"{"cpu_usage":42.5,"frequency":3200,"vendor_id":"GenuineIntel","brand":"Test CPU"}"#
        );
        assert_eq!(cpus.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_n_ticks_deliver_n_frames_in_order() {
        const N: usize = 25;
        let h = scripted((1..=N).map(|i| Ok(reading(i as f32))).collect());
        let mut cpus = h.hub.subscribe(Topic::Cpus).unwrap();
        let mut memory = h.hub.subscribe(Topic::Memory).unwrap();

        // Drain between ticks so the queue never overflows
        let mut seen = Vec::new();
        for _ in 0..N {
            h.sampler.tick().await;
            while let Ok(frame) = cpus.try_recv() {
                seen.push(cpu_usage(&frame));
            }
            assert!(memory.try_recv().is_ok());
        }

        let expected: Vec<f32> = (1..=N).map(|i| i as f32).collect();
        assert_eq!(seen, expected);
        assert_eq!(memory.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_failed_tick_keeps_previous_sample() {
        let h = scripted(vec![
            Ok(reading(1.0)),
            Ok(reading(2.0)),
            Err(ProbeError::Io(std::io::Error::other("proc vanished"))),
            Ok(reading(4.0)),
            Ok(reading(5.0)),
        ]);
        let mut cpus = h.hub.subscribe(Topic::Cpus).unwrap();

        for tick in 1..=5u64 {
            let outcome = h.sampler.tick().await;
            if tick == 3 {
                assert!(matches!(
                    outcome,
                    TickOutcome::Degraded {
                        tick: 3,
                        error: ProbeError::Io(_)
                    }
                ));
                let snap = h.store.get();
                assert_eq!(snap.tick, 2);
                assert_eq!(snap.cpu.as_ref().unwrap().cpu_usage, 2.0);
            }
        }

        let mut seen = Vec::new();
        while let Ok(frame) = cpus.try_recv() {
            seen.push(cpu_usage(&frame));
        }
        assert_eq!(seen, vec![1.0, 2.0, 4.0, 5.0]);

        let status = h.stats.status();
        assert_eq!(status.ticks, 5);
        assert_eq!(status.samples, 4);
        assert_eq!(status.failures, 1);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.unwrap().contains("proc vanished"));
    }

    #[tokio::test]
    async fn test_failure_before_first_sample_leaves_store_empty() {
        let h = scripted(vec![Err(ProbeError::Partial("no cpu line".into()))]);
        assert!(matches!(
            h.sampler.tick().await,
            TickOutcome::Degraded { .. }
        ));
        assert!(h.store.get().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_reading_is_degraded() {
        let h = scripted(vec![Ok(reading(1.0)), Ok(reading(f32::NAN))]);
        h.sampler.tick().await;

        let outcome = h.sampler.tick().await;
        assert!(matches!(
            outcome,
            TickOutcome::Degraded {
                error: ProbeError::Partial(_),
                ..
            }
        ));
        assert_eq!(h.store.get().tick, 1);
    }

    #[tokio::test]
    async fn test_hung_probe_times_out_then_reports_busy() {
        let h = harness(
            SleepyProbe(Duration::from_millis(300)),
            Duration::from_millis(20),
        );

        assert!(matches!(
            h.sampler.tick().await,
            TickOutcome::Degraded {
                error: ProbeError::Timeout,
                ..
            }
        ));
        // The first call still holds the probe
        assert!(matches!(
            h.sampler.tick().await,
            TickOutcome::Degraded {
                error: ProbeError::Busy,
                ..
            }
        ));
        assert_eq!(h.stats.status().consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_panicking_probe_recovers() {
        let h = harness(
            PanicOnceProbe { panicked: false },
            Duration::from_secs(5),
        );

        assert!(matches!(
            h.sampler.tick().await,
            TickOutcome::Degraded {
                error: ProbeError::Panicked(_),
                ..
            }
        ));
        assert!(matches!(
            h.sampler.tick().await,
            TickOutcome::Published { tick: 2, .. }
        ));
        assert_eq!(h.store.get().cpu.as_ref().unwrap().cpu_usage, 7.0);
    }

    #[tokio::test]
    async fn test_procfs_probe_end_to_end() {
        let h = harness(
            ProcfsProbe::new(MockFs::typical_system(), "/proc"),
            Duration::from_secs(5),
        );
        h.sampler.tick().await;

        let snap = h.store.get();
        let cpu = snap.cpu.as_ref().unwrap();
        assert_eq!(cpu.frequency, 2100);
        assert_eq!(cpu.vendor_id, "GenuineIntel");
        assert_eq!(snap.cores.len(), 4);
        let memory = snap.memory.as_ref().unwrap();
        assert_eq!(memory.total_memory, "15.6 GiB");
        assert_eq!(memory.used_memory, "4.2 GiB");
        assert_eq!(memory.total_swap, "3.9 GiB");
        assert_eq!(memory.used_swap, "0 B");
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_closes_streams() {
        let h = scripted((0..1000).map(|i| Ok(reading(i as f32 % 100.0))).collect());
        let mut cpus = h.hub.subscribe(Topic::Cpus).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let hub = h.hub.clone();
        let handle = tokio::spawn(h.sampler.run(shutdown_rx));

        let first = tokio::time::timeout(Duration::from_secs(5), cpus.recv())
            .await
            .unwrap();
        assert!(first.is_some());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        // Drain whatever was queued, then the stream ends
        let ended = tokio::time::timeout(Duration::from_secs(5), async {
            while cpus.recv().await.is_some() {}
        })
        .await;
        assert!(ended.is_ok());
        assert!(hub.is_closed());
        assert!(hub.subscribe(Topic::Memory).is_none());
    }
}
