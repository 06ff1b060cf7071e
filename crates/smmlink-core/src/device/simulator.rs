//! Simulated vitals source
//!
//! Generates plausible vitals and waveforms for demos and UI work without a
//! monitor attached. Base values drift slowly; waveforms follow the heart
//! and respiration rates. Simulated vitals are never persisted.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::{PI, TAU};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use super::Device;
use crate::protocol::ProtocolError;
use crate::timer::Scheduler;
use crate::vitals::{EventSink, Reading, VitalsEvent, VitalsSnapshot};

/// Time between generated samples (20 Hz)
pub const TICK_PERIOD: Duration = Duration::from_millis(50);

/// Ticks between drifts of the base values (two seconds)
const DRIFT_EVERY: u64 = 40;

const SAMPLE_RATE_HZ: f64 = 1000.0 / 50.0;
const BASELINE: f64 = 127.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SimTimer {
    Tick,
}

/// Synthetic vitals generator
#[derive(Debug)]
pub struct VitalsSimulator {
    rng: StdRng,
    base_heart_rate: u16,
    base_spo2: u8,
    base_resp_rate: u8,
    tick: u64,
    ecg_phase: f64,
    resp_phase: f64,
    pleth_phase: f64,
    monitoring: bool,
    snapshot: VitalsSnapshot,
    sink: EventSink,
    timers: Scheduler<SimTimer>,
}

impl Default for VitalsSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl VitalsSimulator {
    /// Create a simulator seeded from the OS
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a reproducible simulator
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(mut rng: StdRng) -> Self {
        let base_heart_rate = rng.gen_range(68..=82);
        let base_spo2 = rng.gen_range(96..=99);
        let base_resp_rate = rng.gen_range(14..=19);
        Self {
            rng,
            base_heart_rate,
            base_spo2,
            base_resp_rate,
            tick: 0,
            ecg_phase: 0.0,
            resp_phase: 0.0,
            pleth_phase: 0.0,
            monitoring: false,
            snapshot: VitalsSnapshot::default(),
            sink: EventSink::detached(),
            timers: Scheduler::new(),
        }
    }

    /// Number of samples generated since the last start
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Generate one sample set and publish what changed
    pub fn tick(&mut self) {
        if self.tick % DRIFT_EVERY == 0 {
            self.drift();
        }

        let jitter: i32 = self.rng.gen_range(-1..=1);
        let heart_rate = (i32::from(self.base_heart_rate) + jitter) as u16;

        let ecg = self.ecg_sample();
        let resp = self.resp_sample();
        let pleth = self.pleth_sample();

        let events = [
            self.snapshot.set_spo2(Reading::Valid(self.base_spo2)),
            self.snapshot.set_heart_rate(Reading::Valid(heart_rate)),
            self.snapshot.set_resp_rate(Reading::Valid(self.base_resp_rate)),
            self.snapshot.set_pleth_waveform_sample(pleth),
            self.snapshot.set_resp_waveform_sample(resp),
            self.snapshot.set_ecg_sample(ecg),
        ];
        for event in events.into_iter().flatten() {
            self.sink.emit(event);
        }

        self.tick += 1;
    }

    fn drift(&mut self) {
        let hr_change: i32 = self.rng.gen_range(-2..=2);
        self.base_heart_rate = (i32::from(self.base_heart_rate) + hr_change).clamp(60, 100) as u16;

        if self.rng.gen_bool(0.10) {
            let change: i32 = self.rng.gen_range(-1..=1);
            self.base_spo2 = (i32::from(self.base_spo2) + change).clamp(95, 100) as u8;
        }

        if self.rng.gen_bool(0.20) {
            let change: i32 = self.rng.gen_range(-1..=1);
            self.base_resp_rate = (i32::from(self.base_resp_rate) + change).clamp(12, 25) as u8;
        }
    }

    fn advance(phase: &mut f64, per_minute: f64) {
        *phase += TAU * (per_minute / 60.0) / SAMPLE_RATE_HZ;
        if *phase > TAU {
            *phase -= TAU;
        }
    }

    fn finish(&mut self, value: f64, noise: i32) -> u8 {
        let noise = self.rng.gen_range(-noise..=noise);
        (value as i32 + noise).clamp(0, 255) as u8
    }

    /// P wave, QRS complex, T wave
    fn ecg_sample(&mut self) -> u8 {
        Self::advance(&mut self.ecg_phase, f64::from(self.base_heart_rate));
        let x = self.ecg_phase / TAU;

        let offset = if x < 0.1 {
            15.0 * (x / 0.1 * PI).sin()
        } else if (0.15..0.35).contains(&x) {
            let qrs = (x - 0.15) / 0.2;
            if qrs < 0.3 {
                -20.0 * (qrs * PI / 0.3).sin()
            } else if qrs < 0.7 {
                80.0 * ((qrs - 0.3) / 0.4 * PI).sin()
            } else {
                -30.0 * ((qrs - 0.7) / 0.3 * PI).sin()
            }
        } else if (0.5..0.8).contains(&x) {
            25.0 * ((x - 0.5) / 0.3 * PI).sin()
        } else {
            0.0
        };

        self.finish(BASELINE + offset, 3)
    }

    /// Faster inspiration than expiration
    fn resp_sample(&mut self) -> u8 {
        Self::advance(&mut self.resp_phase, f64::from(self.base_resp_rate));
        let wave = 50.0 * self.resp_phase.sin();
        let offset = if self.resp_phase < PI { wave } else { wave * 0.7 };
        self.finish(BASELINE + offset, 2)
    }

    /// Systolic rise, diastolic fall with a dicrotic notch
    fn pleth_sample(&mut self) -> u8 {
        Self::advance(&mut self.pleth_phase, f64::from(self.base_heart_rate));
        let x = self.pleth_phase / TAU;

        let offset = if x < 0.3 {
            60.0 * (x / 0.3 * PI / 2.0).sin()
        } else if x < 0.6 {
            60.0 * ((x - 0.3) / 0.3 * PI * 0.5).cos()
        } else {
            let late = (x - 0.6) / 0.4;
            15.0 * (late * TAU).sin() * (-late * 3.0).exp()
        };

        self.finish(BASELINE + offset, 2)
    }
}

impl Device for VitalsSimulator {
    fn start(&mut self, now: Instant) -> Result<(), ProtocolError> {
        if self.monitoring {
            return Ok(());
        }
        self.tick = 0;
        self.ecg_phase = 0.0;
        self.resp_phase = 0.0;
        self.pleth_phase = 0.0;
        self.monitoring = true;
        self.timers.start_every(SimTimer::Tick, now, TICK_PERIOD);
        info!("Simulated monitoring started");
        self.sink.emit(VitalsEvent::MonitoringChanged(true));
        Ok(())
    }

    fn stop(&mut self) {
        self.timers.cancel_all();
        if self.monitoring {
            self.monitoring = false;
            info!("Simulated monitoring stopped");
            self.sink.emit(VitalsEvent::MonitoringChanged(false));
        }
    }

    fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    fn snapshot(&self) -> VitalsSnapshot {
        self.snapshot
    }

    fn attach(&mut self, sink: EventSink) {
        self.sink = sink;
    }

    fn detach(&mut self) {
        self.sink = EventSink::detached();
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    fn poll_timers(&mut self, now: Instant) {
        while let Some((SimTimer::Tick, _)) = self.timers.pop_expired(now) {
            self.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    #[test]
    fn test_initial_ranges() {
        for seed in 0..50 {
            let sim = VitalsSimulator::with_seed(seed);
            assert!((68..=82).contains(&sim.base_heart_rate));
            assert!((96..=99).contains(&sim.base_spo2));
            assert!((14..=19).contains(&sim.base_resp_rate));
        }
    }

    #[test]
    fn test_values_stay_in_bounds() {
        let mut sim = VitalsSimulator::with_seed(7);
        for _ in 0..20_000 {
            sim.tick();
            let s = sim.snapshot();
            let hr = s.heart_rate.value().unwrap();
            assert!((59..=101).contains(&hr), "heart rate {hr}");
            assert!((95..=100).contains(&s.spo2.value().unwrap()));
            assert!((12..=25).contains(&s.resp_rate.value().unwrap()));
        }
    }

    #[test]
    fn test_timer_drives_ticks() {
        let mut sim = VitalsSimulator::with_seed(1);
        let t0 = Instant::now();
        sim.start(t0).unwrap();

        sim.poll_timers(t0 + Duration::from_millis(49));
        assert_eq!(sim.ticks(), 0);
        for step in 1..=10 {
            sim.poll_timers(t0 + TICK_PERIOD * step);
        }
        assert_eq!(sim.ticks(), 10);

        // A late poll generates one sample, not a backlog
        sim.poll_timers(t0 + Duration::from_secs(3));
        assert_eq!(sim.ticks(), 11);
        assert_eq!(sim.next_deadline(), Some(t0 + Duration::from_millis(3050)));

        sim.stop();
        assert_eq!(sim.next_deadline(), None);
        sim.poll_timers(t0 + Duration::from_secs(5));
        assert_eq!(sim.ticks(), 11);
    }

    #[test]
    fn test_publishes_only_when_attached() {
        let (tx, mut rx) = broadcast::channel(64);
        let mut sim = VitalsSimulator::with_seed(3);
        sim.tick();
        assert!(rx.try_recv().is_err());

        sim.attach(EventSink::connected(tx));
        sim.tick();
        assert!(rx.try_recv().is_ok());

        sim.detach();
        while rx.try_recv().is_ok() {}
        sim.tick();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_first_tick_reports_all_vitals() {
        let (tx, mut rx) = broadcast::channel(64);
        let mut sim = VitalsSimulator::with_seed(11);
        sim.attach(EventSink::connected(tx));
        sim.tick();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(std::mem::discriminant(&event));
        }
        assert!(kinds.contains(&std::mem::discriminant(&VitalsEvent::HeartRate(Reading::Invalid))));
        assert!(kinds.contains(&std::mem::discriminant(&VitalsEvent::Spo2(Reading::Invalid))));
        assert!(kinds.contains(&std::mem::discriminant(&VitalsEvent::RespirationRate(
            Reading::Invalid
        ))));
    }
}
