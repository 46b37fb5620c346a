use crate::error::{PmError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// How often a loop iterates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// As fast as the loop body allows, yielding to the runtime between iterations
    #[default]
    Uncapped,
    /// Only when the watched snapshot slot has changed. Loops without a
    /// snapshot to watch treat this like `Uncapped`.
    OnChange,
    /// One iteration per period. Late ticks are not bunched up.
    FixedRate(#[serde(with = "millis")] Duration),
}

impl Schedule {
    /// `hz` iterations per second. The period must fit a `Duration` and be
    /// longer than zero.
    pub fn fixed_rate_hz(hz: f64) -> Result<Self> {
        if !(hz.is_finite() && hz > 0.0) {
            return Err(PmError::Config(format!("rate must be positive and finite, got {hz} Hz")));
        }
        match Duration::try_from_secs_f64(1.0 / hz) {
            Ok(period) if !period.is_zero() => Ok(Schedule::FixedRate(period)),
            Ok(_) => Err(PmError::Config(format!("rate {hz} Hz is too high to pace"))),
            Err(e) => Err(PmError::Config(format!("rate {hz} Hz has no usable period: {e}"))),
        }
    }

    pub fn ticker(&self) -> Ticker {
        match *self {
            Schedule::FixedRate(period) if !period.is_zero() => {
                let mut interval = tokio::time::interval_at(Instant::now(), period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Ticker(Some(interval))
            }
            _ => Ticker(None),
        }
    }
}

/// Paces one loop according to its [`Schedule`].
#[derive(Debug)]
pub struct Ticker(Option<Interval>);

impl Ticker {
    pub async fn tick(&mut self) {
        match &mut self.0 {
            Some(interval) => {
                interval.tick().await;
            }
            None => tokio::task::yield_now().await,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(period: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(period.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
