use crate::error::StrategyError;
use core_types::{IndicatorKind, PriceField};
use ta::indicators::{
    ExponentialMovingAverage as Ema, RateOfChange as Roc, RelativeStrengthIndex as Rsi,
    SimpleMovingAverage as Sma, StandardDeviation as StdDev,
};
use ta::Next;

/// Identifies one indicator instance. Conditions that reference the same
/// indicator share a single streaming computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndicatorKey {
    pub kind: IndicatorKind,
    pub period: usize,
    pub field: PriceField,
}

enum Inner {
    Sma(Sma),
    Ema(Ema),
    Rsi(Rsi),
    Roc(Roc),
    StdDev(StdDev),
}

/// A streaming indicator that reports `None` until it has seen enough bars.
pub struct Indicator {
    key: IndicatorKey,
    inner: Inner,
    seen: usize,
}

impl Indicator {
    pub fn new(key: IndicatorKey) -> Result<Self, StrategyError> {
        let period = key.period;
        let err = |e: ta::errors::TaError| StrategyError::IndicatorError(format!("{:?} {period}: {e:?}", key.kind));
        let inner = match key.kind {
            IndicatorKind::Sma => Inner::Sma(Sma::new(period).map_err(err)?),
            IndicatorKind::Ema => Inner::Ema(Ema::new(period).map_err(err)?),
            IndicatorKind::Rsi => Inner::Rsi(Rsi::new(period).map_err(err)?),
            IndicatorKind::Roc => Inner::Roc(Roc::new(period).map_err(err)?),
            IndicatorKind::StdDev => Inner::StdDev(StdDev::new(period).map_err(err)?),
        };
        Ok(Self { key, inner, seen: 0 })
    }

    pub fn key(&self) -> IndicatorKey {
        self.key
    }

    /// Bars needed before the output is meaningful. Change-based indicators need
    /// one extra bar for their first difference.
    pub fn warmup(&self) -> usize {
        match self.key.kind {
            IndicatorKind::Rsi | IndicatorKind::Roc => self.key.period + 1,
            IndicatorKind::Sma | IndicatorKind::Ema | IndicatorKind::StdDev => self.key.period,
        }
    }

    pub fn next(&mut self, input: f64) -> Option<f64> {
        let value = match &mut self.inner {
            Inner::Sma(i) => i.next(input),
            Inner::Ema(i) => i.next(input),
            Inner::Rsi(i) => i.next(input),
            Inner::Roc(i) => i.next(input),
            Inner::StdDev(i) => i.next(input),
        };
        self.seen += 1;
        (self.seen >= self.warmup() && value.is_finite()).then_some(value)
    }
}
