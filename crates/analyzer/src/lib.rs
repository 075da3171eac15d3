//! The shared objective function and the IS/OOS score blend.
//!
//! Everything here is a pure function of immutable metrics: the Scorer stage
//! recomputes exactly what the OOS stage computed when it passed the strategy.

use core_types::{BacktestMetrics, FinalMetrics, ParamSet, Phase};
use serde::Serialize;
use std::cmp::Ordering;

pub mod error;

pub use error::AnalyzerError;

/// Weight of the in-sample phase in every blended figure.
pub const IS_WEIGHT: f64 = 0.4;
/// Weight of the out-of-sample phase in every blended figure.
pub const OOS_WEIGHT: f64 = 0.6;

const SHARPE_WEIGHT: f64 = 0.5;
const EXPECTANCY_WEIGHT: f64 = 0.3;
const WIN_RATE_WEIGHT: f64 = 0.2;

const MAX_BONUS: f64 = 0.20;
const BONUS_RATE: f64 = 0.5;
const PENALTY_RATE: f64 = 0.10;

/// `0.5*sharpe + 0.3*expectancy + 0.2*win_rate`.
pub fn phase_score(sharpe: f64, expectancy: f64, win_rate: f64) -> f64 {
    SHARPE_WEIGHT * sharpe + EXPECTANCY_WEIGHT * expectancy + WIN_RATE_WEIGHT * win_rate
}

pub fn metrics_score(metrics: &BacktestMetrics) -> f64 {
    phase_score(metrics.sharpe, metrics.expectancy, metrics.win_rate)
}

/// Relative loss of Sharpe from IS to OOS: `(is - oos) / is`.
///
/// Negative when OOS improved on IS. Undefined unless the IS Sharpe is positive.
pub fn degradation(is_sharpe: f64, oos_sharpe: f64) -> Result<f64, AnalyzerError> {
    if !(is_sharpe > 0.0) {
        return Err(AnalyzerError::UndefinedDegradation(is_sharpe));
    }
    Ok((is_sharpe - oos_sharpe) / is_sharpe)
}

/// The consistency adjustment applied to the blended score.
///
/// A strategy that held or improved its Sharpe out of sample earns a bonus capped at
/// 20%; one that lost Sharpe is penalised by a tenth of its degradation.
pub fn consistency_adjustment(is_sharpe: f64, oos_sharpe: f64, degradation: f64) -> f64 {
    if oos_sharpe >= is_sharpe {
        (degradation.abs() * BONUS_RATE).min(MAX_BONUS)
    } else {
        -degradation * PENALTY_RATE
    }
}

fn blend(is: f64, oos: f64) -> f64 {
    is * IS_WEIGHT + oos * OOS_WEIGHT
}

/// Computes the weighted final metrics of a strategy that passed the OOS gate.
pub fn final_metrics(is: &BacktestMetrics, oos: &BacktestMetrics) -> Result<FinalMetrics, AnalyzerError> {
    if is.phase != Phase::InSample {
        return Err(AnalyzerError::PhaseMismatch(is.phase));
    }
    if oos.phase != Phase::OutOfSample {
        return Err(AnalyzerError::PhaseMismatch(oos.phase));
    }

    let degradation = degradation(is.sharpe, oos.sharpe)?;
    let adj = consistency_adjustment(is.sharpe, oos.sharpe, degradation);
    let is_score = metrics_score(is);
    let oos_score = metrics_score(oos);
    let final_score = blend(is_score, oos_score) * (1.0 + adj);

    if !final_score.is_finite() {
        return Err(AnalyzerError::Calculation(format!("final score {final_score} is not finite")));
    }

    Ok(FinalMetrics {
        weighted_sharpe: blend(is.sharpe, oos.sharpe),
        weighted_expectancy: blend(is.expectancy, oos.expectancy),
        weighted_win_rate: blend(is.win_rate, oos.win_rate),
        weighted_max_drawdown: blend(is.max_drawdown, oos.max_drawdown),
        is_score,
        oos_score,
        adj,
        final_score,
    })
}

/// One evaluated point of an IS parameter grid.
#[derive(Debug, Clone, Serialize)]
pub struct RankedCombination {
    pub parameters: ParamSet,
    pub score: f64,
    pub metrics: BacktestMetrics,
}

/// Scores and ranks evaluated grid points, best first.
///
/// The sort is stable, so equal scores keep grid order and the ranking is
/// reproducible. Points with a non-finite score are dropped.
pub fn rank_combinations(evaluated: Vec<(ParamSet, BacktestMetrics)>) -> Vec<RankedCombination> {
    let mut ranked: Vec<RankedCombination> = evaluated
        .into_iter()
        .map(|(parameters, metrics)| RankedCombination { score: metrics_score(&metrics), parameters, metrics })
        .filter(|r| r.score.is_finite())
        .collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    tracing::debug!(combinations = ranked.len(), best = ranked.first().map(|r| r.score), "Ranked parameter grid");
    ranked
}
