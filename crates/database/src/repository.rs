use crate::error::DbError;
use crate::store::{KlineStore, StrategyStore, ROTATOR_ACTOR};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{
    BacktestMetrics, FinalMetrics, Kline, LiveSlot, NewStrategy, ParamSet, ParameterSpace, Phase,
    PoolMember, PoolSnapshot, PoolStats, RiskState, RotationPlan, StatusReason, StatusTransition,
    StrategyLogic, StrategyRecord, StrategyStatus, Timeframe, Transition, ValidationRecord,
    WorkerId, Window,
};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{PgConnection, Row};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// The `DbRepository` provides a high-level, application-specific interface
/// to the database. It encapsulates all SQL queries and data access logic.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

/// Strategy columns plus both phases' metrics, joined once so a record is always
/// read in one round trip.
const STRATEGY_SELECT: &str = r#"
    SELECT
        s.id, s.logic, s.parameter_space, s.parameters, s.timeframe, s.status,
        s.validation, s.final_metrics, s.final_score, s.rolling_score, s.reason,
        s.created_at, s.updated_at, s.claimed_by, s.lease_expires_at, s.live_since, s.version,
        im.trade_count AS is_trade_count, im.sharpe AS is_sharpe, im.win_rate AS is_win_rate,
        im.expectancy AS is_expectancy, im.max_drawdown AS is_max_drawdown,
        im.win_rate_ci AS is_win_rate_ci, im.symbols_used AS is_symbols_used,
        om.trade_count AS oos_trade_count, om.sharpe AS oos_sharpe, om.win_rate AS oos_win_rate,
        om.expectancy AS oos_expectancy, om.max_drawdown AS oos_max_drawdown,
        om.win_rate_ci AS oos_win_rate_ci, om.symbols_used AS oos_symbols_used
    FROM strategies s
    LEFT JOIN backtest_metrics im ON im.strategy_id = s.id AND im.phase = 'in_sample'
    LEFT JOIN backtest_metrics om ON om.strategy_id = s.id AND om.phase = 'out_of_sample'
"#;

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn pool_members(conn: &mut PgConnection, statuses: &[&str]) -> Result<Vec<PoolMember>, DbError> {
    let rows = sqlx::query(
        r#"
        SELECT id, status, COALESCE(final_score, 0) AS final_score, rolling_score, created_at, live_since
        FROM strategies
        WHERE status = ANY($1)
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(statuses)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            let status: String = row.try_get("status")?;
            Ok(PoolMember {
                id: row.try_get("id")?,
                status: status.parse()?,
                final_score: row.try_get("final_score")?,
                rolling_score: row.try_get("rolling_score")?,
                created_at: row.try_get("created_at")?,
                live_since: row.try_get("live_since")?,
            })
        })
        .collect()
}

fn record_from_row(row: &PgRow) -> Result<StrategyRecord, DbError> {
    let Json(logic): Json<StrategyLogic> = row.try_get("logic")?;
    let Json(parameter_space): Json<ParameterSpace> = row.try_get("parameter_space")?;
    let parameters: Option<Json<ParamSet>> = row.try_get("parameters")?;
    let validation: Option<Json<ValidationRecord>> = row.try_get("validation")?;
    let final_metrics: Option<Json<FinalMetrics>> = row.try_get("final_metrics")?;
    let reason: Option<Json<StatusReason>> = row.try_get("reason")?;
    let timeframe: String = row.try_get("timeframe")?;
    let status: String = row.try_get("status")?;

    Ok(StrategyRecord {
        id: row.try_get("id")?,
        logic,
        parameter_space,
        parameters: parameters.map(|p| p.0),
        timeframe: timeframe.parse()?,
        status: status.parse()?,
        is_metrics: metrics_from_row(row, "is_", Phase::InSample)?,
        oos_metrics: metrics_from_row(row, "oos_", Phase::OutOfSample)?,
        validation: validation.map(|v| v.0),
        final_metrics: final_metrics.map(|m| m.0),
        final_score: row.try_get("final_score")?,
        rolling_score: row.try_get("rolling_score")?,
        reason: reason.map(|r| r.0),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        claimed_by: row.try_get("claimed_by")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        live_since: row.try_get("live_since")?,
        version: row.try_get("version")?,
    })
}

fn metrics_from_row(row: &PgRow, prefix: &str, phase: Phase) -> Result<Option<BacktestMetrics>, DbError> {
    let col = |name: &str| format!("{prefix}{name}");
    let trade_count: Option<i32> = row.try_get(col("trade_count").as_str())?;
    let Some(trade_count) = trade_count else {
        return Ok(None);
    };
    let symbols_used: i32 = row.try_get(col("symbols_used").as_str())?;
    Ok(Some(BacktestMetrics {
        phase,
        trade_count: trade_count.max(0) as u32,
        sharpe: row.try_get(col("sharpe").as_str())?,
        win_rate: row.try_get(col("win_rate").as_str())?,
        expectancy: row.try_get(col("expectancy").as_str())?,
        max_drawdown: row.try_get(col("max_drawdown").as_str())?,
        win_rate_ci: row.try_get(col("win_rate_ci").as_str())?,
        symbols_used: symbols_used.max(0) as u32,
    }))
}

async fn insert_history(
    conn: &mut PgConnection,
    id: Uuid,
    from: StrategyStatus,
    to: StrategyStatus,
    actor: &str,
    reason: Option<String>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO status_transitions (strategy_id, from_status, to_status, actor, reason) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(actor)
    .bind(reason)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Moves one strategy between pool statuses inside a rotation transaction.
async fn rotate_status(
    conn: &mut PgConnection,
    id: Uuid,
    from: &[StrategyStatus],
    to: StrategyStatus,
    reason: Option<&StatusReason>,
) -> Result<(), DbError> {
    let row = sqlx::query("SELECT status FROM strategies WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(DbError::NotFound)?;
    let current: StrategyStatus = row.try_get::<String, _>("status")?.parse()?;
    if !from.contains(&current) || !current.can_transition_to(to) {
        return Err(DbError::IllegalTransition { id, from: current.to_string(), to: to.to_string() });
    }

    sqlx::query(
        r#"
        UPDATE strategies
        SET status = $2,
            reason = COALESCE($3, reason),
            live_since = CASE WHEN $2 = 'LIVE' THEN NOW() ELSE NULL END,
            version = version + 1,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(to.as_str())
    .bind(reason.map(Json))
    .execute(&mut *conn)
    .await?;

    if to != StrategyStatus::Live {
        sqlx::query("UPDATE live_slots SET strategy_id = NULL, assigned_at = NULL WHERE strategy_id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }

    insert_history(conn, id, current, to, ROTATOR_ACTOR, reason.map(|r| r.to_string())).await
}

#[async_trait]
impl StrategyStore for DbRepository {
    async fn insert_strategy(&self, new: NewStrategy) -> Result<StrategyRecord, DbError> {
        let record = StrategyRecord::generated(new, Utc::now());
        sqlx::query(
            r#"
            INSERT INTO strategies (id, logic, parameter_space, timeframe, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(record.id)
        .bind(Json(&record.logic))
        .bind(Json(&record.parameter_space))
        .bind(record.timeframe.as_str())
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(strategy_id = %record.id, timeframe = %record.timeframe, "Strategy inserted");
        Ok(record)
    }

    async fn get_strategy(&self, id: Uuid) -> Result<StrategyRecord, DbError> {
        let sql = format!("{STRATEGY_SELECT} WHERE s.id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| if let sqlx::Error::RowNotFound = e { DbError::NotFound } else { e.into() })?;
        record_from_row(&row)
    }

    async fn list_strategies(
        &self,
        status: Option<StrategyStatus>,
        limit: i64,
    ) -> Result<Vec<StrategyRecord>, DbError> {
        let sql = format!(
            "{STRATEGY_SELECT} WHERE ($1::text IS NULL OR s.status = $1) ORDER BY s.created_at DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn claim_next(
        &self,
        status: StrategyStatus,
        worker: &WorkerId,
        lease: Duration,
    ) -> Result<Option<StrategyRecord>, DbError> {
        // SKIP LOCKED lets concurrent workers pass over a row another worker is claiming.
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE strategies
            SET claimed_by = $1,
                lease_expires_at = NOW() + make_interval(secs => $2),
                version = version + 1,
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM strategies
                WHERE status = $3 AND (claimed_by IS NULL OR lease_expires_at IS NULL OR lease_expires_at <= NOW())
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND status = $3
            RETURNING id
            "#,
        )
        .bind(worker.as_str())
        .bind(lease.as_secs_f64())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match claimed {
            Some(id) => self.get_strategy(id).await.map(Some),
            None => Ok(None),
        }
    }

    async fn renew_lease(&self, id: Uuid, worker: &WorkerId, lease: Duration) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE strategies SET lease_expires_at = NOW() + make_interval(secs => $3) WHERE id = $1 AND claimed_by = $2",
        )
        .bind(id)
        .bind(worker.as_str())
        .bind(lease.as_secs_f64())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::LeaseLost(id));
        }
        Ok(())
    }

    async fn release_claim(&self, id: Uuid, worker: &WorkerId) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE strategies
            SET claimed_by = NULL, lease_expires_at = NULL, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND claimed_by = $2
            "#,
        )
        .bind(id)
        .bind(worker.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::LeaseLost(id));
        }
        Ok(())
    }

    async fn commit_transition(
        &self,
        id: Uuid,
        worker: &WorkerId,
        transition: &Transition,
    ) -> Result<StrategyRecord, DbError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status, claimed_by FROM strategies WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound)?;
        let current: StrategyStatus = row.try_get::<String, _>("status")?.parse()?;
        let claimed_by: Option<String> = row.try_get("claimed_by")?;

        if claimed_by.as_deref() != Some(worker.as_str()) {
            return Err(DbError::LeaseLost(id));
        }
        if !current.can_transition_to(transition.to) {
            return Err(DbError::IllegalTransition {
                id,
                from: current.to_string(),
                to: transition.to.to_string(),
            });
        }

        if let Some(metrics) = &transition.metrics {
            let result = sqlx::query(
                r#"
                INSERT INTO backtest_metrics
                    (strategy_id, phase, trade_count, sharpe, win_rate, expectancy, max_drawdown, win_rate_ci, symbols_used)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (strategy_id, phase) DO NOTHING
                "#,
            )
            .bind(id)
            .bind(metrics.phase.as_str())
            .bind(i32::try_from(metrics.trade_count).unwrap_or(i32::MAX))
            .bind(metrics.sharpe)
            .bind(metrics.win_rate)
            .bind(metrics.expectancy)
            .bind(metrics.max_drawdown)
            .bind(metrics.win_rate_ci)
            .bind(i32::try_from(metrics.symbols_used).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(DbError::MetricsAlreadyWritten { id, phase: metrics.phase });
            }
        }

        sqlx::query(
            r#"
            UPDATE strategies
            SET status = $2,
                parameters = COALESCE($3, parameters),
                validation = COALESCE($4, validation),
                final_metrics = COALESCE($5, final_metrics),
                final_score = COALESCE($6, final_score),
                reason = COALESCE($7, reason),
                claimed_by = NULL,
                lease_expires_at = NULL,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(transition.to.as_str())
        .bind(transition.parameters.as_ref().map(Json))
        .bind(transition.validation.as_ref().map(Json))
        .bind(transition.final_metrics.as_ref().map(Json))
        .bind(transition.final_metrics.map(|m| m.final_score))
        .bind(transition.reason.as_ref().map(Json))
        .execute(&mut *tx)
        .await?;

        let reason = transition.reason.as_ref().map(|r| r.to_string());
        insert_history(&mut tx, id, current, transition.to, worker.as_str(), reason).await?;

        tx.commit().await?;
        self.get_strategy(id).await
    }

    async fn transitions(&self, id: Uuid) -> Result<Vec<StatusTransition>, DbError> {
        let rows = sqlx::query(
            "SELECT from_status, to_status, actor, reason, at FROM status_transitions WHERE strategy_id = $1 ORDER BY id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(StatusTransition {
                    strategy_id: id,
                    from_status: row.try_get::<String, _>("from_status")?.parse()?,
                    to_status: row.try_get::<String, _>("to_status")?.parse()?,
                    at: row.try_get("at")?,
                    actor: row.try_get("actor")?,
                    reason: row.try_get("reason")?,
                })
            })
            .collect()
    }

    async fn queue_depths(&self) -> Result<BTreeMap<StrategyStatus, u64>, DbError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM strategies GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut depths: BTreeMap<StrategyStatus, u64> =
            StrategyStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for row in rows {
            let status: StrategyStatus = row.try_get::<String, _>("status")?.parse()?;
            let n: i64 = row.try_get("n")?;
            depths.insert(status, n.max(0) as u64);
        }
        Ok(depths)
    }

    async fn pool_snapshot(&self) -> Result<PoolSnapshot, DbError> {
        let mut tx = self.pool.begin().await?;
        // One snapshot for the version, members and slots.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        let version: i64 = sqlx::query_scalar("SELECT version FROM pool_state WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;
        let members = pool_members(&mut tx, &["ACTIVE", "LIVE"]).await?;
        let candidates = pool_members(&mut tx, &["SCORED"]).await?;

        let slots = sqlx::query("SELECT slot_id, account, strategy_id, assigned_at FROM live_slots ORDER BY slot_id")
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| {
                Ok(LiveSlot {
                    slot_id: row.try_get("slot_id")?,
                    account: row.try_get("account")?,
                    strategy_id: row.try_get("strategy_id")?,
                    assigned_at: row.try_get("assigned_at")?,
                })
            })
            .collect::<Result<Vec<_>, DbError>>()?;

        tx.commit().await?;
        Ok(PoolSnapshot { version, members, candidates, slots })
    }

    async fn apply_rotation(&self, expected_version: i64, plan: &RotationPlan) -> Result<i64, DbError> {
        use StrategyStatus::*;

        let mut tx = self.pool.begin().await?;

        // The version bump doubles as the lock on the aggregate.
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE pool_state
            SET version = version + 1, pool_size = $2, live_count = $3, average_score = $4, updated_at = NOW()
            WHERE id = 1 AND version = $1
            RETURNING version
            "#,
        )
        .bind(expected_version)
        .bind(plan.stats.size as i32)
        .bind(plan.stats.live as i32)
        .bind(plan.stats.average_score)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(version) = version else {
            return Err(DbError::VersionConflict { expected: expected_version });
        };

        for (id, reason) in &plan.retire {
            rotate_status(&mut tx, *id, &[Scored, Active, Live], Retired, Some(reason)).await?;
        }
        for id in &plan.demote {
            rotate_status(&mut tx, *id, &[Live], Active, None).await?;
        }
        for id in &plan.admit {
            rotate_status(&mut tx, *id, &[Scored], Active, None).await?;
        }
        for (id, slot_id) in &plan.promote {
            rotate_status(&mut tx, *id, &[Active], Live, None).await?;
            let result = sqlx::query(
                "UPDATE live_slots SET strategy_id = $1, assigned_at = NOW() WHERE slot_id = $2 AND strategy_id IS NULL",
            )
            .bind(id)
            .bind(slot_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(DbError::VersionConflict { expected: expected_version });
            }
        }

        tx.commit().await?;
        Ok(version)
    }

    async fn pool_stats(&self) -> Result<PoolStats, DbError> {
        let row = sqlx::query("SELECT pool_size, live_count, average_score FROM pool_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(PoolStats {
            size: row.try_get::<i32, _>("pool_size")?.max(0) as u32,
            live: row.try_get::<i32, _>("live_count")?.max(0) as u32,
            average_score: row.try_get("average_score")?,
        })
    }

    async fn configure_slots(&self, accounts: &[String]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for (slot_id, account) in accounts.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO live_slots (slot_id, account) VALUES ($1, $2)
                ON CONFLICT (slot_id) DO UPDATE SET account = EXCLUDED.account
                "#,
            )
            .bind(slot_id as i32)
            .bind(account)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM live_slots WHERE slot_id >= $1 AND strategy_id IS NULL")
            .bind(accounts.len() as i32)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_rolling_score(&self, id: Uuid, score: f64) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE strategies SET rolling_score = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('ACTIVE', 'LIVE')
            "#,
        )
        .bind(id)
        .bind(score)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn risk_state(&self) -> Result<RiskState, DbError> {
        let row = sqlx::query("SELECT emergency_stop, cooldown_until, reason, updated_at FROM risk_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RiskState {
            emergency_stop: row.try_get("emergency_stop")?,
            cooldown_until: row.try_get("cooldown_until")?,
            reason: row.try_get("reason")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn set_risk_state(&self, state: &RiskState) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE risk_state
            SET emergency_stop = $1, cooldown_until = $2, reason = $3, updated_at = COALESCE($4, NOW())
            WHERE id = 1
            "#,
        )
        .bind(state.emergency_stop)
        .bind(state.cooldown_until)
        .bind(&state.reason)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn generation_paused(&self) -> Result<bool, DbError> {
        let paused = sqlx::query_scalar("SELECT generation_paused FROM pipeline_flags WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(paused)
    }

    async fn set_generation_paused(&self, paused: bool) -> Result<(), DbError> {
        sqlx::query("UPDATE pipeline_flags SET generation_paused = $1, updated_at = NOW() WHERE id = 1")
            .bind(paused)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KlineStore for DbRepository {
    /// Fetches all klines for a given symbol and interval within a half-open window.
    async fn klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: &Window,
    ) -> Result<Vec<Kline>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT open_time, open, high, low, close, volume, close_time
            FROM klines
            WHERE symbol = $1 AND interval = $2 AND open_time >= $3 AND open_time < $4
            ORDER BY open_time ASC
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let open_time: DateTime<Utc> = row.try_get("open_time")?;
                Ok(Kline {
                    open_time,
                    open: row.try_get("open")?,
                    high: row.try_get("high")?,
                    low: row.try_get("low")?,
                    close: row.try_get("close")?,
                    volume: row.try_get("volume")?,
                    close_time: row.try_get("close_time")?,
                    interval: timeframe.as_str().to_string(),
                })
            })
            .collect()
    }
}
