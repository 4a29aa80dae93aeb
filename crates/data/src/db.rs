use chrono::{DateTime, Utc};
use marketsync_core::*;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

/// Run embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

fn decode_err(msg: String) -> sqlx::Error {
    sqlx::Error::Decode(msg.into())
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

const ASSET_COLUMNS: &str = "id, exchange_id, asset_code, asset_name, chain_code, chain_name, \
     asset_kind, auto_deposit, auto_withdraw, manual_deposit, manual_withdraw, \
     confirmations_deposit, confirmations_withdraw, deposit_fee_percent, deposit_fee_fixed, \
     deposit_min, deposit_max, withdraw_fee_percent, withdraw_fee_fixed, withdraw_min, \
     withdraw_max, amount_precision, requires_memo, is_stablecoin, provider_symbol, \
     provider_chain, status_note, raw_metadata, last_synced_at, updated_at";

fn asset_from_row(r: &PgRow) -> Result<AssetRecord, sqlx::Error> {
    let kind: String = r.try_get("asset_kind")?;
    let asset_kind = kind.parse::<AssetKind>().map_err(decode_err)?;
    Ok(AssetRecord {
        id: r.try_get("id")?,
        exchange_id: r.try_get("exchange_id")?,
        asset_code: r.try_get("asset_code")?,
        chain_code: r.try_get("chain_code")?,
        fields: AssetFields {
            asset_name: r.try_get("asset_name")?,
            chain_name: r.try_get("chain_name")?,
            asset_kind,
            auto_deposit: r.try_get("auto_deposit")?,
            auto_withdraw: r.try_get("auto_withdraw")?,
            confirmations_deposit: r.try_get("confirmations_deposit")?,
            confirmations_withdraw: r.try_get("confirmations_withdraw")?,
            deposit_fee_percent: r.try_get("deposit_fee_percent")?,
            deposit_fee_fixed: r.try_get("deposit_fee_fixed")?,
            deposit_min: r.try_get("deposit_min")?,
            deposit_max: r.try_get("deposit_max")?,
            withdraw_fee_percent: r.try_get("withdraw_fee_percent")?,
            withdraw_fee_fixed: r.try_get("withdraw_fee_fixed")?,
            withdraw_min: r.try_get("withdraw_min")?,
            withdraw_max: r.try_get("withdraw_max")?,
            amount_precision: r.try_get("amount_precision")?,
            requires_memo: r.try_get("requires_memo")?,
            is_stablecoin: r.try_get("is_stablecoin")?,
            provider_symbol: r.try_get("provider_symbol")?,
            provider_chain: r.try_get("provider_chain")?,
            raw_metadata: r.try_get("raw_metadata")?,
        },
        manual_deposit: r.try_get("manual_deposit")?,
        manual_withdraw: r.try_get("manual_withdraw")?,
        status_note: r.try_get("status_note")?,
        last_synced_at: r.try_get("last_synced_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

/// Load one asset row by its unique key.
pub async fn find_asset(
    pool: &PgPool,
    exchange_id: i64,
    asset_code: &str,
    chain_code: &str,
) -> Result<Option<AssetRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {ASSET_COLUMNS} FROM exchange_assets
         WHERE exchange_id = $1 AND asset_code = $2 AND chain_code = $3"
    ))
    .bind(exchange_id)
    .bind(asset_code)
    .bind(chain_code)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(asset_from_row).transpose()
}

/// Insert or partially update one asset row inside a single transaction.
///
/// The stored row is locked with `FOR UPDATE`, diffed against `fields`, and
/// only the differing columns are written.
pub async fn upsert_asset(
    pool: &PgPool,
    exchange_id: i64,
    asset_code: &str,
    chain_code: &str,
    fields: &AssetFields,
    synced_at: DateTime<Utc>,
) -> Result<UpsertOutcome, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query(&format!(
        "SELECT {ASSET_COLUMNS} FROM exchange_assets
         WHERE exchange_id = $1 AND asset_code = $2 AND chain_code = $3
         FOR UPDATE"
    ))
    .bind(exchange_id)
    .bind(asset_code)
    .bind(chain_code)
    .fetch_optional(&mut *tx)
    .await?;

    let outcome = match existing {
        None => {
            sqlx::query(
                "INSERT INTO exchange_assets (
                    exchange_id, asset_code, chain_code, asset_name, chain_name, asset_kind,
                    auto_deposit, auto_withdraw, confirmations_deposit, confirmations_withdraw,
                    deposit_fee_percent, deposit_fee_fixed, deposit_min, deposit_max,
                    withdraw_fee_percent, withdraw_fee_fixed, withdraw_min, withdraw_max,
                    amount_precision, requires_memo, is_stablecoin, provider_symbol,
                    provider_chain, raw_metadata, last_synced_at
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
                )",
            )
            .bind(exchange_id)
            .bind(asset_code)
            .bind(chain_code)
            .bind(&fields.asset_name)
            .bind(&fields.chain_name)
            .bind(fields.asset_kind.as_str())
            .bind(fields.auto_deposit)
            .bind(fields.auto_withdraw)
            .bind(fields.confirmations_deposit)
            .bind(fields.confirmations_withdraw)
            .bind(fields.deposit_fee_percent)
            .bind(fields.deposit_fee_fixed)
            .bind(fields.deposit_min)
            .bind(fields.deposit_max)
            .bind(fields.withdraw_fee_percent)
            .bind(fields.withdraw_fee_fixed)
            .bind(fields.withdraw_min)
            .bind(fields.withdraw_max)
            .bind(fields.amount_precision)
            .bind(fields.requires_memo)
            .bind(fields.is_stablecoin)
            .bind(&fields.provider_symbol)
            .bind(&fields.provider_chain)
            .bind(&fields.raw_metadata)
            .bind(synced_at)
            .execute(&mut *tx)
            .await?;
            UpsertOutcome::Created
        }
        Some(row) => {
            let current = asset_from_row(&row)?;
            let changes = fields.diff(&current.fields);

            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE exchange_assets SET ");
            let mut set = qb.separated(", ");
            for change in &changes {
                set.push(format!("{} = ", change.column));
                match &change.value {
                    FieldValue::Bool(v) => set.push_bind_unseparated(*v),
                    FieldValue::Int(v) => set.push_bind_unseparated(*v),
                    FieldValue::Decimal(v) => set.push_bind_unseparated(*v),
                    FieldValue::Text(v) => set.push_bind_unseparated(v.clone()),
                    FieldValue::Kind(v) => set.push_bind_unseparated(v.as_str()),
                    FieldValue::Json(v) => set.push_bind_unseparated(v.clone()),
                };
            }
            set.push("last_synced_at = ");
            set.push_bind_unseparated(synced_at);
            if !changes.is_empty() {
                set.push("updated_at = NOW()");
            }
            qb.push(" WHERE id = ");
            qb.push_bind(current.id);
            qb.build().execute(&mut *tx).await?;

            if changes.is_empty() {
                UpsertOutcome::Unchanged
            } else {
                UpsertOutcome::Updated
            }
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

/// Rows with AD or AW set.
pub async fn list_enabled_assets(
    pool: &PgPool,
    exchange_id: i64,
) -> Result<Vec<AssetRecord>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {ASSET_COLUMNS} FROM exchange_assets
         WHERE exchange_id = $1 AND (auto_deposit OR auto_withdraw)
         ORDER BY id ASC"
    ))
    .bind(exchange_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(asset_from_row).collect()
}

/// Soft-disable a row. Manual flags are left alone.
pub async fn disable_asset(pool: &PgPool, id: i64, note: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE exchange_assets
         SET auto_deposit = FALSE, auto_withdraw = FALSE, status_note = $2, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(id)
    .bind(note)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn count_assets(pool: &PgPool, exchange_id: i64) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM exchange_assets WHERE exchange_id = $1")
        .bind(exchange_id)
        .fetch_one(pool)
        .await?;
    row.try_get("n")
}

// ---------------------------------------------------------------------------
// Exchanges
// ---------------------------------------------------------------------------

const EXCHANGE_COLUMNS: &str =
    "id, name, provider, exchange_kind, is_available, can_receive, can_send, stablecoin";

fn exchange_from_row(r: &PgRow) -> Result<Exchange, sqlx::Error> {
    let provider: String = r.try_get("provider")?;
    let kind: String = r.try_get("exchange_kind")?;
    Ok(Exchange {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        provider: provider.parse().map_err(decode_err)?,
        kind: kind.parse().map_err(decode_err)?,
        is_available: r.try_get("is_available")?,
        can_receive: r.try_get("can_receive")?,
        can_send: r.try_get("can_send")?,
        stablecoin: r.try_get("stablecoin")?,
    })
}

pub async fn get_exchange(pool: &PgPool, id: i64) -> Result<Option<Exchange>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {EXCHANGE_COLUMNS} FROM exchanges WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(exchange_from_row).transpose()
}

/// Exchanges ordered by id, optionally filtered by provider code.
pub async fn list_exchanges(
    pool: &PgPool,
    providers: &[Provider],
) -> Result<Vec<Exchange>, sqlx::Error> {
    let codes: Vec<String> = providers.iter().map(|p| p.as_str().to_string()).collect();
    let rows = sqlx::query(&format!(
        "SELECT {EXCHANGE_COLUMNS} FROM exchanges
         WHERE cardinality($1::text[]) = 0 OR provider = ANY($1)
         ORDER BY id ASC"
    ))
    .bind(&codes)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        match exchange_from_row(row) {
            Ok(ex) => out.push(ex),
            Err(e) => tracing::warn!(error = %e, "Skipping exchange row with unknown provider/kind"),
        }
    }
    Ok(out)
}

/// First enabled API key pair for an exchange.
pub async fn credentials(pool: &PgPool, exchange_id: i64) -> Result<Option<Credentials>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT api_key, api_secret FROM exchange_api_keys
         WHERE exchange_id = $1 AND is_enabled
         ORDER BY id ASC
         LIMIT 1",
    )
    .bind(exchange_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Credentials {
        api_key: r.get("api_key"),
        api_secret: r.get("api_secret"),
    }))
}

/// Update `is_available` only when it differs. Returns whether it changed.
pub async fn set_availability(
    pool: &PgPool,
    exchange_id: i64,
    available: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exchanges SET is_available = $2, updated_at = NOW()
         WHERE id = $1 AND is_available IS DISTINCT FROM $2",
    )
    .bind(exchange_id)
    .bind(available)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn log_availability(pool: &PgPool, entry: &AvailabilityEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO exchange_availability_log
            (exchange_id, is_available, code, detail, latency_ms, checked_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(entry.exchange_id)
    .bind(entry.is_available)
    .bind(&entry.code)
    .bind(&entry.detail)
    .bind(entry.latency_ms)
    .bind(entry.checked_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn prune_availability(pool: &PgPool, before: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM exchange_availability_log WHERE checked_at < $1")
        .bind(before)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Append a stats snapshot to `stats_history`, optionally replacing `stablecoin`.
pub async fn append_stats(
    pool: &PgPool,
    exchange_id: i64,
    snapshot: &serde_json::Value,
    stablecoin: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE exchanges
         SET stats_history = stats_history || jsonb_build_array($2::jsonb),
             stablecoin = COALESCE($3, stablecoin),
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(exchange_id)
    .bind(snapshot)
    .bind(stablecoin)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Prices
// ---------------------------------------------------------------------------

/// Append one sampled quote.
pub async fn insert_price(pool: &PgPool, row: &PriceRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO market_price_l1 (
            exchange_id, provider, src_symbol, src_base_code, src_quote_code,
            bid, ask, last, fee_taker_bps, fee_maker_bps,
            ts_src, ts_ingest, latency_ms, status, extras
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(row.exchange_id)
    .bind(row.provider.as_str())
    .bind(&row.src_symbol)
    .bind(&row.base)
    .bind(&row.quote)
    .bind(row.bid)
    .bind(row.ask)
    .bind(row.last)
    .bind(row.fee_taker_bps)
    .bind(row.fee_maker_bps)
    .bind(row.ts_src)
    .bind(row.ts_ingest)
    .bind(row.latency_ms)
    .bind(&row.status)
    .bind(&row.extras)
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent durable row for a pair.
pub async fn latest_price(
    pool: &PgPool,
    exchange_id: i64,
    base: &str,
    quote: &str,
) -> Result<Option<PriceRow>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT exchange_id, provider, src_symbol, src_base_code, src_quote_code,
                bid, ask, last, fee_taker_bps, fee_maker_bps,
                ts_src, ts_ingest, latency_ms, status, extras
         FROM market_price_l1
         WHERE exchange_id = $1 AND src_base_code = $2 AND src_quote_code = $3
         ORDER BY ts_src DESC
         LIMIT 1",
    )
    .bind(exchange_id)
    .bind(base)
    .bind(quote)
    .fetch_optional(pool)
    .await?;

    let Some(r) = row else {
        return Ok(None);
    };
    let provider: String = r.try_get("provider")?;
    Ok(Some(PriceRow {
        exchange_id: r.try_get("exchange_id")?,
        provider: provider.parse().map_err(decode_err)?,
        src_symbol: r.try_get("src_symbol")?,
        base: r.try_get("src_base_code")?,
        quote: r.try_get("src_quote_code")?,
        bid: r.try_get("bid")?,
        ask: r.try_get("ask")?,
        last: r.try_get("last")?,
        fee_taker_bps: r.try_get("fee_taker_bps")?,
        fee_maker_bps: r.try_get("fee_maker_bps")?,
        ts_src: r.try_get("ts_src")?,
        ts_ingest: r.try_get("ts_ingest")?,
        latency_ms: r.try_get("latency_ms")?,
        status: r.try_get("status")?,
        extras: r.try_get("extras")?,
    }))
}

/// Replace the latest quote for a pair.
pub async fn upsert_latest_quote(pool: &PgPool, quote: &L1Quote) -> Result<(), sqlx::Error> {
    let ts_src = DateTime::<Utc>::from_timestamp_millis(quote.ts_src_ms).unwrap_or_else(Utc::now);
    sqlx::query(
        "INSERT INTO price_l1_latest
            (exchange_id, base_code, quote_code, provider, src_symbol, bid, ask, last, ts_src)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (exchange_id, base_code, quote_code) DO UPDATE
         SET provider = EXCLUDED.provider, src_symbol = EXCLUDED.src_symbol,
             bid = EXCLUDED.bid, ask = EXCLUDED.ask, last = EXCLUDED.last,
             ts_src = EXCLUDED.ts_src, updated_at = NOW()",
    )
    .bind(quote.exchange_id)
    .bind(&quote.base)
    .bind(&quote.quote)
    .bind(quote.provider.as_str())
    .bind(&quote.src_symbol)
    .bind(quote.bid)
    .bind(quote.ask)
    .bind(quote.last)
    .bind(ts_src)
    .execute(pool)
    .await?;
    Ok(())
}

// These run against a throwaway database created from DATABASE_URL:
// `cargo test -p marketsync-data -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn fields() -> AssetFields {
        AssetFields {
            asset_name: "Tether".into(),
            chain_name: "Tron".into(),
            asset_kind: AssetKind::Crypto,
            auto_deposit: true,
            auto_withdraw: true,
            confirmations_deposit: 1,
            confirmations_withdraw: 20,
            deposit_fee_percent: dec!(0),
            deposit_fee_fixed: dec!(0),
            deposit_min: dec!(1),
            deposit_max: dec!(0),
            withdraw_fee_percent: dec!(0),
            withdraw_fee_fixed: dec!(1.5),
            withdraw_min: dec!(10),
            withdraw_max: dec!(0),
            amount_precision: 6,
            requires_memo: false,
            is_stablecoin: true,
            provider_symbol: "USDT".into(),
            provider_chain: "TRC20".into(),
            raw_metadata: serde_json::json!({"chain": "TRC20"}),
        }
    }

    async fn seed_exchange(pool: &PgPool) -> i64 {
        sqlx::query("INSERT INTO exchanges (name, provider) VALUES ('Bybit', 'BYBIT') RETURNING id")
            .fetch_one(pool)
            .await
            .unwrap()
            .get("id")
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn test_upsert_writes_only_changed_columns(pool: PgPool) {
        let exchange_id = seed_exchange(&pool).await;
        let t0 = Utc::now();

        let outcome = upsert_asset(&pool, exchange_id, "USDT", "TRX", &fields(), t0)
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);

        // Operator-owned columns are outside the synced field set.
        sqlx::query(
            "UPDATE exchange_assets SET manual_deposit = FALSE, status_note = 'ops hold'
             WHERE exchange_id = $1",
        )
        .bind(exchange_id)
        .execute(&pool)
        .await
        .unwrap();
        let created = find_asset(&pool, exchange_id, "USDT", "TRX").await.unwrap().unwrap();

        let t1 = t0 + chrono::Duration::seconds(60);
        let outcome = upsert_asset(&pool, exchange_id, "USDT", "TRX", &fields(), t1)
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        let unchanged = find_asset(&pool, exchange_id, "USDT", "TRX").await.unwrap().unwrap();
        assert_eq!(unchanged.updated_at, created.updated_at);
        assert_eq!(
            unchanged.last_synced_at.map(|t| t.timestamp()),
            Some(t1.timestamp())
        );

        tokio::time::sleep(Duration::from_millis(5)).await;
        let mut next = fields();
        next.withdraw_fee_fixed = dec!(2);
        next.auto_deposit = false;
        let outcome = upsert_asset(&pool, exchange_id, "USDT", "TRX", &next, t1)
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let updated = find_asset(&pool, exchange_id, "USDT", "TRX").await.unwrap().unwrap();
        assert_eq!(updated.fields, next);
        assert!(updated.updated_at > created.updated_at);
        assert!(!updated.manual_deposit);
        assert!(updated.manual_withdraw);
        assert_eq!(updated.status_note, "ops hold");
        assert_eq!(count_assets(&pool, exchange_id).await.unwrap(), 1);
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn test_crossed_price_row_is_rejected(pool: PgPool) {
        let exchange_id = seed_exchange(&pool).await;
        let now = Utc::now();
        let row = PriceRow {
            exchange_id,
            provider: Provider::Bybit,
            src_symbol: "BTCUSDT".into(),
            base: "BTC".into(),
            quote: "USDT".into(),
            bid: dec!(101),
            ask: dec!(100),
            last: None,
            fee_taker_bps: None,
            fee_maker_bps: None,
            ts_src: now,
            ts_ingest: now,
            latency_ms: 0,
            status: "OK".into(),
            extras: serde_json::json!({}),
        };
        assert!(insert_price(&pool, &row).await.is_err());
        assert!(latest_price(&pool, exchange_id, "BTC", "USDT").await.unwrap().is_none());
    }
}
