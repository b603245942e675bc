//! Database operations for sync bookkeeping: pending ops and cursors.

use catalog_engine::{PendingOp, Sequence};
use sqlx::types::Json;
use sqlx::SqlitePool;

fn seq_param(seq: Sequence) -> i64 {
    i64::try_from(seq).unwrap_or(i64::MAX)
}

/// Get all pending ops, oldest first.
pub async fn load_pending(pool: &SqlitePool) -> Result<Vec<PendingOp>, sqlx::Error> {
    let rows = sqlx::query_scalar::<_, Json<PendingOp>>(
        r#"
        SELECT op
        FROM pending_ops
        ORDER BY seq
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|Json(op)| op).collect())
}

/// Store `op`, replacing the pending op of the same product.
pub async fn save_pending(pool: &SqlitePool, op: &PendingOp) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO pending_ops (product_id, seq, op)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (product_id) DO UPDATE SET
            seq = excluded.seq,
            op = excluded.op
        "#,
    )
    .bind(&op.product_id)
    .bind(seq_param(op.seq))
    .bind(Json(op))
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete the pending op of `product_id` if it is still `seq`.
pub async fn remove_pending(
    pool: &SqlitePool,
    product_id: &str,
    seq: Sequence,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pending_ops WHERE product_id = ?1 AND seq = ?2")
        .bind(product_id)
        .bind(seq_param(seq))
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete the pending op of `product_id`, whatever its sequence.
pub async fn discard_pending(pool: &SqlitePool, product_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pending_ops WHERE product_id = ?1")
        .bind(product_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Get the cursor token of `collection`.
pub async fn load_cursor(
    pool: &SqlitePool,
    collection: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT cursor FROM sync_state WHERE collection = ?1")
        .bind(collection)
        .fetch_optional(pool)
        .await
}

/// Store the cursor token of `collection`.
pub async fn save_cursor(
    pool: &SqlitePool,
    collection: &str,
    token: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sync_state (collection, cursor)
        VALUES (?1, ?2)
        ON CONFLICT (collection) DO UPDATE SET cursor = excluded.cursor
        "#,
    )
    .bind(collection)
    .bind(token)
    .execute(pool)
    .await?;

    Ok(())
}
