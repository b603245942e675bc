//! Database operations for the products table.

use catalog_engine::{Product, ProductId};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

/// Ids bound per `IN (...)` lookup.
const LOOKUP_CHUNK: usize = 500;

/// A stored product row from the database.
#[derive(Debug)]
pub struct StoredProduct {
    pub seq: i64,
    pub id: String,
    pub document: Product,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredProduct {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let Json(document) = row.try_get::<Json<Product>, _>("document")?;
        Ok(StoredProduct {
            seq: row.try_get("seq")?,
            id: row.try_get("id")?,
            document,
        })
    }
}

/// Insert a product, or replace the document stored under its id.
///
/// The row keeps its original position in storage order.
pub async fn upsert_product(pool: &SqlitePool, product: &Product) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO products (id, document, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (id) DO UPDATE SET
            document = excluded.document,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&product.id)
    .bind(Json(product))
    .bind(i64::try_from(product.updated_at).unwrap_or(i64::MAX))
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a product by id.
pub async fn get_product(pool: &SqlitePool, id: &str) -> Result<Option<Product>, sqlx::Error> {
    let row = sqlx::query_as::<_, StoredProduct>(
        r#"
        SELECT seq, id, document
        FROM products
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.document))
}

/// Get the products among `ids` that exist, in storage order.
pub async fn get_products(
    pool: &SqlitePool,
    ids: &[ProductId],
) -> Result<Vec<Product>, sqlx::Error> {
    let mut rows = Vec::with_capacity(ids.len());

    for chunk in ids.chunks(LOOKUP_CHUNK) {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT seq, id, document FROM products WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in chunk {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let mut found = builder
            .build_query_as::<StoredProduct>()
            .fetch_all(pool)
            .await?;
        rows.append(&mut found);
    }

    rows.sort_by_key(|r| r.seq);
    Ok(rows.into_iter().map(|r| r.document).collect())
}

/// Get every product in storage order.
pub async fn list_products(pool: &SqlitePool) -> Result<Vec<Product>, sqlx::Error> {
    let rows = sqlx::query_as::<_, StoredProduct>(
        r#"
        SELECT seq, id, document
        FROM products
        ORDER BY seq
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.document).collect())
}

/// Get every product id in storage order.
pub async fn list_product_ids(pool: &SqlitePool) -> Result<Vec<ProductId>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT id FROM products ORDER BY seq")
        .fetch_all(pool)
        .await
}

/// Delete a product. Returns whether a row was removed.
pub async fn delete_product(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM products WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
