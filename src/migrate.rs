use anyhow::Result;
use sqlx::SqlitePool;

/// Create the activities and sources tables. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // created_at is unix milliseconds; embedding is little-endian f32 bytes
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS activities (
            uid TEXT PRIMARY KEY,
            source_uid TEXT NOT NULL,
            source_type TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            url TEXT NOT NULL,
            image_url TEXT,
            created_at INTEGER NOT NULL,
            short_summary TEXT NOT NULL,
            full_summary TEXT NOT NULL,
            raw_json TEXT NOT NULL,
            embedding BLOB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            uid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            type TEXT NOT NULL,
            config_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_activities_source_uid ON activities(source_uid)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_activities_created_at ON activities(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
