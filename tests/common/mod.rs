use sqlx::PgPool;

/// Connects to the test database named by DATABASE_URL and applies the
/// schema. Returns None (and the caller skips) when no database is
/// configured, so the suite stays runnable on machines without Postgres.
pub async fn try_setup_test_db() -> Option<PgPool> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping database-backed test");
            return None;
        }
    };

    let pool = PgPool::connect(&database_url)
        .await
        .expect("failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to apply migrations");

    Some(pool)
}
