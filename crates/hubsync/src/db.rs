//! Database connection utilities.

use sea_orm::{Database, DatabaseConnection, DbErr};

/// Configure SQLite pragmas for concurrent writers.
///
/// - `journal_mode=WAL` so readers don't block writers
/// - `busy_timeout=5000` to wait on locks instead of failing immediately
/// - `synchronous=NORMAL`, which is safe with WAL
async fn configure_sqlite(db: &DatabaseConnection) -> Result<(), DbErr> {
    use sea_orm::{ConnectionTrait, Statement};

    for pragma in [
        "PRAGMA journal_mode=WAL",
        "PRAGMA busy_timeout=5000",
        "PRAGMA synchronous=NORMAL",
    ] {
        db.execute(Statement::from_string(
            db.get_database_backend(),
            pragma.to_string(),
        ))
        .await?;
    }

    Ok(())
}

/// Establish a connection to the database.
///
/// File-backed SQLite databases get WAL mode and a busy timeout.
///
/// # Errors
/// Returns `DbErr` if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;

    if database_url.starts_with("sqlite://") {
        configure_sqlite(&db).await?;
    }

    Ok(db)
}

/// Establish a connection to the database and run all pending migrations.
///
/// # Errors
/// Returns `DbErr` if the connection cannot be established or migrations fail.
///
/// # Example
/// ```ignore
/// let db = hubsync::connect_and_migrate("sqlite://hubsync.db?mode=rwc").await?;
/// let cache = hubsync::cache::DbCacheStore::new(db);
/// ```
#[cfg(feature = "migrate")]
pub async fn connect_and_migrate(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    use sea_orm_migration::MigratorTrait;

    let db = connect(database_url).await?;
    crate::migration::Migrator::up(&db, None).await?;
    Ok(db)
}
