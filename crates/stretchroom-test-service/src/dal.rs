//! Persistence for `test_table`.

use sqlx::FromRow;
use sqlx::migrate::Migrator;

use crate::contracts::EntityResponseDto;

/// Migrations embedded from `migrations/sqlite`.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations/sqlite");

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TestTableDbo {
    pub id: i64,
    pub name: String,
}

impl From<TestTableDbo> for EntityResponseDto {
    fn from(dbo: TestTableDbo) -> Self {
        Self {
            id: dbo.id,
            name: dbo.name,
        }
    }
}
