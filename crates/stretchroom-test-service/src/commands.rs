//! Commands over `test_table`.
//!
//! Each command is registered scoped: the executor builds a fresh handler
//! around the shared pool for every request.

use std::future::Future;

use async_trait::async_trait;
use axum::http::StatusCode;
use sqlx::SqlitePool;
use stretchroom_infrastructure::{ApiError, ApiResult, Command, CommandRegistry};
use tokio_util::sync::CancellationToken;

use crate::dal::TestTableDbo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddEntityContext {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddEntityResult {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetEntitiesContext;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetEntitiesResult {
    pub entities: Vec<TestTableDbo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteElementContext {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteElementResult {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEntityContext {
    pub current_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateEntityResult;

fn db_error(error: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() {
            return ApiError::conflict("Entity with this name already exists");
        }
    }
    ApiError::from_error(error, None)
}

/// Race `query` against `token`.
async fn cancellable<T>(
    token: &CancellationToken,
    query: impl Future<Output = Result<T, sqlx::Error>>,
) -> ApiResult<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ApiError::from_error(
            "command cancelled",
            Some(StatusCode::SERVICE_UNAVAILABLE),
        )),
        result = query => result.map_err(db_error),
    }
}

#[derive(Debug, Clone)]
pub struct AddEntityCommand {
    pool: SqlitePool,
}

impl AddEntityCommand {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Command<AddEntityContext, AddEntityResult> for AddEntityCommand {
    async fn execute(
        &self,
        context: AddEntityContext,
        token: CancellationToken,
    ) -> ApiResult<AddEntityResult> {
        let dbo = cancellable(
            &token,
            sqlx::query_as::<_, TestTableDbo>(
                "INSERT INTO test_table (name) VALUES (?) RETURNING id, name",
            )
            .bind(&context.name)
            .fetch_one(&self.pool),
        )
        .await?;
        tracing::debug!(id = dbo.id, name = %dbo.name, "entity added");
        Ok(AddEntityResult {
            id: dbo.id,
            name: dbo.name,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GetEntitiesCommand {
    pool: SqlitePool,
}

impl GetEntitiesCommand {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Command<GetEntitiesContext, GetEntitiesResult> for GetEntitiesCommand {
    async fn execute(
        &self,
        _context: GetEntitiesContext,
        token: CancellationToken,
    ) -> ApiResult<GetEntitiesResult> {
        let entities = cancellable(
            &token,
            sqlx::query_as::<_, TestTableDbo>("SELECT id, name FROM test_table ORDER BY id")
                .fetch_all(&self.pool),
        )
        .await?;
        Ok(GetEntitiesResult { entities })
    }
}

#[derive(Debug, Clone)]
pub struct DeleteElementCommand {
    pool: SqlitePool,
}

impl DeleteElementCommand {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Command<DeleteElementContext, DeleteElementResult> for DeleteElementCommand {
    async fn execute(
        &self,
        context: DeleteElementContext,
        token: CancellationToken,
    ) -> ApiResult<DeleteElementResult> {
        let done = cancellable(
            &token,
            sqlx::query("DELETE FROM test_table WHERE name = ?")
                .bind(&context.name)
                .execute(&self.pool),
        )
        .await?;
        Ok(DeleteElementResult {
            success: done.rows_affected() > 0,
        })
    }
}

#[derive(Debug, Clone)]
pub struct UpdateEntityCommand {
    pool: SqlitePool,
}

impl UpdateEntityCommand {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Command<UpdateEntityContext, UpdateEntityResult> for UpdateEntityCommand {
    async fn execute(
        &self,
        context: UpdateEntityContext,
        token: CancellationToken,
    ) -> ApiResult<UpdateEntityResult> {
        let done = cancellable(
            &token,
            sqlx::query("UPDATE test_table SET name = ? WHERE name = ?")
                .bind(&context.new_name)
                .bind(&context.current_name)
                .execute(&self.pool),
        )
        .await?;
        if done.rows_affected() == 0 {
            return Err(ApiError::not_found("Entity not found"));
        }
        Ok(UpdateEntityResult)
    }
}

/// Register every `test_table` command, each scoped to a request.
pub fn register_commands(registry: &mut CommandRegistry, pool: &SqlitePool) {
    let add = pool.clone();
    let get = pool.clone();
    let delete = pool.clone();
    let update = pool.clone();
    registry
        .register_scoped::<AddEntityContext, AddEntityResult, _, _>(move || {
            AddEntityCommand::new(add.clone())
        })
        .register_scoped::<GetEntitiesContext, GetEntitiesResult, _, _>(move || {
            GetEntitiesCommand::new(get.clone())
        })
        .register_scoped::<DeleteElementContext, DeleteElementResult, _, _>(move || {
            DeleteElementCommand::new(delete.clone())
        })
        .register_scoped::<UpdateEntityContext, UpdateEntityResult, _, _>(move || {
            UpdateEntityCommand::new(update.clone())
        });
}
