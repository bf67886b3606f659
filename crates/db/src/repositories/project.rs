use sqlx::{sqlite::SqliteRow, Row};

use factory_core::domain::project::{Project, ProjectId, UserId};

use super::agent::parse_timestamp;
use super::{ProjectRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProjectRepository {
    pool: DbPool,
}

impl SqlProjectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProjectRepository for SqlProjectRepository {
    async fn find_by_id(&self, id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let row = sqlx::query("SELECT id, user_id, name, created_at FROM project WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(project_from_row).transpose()
    }

    async fn save(&self, project: Project) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO project (id, user_id, name, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                name = excluded.name",
        )
        .bind(&project.id.0)
        .bind(&project.user_id.0)
        .bind(&project.name)
        .bind(project.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn project_from_row(row: SqliteRow) -> Result<Project, RepositoryError> {
    Ok(Project {
        id: ProjectId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        name: row.try_get("name")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
