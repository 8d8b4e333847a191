use super::{page_offset, GrabPropertyRepository, ResourceRepository, ThumbnailRepository};
use crate::config::DatabaseConfig;
use crate::error::{ResourceError, Result};
use crate::model::{
    GrabInput, GrabKey, GrabProperty, NewResource, Page, Resource, ResourceChanges,
    ResourceFilter, ResourceTranslation, ThumbnailDefinition,
};
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions};
use sqlx::query::QueryAs;
use sqlx::Postgres;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const RESOURCE_COLUMNS: &str = r#"
    id, disk, path, extension, original_name, safe_name, mime_type,
    size, checksum, uploaded_by, owner_id, preserve, original_at,
    created_at, updated_at, deleted_at
"#;

const GRAB_COLUMNS: &str = r#"
    id, resource_id, thumbnail_id, source_type, source_id,
    x, y, zoom, created_at, updated_at
"#;

/// PostgreSQL-backed repository
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Create a new repository with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        use anyhow::Context;

        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Append the WHERE conditions of `filter`, numbering parameters from `param_count`
fn push_filter(sql: &mut String, filter: &ResourceFilter, param_count: &mut usize) {
    sql.push_str(" WHERE 1=1");

    if !filter.with_trashed {
        sql.push_str(" AND deleted_at IS NULL");
    }

    if filter.checksum.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND checksum = ${}", param_count));
    }

    if filter.preserve.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND preserve = ${}", param_count));
    }

    if filter.owner_id.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND owner_id = ${}", param_count));
    }

    if filter.disk.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND disk = ${}", param_count));
    }

    if filter.mime_type.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND mime_type = ${}", param_count));
    }

    if filter.search.is_some() {
        *param_count += 1;
        sql.push_str(&format!(" AND original_name ILIKE ${}", param_count));
    }
}

/// Bind the parameters pushed by [`push_filter`], in the same order
fn bind_filter<'q, O>(
    mut query: QueryAs<'q, Postgres, O, PgArguments>,
    filter: &'q ResourceFilter,
) -> QueryAs<'q, Postgres, O, PgArguments> {
    if let Some(ref checksum) = filter.checksum {
        query = query.bind(checksum);
    }
    if let Some(preserve) = filter.preserve {
        query = query.bind(preserve);
    }
    if let Some(ref owner_id) = filter.owner_id {
        query = query.bind(owner_id);
    }
    if let Some(ref disk) = filter.disk {
        query = query.bind(disk);
    }
    if let Some(ref mime_type) = filter.mime_type {
        query = query.bind(mime_type);
    }
    if let Some(ref search) = filter.search {
        query = query.bind(format!("%{}%", search));
    }
    query
}

#[async_trait]
impl ResourceRepository for PgRepository {
    #[instrument(skip(self, resource), fields(resource_id = %resource.id))]
    async fn create(&self, resource: NewResource) -> Result<Resource> {
        let sql = format!(
            r#"
            INSERT INTO resources (
                id, disk, path, extension, original_name, safe_name,
                mime_type, size, uploaded_by, owner_id, preserve,
                original_at, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10, $11,
                $12, NOW(), NOW()
            )
            RETURNING {RESOURCE_COLUMNS}
            "#
        );

        let created = sqlx::query_as::<_, Resource>(&sql)
            .bind(&resource.id)
            .bind(&resource.disk)
            .bind(&resource.path)
            .bind(&resource.extension)
            .bind(&resource.original_name)
            .bind(&resource.safe_name)
            .bind(&resource.mime_type)
            .bind(resource.size)
            .bind(&resource.uploaded_by)
            .bind(&resource.owner_id)
            .bind(resource.preserve)
            .bind(resource.original_at)
            .fetch_one(&self.pool)
            .await?;

        debug!(resource_id = %created.id, path = %created.path, "Resource record created");
        Ok(created)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Resource>> {
        let sql = format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1 AND deleted_at IS NULL"
        );

        let resource = sqlx::query_as::<_, Resource>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(resource)
    }

    async fn find_by_id_with_trashed(&self, id: &str) -> Result<Option<Resource>> {
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1");

        let resource = sqlx::query_as::<_, Resource>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(resource)
    }

    async fn find_many(&self, ids: &[String]) -> Result<Vec<Resource>> {
        let sql = format!(
            r#"
            SELECT {RESOURCE_COLUMNS} FROM resources
            WHERE id = ANY($1) AND deleted_at IS NULL
            ORDER BY created_at ASC
            "#
        );

        let resources = sqlx::query_as::<_, Resource>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(resources)
    }

    #[instrument(skip(self))]
    async fn find_one_by(&self, filter: &ResourceFilter) -> Result<Option<Resource>> {
        let mut sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources");
        let mut param_count = 0;
        push_filter(&mut sql, filter, &mut param_count);
        sql.push_str(" ORDER BY created_at ASC, id ASC LIMIT 1");

        let query = bind_filter(sqlx::query_as::<_, Resource>(&sql), filter);
        let resource = query.fetch_optional(&self.pool).await?;

        Ok(resource)
    }

    #[instrument(skip(self, changes))]
    async fn update(&self, id: &str, changes: ResourceChanges) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE resources SET
                checksum = COALESCE($2, checksum),
                size = COALESCE($3, size),
                preserve = COALESCE($4, preserve),
                owner_id = COALESCE($5, owner_id),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&changes.checksum)
        .bind(changes.size)
        .bind(changes.preserve)
        .bind(&changes.owner_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ResourceError::resource_not_found(id));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_soft(&self, ids: &[String]) -> Result<Vec<Resource>> {
        let sql = format!(
            r#"
            UPDATE resources SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = ANY($1) AND deleted_at IS NULL
            RETURNING {RESOURCE_COLUMNS}
            "#
        );

        let deleted = sqlx::query_as::<_, Resource>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn restore(&self, ids: &[String]) -> Result<Vec<Resource>> {
        let sql = format!(
            r#"
            UPDATE resources SET deleted_at = NULL, updated_at = NOW()
            WHERE id = ANY($1) AND deleted_at IS NOT NULL
            RETURNING {RESOURCE_COLUMNS}
            "#
        );

        let restored = sqlx::query_as::<_, Resource>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(restored)
    }

    #[instrument(skip(self))]
    async fn force_delete(&self, ids: &[String]) -> Result<Vec<Resource>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM resource_translations WHERE resource_id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await?;

        let sql = format!("DELETE FROM resources WHERE id = ANY($1) RETURNING {RESOURCE_COLUMNS}");
        let deleted = sqlx::query_as::<_, Resource>(&sql)
            .bind(ids)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(deleted_count = deleted.len(), "Force deleted resources");
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn list_paginated(
        &self,
        filter: &ResourceFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Resource>> {
        let page = page.max(1);

        let mut count_sql = String::from("SELECT COUNT(*) FROM resources");
        let mut param_count = 0;
        push_filter(&mut count_sql, filter, &mut param_count);

        let count: (i64,) = bind_filter(sqlx::query_as::<_, (i64,)>(&count_sql), filter)
            .fetch_one(&self.pool)
            .await?;

        let mut sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources");
        let mut param_count = 0;
        push_filter(&mut sql, filter, &mut param_count);
        sql.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        ));

        let items = bind_filter(sqlx::query_as::<_, Resource>(&sql), filter)
            .bind(per_page as i64)
            .bind(i64::try_from(page_offset(page, per_page)).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            items,
            page,
            per_page,
            total: count.0,
        })
    }

    async fn translations(&self, resource_id: &str) -> Result<Vec<ResourceTranslation>> {
        let translations = sqlx::query_as::<_, ResourceTranslation>(
            r#"
            SELECT resource_id, language, label, caption, alt_text
            FROM resource_translations
            WHERE resource_id = $1
            ORDER BY language ASC
            "#,
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(translations)
    }

    async fn save_translation(&self, translation: ResourceTranslation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resource_translations (resource_id, language, label, caption, alt_text)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (resource_id, language) DO UPDATE SET
                label = EXCLUDED.label,
                caption = EXCLUDED.caption,
                alt_text = EXCLUDED.alt_text
            "#,
        )
        .bind(&translation.resource_id)
        .bind(&translation.language)
        .bind(&translation.label)
        .bind(&translation.caption)
        .bind(&translation.alt_text)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ThumbnailRepository for PgRepository {
    async fn find_thumbnail(&self, id: &str) -> Result<Option<ThumbnailDefinition>> {
        let thumbnail = sqlx::query_as::<_, ThumbnailDefinition>(
            "SELECT id, width, height, fit, grab_enabled, description FROM thumbnails WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(thumbnail)
    }

    async fn find_thumbnails(&self, ids: &[String]) -> Result<Vec<ThumbnailDefinition>> {
        let thumbnails = sqlx::query_as::<_, ThumbnailDefinition>(
            "SELECT id, width, height, fit, grab_enabled, description FROM thumbnails WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(thumbnails)
    }

    async fn upsert_thumbnail(&self, thumbnail: ThumbnailDefinition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO thumbnails (id, width, height, fit, grab_enabled, description)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                fit = EXCLUDED.fit,
                grab_enabled = EXCLUDED.grab_enabled,
                description = EXCLUDED.description
            "#,
        )
        .bind(&thumbnail.id)
        .bind(thumbnail.width)
        .bind(thumbnail.height)
        .bind(thumbnail.fit)
        .bind(thumbnail.grab_enabled)
        .bind(&thumbnail.description)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl GrabPropertyRepository for PgRepository {
    async fn find_grab(&self, key: &GrabKey) -> Result<Option<GrabProperty>> {
        let sql = format!(
            r#"
            SELECT {GRAB_COLUMNS} FROM grab_properties
            WHERE resource_id = $1 AND thumbnail_id = $2
              AND source_type = $3 AND source_id = $4
            "#
        );

        let grab = sqlx::query_as::<_, GrabProperty>(&sql)
            .bind(&key.resource_id)
            .bind(&key.thumbnail_id)
            .bind(&key.source_type)
            .bind(&key.source_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(grab)
    }

    async fn create_grab(&self, input: &GrabInput) -> Result<GrabProperty> {
        let sql = format!(
            r#"
            INSERT INTO grab_properties (
                id, resource_id, thumbnail_id, source_type, source_id,
                x, y, zoom, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            RETURNING {GRAB_COLUMNS}
            "#
        );

        let grab = sqlx::query_as::<_, GrabProperty>(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(&input.resource_id)
            .bind(&input.thumbnail_id)
            .bind(&input.source_type)
            .bind(&input.source_id)
            .bind(input.x)
            .bind(input.y)
            .bind(input.zoom)
            .fetch_one(&self.pool)
            .await?;

        Ok(grab)
    }

    async fn update_grab(&self, input: &GrabInput) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE grab_properties SET x = $5, y = $6, zoom = $7, updated_at = NOW()
            WHERE resource_id = $1 AND thumbnail_id = $2
              AND source_type = $3 AND source_id = $4
            "#,
        )
        .bind(&input.resource_id)
        .bind(&input.thumbnail_id)
        .bind(&input.source_type)
        .bind(&input.source_id)
        .bind(input.x)
        .bind(input.y)
        .bind(input.zoom)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ResourceError::NotFound {
                kind: "GrabProperty",
                id: format!("{}/{}", input.resource_id, input.thumbnail_id),
            });
        }

        Ok(())
    }
}
