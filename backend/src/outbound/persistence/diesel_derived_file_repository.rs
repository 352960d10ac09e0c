//! PostgreSQL-backed `DerivedFileRepository` implementation using Diesel ORM.
//!
//! Parcelwise artifacts point at their source through `source_file_id` with
//! `ON DELETE CASCADE`, so deleting a source also drops its artifacts and
//! their parcelwise rows.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use super::diesel_error_mapping::{
    DieselFailure, batches, classify_diesel_error, map_pool_error_message,
};
use super::models::{FileRow, NewFileRow, NewParcelwiseRow};
use super::pool::{DbPool, PoolError};
use super::schema::{derived_files, file_sequences, parcelwise_values};
use crate::domain::ports::{
    CommittedReduction, DerivedFileRepository, DerivedFileRepositoryError, ReductionCommit,
    ReplacedFile,
};
use crate::domain::{FileRecord, IndexStatus, NewFileRecord};

/// Diesel-backed derived file store.
///
/// # Examples
///
/// ```rust,no_run
/// use lesion_bank::outbound::persistence::{
///     DbPool, DieselDerivedFileRepository, PoolConfig,
/// };
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = DbPool::new(PoolConfig::new("postgres://localhost/lesion_bank")).await?;
/// let repository = DieselDerivedFileRepository::new(pool);
/// # let _ = repository;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DieselDerivedFileRepository {
    pool: DbPool,
}

impl DieselDerivedFileRepository {
    /// Create a repository over `pool`.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> DerivedFileRepositoryError {
    DerivedFileRepositoryError::connection(map_pool_error_message(error))
}

fn map_diesel_error(error: DieselError, operation: &str) -> DerivedFileRepositoryError {
    match classify_diesel_error(error, operation) {
        DieselFailure::Connection(message) => DerivedFileRepositoryError::connection(message),
        DieselFailure::Conflict(message) => DerivedFileRepositoryError::conflict(message),
        DieselFailure::NotFound => {
            DerivedFileRepositoryError::query(format!("{operation}: record not found"))
        }
        DieselFailure::Query(message) => DerivedFileRepositoryError::query(message),
    }
}

/// Like [`map_diesel_error`] but reports a missing row as a missing file.
fn map_file_error(
    file_id: i64,
    operation: &'static str,
) -> impl Fn(DieselError) -> DerivedFileRepositoryError {
    move |error| match error {
        DieselError::NotFound => DerivedFileRepositoryError::not_found(file_id),
        other => map_diesel_error(other, operation),
    }
}

fn into_record(row: FileRow) -> Result<FileRecord, DerivedFileRepositoryError> {
    FileRecord::try_from(row).map_err(DerivedFileRepositoryError::query)
}

async fn insert_file(conn: &mut AsyncPgConnection, file: &NewFileRecord) -> QueryResult<FileRow> {
    diesel::insert_into(derived_files::table)
        .values(NewFileRow::from(file))
        .returning(FileRow::as_returning())
        .get_result(conn)
        .await
}

#[async_trait]
impl DerivedFileRepository for DieselDerivedFileRepository {
    async fn find_duplicate(
        &self,
        content_hash: &str,
        path: Option<String>,
    ) -> Result<Option<FileRecord>, DerivedFileRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let query = derived_files::table
            .filter(derived_files::source_file_id.is_null())
            .into_boxed();
        let query = match path {
            Some(path) => query.filter(
                derived_files::content_hash
                    .eq(content_hash.to_owned())
                    .or(derived_files::path.eq(path)),
            ),
            None => query.filter(derived_files::content_hash.eq(content_hash.to_owned())),
        };
        let row = query
            .order(derived_files::id.asc())
            .select(FileRow::as_select())
            .first::<FileRow>(&mut conn)
            .await
            .optional()
            .map_err(|err| map_diesel_error(err, "find duplicate file"))?;
        row.map(into_record).transpose()
    }

    async fn find(&self, file_id: i64) -> Result<Option<FileRecord>, DerivedFileRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row = derived_files::table
            .find(file_id)
            .select(FileRow::as_select())
            .first::<FileRow>(&mut conn)
            .await
            .optional()
            .map_err(|err| map_diesel_error(err, "find file"))?;
        row.map(into_record).transpose()
    }

    async fn next_sequence(&self, key: &str) -> Result<i64, DerivedFileRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::insert_into(file_sequences::table)
            .values((
                file_sequences::owner_key.eq(key),
                file_sequences::last_value.eq(1_i64),
            ))
            .on_conflict(file_sequences::owner_key)
            .do_update()
            .set(file_sequences::last_value.eq(file_sequences::last_value + 1_i64))
            .returning(file_sequences::last_value)
            .get_result::<i64>(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "allocate file sequence"))
    }

    async fn insert(&self, file: &NewFileRecord) -> Result<FileRecord, DerivedFileRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row = conn
            .transaction(|conn| async move { insert_file(conn, file).await }.scope_boxed())
            .await
            .map_err(|err: DieselError| map_diesel_error(err, "insert file"))?;
        into_record(row)
    }

    async fn replace(
        &self,
        existing_id: i64,
        file: &NewFileRecord,
    ) -> Result<ReplacedFile, DerivedFileRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let (row, removed_paths) = conn
            .transaction(|conn| {
                async move {
                    let removed_paths: Vec<String> = derived_files::table
                        .filter(
                            derived_files::id
                                .eq(existing_id)
                                .or(derived_files::source_file_id.eq(existing_id)),
                        )
                        .order(derived_files::id.asc())
                        .select(derived_files::path)
                        .load(conn)
                        .await?;
                    let deleted = diesel::delete(derived_files::table.find(existing_id))
                        .execute(conn)
                        .await?;
                    if deleted == 0 {
                        return Err(DieselError::NotFound);
                    }
                    let row = insert_file(conn, file).await?;
                    Ok((row, removed_paths))
                }
                .scope_boxed()
            })
            .await
            .map_err(map_file_error(existing_id, "override file"))?;

        Ok(ReplacedFile {
            record: into_record(row)?,
            removed_paths,
        })
    }

    async fn commit_reduction(
        &self,
        commit: &ReductionCommit,
    ) -> Result<CommittedReduction, DerivedFileRepositoryError> {
        let source_id = commit.source_file_id;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let (row, superseded_paths) = conn
            .transaction(|conn| {
                async move {
                    let updated = diesel::update(derived_files::table.find(source_id))
                        .set((
                            derived_files::coordinate_space.eq(commit.coordinate_space.as_str()),
                            derived_files::index_status.eq(IndexStatus::Indexed.as_str()),
                            derived_files::index_error.eq(None::<String>),
                        ))
                        .execute(conn)
                        .await?;
                    if updated == 0 {
                        return Err(DieselError::NotFound);
                    }

                    let superseded_paths: Vec<String> = diesel::delete(
                        derived_files::table.filter(derived_files::source_file_id.eq(source_id)),
                    )
                    .returning(derived_files::path)
                    .get_results(conn)
                    .await?;

                    let row = insert_file(conn, &commit.artifact).await?;
                    let values = commit
                        .values
                        .iter()
                        .map(|value| NewParcelwiseRow {
                            file_id: row.id,
                            parcel_id: value.parcel_id,
                            value: value.value,
                        })
                        .collect::<Vec<_>>();
                    for batch in batches(&values, 3) {
                        diesel::insert_into(parcelwise_values::table)
                            .values(batch)
                            .execute(conn)
                            .await?;
                    }
                    Ok((row, superseded_paths))
                }
                .scope_boxed()
            })
            .await
            .map_err(map_file_error(source_id, "commit reduction"))?;

        Ok(CommittedReduction {
            artifact: into_record(row)?,
            superseded_paths,
        })
    }

    async fn pending_reductions(&self) -> Result<Vec<i64>, DerivedFileRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        derived_files::table
            .filter(derived_files::source_file_id.is_null())
            .filter(derived_files::index_status.eq(IndexStatus::Pending.as_str()))
            .order(derived_files::id.asc())
            .select(derived_files::id)
            .load::<i64>(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "load pending reductions"))
    }

    async fn set_index_status(
        &self,
        file_id: i64,
        status: IndexStatus,
        error: Option<String>,
    ) -> Result<(), DerivedFileRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let updated = diesel::update(derived_files::table.find(file_id))
            .set((
                derived_files::index_status.eq(status.as_str()),
                derived_files::index_error.eq(error),
            ))
            .execute(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "set index status"))?;
        if updated == 0 {
            return Err(DerivedFileRepositoryError::not_found(file_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn missing_rows_name_the_file() {
        let map = map_file_error(42, "override file");
        assert_eq!(
            map(DieselError::NotFound),
            DerivedFileRepositoryError::not_found(42)
        );
    }

    #[rstest]
    fn other_failures_keep_the_operation() {
        let map = map_file_error(42, "commit reduction");
        let mapped = map(DieselError::RollbackTransaction);
        assert!(matches!(
            mapped,
            DerivedFileRepositoryError::Query { ref message }
                if message.starts_with("commit reduction")
        ));
    }

    #[rstest]
    fn malformed_rows_surface_as_query_errors() {
        let row = FileRow {
            id: 5,
            kind: "teapot".to_owned(),
            filetype: "nii".to_owned(),
            path: "subjects/sub-1/roi/sub-1_file-1_roi.nii".to_owned(),
            content_hash: "aa".to_owned(),
            parcellation_id: None,
            subject_id: Some(1),
            taxonomy_level: None,
            taxon: None,
            map_type: None,
            connectome: None,
            statistic: None,
            coordinate_space: None,
            source_file_id: None,
            index_status: "pending".to_owned(),
            index_error: None,
            created_at: chrono::Utc::now(),
        };
        assert!(matches!(
            into_record(row),
            Err(DerivedFileRepositoryError::Query { .. })
        ));
    }
}
