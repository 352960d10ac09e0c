//! PostgreSQL-backed `PointQueryRepository` implementation using Diesel ORM.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::diesel_error_mapping::{DieselFailure, classify_diesel_error, map_pool_error_message};
use super::pool::{DbPool, PoolError};
use super::schema::{derived_files, parcelwise_values, voxelwise_values};
use crate::domain::FileCategory;
use crate::domain::imaging::TemplateCoordinate;
use crate::domain::ports::{OwnedParcelValue, PointQueryRepository, PointQueryRepositoryError};

/// Diesel-backed voxel lookup joining the voxelwise and parcelwise indexes.
#[derive(Clone)]
pub struct DieselPointQueryRepository {
    pool: DbPool,
}

impl DieselPointQueryRepository {
    /// Create a repository over `pool`.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> PointQueryRepositoryError {
    PointQueryRepositoryError::connection(map_pool_error_message(error))
}

fn map_diesel_error(error: diesel::result::Error) -> PointQueryRepositoryError {
    match classify_diesel_error(error, "point query") {
        DieselFailure::Connection(message) => PointQueryRepositoryError::connection(message),
        DieselFailure::NotFound => PointQueryRepositoryError::query("record not found"),
        DieselFailure::Conflict(message) | DieselFailure::Query(message) => {
            PointQueryRepositoryError::query(message)
        }
    }
}

/// Owner of a parcelwise artifact: its subject, else its source file, else itself.
fn owner_of(file_id: i64, subject_id: Option<i64>, source_file_id: Option<i64>) -> i64 {
    subject_id.or(source_file_id).unwrap_or(file_id)
}

#[async_trait]
impl PointQueryRepository for DieselPointQueryRepository {
    async fn values_at(
        &self,
        coordinate: TemplateCoordinate,
        category: FileCategory,
    ) -> Result<Vec<OwnedParcelValue>, PointQueryRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows = voxelwise_values::table
            .inner_join(
                parcelwise_values::table
                    .on(parcelwise_values::parcel_id.eq(voxelwise_values::parcel_id)),
            )
            .inner_join(derived_files::table.on(derived_files::id.eq(parcelwise_values::file_id)))
            .filter(voxelwise_values::x.eq(coordinate.x))
            .filter(voxelwise_values::y.eq(coordinate.y))
            .filter(voxelwise_values::z.eq(coordinate.z))
            .filter(derived_files::kind.eq(category.as_str()))
            .select((
                derived_files::id,
                derived_files::subject_id,
                derived_files::source_file_id,
                parcelwise_values::value,
            ))
            .load::<(i64, Option<i64>, Option<i64>, f64)>(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(rows
            .into_iter()
            .map(|(file_id, subject_id, source_file_id, value)| OwnedParcelValue {
                owner_id: owner_of(file_id, subject_id, source_file_id),
                value,
            })
            .collect())
    }
}
