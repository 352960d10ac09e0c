//! PostgreSQL-backed `ParcellationRepository` implementation using Diesel ORM.
//!
//! Registration and override each run in one transaction. An override
//! captures the parcelwise rows attached to the old parcels, rebuilds the
//! index, and re-attaches the rows whose parcel value and label survived.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::{info, warn};

use super::diesel_error_mapping::{
    DieselFailure, batches, classify_diesel_error, map_pool_error_message,
};
use super::models::{
    NewParcelRow, NewParcellationRow, NewParcelwiseRow, NewVoxelRow, ParcelRow, ParcellationRow,
};
use super::pool::{DbPool, PoolError};
use super::schema::{parcellations, parcels, parcelwise_values, voxelwise_values};
use crate::domain::parcellation::{
    AtlasIndex, AtlasOverrideReport, CapturedParcelwiseValue, Parcel, Parcellation,
    plan_reattachment, recovery_dictionary,
};
use crate::domain::ports::{ParcellationRepository, ParcellationRepositoryError};

/// Diesel-backed parcellation registry.
///
/// # Examples
///
/// ```rust,no_run
/// use lesion_bank::outbound::persistence::{
///     DbPool, DieselParcellationRepository, PoolConfig,
/// };
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = DbPool::new(PoolConfig::new("postgres://localhost/lesion_bank")).await?;
/// let repository = DieselParcellationRepository::new(pool);
/// # let _ = repository;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DieselParcellationRepository {
    pool: DbPool,
}

impl DieselParcellationRepository {
    /// Create a repository over `pool`.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> ParcellationRepositoryError {
    ParcellationRepositoryError::connection(map_pool_error_message(error))
}

fn map_diesel_error(error: DieselError, operation: &str) -> ParcellationRepositoryError {
    match classify_diesel_error(error, operation) {
        DieselFailure::Connection(message) => ParcellationRepositoryError::connection(message),
        DieselFailure::Conflict(message) => ParcellationRepositoryError::conflict(message),
        DieselFailure::NotFound => {
            ParcellationRepositoryError::query(format!("{operation}: record not found"))
        }
        DieselFailure::Query(message) => ParcellationRepositoryError::query(message),
    }
}

/// Insert the parcels and voxel assignments of `index` under `parcellation_id`.
async fn insert_index(
    conn: &mut AsyncPgConnection,
    parcellation_id: i64,
    index: &AtlasIndex,
) -> QueryResult<Vec<Parcel>> {
    let new_parcels = index
        .parcels
        .iter()
        .map(|parcel| NewParcelRow {
            parcellation_id,
            value: parcel.value,
            label: &parcel.label,
        })
        .collect::<Vec<_>>();

    let mut stored = Vec::with_capacity(new_parcels.len());
    for batch in batches(&new_parcels, 3) {
        let rows: Vec<ParcelRow> = diesel::insert_into(parcels::table)
            .values(batch)
            .returning(ParcelRow::as_returning())
            .get_results(conn)
            .await?;
        stored.extend(rows.into_iter().map(Parcel::from));
    }

    let ids_by_value = stored
        .iter()
        .map(|parcel| (parcel.value, parcel.id))
        .collect::<std::collections::HashMap<_, _>>();
    let voxels = index
        .voxels
        .iter()
        .filter_map(|voxel| {
            ids_by_value
                .get(&voxel.parcel_value)
                .map(|parcel_id| NewVoxelRow {
                    parcellation_id,
                    parcel_id: *parcel_id,
                    x: voxel.coordinate.x,
                    y: voxel.coordinate.y,
                    z: voxel.coordinate.z,
                })
        })
        .collect::<Vec<_>>();

    for batch in batches(&voxels, 5) {
        diesel::insert_into(voxelwise_values::table)
            .values(batch)
            .on_conflict((
                voxelwise_values::parcellation_id,
                voxelwise_values::x,
                voxelwise_values::y,
                voxelwise_values::z,
            ))
            .do_nothing()
            .execute(conn)
            .await?;
    }

    stored.sort_by_key(|parcel| parcel.value);
    Ok(stored)
}

#[async_trait]
impl ParcellationRepository for DieselParcellationRepository {
    async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Parcellation>, ParcellationRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        parcellations::table
            .filter(parcellations::name.eq(name))
            .select(ParcellationRow::as_select())
            .first::<ParcellationRow>(&mut conn)
            .await
            .optional()
            .map(|row| row.map(Parcellation::from))
            .map_err(|err| map_diesel_error(err, "find parcellation"))
    }

    async fn parcels(&self, parcellation_id: i64) -> Result<Vec<Parcel>, ParcellationRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<ParcelRow> = parcels::table
            .filter(parcels::parcellation_id.eq(parcellation_id))
            .order(parcels::value.asc())
            .select(ParcelRow::as_select())
            .load(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "load parcels"))?;
        Ok(rows.into_iter().map(Parcel::from).collect())
    }

    async fn create(&self, index: &AtlasIndex) -> Result<Parcellation, ParcellationRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let parcellation = conn
            .transaction(|conn| {
                async move {
                    let row: ParcellationRow = diesel::insert_into(parcellations::table)
                        .values(NewParcellationRow {
                            name: &index.name,
                            description: &index.description,
                            content_hash: &index.content_hash,
                        })
                        .returning(ParcellationRow::as_returning())
                        .get_result(conn)
                        .await?;
                    insert_index(conn, row.id, index).await?;
                    Ok(Parcellation::from(row))
                }
                .scope_boxed()
            })
            .await
            .map_err(|err: DieselError| map_diesel_error(err, "register parcellation"))?;

        info!(
            parcellation = %parcellation.name,
            parcels = index.parcels.len(),
            voxels = index.voxels.len(),
            "registered parcellation"
        );
        Ok(parcellation)
    }

    async fn replace(
        &self,
        parcellation_id: i64,
        index: &AtlasIndex,
    ) -> Result<AtlasOverrideReport, ParcellationRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let report = conn
            .transaction(|conn| {
                async move {
                    let captured = parcelwise_values::table
                        .inner_join(parcels::table)
                        .filter(parcels::parcellation_id.eq(parcellation_id))
                        .order((parcelwise_values::file_id.asc(), parcels::value.asc()))
                        .select((
                            parcelwise_values::file_id,
                            parcels::value,
                            parcels::label,
                            parcelwise_values::value,
                        ))
                        .load::<(i64, i32, String, f64)>(conn)
                        .await?
                        .into_iter()
                        .map(|(file_id, parcel_value, parcel_label, value)| {
                            CapturedParcelwiseValue {
                                file_id,
                                parcel_value,
                                parcel_label,
                                value,
                            }
                        })
                        .collect::<Vec<_>>();

                    let old_parcels = parcels::table
                        .filter(parcels::parcellation_id.eq(parcellation_id))
                        .select(parcels::id);
                    diesel::delete(
                        parcelwise_values::table
                            .filter(parcelwise_values::parcel_id.eq_any(old_parcels)),
                    )
                    .execute(conn)
                    .await?;
                    diesel::delete(
                        voxelwise_values::table
                            .filter(voxelwise_values::parcellation_id.eq(parcellation_id)),
                    )
                    .execute(conn)
                    .await?;
                    diesel::delete(parcels::table.filter(parcels::parcellation_id.eq(parcellation_id)))
                        .execute(conn)
                        .await?;

                    let row: ParcellationRow = diesel::update(
                        parcellations::table.filter(parcellations::id.eq(parcellation_id)),
                    )
                    .set((
                        parcellations::description.eq(&index.description),
                        parcellations::content_hash.eq(&index.content_hash),
                    ))
                    .returning(ParcellationRow::as_returning())
                    .get_result(conn)
                    .await?;

                    let rebuilt = insert_index(conn, parcellation_id, index).await?;
                    let plan = plan_reattachment(&captured, &rebuilt);
                    let rows = plan
                        .rows
                        .iter()
                        .map(|row| NewParcelwiseRow {
                            file_id: row.file_id,
                            parcel_id: row.parcel_id,
                            value: row.value,
                        })
                        .collect::<Vec<_>>();
                    for batch in batches(&rows, 3) {
                        diesel::insert_into(parcelwise_values::table)
                            .values(batch)
                            .execute(conn)
                            .await?;
                    }

                    Ok(AtlasOverrideReport {
                        parcellation: Parcellation::from(row),
                        recovery: recovery_dictionary(&captured),
                        reattached: plan.rows.len(),
                        orphaned: plan.orphaned,
                    })
                }
                .scope_boxed()
            })
            .await
            .map_err(|err: DieselError| map_diesel_error(err, "override parcellation"))?;

        if !report.orphaned.is_empty() {
            warn!(
                parcellation = %report.parcellation.name,
                orphaned = report.orphaned.len(),
                "atlas override orphaned parcelwise rows"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::result::DatabaseErrorKind;
    use rstest::rstest;

    struct Info(&'static str);

    impl diesel::result::DatabaseErrorInformation for Info {
        fn message(&self) -> &str {
            self.0
        }
        fn details(&self) -> Option<&str> {
            None
        }
        fn hint(&self) -> Option<&str> {
            None
        }
        fn table_name(&self) -> Option<&str> {
            Some("parcellations")
        }
        fn column_name(&self) -> Option<&str> {
            None
        }
        fn constraint_name(&self) -> Option<&str> {
            Some("parcellations_name_key")
        }
        fn statement_position(&self) -> Option<i32> {
            None
        }
    }

    #[rstest]
    fn duplicate_names_map_to_conflict() {
        let error = DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new(Info("duplicate key value")),
        );
        let mapped = map_diesel_error(error, "register parcellation");
        assert!(matches!(
            mapped,
            ParcellationRepositoryError::Conflict { ref message }
                if message.contains("parcellations_name_key")
        ));
    }

    #[rstest]
    fn dropped_connections_map_to_connection_errors() {
        let error = DieselError::DatabaseError(
            DatabaseErrorKind::ClosedConnection,
            Box::new(Info("server closed the connection")),
        );
        assert!(matches!(
            map_diesel_error(error, "load parcels"),
            ParcellationRepositoryError::Connection { .. }
        ));
    }

    #[rstest]
    fn checkout_failures_map_to_connection_errors() {
        let mapped = map_pool_error(PoolError::checkout("timed out"));
        assert_eq!(
            mapped,
            ParcellationRepositoryError::connection("timed out")
        );
    }
}
