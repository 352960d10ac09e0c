//! Internal Diesel row structs for database operations.
//!
//! These types never leave the persistence layer. Conversions into domain
//! types live next to the rows they read.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use super::schema::{
    analysis_tasks, derived_files, parcellations, parcels, parcelwise_values, voxelwise_values,
};
use crate::domain::imaging::{CoordinateSpace, FileKind};
use crate::domain::parcellation::{Parcel, Parcellation};
use crate::domain::{
    FileCategory, FileDescriptor, FileRecord, IndexStatus, NewFileRecord, TaskId, TaskKind,
    TaskRecord, TaskState, TaskStatus, TaxonomyLevel,
};

// ---------------------------------------------------------------------------
// Parcellation models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = parcellations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct ParcellationRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub content_hash: String,
}

impl From<ParcellationRow> for Parcellation {
    fn from(row: ParcellationRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            content_hash: row.content_hash,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = parcellations)]
pub(crate) struct NewParcellationRow<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub content_hash: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = parcels)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct ParcelRow {
    pub id: i64,
    pub parcellation_id: i64,
    pub value: i32,
    pub label: String,
}

impl From<ParcelRow> for Parcel {
    fn from(row: ParcelRow) -> Self {
        Self {
            id: row.id,
            parcellation_id: row.parcellation_id,
            value: row.value,
            label: row.label,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = parcels)]
pub(crate) struct NewParcelRow<'a> {
    pub parcellation_id: i64,
    pub value: i32,
    pub label: &'a str,
}

#[derive(Debug, Clone, Copy, Insertable)]
#[diesel(table_name = voxelwise_values)]
pub(crate) struct NewVoxelRow {
    pub parcellation_id: i64,
    pub parcel_id: i64,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Debug, Clone, Copy, Insertable)]
#[diesel(table_name = parcelwise_values)]
pub(crate) struct NewParcelwiseRow {
    pub file_id: i64,
    pub parcel_id: i64,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Derived file models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = derived_files)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct FileRow {
    pub id: i64,
    pub kind: String,
    pub filetype: String,
    pub path: String,
    pub content_hash: String,
    pub parcellation_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub taxonomy_level: Option<String>,
    pub taxon: Option<String>,
    pub map_type: Option<String>,
    pub connectome: Option<String>,
    pub statistic: Option<String>,
    pub coordinate_space: Option<String>,
    pub source_file_id: Option<i64>,
    pub index_status: String,
    pub index_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FileRow {
    fn descriptor(&self) -> Result<FileDescriptor, String> {
        let missing = |column: &str| format!("derived file {} has no {column}", self.id);
        let category = self
            .kind
            .parse::<FileCategory>()
            .map_err(|err| err.message().to_owned())?;
        let descriptor = match category {
            FileCategory::Roi => FileDescriptor::Roi {
                subject_id: self.subject_id.ok_or_else(|| missing("subject_id"))?,
            },
            FileCategory::Connectivity => FileDescriptor::Connectivity {
                subject_id: self.subject_id.ok_or_else(|| missing("subject_id"))?,
                connectome: self.connectome.clone().ok_or_else(|| missing("connectome"))?,
                statistic: self.statistic.clone().ok_or_else(|| missing("statistic"))?,
            },
            FileCategory::GroupLevelMap => FileDescriptor::GroupLevelMap {
                level: self
                    .taxonomy_level
                    .as_deref()
                    .ok_or_else(|| missing("taxonomy_level"))?
                    .parse::<TaxonomyLevel>()
                    .map_err(|err| err.message().to_owned())?,
                taxon: self.taxon.clone().ok_or_else(|| missing("taxon"))?,
                map_type: self.map_type.clone().ok_or_else(|| missing("map_type"))?,
                statistic: self.statistic.clone().ok_or_else(|| missing("statistic"))?,
            },
        };
        Ok(descriptor)
    }
}

impl TryFrom<FileRow> for FileRecord {
    type Error = String;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let descriptor = row.descriptor()?;
        Ok(Self {
            id: row.id,
            filetype: FileKind::from_label(&row.filetype),
            path: row.path,
            content_hash: row.content_hash,
            parcellation_id: row.parcellation_id,
            descriptor,
            coordinate_space: row.coordinate_space.as_deref().map(CoordinateSpace::from_label),
            source_file_id: row.source_file_id,
            index_status: IndexStatus::from_label(&row.index_status),
            index_error: row.index_error,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = derived_files)]
pub(crate) struct NewFileRow<'a> {
    pub kind: &'static str,
    pub filetype: String,
    pub path: &'a str,
    pub content_hash: &'a str,
    pub parcellation_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub taxonomy_level: Option<&'static str>,
    pub taxon: Option<&'a str>,
    pub map_type: Option<&'a str>,
    pub connectome: Option<&'a str>,
    pub statistic: Option<&'a str>,
    pub coordinate_space: Option<&'static str>,
    pub source_file_id: Option<i64>,
    pub index_status: &'static str,
}

impl<'a> From<&'a NewFileRecord> for NewFileRow<'a> {
    fn from(file: &'a NewFileRecord) -> Self {
        let mut row = Self {
            kind: file.descriptor.category().as_str(),
            filetype: file.filetype.as_str(),
            path: &file.path,
            content_hash: &file.content_hash,
            parcellation_id: file.parcellation_id,
            subject_id: file.descriptor.subject_id(),
            taxonomy_level: None,
            taxon: None,
            map_type: None,
            connectome: None,
            statistic: None,
            coordinate_space: file.coordinate_space.map(CoordinateSpace::as_str),
            source_file_id: file.source_file_id,
            index_status: file.index_status.as_str(),
        };
        match &file.descriptor {
            FileDescriptor::Roi { .. } => {}
            FileDescriptor::Connectivity {
                connectome,
                statistic,
                ..
            } => {
                row.connectome = Some(connectome);
                row.statistic = Some(statistic);
            }
            FileDescriptor::GroupLevelMap {
                level,
                taxon,
                map_type,
                statistic,
            } => {
                row.taxonomy_level = Some(level.as_str());
                row.taxon = Some(taxon);
                row.map_type = Some(map_type);
                row.statistic = Some(statistic);
            }
        }
        row
    }
}

// ---------------------------------------------------------------------------
// Analysis task models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = analysis_tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct TaskRow {
    pub id: Uuid,
    pub kind: String,
    pub state: String,
    pub progress: i32,
    pub current_step: i32,
    pub total_steps: i32,
    pub message: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = String;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let kind = TaskKind::from_label(&row.kind)
            .ok_or_else(|| format!("task {} has unknown kind {}", row.id, row.kind))?;
        let state = TaskState::from_label(&row.state)
            .ok_or_else(|| format!("task {} has unknown state {}", row.id, row.state))?;
        Ok(Self {
            status: TaskStatus {
                task_id: TaskId::from_uuid(row.id),
                kind,
                state,
                progress_percent: row.progress,
                current_step: row.current_step,
                total_steps: row.total_steps,
                message: row.message,
            },
            result: row.result,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = analysis_tasks)]
pub(crate) struct NewTaskRow {
    pub id: Uuid,
    pub kind: &'static str,
    pub state: &'static str,
    pub progress: i32,
    pub current_step: i32,
    pub total_steps: i32,
    pub message: String,
}
