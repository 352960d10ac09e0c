//! In-memory catalogue backing every relational port.
//!
//! One [`InMemoryCatalog`] plays the parcellation registry, the derived file
//! repository, the point-query index, and the decode corpus, so services can
//! be wired together end to end without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::{Clock, DefaultClock};

use crate::domain::imaging::TemplateCoordinate;
use crate::domain::parcellation::{
    AtlasIndex, AtlasOverrideReport, CapturedParcelwiseValue, Parcel, ParcelwiseRow,
    Parcellation, plan_reattachment, recovery_dictionary,
};
use crate::domain::ports::{
    CommittedReduction, CorpusSubject, DecodeCorpusRepository, DecodeCorpusRepositoryError,
    DerivedFileRepository, DerivedFileRepositoryError, OwnedParcelValue, ParcellationRepository,
    ParcellationRepositoryError, PointQueryRepository, PointQueryRepositoryError,
    ReductionCommit, ReplacedFile, TaxonMembership,
};
use crate::domain::{
    FileCategory, FileDescriptor, FileRecord, IndexStatus, NewFileRecord, TaxonomyLevel,
    VisibilityScope,
};

struct SymptomEntry {
    subdomain: Option<String>,
    domain: String,
    internal_use_only: bool,
}

#[derive(Default)]
struct CatalogState {
    next_id: i64,
    parcellations: BTreeMap<i64, Parcellation>,
    parcels: BTreeMap<i64, Parcel>,
    voxels: HashMap<(i64, TemplateCoordinate), i32>,
    files: BTreeMap<i64, FileRecord>,
    parcelwise: Vec<ParcelwiseRow>,
    sequences: HashMap<String, i64>,
    subjects: BTreeMap<i64, bool>,
    symptoms: BTreeMap<String, SymptomEntry>,
    subject_symptoms: Vec<(i64, String)>,
}

impl CatalogState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_parcels(&mut self, parcellation_id: i64, index: &AtlasIndex) -> Vec<Parcel> {
        let mut inserted = Vec::with_capacity(index.parcels.len());
        for parcel in &index.parcels {
            let id = self.allocate_id();
            let row = Parcel {
                id,
                parcellation_id,
                value: parcel.value,
                label: parcel.label.clone(),
            };
            self.parcels.insert(id, row.clone());
            inserted.push(row);
        }
        for voxel in &index.voxels {
            self.voxels
                .entry((parcellation_id, voxel.coordinate))
                .or_insert(voxel.parcel_value);
        }
        inserted
    }

    fn insert_file(&mut self, file: &NewFileRecord, created_at: DateTime<Utc>) -> FileRecord {
        let id = self.allocate_id();
        let record = FileRecord {
            id,
            filetype: file.filetype.clone(),
            path: file.path.clone(),
            content_hash: file.content_hash.clone(),
            parcellation_id: file.parcellation_id,
            descriptor: file.descriptor.clone(),
            coordinate_space: file.coordinate_space,
            source_file_id: file.source_file_id,
            index_status: file.index_status,
            index_error: None,
            created_at,
        };
        self.files.insert(id, record.clone());
        record
    }

    /// Remove a file with its artifacts and parcelwise rows; returns paths.
    fn remove_file_tree(&mut self, file_id: i64) -> Vec<String> {
        let mut doomed = self
            .files
            .values()
            .filter(|file| file.source_file_id == Some(file_id))
            .map(|file| file.id)
            .collect::<Vec<_>>();
        doomed.push(file_id);
        let mut paths = Vec::new();
        for id in &doomed {
            if let Some(file) = self.files.remove(id) {
                paths.push(file.path);
            }
        }
        self.parcelwise.retain(|row| !doomed.contains(&row.file_id));
        paths
    }

    fn owner_of(&self, file: &FileRecord) -> i64 {
        file.descriptor
            .subject_id()
            .or(file.source_file_id)
            .unwrap_or(file.id)
    }

    fn symptom_visible(
        &self,
        symptom: &str,
        level: TaxonomyLevel,
        scope: VisibilityScope,
    ) -> Option<&SymptomEntry> {
        self.symptoms
            .get(symptom)
            .filter(|entry| scope.admits_symptom(level, entry.internal_use_only))
    }
}

/// Relational ports held in memory.
pub struct InMemoryCatalog {
    state: Mutex<CatalogState>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self {
            state: Mutex::new(CatalogState::default()),
            clock: Arc::new(DefaultClock),
        }
    }
}

impl InMemoryCatalog {
    /// Empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add a subject to the read-side taxonomy.
    pub fn add_subject(&self, subject_id: i64, internal_use_only: bool) {
        self.state().subjects.insert(subject_id, internal_use_only);
    }

    /// Add a symptom with its subdomain and domain.
    pub fn add_symptom(
        &self,
        name: &str,
        subdomain: Option<&str>,
        domain: &str,
        internal_use_only: bool,
    ) {
        self.state().symptoms.insert(
            name.to_owned(),
            SymptomEntry {
                subdomain: subdomain.map(str::to_owned),
                domain: domain.to_owned(),
                internal_use_only,
            },
        );
    }

    /// Link a subject to a symptom.
    pub fn assign_symptom(&self, subject_id: i64, symptom: &str) {
        self.state()
            .subject_symptoms
            .push((subject_id, symptom.to_owned()));
    }

    /// Stored file by id.
    pub fn file(&self, file_id: i64) -> Option<FileRecord> {
        self.state().files.get(&file_id).cloned()
    }

    /// Every stored file in id order.
    pub fn files(&self) -> Vec<FileRecord> {
        self.state().files.values().cloned().collect()
    }

    /// Parcelwise rows of `file_id` as `(parcel value, value)` pairs.
    pub fn parcelwise_values(&self, file_id: i64) -> Vec<(i32, f64)> {
        let state = self.state();
        state
            .parcelwise
            .iter()
            .filter(|row| row.file_id == file_id)
            .filter_map(|row| {
                state
                    .parcels
                    .get(&row.parcel_id)
                    .map(|parcel| (parcel.value, row.value))
            })
            .collect()
    }

    /// Voxel rows stored for `parcellation_id`.
    pub fn voxel_count(&self, parcellation_id: i64) -> usize {
        self.state()
            .voxels
            .keys()
            .filter(|(owner, _)| *owner == parcellation_id)
            .count()
    }
}

#[async_trait]
impl ParcellationRepository for InMemoryCatalog {
    async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Parcellation>, ParcellationRepositoryError> {
        Ok(self
            .state()
            .parcellations
            .values()
            .find(|parcellation| parcellation.name == name)
            .cloned())
    }

    async fn parcels(&self, parcellation_id: i64) -> Result<Vec<Parcel>, ParcellationRepositoryError> {
        let mut parcels = self
            .state()
            .parcels
            .values()
            .filter(|parcel| parcel.parcellation_id == parcellation_id)
            .cloned()
            .collect::<Vec<_>>();
        parcels.sort_by_key(|parcel| parcel.value);
        Ok(parcels)
    }

    async fn create(&self, index: &AtlasIndex) -> Result<Parcellation, ParcellationRepositoryError> {
        let mut state = self.state();
        if state
            .parcellations
            .values()
            .any(|parcellation| parcellation.name == index.name)
        {
            return Err(ParcellationRepositoryError::conflict(format!(
                "parcellation {} already exists",
                index.name
            )));
        }
        let id = state.allocate_id();
        let parcellation = Parcellation {
            id,
            name: index.name.clone(),
            description: index.description.clone(),
            content_hash: index.content_hash.clone(),
        };
        state.parcellations.insert(id, parcellation.clone());
        state.insert_parcels(id, index);
        Ok(parcellation)
    }

    async fn replace(
        &self,
        parcellation_id: i64,
        index: &AtlasIndex,
    ) -> Result<AtlasOverrideReport, ParcellationRepositoryError> {
        let mut state = self.state();
        if !state.parcellations.contains_key(&parcellation_id) {
            return Err(ParcellationRepositoryError::query(format!(
                "parcellation {parcellation_id} does not exist"
            )));
        }
        let old_parcels = state
            .parcels
            .values()
            .filter(|parcel| parcel.parcellation_id == parcellation_id)
            .map(|parcel| (parcel.id, parcel.clone()))
            .collect::<BTreeMap<_, _>>();
        let captured = state
            .parcelwise
            .iter()
            .filter_map(|row| {
                old_parcels
                    .get(&row.parcel_id)
                    .map(|parcel| CapturedParcelwiseValue {
                        file_id: row.file_id,
                        parcel_value: parcel.value,
                        parcel_label: parcel.label.clone(),
                        value: row.value,
                    })
            })
            .collect::<Vec<_>>();

        state
            .parcelwise
            .retain(|row| !old_parcels.contains_key(&row.parcel_id));
        state
            .parcels
            .retain(|id, _| !old_parcels.contains_key(id));
        state.voxels.retain(|(owner, _), _| *owner != parcellation_id);

        let parcellation = Parcellation {
            id: parcellation_id,
            name: index.name.clone(),
            description: index.description.clone(),
            content_hash: index.content_hash.clone(),
        };
        state
            .parcellations
            .insert(parcellation_id, parcellation.clone());
        let new_parcels = state.insert_parcels(parcellation_id, index);

        let plan = plan_reattachment(&captured, &new_parcels);
        let reattached = plan.rows.len();
        state.parcelwise.extend(plan.rows);
        Ok(AtlasOverrideReport {
            parcellation,
            recovery: recovery_dictionary(&captured),
            reattached,
            orphaned: plan.orphaned,
        })
    }
}

#[async_trait]
impl DerivedFileRepository for InMemoryCatalog {
    async fn find_duplicate(
        &self,
        content_hash: &str,
        path: Option<String>,
    ) -> Result<Option<FileRecord>, DerivedFileRepositoryError> {
        Ok(self
            .state()
            .files
            .values()
            .filter(|file| !file.is_derived_artifact())
            .find(|file| {
                file.content_hash == content_hash || path.as_deref() == Some(file.path.as_str())
            })
            .cloned())
    }

    async fn find(&self, file_id: i64) -> Result<Option<FileRecord>, DerivedFileRepositoryError> {
        Ok(self.file(file_id))
    }

    async fn next_sequence(&self, key: &str) -> Result<i64, DerivedFileRepositoryError> {
        let mut state = self.state();
        let next = state.sequences.entry(key.to_owned()).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    async fn insert(&self, file: &NewFileRecord) -> Result<FileRecord, DerivedFileRepositoryError> {
        let now = self.clock.utc();
        let mut state = self.state();
        if state.files.values().any(|existing| existing.path == file.path) {
            return Err(DerivedFileRepositoryError::conflict(format!(
                "path {} is already stored",
                file.path
            )));
        }
        Ok(state.insert_file(file, now))
    }

    async fn replace(
        &self,
        existing_id: i64,
        file: &NewFileRecord,
    ) -> Result<ReplacedFile, DerivedFileRepositoryError> {
        let now = self.clock.utc();
        let mut state = self.state();
        if !state.files.contains_key(&existing_id) {
            return Err(DerivedFileRepositoryError::not_found(existing_id));
        }
        let removed_paths = state.remove_file_tree(existing_id);
        let record = state.insert_file(file, now);
        Ok(ReplacedFile {
            record,
            removed_paths,
        })
    }

    async fn commit_reduction(
        &self,
        commit: &ReductionCommit,
    ) -> Result<CommittedReduction, DerivedFileRepositoryError> {
        let now = self.clock.utc();
        let mut state = self.state();
        let Some(source) = state.files.get_mut(&commit.source_file_id) else {
            return Err(DerivedFileRepositoryError::not_found(commit.source_file_id));
        };
        source.coordinate_space = Some(commit.coordinate_space);
        source.index_status = IndexStatus::Indexed;
        source.index_error = None;

        let superseded = state
            .files
            .values()
            .filter(|file| file.source_file_id == Some(commit.source_file_id))
            .map(|file| file.id)
            .collect::<Vec<_>>();
        let mut superseded_paths = Vec::new();
        for id in superseded {
            superseded_paths.extend(state.remove_file_tree(id));
        }

        let artifact = state.insert_file(&commit.artifact, now);
        state
            .parcelwise
            .extend(commit.values.iter().map(|value| ParcelwiseRow {
                file_id: artifact.id,
                parcel_id: value.parcel_id,
                value: value.value,
            }));
        Ok(CommittedReduction {
            artifact,
            superseded_paths,
        })
    }

    async fn pending_reductions(&self) -> Result<Vec<i64>, DerivedFileRepositoryError> {
        Ok(self
            .state()
            .files
            .values()
            .filter(|file| {
                file.source_file_id.is_none() && file.index_status == IndexStatus::Pending
            })
            .map(|file| file.id)
            .collect())
    }

    async fn set_index_status(
        &self,
        file_id: i64,
        status: IndexStatus,
        error: Option<String>,
    ) -> Result<(), DerivedFileRepositoryError> {
        let mut state = self.state();
        let file = state
            .files
            .get_mut(&file_id)
            .ok_or_else(|| DerivedFileRepositoryError::not_found(file_id))?;
        file.index_status = status;
        file.index_error = error;
        Ok(())
    }
}

#[async_trait]
impl PointQueryRepository for InMemoryCatalog {
    async fn values_at(
        &self,
        coordinate: TemplateCoordinate,
        category: FileCategory,
    ) -> Result<Vec<OwnedParcelValue>, PointQueryRepositoryError> {
        let state = self.state();
        let covering = state
            .voxels
            .iter()
            .filter(|((_, at), _)| *at == coordinate)
            .map(|((parcellation_id, _), value)| (*parcellation_id, *value))
            .collect::<Vec<_>>();
        let parcel_ids = state
            .parcels
            .values()
            .filter(|parcel| covering.contains(&(parcel.parcellation_id, parcel.value)))
            .map(|parcel| parcel.id)
            .collect::<Vec<_>>();
        Ok(state
            .parcelwise
            .iter()
            .filter(|row| parcel_ids.contains(&row.parcel_id))
            .filter_map(|row| {
                state
                    .files
                    .get(&row.file_id)
                    .filter(|file| file.category() == category)
                    .map(|file| OwnedParcelValue {
                        owner_id: state.owner_of(file),
                        value: row.value,
                    })
            })
            .collect())
    }
}

#[async_trait]
impl DecodeCorpusRepository for InMemoryCatalog {
    async fn eligible_subjects(
        &self,
        scope: VisibilityScope,
    ) -> Result<Vec<CorpusSubject>, DecodeCorpusRepositoryError> {
        let state = self.state();
        let mut first_map: BTreeMap<i64, &FileRecord> = BTreeMap::new();
        for file in state.files.values() {
            let FileDescriptor::Connectivity { subject_id, .. } = &file.descriptor else {
                continue;
            };
            let visible = state
                .subjects
                .get(subject_id)
                .is_some_and(|internal| scope.admits(*internal));
            if visible && !file.is_derived_artifact() && file.filetype.is_volumetric() {
                first_map.entry(*subject_id).or_insert(file);
            }
        }
        Ok(first_map
            .into_iter()
            .map(|(subject_id, file)| CorpusSubject {
                subject_id,
                file_path: file.path.clone(),
                filetype: file.filetype.clone(),
            })
            .collect())
    }

    async fn memberships(
        &self,
        level: TaxonomyLevel,
        scope: VisibilityScope,
        subject_ids: Vec<i64>,
    ) -> Result<Vec<TaxonMembership>, DecodeCorpusRepositoryError> {
        let state = self.state();
        Ok(state
            .subject_symptoms
            .iter()
            .filter(|(subject_id, _)| subject_ids.contains(subject_id))
            .filter_map(|(subject_id, symptom)| {
                let entry = state.symptom_visible(symptom, level, scope)?;
                let taxon = match level {
                    TaxonomyLevel::Symptom => Some(symptom.clone()),
                    TaxonomyLevel::Subdomain => entry.subdomain.clone(),
                    TaxonomyLevel::Domain => Some(entry.domain.clone()),
                }?;
                Some(TaxonMembership {
                    subject_id: *subject_id,
                    taxon,
                })
            })
            .collect())
    }
}
