//! Diesel table definitions for the PostgreSQL schema.
//!
//! These definitions must match `backend/migrations` exactly. Regenerate with
//! `diesel print-schema` after changing a migration.

diesel::table! {
    /// Registered atlases, one row per unique name.
    parcellations (id) {
        id -> Int8,
        /// Unique atlas name.
        name -> Text,
        description -> Text,
        /// Hex SHA-256 of the label image the index was built from.
        content_hash -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Labelled regions of a parcellation. Unique on `(parcellation_id, value)`.
    parcels (id) {
        id -> Int8,
        parcellation_id -> Int8,
        /// Integer label value, never 0.
        value -> Int4,
        label -> Text,
    }
}

diesel::table! {
    /// Voxel to parcel assignments inside the reference mask.
    ///
    /// Unique on `(parcellation_id, x, y, z)`.
    voxelwise_values (id) {
        id -> Int8,
        parcellation_id -> Int8,
        parcel_id -> Int8,
        x -> Int4,
        y -> Int4,
        z -> Int4,
    }
}

diesel::table! {
    /// Stored imaging files and the parcelwise artifacts derived from them.
    derived_files (id) {
        id -> Int8,
        /// `roi`, `connectivity` or `group_level_map`.
        kind -> Text,
        /// Canonical extension label.
        filetype -> Text,
        /// Unique blob storage key.
        path -> Text,
        content_hash -> Text,
        parcellation_id -> Nullable<Int8>,
        subject_id -> Nullable<Int8>,
        taxonomy_level -> Nullable<Text>,
        taxon -> Nullable<Text>,
        map_type -> Nullable<Text>,
        connectome -> Nullable<Text>,
        statistic -> Nullable<Text>,
        coordinate_space -> Nullable<Text>,
        /// Set on parcelwise artifacts; cascades on delete.
        source_file_id -> Nullable<Int8>,
        index_status -> Text,
        index_error -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Reduced scalar per parcel per file. Unique on `(file_id, parcel_id)`.
    parcelwise_values (id) {
        id -> Int8,
        file_id -> Int8,
        parcel_id -> Int8,
        value -> Float8,
    }
}

diesel::table! {
    /// Per-owner file sequence counters.
    file_sequences (owner_key) {
        owner_key -> Text,
        last_value -> Int8,
    }
}

diesel::table! {
    /// Corpus subjects.
    subjects (id) {
        id -> Int8,
        internal_use_only -> Bool,
    }
}

diesel::table! {
    domains (id) {
        id -> Int8,
        name -> Text,
    }
}

diesel::table! {
    subdomains (id) {
        id -> Int8,
        name -> Text,
    }
}

diesel::table! {
    /// Symptoms with their subdomain and domain.
    symptoms (id) {
        id -> Int8,
        name -> Text,
        domain_id -> Int8,
        subdomain_id -> Nullable<Int8>,
        internal_use_only -> Bool,
    }
}

diesel::table! {
    /// Subject to symptom links.
    subjects_symptoms (subject_id, symptom_id) {
        subject_id -> Int8,
        symptom_id -> Int8,
    }
}

diesel::table! {
    /// Durable state of asynchronous analysis tasks.
    analysis_tasks (id) {
        id -> Uuid,
        /// `decode` or `full_analysis`.
        kind -> Text,
        /// `PENDING`, `PROGRESS`, `SUCCESS` or `FAILURE`.
        state -> Text,
        /// Monotonic percent complete.
        progress -> Int4,
        current_step -> Int4,
        total_steps -> Int4,
        message -> Text,
        result -> Nullable<Jsonb>,
        error -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(parcels -> parcellations (parcellation_id));
diesel::joinable!(voxelwise_values -> parcels (parcel_id));
diesel::joinable!(parcelwise_values -> parcels (parcel_id));
diesel::joinable!(parcelwise_values -> derived_files (file_id));
diesel::joinable!(symptoms -> domains (domain_id));
diesel::joinable!(subjects_symptoms -> symptoms (symptom_id));
diesel::joinable!(subjects_symptoms -> subjects (subject_id));

diesel::allow_tables_to_appear_in_same_query!(
    analysis_tasks,
    derived_files,
    domains,
    file_sequences,
    parcellations,
    parcels,
    parcelwise_values,
    subdomains,
    subjects,
    subjects_symptoms,
    symptoms,
    voxelwise_values,
);
