// Diesel table declarations for the experiment pipeline.
// Kept in sync by hand with the DDL in `db.rs`.

diesel::table! {
    subjects (subject_id) {
        subject_id -> Integer,
        username -> Text,
        cage_number -> Nullable<Integer>,
        date_of_birth -> Nullable<Text>,
        sex -> Text,
        species -> Text,
        animal_source -> Nullable<Text>,
    }
}

diesel::table! {
    subject_gene_modifications (subject_id, gene_modification) {
        subject_id -> Integer,
        gene_modification -> Text,
    }
}

diesel::table! {
    sessions (subject_id, session) {
        subject_id -> Integer,
        session -> Integer,
        session_date -> Text,
        fov -> Integer,
        username -> Text,
        rig -> Nullable<Text>,
    }
}

diesel::table! {
    session_imaging_depths (subject_id, session, imaging_depth) {
        subject_id -> Integer,
        session -> Integer,
        imaging_depth -> Integer,
    }
}

diesel::table! {
    viruses (virus_id) {
        virus_id -> Integer,
        virus_name -> Text,
        virus_source -> Nullable<Text>,
        virus_lot -> Nullable<Text>,
        titer -> Nullable<Double>,
    }
}

diesel::table! {
    virus_injections (subject_id, session, injection_id) {
        subject_id -> Integer,
        session -> Integer,
        injection_id -> Integer,
        virus_id -> Integer,
        brain_area -> Text,
        hemisphere -> Text,
        injection_volume -> Double,
        ap_location -> Nullable<Double>,
        ml_location -> Nullable<Double>,
        dv_location -> Nullable<Double>,
        username -> Nullable<Text>,
    }
}

diesel::table! {
    scans (subject_id, session) {
        subject_id -> Integer,
        session -> Integer,
        image_gcamp -> Text,
        image_ctb -> Text,
        image_beads -> Nullable<Text>,
        recording_depth -> Double,
        frame_time -> Text,
    }
}

diesel::table! {
    scan_rois (subject_id, session, roi_idx) {
        subject_id -> Integer,
        session -> Integer,
        roi_idx -> Integer,
        cell_type -> Text,
        roi_pixel_list -> Text,
        neuropil_pixel_list -> Text,
        roi_trace -> Text,
        neuropil_trace -> Text,
        inc -> Integer,
    }
}

diesel::table! {
    session_trials (subject_id, session, trial) {
        subject_id -> Integer,
        session -> Integer,
        trial -> Integer,
        trial_uid -> Nullable<Integer>,
        start_time -> Double,
        stop_time -> Nullable<Double>,
    }
}

diesel::table! {
    behavior_trials (subject_id, session, trial) {
        subject_id -> Integer,
        session -> Integer,
        trial -> Integer,
        task -> Text,
        task_protocol -> Integer,
        trial_instruction -> Text,
        early_lick -> Text,
        outcome -> Text,
    }
}

diesel::table! {
    trial_events (subject_id, session, trial, trial_event_id) {
        subject_id -> Integer,
        session -> Integer,
        trial -> Integer,
        trial_event_id -> Integer,
        trial_event_type -> Text,
        trial_event_time -> Double,
        duration -> Nullable<Double>,
    }
}

diesel::table! {
    trial_traces (subject_id, session, roi_idx, trial) {
        subject_id -> Integer,
        session -> Integer,
        roi_idx -> Integer,
        trial -> Integer,
        trial_calcium_trace -> Text,
    }
}

diesel::joinable!(virus_injections -> viruses (virus_id));

diesel::allow_tables_to_appear_in_same_query!(virus_injections, viruses);
