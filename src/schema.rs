diesel::table! {
    datasets (id) {
        id -> Text,
        title -> Text,
        description -> Nullable<Text>,
        table_name -> Text,
        format -> Text,
        source_path -> Text,
        row_count -> Int8,
        column_count -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    dataset_columns (dataset_id, position) {
        dataset_id -> Text,
        position -> Int4,
        name -> Text,
        original_name -> Text,
        data_type -> Text,
        nullable -> Bool,
    }
}

diesel::table! {
    analyses (id) {
        id -> Uuid,
        dataset_id -> Text,
        query -> Text,
        result -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(dataset_columns -> datasets (dataset_id));
diesel::joinable!(analyses -> datasets (dataset_id));

diesel::allow_tables_to_appear_in_same_query!(datasets, dataset_columns, analyses,);
