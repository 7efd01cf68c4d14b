mod common;

use common::{int, open_rows, row, row_with, stage, versioned};
use rstest::rstest;
use sluice_core::ingestor::IngestStatus;
use sluice_core::statistics::StatisticName;
use sluice_schemas::{
    DataSplitRange, DataType, Dataset, Datasets, Field, IngestMode, IngestOptions, MergeStrategy, Partitioning,
    ScalarValue, SchemaDefinition, UnitemporalDelta, UnitemporalSnapshot, VersioningComparator,
    VersioningStrategy,
};

fn delta() -> IngestMode {
    IngestMode::UnitemporalDelta(
        UnitemporalDelta::builder()
            .digest_field("digest".to_string())
            .transaction_milestoning(common::batch_id_milestoning())
            .build(),
    )
}

fn snapshot() -> IngestMode {
    IngestMode::UnitemporalSnapshot(
        UnitemporalSnapshot::builder()
            .digest_field("digest".to_string())
            .transaction_milestoning(common::batch_id_milestoning())
            .build(),
    )
}

#[tokio::test]
async fn unchanged_rows_keep_their_open_row() {
    let datasets = common::datasets(common::staging_schema());
    let mut executor = common::executor(&datasets);
    let ingestor = common::ingestor(delta());

    stage(&mut executor, vec![row(1, 10, "a"), row(2, 20, "b")]);
    let first = ingestor.ingest(&mut executor, &datasets).await.unwrap();
    assert_eq!(first[0].batch_id, Some(1));
    assert_eq!(
        first[0].statistics[&StatisticName::RowsInserted],
        ScalarValue::Int(2)
    );

    stage(&mut executor, vec![row(1, 10, "a"), row(2, 21, "c")]);
    let second = ingestor.ingest(&mut executor, &datasets).await.unwrap();
    let statistics = &second[0].statistics;
    assert_eq!(statistics[&StatisticName::IncomingRecordCount], ScalarValue::Int(2));
    assert_eq!(statistics[&StatisticName::RowsUpdated], ScalarValue::Int(1));
    assert_eq!(statistics[&StatisticName::RowsInserted], ScalarValue::Int(0));
    assert_eq!(statistics[&StatisticName::RowsTerminated], ScalarValue::Int(0));

    let history: Vec<_> = executor
        .rows(common::MAIN)
        .iter()
        .filter(|row| int(row, "id") == 1)
        .collect();
    assert_eq!(history.len(), 1);
    assert_eq!(int(history[0], "batch_id_in"), 1);

    let mut open: Vec<_> = open_rows(&executor)
        .iter()
        .map(|row| (int(row, "id"), int(row, "amount"), int(row, "batch_id_in")))
        .collect();
    open.sort();
    assert_eq!(open, vec![(1, 10, 1), (2, 21, 2)]);
}

#[rstest]
#[case::from_metadata(false)]
#[case::from_lock(true)]
#[tokio::test]
async fn batch_ids_increase_by_one(#[case] enable_concurrent_safety: bool) {
    let datasets = common::datasets(common::staging_schema());
    let mut executor = common::executor(&datasets);
    let options = IngestOptions::builder()
        .enable_concurrent_safety(enable_concurrent_safety)
        .build();
    let ingestor = common::ingestor_with_options(delta(), options);

    let mut batch_ids = vec![];
    for amount in [10, 11, 12] {
        stage(&mut executor, vec![row(1, amount, &amount.to_string())]);
        let results = ingestor.ingest(&mut executor, &datasets).await.unwrap();
        batch_ids.extend(results.iter().filter_map(|result| result.batch_id));
    }

    assert_eq!(batch_ids, vec![1, 2, 3]);
    assert_eq!(executor.rows("batch_metadata").len(), 3);
    assert_eq!(executor.rows(common::MAIN).len(), 3);
    assert_eq!(open_rows(&executor).len(), 1);
}

#[tokio::test]
async fn replayed_requests_return_the_stored_batch() {
    let datasets = common::datasets(common::staging_schema());
    let mut executor = common::executor(&datasets);
    let ingestor = sluice_core::ingestor::Ingestor::builder()
        .mode(delta())
        .clock(common::clock())
        .ingest_request_id("request-7".to_string())
        .build();

    stage(&mut executor, vec![row(1, 10, "a"), row(2, 20, "b")]);
    let first = ingestor.ingest(&mut executor, &datasets).await.unwrap();
    let main = executor.rows(common::MAIN).to_vec();

    let second = ingestor.ingest(&mut executor, &datasets).await.unwrap();

    assert_eq!(executor.rows(common::MAIN), main.as_slice());
    assert_eq!(executor.rows("batch_metadata").len(), 1);
    assert_eq!(second.len(), 1);
    assert!(second[0].previously_processed);
    assert!(!first[0].previously_processed);
    assert_eq!(second[0].batch_id, first[0].batch_id);
    assert_eq!(second[0].statistics, first[0].statistics);
    assert_eq!(second[0].status, IngestStatus::Succeeded);
    assert!(second[0].message.is_some());
}

#[tokio::test]
async fn replays_leave_main_unaltered() {
    let datasets = common::datasets(common::staging_schema());
    let mut executor = common::executor(&datasets);
    let ingestor = |options: IngestOptions| {
        sluice_core::ingestor::Ingestor::builder()
            .mode(delta())
            .options(options)
            .clock(common::clock())
            .ingest_request_id("request-8".to_string())
            .build()
    };
    let main_fields = |executor: &sluice_memory::MemoryExecutor| {
        executor
            .table(common::MAIN)
            .map(|table| table.fields.iter().map(|field| field.name.clone()).collect::<Vec<_>>())
            .unwrap_or_default()
    };

    stage(&mut executor, vec![row(1, 10, "a")]);
    ingestor(IngestOptions::default())
        .ingest(&mut executor, &datasets)
        .await
        .unwrap();
    let fields = main_fields(&executor);

    let widened = Datasets::new(
        Dataset::new(
            common::MAIN,
            SchemaDefinition::new(vec![
                Field::new("id", DataType::Int).with_primary_key(),
                Field::new("amount", DataType::BigInt),
                Field::new("digest", DataType::Varchar),
                Field::new("batch_id_in", DataType::Int).with_primary_key(),
                Field::new("batch_id_out", DataType::Int),
            ]),
        ),
        Dataset::new(common::STAGING, common::staging_schema_with("note")),
    );
    let options = IngestOptions::builder().enable_schema_evolution(true).build();
    let replay = ingestor(options)
        .ingest(&mut executor, &widened)
        .await
        .unwrap();

    assert!(replay[0].previously_processed);
    assert_eq!(main_fields(&executor), fields);
    assert!(!fields.iter().any(|field| field == "note"));
    assert_eq!(executor.rows(common::MAIN).len(), 1);
}

#[tokio::test]
async fn empty_snapshot_terminates_every_open_row() {
    let datasets = common::datasets(common::staging_schema());
    let mut executor = common::executor(&datasets);
    let ingestor = common::ingestor(snapshot());

    stage(
        &mut executor,
        vec![row(1, 10, "a"), row(2, 20, "b"), row(3, 30, "c")],
    );
    ingestor.ingest(&mut executor, &datasets).await.unwrap();
    assert_eq!(open_rows(&executor).len(), 3);

    stage(&mut executor, vec![]);
    let results = ingestor.ingest(&mut executor, &datasets).await.unwrap();

    assert_eq!(
        results[0].statistics[&StatisticName::RowsTerminated],
        ScalarValue::Int(3)
    );
    assert!(open_rows(&executor).is_empty());
    assert_eq!(executor.rows(common::MAIN).len(), 3);
}

#[tokio::test]
async fn snapshot_closes_missing_and_changed_rows() {
    let datasets = common::datasets(common::staging_schema());
    let mut executor = common::executor(&datasets);
    let ingestor = common::ingestor(snapshot());

    stage(&mut executor, vec![row(1, 10, "a"), row(2, 20, "b")]);
    ingestor.ingest(&mut executor, &datasets).await.unwrap();

    stage(&mut executor, vec![row(2, 25, "b2"), row(3, 30, "c")]);
    let results = ingestor.ingest(&mut executor, &datasets).await.unwrap();

    let statistics = &results[0].statistics;
    assert_eq!(statistics[&StatisticName::RowsUpdated], ScalarValue::Int(1));
    assert_eq!(statistics[&StatisticName::RowsInserted], ScalarValue::Int(1));
    assert_eq!(statistics[&StatisticName::RowsTerminated], ScalarValue::Int(1));

    let mut open: Vec<_> = open_rows(&executor)
        .iter()
        .map(|row| (int(row, "id"), int(row, "amount")))
        .collect();
    open.sort();
    assert_eq!(open, vec![(2, 25), (3, 30)]);
}

#[tokio::test]
async fn data_splits_are_applied_in_order() {
    let datasets = common::datasets(common::versioned_schema());
    let mut executor = common::executor(&datasets);
    let mode = IngestMode::UnitemporalDelta(
        UnitemporalDelta::builder()
            .digest_field("digest".to_string())
            .transaction_milestoning(common::batch_id_milestoning())
            .versioning(VersioningStrategy::AllVersions {
                version_field: "version".to_string(),
                data_split_field: "data_split".to_string(),
            })
            .build(),
    );
    let ingestor = common::ingestor(mode);

    stage(
        &mut executor,
        vec![versioned(1, 2, 20, "b"), versioned(1, 1, 10, "a")],
    );
    let results = ingestor.ingest(&mut executor, &datasets).await.unwrap();

    let applied: Vec<_> = results
        .iter()
        .map(|result| (result.batch_id, result.data_split_range))
        .collect();
    assert_eq!(
        applied,
        vec![
            (Some(1), Some(DataSplitRange::new(1, 1))),
            (Some(2), Some(DataSplitRange::new(2, 2))),
        ]
    );

    let open = open_rows(&executor);
    assert_eq!(open.len(), 1);
    assert_eq!(int(&open[0], "version"), 2);
    assert_eq!(int(&open[0], "amount"), 20);
    assert_eq!(executor.rows(common::MAIN).len(), 2);
}

#[rstest]
#[case::greater_than(VersioningComparator::GreaterThan, 30)]
#[case::greater_than_equal_to(VersioningComparator::GreaterThanEqualTo, 31)]
#[tokio::test]
async fn older_versions_never_supersede_the_open_row(
    #[case] versioning_comparator: VersioningComparator,
    #[case] amount_after_same_version: i64,
) {
    let datasets = common::datasets(common::versioned_schema());
    let mut executor = common::executor(&datasets);
    let mode = IngestMode::UnitemporalDelta(
        UnitemporalDelta::builder()
            .digest_field("digest".to_string())
            .transaction_milestoning(common::batch_id_milestoning())
            .versioning(VersioningStrategy::MaxVersion {
                version_field: "version".to_string(),
                versioning_comparator,
                perform_deduplication: true,
            })
            .build(),
    );
    let ingestor = common::ingestor(mode);
    let open_amounts = |executor: &sluice_memory::MemoryExecutor| {
        open_rows(executor)
            .iter()
            .map(|row| (int(row, "version"), int(row, "amount")))
            .collect::<Vec<_>>()
    };

    stage(
        &mut executor,
        vec![
            versioned(1, 1, 10, "a"),
            versioned(1, 3, 30, "c"),
            versioned(1, 2, 20, "b"),
        ],
    );
    ingestor.ingest(&mut executor, &datasets).await.unwrap();
    assert_eq!(open_amounts(&executor), vec![(3, 30)]);

    stage(&mut executor, vec![versioned(1, 2, 20, "b")]);
    let results = ingestor.ingest(&mut executor, &datasets).await.unwrap();
    let statistics = &results[0].statistics;
    assert_eq!(statistics[&StatisticName::RowsUpdated], ScalarValue::Int(0));
    assert_eq!(statistics[&StatisticName::RowsInserted], ScalarValue::Int(0));
    assert_eq!(open_amounts(&executor), vec![(3, 30)]);
    assert_eq!(executor.rows(common::MAIN).len(), 1);

    stage(&mut executor, vec![versioned(1, 3, 31, "c2")]);
    ingestor.ingest(&mut executor, &datasets).await.unwrap();
    assert_eq!(open_amounts(&executor), vec![(3, amount_after_same_version)]);
}


#[tokio::test]
async fn delete_indicator_closes_without_reopening() {
    let datasets = common::datasets(common::staging_schema_with("op"));
    let mut executor = common::executor(&datasets);
    let ingestor = common::ingestor(IngestMode::UnitemporalDelta(
        UnitemporalDelta::builder()
            .digest_field("digest".to_string())
            .transaction_milestoning(common::batch_id_milestoning())
            .merge_strategy(MergeStrategy::DeleteIndicator {
                delete_field: "op".to_string(),
                delete_values: vec![ScalarValue::from("D")],
            })
            .build(),
    ));

    stage(
        &mut executor,
        vec![
            row_with(1, 10, "a", &[("op", "I")]),
            row_with(2, 20, "b", &[("op", "I")]),
        ],
    );
    ingestor.ingest(&mut executor, &datasets).await.unwrap();

    stage(&mut executor, vec![row_with(1, 10, "a", &[("op", "D")])]);
    let results = ingestor.ingest(&mut executor, &datasets).await.unwrap();

    let statistics = &results[0].statistics;
    assert_eq!(statistics[&StatisticName::RowsTerminated], ScalarValue::Int(1));
    assert_eq!(statistics[&StatisticName::RowsInserted], ScalarValue::Int(0));
    let open = open_rows(&executor);
    assert_eq!(open.len(), 1);
    assert_eq!(int(&open[0], "id"), 2);
    assert_eq!(executor.rows(common::MAIN).len(), 2);
}

#[tokio::test]
async fn partitioned_snapshot_keeps_other_partitions_open() {
    let datasets = common::datasets(common::staging_schema_with("region"));
    let mut executor = common::executor(&datasets);
    let ingestor = common::ingestor(IngestMode::UnitemporalSnapshot(
        UnitemporalSnapshot::builder()
            .digest_field("digest".to_string())
            .transaction_milestoning(common::batch_id_milestoning())
            .partitioning(
                Partitioning::builder()
                    .partition_fields(vec!["region".to_string()])
                    .build(),
            )
            .build(),
    ));

    stage(
        &mut executor,
        vec![
            row_with(1, 10, "a", &[("region", "east")]),
            row_with(2, 20, "b", &[("region", "west")]),
        ],
    );
    ingestor.ingest(&mut executor, &datasets).await.unwrap();

    stage(
        &mut executor,
        vec![
            row_with(1, 11, "a2", &[("region", "east")]),
            row_with(3, 30, "c", &[("region", "east")]),
        ],
    );
    ingestor.ingest(&mut executor, &datasets).await.unwrap();

    let mut open: Vec<_> = open_rows(&executor)
        .iter()
        .map(|row| (int(row, "id"), int(row, "amount"), int(row, "batch_id_in")))
        .collect();
    open.sort();
    assert_eq!(open, vec![(1, 11, 2), (2, 20, 1), (3, 30, 2)]);
    assert_eq!(executor.rows(common::MAIN).len(), 4);
}
