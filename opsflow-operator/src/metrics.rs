//! Operator metrics.

pub const METRIC_RECORDS_CREATED: &str = "opsflow_operator_records_created";
pub const METRIC_RECORDS_UPDATED: &str = "opsflow_operator_records_updated";
pub const METRIC_RECORDS_DELETED: &str = "opsflow_operator_records_deleted";
pub const METRIC_UPDATE_CONFLICTS: &str = "opsflow_operator_update_conflicts";
pub const METRIC_FLEET_CALL_ERRORS: &str = "opsflow_operator_fleet_call_errors";
pub const METRIC_SELF_HEALS: &str = "opsflow_operator_self_heals";
pub const METRIC_TASKS_PROCESSED: &str = "opsflow_operator_tasks_processed";
pub const METRIC_TASKS_ENQUEUED: &str = "opsflow_operator_tasks_enqueued";
pub const METRIC_JOB_RUNS: &str = "opsflow_operator_job_runs";
pub const METRIC_JOB_SKIPS: &str = "opsflow_operator_job_skips";
pub const METRIC_REPORTED_ERRORS: &str = "opsflow_operator_reported_errors";

/// Register the descriptions of all operator metrics.
pub fn register_metrics() {
    metrics::describe_counter!(METRIC_RECORDS_CREATED, metrics::Unit::Count, "the number of NodeResourceInfo records created");
    metrics::describe_counter!(METRIC_RECORDS_UPDATED, metrics::Unit::Count, "the number of NodeResourceInfo records updated");
    metrics::describe_counter!(METRIC_RECORDS_DELETED, metrics::Unit::Count, "the number of orphaned NodeResourceInfo records deleted");
    metrics::describe_counter!(METRIC_UPDATE_CONFLICTS, metrics::Unit::Count, "the number of record updates rejected for a stale resource version");
    metrics::describe_counter!(METRIC_FLEET_CALL_ERRORS, metrics::Unit::Count, "the number of failed calls to the fleet service");
    metrics::describe_counter!(METRIC_SELF_HEALS, metrics::Unit::Count, "the number of nodes re-registered with the fleet service");
    metrics::describe_counter!(METRIC_TASKS_PROCESSED, metrics::Unit::Count, "the number of queue tasks processed, labelled by outcome");
    metrics::describe_counter!(METRIC_TASKS_ENQUEUED, metrics::Unit::Count, "the number of node batch tasks pushed to the queue");
    metrics::describe_counter!(METRIC_JOB_RUNS, metrics::Unit::Count, "the number of scheduled job runs executed by this instance");
    metrics::describe_counter!(METRIC_JOB_SKIPS, metrics::Unit::Count, "the number of scheduled job runs skipped as the job lock was held elsewhere");
    metrics::describe_counter!(METRIC_REPORTED_ERRORS, metrics::Unit::Count, "the number of tolerated errors routed through the error reporter");
}
