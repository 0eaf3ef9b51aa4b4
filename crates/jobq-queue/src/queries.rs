//! SQL used by the queue, rewritten once per queue instance.

use jobq_store::{QueryRewriter, JOBS_DATA_TABLE, JOBS_TABLE};

const INSERT_JOB_DATA: &str = "INSERT INTO jobs_data \
     (id, tenant, string_udf_1, string_udf_2, int_udf_1, int_udf_2, properties, retry_group, part) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

const INSERT_JOB: &str = "INSERT INTO jobs \
     (id, tenant, correlation_id, job_type, process_at, state, sub_state, version, pending_execution, part) \
     VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)";

const SMALLEST_SCHEDULED_ID: &str =
    "SELECT MIN(id) FROM jobs WHERE tenant = ? AND state = ? AND job_type = ?";

const CLAIM_CANDIDATE: &str = "SELECT id, pending_execution FROM jobs \
     WHERE process_at = ? AND tenant = ? AND job_type = ? AND state = ? AND part = ? \
     LIMIT 1 FOR UPDATE SKIP LOCKED";

const CLAIM: &str = "UPDATE jobs \
     SET state = ?, version = version + 1, pending_execution = pending_execution - 1 \
     WHERE id = ? AND part = ? AND state = ?";

const UPDATE_STATE: &str = "UPDATE jobs SET state = ?, sub_state = ? WHERE id = ? AND part = ?";

const FINISH_PROCESSING: &str = "UPDATE jobs SET state = ?, sub_state = ? \
     WHERE id = ? AND part = ? AND state = ?";

const FETCH_JOB: &str = "SELECT tenant, job_type, state, sub_state, correlation_id, pending_execution \
     FROM jobs WHERE id = ? AND part = ?";

// Aliased so the column names seen by FromRow survive renaming.
const FETCH_JOB_DATA: &str = "SELECT properties, \
     string_udf_1 AS udf_string_1, string_udf_2 AS udf_string_2, \
     int_udf_1 AS udf_int_1, int_udf_2 AS udf_int_2, retry_group \
     FROM jobs_data WHERE id = ? AND part = ?";

const UPDATE_JOB_DATA: &str = "UPDATE jobs_data \
     SET string_udf_1 = ?, string_udf_2 = ?, int_udf_1 = ?, int_udf_2 = ?, properties = ? \
     WHERE id = ? AND part = ?";

const EXISTS_JOB: &str = "SELECT 1 FROM jobs WHERE id = ? AND part = ?";

const EXISTS_JOB_DATA: &str = "SELECT 1 FROM jobs_data WHERE id = ? AND part = ?";

/// Physical SQL for every statement the queue runs.
#[derive(Debug, Clone)]
pub(crate) struct Queries {
    pub insert_job_data: String,
    pub insert_job: String,
    pub smallest_scheduled_id: String,
    pub claim_candidate: String,
    pub claim: String,
    pub update_state: String,
    pub finish_processing: String,
    pub fetch_job: String,
    pub fetch_job_data: String,
    pub update_job_data: String,
    pub exists_job: String,
    pub exists_job_data: String,
}

impl Queries {
    pub fn new(rewriter: &dyn QueryRewriter) -> Self {
        let jobs = |sql: &str| rewriter.rewrite_query(JOBS_TABLE, sql);
        let data = |sql: &str| rewriter.rewrite_query(JOBS_DATA_TABLE, sql);
        Self {
            insert_job_data: data(INSERT_JOB_DATA),
            insert_job: jobs(INSERT_JOB),
            smallest_scheduled_id: jobs(SMALLEST_SCHEDULED_ID),
            claim_candidate: jobs(CLAIM_CANDIDATE),
            claim: jobs(CLAIM),
            update_state: jobs(UPDATE_STATE),
            finish_processing: jobs(FINISH_PROCESSING),
            fetch_job: jobs(FETCH_JOB),
            fetch_job_data: data(FETCH_JOB_DATA),
            update_job_data: data(UPDATE_JOB_DATA),
            exists_job: jobs(EXISTS_JOB),
            exists_job_data: data(EXISTS_JOB_DATA),
        }
    }
}
