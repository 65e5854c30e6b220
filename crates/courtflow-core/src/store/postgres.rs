use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courtflow_parser::CaseReturnRow;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use super::{ImportStore, StoredCounts, BLOCKING_STATUSES};
use crate::error::PersistenceError;
use crate::model::{
    BatchFilter, BatchOutcome, BatchStatus, ErrorFilter, ImportBatch, ImportErrorDetail,
    ImportedCounts, ImportedRow, NewBatch, Page,
};

const BATCH_COLUMNS: &str = r#"
    id,
    filename,
    file_size,
    checksum,
    file_path,
    total_records,
    successful_records,
    failed_records,
    status,
    error_log,
    created_by,
    created_at,
    updated_at,
    completed_at
"#;

// Keeps each multi-row insert well under the bind parameter limit.
const ERROR_INSERT_CHUNK: usize = 1_000;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn status_names(statuses: &[BatchStatus]) -> Vec<String> {
    statuses.iter().map(|status| status.as_str().to_string()).collect()
}

fn batch_from_row(row: &PgRow) -> Result<ImportBatch, PersistenceError> {
    let status: String = row.try_get("status")?;
    Ok(ImportBatch {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        file_size: row.try_get("file_size")?,
        checksum: row.try_get("checksum")?,
        file_path: row.try_get("file_path")?,
        total_records: row.try_get("total_records")?,
        successful_records: row.try_get("successful_records")?,
        failed_records: row.try_get("failed_records")?,
        status: status.parse().map_err(PersistenceError::Other)?,
        error_log: row.try_get("error_log")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn error_from_row(row: &PgRow) -> Result<ImportErrorDetail, PersistenceError> {
    let row_number: i32 = row.try_get("row_number")?;
    let error_type: String = row.try_get("error_type")?;
    let severity: String = row.try_get("severity")?;
    Ok(ImportErrorDetail {
        row_number: u32::try_from(row_number).unwrap_or_default(),
        field: row.try_get("field")?,
        error_type: error_type.parse().map_err(PersistenceError::Other)?,
        message: row.try_get("message")?,
        suggestion: row.try_get("suggestion")?,
        severity: severity.parse().map_err(PersistenceError::Other)?,
        raw_value: row.try_get("raw_value")?,
    })
}

#[async_trait]
impl ImportStore for PostgresStore {
    async fn find_blocking_duplicate(
        &self,
        checksum: &str,
    ) -> Result<Option<ImportBatch>, PersistenceError> {
        let sql = format!(
            r#"
            SELECT {BATCH_COLUMNS}
            FROM import_batches
            WHERE checksum = $1
              AND status = ANY($2)
              AND successful_records > 0
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query(&sql)
            .bind(checksum)
            .bind(status_names(&BLOCKING_STATUSES))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(batch_from_row).transpose()
    }

    async fn create_batch(&self, batch: NewBatch) -> Result<ImportBatch, PersistenceError> {
        let sql = format!(
            r#"
            INSERT INTO import_batches (id, filename, file_size, checksum, file_path, status, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {BATCH_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&batch.filename)
            .bind(batch.file_size)
            .bind(&batch.checksum)
            .bind(&batch.file_path)
            .bind(BatchStatus::Pending.as_str())
            .bind(&batch.created_by)
            .fetch_one(&self.pool)
            .await?;

        batch_from_row(&row)
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<ImportBatch>, PersistenceError> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM import_batches WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(batch_from_row).transpose()
    }

    async fn set_status(
        &self,
        id: Uuid,
        from: &[BatchStatus],
        to: BatchStatus,
    ) -> Result<bool, PersistenceError> {
        let allowed: Vec<BatchStatus> = from
            .iter()
            .copied()
            .filter(|status| status.can_transition_to(to))
            .collect();
        if allowed.is_empty() {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE import_batches
            SET status = $2,
                updated_at = NOW(),
                completed_at = CASE
                    WHEN $2 IN ('FAILED', 'CLEANED') THEN COALESCE(completed_at, NOW())
                    ELSE completed_at
                END
            WHERE id = $1 AND status = ANY($3)
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(status_names(&allowed))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn start_processing(&self, id: Uuid, total_records: i32) -> Result<bool, PersistenceError> {
        let result = sqlx::query(
            r#"
            UPDATE import_batches
            SET status = 'PROCESSING',
                total_records = $2,
                successful_records = 0,
                failed_records = 0,
                updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(total_records)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(
        &self,
        id: Uuid,
        successful_records: i32,
        failed_records: i32,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            UPDATE import_batches
            SET successful_records = $2, failed_records = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(successful_records)
        .bind(failed_records)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finish_batch(&self, id: Uuid, outcome: BatchOutcome) -> Result<bool, PersistenceError> {
        let sources = BatchStatus::sources_of(outcome.status);
        let result = sqlx::query(
            r#"
            UPDATE import_batches
            SET status = $2,
                total_records = $3,
                successful_records = $4,
                failed_records = $5,
                error_log = $6,
                updated_at = NOW(),
                completed_at = NOW()
            WHERE id = $1 AND status = ANY($7) AND status <> 'CLEANED'
            "#,
        )
        .bind(id)
        .bind(outcome.status.as_str())
        .bind(outcome.total_records)
        .bind(outcome.successful_records)
        .bind(outcome.failed_records)
        .bind(outcome.error_log)
        .bind(status_names(&sources))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_errors(
        &self,
        batch_id: Uuid,
        errors: &[ImportErrorDetail],
    ) -> Result<(), PersistenceError> {
        for chunk in errors.chunks(ERROR_INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO import_errors (batch_id, row_number, field, error_type, message, suggestion, severity, raw_value) ",
            );
            builder.push_values(chunk, |mut values, error| {
                values
                    .push_bind(batch_id)
                    .push_bind(error.row_number as i32)
                    .push_bind(error.field.clone())
                    .push_bind(error.error_type.as_str())
                    .push_bind(error.message.clone())
                    .push_bind(error.suggestion.clone())
                    .push_bind(error.severity.as_str())
                    .push_bind(error.raw_value.clone());
            });
            builder.build().execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn import_row(
        &self,
        batch_id: Uuid,
        row: &CaseReturnRow,
    ) -> Result<ImportedRow, PersistenceError> {
        let counts = StoredCounts::from_row(row)?;
        let mut tx = self.pool.begin().await?;

        let court_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO courts (id, name) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.court)
        .fetch_one(&mut *tx)
        .await?;

        let case_number = row.case_number();
        let original = row.original.as_ref();
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO cases (
                id,
                court_id,
                case_number,
                case_type,
                filed_on,
                original_court,
                original_code,
                original_number,
                original_year,
                male_applicant,
                female_applicant,
                organization_applicant,
                male_defendant,
                female_defendant,
                organization_defendant,
                import_batch_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (court_id, case_number) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(court_id)
        .bind(&case_number)
        .bind(row.case_type)
        .bind(row.filed_date)
        .bind(original.and_then(|o| o.court.clone()))
        .bind(original.and_then(|o| o.code.clone()))
        .bind(original.and_then(|o| o.number.clone()))
        .bind(original.and_then(|o| o.year))
        .bind(counts.male_applicant)
        .bind(counts.female_applicant)
        .bind(counts.organization_applicant)
        .bind(counts.male_defendant)
        .bind(counts.female_defendant)
        .bind(counts.organization_defendant)
        .bind(batch_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (case_id, case_created) = match inserted {
            Some(id) => (id, true),
            None => {
                let id: Uuid = sqlx::query_scalar(
                    "SELECT id FROM cases WHERE court_id = $1 AND case_number = $2",
                )
                .bind(court_id)
                .bind(&case_number)
                .fetch_one(&mut *tx)
                .await?;
                (id, false)
            }
        };

        let activity_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO case_activities (
                id,
                case_id,
                activity_date,
                coming_for,
                outcome,
                reason_adjournment,
                next_hearing_date,
                legal_representation,
                applicant_witnesses,
                defendant_witnesses,
                custody,
                other_details,
                row_fingerprint,
                import_batch_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(activity_id)
        .bind(case_id)
        .bind(row.activity_date)
        .bind(&row.coming_for)
        .bind(&row.outcome)
        .bind(row.reason_adjournment.as_deref())
        .bind(row.next_hearing)
        .bind(row.legal_representation)
        .bind(counts.applicant_witnesses)
        .bind(counts.defendant_witnesses)
        .bind(counts.custody)
        .bind(row.other_details.as_deref())
        .bind(&row.fingerprint)
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;

        for (idx, judge) in row.judges.iter().enumerate() {
            let judge_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO judges (id, full_name) VALUES ($1, $2)
                ON CONFLICT (full_name) DO UPDATE SET full_name = EXCLUDED.full_name
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(judge)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO case_judge_assignments (case_activity_id, judge_id, position)
                VALUES ($1, $2, $3)
                ON CONFLICT (case_activity_id, judge_id) DO NOTHING
                "#,
            )
            .bind(activity_id)
            .bind(judge_id)
            .bind(idx as i16 + 1)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(ImportedRow {
            case_id,
            activity_id,
            case_created,
        })
    }

    async fn list_batches(&self, filter: &BatchFilter) -> Result<Page<ImportBatch>, PersistenceError> {
        let filter = filter.clone().normalized();
        let status = filter.status.map(|status| status.as_str());
        const WHERE: &str = r#"
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at <= $3)
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM import_batches {WHERE}"))
            .bind(status)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM import_batches {WHERE} ORDER BY created_at DESC LIMIT $4 OFFSET $5"
        );
        let rows = sqlx::query(&sql)
            .bind(status)
            .bind(filter.from)
            .bind(filter.to)
            .bind(i64::from(filter.limit))
            .bind(filter.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .iter()
            .map(batch_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            page: filter.page,
            limit: filter.limit,
            total: total as u64,
        })
    }

    async fn list_errors(
        &self,
        batch_id: Uuid,
        filter: &ErrorFilter,
    ) -> Result<Page<ImportErrorDetail>, PersistenceError> {
        let filter = filter.clone().normalized();
        let error_type = filter.error_type.map(|kind| kind.as_str());
        let severity = filter.severity.map(|severity| severity.as_str());
        const WHERE: &str = r#"
            WHERE batch_id = $1
              AND ($2::text IS NULL OR error_type = $2)
              AND ($3::text IS NULL OR severity = $3)
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM import_errors {WHERE}"))
            .bind(batch_id)
            .bind(error_type)
            .bind(severity)
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            r#"
            SELECT row_number, field, error_type, message, suggestion, severity, raw_value
            FROM import_errors {WHERE}
            ORDER BY row_number, id
            LIMIT $4 OFFSET $5
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(batch_id)
            .bind(error_type)
            .bind(severity)
            .bind(i64::from(filter.limit))
            .bind(filter.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .iter()
            .map(error_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            page: filter.page,
            limit: filter.limit,
            total: total as u64,
        })
    }

    async fn imported_counts(&self, batch_id: Uuid) -> Result<ImportedCounts, PersistenceError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM case_activities WHERE import_batch_id = $1) AS activities,
                (SELECT COUNT(*) FROM cases WHERE import_batch_id = $1) AS cases_created,
                (
                    SELECT COUNT(*)
                    FROM case_judge_assignments a
                    JOIN case_activities ca ON ca.id = a.case_activity_id
                    WHERE ca.import_batch_id = $1
                ) AS judge_assignments
            "#,
        )
        .bind(batch_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ImportedCounts {
            activities: row.try_get("activities")?,
            cases_created: row.try_get("cases_created")?,
            judge_assignments: row.try_get("judge_assignments")?,
        })
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<ImportBatch>, PersistenceError> {
        let sql = format!(
            r#"
            SELECT {BATCH_COLUMNS}
            FROM import_batches
            WHERE status = 'PENDING' AND created_at < $1
            ORDER BY created_at
            "#
        );
        let rows = sqlx::query(&sql).bind(cutoff).fetch_all(&self.pool).await?;

        rows.iter().map(batch_from_row).collect()
    }

    async fn active_file_paths(&self) -> Result<Vec<String>, PersistenceError> {
        let paths: Vec<String> = sqlx::query_scalar(
            "SELECT file_path FROM import_batches WHERE status IN ('PENDING', 'PROCESSING')",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(paths)
    }
}
