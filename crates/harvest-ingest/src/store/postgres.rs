use super::{InsertOutcome, RecordStore, StoreError, StoreResult};
use async_trait::async_trait;
use harvest_common::types::{LegalRecord, NewsRecord, Record, ValidRecord};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;

/// Store backed by the `records` and `legal_records` tables
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_news(&self, record: &ValidRecord, news: &NewsRecord) -> StoreResult<InsertOutcome> {
        let inserted = sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO records (
                id, text, source, url, header, published_at, published_at_iso,
                parsed_at, author, categories, images
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (source, url) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(&news.text)
        .bind(&record.key.source)
        .bind(&record.key.url)
        .bind(news.title.trim())
        .bind(record.published_at.timestamp())
        .bind(record.published_at)
        .bind(record.parsed_at.timestamp())
        .bind(news.author.as_deref())
        .bind(news.categories.as_ref().map(Json))
        .bind(news.images.as_ref().map(Json))
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        Ok(match inserted {
            Some(_) => InsertOutcome::Inserted,
            None => InsertOutcome::Duplicate,
        })
    }

    async fn insert_legal(&self, record: &ValidRecord, legal: &LegalRecord) -> StoreResult<InsertOutcome> {
        // Conflicting rows are only touched when the stage moved; xmax = 0
        // marks a freshly inserted tuple.
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO legal_records (
                id, text, original_id, doc_kind, title, source, url,
                published_at, parsed_at, jurisdiction, language, stage,
                discussion_period, explanatory_note, summary_reports, comment_stats
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (source, url) DO UPDATE
            SET stage = EXCLUDED.stage,
                parsed_at = EXCLUDED.parsed_at,
                title = EXCLUDED.title,
                updated_at = NOW()
            WHERE legal_records.stage IS DISTINCT FROM EXCLUDED.stage
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(record.id)
        .bind(&legal.text)
        .bind(legal.original_id.as_deref())
        .bind(legal.doc_kind.as_deref())
        .bind(legal.title.trim())
        .bind(&record.key.source)
        .bind(&record.key.url)
        .bind(record.published_at.timestamp())
        .bind(record.parsed_at.timestamp())
        .bind(legal.jurisdiction.as_deref())
        .bind(legal.language.as_deref())
        .bind(legal.stage.as_deref())
        .bind(legal.discussion_period.as_ref().map(Json))
        .bind(legal.explanatory_note.as_ref().map(Json))
        .bind(legal.summary_reports.as_ref().map(Json))
        .bind(legal.comment_stats.as_ref().map(Json))
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        Ok(match inserted {
            Some(true) => InsertOutcome::Inserted,
            Some(false) => InsertOutcome::Updated,
            None => InsertOutcome::Duplicate,
        })
    }

    /// Multi-row insert of news records. Returns the keys that were inserted.
    async fn insert_news_chunk(
        &self,
        rows: &[(&ValidRecord, &NewsRecord)],
    ) -> Result<HashSet<(String, String)>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO records (id, text, source, url, header, published_at, \
             published_at_iso, parsed_at, author, categories, images) ",
        );
        qb.push_values(rows, |mut b, (record, news)| {
            b.push_bind(record.id)
                .push_bind(news.text.clone())
                .push_bind(record.key.source.clone())
                .push_bind(record.key.url.clone())
                .push_bind(news.title.trim().to_string())
                .push_bind(record.published_at.timestamp())
                .push_bind(record.published_at)
                .push_bind(record.parsed_at.timestamp())
                .push_bind(news.author.clone())
                .push_bind(news.categories.clone().map(Json))
                .push_bind(news.images.clone().map(Json));
        });
        qb.push(" ON CONFLICT (source, url) DO NOTHING RETURNING source, url");

        let inserted: Vec<(String, String)> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(inserted.into_iter().collect())
    }
}

/// Map a driver error onto the store taxonomy.
fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            match code.get(..2) {
                // connection exception, insufficient resources, operator intervention
                Some("08") | Some("53") | Some("57") => StoreError::Unavailable(err.to_string()),
                Some("40") => StoreError::Unavailable(err.to_string()),
                // data exception, integrity constraint violation
                Some("22") | Some("23") => StoreError::Malformed(err.to_string()),
                _ => StoreError::Backend(err.to_string()),
            }
        },
        sqlx::Error::Encode(_) | sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => {
            StoreError::Malformed(err.to_string())
        },
        _ => StoreError::Backend(err.to_string()),
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert(&self, record: &ValidRecord) -> StoreResult<InsertOutcome> {
        match &record.record {
            Record::News(news) => self.insert_news(record, news).await,
            Record::Legal(legal) => self.insert_legal(record, legal).await,
        }
    }

    async fn insert_many(&self, records: &[ValidRecord]) -> Vec<StoreResult<InsertOutcome>> {
        let mut results: Vec<Option<StoreResult<InsertOutcome>>> = vec![None; records.len()];

        // First occurrence of each key goes into the bulk statement, later
        // ones in the same chunk are duplicates of it.
        let mut seen = HashSet::new();
        let mut bulk = Vec::new();
        let mut bulk_idx = Vec::new();
        for (i, record) in records.iter().enumerate() {
            if let Record::News(news) = &record.record {
                if seen.insert(&record.key) {
                    bulk.push((record, news));
                    bulk_idx.push(i);
                } else {
                    results[i] = Some(Ok(InsertOutcome::Duplicate));
                }
            }
        }

        if !bulk.is_empty() {
            match self.insert_news_chunk(&bulk).await {
                Ok(inserted) => {
                    for (i, (record, _)) in bulk_idx.iter().zip(&bulk) {
                        let key = (record.key.source.clone(), record.key.url.clone());
                        results[*i] = Some(Ok(if inserted.contains(&key) {
                            InsertOutcome::Inserted
                        } else {
                            InsertOutcome::Duplicate
                        }));
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        records = bulk.len(),
                        "Bulk insert failed, retrying records one by one"
                    );
                    for (i, (record, news)) in bulk_idx.iter().zip(&bulk) {
                        results[*i] = Some(self.insert_news(record, news).await);
                    }
                },
            }
        }

        let mut out = Vec::with_capacity(records.len());
        for (record, result) in records.iter().zip(results) {
            out.push(match result {
                Some(result) => result,
                None => self.insert(record).await,
            });
        }
        out
    }
}
