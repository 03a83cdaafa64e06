use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::models::{KeywordRecord, NewKeywordRecord, SearchRecord};

// key: analysis-store -> searches + keyword rows persistence seam
#[async_trait]
pub trait SearchStore: Send + Sync {
    async fn create_search(&self, user_id: Uuid, keywords: &[String]) -> Result<SearchRecord>;
    /// Adds the keywords of a later batch to a search opened by an earlier one.
    async fn append_keywords(&self, search_id: Uuid, keywords: &[String]) -> Result<()>;
    async fn insert_keyword_records(&self, records: &[NewKeywordRecord]) -> Result<u64>;
    async fn search_for_user(&self, search_id: Uuid, user_id: Uuid)
        -> Result<Option<SearchRecord>>;
    async fn keyword_records(&self, search_id: Uuid) -> Result<Vec<KeywordRecord>>;
    async fn list_searches(&self, user_id: Uuid, limit: i64) -> Result<Vec<SearchRecord>>;
    /// The caller's keywords ranked by opportunity, then growth. `None` means no limit.
    async fn top_keywords(&self, user_id: Uuid, limit: Option<i64>) -> Result<Vec<KeywordRecord>>;
}

#[derive(Clone)]
pub struct SearchRepository {
    pool: PgPool,
}

impl SearchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const KEYWORD_COLUMNS: &str = "k.id, k.search_id, k.keyword, k.opportunity_score, k.trends_interest, k.trends_growth_rate, k.trends_region, k.spocket_count, k.zendrop_count, k.amazon_serp_estimate, k.aliexpress_serp_estimate, k.amazon_product_count, k.aliexpress_product_count, k.created_at";

#[async_trait]
impl SearchStore for SearchRepository {
    async fn create_search(&self, user_id: Uuid, keywords: &[String]) -> Result<SearchRecord> {
        let record = sqlx::query_as::<_, SearchRecord>(
            r#"
            INSERT INTO searches (id, user_id, keywords)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, keywords, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(keywords)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn append_keywords(&self, search_id: Uuid, keywords: &[String]) -> Result<()> {
        sqlx::query("UPDATE searches SET keywords = keywords || $2 WHERE id = $1")
            .bind(search_id)
            .bind(keywords)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_keyword_records(&self, records: &[NewKeywordRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO keywords (id, search_id, keyword, opportunity_score, trends_interest, trends_growth_rate, trends_region, spocket_count, zendrop_count, amazon_serp_estimate, aliexpress_serp_estimate, amazon_product_count, aliexpress_product_count) ",
        );
        builder.push_values(records, |mut row, record| {
            row.push_bind(Uuid::new_v4())
                .push_bind(record.search_id)
                .push_bind(record.keyword.clone())
                .push_bind(record.opportunity_score)
                .push_bind(record.trends_interest)
                .push_bind(record.trends_growth_rate)
                .push_bind(record.trends_region.clone())
                .push_bind(record.spocket_count)
                .push_bind(record.zendrop_count)
                .push_bind(record.amazon_serp_estimate)
                .push_bind(record.aliexpress_serp_estimate)
                .push_bind(record.amazon_product_count)
                .push_bind(record.aliexpress_product_count);
        });
        let inserted = builder.build().execute(&self.pool).await?.rows_affected();
        Ok(inserted)
    }

    async fn search_for_user(
        &self,
        search_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<SearchRecord>> {
        let record = sqlx::query_as::<_, SearchRecord>(
            "SELECT id, user_id, keywords, created_at FROM searches WHERE id = $1 AND user_id = $2",
        )
        .bind(search_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn keyword_records(&self, search_id: Uuid) -> Result<Vec<KeywordRecord>> {
        let records = sqlx::query_as::<_, KeywordRecord>(&format!(
            "SELECT {KEYWORD_COLUMNS} FROM keywords k WHERE k.search_id = $1 ORDER BY k.position ASC"
        ))
        .bind(search_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_searches(&self, user_id: Uuid, limit: i64) -> Result<Vec<SearchRecord>> {
        let records = sqlx::query_as::<_, SearchRecord>(
            r#"
            SELECT id, user_id, keywords, created_at
            FROM searches
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn top_keywords(&self, user_id: Uuid, limit: Option<i64>) -> Result<Vec<KeywordRecord>> {
        let records = sqlx::query_as::<_, KeywordRecord>(&format!(
            r#"
            SELECT {KEYWORD_COLUMNS}
            FROM keywords k
            JOIN searches s ON s.id = k.search_id
            WHERE s.user_id = $1
            ORDER BY k.opportunity_score DESC, k.trends_growth_rate DESC NULLS LAST
            LIMIT $2
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
