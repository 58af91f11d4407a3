use sqlx::PgPool;

use crate::models::iteration::{IterationRecord, StoredIteration};

/// Insert an iteration record.
///
/// Redelivery of the same `(job_id, iteration_number)` is ignored, so the
/// sink can be retried without duplicating rows. Returns whether a row was
/// written.
pub async fn insert_iteration(pool: &PgPool, record: &IterationRecord) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO iterations (job_id, iteration_number, "timestamp", description, image_url, revised_prompt)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (job_id, iteration_number) DO NOTHING
        "#,
    )
    .bind(record.job_id)
    .bind(record.iteration_number as i32)
    .bind(record.timestamp)
    .bind(&record.description)
    .bind(&record.image_url)
    .bind(&record.revised_prompt)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// All recorded iterations across all jobs, oldest first.
pub async fn list_iterations(pool: &PgPool) -> Result<Vec<StoredIteration>, sqlx::Error> {
    sqlx::query_as::<_, StoredIteration>(
        r#"
        SELECT id, job_id, iteration_number, "timestamp", description, image_url, revised_prompt,
               title, tags, short_description
        FROM iterations
        ORDER BY "timestamp" ASC, id ASC
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Case-insensitive substring search over the descriptive columns.
pub async fn search_iterations(pool: &PgPool, query: &str) -> Result<Vec<StoredIteration>, sqlx::Error> {
    sqlx::query_as::<_, StoredIteration>(
        r#"
        SELECT id, job_id, iteration_number, "timestamp", description, image_url, revised_prompt,
               title, tags, short_description
        FROM iterations
        WHERE description ILIKE $1 ESCAPE '\'
           OR title ILIKE $1 ESCAPE '\'
           OR tags ILIKE $1 ESCAPE '\'
           OR short_description ILIKE $1 ESCAPE '\'
        ORDER BY "timestamp" ASC, id ASC
        "#,
    )
    .bind(like_pattern(query))
    .fetch_all(pool)
    .await
}

/// Build a `%...%` pattern that matches `query` literally.
pub fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_wraps_query() {
        assert_eq!(like_pattern("heron"), "%heron%");
        assert_eq!(like_pattern(""), "%%");
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("100%"), "%100\\%%");
        assert_eq!(like_pattern("a_b"), "%a\\_b%");
        assert_eq!(like_pattern("c:\\x"), "%c:\\\\x%");
    }
}
