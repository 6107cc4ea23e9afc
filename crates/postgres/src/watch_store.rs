use async_trait::async_trait;
use availability_watch::{
    Facility, StoreError, Subscription, SubscriptionSummary, WatchStore, WishedFacility,
};
use chrono::NaiveDate;
use log::debug;
use sqlx::{PgPool, Row};

/// [`WatchStore`] backed by PostgreSQL
#[derive(Clone)]
pub struct PgWatchStore {
    pool: PgPool,
}

impl PgWatchStore {
    /// Create a store over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WatchStore for PgWatchStore {
    async fn upsert_facilities(&self, facilities: &[Facility]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for facility in facilities {
            let result = sqlx::query(
                r#"
                INSERT INTO facilities (id, name)
                VALUES ($1, $2)
                ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
                "#,
            )
            .bind(&facility.id)
            .bind(&facility.name)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected() as usize;
        }

        tx.commit().await?;
        debug!("Upserted {} facilities", written);
        Ok(written)
    }

    async fn list_facilities(&self) -> Result<Vec<Facility>, StoreError> {
        let facilities =
            sqlx::query_as::<_, Facility>("SELECT id, name FROM facilities ORDER BY name, id")
                .fetch_all(&self.pool)
                .await?;
        Ok(facilities)
    }

    async fn get_facility(&self, facility_id: &str) -> Result<Option<Facility>, StoreError> {
        let facility =
            sqlx::query_as::<_, Facility>("SELECT id, name FROM facilities WHERE id = $1")
                .bind(facility_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(facility)
    }

    async fn ensure_user(&self, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT INTO users (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_user(&self, user_id: &str) -> Result<bool, StoreError> {
        // subscriptions follow through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_subscription(
        &self,
        user_id: &str,
        facility_id: &str,
        wish_date: Option<NaiveDate>,
    ) -> Result<Subscription, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, facility_id, wish_date)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, facility_id)
            DO UPDATE SET wish_date = EXCLUDED.wish_date, updated_at = NOW()
            RETURNING user_id, facility_id, wish_date, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(facility_id)
        .bind(wish_date)
        .fetch_one(&self.pool)
        .await?;

        Ok(Subscription {
            user_id: row.get("user_id"),
            facility_id: row.get("facility_id"),
            wish_date: row.get("wish_date"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn delete_subscription(
        &self,
        user_id: &str,
        facility_id: &str,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM subscriptions WHERE user_id = $1 AND facility_id = $2")
                .bind(user_id)
                .bind(facility_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_user_subscriptions(
        &self,
        user_id: &str,
    ) -> Result<Vec<SubscriptionSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.facility_id, f.name AS facility_name, s.wish_date
            FROM subscriptions s
            JOIN facilities f ON f.id = s.facility_id
            WHERE s.user_id = $1
            ORDER BY f.name, f.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SubscriptionSummary {
                facility_id: row.get("facility_id"),
                facility_name: row.get("facility_name"),
                wish_date: row.get("wish_date"),
            })
            .collect())
    }

    async fn list_active_subscriptions(&self) -> Result<Vec<WishedFacility>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.user_id, s.facility_id, f.name AS facility_name, s.wish_date
            FROM subscriptions s
            JOIN facilities f ON f.id = s.facility_id
            ORDER BY f.name, f.id, s.user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| WishedFacility {
                user_id: row.get("user_id"),
                facility_id: row.get("facility_id"),
                facility_name: row.get("facility_name"),
                wish_date: row.get("wish_date"),
            })
            .collect())
    }

    async fn insert_seen_if_absent(
        &self,
        facility_id: &str,
        date: NaiveDate,
        status: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO seen_availability (facility_id, date, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (facility_id, date) DO NOTHING
            "#,
        )
        .bind(facility_id)
        .bind(date)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn clear_seen(&self, facility_id: &str, date: NaiveDate) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM seen_availability WHERE facility_id = $1 AND date = $2")
            .bind(facility_id)
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{create_connection_pool, ensure_schema};

    // Needs a reachable database at DATABASE_URL
    #[tokio::test]
    #[ignore]
    async fn test_seen_insert_is_conditional_against_database() {
        let pool = create_connection_pool().await.unwrap();
        ensure_schema(&pool).await.unwrap();
        let store = PgWatchStore::new(pool);
        let date = NaiveDate::from_ymd_opt(2099, 1, 1).unwrap();

        store.clear_seen("TEST_FACILITY", date).await.unwrap();
        assert!(
            store
                .insert_seen_if_absent("TEST_FACILITY", date, "○")
                .await
                .unwrap()
        );
        assert!(
            !store
                .insert_seen_if_absent("TEST_FACILITY", date, "○")
                .await
                .unwrap()
        );
        assert!(store.clear_seen("TEST_FACILITY", date).await.unwrap());
    }

    // Needs a reachable database at DATABASE_URL
    #[tokio::test]
    #[ignore]
    async fn test_subscription_lifecycle_against_database() {
        let pool = create_connection_pool().await.unwrap();
        ensure_schema(&pool).await.unwrap();
        let store = PgWatchStore::new(pool);

        store
            .upsert_facilities(&[Facility {
                id: "TEST_FACILITY".to_string(),
                name: "テスト施設".to_string(),
            }])
            .await
            .unwrap();
        store.remove_user("TEST_USER").await.unwrap();
        assert!(store.ensure_user("TEST_USER").await.unwrap());

        let first = store
            .upsert_subscription("TEST_USER", "TEST_FACILITY", None)
            .await
            .unwrap();
        let wish = NaiveDate::from_ymd_opt(2099, 1, 2);
        let second = store
            .upsert_subscription("TEST_USER", "TEST_FACILITY", wish)
            .await
            .unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.wish_date, wish);

        let listed = store.list_user_subscriptions("TEST_USER").await.unwrap();
        assert_eq!(listed.len(), 1);

        assert!(store.remove_user("TEST_USER").await.unwrap());
        assert!(
            store
                .list_user_subscriptions("TEST_USER")
                .await
                .unwrap()
                .is_empty()
        );
    }
}
