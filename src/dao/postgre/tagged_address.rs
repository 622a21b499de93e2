use sqlx::{Error, QueryBuilder};

use crate::model::{Table, Tagged_Address};

use super::{DataBase, BATCH_SIZE};

impl Table<Tagged_Address> {
    /// All tags for one chain, addresses lower-cased and the label
    /// defaulting to the category.
    pub async fn get_by_chain(
        &self,
        chain: &str,
    ) -> Result<Vec<Tagged_Address>, Error> {
        sqlx::query_as(
            r#"
            SELECT
                LOWER(address) AS address,
                chain,
                category,
                COALESCE(label, category) AS label,
                source
            FROM tagged_addresses
            WHERE chain = $1
            "#,
        )
        .bind(chain)
        .persistent(true)
        .fetch_all(&self.pool)
        .await
    }

    /// Insert or refresh tags; the (address, chain) pair identifies a tag.
    pub async fn upsert_many(
        &self,
        data: &[Tagged_Address],
    ) -> Result<u64, Error> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut transaction = self.pool.begin().await?;
        let mut affected = 0;

        for chunk in data.chunks(BATCH_SIZE) {
            let mut query_builder: QueryBuilder<DataBase> = QueryBuilder::new(
                r#"
                INSERT INTO tagged_addresses (
                    address,
                    chain,
                    category,
                    label,
                    source
                )"#,
            );

            query_builder.push_values(chunk, |mut b, tag| {
                b.push_bind(tag.address.to_lowercase())
                    .push_bind(&tag.chain)
                    .push_bind(&tag.category)
                    .push_bind(&tag.label)
                    .push_bind(&tag.source);
            });

            query_builder.push(
                r#"
                ON CONFLICT (address, chain) DO UPDATE SET
                    category = EXCLUDED.category,
                    label = EXCLUDED.label,
                    source = EXCLUDED.source,
                    updated_at = NOW()
                "#,
            );

            let result = query_builder
                .build()
                .persistent(true)
                .execute(&mut *transaction)
                .await?;
            affected += result.rows_affected();
        }

        transaction.commit().await?;

        Ok(affected)
    }
}
