use sqlx::{Error, QueryBuilder};

use crate::model::{Categorized_Transfer, Table};

use super::{DataBase, BATCH_SIZE};

impl Table<Categorized_Transfer> {
    /// Inserts the batch, silently discarding rows whose natural key is
    /// already stored. Returns the number of rows actually written.
    pub async fn insert_many(
        &self,
        data: &[Categorized_Transfer],
    ) -> Result<u64, Error> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut transaction = self.pool.begin().await?;
        let mut written = 0;

        for chunk in data.chunks(BATCH_SIZE) {
            let mut query_builder: QueryBuilder<DataBase> = QueryBuilder::new(
                r#"
                INSERT INTO categorized_transfers (
                    timestamp,
                    chain,
                    token_symbol,
                    token_address,
                    tx_hash,
                    from_address,
                    to_address,
                    amount,
                    category_sender,
                    label_sender,
                    category_receiver,
                    label_receiver,
                    ingestion_time
                )"#,
            );

            query_builder.push_values(chunk, |mut b, transfer| {
                b.push_bind(transfer.timestamp)
                    .push_bind(&transfer.chain)
                    .push_bind(&transfer.token_symbol)
                    .push_bind(&transfer.token_address)
                    .push_bind(&transfer.tx_hash)
                    .push_bind(&transfer.from_address)
                    .push_bind(&transfer.to_address)
                    .push_bind(&transfer.amount)
                    .push_bind(&transfer.category_sender)
                    .push_bind(&transfer.label_sender)
                    .push_bind(&transfer.category_receiver)
                    .push_bind(&transfer.label_receiver)
                    .push_bind(transfer.ingestion_time);
            });

            query_builder.push(
                r#"
                ON CONFLICT (tx_hash, token_address, from_address, to_address, amount)
                DO NOTHING
                "#,
            );

            let result = query_builder
                .build()
                .persistent(true)
                .execute(&mut *transaction)
                .await?;
            written += result.rows_affected();
        }

        transaction.commit().await?;

        Ok(written)
    }

    pub async fn count_by_tx_hash(
        &self,
        chain: &str,
        tx_hash: &str,
    ) -> Result<i64, Error> {
        let (value,): (i64,) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*)
            FROM categorized_transfers
            WHERE chain = $1 AND tx_hash = $2
            "#,
        )
        .bind(chain)
        .bind(tx_hash)
        .persistent(true)
        .fetch_one(&self.pool)
        .await?;

        Ok(value)
    }
}
