use crate::{
    configuration::Config,
    dao::{PoolOption, PoolType},
    error::Error,
    model::{Categorized_Transfer, Stablecoin_Metric, Table, Tagged_Address},
};

#[derive(Debug)]
pub struct DatabasePool {
    pub categorized_transfer: Table<Categorized_Transfer>,
    pub stablecoin_metric: Table<Stablecoin_Metric>,
    pub tagged_address: Table<Tagged_Address>,
    pub pool: PoolType,
}

impl DatabasePool {
    pub async fn new(config: &Config) -> Result<DatabasePool, Error> {
        let pool = PoolOption::new()
            .max_connections(config.max_tasks as u32 + 2)
            .connect(config.database_url.as_str())
            .await?;

        Ok(DatabasePool::from_pool(pool))
    }

    pub fn from_pool(pool: PoolType) -> DatabasePool {
        DatabasePool {
            categorized_transfer: Table::new(pool.clone()),
            stablecoin_metric: Table::new(pool.clone()),
            tagged_address: Table::new(pool.clone()),
            pool,
        }
    }
}
