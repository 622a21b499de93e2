use sqlx::{
    postgres::PgPoolOptions,
    PgPool, Postgres,
};

pub type PoolType = PgPool;
pub type PoolOption = PgPoolOptions;
pub type DataBase = Postgres;

/// Rows per multi-value INSERT; keeps binds well below the 65535 limit.
pub const BATCH_SIZE: usize = 1000;
