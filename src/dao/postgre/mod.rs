pub use self::types::{DataBase, PoolOption, PoolType, BATCH_SIZE};

mod categorized_transfer;
mod stablecoin_metric;
mod tagged_address;
mod types;
