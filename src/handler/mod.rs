pub mod backfill;
pub mod evm_transfers;
pub mod pipeline;
pub mod snapshots;
pub mod solana_transfers;
pub mod tag_import;
pub mod tag_resolver;
pub mod transfers;
