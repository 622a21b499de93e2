pub use self::{
    database::DatabasePool,
    http::{ExchangeRates, StablecoinBalances, HTTP},
    retry::RetryPolicy,
    source::{FetchError, Resource, Source},
};

mod database;
mod http;
mod retry;
mod source;
