use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{
    error::Error,
    helpers::{Category, Chain},
    model::{Categorized_Transfer, Tagged_Address},
    provider::DatabasePool,
};

use super::transfers::RawTransfer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub category: Category,
    pub label: String,
}

/// Address classification for one chain. Built once per run and never
/// mutated afterwards; workers share it through an `Arc`.
#[derive(Debug, Default)]
pub struct TagMap {
    entries: HashMap<String, Tag>,
}

impl TagMap {
    pub fn from_rows(rows: Vec<Tagged_Address>) -> TagMap {
        let entries = rows
            .into_iter()
            .filter_map(|row| {
                let address = normalize_address(&row.address)?;
                let category = Category::normalize(&row.category);
                let label = row
                    .label
                    .filter(|label| !label.trim().is_empty())
                    .unwrap_or_else(|| category.as_str().to_owned());

                Some((address, Tag { category, label }))
            })
            .collect();

        TagMap { entries }
    }

    pub fn resolve(&self, address: &str) -> Option<&Tag> {
        self.entries.get(&normalize_address(address)?)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn classify(
        &self,
        transfer: RawTransfer,
        ingestion_time: DateTime<Utc>,
    ) -> Categorized_Transfer {
        let sender = self.resolve(&transfer.sender);
        let receiver = self.resolve(&transfer.receiver);

        Categorized_Transfer {
            timestamp: transfer.timestamp,
            chain: transfer.chain.to_string(),
            token_symbol: transfer.token_symbol,
            token_address: transfer.token_address,
            tx_hash: transfer.tx_hash,
            category_sender: sender.map(|tag| tag.category.to_string()),
            label_sender: sender.map(|tag| tag.label.clone()),
            category_receiver: receiver.map(|tag| tag.category.to_string()),
            label_receiver: receiver.map(|tag| tag.label.clone()),
            from_address: transfer.sender,
            to_address: transfer.receiver,
            amount: transfer.value,
            ingestion_time,
        }
    }
}

fn normalize_address(address: &str) -> Option<String> {
    let address = address.trim();
    if address.is_empty() {
        return None;
    }

    Some(address.to_lowercase())
}

/// Loads the tag table for `chain`. Failure is fatal for the run.
pub async fn load(
    database: &DatabasePool,
    chain: Chain,
) -> Result<Arc<TagMap>, Error> {
    let rows = database
        .tagged_address
        .get_by_chain(chain.as_str())
        .await
        .map_err(|e| Error::TagMapLoad {
            chain: chain.to_string(),
            reason: e.to_string(),
        })?;

    let tags = TagMap::from_rows(rows);
    if tags.is_empty() {
        warn!(chain = %chain, "no address tags, every transfer stays untagged");
    } else {
        info!(chain = %chain, count = tags.len(), "loaded address tags");
    }

    Ok(Arc::new(tags))
}
