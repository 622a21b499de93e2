use std::{collections::HashMap, fs, path::Path, str::FromStr};

use tracing::{info, warn};

use crate::{
    error::Error,
    helpers::{Category, Chain},
    model::Tagged_Address,
    provider::DatabasePool,
};

/// Reads a JSON list of tags, normalizes it and upserts it into the tag
/// table. Returns the number of rows inserted or refreshed.
pub async fn import_file(
    database: &DatabasePool,
    path: &Path,
) -> Result<u64, Error> {
    let content = fs::read_to_string(path)?;
    let rows: Vec<Tagged_Address> = serde_json::from_str(&content)?;
    let total = rows.len();

    let tags = normalize(rows);
    if tags.len() < total {
        warn!(
            dropped = total - tags.len(),
            "ignored invalid or repeated tag entries"
        );
    }

    let affected = database.tagged_address.upsert_many(&tags).await?;
    info!(file = %path.display(), affected, "imported address tags");

    Ok(affected)
}

/// Lower-cases addresses, folds categories into the closed set, fills in
/// missing labels and keeps the last entry per (address, chain).
pub fn normalize(rows: Vec<Tagged_Address>) -> Vec<Tagged_Address> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut tags: HashMap<(String, String), Tagged_Address> = HashMap::new();

    for row in rows {
        let Ok(chain) = Chain::from_str(&row.chain) else {
            warn!(chain = %row.chain, "unknown chain in tag entry");
            continue;
        };
        let address = row.address.trim().to_lowercase();
        if address.is_empty() {
            continue;
        }

        let category = Category::normalize(&row.category);
        let label = row
            .label
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| category.as_str().to_owned());

        let key = (address.clone(), chain.to_string());
        if !tags.contains_key(&key) {
            order.push(key.clone());
        }

        tags.insert(
            key,
            Tagged_Address {
                address,
                chain: chain.to_string(),
                category: category.to_string(),
                label: Some(label),
                source: row.source,
            },
        );
    }

    order
        .into_iter()
        .filter_map(|key| tags.remove(&key))
        .collect()
}
