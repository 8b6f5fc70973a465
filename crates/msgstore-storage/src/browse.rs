// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Caller-side filtering and paging over a listing cursor.

use msgstore_core::{MessageFilter, Metadata, MetadataCursor, Page, StoreError};

/// Applies `filter` to the rows `cursor` yields and cuts out one page.
///
/// The cursor is always closed, also when it fails half-way.
pub async fn query(
    mut cursor: MetadataCursor,
    filter: &MessageFilter,
) -> Result<Page<Metadata>, StoreError> {
    let mut items = Vec::new();
    let mut matched = 0usize;
    let mut has_more = false;

    while let Some(item) = cursor.next().await {
        let metadata = match item {
            Ok(metadata) => metadata,
            Err(e) => {
                cursor.close().await?;
                return Err(e);
            }
        };
        if !filter.matches(&metadata) {
            continue;
        }
        matched += 1;
        if matched <= filter.skip {
            continue;
        }
        if filter.max.is_some_and(|max| items.len() >= max) {
            has_more = true;
            break;
        }
        items.push(metadata);
    }
    cursor.close().await?;

    Ok(Page {
        items,
        skip: filter.skip,
        has_more,
    })
}
