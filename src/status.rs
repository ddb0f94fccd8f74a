//! `relay status`: print the record store as a table.

use anyhow::Result;

use crate::config::Config;
use crate::models::{DocumentRecord, RecordMap};
use crate::records;

pub async fn print_status(config: &Config) -> Result<()> {
    let store = records::open(config).await?;
    let records = store.load().await?;

    println!("records: {}", store.describe());
    print_table(&records);
    Ok(())
}

fn print_table(records: &RecordMap) {
    if records.is_empty() {
        println!("(no documents)");
        return;
    }

    println!("{:<40} {:<10} {:<28} SYNCED AT", "DOCUMENT", "STATE", "INDEXED OBJECT");
    for (name, record) in records {
        let synced_at = record
            .synced_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:<10} {:<28} {}",
            name,
            state_label(record),
            record.indexed_object_id.as_deref().unwrap_or("-"),
            synced_at
        );
    }

    let indexed = records.values().filter(|r| r.is_indexed()).count();
    println!();
    println!("{} documents, {} indexed", records.len(), indexed);
}

fn state_label(record: &DocumentRecord) -> &'static str {
    match (record.is_indexed(), record.is_pending()) {
        (true, false) => "indexed",
        (true, true) => "stale",
        (false, _) => "pending",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_labels() {
        let mut record = DocumentRecord {
            observed_revision: Some("r1".into()),
            ..Default::default()
        };
        assert_eq!(state_label(&record), "pending");

        record.indexed_object_id = Some("file-1".into());
        assert_eq!(state_label(&record), "stale");

        record.synced_revision = Some("r1".into());
        assert_eq!(state_label(&record), "indexed");
    }
}
