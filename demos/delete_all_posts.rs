//! Deletes every post of the account, oldest first.
//!
//! THIS IS DESTRUCTIVE. It only runs with `ATP_CONFIRM_DELETE_ALL=yes`.

use nanoatp::record::POST_COLLECTION;
use nanoatp::utils::truncate_text;
use nanoatp::{AtpError, BskyAgent, ListRecordsParams, Result};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if std::env::var("ATP_CONFIRM_DELETE_ALL").as_deref() != Ok("yes") {
        return Err(AtpError::config_error(
            "refusing to delete posts: set ATP_CONFIRM_DELETE_ALL=yes",
        ));
    }

    let agent = BskyAgent::from_env()?;
    let session = agent.login("", "").await?;

    // Newest first, page by page
    let mut records = Vec::new();
    let mut params = ListRecordsParams::default().with_limit(10);
    loop {
        let page = agent
            .list_records(&session.did, POST_COLLECTION, &params)
            .await?;
        println!("{:?} {}", page.cursor, page.records.len());
        records.extend(page.records);

        match page.cursor {
            Some(cursor) if !cursor.is_empty() => params = params.with_cursor(cursor),
            _ => break,
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    records.reverse();

    for record in records {
        let text = record.value["text"].as_str().unwrap_or_default().replace('\n', " ");
        println!("🗑️  deleting... {}", truncate_text(&text, 40));
        agent.delete_post(&record.uri).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    println!("✅ Done");
    Ok(())
}
