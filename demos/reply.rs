//! Builds a small thread, moving the root and parent references between replies.

use nanoatp::{BskyAgent, PostRecord, ReplyRef, Result};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let agent = BskyAgent::from_env()?;
    agent.login("", "").await?;

    let first = agent.post(PostRecord::new("Hello World!")).await?;
    println!("📝 {}", first.uri);
    let mut root = first.clone();
    let mut parent = first;

    // (text, move parent to the previous post, move root to the previous post)
    let steps = [
        ("Reply 1", false, false),
        ("Reply 2", true, false),
        ("Reply 3", true, true),
        ("Reply 4", false, false),
    ];

    let mut previous = parent.clone();
    for (text, move_parent, move_root) in steps {
        tokio::time::sleep(Duration::from_secs(1)).await;

        if move_parent {
            parent = previous.clone();
        }
        if move_root {
            root = previous.clone();
        }

        let record = PostRecord::new(text).with_reply(ReplyRef::new(root.clone(), parent.clone()));
        previous = agent.post(record).await?;
        println!("↳ {text}: {}", previous.uri);
    }

    Ok(())
}
