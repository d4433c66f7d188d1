//! Publishes a single post. Credentials come from `ATP_IDENTIFIER` and `ATP_PASSWORD`.

use nanoatp::{BskyAgent, PostRecord, Result};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let agent = BskyAgent::from_env()?;
    let session = agent.login("", "").await?;
    println!("Logged in as {} ({})", session.handle, session.did);

    let post = agent.post(PostRecord::new("Hello World!")).await?;
    println!("✅ Posted {} (cid {})", post.uri, post.cid);

    Ok(())
}
