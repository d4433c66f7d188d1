//! Downloads a favicon, uploads it four times from a local file and posts all four.

use nanoatp::{BskyAgent, Embed, PostRecord, Result};
use std::io::Write;

const IMAGE_URL: &str = "https://bsky.app/static/favicon-16x16.png";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let agent = BskyAgent::from_env()?;
    agent.login("", "").await?;

    let download = agent.fetch_blob(IMAGE_URL).await?;
    println!("📥 Downloaded {} bytes", download.data.len());

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("favicon-16x16.png");
    std::fs::File::create(&path)?.write_all(&download.data)?;

    let mut images = Vec::new();
    for i in 0..4 {
        images.push(agent.upload_image(&path, &format!("this is alt {i}"), None).await?);
    }

    let post = agent
        .post(PostRecord::new("upload images").with_embed(Embed::images(images)))
        .await?;
    println!("✅ Posted {}", post.uri);

    Ok(())
}
