//! Posts text with a resolved mention and a link.

use nanoatp::{BskyAgent, Result, RichText};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let agent = BskyAgent::from_env()?;
    agent.login("", "").await?;

    let mut rt = RichText::new("Hello @nanoatp.bsky.social, check out this link: https://example.com");
    rt.detect_facets(&agent).await?;

    for facet in rt.facets() {
        println!("{:?} -> {:?}", &rt.text()[facet.index.range()], facet.features);
    }

    let post = agent.post(rt.into_record()).await?;
    println!("✅ Posted {}", post.uri);

    Ok(())
}
