//! Posts a link together with its link card.

use nanoatp::{BskyAgent, Embed, FacetFeature, Result, RichText};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let agent = BskyAgent::from_env()?;
    agent.login("", "").await?;

    let mut rt = RichText::new("Hello @nanoatp.bsky.social, check out this link: https://huggingface.co/");
    rt.detect_facets(&agent).await?;

    let Some(uri) = rt.facets().iter().find_map(|facet| match facet.features.first() {
        Some(FacetFeature::Link { uri }) => Some(uri.clone()),
        _ => None,
    }) else {
        println!("⚠️  No link detected, nothing to post");
        return Ok(());
    };

    let external = agent.upload_external(&uri).await?;
    println!(
        "🔗 {} (thumb: {})",
        external.title,
        if external.thumb.is_some() { "yes" } else { "no" }
    );

    let post = agent
        .post(rt.into_record().with_embed(Embed::external(external)))
        .await?;
    println!("✅ Posted {}", post.uri);

    Ok(())
}
