use anyhow::Result;
use console::style;
use relay::models::card::AgentCard;
use relay::peer::PeerClient;

pub fn render(card: &AgentCard) {
    println!("{} {}", style(&card.name).bold(), style(&card.version).dim());
    if !card.description.is_empty() {
        println!("{}", card.description);
    }
    println!("{} {}", style("endpoint:").dim(), card.url);
    println!(
        "{} {}",
        style("streaming:").dim(),
        card.capabilities.streaming
    );

    if card.skills.is_empty() {
        return;
    }
    println!("\n{}", style("Skills").bold());
    for skill in &card.skills {
        print!("  {} {}", style(&skill.id).cyan(), skill.name);
        if !skill.tags.is_empty() {
            print!(" {}", style(format!("[{}]", skill.tags.join(", "))).dim());
        }
        println!();
        if !skill.description.is_empty() {
            println!("    {}", skill.description);
        }
    }
}

pub async fn run(client: &PeerClient, url: &str) -> Result<()> {
    let card = client.resolve_card(url).await?;
    render(&card);
    Ok(())
}
