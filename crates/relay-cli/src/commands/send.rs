use anyhow::Result;
use console::style;
use relay::models::card::AgentCard;
use relay::peer::PeerClient;
use relay::protocol::WireMessage;
use relay::task::TaskState;

use crate::reply::Reply;

/// Send `text` to the agent, continuing `context` when given
pub async fn send(
    client: &PeerClient,
    card: &AgentCard,
    url: &str,
    context: Option<&str>,
    text: &str,
) -> Result<Reply> {
    let mut message = WireMessage::user(text);
    if let Some(context) = context {
        message = message.with_context(context);
    }
    let body = client.send_message(card, url, message).await?;
    Ok(Reply::from_body(&card.name, &body))
}

pub fn render(reply: &Reply) {
    match reply.state {
        Some(TaskState::Failed) => println!("{} {}", style("failed:").red().bold(), reply.text),
        Some(TaskState::InputRequired) => {
            println!("{} {}", style("needs input:").yellow().bold(), reply.text)
        }
        _ => println!("{}", reply.text),
    }
}

pub async fn run(client: &PeerClient, url: &str, context: Option<String>, text: &str) -> Result<()> {
    let card = client.resolve_card(url).await?;
    let reply = send(client, &card, url, context.as_deref(), text).await?;
    render(&reply);

    if let Some(context_id) = &reply.context_id {
        if reply.needs_input() {
            println!(
                "{}",
                style(format!("answer with: relay send --url {} --context {} <text>", url, context_id)).dim()
            );
        }
    }
    Ok(())
}
