use anyhow::Result;
use cliclack::{input, intro, outro, spinner};
use console::style;
use relay::peer::PeerClient;

use super::{card, send};

pub async fn run(client: &PeerClient, url: &str) -> Result<()> {
    let agent = client.resolve_card(url).await?;
    intro(format!("relay session with {}", agent.name))?;
    card::render(&agent);
    println!(
        "\n{}",
        style("type \"exit\" to end the session, \"new\" to start a fresh conversation").dim()
    );

    let mut context: Option<String> = None;
    loop {
        let text: String = input("Message:").placeholder("").interact()?;
        match text.trim() {
            "exit" => break,
            "new" => {
                context = None;
                continue;
            }
            "" => continue,
            _ => {}
        }

        let spin = spinner();
        spin.start("awaiting reply");
        let result = send::send(client, &agent, url, context.as_deref(), &text).await;
        spin.stop("");

        match result {
            Ok(reply) => {
                send::render(&reply);
                // Keep the conversation so follow-ups resume a waiting task
                if reply.context_id.is_some() {
                    context = reply.context_id;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "send failed");
                println!("{} {:#}", style("error:").red().bold(), e);
            }
        }
        println!();
    }

    outro("bye")?;
    Ok(())
}
