//! Echo service: answers every command on the command stream with an event of
//! the same action and payload, until SIGINT/SIGTERM.

use commander_events::Command;
use commander_infra::event_bus::{RedisStreamsBroker, RedisStreamsConfig};
use commander_infra::{Commander, CommanderConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    commander_observability::init();

    let config = CommanderConfig::from_env()?;
    let broker = RedisStreamsBroker::new(RedisStreamsConfig::from_env())?;
    let commander = Commander::connect(broker, config).await?;

    let replier = commander.clone();
    commander.new_commands_handle(move |command: Command| {
        let replier = replier.clone();
        async move {
            let event = command.new_event(command.action(), 1, command.data().to_vec());
            if let Err(e) = replier.produce_event(&event).await {
                tracing::warn!(error = %e, parent = %command.id(), "echo reply failed");
            }
        }
    });

    tracing::info!(
        commands = %commander.config().command_stream,
        events = %commander.config().event_stream,
        "echo service running"
    );

    commander.close_on_signal().await?;
    Ok(())
}
