//! Discord gateway session: command registration and event fan-out
//!
//! Every event is handed to the [`Dispatcher`] on its own task so a slow
//! handler never holds up the shard.

use anyhow::{Context as _, Result};
use serenity::all::{
    Command, CommandOptionType, CreateCommand, CreateCommandOption, GatewayIntents, Interaction,
    Ready,
};
use serenity::client::{Client, Context, EventHandler};
use serenity::http::Http;
use serenity::model::channel::Message;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::audit::{command_specs, CommandOptionKind, CommandSpec};
use crate::config::KadrovikConfig;
use crate::dispatch::Dispatcher;
use crate::platform::discord::{
    command_interaction, component_interaction, incoming_message, modal_interaction,
    DiscordPlatform,
};
use crate::platform::{GuildId, UserId};
use crate::shutdown::ShutdownCoordinator;

fn create_command(spec: &CommandSpec) -> CreateCommand {
    let mut command = CreateCommand::new(spec.name).description(spec.description);
    for option in &spec.options {
        let kind = match option.kind {
            CommandOptionKind::User => CommandOptionType::User,
            CommandOptionKind::String => CommandOptionType::String,
            CommandOptionKind::Integer { .. } => CommandOptionType::Integer,
            CommandOptionKind::Role => CommandOptionType::Role,
        };
        let mut created = CreateCommandOption::new(kind, option.name, option.description)
            .required(option.required);
        if let CommandOptionKind::Integer { min, max } = option.kind {
            created = created.min_int_value(min as u64).max_int_value(max as u64);
        }
        for (label, value) in &option.choices {
            created = created.add_string_choice(*label, *value);
        }
        command = command.add_option(created);
    }
    command
}

/// Register the audit commands; guild-scoped when a guild is configured
pub async fn register_commands(http: &Http, guild: Option<GuildId>) -> Result<()> {
    let commands: Vec<CreateCommand> = command_specs().iter().map(create_command).collect();
    let count = commands.len();
    match guild {
        Some(guild) => {
            serenity::model::id::GuildId::new(guild.get())
                .set_commands(http, commands)
                .await
                .context("registering guild commands")?;
            // Stale global copies would show every command twice
            Command::set_global_commands(http, Vec::new())
                .await
                .context("clearing global commands")?;
            info!(guild_id = %guild, count, "Registered guild commands");
        }
        None => {
            Command::set_global_commands(http, commands)
                .await
                .context("registering global commands")?;
            info!(count, "Registered global commands");
        }
    }
    Ok(())
}

pub struct Handler {
    dispatcher: Arc<Dispatcher>,
    platform: Arc<DiscordPlatform>,
    guild: Option<GuildId>,
}

impl Handler {
    pub fn new(dispatcher: Arc<Dispatcher>, platform: Arc<DiscordPlatform>, guild: Option<GuildId>) -> Self {
        Self {
            dispatcher,
            platform,
            guild,
        }
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "Gateway session ready");
        self.platform.set_bot_user(UserId(ready.user.id.get()));

        if let Err(e) = register_commands(&ctx.http, self.guild).await {
            error!(error = %e, "Failed to register slash commands");
        }
        for (kind, outcome) in self.dispatcher.ensure_setup_messages().await {
            info!(workflow = %kind, outcome = ?outcome, "Setup message ensured");
        }
    }

    async fn interaction_create(&self, _ctx: Context, interaction: Interaction) {
        let converted = match &interaction {
            Interaction::Component(component) => component_interaction(component),
            Interaction::Modal(modal) => modal_interaction(modal),
            Interaction::Command(command) => command_interaction(command),
            _ => return,
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            dispatcher.handle_interaction(converted).await;
        });
    }

    async fn message(&self, _ctx: Context, message: Message) {
        if message.author.bot || message.guild_id.is_none() {
            return;
        }
        self.dispatcher.handle_message(incoming_message(&message));
    }
}

/// Connect to Discord and serve until a shutdown signal arrives
pub async fn run(config: KadrovikConfig) -> Result<()> {
    config.validate_for_run()?;
    let token = config.discord.token.clone().unwrap_or_default();
    let guild = config.discord.guild_id;

    let http = Arc::new(Http::new(&token));
    if let Some(application_id) = config.discord.application_id {
        http.set_application_id(serenity::model::id::ApplicationId::new(application_id));
    }
    let platform = Arc::new(DiscordPlatform::new(Arc::clone(&http))?);
    let dispatcher = Arc::new(Dispatcher::new(platform.clone(), Arc::new(config)));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(&token, intents)
        .event_handler(Handler::new(dispatcher, platform, guild))
        .await
        .context("building Discord client")?;

    let shard_manager = Arc::clone(&client.shard_manager);
    let coordinator = ShutdownCoordinator::default();

    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                warn!(error = %e, "Gateway client stopped");
                return Err(e).context("running Discord client");
            }
        }
        result = coordinator.wait_for_signal() => {
            result?;
            coordinator.shutdown(async move { shard_manager.shutdown_all().await }).await?;
        }
    }
    Ok(())
}

