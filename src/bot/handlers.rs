use anyhow::Result;
use futures::StreamExt;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{error, info, warn};

use crate::{
    bot::JukeboxBot,
    sources::{ResolveError, SongResolver},
};

/// Dispatches a slash command by name.
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "pause" => handle_pause(ctx, &command, bot, guild_id).await?,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await?,
        "stop" => handle_stop(ctx, &command, bot, guild_id).await?,
        "shuffle" => handle_shuffle(ctx, &command, bot, guild_id).await?,
        "join" => handle_join(ctx, &command, bot, guild_id).await?,
        "leave" => handle_leave(ctx, &command, bot, guild_id).await?,
        _ => respond(ctx, &command, "❌ Unknown command").await?,
    }

    Ok(())
}

/// How far a `/play` request got through the resolved songs.
#[derive(Debug)]
enum QueueOutcome {
    Queued(usize),
    QueueFull(usize),
    Failed { queued: usize, error: ResolveError },
}

impl QueueOutcome {
    fn message(&self) -> String {
        match self {
            QueueOutcome::Queued(count) => format!("➕ {} queued", songs(*count)),
            QueueOutcome::QueueFull(count) => {
                format!("⚠️ The queue is full, only {} queued", songs(*count))
            }
            QueueOutcome::Failed { queued, error } => format!(
                "❌ {} ({} queued before the error)",
                error.user_message(),
                songs(*queued)
            ),
        }
    }
}

fn songs(count: usize) -> String {
    match count {
        1 => "1 song".to_string(),
        n => format!("{} songs", n),
    }
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let song_url = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "song_url")
        .and_then(|opt| opt.value.as_str())
        .map(str::to_owned);

    // Defer, la resolución puede tardar
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let Some(channel_id) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        return edit_reply(ctx, command, "❌ You're not in the channel").await;
    };

    let handler = match bot.get_voice_handler(guild_id) {
        Some(handler) => handler,
        None => bot.join_voice_channel(ctx, guild_id, channel_id).await?,
    };

    let mut notes = Vec::new();
    match song_url {
        Some(query) => {
            let outcome = queue_songs(bot, guild_id, &query).await;
            if let QueueOutcome::Failed { .. } = outcome {
                return edit_reply(ctx, command, &outcome.message()).await;
            }
            notes.push(outcome.message());
        }
        None if bot.player.queue_len(guild_id) == 0 => {
            return edit_reply(ctx, command, "📭 No songs queued").await;
        }
        None => {}
    }

    let status = if bot.player.is_playing(guild_id).await {
        "🎶 Music already playing".to_string()
    } else if bot.player.is_paused(guild_id).await {
        bot.player.resume(guild_id).await?;
        "▶️ Music has been resumed".to_string()
    } else {
        match bot.player.play_next(guild_id, handler).await? {
            Some(song) => format!("🎵 Music played: {}", song),
            None => "❌ None of the queued songs could be played".to_string(),
        }
    };
    notes.push(status);

    edit_reply(ctx, command, &notes.join("\n")).await
}

/// Resolves `query` and pushes each song as soon as it arrives. Songs queued
/// before a failure stay queued.
async fn queue_songs(bot: &JukeboxBot, guild_id: GuildId, query: &str) -> QueueOutcome {
    let resolver = match SongResolver::from_config(bot.config.spotify(), bot.extractor.clone()) {
        Ok(resolver) => resolver,
        Err(error) => return QueueOutcome::Failed { queued: 0, error },
    };

    let mut resolved = resolver.resolve_all(query, true);
    let mut queued = 0;

    while let Some(song) = resolved.next().await {
        match song {
            Ok(song) => {
                if let Err(e) = bot.player.enqueue(guild_id, song) {
                    warn!("⚠️ {}", e);
                    return QueueOutcome::QueueFull(queued);
                }
                queued += 1;
            }
            Err(error) => {
                error!("❌ Error al resolver '{}': {}", query, error);
                return QueueOutcome::Failed { queued, error };
            }
        }
    }

    info!("➕ {} de '{}' en la cola", songs(queued), query);
    QueueOutcome::Queued(queued)
}

async fn handle_pause(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let message = if bot.get_voice_handler(guild_id).is_none() {
        "❌ No song is playing"
    } else if bot.player.is_paused(guild_id).await {
        "⏸️ Music already paused"
    } else if bot.player.pause(guild_id).await? {
        "⏸️ Music has been paused"
    } else {
        "❌ No song is playing"
    };

    respond(ctx, command, message).await
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let active = bot.player.is_playing(guild_id).await || bot.player.is_paused(guild_id).await;

    let message = if active && bot.player.skip(guild_id) {
        "⏭️ Song skipped"
    } else {
        "❌ No songs playing"
    };

    respond(ctx, command, message).await
}

async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    bot.player.stop(guild_id);
    if bot.get_voice_handler(guild_id).is_some() {
        bot.leave_voice_channel(ctx, guild_id).await?;
    }

    edit_reply(ctx, command, "⏹️ Music stopped").await
}

async fn handle_shuffle(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    bot.player.shuffle(guild_id);
    respond(ctx, command, "🔀 Songs have been shuffled").await
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(channel_id) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        return respond(ctx, command, "❌ You are not in a voice chat").await;
    };

    bot.join_voice_channel(ctx, guild_id, channel_id).await?;
    respond(ctx, command, "🔊 Bot has joined").await
}

async fn handle_leave(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    if bot.get_voice_handler(guild_id).is_none() {
        return respond(ctx, command, "❌ Bot is not in a voice chat").await;
    }

    bot.player.stop(guild_id);
    bot.leave_voice_channel(ctx, guild_id).await?;
    respond(ctx, command, "👋 Bot has left").await
}

async fn respond(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;

    Ok(())
}

async fn edit_reply(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;

    Ok(())
}

/// The voice channel the user is currently in, read from the guild cache.
fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
