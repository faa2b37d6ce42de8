//! # Bot Module
//!
//! Discord side of the jukebox: slash command registration and dispatch,
//! voice connections per guild, and leaving channels once everyone else has
//! left.
//!
//! Song resolution lives in [`crate::sources`]; playback and queues in
//! [`crate::audio`].

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{audio::player::AudioPlayer, config::Config, sources::YtDlp};

/// Serenity event handler holding all bot state.
pub struct JukeboxBot {
    config: Arc<Config>,
    /// Shared by every resolver created for `/play` and by the player.
    extractor: Arc<YtDlp>,
    pub player: AudioPlayer,
    voice_handlers: DashMap<GuildId, Arc<tokio::sync::Mutex<songbird::Call>>>,
}

impl JukeboxBot {
    pub fn new(config: Config) -> Self {
        let extractor = Arc::new(YtDlp::new(config.ytdlp_path.clone()));
        let player = AudioPlayer::new(
            extractor.clone(),
            config.max_queue_size,
            config.default_volume,
        );

        Self {
            config: Arc::new(config),
            extractor,
            player,
            voice_handlers: DashMap::new(),
        }
    }

    /// Registers slash commands on the configured guild, or globally when no
    /// guild is set.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica el permiso 'applications.commands'.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica el permiso 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Joins `channel_id` and remembers the call for later playback.
    pub async fn join_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<tokio::sync::Mutex<songbird::Call>>> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        match manager.join(guild_id, channel_id).await {
            Ok(call) => {
                self.voice_handlers.insert(guild_id, call.clone());
                info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
                Ok(call)
            }
            Err(e) => {
                error!("Error al obtener handler de voz: {:?}", e);
                Err(anyhow::anyhow!("Error al conectar al canal de voz"))
            }
        }
    }

    pub async fn leave_voice_channel(&self, ctx: &Context, guild_id: GuildId) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        self.voice_handlers.remove(&guild_id);
        manager.remove(guild_id).await?;

        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }

    pub fn get_voice_handler(
        &self,
        guild_id: GuildId,
    ) -> Option<Arc<tokio::sync::Mutex<songbird::Call>>> {
        self.voice_handlers.get(&guild_id).map(|h| h.clone())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Cleans up after the bot is disconnected and leaves when it is the only
    /// member left in its channel.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        let current_user_id = ctx.cache.current_user().id;
        if new.user_id == current_user_id {
            if old.is_some() && new.channel_id.is_none() {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                self.voice_handlers.remove(&guild_id);
                self.player.stop(guild_id);
            }
            return;
        }

        let Some(handler) = self.get_voice_handler(guild_id) else {
            return;
        };
        let Some(channel) = handler.lock().await.current_channel() else {
            return;
        };
        let channel_id = ChannelId::new(channel.0.get());

        let members = ctx
            .cache
            .guild(guild_id)
            .map(|guild| {
                guild
                    .voice_states
                    .values()
                    .filter(|state| state.channel_id == Some(channel_id))
                    .count()
            })
            .unwrap_or(0);

        if members <= 1 {
            info!("🚪 Solo en el canal de voz, saliendo de guild {}", guild_id);
            self.player.stop(guild_id);
            if let Err(e) = self.leave_voice_channel(&ctx, guild_id).await {
                error!("Error al salir del canal de voz: {:?}", e);
            }
        }
    }
}
