//! Command handlers.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, bail};
use forwardemail_core::resolve::{GENERIC_API_KEY_ENV, PromptFn, profile_env_var};
use forwardemail_core::{
    AuthProvider, Config, Credential, CredentialError, CredentialSource, EnvSource,
    ForwardEmailError, ProcessEnv, Profile, ProviderConfig, Secret, SecretStore, StoreSettings,
    create_store,
};
use serde_json::json;
use tracing::{debug, info};

/// Loaded state shared by all commands.
pub struct Context {
    /// Where the configuration is read from and written back to.
    pub config_path: PathBuf,
    pub config: Config,
    /// Profile the command operates on.
    pub profile: String,
    pub store: Arc<dyn SecretStore>,
    pub env: Arc<dyn EnvSource>,
}

impl Context {
    /// Load the configuration and open the secure store.
    pub fn load(
        config_path: Option<PathBuf>,
        profile: Option<String>,
    ) -> Result<Self, ForwardEmailError> {
        let config_path = match config_path {
            Some(path) => path,
            None => Config::default_path()?,
        };
        let config = Config::load_from_path(&config_path)?;
        let profile = profile.unwrap_or_else(|| config.current_profile.clone());

        let env: Arc<dyn EnvSource> = Arc::new(ProcessEnv);
        let store = create_store(&StoreSettings::from_env(Arc::clone(&env)));

        Ok(Self {
            config_path,
            config,
            profile,
            store,
            env,
        })
    }

    /// Write the configuration back to disk.
    pub fn save(&self) -> Result<(), ForwardEmailError> {
        self.config.save_to_path(&self.config_path)?;
        Ok(())
    }

    /// Auth provider for the active profile.
    pub fn provider(&self) -> AuthProvider {
        AuthProvider::new(ProviderConfig {
            profile: self.profile.clone(),
            config: Arc::new(self.config.clone()),
            store: Arc::clone(&self.store),
            env: Arc::clone(&self.env),
        })
    }

    /// Environment variable that currently overrides stored keys, if any.
    fn env_override(&self) -> Option<String> {
        [profile_env_var(&self.profile), GENERIC_API_KEY_ENV.to_string()]
            .into_iter()
            .find(|name| self.env.var(name).is_some_and(|v| !v.is_empty()))
    }
}

/// Read the API key from stdin, prompting when attached to a terminal.
fn read_key_from_stdin(profile: &str) -> anyhow::Result<Secret> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("API key for profile '{}': ", profile);
        io::stderr().flush().ok();
    }

    let mut line = String::new();
    stdin
        .lock()
        .read_line(&mut line)
        .context("Failed to read API key from stdin")?;
    let key = Secret::new(line.trim());

    if key.is_empty() {
        bail!("No API key given on stdin");
    }
    Ok(key)
}

/// Prompt used as the last credential source when stdin is a terminal.
fn terminal_prompt() -> Option<PromptFn> {
    if !io::stdin().is_terminal() {
        return None;
    }
    let prompt: PromptFn = Arc::new(|profile: &str| read_key_from_stdin(profile).ok());
    Some(prompt)
}

pub async fn auth_login(ctx: &mut Context, inline: bool, verify: bool) -> anyhow::Result<()> {
    let key = read_key_from_stdin(&ctx.profile)?;

    if !ctx.config.profiles.contains_key(&ctx.profile) {
        info!("Creating profile '{}'", ctx.profile);
        ctx.config.upsert_profile(ctx.profile.clone(), Profile::default());
    }

    if verify {
        // Check exactly the key that was typed, ignoring every other source.
        let typed = Credential {
            secret: key.clone(),
            source: CredentialSource::Interactive,
        };
        ctx.provider()
            .validate_with(&typed)
            .await
            .map_err(ForwardEmailError::from)
            .context("API key was not accepted")?;
    }

    if inline {
        ctx.config
            .set_inline_api_key(&ctx.profile, key)
            .map_err(ForwardEmailError::from)?;
        ctx.save().context("Failed to save configuration")?;
        println!(
            "Stored API key for profile '{}' in {}",
            ctx.profile,
            ctx.config_path.display()
        );
    } else {
        ctx.store
            .set(&ctx.profile, &key)
            .await
            .map_err(ForwardEmailError::from)
            .with_context(|| {
                format!(
                    "Failed to store API key in the {} store (use --store config to keep it in the config file)",
                    ctx.store.backend_name()
                )
            })?;
        // Persist a newly created profile.
        ctx.save().context("Failed to save configuration")?;
        println!(
            "Stored API key for profile '{}' in the {} store",
            ctx.profile,
            ctx.store.backend_name()
        );
    }

    if let Some(var) = ctx.env_override() {
        println!("Note: {} is set and takes precedence over the stored key", var);
    }
    Ok(())
}

pub async fn auth_logout(ctx: &mut Context) -> anyhow::Result<()> {
    let mut removed = false;

    match ctx.store.delete(&ctx.profile).await {
        Ok(()) => {
            removed = true;
            println!(
                "Removed API key for profile '{}' from the {} store",
                ctx.profile,
                ctx.store.backend_name()
            );
        }
        Err(e) if e.is_not_found() => debug!("No stored key for profile '{}'", ctx.profile),
        Err(e) if e.is_unavailable() => debug!("Secure store unavailable: {}", e),
        Err(e) => {
            return Err(ForwardEmailError::from(e)).context("Failed to remove stored API key");
        }
    }

    if ctx.config.profiles.contains_key(&ctx.profile)
        && ctx
            .config
            .clear_inline_api_key(&ctx.profile)
            .map_err(ForwardEmailError::from)?
    {
        ctx.save().context("Failed to save configuration")?;
        removed = true;
        println!(
            "Removed API key for profile '{}' from {}",
            ctx.profile,
            ctx.config_path.display()
        );
    }

    if !removed {
        println!("No stored API key for profile '{}'", ctx.profile);
    }
    if let Some(var) = ctx.env_override() {
        println!("Note: {} is still set in the environment", var);
    }
    Ok(())
}

pub async fn auth_status(ctx: &Context) -> anyhow::Result<()> {
    println!("Profile: {}", ctx.profile);
    match ctx.config.profile(&ctx.profile) {
        Ok(profile) => println!("Base URL: {}", profile.base_url),
        Err(_) => println!("Base URL: (profile not configured)"),
    }
    println!("Secure store: {}", ctx.store.backend_name());

    match ctx.provider().get_api_key().await {
        Ok(credential) => {
            println!("API key: configured (from {})", credential.source);
            Ok(())
        }
        Err(CredentialError::NotFound { env_var, generic, .. }) => {
            println!("API key: not configured");
            println!(
                "Set {} or {}, or run `forward-email auth login`",
                env_var, generic
            );
            Ok(())
        }
        Err(e) => Err(ForwardEmailError::from(e).into()),
    }
}

pub async fn auth_verify(ctx: &Context) -> anyhow::Result<()> {
    let mut provider = ctx.provider();
    if let Some(prompt) = terminal_prompt() {
        provider = provider.with_prompt(prompt);
    }

    let credential = provider
        .get_api_key()
        .await
        .map_err(ForwardEmailError::from)?;
    provider
        .validate_with(&credential)
        .await
        .map_err(ForwardEmailError::from)
        .with_context(|| format!("Failed to verify API key for profile '{}'", ctx.profile))?;

    println!(
        "API key for profile '{}' is valid (from {})",
        ctx.profile, credential.source
    );
    Ok(())
}

pub async fn auth_list(ctx: &Context) -> anyhow::Result<()> {
    let stored = ctx
        .store
        .list()
        .await
        .map_err(ForwardEmailError::from)
        .context("Failed to list stored API keys")?;
    let inline: Vec<&str> = ctx
        .config
        .profiles
        .iter()
        .filter(|(_, profile)| profile.inline_api_key().is_some())
        .map(|(name, _)| name.as_str())
        .collect();

    if stored.is_empty() && inline.is_empty() {
        println!("No stored API keys");
        return Ok(());
    }
    for name in &stored {
        println!("{} ({})", name, ctx.store.backend_name());
    }
    for name in inline {
        println!("{} (config file)", name);
    }
    Ok(())
}

pub fn profile_list(ctx: &Context) -> anyhow::Result<()> {
    for name in ctx.config.profiles.keys() {
        let marker = if *name == ctx.config.current_profile {
            "*"
        } else {
            " "
        };
        println!("{} {}", marker, name);
    }
    Ok(())
}

pub fn profile_show(ctx: &Context, name: Option<&str>) -> anyhow::Result<()> {
    let name = name.unwrap_or(&ctx.profile);
    let profile = ctx
        .config
        .profile(name)
        .map_err(ForwardEmailError::from)?;

    let view = json!({
        "name": name,
        "current": name == ctx.config.current_profile,
        "base_url": profile.base_url,
        "timeout_secs": profile.timeout_secs,
        "output": profile.output,
        "inline_api_key": profile.inline_api_key().is_some(),
    });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

pub fn profile_use(ctx: &mut Context, name: &str) -> anyhow::Result<()> {
    ctx.config
        .set_current(name)
        .map_err(ForwardEmailError::from)
        .with_context(|| format!("Failed to switch to profile '{}'", name))?;
    ctx.save().context("Failed to save configuration")?;
    println!("Now using profile '{}'", name);
    Ok(())
}
