use anyhow::{bail, Context as _, Result};
use serde::Serialize;

use cipher_chat::key_vault::{export_public as encode_public, import_public};
use cipher_chat::{AuthBundle, Error, Provisioning, UserId};

use super::Context;
use crate::output::Output;

#[derive(Serialize)]
struct IdentityResult {
    generated: bool,
    public_key: String,
    fingerprint: String,
}

#[derive(Serialize)]
struct WhoamiResult {
    data_dir: String,
    logged_in: bool,
    user_id: Option<String>,
    username: Option<String>,
    has_private_key: bool,
    fingerprint: Option<String>,
    /// Whether the registered public key belongs to this device's private key.
    registered_key_matches: Option<bool>,
}

/// Generate the device identity unless one exists.
pub async fn init(ctx: &Context, output: &Output) -> Result<()> {
    if !ctx.config.path.exists() {
        ctx.config.save()?;
    }

    if ctx.vault.has_private_key()? {
        let public = ctx.vault.public_key()?;
        output.success(
            "init",
            IdentityResult {
                generated: false,
                public_key: encode_public(&public)?,
                fingerprint: public.fingerprint()?,
            },
        );
        return Ok(());
    }

    let mut auth = ctx.device.auth()?;
    let registered = auth.as_ref().and_then(|a| a.public_key.clone());
    let public_key = match ctx.vault.provision(registered.as_deref()) {
        Ok(Provisioning::Generated { public_key }) => public_key,
        Ok(Provisioning::Ready) => encode_public(&ctx.vault.public_key()?)?,
        Err(Error::PrivateKeyLost) => bail!(
            "this account has a registered public key but this device has no private key; \
             log out and register a new key"
        ),
        Err(e) => return Err(e.into()),
    };

    if let Some(auth) = auth.as_mut() {
        auth.public_key = Some(public_key.clone());
        ctx.device.save_auth(auth)?;
    }

    output.success(
        "init",
        IdentityResult {
            generated: true,
            fingerprint: ctx.vault.public_key()?.fingerprint()?,
            public_key,
        },
    );
    Ok(())
}

pub async fn login(
    ctx: &Context,
    token: String,
    user_id: &str,
    username: String,
    public_key: Option<String>,
    output: &Output,
) -> Result<()> {
    if token.trim().is_empty() {
        bail!("token must not be empty");
    }
    if let Some(encoded) = &public_key {
        import_public(encoded).context("invalid public key")?;
    }

    let auth = AuthBundle {
        token,
        user_id: UserId::new(user_id),
        username,
        public_key,
    };
    ctx.device.save_auth(&auth)?;
    tracing::info!(user_id = %auth.user_id, "stored login");

    if auth.public_key.is_some() && !ctx.vault.has_private_key()? {
        tracing::warn!("registered public key has no private key on this device");
    }

    output.success_message("login", &format!("Logged in as {}", auth.username));
    Ok(())
}

pub async fn whoami(ctx: &Context, output: &Output) -> Result<()> {
    let auth = ctx.device.auth()?;
    let has_private_key = ctx.vault.has_private_key()?;
    let device_public = if has_private_key {
        Some(ctx.vault.public_key()?)
    } else {
        None
    };

    let registered_key_matches = match (
        auth.as_ref().and_then(|a| a.public_key.as_deref()),
        &device_public,
    ) {
        (Some(registered), Some(device)) => Some(import_public(registered)? == *device),
        (Some(_), None) => Some(false),
        (None, _) => None,
    };

    output.success(
        "whoami",
        WhoamiResult {
            data_dir: ctx.data_dir.display().to_string(),
            logged_in: auth.is_some(),
            user_id: auth.as_ref().map(|a| a.user_id.to_string()),
            username: auth.as_ref().map(|a| a.username.clone()),
            has_private_key,
            fingerprint: device_public.map(|k| k.fingerprint()).transpose()?,
            registered_key_matches,
        },
    );
    Ok(())
}

pub async fn export_public(ctx: &Context, output: &Output) -> Result<()> {
    let public = ctx
        .vault
        .public_key()
        .context("no device key, run `chat-keys init` first")?;
    output.success(
        "export-public",
        serde_json::json!({ "publicKey": encode_public(&public)? }),
    );
    Ok(())
}

pub async fn fingerprint(ctx: &Context, output: &Output) -> Result<()> {
    let public = ctx
        .vault
        .public_key()
        .context("no device key, run `chat-keys init` first")?;
    output.success(
        "fingerprint",
        serde_json::json!({ "fingerprint": public.fingerprint()? }),
    );
    Ok(())
}

pub async fn logout(ctx: &Context, output: &Output) -> Result<()> {
    ctx.device.clear_auth()?;
    output.success_message("logout", "Logged out; the device key was kept");
    Ok(())
}

pub async fn forget_key(ctx: &Context, yes: bool, output: &Output) -> Result<()> {
    if !yes {
        bail!("refusing to delete the device key without --yes");
    }
    ctx.vault.forget()?;
    output.success_message("forget-key", "Device private key deleted");
    Ok(())
}
