//! Account and session commands.

use anyhow::Context as _;
use lusolve_client::decode_access_claims;

use crate::config::CliContext;

#[derive(clap::Args)]
pub struct LoginArgs {
    #[arg(long)]
    pub username: String,
    #[arg(long)]
    pub password: String,
}

#[derive(clap::Args)]
pub struct RegisterArgs {
    #[arg(long)]
    pub username: String,
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub password: String,
    /// Confirmation; defaults to the password itself.
    #[arg(long)]
    pub password2: Option<String>,
}

#[derive(clap::Args)]
pub struct ChangePasswordArgs {
    #[arg(long)]
    pub old_password: String,
    #[arg(long)]
    pub new_password: String,
}

pub async fn login(context: &CliContext, args: LoginArgs) -> anyhow::Result<()> {
    let pair = context
        .client
        .login(&args.username, &args.password)
        .await
        .context("login failed")?;

    let claims = decode_access_claims(&pair.access).context("decoding access token")?;
    println!(
        "logged in as {} (staff: {}), access token valid until {}",
        args.username,
        claims.is_staff,
        claims.expires_at().format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}

pub async fn register(context: &CliContext, args: RegisterArgs) -> anyhow::Result<()> {
    let password2 = args.password2.as_deref().unwrap_or(&args.password);
    context
        .client
        .register(&args.username, &args.email, &args.password, password2)
        .await
        .context("registration failed")?;
    println!("account {} created and logged in", args.username);
    Ok(())
}

pub fn logout(context: &CliContext) -> anyhow::Result<()> {
    context.client.logout().context("logout failed")?;
    println!("credentials cleared");
    Ok(())
}

pub async fn profile(context: &CliContext) -> anyhow::Result<()> {
    let profile = context.client.profile().await?;
    println!("#{} {} <{}>", profile.id, profile.username, profile.email);
    Ok(())
}

pub async fn change_password(context: &CliContext, args: ChangePasswordArgs) -> anyhow::Result<()> {
    context
        .client
        .change_password(&args.old_password, &args.new_password)
        .await?;
    println!("password changed");
    Ok(())
}
