use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

type Result<T> = crate::ClientResult<T>;
use rpassword::read_password;
use russh::{
    client::{self, AuthResult, KeyboardInteractiveAuthResponse},
    keys::{self, Algorithm, HashAlg, PrivateKeyWithHashAlg},
};
use secrecy::{ExposeSecret, SecretString};
use ssh_core::session::SessionHandle;
use tokio::{fs, task};
use tracing::{debug, info, warn};

use crate::ClientError;

pub struct AuthPreferences<'a> {
    pub username: &'a str,
    pub identities: &'a [PathBuf],
    pub use_agent_auth: bool,
    pub agent_socket: Option<&'a Path>,
    pub prompt_password: bool,
    pub password_prompt: &'a str,
    pub allow_keyboard_interactive: bool,
}

/// Try public keys, the agent, a password and keyboard-interactive, in that
/// order, stopping at the first the server accepts.
pub async fn authenticate<H>(session: &mut SessionHandle<H>, prefs: AuthPreferences<'_>) -> Result<()>
where
    H: client::Handler + Send,
{
    let methods = plan(&prefs).await?;
    let rsa_hint = session.best_supported_rsa_hash().await.unwrap_or(None).flatten();

    for method in methods {
        let label = method.label();
        match method.attempt(session, prefs.username, rsa_hint).await {
            Ok(true) => {
                info!(method = label, "authentication succeeded");
                return Ok(());
            }
            Ok(false) => warn!(method = label, "authentication rejected by server"),
            Err(err) => warn!(method = label, error = ?err, "authentication attempt failed"),
        }
    }

    Err(ClientError::AuthFailed(
        "all authentication methods were rejected by the server".to_string(),
    ))
}

enum AuthMethod {
    PublicKeys(Vec<Arc<keys::PrivateKey>>),
    Agent(PathBuf),
    Password(String),
    KeyboardInteractive,
}

async fn plan(prefs: &AuthPreferences<'_>) -> Result<Vec<AuthMethod>> {
    let mut methods = Vec::new();
    let keys = load_identities(prefs.identities).await;
    if !keys.is_empty() {
        methods.push(AuthMethod::PublicKeys(keys));
    }
    if prefs.use_agent_auth {
        let socket = prefs
            .agent_socket
            .ok_or_else(|| ClientError::Other("SSH agent requested but SSH_AUTH_SOCK is unset".to_string()))?;
        methods.push(AuthMethod::Agent(socket.to_path_buf()));
    }
    if prefs.prompt_password {
        methods.push(AuthMethod::Password(prefs.password_prompt.to_string()));
    }
    if prefs.allow_keyboard_interactive {
        methods.push(AuthMethod::KeyboardInteractive);
    }
    if methods.is_empty() {
        return Err(ClientError::AuthFailed(
            "no authentication methods available; add an --identity, use --agent-auth, or allow the password prompt".to_string(),
        ));
    }
    Ok(methods)
}

impl AuthMethod {
    fn label(&self) -> &'static str {
        match self {
            AuthMethod::PublicKeys(_) => "publickey",
            AuthMethod::Agent(_) => "agent",
            AuthMethod::Password(_) => "password",
            AuthMethod::KeyboardInteractive => "keyboard-interactive",
        }
    }

    /// `Ok(false)` means the server said no and the next method may be tried.
    async fn attempt<H>(self, session: &mut SessionHandle<H>, username: &str, rsa_hint: Option<HashAlg>) -> Result<bool>
    where
        H: client::Handler + Send,
    {
        match self {
            AuthMethod::PublicKeys(keys) => {
                for key in keys {
                    debug!(key = ?key.algorithm(), "offering identity");
                    let hash = rsa_hash(key.algorithm(), rsa_hint);
                    let result = session
                        .authenticate_publickey(username.to_string(), PrivateKeyWithHashAlg::new(key, hash))
                        .await;
                    if accepted(result, "identity") {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            AuthMethod::Agent(socket) => offer_agent_keys(session, username, &socket, rsa_hint).await,
            AuthMethod::Password(prompt) => {
                let password = read_secret(prompt, false).await?;
                let result = session
                    .authenticate_password(username.to_string(), password.expose_secret().to_string())
                    .await?;
                Ok(result.success())
            }
            AuthMethod::KeyboardInteractive => answer_keyboard_interactive(session, username).await,
        }
    }
}

/// A single rejected or failed key does not end the method; the next key is tried.
fn accepted<E: std::fmt::Debug>(result: std::result::Result<AuthResult, E>, what: &str) -> bool {
    match result {
        Ok(result) => result.success(),
        Err(err) => {
            warn!(error = ?err, "{what} authentication attempt failed");
            false
        }
    }
}

fn rsa_hash(algorithm: Algorithm, hint: Option<HashAlg>) -> Option<HashAlg> {
    if algorithm.is_rsa() { hint } else { None }
}

/// Load every identity that parses; unreadable or invalid keys are skipped.
async fn load_identities(identities: &[PathBuf]) -> Vec<Arc<keys::PrivateKey>> {
    let mut loaded = Vec::with_capacity(identities.len());
    for path in identities {
        match load_identity(path).await {
            Ok(key) => loaded.push(Arc::new(key)),
            Err(err) => warn!(key = %path.display(), error = %err, "skipping identity"),
        }
    }
    loaded
}

async fn load_identity(path: &Path) -> Result<keys::PrivateKey> {
    let data = fs::read_to_string(path).await?;
    match keys::decode_secret_key(&data, None) {
        Ok(key) => Ok(key),
        Err(keys::Error::KeyIsEncrypted) => {
            let passphrase = read_secret(format!("Enter passphrase for {}: ", path.display()), false).await?;
            keys::decode_secret_key(&data, Some(passphrase.expose_secret()))
                .map_err(|err| ClientError::Crypto(format!("failed to decrypt {}: {err}", path.display())))
        }
        Err(err) => Err(ClientError::Crypto(format!("{} is not a valid private key: {err}", path.display()))),
    }
}

#[cfg(unix)]
async fn offer_agent_keys<H>(session: &mut SessionHandle<H>, username: &str, socket: &Path, rsa_hint: Option<HashAlg>) -> Result<bool>
where
    H: client::Handler + Send,
{
    let stream = tokio::net::UnixStream::connect(socket).await?;
    let mut agent = keys::agent::client::AgentClient::connect(stream);
    let identities = agent
        .request_identities()
        .await
        .map_err(|err| ClientError::Other(format!("failed to list identities from SSH agent: {err}")))?;
    if identities.is_empty() {
        return Err(ClientError::AuthFailed("SSH agent has no loaded keys".to_string()));
    }
    debug!(count = identities.len(), "offering agent identities");
    for key in identities {
        let hash = rsa_hash(key.algorithm(), rsa_hint);
        let result = session
            .authenticate_publickey_with(username.to_string(), key, hash, &mut agent)
            .await;
        if accepted(result, "agent") {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(not(unix))]
async fn offer_agent_keys<H>(_: &mut SessionHandle<H>, _: &str, _: &Path, _: Option<HashAlg>) -> Result<bool>
where
    H: client::Handler + Send,
{
    warn!("agent authentication is not supported on this platform");
    Ok(false)
}

async fn answer_keyboard_interactive<H>(session: &mut SessionHandle<H>, username: &str) -> Result<bool>
where
    H: client::Handler + Send,
{
    let mut response = session
        .authenticate_keyboard_interactive_start(username.to_string(), Option::<String>::None)
        .await?;
    loop {
        let (name, instructions, prompts) = match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest {
                name,
                instructions,
                prompts,
            } => (name, instructions, prompts),
        };
        let banner = [name, instructions]
            .into_iter()
            .filter(|line| !line.is_empty())
            .map(|line| format!("{line}\n"))
            .collect::<String>();
        let mut answers = Vec::with_capacity(prompts.len());
        for (index, prompt) in prompts.into_iter().enumerate() {
            let text = if index == 0 { format!("{banner}{}", prompt.prompt) } else { prompt.prompt };
            answers.push(read_secret(text, prompt.echo).await?.expose_secret().to_string());
        }
        response = session.authenticate_keyboard_interactive_respond(answers).await?;
    }
}

/// Prompt on the terminal from a blocking thread; `echo` decides whether the
/// answer is shown while typed.
async fn read_secret(prompt: String, echo: bool) -> Result<SecretString> {
    task::spawn_blocking(move || -> io::Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        if echo {
            let mut input = String::new();
            io::stdin().read_line(&mut input)?;
            Ok(input.trim_end_matches(['\r', '\n']).to_string())
        } else {
            read_password()
        }
    })
    .await
    .map_err(|err| ClientError::Other(format!("prompt task failed: {err}")))?
    .map(|answer| SecretString::new(answer.into_boxed_str()))
    .map_err(ClientError::Io)
}
