//! Interactive shell variant
//!
//! The initiator side requests a session from its local node, then runs
//! a full SSH client handshake over the returned stream: host-key
//! verification through the trust store, key-file then password
//! authentication, and a PTY-backed shell attached to the local terminal
//! in raw mode. The acceptor side simply dials the local shell service
//! and hands its socket to the session relay.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use crossterm::terminal;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use pl_core::error::{ConfigError, TransportError};
use pl_core::traits::{TrustDecision, TrustStore};
use pl_core::HostId;
use pl_protocol::{MessageKind, Opcode, ProtocolCode, ProtocolError};

use crate::error::NodeError;
use crate::pipe::Rewound;
use crate::sender::Sender;
use crate::trust::KnownHostsStore;
use crate::variant::VariantContext;

/// Maximum interactive password attempts
const PASSWORD_PROMPTS: usize = 3;

/// Exit status of a shell ended by an interactive interrupt; treated as
/// a normal session end.
const INTERRUPT_EXIT_STATUS: u32 = 130;

/// Wire parameters of a shell session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellParams {
    /// Remote peer to open the shell on
    pub host: HostId,
    /// Remote account name
    pub username: String,
    /// Install the local public key instead of opening a shell
    pub copy_id: bool,
}

/// Interactive shell session
pub struct ShellVariant {
    params: ShellParams,
    pair_id: String,
    control_address: String,
    shell_address: String,
    connect_timeout: Duration,
    known_hosts_path: PathBuf,
    accept_changed_host_keys: bool,
    key_path: Option<PathBuf>,
    initiator: bool,
}

impl ShellVariant {
    /// Create the initiator-side instance from a `[user@]host` target
    pub fn new(target: &str) -> Self {
        let (username, host) = match target.split_once('@') {
            Some((user, host)) => (user.to_string(), HostId::new(host)),
            None => (String::new(), HostId::new(target)),
        };
        Self::build(
            ShellParams {
                host,
                username,
                copy_id: false,
            },
            true,
        )
    }

    /// Reconstruct from decoded wire parameters
    pub fn from_params(params: ShellParams) -> Self {
        Self::build(params, false)
    }

    fn build(params: ShellParams, initiator: bool) -> Self {
        Self {
            params,
            pair_id: String::new(),
            control_address: String::new(),
            shell_address: String::new(),
            connect_timeout: Duration::from_secs(10),
            known_hosts_path: PathBuf::new(),
            accept_changed_host_keys: false,
            key_path: None,
            initiator,
        }
    }

    /// Wire parameters
    pub fn params(&self) -> &ShellParams {
        &self.params
    }

    /// Use a specific private key for authentication
    pub fn set_key_path(&mut self, path: Option<PathBuf>) {
        self.key_path = path;
    }

    /// Enable the copy-id sub-mode
    pub fn set_copy_id(&mut self, enabled: bool) {
        self.params.copy_id = enabled;
    }

    pub(crate) fn init(&mut self, ctx: &VariantContext) {
        self.control_address = ctx.control_address.clone();
        self.shell_address = ctx.shell_address.clone();
        self.connect_timeout = ctx.connect_timeout;
        self.known_hosts_path = ctx.known_hosts_path.clone();
        self.accept_changed_host_keys = ctx.accept_changed_host_keys;
    }

    pub(crate) fn prepare(&mut self) -> Result<(), NodeError> {
        if self.params.host.is_empty() {
            return Err(ConfigError::Invalid("shell target host is required".to_string()).into());
        }
        if self.params.username.is_empty() {
            self.params.username = whoami::username();
        }
        Ok(())
    }

    /// Request a session and run the interactive client over it
    pub(crate) async fn dial(&mut self) -> Result<(), NodeError> {
        let payload = Bytes::from(bincode::serialize(&self.params).map_err(ProtocolError::from)?);
        let sender = Sender::from_parts(
            MessageKind::new(Opcode::Up, ProtocolCode::Shell),
            self.pair_id.clone(),
            payload,
            self.control_address.clone(),
        );
        let (stream, response) = sender.send().await?;
        self.set_pair_id(&response.pair_id);

        match self.run_client(stream).await {
            Ok(()) => Ok(()),
            Err(NodeError::ShellExit(INTERRUPT_EXIT_STATUS)) => {
                self.close().await;
                Ok(())
            }
            Err(e) => {
                // Never leak a half-open registration on the failing path.
                self.close().await;
                Err(e)
            }
        }
    }

    async fn run_client(&self, stream: Rewound<TcpStream>) -> Result<(), NodeError> {
        let config = Arc::new(client::Config::default());
        let handler = TrustHandler {
            host: self.params.host.to_string(),
            store: KnownHostsStore::new(self.known_hosts_path.clone()),
            accept_changed: self.accept_changed_host_keys,
        };

        let mut handle = client::connect_stream(config, stream, handler).await?;
        self.authenticate(&mut handle).await?;

        if self.params.copy_id {
            return self.push_public_key(&handle).await;
        }
        self.open_terminal(handle).await
    }

    async fn authenticate(&self, handle: &mut Handle<TrustHandler>) -> Result<(), NodeError> {
        if let Some(key_path) = self.resolve_key_path() {
            match russh_keys::load_secret_key(&key_path, None) {
                Ok(key) => {
                    if handle
                        .authenticate_publickey(&self.params.username, Arc::new(key))
                        .await?
                    {
                        return Ok(());
                    }
                    tracing::debug!("Public key {} rejected", key_path.display());
                }
                Err(e) => {
                    tracing::warn!("Could not load key {}: {}", key_path.display(), e);
                }
            }
        }

        for _ in 0..PASSWORD_PROMPTS {
            let password = prompt_password(&format!(
                "{}@{}'s password: ",
                self.params.username, self.params.host
            ))?;
            if handle
                .authenticate_password(&self.params.username, &password)
                .await?
            {
                return Ok(());
            }
            eprintln!("Permission denied, please try again.");
        }

        Err(NodeError::AuthenticationFailed {
            user: self.params.username.clone(),
            host: self.params.host.to_string(),
        })
    }

    fn resolve_key_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.key_path {
            return Some(path.clone());
        }
        let default = dirs::home_dir()?.join(".ssh").join("id_ed25519");
        default.exists().then_some(default)
    }

    async fn open_terminal(&self, handle: Handle<TrustHandler>) -> Result<(), NodeError> {
        let mut channel = handle.channel_open_session().await?;

        let (cols, rows) = terminal::size().unwrap_or((80, 24));
        let term = std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string());
        channel
            .request_pty(false, &term, cols as u32, rows as u32, 0, 0, &[])
            .await?;
        channel.request_shell(true).await?;

        terminal::enable_raw_mode()?;
        let outcome = relay_terminal(&mut channel).await;
        let _ = terminal::disable_raw_mode();

        let _ = handle
            .disconnect(Disconnect::ByApplication, "session ended", "en")
            .await;

        match outcome? {
            Some(code) if code != 0 => Err(NodeError::ShellExit(code)),
            _ => Ok(()),
        }
    }

    /// copy-id sub-mode: append the local public key to the remote
    /// account's authorized keys over an exec channel.
    async fn push_public_key(&self, handle: &Handle<TrustHandler>) -> Result<(), NodeError> {
        let key_path = self.resolve_key_path().ok_or_else(|| {
            NodeError::Config(ConfigError::Invalid(
                "no local key found to install".to_string(),
            ))
        })?;
        let public_key = tokio::fs::read_to_string(key_path.with_extension("pub")).await?;

        let mut channel = handle.channel_open_session().await?;
        channel
            .exec(true, "mkdir -p ~/.ssh && cat >> ~/.ssh/authorized_keys")
            .await?;
        channel.data(public_key.as_bytes()).await?;
        channel.eof().await?;

        let mut status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::ExitStatus { exit_status } => status = Some(exit_status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        match status {
            Some(0) | None => {
                tracing::info!("Public key installed on {}", self.params.host);
                Ok(())
            }
            Some(code) => Err(NodeError::ShellExit(code)),
        }
    }

    /// Acceptor side: dial the local shell service
    pub(crate) async fn respond(&mut self) -> Result<TcpStream, NodeError> {
        tracing::debug!("Dialing local shell service at {}", self.shell_address);
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.shell_address))
            .await
            .map_err(|_| TransportError::Timeout {
                target: self.shell_address.clone(),
            })?
            .map_err(|e| TransportError::Dial {
                target: self.shell_address.clone(),
                source: e,
            })?;
        Ok(stream)
    }

    pub(crate) async fn close(&mut self) {
        if !self.initiator || self.pair_id.is_empty() {
            return;
        }
        let sender = Sender::from_parts(
            MessageKind::new(Opcode::Down, ProtocolCode::Shell),
            self.pair_id.clone(),
            Bytes::new(),
            self.control_address.clone(),
        );
        if let Err(e) = sender.send_detach().await {
            tracing::debug!("Teardown notice not delivered: {}", e);
        }
    }

    pub(crate) fn host_id(&self) -> &HostId {
        &self.params.host
    }

    pub(crate) fn pair_id(&self) -> &str {
        &self.pair_id
    }

    pub(crate) fn set_pair_id(&mut self, id: &str) {
        if self.pair_id.is_empty() {
            self.pair_id = id.to_string();
        }
    }
}

/// Pump terminal bytes both ways until the channel closes; returns the
/// exit status if the remote reported one.
async fn relay_terminal(channel: &mut Channel<Msg>) -> Result<Option<u32>, NodeError> {
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut buf = [0u8; 1024];
    let mut stdin_closed = false;
    let mut exit_status = None;

    loop {
        tokio::select! {
            read = stdin.read(&mut buf), if !stdin_closed => match read {
                Ok(0) => {
                    stdin_closed = true;
                    channel.eof().await?;
                }
                Ok(n) => channel.data(&buf[..n]).await?,
                Err(e) => return Err(e.into()),
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { ref data }) => {
                    stdout.write_all(data).await?;
                    stdout.flush().await?;
                }
                Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    stdout.write_all(data).await?;
                    stdout.flush().await?;
                }
                Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                    exit_status = Some(code);
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
        }
    }

    Ok(exit_status)
}

/// Read a password from the terminal without echoing it
fn prompt_password(prompt: &str) -> std::io::Result<String> {
    use crossterm::event::{read, Event, KeyCode, KeyEventKind, KeyModifiers};
    use std::io::Write;

    let mut stdout = std::io::stdout();
    write!(stdout, "{}", prompt)?;
    stdout.flush()?;

    terminal::enable_raw_mode()?;
    let mut password = String::new();
    let entered = loop {
        match read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                KeyCode::Enter => break Ok(password),
                KeyCode::Backspace => {
                    password.pop();
                }
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    break Err(std::io::Error::new(
                        std::io::ErrorKind::Interrupted,
                        "password prompt cancelled",
                    ));
                }
                KeyCode::Char(c) => password.push(c),
                _ => {}
            },
            _ => {}
        }
    };
    terminal::disable_raw_mode()?;
    writeln!(stdout)?;
    entered
}

/// SSH client handler routing host keys through the trust store
struct TrustHandler {
    host: String,
    store: KnownHostsStore,
    accept_changed: bool,
}

#[async_trait]
impl client::Handler for TrustHandler {
    type Error = NodeError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let key = format!(
            "{} {}",
            server_public_key.name(),
            server_public_key.public_key_base64()
        );

        match self.store.verify(&self.host, &key)? {
            TrustDecision::Known => Ok(true),
            TrustDecision::Unknown => {
                // First contact: record and proceed.
                self.store.record(&self.host, &key)?;
                tracing::info!("Recorded new host key for {}", self.host);
                Ok(true)
            }
            TrustDecision::Changed { expected } => {
                if self.accept_changed {
                    tracing::warn!(
                        "Host key for {} changed (expected {}); accepting per configuration",
                        self.host,
                        expected
                    );
                    Ok(true)
                } else {
                    tracing::error!(
                        "Host key for {} changed; refusing to connect. \
                         Set accept_changed_host_keys to override.",
                        self.host
                    );
                    Ok(false)
                }
            }
        }
    }
}
