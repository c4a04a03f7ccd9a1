//! SSH v2 front end: interactive shells map to a free console; the SFTP
//! subsystem request hands the channel to [`super::sftp`].

use crate::access_log::{AccessLog, Kind};
use crate::context::Context;
use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Server, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_keys::key::PublicKey;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

pub struct SshConfig {
    pub no_auth: bool,
    pub authorized_keys: Vec<PublicKey>,
}

#[derive(Clone)]
pub struct SshServer {
    context: Arc<Context>,
    config: Arc<SshConfig>,
    access_log: Arc<AccessLog>,
}

impl SshServer {
    pub fn new(context: Arc<Context>, config: SshConfig, access_log: Arc<AccessLog>) -> Self {
        SshServer { context, config: Arc::new(config), access_log }
    }
}

impl Server for SshServer {
    type Handler = SessionHandler;

    fn new_client(&mut self, peer_addr: Option<std::net::SocketAddr>) -> SessionHandler {
        SessionHandler {
            context: self.context.clone(),
            config: self.config.clone(),
            access_log: self.access_log.clone(),
            peer: peer_addr.map(|a| a.to_string()).unwrap_or_else(|| "unknown".to_string()),
            console: None,
            channels: HashMap::new(),
        }
    }
}

pub struct SessionHandler {
    context: Arc<Context>,
    config: Arc<SshConfig>,
    access_log: Arc<AccessLog>,
    peer: String,
    console: Option<usize>,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl SessionHandler {
    fn assign_console(&mut self) -> Option<usize> {
        if self.console.is_none() {
            self.console = self.context.consoles.first_free();
            if let Some(idx) = self.console {
                if let Some(c) = self.context.consoles.get(idx) {
                    c.set_connected(true);
                }
            }
        }
        self.console
    }

    /// Spawn the task that pumps bytes from the assigned console's output
    /// queue to the SSH channel until the session ends.
    fn spawn_output_pump(&self, channel_id: ChannelId, handle: russh::server::Handle) {
        let context = self.context.clone();
        let console = self.console;
        tokio::spawn(async move {
            let Some(idx) = console else { return };
            let mut ticker = interval(Duration::from_millis(20));
            loop {
                ticker.tick().await;
                let Some(c) = context.consoles.get(idx) else { break };
                if !c.is_connected() {
                    break;
                }
                let mut batch = Vec::new();
                while let Some(b) = c.pop_output() {
                    batch.push(b);
                    if batch.len() >= 512 {
                        break;
                    }
                }
                if !batch.is_empty() && handle.data(channel_id, CryptoVec::from(batch)).await.is_err() {
                    break;
                }
            }
        });
    }
}

#[async_trait]
impl Handler for SessionHandler {
    type Error = russh::Error;

    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        Ok(if self.config.no_auth { Auth::Accept } else { Auth::reject() })
    }

    async fn auth_publickey(&mut self, _user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        if self.config.no_auth || self.config.authorized_keys.iter().any(|k| k.public_key_bytes() == key.public_key_bytes()) {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(&mut self, channel: Channel<Msg>, session: &mut Session) -> Result<bool, Self::Error> {
        let id = channel.id();
        self.assign_console();
        self.access_log.record(Kind::Ssh, &self.peer, "channel opened");
        self.spawn_output_pump(id, session.handle());
        self.channels.insert(id, channel);
        Ok(true)
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        session.channel_success(channel);
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel);
        Ok(())
    }

    async fn data(&mut self, _channel: ChannelId, data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        let Some(idx) = self.console else { return Ok(()) };
        let Some(c) = self.context.consoles.get(idx) else { return Ok(()) };
        for &byte in data {
            if !c.push_input(byte) {
                warn!(console = idx, "input queue full, byte dropped");
            }
        }
        Ok(())
    }

    async fn subsystem_request(&mut self, channel: ChannelId, name: &str, session: &mut Session) -> Result<(), Self::Error> {
        if name == "sftp" {
            if let Some(chan) = self.channels.remove(&channel) {
                session.channel_success(channel);
                let context = self.context.clone();
                let access_log = self.access_log.clone();
                let peer = self.peer.clone();
                tokio::spawn(async move {
                    super::sftp::serve(context, access_log, peer, chan).await;
                });
            } else {
                session.channel_failure(channel);
            }
        } else {
            session.channel_failure(channel);
        }
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        if let Some(idx) = self.console.take() {
            if let Some(c) = self.context.consoles.get(idx) {
                c.set_connected(false);
            }
        }
        info!(peer = self.peer.as_str(), "channel closed");
        Ok(())
    }
}
