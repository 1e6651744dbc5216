//! SSH transport for remote execution, with single-hop bastion support.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::ssh_key::PublicKey;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::error::RemoteError;
use crate::job::{HostAuth, HostDescriptor, Job};
use crate::remote::{CommandOutput, RemoteSession, RemoteShell};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// SSH stream extended-data code for stderr.
const STDERR_EXT: u32 = 1;

struct AcceptingClient {
    host: String,
}

impl client::Handler for AcceptingClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            host = %self.host,
            algorithm = %server_public_key.algorithm(),
            "Accepting server host key"
        );
        Ok(true)
    }
}

/// Opens sessions to a job's target host, tunneling through the bastion when
/// one is configured.
pub struct SshShell {
    target: HostDescriptor,
    bastion: Option<HostDescriptor>,
    config: Arc<client::Config>,
}

impl SshShell {
    pub fn new(target: HostDescriptor, bastion: Option<HostDescriptor>) -> Self {
        let config = client::Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            ..Default::default()
        };
        Self {
            target,
            bastion,
            config: Arc::new(config),
        }
    }

    pub fn for_job(job: &Job) -> Self {
        Self::new(job.target.clone(), job.bastion.clone())
    }

    async fn open_direct(
        &self,
        host: &HostDescriptor,
    ) -> Result<Handle<AcceptingClient>, RemoteError> {
        let connect_err = |reason: String| RemoteError::Connect {
            host: host.hostname.clone(),
            port: host.port,
            reason,
        };

        let handler = AcceptingClient {
            host: host.hostname.clone(),
        };
        let connecting = client::connect(
            self.config.clone(),
            (host.hostname.as_str(), host.port),
            handler,
        );
        let mut handle = tokio::time::timeout(CONNECT_TIMEOUT, connecting)
            .await
            .map_err(|_| connect_err(format!("timed out after {CONNECT_TIMEOUT:?}")))?
            .map_err(|e| connect_err(e.to_string()))?;

        authenticate(&mut handle, host).await?;
        Ok(handle)
    }

    async fn open_via(
        &self,
        gateway: &Handle<AcceptingClient>,
        bastion: &HostDescriptor,
    ) -> Result<Handle<AcceptingClient>, RemoteError> {
        let target = &self.target;
        let gateway_err = |reason: String| RemoteError::Gateway {
            bastion: bastion.hostname.clone(),
            target: target.hostname.clone(),
            reason,
        };

        let channel = gateway
            .channel_open_direct_tcpip(
                target.hostname.clone(),
                u32::from(target.port),
                "127.0.0.1",
                0,
            )
            .await
            .map_err(|e| gateway_err(e.to_string()))?;

        let handler = AcceptingClient {
            host: target.hostname.clone(),
        };
        let connecting =
            client::connect_stream(self.config.clone(), channel.into_stream(), handler);
        let mut handle = tokio::time::timeout(CONNECT_TIMEOUT, connecting)
            .await
            .map_err(|_| gateway_err(format!("timed out after {CONNECT_TIMEOUT:?}")))?
            .map_err(|e| gateway_err(e.to_string()))?;

        authenticate(&mut handle, target).await?;
        Ok(handle)
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let (handle, gateway) = match &self.bastion {
            None => (self.open_direct(&self.target).await?, None),
            Some(bastion) => {
                let gateway = self.open_direct(bastion).await?;
                debug!(bastion = %bastion.display_addr(), "Bastion connection established");
                match self.open_via(&gateway, bastion).await {
                    Ok(handle) => (handle, Some(gateway)),
                    Err(e) => {
                        disconnect(&gateway, &bastion.hostname).await;
                        return Err(e);
                    }
                }
            }
        };

        info!(target_host = %self.target.display_addr(), "SSH session opened");
        Ok(Box::new(SshSession {
            handle,
            gateway,
            host: self.target.hostname.clone(),
            bastion_host: self.bastion.as_ref().map(|b| b.hostname.clone()),
            closed: false,
        }))
    }
}

/// One authenticated connection to the target, plus the bastion connection
/// carrying it when tunneled.
pub struct SshSession {
    handle: Handle<AcceptingClient>,
    gateway: Option<Handle<AcceptingClient>>,
    host: String,
    bastion_host: Option<String>,
    closed: bool,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, RemoteError> {
        let channel_err = |reason: String| RemoteError::Channel {
            host: self.host.clone(),
            reason,
        };

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| channel_err(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| channel_err(e.to_string()))?;
        if let Some(input) = stdin {
            channel
                .data(input.as_bytes())
                .await
                .map_err(|e| channel_err(e.to_string()))?;
        }
        channel
            .eof()
            .await
            .map_err(|e| channel_err(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == STDERR_EXT => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        disconnect(&self.handle, &self.host).await;
        if let Some(gateway) = self.gateway.take() {
            let bastion = self.bastion_host.as_deref().unwrap_or("bastion");
            disconnect(&gateway, bastion).await;
        }
        debug!(host = %self.host, "SSH session closed");
    }
}

async fn authenticate(
    handle: &mut Handle<AcceptingClient>,
    host: &HostDescriptor,
) -> Result<(), RemoteError> {
    let connect_err = |reason: String| RemoteError::Connect {
        host: host.hostname.clone(),
        port: host.port,
        reason,
    };

    let result = match &host.auth {
        HostAuth::Password(password) => handle
            .authenticate_password(host.username.clone(), password.expose_secret())
            .await
            .map_err(|e| connect_err(e.to_string()))?,
        HostAuth::KeyFile(path) => {
            let key = load_secret_key(path, None).map_err(|e| RemoteError::KeyLoad {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .map_err(|e| connect_err(e.to_string()))?
                .flatten();
            handle
                .authenticate_publickey(
                    host.username.clone(),
                    PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                )
                .await
                .map_err(|e| connect_err(e.to_string()))?
        }
    };

    if result.success() {
        Ok(())
    } else {
        Err(RemoteError::AuthRejected {
            user: host.username.clone(),
            host: host.hostname.clone(),
        })
    }
}

async fn disconnect(handle: &Handle<AcceptingClient>, host: &str) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "English")
        .await
    {
        warn!(host = %host, error = %e, "SSH disconnect failed");
    }
}
