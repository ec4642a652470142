use std::{future::Future, io, pin::pin, sync::Arc};

use hashbrown::HashMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::fetch::CredentialProvider;

use super::{
    events::{Inbound, LinkEvent},
    frame::{ConnectionInfo, Frame, LoginStatus, Opcode},
    link::{Link, LinkConfig, LinkError, LinkState, LinkStatus, LoginOutcome, Outbound},
};

/// One open channel as a pair of line queues. Dropping `outgoing` closes the
/// write side; `incoming` yielding `None` means the peer closed.
#[derive(Debug)]
pub struct Duplex {
    /// Lines to the peer.
    pub outgoing: mpsc::UnboundedSender<String>,
    /// Lines from the peer.
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Two cross-wired ends of an in-process channel.
pub fn duplex_pair() -> (Duplex, Duplex) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        Duplex {
            outgoing: a_tx,
            incoming: b_rx,
        },
        Duplex {
            outgoing: b_tx,
            incoming: a_rx,
        },
    )
}

/// Opens channels on demand; called again after every disconnect.
pub trait Connector: Send + Sync + 'static {
    /// Opens one channel.
    fn connect(&self) -> impl Future<Output = io::Result<Duplex>> + Send;
}

/// Cloneable handle to the link driver.
pub struct LinkHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<LinkEvent>,
}

impl Clone for LinkHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

enum Command {
    Register {
        opcode: Opcode,
        sink: mpsc::UnboundedSender<Inbound>,
        resp: oneshot::Sender<()>,
    },
    Send {
        frame: Frame,
        resp: oneshot::Sender<Result<(), LinkError>>,
    },
    Status {
        resp: oneshot::Sender<LinkStatus>,
    },
    Close {
        resp: oneshot::Sender<()>,
    },
}

enum Flow {
    Continue,
    Stop,
}

/// Starts the driver task. It connects immediately and keeps reconnecting
/// until [`LinkHandle::close`] is called or every handle is dropped.
pub fn spawn_link<C: Connector>(
    connector: C,
    credentials: Arc<dyn CredentialProvider>,
    config: LinkConfig,
) -> LinkHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<LinkEvent>(64);

    let driver = Driver {
        link: Link::new(config),
        handlers: HashMap::new(),
        cmd_rx,
        events_tx: events_tx.clone(),
        credentials,
    };
    tokio::spawn(driver.run(connector));

    LinkHandle { cmd_tx, events_tx }
}

impl LinkHandle {
    /// New receiver for link events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events_tx.subscribe()
    }

    /// Routes every inbound frame with `opcode` to `sink`, replacing any
    /// earlier registration for the same opcode. The sink also receives each
    /// [`LinkEvent`] in line with the frames around it.
    pub async fn register(&self, opcode: Opcode, sink: mpsc::UnboundedSender<Inbound>) -> Result<(), LinkError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register { opcode, sink, resp: tx })
            .await
            .map_err(|_| LinkError::ChannelClosed)?;
        rx.await.map_err(|_| LinkError::ChannelClosed)
    }

    /// Sends now when ready, otherwise queues until the next login.
    pub async fn send(&self, frame: Frame) -> Result<(), LinkError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send { frame, resp: tx })
            .await
            .map_err(|_| LinkError::ChannelClosed)?;
        rx.await.map_err(|_| LinkError::ChannelClosed)?
    }

    /// Serializes `payload` and sends it as `opcode`.
    pub async fn send_payload<T: serde::Serialize>(&self, opcode: Opcode, payload: &T) -> Result<(), LinkError> {
        self.send(Frame::new(opcode, payload)?).await
    }

    /// Current state, failures and queue length.
    pub async fn status(&self) -> Result<LinkStatus, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Status { resp: tx })
            .await
            .map_err(|_| LinkError::ChannelClosed)?;
        rx.await.map_err(|_| LinkError::ChannelClosed)
    }

    /// Closes the link for good. Queued frames are dropped.
    pub async fn close(&self) -> Result<(), LinkError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Close { resp: tx })
            .await
            .map_err(|_| LinkError::ChannelClosed)?;
        rx.await.map_err(|_| LinkError::ChannelClosed)
    }
}

struct Driver {
    link: Link,
    handlers: HashMap<Opcode, mpsc::UnboundedSender<Inbound>>,
    cmd_rx: mpsc::Receiver<Command>,
    events_tx: broadcast::Sender<LinkEvent>,
    credentials: Arc<dyn CredentialProvider>,
}

impl Driver {
    async fn run<C: Connector>(mut self, connector: C) {
        loop {
            self.link.begin_connect();

            let opened = {
                let mut connect = pin!(connector.connect());
                loop {
                    tokio::select! {
                        res = &mut connect => break Some(res),
                        cmd = self.cmd_rx.recv() => {
                            if let Flow::Stop = self.on_command(cmd, None) {
                                break None;
                            }
                        }
                    }
                }
            };

            let flow = match opened {
                None => Flow::Stop,
                Some(Ok(duplex)) => self.run_session(duplex).await,
                Some(Err(err)) => {
                    warn!(error = %err, "connect failed");
                    Flow::Continue
                }
            };
            if let Flow::Stop = flow {
                break;
            }

            let Some(delay) = self.link.on_closed() else {
                break;
            };
            self.notify(LinkEvent::Disconnected {
                failures: self.link.failures(),
                retry_in: delay,
            });

            let mut sleep = pin!(tokio::time::sleep(delay));
            let stopped = loop {
                tokio::select! {
                    _ = &mut sleep => break false,
                    cmd = self.cmd_rx.recv() => {
                        if let Flow::Stop = self.on_command(cmd, None) {
                            break true;
                        }
                    }
                }
            };
            if stopped {
                break;
            }
        }
        self.link.close();
        debug!("link driver stopped");
    }

    async fn run_session(&mut self, duplex: Duplex) -> Flow {
        let Duplex {
            outgoing,
            mut incoming,
        } = duplex;
        self.link.on_open();
        let mut handshake = pin!(tokio::time::sleep(self.link.config().handshake_timeout()));

        loop {
            let awaiting = self.link.state() != LinkState::Ready;
            tokio::select! {
                _ = &mut handshake, if awaiting => {
                    warn!("handshake timed out");
                    return Flow::Continue;
                }
                line = incoming.recv() => {
                    let Some(line) = line else {
                        return Flow::Continue;
                    };
                    if !self.on_line(&line, &outgoing) {
                        return Flow::Continue;
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    if let Flow::Stop = self.on_command(cmd, Some(&outgoing)) {
                        return Flow::Stop;
                    }
                }
            }
        }
    }

    /// Handles one inbound line. Returns false when the session must end.
    fn on_line(&mut self, line: &str, outgoing: &mpsc::UnboundedSender<String>) -> bool {
        let frame = match Frame::from_line(line) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "malformed frame dropped");
                return true;
            }
        };
        let Some(opcode) = frame.kind() else {
            debug!(opcode = %frame.opcode, "unknown opcode dropped");
            return true;
        };

        match opcode {
            Opcode::ConnectionInfo => {
                let info: ConnectionInfo = frame.decode_payload().unwrap_or_default();
                match self.link.on_greeting(&info, self.credentials.access_token()) {
                    Ok(login) => write_frames(&mut self.link, outgoing, vec![login]),
                    Err(err) => {
                        warn!(error = %err, "could not build login frame");
                        false
                    }
                }
            }
            Opcode::LoginStatus => {
                let status = match frame.decode_payload::<LoginStatus>() {
                    Ok(status) => status,
                    Err(err) => {
                        warn!(error = %err, "malformed login status");
                        return false;
                    }
                };
                match self.link.on_login_status(status) {
                    LoginOutcome::Ready { flush } => {
                        if !write_frames(&mut self.link, outgoing, flush) {
                            return false;
                        }
                        self.notify(LinkEvent::Connected);
                        true
                    }
                    LoginOutcome::Rejected { .. } => false,
                    LoginOutcome::Unexpected => {
                        debug!("login status outside handshake ignored");
                        true
                    }
                }
            }
            Opcode::Login
            | Opcode::RegisterGuild
            | Opcode::CommitCreate
            | Opcode::CommitPutContent
            | Opcode::CommitFinalize => {
                self.dispatch(opcode, frame);
                true
            }
        }
    }

    fn dispatch(&mut self, opcode: Opcode, frame: Frame) {
        let Some(sink) = self.handlers.get(&opcode) else {
            debug!(opcode = opcode.as_str(), "no handler, frame dropped");
            return;
        };
        if sink.send(Inbound::Frame(frame)).is_err() {
            debug!(opcode = opcode.as_str(), "handler gone, unregistering");
            self.handlers.remove(&opcode);
        }
    }

    /// Tells every distinct handler sink, then broadcast subscribers.
    fn notify(&mut self, event: LinkEvent) {
        let mut told: Vec<mpsc::UnboundedSender<Inbound>> = Vec::new();
        self.handlers.retain(|_, sink| {
            if told.iter().any(|t| t.same_channel(sink)) {
                return true;
            }
            if sink.send(Inbound::Link(event)).is_err() {
                return false;
            }
            told.push(sink.clone());
            true
        });
        let _ = self.events_tx.send(event);
    }

    fn on_command(&mut self, cmd: Option<Command>, outgoing: Option<&mpsc::UnboundedSender<String>>) -> Flow {
        let Some(cmd) = cmd else {
            return Flow::Stop;
        };
        match cmd {
            Command::Register { opcode, sink, resp } => {
                self.handlers.insert(opcode, sink);
                let _ = resp.send(());
            }
            Command::Send { frame, resp } => {
                let res = match self.link.outbound(frame) {
                    Ok(Outbound::Send(frame)) => match outgoing {
                        Some(out) => {
                            write_frames(&mut self.link, out, vec![frame]);
                            Ok(())
                        }
                        None => {
                            self.link.requeue_front(vec![frame]);
                            Ok(())
                        }
                    },
                    Ok(Outbound::Queued) => Ok(()),
                    Err(err) => Err(err),
                };
                let _ = resp.send(res);
            }
            Command::Status { resp } => {
                let _ = resp.send(self.link.status());
            }
            Command::Close { resp } => {
                info!("closing link");
                self.link.close();
                let _ = resp.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}

/// Writes frames in order. On a dead channel the unsent tail goes back to the
/// head of the queue and false is returned.
fn write_frames(link: &mut Link, outgoing: &mpsc::UnboundedSender<String>, frames: Vec<Frame>) -> bool {
    let mut pending = frames.into_iter();
    while let Some(frame) = pending.next() {
        let line = match frame.to_line() {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, opcode = %frame.opcode, "unserializable frame dropped");
                continue;
            }
        };
        if outgoing.send(line).is_err() {
            let mut rest = vec![frame];
            rest.extend(pending);
            link.requeue_front(rest);
            return false;
        }
    }
    true
}
